//! A plain pass-through key/value namespace with no extra validation.
//! Backs Test, Apps, Notifs and IosNotifPrefs -- each differs only in
//! whether dirty tracking is exposed to the sync engine.

use crate::error::BlobDbResult;
use crate::facade::{DirtyEntry, Namespace};
use crate::settings_file::{RewriteAction, SettingsFile};

pub struct PlainKvDb {
    file: SettingsFile,
    /// Apps and Notifs omit dirty tracking (`spec.md` §4.4): they never
    /// originate local mutations that need to reach the phone.
    supports_dirty: bool,
}

impl PlainKvDb {
    pub fn new(file_name: &str, max_file_size: usize, supports_dirty: bool) -> BlobDbResult<Self> {
        Ok(PlainKvDb { file: SettingsFile::open(file_name, max_file_size)?, supports_dirty })
    }
}

impl Namespace for PlainKvDb {
    fn insert(&mut self, key: &[u8], value: &[u8]) -> BlobDbResult<()> {
        self.file.set(key, value)
    }
    fn insert_from_peer(&mut self, key: &[u8], value: &[u8]) -> BlobDbResult<()> {
        self.file.set_with_flags(key, value, false, true)
    }
    fn get_len(&mut self, key: &[u8]) -> BlobDbResult<usize> {
        self.file.get_len(key)
    }
    fn read(&mut self, key: &[u8], buf: &mut [u8]) -> BlobDbResult<usize> {
        let v = self.file.get(key)?;
        let n = v.len().min(buf.len());
        buf[..n].copy_from_slice(&v[..n]);
        Ok(n)
    }
    fn delete(&mut self, key: &[u8]) -> BlobDbResult<()> {
        self.file.delete(key)
    }
    fn flush(&mut self) -> BlobDbResult<()> {
        self.file.rewrite(|_| RewriteAction::Keep)
    }
    fn is_dirty(&mut self) -> BlobDbResult<bool> {
        if !self.supports_dirty {
            return Err(crate::error::BlobDbError::InvalidOp);
        }
        Ok(self.file.is_dirty())
    }
    fn dirty_list(&mut self) -> BlobDbResult<Vec<DirtyEntry>> {
        if !self.supports_dirty {
            return Err(crate::error::BlobDbError::InvalidOp);
        }
        Ok(self.file.dirty_list().into_iter().map(|(last_updated, key)| DirtyEntry { last_updated, key }).collect())
    }
    fn mark_synced(&mut self, key: &[u8]) -> BlobDbResult<()> {
        if !self.supports_dirty {
            return Err(crate::error::BlobDbError::InvalidOp);
        }
        self.file.mark_synced(key)
    }
}
