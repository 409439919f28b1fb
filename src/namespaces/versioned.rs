//! Shared pattern for Weather, Contacts and WatchAppPrefs (`spec.md` §4.4):
//! records carry a `version` byte at offset 0. A read of a record whose
//! version doesn't match `CURRENT_VERSION` deletes it and reports
//! `NotFound` -- stale schema versions evaporate on first access rather
//! than needing an explicit migration pass.

use crate::error::{BlobDbError, BlobDbResult};
use crate::facade::{DirtyEntry, Namespace};
use crate::settings_file::{RewriteAction, SettingsFile};

pub struct VersionedDb {
    file: SettingsFile,
    current_version: u8,
    supports_dirty: bool,
}

impl VersionedDb {
    pub fn new(file_name: &str, max_file_size: usize, current_version: u8, supports_dirty: bool) -> BlobDbResult<Self> {
        Ok(VersionedDb { file: SettingsFile::open(file_name, max_file_size)?, current_version, supports_dirty })
    }

    fn check_version(&mut self, key: &[u8]) -> BlobDbResult<Vec<u8>> {
        let value = self.file.get(key)?;
        if value.is_empty() || value[0] != self.current_version {
            self.file.delete(key)?;
            return Err(BlobDbError::NotFound);
        }
        Ok(value)
    }
}

impl Namespace for VersionedDb {
    fn insert(&mut self, key: &[u8], value: &[u8]) -> BlobDbResult<()> {
        if value.is_empty() {
            return Err(BlobDbError::InvalidArg);
        }
        self.file.set(key, value)
    }
    fn insert_from_peer(&mut self, key: &[u8], value: &[u8]) -> BlobDbResult<()> {
        if value.is_empty() {
            return Err(BlobDbError::InvalidArg);
        }
        self.file.set_with_flags(key, value, false, true)
    }
    fn get_len(&mut self, key: &[u8]) -> BlobDbResult<usize> {
        Ok(self.check_version(key)?.len())
    }
    fn read(&mut self, key: &[u8], buf: &mut [u8]) -> BlobDbResult<usize> {
        let value = self.check_version(key)?;
        let n = value.len().min(buf.len());
        buf[..n].copy_from_slice(&value[..n]);
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
            return Err(BlobDbError::InvalidOp);
        }
        Ok(self.file.is_dirty())
    }
    fn dirty_list(&mut self) -> BlobDbResult<Vec<DirtyEntry>> {
        if !self.supports_dirty {
            return Err(BlobDbError::InvalidOp);
        }
        Ok(self.file.dirty_list().into_iter().map(|(last_updated, key)| DirtyEntry { last_updated, key }).collect())
    }
    fn mark_synced(&mut self, key: &[u8]) -> BlobDbResult<()> {
        if !self.supports_dirty {
            return Err(BlobDbError::InvalidOp);
        }
        self.file.mark_synced(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_version_is_removed_on_read() {
        let mut db = VersionedDb::new("weather", 16 * 1024, 2, false).unwrap();
        db.insert(b"sf", &[1, 0xAA]).unwrap(); // version 1, stale
        let mut buf = [0u8; 8];
        assert!(matches!(db.read(b"sf", &mut buf), Err(BlobDbError::NotFound)));
        assert!(matches!(db.read(b"sf", &mut buf), Err(BlobDbError::NotFound)));
    }

    #[test]
    fn current_version_reads_back() {
        let mut db = VersionedDb::new("weather", 16 * 1024, 2, false).unwrap();
        db.insert(b"sf", &[2, 0xAA]).unwrap();
        let mut buf = [0u8; 8];
        let n = db.read(b"sf", &mut buf).unwrap();
        assert_eq!(&buf[..n], &[2, 0xAA]);
    }
}
