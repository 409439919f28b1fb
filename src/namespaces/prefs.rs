//! Prefs (`spec.md` §4.4): a pass-through to the settings store. `delete`
//! and `flush` are not implemented. This is also the one namespace allowed
//! an in-memory cache beyond the storage layer itself (`spec.md` §1
//! Non-goals) -- a single cached record for a frequently-read key, to avoid
//! a full scan on every lookup of e.g. the display-units preference.

use crate::error::{BlobDbError, BlobDbResult};
use crate::facade::{DirtyEntry, Namespace};
use crate::settings_file::SettingsFile;

pub struct PrefsDb {
    file: SettingsFile,
    hot_key: Vec<u8>,
    cached: Option<Vec<u8>>,
}

impl PrefsDb {
    pub fn new(file_name: &str, max_file_size: usize, hot_key: &[u8]) -> BlobDbResult<Self> {
        Ok(PrefsDb { file: SettingsFile::open(file_name, max_file_size)?, hot_key: hot_key.to_vec(), cached: None })
    }
}

impl Namespace for PrefsDb {
    fn insert(&mut self, key: &[u8], value: &[u8]) -> BlobDbResult<()> {
        self.file.set(key, value)?;
        if key == self.hot_key.as_slice() {
            self.cached = Some(value.to_vec());
        }
        Ok(())
    }
    fn get_len(&mut self, key: &[u8]) -> BlobDbResult<usize> {
        if key == self.hot_key.as_slice() {
            if let Some(v) = &self.cached {
                return Ok(v.len());
            }
        }
        self.file.get_len(key)
    }
    fn read(&mut self, key: &[u8], buf: &mut [u8]) -> BlobDbResult<usize> {
        if key == self.hot_key.as_slice() {
            if let Some(v) = &self.cached {
                let n = v.len().min(buf.len());
                buf[..n].copy_from_slice(&v[..n]);
                return Ok(n);
            }
        }
        let v = self.file.get(key)?;
        if key == self.hot_key.as_slice() {
            self.cached = Some(v.clone());
        }
        let n = v.len().min(buf.len());
        buf[..n].copy_from_slice(&v[..n]);
        Ok(n)
    }
    fn delete(&mut self, _key: &[u8]) -> BlobDbResult<()> {
        Err(BlobDbError::InvalidOp)
    }
    fn flush(&mut self) -> BlobDbResult<()> {
        Err(BlobDbError::InvalidOp)
    }
    fn is_dirty(&mut self) -> BlobDbResult<bool> {
        Err(BlobDbError::InvalidOp)
    }
    fn dirty_list(&mut self) -> BlobDbResult<Vec<DirtyEntry>> {
        Err(BlobDbError::InvalidOp)
    }
    fn mark_synced(&mut self, _key: &[u8]) -> BlobDbResult<()> {
        Err(BlobDbError::InvalidOp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_and_flush_are_unsupported() {
        let mut db = PrefsDb::new("prefs", 16 * 1024, b"units").unwrap();
        assert!(matches!(db.delete(b"units"), Err(BlobDbError::InvalidOp)));
        assert!(matches!(db.flush(), Err(BlobDbError::InvalidOp)));
    }

    #[test]
    fn hot_key_is_cached_across_reads() {
        let mut db = PrefsDb::new("prefs", 16 * 1024, b"units").unwrap();
        db.insert(b"units", b"metric").unwrap();
        let mut buf = [0u8; 8];
        let n = db.read(b"units", &mut buf).unwrap();
        assert_eq!(&buf[..n], b"metric");
        assert_eq!(db.cached.as_deref(), Some(&b"metric"[..]));
    }
}
