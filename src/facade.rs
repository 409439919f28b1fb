//! The BlobDB façade (`spec.md` §4.2): a uniform dispatch point over the
//! namespace registry. The teacher's PDDB plays this role with a table of
//! opcode-addressed function pointers (`backend::hw`); per the REDESIGN
//! FLAGS in `spec.md` §9 we replace the vtable with a `Namespace` trait
//! object behind a per-entry mutex, and disabled namespaces become an
//! explicit `None` slot rather than a flag checked on every call.

use crate::api::{DbId, NUM_DATABASES};
use crate::error::{BlobDbError, BlobDbResult};
use crate::event::{ChangeEvent, EventSender};
use std::sync::Mutex;

/// One dirty record as reported by a backend: its last-modified timestamp
/// and key. Plain `Vec` per REDESIGN FLAGS, replacing the source's
/// singly-linked dirty list.
#[derive(Debug, Clone)]
pub struct DirtyEntry {
    pub last_updated: u32,
    pub key: Vec<u8>,
}

/// The per-namespace contract every backend implements. Default method
/// bodies return `InvalidOp`, matching the façade's rule that calling an
/// unsupported operation on a backend that omits it yields `InvalidOp`.
pub trait Namespace: Send {
    fn init(&mut self) -> BlobDbResult<()> {
        Ok(())
    }
    fn insert(&mut self, key: &[u8], value: &[u8]) -> BlobDbResult<()>;
    /// Inserts a record that arrived from the peer rather than a local
    /// caller. Per `spec.md` §3 invariant 3, these land `synced=true,
    /// dirty=false` so they aren't echoed straight back out. Backends that
    /// don't distinguish the two origins may leave this at its default.
    fn insert_from_peer(&mut self, key: &[u8], value: &[u8]) -> BlobDbResult<()> {
        self.insert(key, value)
    }
    fn get_len(&mut self, key: &[u8]) -> BlobDbResult<usize>;
    fn read(&mut self, key: &[u8], buf: &mut [u8]) -> BlobDbResult<usize>;
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

struct RegistryEntry {
    backend: Option<Mutex<Box<dyn Namespace>>>,
}

pub struct BlobDb {
    registry: Vec<RegistryEntry>,
    events: EventSender,
}

impl BlobDb {
    /// Builds the registry from `NUM_DATABASES` slots. `backends` maps a
    /// `DbId` to its implementation; any id missing from the map is a
    /// disabled entry that uniformly fails with `InvalidDbId`.
    pub fn new(backends: Vec<(DbId, Box<dyn Namespace>)>, events: EventSender) -> BlobDb {
        let mut registry: Vec<RegistryEntry> = (0..NUM_DATABASES).map(|_| RegistryEntry { backend: None }).collect();
        for (id, backend) in backends {
            registry[id.as_u8() as usize] = RegistryEntry { backend: Some(Mutex::new(backend)) };
        }
        BlobDb { registry, events }
    }

    fn entry(&self, db: DbId) -> BlobDbResult<&Mutex<Box<dyn Namespace>>> {
        self.registry
            .get(db.as_u8() as usize)
            .and_then(|e| e.backend.as_ref())
            .ok_or(BlobDbError::InvalidDbId)
    }

    pub fn init_all(&self) -> BlobDbResult<()> {
        for entry in &self.registry {
            if let Some(backend) = &entry.backend {
                backend.lock().unwrap().init()?;
            }
        }
        Ok(())
    }

    pub fn insert(&self, db: DbId, key: &[u8], value: &[u8]) -> BlobDbResult<()> {
        self.entry(db)?.lock().unwrap().insert(key, value)?;
        let _ = self.events.send(ChangeEvent::Insert { db, key: key.to_vec() });
        Ok(())
    }

    /// Entry point for the wire codec: records arriving from the peer are
    /// stored without the local dirty/synced defaults (`spec.md` §2, §3).
    pub fn insert_from_peer(&self, db: DbId, key: &[u8], value: &[u8]) -> BlobDbResult<()> {
        self.entry(db)?.lock().unwrap().insert_from_peer(key, value)?;
        let _ = self.events.send(ChangeEvent::Insert { db, key: key.to_vec() });
        Ok(())
    }

    pub fn read(&self, db: DbId, key: &[u8], buf: &mut [u8]) -> BlobDbResult<usize> {
        self.entry(db)?.lock().unwrap().read(key, buf)
    }

    pub fn get_len(&self, db: DbId, key: &[u8]) -> BlobDbResult<usize> {
        self.entry(db)?.lock().unwrap().get_len(key)
    }

    pub fn delete(&self, db: DbId, key: &[u8]) -> BlobDbResult<()> {
        self.entry(db)?.lock().unwrap().delete(key)?;
        let _ = self.events.send(ChangeEvent::Delete { db, key: key.to_vec() });
        Ok(())
    }

    pub fn flush(&self, db: DbId) -> BlobDbResult<()> {
        self.entry(db)?.lock().unwrap().flush()?;
        let _ = self.events.send(ChangeEvent::Flush { db });
        Ok(())
    }

    /// A database that doesn't implement dirty tracking is simply not dirty,
    /// from the façade's point of view (`spec.md` §4.2).
    pub fn is_dirty(&self, db: DbId) -> BlobDbResult<bool> {
        match self.entry(db)?.lock().unwrap().is_dirty() {
            Ok(v) => Ok(v),
            Err(BlobDbError::InvalidOp) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn get_dirty_dbs(&self) -> Vec<DbId> {
        (0..NUM_DATABASES)
            .filter_map(|i| DbId::from_u8(i as u8))
            .filter(|&db| self.is_dirty(db).unwrap_or(false))
            .collect()
    }

    pub fn get_dirty_list(&self, db: DbId) -> BlobDbResult<Vec<DirtyEntry>> {
        self.entry(db)?.lock().unwrap().dirty_list()
    }

    pub fn mark_synced(&self, db: DbId, key: &[u8]) -> BlobDbResult<()> {
        self.entry(db)?.lock().unwrap().mark_synced(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings_file::SettingsFile;

    struct PlainKv(SettingsFile);
    impl Namespace for PlainKv {
        fn insert(&mut self, key: &[u8], value: &[u8]) -> BlobDbResult<()> {
            self.0.set(key, value)
        }
        fn get_len(&mut self, key: &[u8]) -> BlobDbResult<usize> {
            self.0.get_len(key)
        }
        fn read(&mut self, key: &[u8], buf: &mut [u8]) -> BlobDbResult<usize> {
            let v = self.0.get(key)?;
            let n = v.len().min(buf.len());
            buf[..n].copy_from_slice(&v[..n]);
            Ok(n)
        }
        fn delete(&mut self, key: &[u8]) -> BlobDbResult<()> {
            self.0.delete(key)
        }
        fn flush(&mut self) -> BlobDbResult<()> {
            self.0.rewrite(|_| crate::settings_file::RewriteAction::Keep)
        }
        fn is_dirty(&mut self) -> BlobDbResult<bool> {
            Ok(self.0.is_dirty())
        }
        fn dirty_list(&mut self) -> BlobDbResult<Vec<DirtyEntry>> {
            Ok(self.0.dirty_list().into_iter().map(|(last_updated, key)| DirtyEntry { last_updated, key }).collect())
        }
        fn mark_synced(&mut self, key: &[u8]) -> BlobDbResult<()> {
            self.0.mark_synced(key)
        }
    }

    fn plain(name: &str) -> Box<dyn Namespace> {
        Box::new(PlainKv(SettingsFile::open(name, 16 * 1024).unwrap()))
    }

    #[test]
    fn disabled_database_is_invalid_db_id() {
        let (tx, _rx) = crate::event::event_channel();
        let db = BlobDb::new(vec![(DbId::Test, plain("test"))], tx);
        assert!(matches!(db.insert(DbId::Pins, b"k", b"v"), Err(BlobDbError::InvalidDbId)));
    }

    #[test]
    fn insert_emits_event_and_get_dirty_dbs_reflects_it() {
        let (tx, rx) = crate::event::event_channel();
        let db = BlobDb::new(vec![(DbId::Test, plain("test"))], tx);
        db.insert(DbId::Test, b"k", b"v").unwrap();
        assert!(matches!(rx.try_recv(), Ok(ChangeEvent::Insert { db: DbId::Test, .. })));
        assert_eq!(db.get_dirty_dbs(), vec![DbId::Test]);
        let list = db.get_dirty_list(DbId::Test).unwrap();
        assert_eq!(list.len(), 1);
        db.mark_synced(DbId::Test, b"k").unwrap();
        assert!(db.get_dirty_list(DbId::Test).unwrap().is_empty());
        assert!(db.get_dirty_dbs().is_empty());
    }
}
