//! Reminders (`spec.md` §4.4): a plain `TimelineItemStorage` wrapper with no
//! side effects of its own. Shares its backing store with Pins so that a
//! pin generated from the reminders data source and the reminder that
//! spawned it can cascade-delete together (`namespaces::pins`).

use crate::error::BlobDbResult;
use crate::facade::{DirtyEntry, Namespace};
use crate::namespaces::Shared;
use crate::timeline::TimelineItemStorage;

pub struct RemindersDb {
    store: Shared<TimelineItemStorage>,
}

impl RemindersDb {
    pub fn new(store: Shared<TimelineItemStorage>) -> Self {
        RemindersDb { store }
    }
}

impl Namespace for RemindersDb {
    fn insert(&mut self, key: &[u8], value: &[u8]) -> BlobDbResult<()> {
        self.store.lock().unwrap().insert(key, value, false, crate::api::now_secs())
    }
    fn insert_from_peer(&mut self, key: &[u8], value: &[u8]) -> BlobDbResult<()> {
        self.store.lock().unwrap().insert_with_flags(key, value, false, true, crate::api::now_secs())
    }
    fn get_len(&mut self, key: &[u8]) -> BlobDbResult<usize> {
        self.store.lock().unwrap().get_len(key)
    }
    fn read(&mut self, key: &[u8], buf: &mut [u8]) -> BlobDbResult<usize> {
        self.store.lock().unwrap().read(key, buf)
    }
    fn delete(&mut self, key: &[u8]) -> BlobDbResult<()> {
        self.store.lock().unwrap().delete(key)
    }
    fn flush(&mut self) -> BlobDbResult<()> {
        self.store.lock().unwrap().flush()
    }
    fn is_dirty(&mut self) -> BlobDbResult<bool> {
        Ok(self.store.lock().unwrap().is_dirty())
    }
    fn dirty_list(&mut self) -> BlobDbResult<Vec<DirtyEntry>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .dirty_list()
            .into_iter()
            .map(|(last_updated, key)| DirtyEntry { last_updated, key })
            .collect())
    }
    fn mark_synced(&mut self, key: &[u8]) -> BlobDbResult<()> {
        self.store.lock().unwrap().mark_synced(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{ItemType, TimelineFlags, TimelineItemHeader};
    use std::sync::{Arc, Mutex};

    fn item(id: u8) -> (Vec<u8>, Vec<u8>) {
        let header = TimelineItemHeader {
            id: [id; 16],
            parent_id: [0; 16],
            timestamp: crate::api::now_secs(),
            duration_min: 10,
            item_type: ItemType::Reminder,
            layout: 2,
            flags: TimelineFlags::empty(),
            status: 0,
            all_day: false,
            source: 0,
        };
        (header.id.to_vec(), header.encode().to_vec())
    }

    #[test]
    fn insert_and_read_roundtrip() {
        let store = Arc::new(Mutex::new(TimelineItemStorage::open("rem", 64 * 1024, 3 * crate::api::SECONDS_PER_DAY).unwrap()));
        let mut db = RemindersDb::new(store);
        let (key, value) = item(1);
        db.insert(&key, &value).unwrap();
        let mut buf = [0u8; 64];
        let n = db.read(&key, &mut buf).unwrap();
        assert_eq!(n, value.len());
    }
}
