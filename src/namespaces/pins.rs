//! Pins (`spec.md` §4.4, §9): the top-level pinned timeline items shown on
//! the watch face. Shares its backing store's sibling -- the reminders
//! store -- so that deleting a pin also removes the reminders generated
//! from it.
//!
//! Two behaviors set Pins apart from the other `TimelineItemStorage`
//! backends:
//! - A pin's initial dirty/synced state depends on where it came from: one
//!   produced by the on-watch reminders data source needs to reach the
//!   phone and so stays dirty/unsynced, while a plain app-authored pin is
//!   marked synced immediately after the local insert.
//! - `parent_id` doubles as an app reference for non-reminder pins. Unlike
//!   AppGlance, an uninstallable app does not reject the insert here --
//!   the pin is kept and simply never requested back from the phone. This
//!   asymmetry is intentional (`spec.md` §9), not an oversight.

use crate::error::BlobDbResult;
use crate::event::{ChangeEvent, EventSender};
use crate::facade::{DirtyEntry, Namespace};
use crate::namespaces::{AppCatalog, Shared};
use crate::timeline::{TimelineItemHeader, TimelineItemStorage, SOURCE_REMINDERS_DATA_SOURCE};
use std::sync::Arc;

/// `parent_id` value meaning "this pin does not reference an app" -- the
/// watch-internal source, exempt from the fetch/cache bookkeeping below.
pub const NO_APP_REFERENCE: [u8; 16] = [0u8; 16];

pub struct PinsDb {
    store: Shared<TimelineItemStorage>,
    reminders: Shared<TimelineItemStorage>,
    catalog: Arc<dyn AppCatalog>,
    events: EventSender,
}

impl PinsDb {
    pub fn new(store: Shared<TimelineItemStorage>, reminders: Shared<TimelineItemStorage>, catalog: Arc<dyn AppCatalog>, events: EventSender) -> Self {
        PinsDb { store, reminders, catalog, events }
    }

    fn handle_app_reference(&self, header: &TimelineItemHeader) {
        if header.source == SOURCE_REMINDERS_DATA_SOURCE || header.parent_id == NO_APP_REFERENCE {
            return;
        }
        let app_uuid = header.parent_id;
        if !self.catalog.is_installed(&app_uuid) {
            log::debug!("pin {:02x?} references uninstalled app {:02x?}, keeping pin", header.id, app_uuid);
            return;
        }
        if self.catalog.is_cached(&app_uuid) {
            self.catalog.note_launched(&app_uuid);
        } else {
            let _ = self.events.send(ChangeEvent::AppFetchRequest { app_uuid });
        }
    }
}

impl Namespace for PinsDb {
    fn insert(&mut self, key: &[u8], value: &[u8]) -> BlobDbResult<()> {
        let now = crate::api::now_secs();
        let header = TimelineItemHeader::decode(value)?;
        // spec.md §3 invariant 4 / §4.4: pins sourced from the watch-internal
        // reminders data source need to reach the phone, so they start
        // dirty/unsynced like any other local mutation. Other pins start
        // already synced -- there is nothing outstanding for the sync
        // engine to push for them.
        if header.source == SOURCE_REMINDERS_DATA_SOURCE {
            self.store.lock().unwrap().insert(key, value, false, now)?;
        } else {
            self.store.lock().unwrap().insert_with_flags(key, value, false, true, now)?;
        }
        self.handle_app_reference(&header);
        Ok(())
    }

    fn insert_from_peer(&mut self, key: &[u8], value: &[u8]) -> BlobDbResult<()> {
        let now = crate::api::now_secs();
        self.store.lock().unwrap().insert_with_flags(key, value, false, true, now)?;
        let header = TimelineItemHeader::decode(value)?;
        self.handle_app_reference(&header);
        Ok(())
    }

    fn get_len(&mut self, key: &[u8]) -> BlobDbResult<usize> {
        self.store.lock().unwrap().get_len(key)
    }
    fn read(&mut self, key: &[u8], buf: &mut [u8]) -> BlobDbResult<usize> {
        self.store.lock().unwrap().read(key, buf)
    }

    /// Deletes the pin, then cascades into any reminders this pin spawned.
    /// `spec.md` §4.3 caps the cascade at `MAX_CHILDREN_PER_PIN`; repeated
    /// deletes of the same pin drain the remainder.
    fn delete(&mut self, key: &[u8]) -> BlobDbResult<()> {
        self.store.lock().unwrap().delete(key)?;
        if key.len() == 16 {
            let mut parent = [0u8; 16];
            parent.copy_from_slice(key);
            self.reminders.lock().unwrap().delete_with_parent(&parent, None)?;
        }
        Ok(())
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
