//! AppGlance (`spec.md` §3, §4.4). Keyed by the referencing app's 16-byte
//! uuid. Value layout: `version:u8 | creation_time:u32le | num_slices:u8 |
//! slice*`, slice: `total_size:u16le | type:u8 | num_attributes:u8 |
//! attributes[total_size]`.
//!
//! Unlike Pins, an uninstallable app causes the whole insert to be
//! rejected rather than silently accepted -- an intentional asymmetry
//! called out in `spec.md` §9, preserved here rather than "fixed".

use crate::error::{BlobDbError, BlobDbResult};
use crate::event::{ChangeEvent, EventSender};
use crate::facade::{DirtyEntry, Namespace};
use crate::namespaces::AppCatalog;
use crate::settings_file::SettingsFile;
use byteorder::{ByteOrder, LittleEndian};
use std::sync::Arc;

const SLICE_HEADER_LEN: usize = 4;

struct ParsedGlance<'a> {
    creation_time: u32,
    slices: Vec<(u8, u8, &'a [u8])>, // (type, num_attributes, attributes)
}

fn parse(current_version: u8, value: &[u8]) -> BlobDbResult<ParsedGlance<'_>> {
    if value.len() < 6 || value[0] != current_version {
        return Err(BlobDbError::InvalidArg);
    }
    let creation_time = LittleEndian::read_u32(&value[1..5]);
    let num_slices = value[5] as usize;
    let mut p = 6usize;
    let mut slices = Vec::new();
    for _ in 0..num_slices {
        if p + SLICE_HEADER_LEN > value.len() {
            return Err(BlobDbError::InvalidArg);
        }
        let total_size = LittleEndian::read_u16(&value[p..p + 2]) as usize;
        let ty = value[p + 2];
        let num_attrs = value[p + 3];
        p += SLICE_HEADER_LEN;
        if p + total_size > value.len() {
            return Err(BlobDbError::InvalidArg);
        }
        slices.push((ty, num_attrs, &value[p..p + total_size]));
        p += total_size;
    }
    Ok(ParsedGlance { creation_time, slices })
}

/// Rebuilds a value buffer keeping only the first `MAX_SLICES_PER_GLANCE`
/// slices, trimming any excess silently (`spec.md` §4.4).
fn trim_excess_slices(current_version: u8, value: &[u8]) -> BlobDbResult<Vec<u8>> {
    let parsed = parse(current_version, value)?;
    let kept = &parsed.slices[..parsed.slices.len().min(crate::api::MAX_SLICES_PER_GLANCE)];
    let mut out = Vec::with_capacity(value.len());
    out.push(current_version);
    out.extend_from_slice(&parsed.creation_time.to_le_bytes());
    out.push(kept.len() as u8);
    for (ty, num_attrs, attrs) in kept {
        out.extend_from_slice(&(attrs.len() as u16).to_le_bytes());
        out.push(*ty);
        out.push(*num_attrs);
        out.extend_from_slice(attrs);
    }
    Ok(out)
}

pub struct AppGlanceDb {
    file: SettingsFile,
    current_version: u8,
    catalog: Arc<dyn AppCatalog>,
    events: EventSender,
}

impl AppGlanceDb {
    pub fn new(file_name: &str, max_file_size: usize, current_version: u8, catalog: Arc<dyn AppCatalog>, events: EventSender) -> BlobDbResult<Self> {
        Ok(AppGlanceDb { file: SettingsFile::open(file_name, max_file_size)?, current_version, catalog, events })
    }
}

impl Namespace for AppGlanceDb {
    fn insert(&mut self, key: &[u8], value: &[u8]) -> BlobDbResult<()> {
        if key.len() != 16 {
            return Err(BlobDbError::InvalidArg);
        }
        let incoming = parse(self.current_version, value)?;
        if let Ok(existing) = self.file.get(key) {
            if let Ok(existing_parsed) = parse(self.current_version, &existing) {
                if incoming.creation_time <= existing_parsed.creation_time {
                    return Err(BlobDbError::InvalidArg);
                }
            }
        }

        let mut app_uuid = [0u8; 16];
        app_uuid.copy_from_slice(key);
        if !self.catalog.is_installed(&app_uuid) && !self.catalog.is_system_app(&app_uuid) {
            return Err(BlobDbError::InvalidArg);
        }

        let trimmed = trim_excess_slices(self.current_version, value)?;
        self.file.set(key, &trimmed)?;

        if self.catalog.is_installed(&app_uuid) {
            if self.catalog.is_cached(&app_uuid) {
                self.catalog.note_launched(&app_uuid);
            } else {
                let _ = self.events.send(ChangeEvent::AppFetchRequest { app_uuid });
            }
        }
        Ok(())
    }

    /// Records arriving from the peer skip the fetch/cache side effects --
    /// the peer is the phone itself, so there is nothing to request back
    /// from it -- but still go through the same version/ordering checks.
    fn insert_from_peer(&mut self, key: &[u8], value: &[u8]) -> BlobDbResult<()> {
        if key.len() != 16 {
            return Err(BlobDbError::InvalidArg);
        }
        let incoming = parse(self.current_version, value)?;
        if let Ok(existing) = self.file.get(key) {
            if let Ok(existing_parsed) = parse(self.current_version, &existing) {
                if incoming.creation_time <= existing_parsed.creation_time {
                    return Err(BlobDbError::InvalidArg);
                }
            }
        }
        let mut app_uuid = [0u8; 16];
        app_uuid.copy_from_slice(key);
        if !self.catalog.is_installed(&app_uuid) && !self.catalog.is_system_app(&app_uuid) {
            return Err(BlobDbError::InvalidArg);
        }
        let trimmed = trim_excess_slices(self.current_version, value)?;
        self.file.set_with_flags(key, &trimmed, false, true)
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
        self.file.rewrite(|_| crate::settings_file::RewriteAction::Keep)
    }
    fn is_dirty(&mut self) -> BlobDbResult<bool> {
        Ok(self.file.is_dirty())
    }
    fn dirty_list(&mut self) -> BlobDbResult<Vec<DirtyEntry>> {
        Ok(self.file.dirty_list().into_iter().map(|(last_updated, key)| DirtyEntry { last_updated, key }).collect())
    }
    fn mark_synced(&mut self, key: &[u8]) -> BlobDbResult<()> {
        self.file.mark_synced(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeCatalog {
        installed: bool,
        system: bool,
        cached: bool,
    }
    impl AppCatalog for FakeCatalog {
        fn is_installed(&self, _app_uuid: &[u8; 16]) -> bool {
            self.installed
        }
        fn is_system_app(&self, _app_uuid: &[u8; 16]) -> bool {
            self.system
        }
        fn is_cached(&self, _app_uuid: &[u8; 16]) -> bool {
            self.cached
        }
        fn note_launched(&self, _app_uuid: &[u8; 16]) {}
    }

    fn glance(creation_time: u32) -> Vec<u8> {
        let mut v = vec![1u8];
        v.extend_from_slice(&creation_time.to_le_bytes());
        v.push(0); // num_slices = 0
        v
    }

    #[test]
    fn stale_creation_time_is_rejected() {
        let catalog = Arc::new(FakeCatalog { installed: true, system: false, cached: true });
        let (tx, _rx) = crate::event::event_channel();
        let mut db = AppGlanceDb::new("glance", 16 * 1024, 1, catalog, tx).unwrap();
        db.insert(&[1u8; 16], &glance(100)).unwrap();
        assert!(matches!(db.insert(&[1u8; 16], &glance(50)), Err(BlobDbError::InvalidArg)));
        let mut buf = [0u8; 32];
        db.read(&[1u8; 16], &mut buf).unwrap();
        assert_eq!(LittleEndian::read_u32(&buf[1..5]), 100);
    }

    #[test]
    fn uninstallable_app_is_rejected() {
        let catalog = Arc::new(FakeCatalog { installed: false, system: false, cached: false });
        let (tx, _rx) = crate::event::event_channel();
        let mut db = AppGlanceDb::new("glance", 16 * 1024, 1, catalog, tx).unwrap();
        assert!(matches!(db.insert(&[2u8; 16], &glance(100)), Err(BlobDbError::InvalidArg)));
    }

    #[test]
    fn installed_uncached_app_requests_fetch() {
        let catalog = Arc::new(FakeCatalog { installed: true, system: false, cached: false });
        let (tx, rx) = crate::event::event_channel();
        let mut db = AppGlanceDb::new("glance", 16 * 1024, 1, catalog, tx).unwrap();
        db.insert(&[3u8; 16], &glance(100)).unwrap();
        assert!(matches!(rx.try_recv(), Ok(ChangeEvent::AppFetchRequest { app_uuid }) if app_uuid == [3u8;16]));
    }
}
