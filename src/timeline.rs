//! `TimelineItemStorage` (`spec.md` §4.3): a `SettingsFile` wrapper adding
//! TTL rejection, parent-child indexing, status-byte in-place patching and
//! a from-watch-preserving flush. Grounded on the teacher's split between
//! on-disk record format (`backend::key::KeyDescriptor`) and the policy
//! layer built over it (`backend::dictionary::DictCacheEntry`).

use crate::error::{BlobDbError, BlobDbResult};
use crate::settings_file::{RewriteAction, SettingsFile};
use byteorder::{ByteOrder, LittleEndian};

bitflags::bitflags! {
    pub struct TimelineFlags: u8 {
        /// Authored on the watch; survives `flush` (`spec.md` §4.3, glossary).
        const FROM_WATCH = 0x01;
        const LOCKED     = 0x02;
        const VISIBLE    = 0x04;
    }
}

#[derive(num_derive::FromPrimitive, num_derive::ToPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum ItemType {
    Pin = 0,
    Reminder = 1,
    Notification = 2,
}

/// A pin created on behalf of the watch-internal reminders data source is
/// tagged with this source id; the Pins backend (`namespaces::pins`) looks
/// for it to decide the initial dirty/synced policy.
pub const SOURCE_REMINDERS_DATA_SOURCE: u8 = 1;

pub const TIMELINE_HEADER_LEN: usize = 48;
/// Offset of the `status` byte within the serialized header -- the hot path
/// for `set_status_bits` patches exactly this byte.
pub const STATUS_OFFSET: usize = 45;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineItemHeader {
    pub id: [u8; 16],
    pub parent_id: [u8; 16],
    pub timestamp: i64,
    pub duration_min: u16,
    pub item_type: ItemType,
    pub layout: u8,
    pub flags: TimelineFlags,
    pub status: u8,
    pub all_day: bool,
    pub source: u8,
}

impl TimelineItemHeader {
    pub fn end_time(&self) -> i64 {
        self.timestamp + self.duration_min as i64 * 60
    }

    /// Serializes the header, XOR-inverting `flags` and `status` so that
    /// unprogrammed flash (all ones) decodes as "no flags set".
    pub fn encode(&self) -> [u8; TIMELINE_HEADER_LEN] {
        let mut buf = [0u8; TIMELINE_HEADER_LEN];
        buf[0..16].copy_from_slice(&self.id);
        buf[16..32].copy_from_slice(&self.parent_id);
        LittleEndian::write_i64(&mut buf[32..40], self.timestamp);
        LittleEndian::write_u16(&mut buf[40..42], self.duration_min);
        buf[42] = num_traits::ToPrimitive::to_u8(&self.item_type).unwrap();
        buf[43] = self.layout;
        buf[44] = !self.flags.bits();
        buf[STATUS_OFFSET] = !self.status;
        buf[46] = self.all_day as u8;
        buf[47] = self.source;
        buf
    }

    pub fn decode(buf: &[u8]) -> BlobDbResult<TimelineItemHeader> {
        if buf.len() < TIMELINE_HEADER_LEN {
            return Err(BlobDbError::InvalidArg);
        }
        let mut id = [0u8; 16];
        id.copy_from_slice(&buf[0..16]);
        let mut parent_id = [0u8; 16];
        parent_id.copy_from_slice(&buf[16..32]);
        let item_type = num_traits::FromPrimitive::from_u8(buf[42]).ok_or(BlobDbError::InvalidArg)?;
        Ok(TimelineItemHeader {
            id,
            parent_id,
            timestamp: LittleEndian::read_i64(&buf[32..40]),
            duration_min: LittleEndian::read_u16(&buf[40..42]),
            item_type,
            layout: buf[43],
            flags: TimelineFlags::from_bits_truncate(!buf[44]),
            status: !buf[STATUS_OFFSET],
            all_day: buf[46] != 0,
            source: buf[47],
        })
    }
}

/// Attributes required per layout id. A stand-in for the UI's real layout
/// table; sufficient to exercise `verify_layout`'s reject path.
fn required_attributes_for_layout(layout: u8) -> &'static [u8] {
    match layout {
        0 => &[1], // generic: title
        1 => &[1, 2], // calendar-style: title + location
        _ => &[],
    }
}

/// Payload format: `num_attributes:u8, { attr_id:u8, len:u16, data... }*, num_actions:u8, actions...`
fn parse_attribute_ids(payload: &[u8]) -> BlobDbResult<Vec<u8>> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    let num_attrs = payload[0] as usize;
    let mut ids = Vec::with_capacity(num_attrs);
    let mut p = 1usize;
    for _ in 0..num_attrs {
        if p + 3 > payload.len() {
            return Err(BlobDbError::InvalidArg);
        }
        let attr_id = payload[p];
        let len = LittleEndian::read_u16(&payload[p + 1..p + 3]) as usize;
        p += 3;
        if p + len > payload.len() {
            return Err(BlobDbError::InvalidArg);
        }
        ids.push(attr_id);
        p += len;
    }
    Ok(ids)
}

pub fn verify_layout(layout: u8, payload: &[u8]) -> BlobDbResult<()> {
    let present = parse_attribute_ids(payload)?;
    for required in required_attributes_for_layout(layout) {
        if !present.contains(required) {
            return Err(BlobDbError::InvalidArg);
        }
    }
    Ok(())
}

pub struct TimelineItemStorage {
    file: SettingsFile,
    max_item_age: i64,
}

impl TimelineItemStorage {
    pub fn open(file_name: &str, max_file_size: usize, max_item_age: i64) -> BlobDbResult<Self> {
        Ok(TimelineItemStorage { file: SettingsFile::open(file_name, max_file_size)?, max_item_age })
    }

    pub fn insert(&mut self, key: &[u8], value: &[u8], mark_as_synced: bool, now: i64) -> BlobDbResult<()> {
        if key.len() != 16 {
            return Err(BlobDbError::InvalidArg);
        }
        if value.len() < TIMELINE_HEADER_LEN || value.len() > crate::api::VALUE_MAX {
            return Err(BlobDbError::InvalidArg);
        }
        let header = TimelineItemHeader::decode(value)?;
        verify_layout(header.layout, &value[TIMELINE_HEADER_LEN..])?;
        if header.end_time() < now - self.max_item_age {
            return Err(BlobDbError::Stale);
        }
        self.file.set(key, value)?;
        if mark_as_synced {
            self.file.mark_synced(key)?;
        }
        Ok(())
    }

    /// Like `insert` but lets the caller pick the initial dirty/synced bits
    /// directly -- used by the Pins backend's source-dependent policy and by
    /// peer-originated writes (`synced=true, dirty=false`, no echo).
    pub fn insert_with_flags(&mut self, key: &[u8], value: &[u8], dirty: bool, synced: bool, now: i64) -> BlobDbResult<()> {
        if key.len() != 16 {
            return Err(BlobDbError::InvalidArg);
        }
        if value.len() < TIMELINE_HEADER_LEN || value.len() > crate::api::VALUE_MAX {
            return Err(BlobDbError::InvalidArg);
        }
        let header = TimelineItemHeader::decode(value)?;
        verify_layout(header.layout, &value[TIMELINE_HEADER_LEN..])?;
        if header.end_time() < now - self.max_item_age {
            return Err(BlobDbError::Stale);
        }
        self.file.set_with_flags(key, value, dirty, synced)
    }

    pub fn read(&self, key: &[u8], buf: &mut [u8]) -> BlobDbResult<usize> {
        let value = self.file.get(key)?;
        let n = value.len().min(buf.len());
        buf[..n].copy_from_slice(&value[..n]);
        Ok(n)
    }

    pub fn read_header(&self, key: &[u8]) -> BlobDbResult<TimelineItemHeader> {
        let value = self.file.get(key)?;
        TimelineItemHeader::decode(&value)
    }

    pub fn get_len(&self, key: &[u8]) -> BlobDbResult<usize> {
        self.file.get_len(key)
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.file.exists(key)
    }

    /// Patches the `status` byte in place -- the hot path for e.g. marking a
    /// pin dismissed/actioned.
    pub fn set_status_bits(&mut self, key: &[u8], status: u8) -> BlobDbResult<()> {
        self.file.set_byte(key, STATUS_OFFSET, !status)
    }

    pub fn delete(&mut self, key: &[u8]) -> BlobDbResult<()> {
        self.file.delete(key)
    }

    /// Scans for up to `MAX_CHILDREN_PER_PIN` records whose `parent_id`
    /// matches, deleting each and invoking `on_delete` if given. Stopping at
    /// the cap is deliberate (`spec.md` §4.3) -- repeated calls drain the
    /// remainder.
    pub fn delete_with_parent(&mut self, parent: &[u8; 16], mut on_delete: Option<&mut dyn FnMut(&[u8; 16])>) -> BlobDbResult<usize> {
        let mut matches: Vec<[u8; 16]> = Vec::new();
        self.file.each(|info| {
            if matches.len() >= crate::api::MAX_CHILDREN_PER_PIN || info.key_len() != 16 {
                return;
            }
            if let Ok(header) = TimelineItemHeader::decode(&info.get_val()) {
                if &header.parent_id == parent {
                    let mut id = [0u8; 16];
                    id.copy_from_slice(&info.get_key());
                    matches.push(id);
                }
            }
        });
        for id in &matches {
            self.file.delete(id)?;
            if let Some(cb) = on_delete.as_deref_mut() {
                cb(id);
            }
        }
        Ok(matches.len())
    }

    pub fn exists_with_parent(&self, parent: &[u8; 16]) -> bool {
        let mut found = false;
        self.file.each(|info| {
            if found || info.key_len() != 16 {
                return;
            }
            if let Ok(header) = TimelineItemHeader::decode(&info.get_val()) {
                if &header.parent_id == parent {
                    found = true;
                }
            }
        });
        found
    }

    /// Returns the live, non-stale item with the smallest `timestamp`,
    /// optionally restricted further by `filter`.
    pub fn next_item(&self, now: i64, filter: Option<&dyn Fn(&TimelineItemHeader) -> bool>) -> BlobDbResult<[u8; 16]> {
        let mut best: Option<([u8; 16], i64)> = None;
        self.file.each(|info| {
            if info.key_len() != 16 {
                return;
            }
            let header = match TimelineItemHeader::decode(&info.get_val()) {
                Ok(h) => h,
                Err(_) => return,
            };
            if header.end_time() < now - self.max_item_age {
                return;
            }
            if let Some(f) = filter {
                if !f(&header) {
                    return;
                }
            }
            if best.map(|(_, ts)| header.timestamp < ts).unwrap_or(true) {
                best = Some((header.id, header.timestamp));
            }
        });
        best.map(|(id, _)| id).ok_or(BlobDbError::NotFound)
    }

    /// Rewrites the file keeping only records whose `FromWatch` flag is set,
    /// discarding everything the phone pushed (`spec.md` §4.3).
    pub fn flush(&mut self) -> BlobDbResult<()> {
        self.file.rewrite(|info| {
            let val = info.get_val();
            match TimelineItemHeader::decode(&val) {
                Ok(header) if header.flags.contains(TimelineFlags::FROM_WATCH) => RewriteAction::Keep,
                _ => RewriteAction::Drop,
            }
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.file.is_dirty()
    }

    pub fn dirty_list(&self) -> Vec<(u32, Vec<u8>)> {
        self.file.dirty_list()
    }

    pub fn mark_synced(&mut self, key: &[u8]) -> BlobDbResult<()> {
        self.file.mark_synced(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u8, parent: u8, timestamp: i64, from_watch: bool) -> (Vec<u8>, Vec<u8>) {
        let header = TimelineItemHeader {
            id: [id; 16],
            parent_id: [parent; 16],
            timestamp,
            duration_min: 30,
            item_type: ItemType::Pin,
            layout: 0,
            flags: if from_watch { TimelineFlags::FROM_WATCH } else { TimelineFlags::empty() },
            status: 0,
            all_day: false,
            source: 0,
        };
        let value_header = header.encode().to_vec();
        let mut value = value_header;
        // layout 0 requires attribute id 1 ("title").
        value.extend_from_slice(&[1, 1, 1, 0, 0xAA]); // num_attrs=1, id=1, len=1, data=0xAA
        (header.id.to_vec(), value)
    }

    #[test]
    fn insert_read_roundtrip_inverts_flags_and_status() {
        let mut store = TimelineItemStorage::open("t", 64 * 1024, 3 * crate::api::SECONDS_PER_DAY).unwrap();
        let (key, value) = item(1, 9, 1000, true);
        store.insert(&key, &value, false, 1000).unwrap();
        let header = store.read_header(&key).unwrap();
        assert_eq!(header.id, [1u8; 16]);
        assert!(header.flags.contains(TimelineFlags::FROM_WATCH));
    }

    #[test]
    fn ttl_cutoff_rejects_stale_insert() {
        let mut store = TimelineItemStorage::open("t", 64 * 1024, 100).unwrap();
        let (key, value) = item(2, 0, 0, false);
        let result = store.insert(&key, &value, false, 1000);
        assert!(matches!(result, Err(BlobDbError::Stale)));
        assert!(!store.exists(&key));
    }

    #[test]
    fn status_bit_patch_is_idempotent_and_visible() {
        let mut store = TimelineItemStorage::open("t", 64 * 1024, 3 * crate::api::SECONDS_PER_DAY).unwrap();
        let (key, value) = item(3, 0, 1000, false);
        store.insert(&key, &value, false, 1000).unwrap();
        store.set_status_bits(&key, 7).unwrap();
        store.set_status_bits(&key, 7).unwrap();
        assert_eq!(store.read_header(&key).unwrap().status, 7);
    }

    #[test]
    fn flush_preserves_from_watch_only() {
        let mut store = TimelineItemStorage::open("t", 64 * 1024, 3 * crate::api::SECONDS_PER_DAY).unwrap();
        let (k1, v1) = item(1, 0, 1000, true);
        let (k2, v2) = item(2, 0, 1000, false);
        store.insert(&k1, &v1, false, 1000).unwrap();
        store.insert(&k2, &v2, false, 1000).unwrap();
        store.flush().unwrap();
        assert!(store.exists(&k1));
        assert!(!store.exists(&k2));
    }

    #[test]
    fn delete_with_parent_cascades() {
        let mut store = TimelineItemStorage::open("t", 64 * 1024, 3 * crate::api::SECONDS_PER_DAY).unwrap();
        let parent = [7u8; 16];
        let (k1, mut v1) = item(1, 7, 1000, false);
        v1[16..32].copy_from_slice(&parent);
        store.insert(&k1, &v1, false, 1000).unwrap();
        let mut seen: Vec<[u8; 16]> = Vec::new();
        let count = store.delete_with_parent(&parent, Some(&mut |id| seen.push(*id))).unwrap();
        assert_eq!(count, 1);
        assert_eq!(seen[0].to_vec(), k1);
        assert!(!store.exists(&k1));
    }

    #[test]
    fn verify_layout_rejects_missing_required_attribute() {
        let result = verify_layout(0, &[0]); // num_attrs=0, layout 0 requires attr 1
        assert!(matches!(result, Err(BlobDbError::InvalidArg)));
    }
}
