//! Log-structured key/value file (`spec.md` §4.1).
//!
//! On-disk layout:
//! ```text
//! [file header: magic | version | flags ]
//! [record 0] [record 1] ... [record N-1] [free space]
//! record: { marker | flags | key_len | val_len | last_modified | key | value }
//! ```
//!
//! `flags` carries the dirty/synced/tombstone bits inverted, the same trick
//! the teacher's `TimelineItem` flags/status bytes use: unprogrammed flash
//! reads as all-ones, so the all-ones byte must decode to "nothing set",
//! which lets a later write clear a bit in place without an erase cycle.
//! This crate emulates the flash with an in-memory buffer pre-filled with
//! `0xFF`, grounded directly on the teacher's `backend::hosted::flashmem()`
//! singleton.

use crate::error::{BlobDbError, BlobDbResult};
use std::collections::HashMap;

const RECORD_MARKER: u8 = 0xD0;
/// marker | flags | key_len | val_len(u16) | last_modified(u32)
const HEADER_LEN: usize = 1 + 1 + 1 + 2 + 4;
const FILE_MAGIC: [u8; 4] = *b"BLBD";
const FILE_VERSION: u8 = 1;
const FILE_HEADER_LEN: usize = 6;

const FLAG_DIRTY_INV: u8 = 0x01;
const FLAG_SYNCED_INV: u8 = 0x02;
const FLAG_TOMBSTONE_INV: u8 = 0x04;

fn encode_flags(dirty: bool, synced: bool, tombstone: bool) -> u8 {
    let mut raw = 0xFFu8;
    if dirty {
        raw &= !FLAG_DIRTY_INV;
    }
    if synced {
        raw &= !FLAG_SYNCED_INV;
    }
    if tombstone {
        raw &= !FLAG_TOMBSTONE_INV;
    }
    raw
}

fn decode_dirty(raw: u8) -> bool {
    raw & FLAG_DIRTY_INV == 0
}
fn decode_synced(raw: u8) -> bool {
    raw & FLAG_SYNCED_INV == 0
}
fn decode_tombstone(raw: u8) -> bool {
    raw & FLAG_TOMBSTONE_INV == 0
}

/// What `rewrite`'s filter callback decides to do with one live record.
pub enum RewriteAction {
    /// Copy the record into the new file unchanged.
    Keep,
    /// Drop the record; it will not exist in the rewritten file, not even as
    /// a tombstone.
    Drop,
    /// Replace the record's value with new bytes, preserving its key and
    /// dirty/synced bits.
    Transform(Vec<u8>),
}

/// Read-only view of one record, handed to `each`/`rewrite` callbacks.
pub struct RecordInfo<'a> {
    data: &'a [u8],
    offset: usize,
    key_len: usize,
    val_len: usize,
}

impl<'a> RecordInfo<'a> {
    pub fn key_len(&self) -> usize {
        self.key_len
    }
    pub fn val_len(&self) -> usize {
        self.val_len
    }
    pub fn dirty(&self) -> bool {
        decode_dirty(self.data[self.offset + 1])
    }
    pub fn synced(&self) -> bool {
        decode_synced(self.data[self.offset + 1])
    }
    pub fn last_modified(&self) -> u32 {
        let p = self.offset + 4;
        u32::from_le_bytes(self.data[p..p + 4].try_into().unwrap())
    }
    pub fn get_key(&self) -> Vec<u8> {
        let p = self.offset + HEADER_LEN;
        self.data[p..p + self.key_len].to_vec()
    }
    pub fn get_val(&self) -> Vec<u8> {
        let p = self.offset + HEADER_LEN + self.key_len;
        self.data[p..p + self.val_len].to_vec()
    }
}

struct RecordLoc {
    offset: usize,
    key_len: usize,
    val_len: usize,
}

impl RecordLoc {
    fn record_len(&self) -> usize {
        HEADER_LEN + self.key_len + self.val_len
    }
    fn val_start(&self) -> usize {
        self.offset + HEADER_LEN + self.key_len
    }
}

/// A single namespace's settings file. Every public method here takes
/// `&mut self`; callers are expected to guard it with their own mutex
/// (`spec.md` §5) -- the store itself assumes exclusive access.
pub struct SettingsFile {
    name: String,
    max_size: usize,
    data: Vec<u8>,
    write_offset: usize,
    /// key -> offset of its most recent record (may be a tombstone). An
    /// optimization only: `each`/`rewrite` recompute this from scratch by
    /// scanning, so correctness never depends on it (`spec.md` §4.1).
    index: HashMap<Vec<u8>, usize>,
}

impl SettingsFile {
    pub fn open(name: &str, max_size: usize) -> BlobDbResult<Self> {
        let mut data = vec![0xFFu8; max_size];
        data[0..4].copy_from_slice(&FILE_MAGIC);
        data[4] = FILE_VERSION;
        data[5] = 0;
        Ok(SettingsFile { name: name.to_string(), max_size, data, write_offset: FILE_HEADER_LEN, index: HashMap::new() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn record_header_at(&self, offset: usize) -> Option<RecordLoc> {
        if offset + HEADER_LEN > self.data.len() || self.data[offset] != RECORD_MARKER {
            return None;
        }
        let key_len = self.data[offset + 2] as usize;
        let val_len = u16::from_le_bytes(self.data[offset + 3..offset + 5].try_into().unwrap()) as usize;
        Some(RecordLoc { offset, key_len, val_len })
    }

    fn scan_live_records(&self) -> Vec<(Vec<u8>, usize)> {
        // Rebuilds "last writer wins per key" purely from a front-to-back
        // scan, deliberately ignoring `self.index`.
        let mut order: Vec<Vec<u8>> = Vec::new();
        let mut latest: HashMap<Vec<u8>, usize> = HashMap::new();
        let mut offset = FILE_HEADER_LEN;
        while let Some(loc) = self.record_header_at(offset) {
            let key = self.data[offset + HEADER_LEN..offset + HEADER_LEN + loc.key_len].to_vec();
            if !latest.contains_key(&key) {
                order.push(key.clone());
            }
            latest.insert(key, offset);
            offset += loc.record_len();
        }
        order
            .into_iter()
            .map(|k| {
                let off = latest[&k];
                (k, off)
            })
            .collect()
    }

    fn append_record(&mut self, key: &[u8], value: &[u8], dirty: bool, synced: bool, tombstone: bool) -> BlobDbResult<usize> {
        let needed = HEADER_LEN + key.len() + value.len();
        if self.write_offset + needed > self.max_size {
            self.compact()?;
        }
        if self.write_offset + needed > self.max_size {
            return Err(BlobDbError::Full);
        }
        let offset = self.write_offset;
        let last_modified = crate::api::now_secs() as u32;
        self.data[offset] = RECORD_MARKER;
        self.data[offset + 1] = encode_flags(dirty, synced, tombstone);
        self.data[offset + 2] = key.len() as u8;
        self.data[offset + 3..offset + 5].copy_from_slice(&(value.len() as u16).to_le_bytes());
        self.data[offset + 5..offset + 9].copy_from_slice(&last_modified.to_le_bytes());
        let kp = offset + HEADER_LEN;
        self.data[kp..kp + key.len()].copy_from_slice(key);
        let vp = kp + key.len();
        self.data[vp..vp + value.len()].copy_from_slice(value);
        self.write_offset += needed;
        self.index.insert(key.to_vec(), offset);
        Ok(offset)
    }

    /// Compaction: drop tombstones and shadowed records. Unlike `rewrite`,
    /// this never consults a caller-supplied filter -- it exists purely to
    /// reclaim space, and is triggered automatically by `set`/`delete` when
    /// free space runs low.
    fn compact(&mut self) -> BlobDbResult<()> {
        self.rewrite(|_| RewriteAction::Keep)
    }

    pub fn get(&self, key: &[u8]) -> BlobDbResult<Vec<u8>> {
        let offset = *self.index.get(key).ok_or(BlobDbError::NotFound)?;
        let loc = self.record_header_at(offset).ok_or(BlobDbError::NotFound)?;
        if decode_tombstone(self.data[offset + 1]) {
            return Err(BlobDbError::NotFound);
        }
        Ok(self.data[loc.val_start()..loc.val_start() + loc.val_len].to_vec())
    }

    pub fn get_len(&self, key: &[u8]) -> BlobDbResult<usize> {
        let offset = *self.index.get(key).ok_or(BlobDbError::NotFound)?;
        if decode_tombstone(self.data[offset + 1]) {
            return Err(BlobDbError::NotFound);
        }
        let loc = self.record_header_at(offset).ok_or(BlobDbError::NotFound)?;
        Ok(loc.val_len)
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.index.get(key).map(|&o| !decode_tombstone(self.data[o + 1])).unwrap_or(false)
    }

    /// Appends a new record for `key` with `dirty=true, synced=false`.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> BlobDbResult<()> {
        self.append_record(key, value, true, false, false)?;
        Ok(())
    }

    /// Appends a record with caller-chosen dirty/synced bits (used by
    /// backends that need policy control over the initial state, e.g. pins
    /// sourced from the reminders data source vs. peer-originated writes).
    pub fn set_with_flags(&mut self, key: &[u8], value: &[u8], dirty: bool, synced: bool) -> BlobDbResult<()> {
        self.append_record(key, value, dirty, synced, false)?;
        Ok(())
    }

    pub fn delete(&mut self, key: &[u8]) -> BlobDbResult<()> {
        self.append_record(key, &[], false, false, true)?;
        Ok(())
    }

    /// Patches a single byte of an existing record's value region in place.
    /// Clears neither `dirty` nor `synced` -- this is the hot path for
    /// in-place status updates (`spec.md` §4.3).
    pub fn set_byte(&mut self, key: &[u8], rel_offset: usize, value: u8) -> BlobDbResult<()> {
        let offset = *self.index.get(key).ok_or(BlobDbError::NotFound)?;
        let loc = self.record_header_at(offset).ok_or(BlobDbError::NotFound)?;
        if decode_tombstone(self.data[offset + 1]) {
            return Err(BlobDbError::NotFound);
        }
        if rel_offset >= loc.val_len {
            return Err(BlobDbError::InvalidArg);
        }
        self.data[loc.val_start() + rel_offset] = value;
        Ok(())
    }

    /// Sets `synced=true, dirty=false` on the latest record for `key`: the
    /// peer has acknowledged it, so it both counts as synced and drops out
    /// of `dirty_list`/`is_dirty`.
    pub fn mark_synced(&mut self, key: &[u8]) -> BlobDbResult<()> {
        let offset = *self.index.get(key).ok_or(BlobDbError::NotFound)?;
        if decode_tombstone(self.data[offset + 1]) {
            return Err(BlobDbError::NotFound);
        }
        self.data[offset + 1] &= !FLAG_SYNCED_INV;
        self.data[offset + 1] |= FLAG_DIRTY_INV;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.scan_live_records().into_iter().any(|(k, _)| {
            let o = self.index[&k];
            decode_dirty(self.data[o + 1])
        })
    }

    pub fn dirty_list(&self) -> Vec<(u32, Vec<u8>)> {
        self.scan_live_records()
            .into_iter()
            .filter_map(|(k, _)| {
                let o = self.index[&k];
                if decode_dirty(self.data[o + 1]) {
                    let p = o + 4;
                    let last_modified = u32::from_le_bytes(self.data[p..p + 4].try_into().unwrap());
                    Some((last_modified, k))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Iterates every live record in append order. Holds no lock of its own
    /// -- callers must not re-enter the same store from within `f`.
    pub fn each<F: FnMut(&RecordInfo)>(&self, mut f: F) {
        for (_key, offset) in self.scan_live_records() {
            if decode_tombstone(self.data[offset + 1]) {
                continue;
            }
            let loc = self.record_header_at(offset).unwrap();
            let info = RecordInfo { data: &self.data, offset, key_len: loc.key_len, val_len: loc.val_len };
            f(&info);
        }
    }

    /// Rebuilds the file by replaying every live record through `filter`.
    /// All-or-nothing: the new buffer is assembled separately and only
    /// swapped in once fully built.
    pub fn rewrite<F: FnMut(&RecordInfo) -> RewriteAction>(&mut self, mut filter: F) -> BlobDbResult<()> {
        let mut new_data = vec![0xFFu8; self.max_size];
        new_data[0..4].copy_from_slice(&FILE_MAGIC);
        new_data[4] = FILE_VERSION;
        new_data[5] = 0;
        let mut new_offset = FILE_HEADER_LEN;
        let mut new_index = HashMap::new();

        for (key, offset) in self.scan_live_records() {
            if decode_tombstone(self.data[offset + 1]) {
                continue;
            }
            let loc = self.record_header_at(offset).unwrap();
            let info = RecordInfo { data: &self.data, offset, key_len: loc.key_len, val_len: loc.val_len };
            let action = filter(&info);
            let (value, flags_byte): (Vec<u8>, u8) = match action {
                RewriteAction::Drop => continue,
                RewriteAction::Keep => (info.get_val(), self.data[offset + 1]),
                RewriteAction::Transform(v) => (v, self.data[offset + 1]),
            };
            let needed = HEADER_LEN + key.len() + value.len();
            if new_offset + needed > self.max_size {
                return Err(BlobDbError::Full);
            }
            let last_modified = &self.data[offset + 5..offset + 9];
            let rec_offset = new_offset;
            new_data[rec_offset] = RECORD_MARKER;
            new_data[rec_offset + 1] = flags_byte;
            new_data[rec_offset + 2] = key.len() as u8;
            new_data[rec_offset + 3..rec_offset + 5].copy_from_slice(&(value.len() as u16).to_le_bytes());
            new_data[rec_offset + 5..rec_offset + 9].copy_from_slice(last_modified);
            let kp = rec_offset + HEADER_LEN;
            new_data[kp..kp + key.len()].copy_from_slice(&key);
            let vp = kp + key.len();
            new_data[vp..vp + value.len()].copy_from_slice(&value);
            new_offset += needed;
            new_index.insert(key, rec_offset);
        }

        self.data = new_data;
        self.write_offset = new_offset;
        self.index = new_index;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_writer_wins() {
        let mut f = SettingsFile::open("t", 64 * 1024).unwrap();
        f.set(b"k", b"v0").unwrap();
        f.set(b"k", b"v1").unwrap();
        f.set(b"k", b"v2").unwrap();
        assert_eq!(f.get(b"k").unwrap(), b"v2");
    }

    #[test]
    fn delete_persistence() {
        let mut f = SettingsFile::open("t", 64 * 1024).unwrap();
        f.set(b"k", b"v").unwrap();
        f.delete(b"k").unwrap();
        assert!(matches!(f.get(b"k"), Err(BlobDbError::NotFound)));
        f.set(b"k", b"v2").unwrap();
        assert_eq!(f.get(b"k").unwrap(), b"v2");
    }

    #[test]
    fn status_bit_idempotent() {
        let mut f = SettingsFile::open("t", 64 * 1024).unwrap();
        f.set(b"k", b"\x00\x00\x00").unwrap();
        f.set_byte(b"k", 1, 0x42).unwrap();
        f.set_byte(b"k", 1, 0x42).unwrap();
        assert_eq!(f.get(b"k").unwrap(), vec![0, 0x42, 0]);
    }

    #[test]
    fn mark_synced_clears_dirty() {
        let mut f = SettingsFile::open("t", 64 * 1024).unwrap();
        f.set(b"k", b"v").unwrap();
        assert!(f.is_dirty());
        f.mark_synced(b"k").unwrap();
        assert!(!f.is_dirty());
        assert!(!f.dirty_list().iter().any(|(_, k)| k == b"k"));
        // re-marking is a no-op.
        f.mark_synced(b"k").unwrap();
    }

    #[test]
    fn set_with_flags_keeps_dirty_and_synced_independent() {
        let mut f = SettingsFile::open("t", 64 * 1024).unwrap();
        f.set_with_flags(b"k", b"v", false, true).unwrap();
        assert!(!f.is_dirty());
        f.set_with_flags(b"k2", b"v", true, true).unwrap();
        assert!(f.is_dirty());
    }

    #[test]
    fn rewrite_drops_tombstones() {
        let mut f = SettingsFile::open("t", 64 * 1024).unwrap();
        f.set(b"a", b"1").unwrap();
        f.set(b"b", b"2").unwrap();
        f.delete(b"a").unwrap();
        f.rewrite(|_| RewriteAction::Keep).unwrap();
        assert!(matches!(f.get(b"a"), Err(BlobDbError::NotFound)));
        assert_eq!(f.get(b"b").unwrap(), b"2");
    }

    #[test]
    fn each_respects_last_writer_wins_without_index() {
        let mut f = SettingsFile::open("t", 64 * 1024).unwrap();
        f.set(b"a", b"1").unwrap();
        f.set(b"a", b"2").unwrap();
        let mut seen = Vec::new();
        f.each(|r| seen.push((r.get_key(), r.get_val())));
        assert_eq!(seen, vec![(b"a".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn full_when_record_does_not_fit() {
        let mut f = SettingsFile::open("t", HEADER_LEN + 1 + FILE_HEADER_LEN).unwrap();
        f.set(b"k", b"").unwrap();
        assert!(matches!(f.set(b"k2", b"x"), Err(BlobDbError::Full)));
    }

    /// Property check, grounded on the teacher's own `tests.rs` style of
    /// hammering the store with randomized keys/values rather than only
    /// hand-picked cases: after a random sequence of sets per key, `get`
    /// always returns that key's most recent value.
    #[test]
    fn random_writes_preserve_last_writer_wins() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let mut f = SettingsFile::open("t", 256 * 1024).unwrap();
        let mut expected: std::collections::HashMap<u8, Vec<u8>> = std::collections::HashMap::new();
        for _ in 0..500 {
            let key_id: u8 = rng.gen_range(0..8);
            let key = [key_id];
            let len = rng.gen_range(0..32);
            let value: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            f.set(&key, &value).unwrap();
            expected.insert(key_id, value);
        }
        for (key_id, value) in &expected {
            assert_eq!(&f.get(&[*key_id]).unwrap(), value);
        }
    }
}
