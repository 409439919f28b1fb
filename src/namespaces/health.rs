//! Health (`spec.md` §4.4). Keys look like `<weekday>_<kind>`; the suffix
//! decides whether the entry is movement data (dispatched only, never
//! persisted), or sleep/heart-rate data (persisted and dispatched).

use crate::error::{BlobDbError, BlobDbResult};
use crate::facade::{DirtyEntry, Namespace};
use crate::settings_file::SettingsFile;
use byteorder::{ByteOrder, LittleEndian};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HealthCategory {
    Movement,
    Sleep,
    HeartRate,
}

/// Sink for movement-data samples, which are never persisted to flash --
/// only forwarded to an in-memory activity-metric tracker.
pub trait ActivityMetricSink: Send {
    fn set_movement(&self, weekday: u8, payload: &[u8]);
}

/// Sink for sleep/heart-rate samples, dispatched in addition to being
/// persisted.
pub trait HealthSink: Send {
    fn dispatch(&self, category: HealthCategory, weekday: u8, payload: &[u8]);
}

fn parse_key(key: &[u8]) -> BlobDbResult<(u8, HealthCategory)> {
    let s = std::str::from_utf8(key).map_err(|_| BlobDbError::InvalidArg)?;
    let underscore = s.find('_').ok_or(BlobDbError::InvalidArg)?;
    let (weekday_str, kind_str) = (&s[..underscore], &s[underscore + 1..]);
    let weekday: u8 = weekday_str.parse().map_err(|_| BlobDbError::InvalidArg)?;
    if weekday > 6 {
        return Err(BlobDbError::InvalidArg);
    }
    let category = match kind_str {
        "movement" => HealthCategory::Movement,
        "sleep" => HealthCategory::Sleep,
        "heartrate" => HealthCategory::HeartRate,
        _ => return Err(BlobDbError::InvalidArg),
    };
    Ok((weekday, category))
}

/// value layout: `last_processed_timestamp:u32le | payload...`
fn split_value(value: &[u8]) -> BlobDbResult<(i64, &[u8])> {
    if value.len() < 4 {
        return Err(BlobDbError::InvalidArg);
    }
    Ok((LittleEndian::read_u32(&value[0..4]) as i64, &value[4..]))
}

pub struct HealthDb {
    file: SettingsFile,
    activity: Box<dyn ActivityMetricSink>,
    health: Box<dyn HealthSink>,
}

impl HealthDb {
    pub fn new(file_name: &str, max_file_size: usize, activity: Box<dyn ActivityMetricSink>, health: Box<dyn HealthSink>) -> BlobDbResult<Self> {
        Ok(HealthDb { file: SettingsFile::open(file_name, max_file_size)?, activity, health })
    }

    fn dispatch_if_fresh(&self, category: HealthCategory, weekday: u8, value: &[u8], now: i64) {
        let (last_processed, payload) = match split_value(value) {
            Ok(v) => v,
            Err(_) => return,
        };
        if last_processed < now - 6 * crate::api::SECONDS_PER_DAY || last_processed > now + crate::api::SECONDS_PER_DAY {
            return;
        }
        match category {
            HealthCategory::Movement => self.activity.set_movement(weekday, payload),
            other => self.health.dispatch(other, weekday, payload),
        }
    }

    pub fn insert_at(&mut self, key: &[u8], value: &[u8], now: i64) -> BlobDbResult<()> {
        let (weekday, category) = parse_key(key)?;
        split_value(value)?;
        self.dispatch_if_fresh(category, weekday, value, now);
        if category != HealthCategory::Movement {
            self.file.set(key, value)?;
        }
        Ok(())
    }
}

impl Namespace for HealthDb {
    fn insert(&mut self, key: &[u8], value: &[u8]) -> BlobDbResult<()> {
        self.insert_at(key, value, crate::api::now_secs())
    }
    /// Peer-originated health data still dispatches (the watch face needs to
    /// show synced data) but lands without the local dirty/synced defaults.
    fn insert_from_peer(&mut self, key: &[u8], value: &[u8]) -> BlobDbResult<()> {
        let (weekday, category) = parse_key(key)?;
        split_value(value)?;
        self.dispatch_if_fresh(category, weekday, value, crate::api::now_secs());
        if category != HealthCategory::Movement {
            self.file.set_with_flags(key, value, false, true)?;
        }
        Ok(())
    }
    fn get_len(&mut self, key: &[u8]) -> BlobDbResult<usize> {
        parse_key(key)?;
        self.file.get_len(key)
    }
    fn read(&mut self, key: &[u8], buf: &mut [u8]) -> BlobDbResult<usize> {
        parse_key(key)?;
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
