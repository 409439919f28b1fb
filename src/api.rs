//! Constants and wire-visible enums shared across the crate: database ids,
//! result codes, and the handful of size limits every backend validates
//! against. Mirrors the way the teacher's `pddb::api` module collects every
//! protocol-level constant in one place rather than scattering them across
//! the modules that use them.

use crate::error::BlobDbError;

/// Maximum length of an opaque record key (most namespaces use a 16-byte UUID).
pub const APP_KEY_MAX: usize = 64;
/// Maximum length of a record value.
pub const VALUE_MAX: usize = 4096;
/// Maximum number of slices packed into one `AppGlance` record.
pub const MAX_SLICES_PER_GLANCE: usize = 8;
/// Cap on the number of children visited by a single `delete_with_parent` call.
pub const MAX_CHILDREN_PER_PIN: usize = 32;
/// Number of namespaces in the registry (ids `0..=11`).
pub const NUM_DATABASES: usize = 12;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Database ids, exactly as laid out on the wire (`spec.md` §6.1).
#[derive(num_derive::FromPrimitive, num_derive::ToPrimitive, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DbId {
    Test = 0,
    Pins = 1,
    Apps = 2,
    Reminders = 3,
    Notifs = 4,
    Weather = 5,
    IosNotifPrefs = 6,
    Prefs = 7,
    Contacts = 8,
    WatchAppPrefs = 9,
    Health = 10,
    AppGlance = 11,
}

impl DbId {
    pub fn from_u8(v: u8) -> Option<DbId> {
        num_traits::FromPrimitive::from_u8(v)
    }
    pub fn as_u8(self) -> u8 {
        num_traits::ToPrimitive::to_u8(&self).unwrap()
    }
}

/// On-wire result codes (`spec.md` §6.1).
#[derive(num_derive::FromPrimitive, num_derive::ToPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum ResultCode {
    Success = 1,
    GeneralFailure = 2,
    InvalidOp = 3,
    InvalidDbId = 4,
    InvalidData = 5,
    KeyDoesNotExist = 6,
    DbFull = 7,
    DataStale = 8,
    DbNotSupported = 9,
    DbLocked = 10,
    TryLater = 11,
}

impl ResultCode {
    pub fn as_u8(self) -> u8 {
        num_traits::ToPrimitive::to_u8(&self).unwrap()
    }
    pub fn from_u8(v: u8) -> Option<ResultCode> {
        num_traits::FromPrimitive::from_u8(v)
    }
}

impl From<&BlobDbError> for ResultCode {
    fn from(e: &BlobDbError) -> ResultCode {
        match e {
            BlobDbError::InvalidArg => ResultCode::InvalidData,
            BlobDbError::InvalidOp => ResultCode::InvalidOp,
            BlobDbError::InvalidDbId => ResultCode::InvalidDbId,
            BlobDbError::NotFound => ResultCode::KeyDoesNotExist,
            BlobDbError::Stale => ResultCode::DataStale,
            BlobDbError::Full => ResultCode::DbFull,
            BlobDbError::Busy => ResultCode::DbLocked,
            BlobDbError::Io(_) => ResultCode::GeneralFailure,
            BlobDbError::Oom => ResultCode::GeneralFailure,
        }
    }
}

/// Returns the current wall-clock time in seconds since the epoch.
///
/// Centralized so that tests and the sync engine can agree on one notion
/// of "now" without each module calling `SystemTime::now()` separately.
pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}
