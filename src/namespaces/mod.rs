//! Per-namespace backends (`spec.md` §4.4). Each is a thin adapter over
//! `SettingsFile` or `TimelineItemStorage` that supplies namespace-specific
//! validation and post-insert side effects.

mod app_glance;
mod health;
mod pins;
mod plain_kv;
mod prefs;
mod reminders;
mod versioned;

pub use app_glance::AppGlanceDb;
pub use health::{ActivityMetricSink, HealthCategory, HealthDb, HealthSink};
pub use pins::PinsDb;
pub use plain_kv::PlainKvDb;
pub use prefs::PrefsDb;
pub use reminders::RemindersDb;
pub use versioned::VersionedDb;

use std::sync::Arc;
use std::sync::Mutex as StdMutex;

/// Collaborator the Pins and AppGlance backends consult to decide whether a
/// referenced app needs fetching from the phone. The real app catalog is
/// out of scope (`spec.md` §1); this trait states its contract.
pub trait AppCatalog: Send + Sync {
    fn is_installed(&self, app_uuid: &[u8; 16]) -> bool;
    fn is_system_app(&self, app_uuid: &[u8; 16]) -> bool;
    fn is_cached(&self, app_uuid: &[u8; 16]) -> bool;
    fn note_launched(&self, app_uuid: &[u8; 16]);
}

/// An `AppCatalog` that knows nothing -- every app is uninstalled. Useful
/// for tests and namespaces that never reference apps.
pub struct NullAppCatalog;
impl AppCatalog for NullAppCatalog {
    fn is_installed(&self, _app_uuid: &[u8; 16]) -> bool {
        false
    }
    fn is_system_app(&self, _app_uuid: &[u8; 16]) -> bool {
        false
    }
    fn is_cached(&self, _app_uuid: &[u8; 16]) -> bool {
        false
    }
    fn note_launched(&self, _app_uuid: &[u8; 16]) {}
}

pub type Shared<T> = Arc<StdMutex<T>>;
