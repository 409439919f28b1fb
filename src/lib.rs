//! # BlobDB
//!
//! A uniform key/value storage layer that multiplexes a dozen logical
//! namespaces over a single on-flash settings-file abstraction, plus the
//! bidirectional sync protocol that reconciles locally-originated mutations
//! with a paired phone over an unreliable framed transport.
//!
//! ## Code organization
//!
//! ### `settings_file`
//! The log-structured append-only store every namespace is built on: get,
//! set, delete, byte-patch, iterate, rewrite, each with a per-record
//! dirty/synced bit pair.
//!
//! ### `timeline`
//! `TimelineItemStorage`, a `SettingsFile` specialization for pins and
//! reminders: TTL rejection, parent→child cascading delete, in-place
//! status-byte patching, from-watch-preserving flush.
//!
//! ### `namespaces`
//! The per-namespace backends (pins, reminders, weather, contacts,
//! ios-notif-prefs, app-glance, apps, health, watch-app-prefs, prefs, plus
//! the plain test namespace) implementing the `facade::Namespace` contract.
//!
//! ### `facade`
//! The uniform dispatch point routing a database id to its backend and
//! emitting change events.
//!
//! ### `sync`
//! The per-session sync engine: discovers dirty databases, streams records,
//! tracks acks by token, handles timeouts.
//!
//! ### `wire`
//! The bit-exact little-endian frame codec tying the façade and sync engine
//! to the transport.

pub mod api;
pub mod error;
pub mod event;
pub mod facade;
pub mod namespaces;
pub mod settings_file;
pub mod sync;
pub mod timeline;
pub mod wire;

pub use api::{DbId, ResultCode};
pub use error::{BlobDbError, BlobDbResult};
pub use event::ChangeEvent;
pub use facade::BlobDb;

impl BlobDb {
    /// Uniform insert entry point (`spec.md` §6.3: `blob_db_insert`).
    pub fn blob_db_insert(&self, db: DbId, key: &[u8], value: &[u8]) -> BlobDbResult<()> {
        self.insert(db, key, value)
    }

    /// `blob_db_read`.
    pub fn blob_db_read(&self, db: DbId, key: &[u8], buf: &mut [u8]) -> BlobDbResult<usize> {
        self.read(db, key, buf)
    }

    /// `blob_db_get_len`.
    pub fn blob_db_get_len(&self, db: DbId, key: &[u8]) -> BlobDbResult<usize> {
        self.get_len(db, key)
    }

    /// `blob_db_delete`.
    pub fn blob_db_delete(&self, db: DbId, key: &[u8]) -> BlobDbResult<()> {
        self.delete(db, key)
    }

    /// `blob_db_flush`.
    pub fn blob_db_flush(&self, db: DbId) -> BlobDbResult<()> {
        self.flush(db)
    }

    /// `blob_db_get_dirty_dbs`.
    pub fn blob_db_get_dirty_dbs(&self) -> Vec<DbId> {
        self.get_dirty_dbs()
    }

    /// `blob_db_get_dirty_list`.
    pub fn blob_db_get_dirty_list(&self, db: DbId) -> BlobDbResult<Vec<facade::DirtyEntry>> {
        self.get_dirty_list(db)
    }

    /// `blob_db_mark_synced`.
    pub fn blob_db_mark_synced(&self, db: DbId, key: &[u8]) -> BlobDbResult<()> {
        self.mark_synced(db, key)
    }
}
