use thiserror::Error;

/// Abstract error taxonomy shared by every namespace backend, the settings-file
/// store and the sync engine. The wire codec maps each variant onto a
/// `ResultCode` (see `api::ResultCode`) before it ever reaches the peer.
#[derive(Debug, Error)]
pub enum BlobDbError {
    #[error("key or value failed structural validation")]
    InvalidArg,
    #[error("operation not supported by this database")]
    InvalidOp,
    #[error("database id is out of range or disabled")]
    InvalidDbId,
    #[error("no live record for this key")]
    NotFound,
    #[error("record rejected as stale")]
    Stale,
    #[error("database cannot grow")]
    Full,
    #[error("a conflicting sync session is already in progress")]
    Busy,
    #[error("flash i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("temporary allocation failure")]
    Oom,
}

pub type BlobDbResult<T> = Result<T, BlobDbError>;
