//! Error types for cellstore.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CellStoreError>;

#[derive(Debug, Error)]
pub enum CellStoreError {
    /// Out-of-range level, malformed cell key/id, or non-finite coordinates.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("region covers more than {limit} cells at level {level}")]
    RegionTooLarge { level: u8, limit: usize },

    #[error("write request issued in a read-only transaction")]
    ReadOnlyTransaction,

    #[error("transaction aborted before commit")]
    Aborted,

    #[error("store is closed")]
    StoreClosed,

    /// A transaction procedure was resumed with a reply it did not expect.
    #[error("procedure state error: {0}")]
    ProcedureState(String),

    #[error("ingestion item abandoned after {attempts} failed attempts")]
    IngestAbandoned { attempts: u32 },

    #[error("invalid snapshot format")]
    InvalidFormat,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CellStoreError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

impl From<serde_json::Error> for CellStoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "snapshot")]
impl From<bincode::Error> for CellStoreError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
