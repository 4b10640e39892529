//! Unified error model for the engine.
//!
//! Mirrors the error kinds named in the source system: schema/query errors are
//! raised synchronously at construction time, storage/data errors surface from
//! marble I/O, and `MapFull`/`OpenError` carry the retry policy their callers
//! need to honor (see `kv::Env::open` and `marble::writer`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarbleError {
    #[error("schema error: {0}")]
    Schema(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("data error: {0}")]
    Data(String),

    /// The write transaction exhausted the mapped size. The writer resizes
    /// and retries once; a second `MapFull` aborts the partition.
    #[error("map full (requested resize to {attempted_bytes} bytes)")]
    MapFull { attempted_bytes: usize },

    /// File lock contention at open time. Retried with backoff by the caller.
    #[error("open error: {0}")]
    Open(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("kv store error: {0}")]
    Kv(#[from] heed::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type MarbleResult<T> = Result<T, MarbleError>;

impl MarbleError {
    pub fn schema<S: Into<String>>(msg: S) -> Self {
        MarbleError::Schema(msg.into())
    }
    pub fn query<S: Into<String>>(msg: S) -> Self {
        MarbleError::Query(msg.into())
    }
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        MarbleError::Storage(msg.into())
    }
    pub fn data<S: Into<String>>(msg: S) -> Self {
        MarbleError::Data(msg.into())
    }
}
