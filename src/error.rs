//! Error taxonomy for the storage engine.
//!
//! `Display`/`std::error::Error` are hand-written for the core error type
//! rather than derived with `thiserror`.

use std::fmt::Display;

/// The error kinds the core engine can produce.
#[derive(Debug)]
pub enum Error {
    /// Empty key, nil options, batch over `max_batch_num`, and similar
    /// caller mistakes.
    InvalidInput(String),

    /// Read of a key absent from the index.
    KeyNotFound,

    /// The directory lock is already held by another handle.
    DirectoryBusy,

    /// CRC mismatch on a production-time read, a short record mid-file
    /// outside of recovery, or an unparsable `seq-no`/`merge-finished`
    /// file.
    DataCorrupted(String),

    /// The underlying file system failed a read/write/sync.
    IOFailure(std::io::Error),

    /// A `merge()` call arrived while another merge is running.
    MergeInProgress,

    /// `merge()` was requested but `reclaimable_bytes / total_bytes` is
    /// below `merge_threshold_ratio`.
    MergeBelowThreshold,

    /// Reserved for collaborating data-structure layers (hash/set/list/
    /// zset) built on top of this engine; the core never constructs it.
    WrongType,

    /// An invariant the engine assumes was violated.
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::KeyNotFound => write!(f, "key not found"),
            Error::DirectoryBusy => write!(f, "database is in use"),
            Error::DataCorrupted(msg) => write!(f, "data corrupted: {msg}"),
            Error::IOFailure(err) => write!(f, "io failure: {err}"),
            Error::MergeInProgress => write!(f, "merge already in progress"),
            Error::MergeBelowThreshold => write!(f, "merge ratio below configured threshold"),
            Error::WrongType => write!(f, "wrong value type"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Error::InvalidInput(_), Error::InvalidInput(_))
                | (Error::KeyNotFound, Error::KeyNotFound)
                | (Error::DirectoryBusy, Error::DirectoryBusy)
                | (Error::DataCorrupted(_), Error::DataCorrupted(_))
                | (Error::IOFailure(_), Error::IOFailure(_))
                | (Error::MergeInProgress, Error::MergeInProgress)
                | (Error::MergeBelowThreshold, Error::MergeBelowThreshold)
                | (Error::WrongType, Error::WrongType)
                | (Error::Internal(_), Error::Internal(_))
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IOFailure(err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::InvalidInput(err.to_string())
    }
}

/// Shorthand for building an [`Error::InvalidInput`].
macro_rules! errinput {
    ($($args:tt)*) => { crate::error::Error::InvalidInput(format!($($args)*)) }
}
pub(crate) use errinput;
