use std::io;
use thiserror::Error;

/// Errors that abort a load-order operation.
///
/// Every failure surfaced by this crate is one of these kinds. The
/// in-memory caches are rolled back (cleared) by the operation that
/// failed, so the next call re-reads from disk.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("\"{0}\" cannot be found")]
    FileNotFound(String),

    #[error("\"{path}\" could not be read: {source}")]
    FileReadFailed { path: String, source: io::Error },

    #[error("\"{path}\" cannot be written to: {source}")]
    FileWriteFailed { path: String, source: io::Error },

    #[error("\"{path}\" could not be renamed: {source}")]
    FileRenameFailed { path: String, source: io::Error },

    #[error("\"{0}\" is not encoded in valid UTF-8")]
    FileNotUtf8(String),

    #[error("the modification time of \"{path}\" could not be read: {source}")]
    TimestampReadFailed { path: String, source: io::Error },

    #[error("the modification time of \"{path}\" could not be written: {source}")]
    TimestampWriteFailed { path: String, source: io::Error },
}

/// Conditions the caller should look at even though the operation
/// completed and any requested writes were made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// One or more plugin-list rules are violated; the message lists
    /// every violation found.
    #[error("invalid plugin list: {0}")]
    InvalidList(String),

    /// The two manifests disagree about the order of plugins present in
    /// both.
    #[error("{0}")]
    LoadOrderMismatch(String),

    /// A plugin name could not be encoded in the system encoding and was
    /// left out of the written manifest.
    #[error("\"{0}\" cannot be encoded in the system encoding")]
    BadFilename(String),
}

/// Result of an operation that can succeed with a caveat.
#[derive(Debug)]
pub struct Outcome<T> {
    pub value: T,
    pub warning: Option<Warning>,
}

impl<T> Outcome<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            warning: None,
        }
    }

    pub fn new(value: T, warning: Option<Warning>) -> Self {
        Self { value, warning }
    }
}
