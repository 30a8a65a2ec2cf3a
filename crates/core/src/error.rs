//! Error taxonomy shared by all logtrail crates

use std::path::PathBuf;
use thiserror::Error;

/// Result type for logtrail operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The stream or queue was closed while in use
    #[error("stream closed")]
    Closed,

    /// The stream reached its terminal end (file deleted, renamed away, or static EOF)
    #[error("end of stream")]
    EndOfStream,

    /// A registration that can never succeed (wrong path type, missing directory)
    #[error("invalid registration for {path}: {reason}")]
    InvalidRegistration { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Native watch backend failure
    #[error("watch error: {0}")]
    Watch(String),

    #[error("config error: {0}")]
    Config(String),

    /// Offset store failure
    #[error("offset store error: {0}")]
    Store(String),
}

impl Error {
    pub fn invalid_registration(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidRegistration {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for the two terminal signals a reader can observe
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::Closed | Error::EndOfStream)
    }
}
