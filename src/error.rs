//! Error types for the tag index and item repository.

use std::path::PathBuf;

use thiserror::Error;

use crate::item::ItemRef;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A tag file exists but could not be read
    #[error("Failed to read tag file {path:?}: {source}")]
    TagRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A tag file was read but is not a JSON array of item identifiers
    #[error("Failed to parse tag file {path:?}: {source}")]
    TagMalformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A tag file could not be written or removed
    #[error("Failed to write tag file {path:?}: {source}")]
    TagWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid tag: {0:?}")]
    InvalidTag(String),

    #[error("Invalid item identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Some tag updates of a reconciliation failed; the ones that succeeded stay applied
    #[error("{failed} of {attempted} tag updates failed for {item}: {first}")]
    PartialReconcile {
        item: ItemRef,
        attempted: usize,
        failed: usize,
        #[source]
        first: Box<Error>,
    },

    #[error("Item not found: {0}")]
    ItemNotFound(ItemRef),

    /// Item metadata file exists but could not be decoded
    #[error("Failed to decode item metadata {path:?}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Repository lock error: {0}")]
    Lock(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// True for errors caused by an unreadable or unparsable tag file.
    pub fn is_tag_read_failure(&self) -> bool {
        matches!(self, Error::TagRead { .. } | Error::TagMalformed { .. })
    }
}
