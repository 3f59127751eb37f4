use std::path::PathBuf;
use thiserror::Error;

use crate::types::SlotId;

#[derive(Error, Debug)]
pub enum SaveError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Integrity failure in {path}: {reason}")]
    Integrity { path: PathBuf, reason: String },

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("{op} already in progress for slot '{slot_id}'")]
    Busy { slot_id: SlotId, op: &'static str },

    #[error("Invalid slot id '{0}'")]
    InvalidSlotId(String),

    #[error("Slot '{0}' not found")]
    SlotNotFound(SlotId),

    #[error("Background task failed: {0}")]
    TaskJoin(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SaveError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn integrity(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Integrity { path: path.into(), reason: reason.into() }
    }

    /// Checksum, AEAD, header and schema failures all land here.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. } | Self::Crypto(_) | Self::Compression(_))
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}

pub type SaveResult<T> = Result<T, SaveError>;
