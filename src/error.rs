use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Authorization for part {part_number} failed: {reason}")]
    Authorization { part_number: u32, reason: String },

    #[error("Transport failure on part {part_number}: {reason}")]
    Transport { part_number: u32, reason: String },

    #[error("Part {part_number} timed out after {after:?}")]
    Timeout { part_number: u32, after: Duration },

    #[error("Finalization failed: {0}")]
    Finalization(String),

    #[error("Abort failed: {0}")]
    Abort(String),

    #[error("Transfer {0} is already in progress")]
    Busy(String),

    #[error("Session {id} does not match the source file: {reason}")]
    SessionMismatch { id: String, reason: String },

    #[error("Upload state error: {0}")]
    State(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Hashing error: {0}")]
    Hashing(String),

    #[error("Peer-to-peer engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Peer-to-peer engine error: {0}")]
    Engine(String),

    #[error("Torrent error: {0}")]
    Torrent(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransferError {
    /// Whether the per-part retry loop may try again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Authorization { .. }
                | TransferError::Transport { .. }
                | TransferError::Timeout { .. }
        )
    }
}

pub type TransferResult<T> = Result<T, TransferError>;

/// Flattens an adapter error chain into one line
pub(crate) fn describe(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}
