//! Sync error types.

use stowage_transfer::TransferError;

/// Errors produced while reconciling or transferring a file.
///
/// "Object not found" is not an error: gateways report it as
/// [`HeadResult::NotFound`](crate::HeadResult::NotFound).
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(TransferError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("path mapping error: {0}")]
    PathMapping(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,
}

impl SyncError {
    /// True for errors that abort a whole run rather than a single file.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Config(_))
    }
}

impl From<TransferError> for SyncError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Io(e) => Self::Io(e),
            TransferError::Cancelled => Self::Cancelled,
            TransferError::InvalidPath(msg) => Self::PathMapping(msg),
            other => Self::Transfer(other),
        }
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Io(std::io::Error::other(err))
    }
}
