//! Error handling for transfer coordination
//!
//! A single error type covers every stage of the upload-to-device hand-off.
//! Errors from underlying libraries convert automatically through `thiserror`.
//!
//! ## Error Categories
//!
//! ### Entry errors
//! Raised before any I/O happens. The user can retry once the precondition
//! holds again:
//! - `Blocked`: the connection gate denied the workflow
//! - `UnsupportedFile`: the payload extension is not accepted
//! - `SessionBusy`: a live session has not reached a terminal phase
//!
//! ### Stage errors
//! - `Upload`: network or storage failure while sending the payload to the
//!   server. Ends the session as a synthetic failure, no device involved.
//! - `TransferFailed`: the device reported failure. Authoritative.
//! - `Cancelled`: the user declined to interrupt a running device job.
//!
//! ### Policy errors
//! `Cleanup` and `Reconnect` are best effort. They end up as an activity log
//! line and never change the session phase.
//!
//! ## Logging Errors
//!
//! ```rust,ignore
//! use tracing::warn;
//!
//! if let Err(e) = server.delete_file(&request).await {
//!     warn!("Failed to delete upload: {}", e);
//!     // Continue, cleanup is never retried
//! }
//! ```

use crate::gate::BlockedReason;
use thiserror::Error;

/// Result type for transfer coordination
///
/// ```rust
/// use bft_connect_protocol::Result;
///
/// fn example() -> Result<()> {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, TransferError>;

/// Errors that can occur while coordinating a transfer
///
/// # Examples
///
/// ```rust
/// use bft_connect_protocol::TransferError;
///
/// let error = TransferError::Upload("connection reset".to_string());
/// assert_eq!(error.to_string(), "Upload failed: connection reset");
///
/// let error = TransferError::Cancelled("print in progress".to_string());
/// assert_eq!(error.to_string(), "Cancelled: print in progress");
/// ```
#[derive(Error, Debug)]
pub enum TransferError {
    /// I/O error (file system, local storage)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Upload of the payload to the storage endpoint failed
    #[error("Upload failed: {0}")]
    Upload(String),

    /// Workflow entry denied by the connection gate
    #[error("Transfer blocked: {0}")]
    Blocked(BlockedReason),

    /// Payload extension is not in the accepted list
    #[error("Unsupported file: {0}")]
    UnsupportedFile(String),

    /// A live session has not reached a terminal phase yet
    #[error("Transfer session busy: {0}")]
    SessionBusy(String),

    /// The user declined the disruption prompt
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The device reported a failed transfer
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Deleting the uploaded file failed
    #[error("Cleanup failed: {0}")]
    Cleanup(String),

    /// Reconnecting to the device failed
    #[error("Reconnect failed: {0}")]
    Reconnect(String),

    /// Settings could not be loaded or persisted
    #[error("Settings error: {0}")]
    Settings(String),

    /// An external collaborator rejected or failed a command
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Unknown phase name received on the wire
    #[error("Invalid phase: {0}")]
    InvalidPhase(String),

    /// The coordinator task is no longer running
    #[error("Coordinator channel closed")]
    ChannelClosed,
}

impl TransferError {
    /// Check if this error is transient and a retry might succeed
    ///
    /// ```rust
    /// use bft_connect_protocol::TransferError;
    ///
    /// assert!(TransferError::Upload("timeout".to_string()).is_recoverable());
    /// assert!(!TransferError::TransferFailed("too many retries".to_string()).is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransferError::Upload(_) | TransferError::Io(_) | TransferError::Collaborator(_)
        )
    }

    /// Check if this error keeps a transfer from ever starting
    pub fn prevents_transfer(&self) -> bool {
        matches!(
            self,
            TransferError::Upload(_)
                | TransferError::Blocked(_)
                | TransferError::UnsupportedFile(_)
                | TransferError::SessionBusy(_)
        )
    }

    /// Check if this error came from a best-effort policy action
    pub fn is_policy_failure(&self) -> bool {
        matches!(self, TransferError::Cleanup(_) | TransferError::Reconnect(_))
    }

    /// Get the line shown to the user in the activity log
    ///
    /// ```rust
    /// use bft_connect_protocol::{BlockedReason, TransferError};
    ///
    /// let error = TransferError::Blocked(BlockedReason::NotConnected);
    /// assert_eq!(
    ///     error.user_message(),
    ///     "Printer must be connected to enable file transfer."
    /// );
    /// ```
    pub fn user_message(&self) -> String {
        match self {
            TransferError::Blocked(reason) => reason.to_string(),
            TransferError::Upload(msg) => format!("Upload to server failed: {}", msg),
            TransferError::UnsupportedFile(name) => {
                format!("File type not accepted for transfer: {}", name)
            }
            TransferError::SessionBusy(msg) => {
                format!("A transfer is already running ({}).", msg)
            }
            TransferError::Cancelled(_) => "Cancelled".to_string(),
            TransferError::TransferFailed(msg) => format!("Transfer to printer failed: {}", msg),
            TransferError::Cleanup(msg) => format!("Failed to delete uploaded file {}", msg),
            TransferError::Reconnect(msg) => format!("Failed to reconnect to printer on {}", msg),
            TransferError::Settings(msg) => format!("Settings error: {}. Check your settings.", msg),
            TransferError::Collaborator(msg) => format!("Server error: {}", msg),
            TransferError::InvalidPhase(name) => format!("Unknown transfer phase '{}'", name),
            TransferError::ChannelClosed => "Transfer coordinator stopped".to_string(),
            TransferError::Io(e) => format!("I/O error: {}.", e),
            TransferError::Json(e) => format!("Data format error: {}.", e),
        }
    }

    /// Create a collaborator error
    pub fn collaborator(msg: impl Into<String>) -> Self {
        TransferError::Collaborator(msg.into())
    }
}
