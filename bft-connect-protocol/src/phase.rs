//! Transfer Phases
//!
//! Two phase vocabularies exist side by side:
//!
//! - [`Phase`] is what the server reports. It is authoritative for the
//!   device side and arrives through [`PhaseChange`] push notifications.
//! - [`SessionPhase`] is the client view of one upload-to-completion cycle,
//!   owned by the state machine.
//!
//! ```text
//! Idle → Uploading → AwaitingTransferStart → Transferring → CompleteOk
//!            │                                    └───────→ CompleteFail
//!            └──────────────────────────────────────────────→ CompleteFail
//! ```

use crate::{Result, TransferError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Server-side transfer phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Phase {
    #[default]
    Inactive,
    Upload,
    PreConnect,
    Connect,
    Transfer,
    PostTransfer,
    #[serde(rename = "CompleteOK")]
    CompleteOk,
    CompleteFail,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::Inactive,
        Phase::Upload,
        Phase::PreConnect,
        Phase::Connect,
        Phase::Transfer,
        Phase::PostTransfer,
        Phase::CompleteOk,
        Phase::CompleteFail,
    ];

    /// Wire name of the phase
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Inactive => "Inactive",
            Phase::Upload => "Upload",
            Phase::PreConnect => "PreConnect",
            Phase::Connect => "Connect",
            Phase::Transfer => "Transfer",
            Phase::PostTransfer => "PostTransfer",
            Phase::CompleteOk => "CompleteOK",
            Phase::CompleteFail => "CompleteFail",
        }
    }

    /// CompleteOK or CompleteFail
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::CompleteOk | Phase::CompleteFail)
    }

    /// Any phase in which the server is working on a transfer
    pub fn is_running(&self) -> bool {
        !self.is_terminal() && *self != Phase::Inactive
    }

    /// Map a terminal server phase to the session outcome
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Phase::CompleteOk => Some(Outcome::Success),
            Phase::CompleteFail => Some(Outcome::Failure),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self> {
        Phase::ALL
            .iter()
            .copied()
            .find(|phase| phase.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TransferError::InvalidPhase(s.to_string()))
    }
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

/// Phase-change push notification
///
/// Accepts both the short field names emitted by the server event bus
/// (`prev`, `curr`, `msg`) and the long form.
///
/// ```rust
/// use bft_connect_protocol::{Phase, PhaseChange};
///
/// let change: PhaseChange =
///     serde_json::from_str(r#"{"prev":"Transfer","curr":"CompleteOK","msg":"marlinbft/fw.bin"}"#)
///         .unwrap();
/// assert_eq!(change.current, Phase::CompleteOk);
/// assert_eq!(change.message.as_deref(), Some("marlinbft/fw.bin"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseChange {
    #[serde(rename = "prev", alias = "previousPhase", default)]
    pub previous: Option<Phase>,

    #[serde(rename = "curr", alias = "currentPhase")]
    pub current: Phase,

    #[serde(rename = "msg", alias = "message", default)]
    pub message: Option<String>,
}

impl PhaseChange {
    pub fn new(previous: Phase, current: Phase) -> Self {
        Self {
            previous: Some(previous),
            current,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Activity log line for this notification
    pub fn log_line(&self) -> String {
        let previous = self.previous.map(|p| p.as_str()).unwrap_or("?");
        match self.message.as_deref() {
            Some(msg) if !msg.is_empty() => {
                format!("Phase {} -> {}: {}", previous, self.current, msg)
            }
            _ => format!("Phase {} -> {}", previous, self.current),
        }
    }
}

/// Client-side phase of the live transfer session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Uploading,
    AwaitingTransferStart,
    Transferring,
    CompleteOk,
    CompleteFail,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::CompleteOk | SessionPhase::CompleteFail)
    }

    /// A new upload may not start while the session is in one of these
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionPhase::Uploading
                | SessionPhase::AwaitingTransferStart
                | SessionPhase::Transferring
        )
    }

    pub fn from_outcome(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => SessionPhase::CompleteOk,
            Outcome::Failure => SessionPhase::CompleteFail,
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Idle => "Idle",
            SessionPhase::Uploading => "Uploading",
            SessionPhase::AwaitingTransferStart => "AwaitingTransferStart",
            SessionPhase::Transferring => "Transferring",
            SessionPhase::CompleteOk => "CompleteOK",
            SessionPhase::CompleteFail => "CompleteFail",
        };
        f.write_str(name)
    }
}
