//! Connection Gate
//!
//! Decides whether the workflow may start given the device state, and picks
//! the reason to show when it may not. Not-connected outranks a missing
//! capability: a disconnected device cannot report capabilities anyway.

use crate::device::DeviceConnection;
use crate::{Result, TransferError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Help line shown while the workflow is permitted
pub const READY_HELP_TEXT: &str = "Set options, then select 'Upload to SD' to begin.";

/// Why the workflow is blocked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockedReason {
    NotConnected,
    MissingCapability(String),
}

impl fmt::Display for BlockedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockedReason::NotConnected => {
                f.write_str("Printer must be connected to enable file transfer.")
            }
            BlockedReason::MissingCapability(capability) => write!(
                f,
                "Connected printer must have (and report) the {} capability.",
                capability
            ),
        }
    }
}

/// Snapshot of the device preconditions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionGate {
    operational: bool,
    has_capability: bool,
    capability: String,
}

impl ConnectionGate {
    pub fn new(operational: bool, has_capability: bool, capability: impl Into<String>) -> Self {
        Self {
            operational,
            has_capability,
            capability: capability.into(),
        }
    }

    /// Read the current state of a device
    pub fn from_device(device: &dyn DeviceConnection, required_capability: &str) -> Self {
        Self::new(
            device.is_operational(),
            device.has_capability(required_capability),
            required_capability,
        )
    }

    pub fn can_upload(&self) -> bool {
        self.operational && self.has_capability
    }

    pub fn reason_if_blocked(&self) -> Option<BlockedReason> {
        if !self.operational {
            Some(BlockedReason::NotConnected)
        } else if !self.has_capability {
            Some(BlockedReason::MissingCapability(self.capability.clone()))
        } else {
            None
        }
    }

    /// `Err(Blocked)` when the workflow may not start
    pub fn check(&self) -> Result<()> {
        match self.reason_if_blocked() {
            Some(reason) => Err(TransferError::Blocked(reason)),
            None => Ok(()),
        }
    }

    pub fn help_text(&self) -> String {
        self.reason_if_blocked()
            .map(|reason| reason.to_string())
            .unwrap_or_else(|| READY_HELP_TEXT.to_string())
    }
}
