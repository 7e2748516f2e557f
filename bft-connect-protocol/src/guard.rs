//! Disruption Guard
//!
//! Starting a transfer disconnects the device. If the device is running a
//! job, that job dies with the connection, so the user has to confirm first.
//!
//! The guard keeps no memory between attempts: every upload attempt on a
//! busy device asks again.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Answer to a disruption prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardDecision {
    Allow,
    Cancel,
}

/// Contents of the confirmation dialog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisruptionWarning {
    pub title: String,
    pub message: String,
    /// Button labels, cancel first
    pub choices: [String; 2],
}

impl DisruptionWarning {
    pub fn job_in_progress() -> Self {
        Self {
            title: "Confirm disconnect".to_string(),
            message: "You are about to disconnect from the printer while a print is in \
                      progress. Disconnecting while a print is in progress will prevent \
                      the print from completing."
                .to_string(),
            choices: ["Cancel".to_string(), "Continue".to_string()],
        }
    }
}

/// Presents the warning and waits for the user
///
/// Implementations return [`GuardDecision::Cancel`] when the dialog is
/// dismissed without a choice.
#[async_trait]
pub trait ConfirmationPrompt: Send + Sync {
    async fn confirm(&self, warning: &DisruptionWarning) -> GuardDecision;
}

/// Prompt that always answers the same, for unattended hosts
pub struct FixedPrompt(pub GuardDecision);

#[async_trait]
impl ConfirmationPrompt for FixedPrompt {
    async fn confirm(&self, warning: &DisruptionWarning) -> GuardDecision {
        info!("{}: answering {:?} without asking", warning.title, self.0);
        self.0
    }
}

#[derive(Clone)]
pub struct DisruptionGuard {
    prompt: Arc<dyn ConfirmationPrompt>,
}

impl DisruptionGuard {
    pub fn new(prompt: Arc<dyn ConfirmationPrompt>) -> Self {
        Self { prompt }
    }

    /// Allow immediately when the device is idle, otherwise ask
    pub async fn confirm_if_disruptive(&self, device_is_busy: bool) -> GuardDecision {
        if !device_is_busy {
            return GuardDecision::Allow;
        }

        let decision = self.prompt.confirm(&DisruptionWarning::job_in_progress()).await;
        debug!("Disruption prompt answered: {:?}", decision);
        decision
    }
}
