//! Policy Engine
//!
//! Post-completion actions for a session that reached a terminal phase:
//!
//! | Action    | Fires when                                                      |
//! |-----------|-----------------------------------------------------------------|
//! | Cleanup   | `Always`, or `OnlyOnSuccess` + success, or `OnlyOnFail` + failure |
//! | Reconnect | success and `reconnect_after_success`, endpoint captured        |
//!
//! Both actions are independent and may fire together. They are best
//! effort: failures come back as [`PolicyReport`]s for the activity log and
//! are never retried. The engine itself does not guard against firing twice;
//! the state machine calls it at most once per session.

use crate::device::{DeviceConnection, EndpointParams};
use crate::phase::Outcome;
use crate::server::{DeleteFileRequest, TransferServer};
use crate::settings::TransferSettings;
use crate::TransferError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Reconnection to schedule after success
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPlan {
    pub endpoint: EndpointParams,
    pub delay: Duration,
}

/// Actions decided for one terminal phase
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PolicyPlan {
    /// Stored path to delete
    pub cleanup: Option<String>,
    pub reconnect: Option<ReconnectPlan>,
}

impl PolicyPlan {
    pub fn is_empty(&self) -> bool {
        self.cleanup.is_none() && self.reconnect.is_none()
    }

    /// Number of actions that will report back
    pub fn action_count(&self) -> usize {
        usize::from(self.cleanup.is_some()) + usize::from(self.reconnect.is_some())
    }
}

/// Result of a dispatched policy action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyReport {
    CleanupDone { path: String },
    CleanupFailed { path: String, error: String },
    Reconnected { endpoint: EndpointParams },
    ReconnectFailed { endpoint: EndpointParams, error: String },
}

impl PolicyReport {
    /// The failure carried by this report, if any
    pub fn error(&self) -> Option<TransferError> {
        match self {
            PolicyReport::CleanupFailed { path, error } => {
                Some(TransferError::Cleanup(format!("{}: {}", path, error)))
            }
            PolicyReport::ReconnectFailed { endpoint, error } => {
                Some(TransferError::Reconnect(format!("{}: {}", endpoint, error)))
            }
            PolicyReport::CleanupDone { .. } | PolicyReport::Reconnected { .. } => None,
        }
    }

    pub fn log_line(&self) -> String {
        match self {
            PolicyReport::CleanupDone { path } => format!("Deleted uploaded file {}", path),
            PolicyReport::Reconnected { endpoint } => {
                format!("Reconnected to printer on {}", endpoint)
            }
            failed => failed
                .error()
                .map(|e| e.user_message())
                .unwrap_or_default(),
        }
    }
}

/// Callback receiving policy reports
pub type ReportSink = Arc<dyn Fn(PolicyReport) + Send + Sync>;

pub struct PolicyEngine {
    server: Arc<dyn TransferServer>,
    device: Arc<dyn DeviceConnection>,
    reconnect_task: Option<JoinHandle<()>>,
}

impl PolicyEngine {
    pub fn new(server: Arc<dyn TransferServer>, device: Arc<dyn DeviceConnection>) -> Self {
        Self {
            server,
            device,
            reconnect_task: None,
        }
    }

    /// Decide the actions for a terminal outcome
    ///
    /// `endpoint` is the one captured when the device was disconnected; a
    /// reconnect is impossible without it.
    pub fn plan(
        outcome: Outcome,
        settings: &TransferSettings,
        stored_path: Option<&str>,
        endpoint: Option<&EndpointParams>,
    ) -> PolicyPlan {
        let cleanup = stored_path
            .filter(|_| settings.delete_upload_policy.deletes_on(outcome))
            .map(str::to_string);

        let reconnect = match (outcome, settings.reconnect_after_success, endpoint) {
            (Outcome::Success, true, Some(endpoint)) => Some(ReconnectPlan {
                endpoint: endpoint.clone(),
                delay: settings.reconnect_delay(),
            }),
            (Outcome::Success, true, None) => {
                warn!("Reconnect requested but no printer endpoint was captured");
                None
            }
            _ => None,
        };

        PolicyPlan { cleanup, reconnect }
    }

    /// Dispatch the planned actions without waiting for them
    pub fn apply(&mut self, plan: &PolicyPlan, report: ReportSink) {
        if let Some(path) = plan.cleanup.clone() {
            let server = self.server.clone();
            let report = report.clone();
            info!("Deleting uploaded file {}", path);

            tokio::spawn(async move {
                let request = DeleteFileRequest::local(path.clone());
                match server.delete_file(&request).await {
                    Ok(()) => report(PolicyReport::CleanupDone { path }),
                    Err(e) => {
                        warn!("Failed to delete {}: {}", path, e);
                        report(PolicyReport::CleanupFailed {
                            path,
                            error: e.to_string(),
                        })
                    }
                }
            });
        }

        if let Some(reconnect) = plan.reconnect.clone() {
            self.cancel_pending();
            let device = self.device.clone();
            info!(
                "Scheduling reconnection to {} after {:?}",
                reconnect.endpoint, reconnect.delay
            );

            self.reconnect_task = Some(tokio::spawn(async move {
                sleep(reconnect.delay).await;
                let endpoint = reconnect.endpoint;

                match device.connect(&endpoint).await {
                    Ok(()) => {
                        info!("Reconnected to printer on {}", endpoint);
                        report(PolicyReport::Reconnected { endpoint })
                    }
                    Err(e) => {
                        warn!("Failed to reconnect to {}: {}", endpoint, e);
                        report(PolicyReport::ReconnectFailed {
                            endpoint,
                            error: e.to_string(),
                        })
                    }
                }
            }));
        }
    }

    /// Cancel a scheduled reconnect that has not fired yet
    pub fn cancel_pending(&mut self) -> bool {
        match self.reconnect_task.take() {
            Some(task) if !task.is_finished() => {
                task.abort();
                debug!("Cancelled pending reconnect");
                true
            }
            _ => false,
        }
    }
}
