//! Phase State Machine
//!
//! Owns the live [`TransferSession`] and the activity log. Every input is a
//! [`CoordinatorEvent`]; handling one never blocks and returns the
//! [`Effect`]s the caller has to run. Asynchronous work started by an effect
//! reports back as another event tagged with the session id, so results for
//! a session that was dismissed or replaced are dropped.
//!
//! ## Session phases
//!
//! ```text
//! Idle -> Uploading -> AwaitingTransferStart -> Transferring -> CompleteOk
//!            |                 |                     |      \-> CompleteFail
//!            \-----------------+---------------------+--------> CompleteFail
//! ```
//!
//! Only phase-change notifications move the session; status lines are
//! appended to the log and nothing else. The first terminal phase for a
//! session closes the policy window, later ones are logged only.
//! Phases seen before the start-transfer request went out belong to an
//! earlier job and are logged only as well.

use crate::activity_log::{ActivityLog, LogEntry};
use crate::device::EndpointParams;
use crate::gate::ConnectionGate;
use crate::guard::GuardDecision;
use crate::phase::{Outcome, Phase, SessionPhase};
use crate::policy::{PolicyEngine, PolicyPlan, PolicyReport};
use crate::server::{HandlerType, PushNotification, StartTransferRequest};
use crate::session::TransferSession;
use crate::settings::TransferSettings;
use crate::upload::UploadFile;
use crate::{Result, TransferError};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const STARTING_UPLOAD: &str = "Starting upload to server";
pub const CONFIRM_DISCONNECT: &str = "Confirm disconnect";
pub const CANCELLED: &str = "Cancelled";
pub const UPLOAD_DONE: &str = "Upload done";
pub const STARTING_TRANSFER: &str = "Starting transfer to printer";
pub const OUTCOME_UNKNOWN: &str = "Transfer outcome unknown: the server is no longer transferring";

/// A user's request to send a file, with the device state at that moment
#[derive(Debug, Clone, PartialEq)]
pub struct FileSelection {
    pub file: UploadFile,
    pub settings: TransferSettings,
    pub gate: ConnectionGate,
    /// Device is running a job a disconnect would interrupt
    pub device_busy: bool,
}

/// Everything the state machine reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    FileSelected(FileSelection),
    DisruptionResolved {
        attempt: Uuid,
        decision: GuardDecision,
    },
    /// Panel closed; resets the session and cancels pending work
    Dismissed,
    UploadProgress {
        session_id: Uuid,
        percent: u8,
    },
    UploadSucceeded {
        session_id: Uuid,
        stored_path: String,
    },
    UploadFailed {
        session_id: Uuid,
        reason: String,
    },
    EndpointCaptured {
        session_id: Uuid,
        endpoint: Option<EndpointParams>,
    },
    /// Outcome of disconnect + start-transfer: remote file name or reason
    TransferRequested {
        session_id: Uuid,
        result: std::result::Result<String, String>,
    },
    Notification(PushNotification),
    /// Server phase read back by reconciliation
    PhaseQueried(Phase),
    Policy {
        session_id: Uuid,
        report: PolicyReport,
    },
}

/// Work requested by the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Run the disruption guard, answer with `DisruptionResolved`
    ConfirmDisruption { attempt: Uuid, device_busy: bool },
    /// Abort a pending confirmation and a scheduled reconnect
    CancelPending,
    /// Phase hint for the server, fire-and-forget
    ChangePhase(Phase),
    BeginUpload {
        session_id: Uuid,
        file: UploadFile,
        settings: TransferSettings,
        gate: ConnectionGate,
    },
    CaptureEndpoint { session_id: Uuid },
    /// Disconnect the device, then send the request
    StartTransfer {
        session_id: Uuid,
        request: StartTransferRequest,
    },
    ApplyPolicy { session_id: Uuid, plan: PolicyPlan },
}

/// Change notification for presentation layers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelUpdate {
    pub revision: u64,
    pub session_id: Option<Uuid>,
    pub phase: SessionPhase,
    /// Log was cleared before `lines` were appended
    pub cleared: bool,
    pub lines: Vec<LogEntry>,
    pub upload_progress: Option<u8>,
    /// The panel may close itself
    pub close_requested: bool,
}

/// Full state for late subscribers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PanelSnapshot {
    pub revision: u64,
    pub session_id: Option<Uuid>,
    pub phase: SessionPhase,
    pub server_phase: Option<Phase>,
    pub stored_path: Option<String>,
    pub upload_progress: Option<u8>,
    pub log: Vec<LogEntry>,
    pub awaiting_confirmation: bool,
    pub pending_policy_actions: usize,
    /// Nothing left in flight
    pub settled: bool,
}

#[derive(Debug)]
struct PendingAttempt {
    id: Uuid,
    selection: FileSelection,
}

#[derive(Debug, Default)]
pub struct PhaseStateMachine {
    session: Option<TransferSession>,
    pending: Option<PendingAttempt>,
    log: ActivityLog,
    revision: u64,
    published: usize,
    cleared: bool,
    close_requested: bool,
}

fn live_session(
    session: &mut Option<TransferSession>,
    session_id: Uuid,
) -> Option<&mut TransferSession> {
    match session.as_mut() {
        Some(s) if s.id() == session_id => Some(s),
        _ => {
            debug!("Dropping event for stale session {}", session_id);
            None
        }
    }
}

fn format_delay(delay: Duration) -> String {
    let ms = delay.as_millis();
    if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{:.1}s", delay.as_secs_f64())
    }
}

impl PhaseStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one event
    ///
    /// Only `FileSelected` can fail; the rejection is logged as well.
    pub fn handle(&mut self, event: CoordinatorEvent) -> Result<Vec<Effect>> {
        let mut effects = Vec::new();

        match event {
            CoordinatorEvent::FileSelected(selection) => {
                self.on_file_selected(selection, &mut effects)?
            }
            CoordinatorEvent::DisruptionResolved { attempt, decision } => {
                self.on_disruption_resolved(attempt, decision, &mut effects)
            }
            CoordinatorEvent::Dismissed => self.on_dismissed(&mut effects),
            CoordinatorEvent::UploadProgress {
                session_id,
                percent,
            } => {
                if let Some(session) = live_session(&mut self.session, session_id) {
                    if session.phase() == SessionPhase::Uploading {
                        session.record_progress(percent);
                    }
                }
            }
            CoordinatorEvent::UploadSucceeded {
                session_id,
                stored_path,
            } => self.on_upload_succeeded(session_id, stored_path, &mut effects),
            CoordinatorEvent::UploadFailed { session_id, reason } => {
                self.on_upload_failed(session_id, reason, &mut effects)
            }
            CoordinatorEvent::EndpointCaptured {
                session_id,
                endpoint,
            } => self.on_endpoint_captured(session_id, endpoint, &mut effects),
            CoordinatorEvent::TransferRequested { session_id, result } => {
                self.on_transfer_requested(session_id, result, &mut effects)
            }
            CoordinatorEvent::Notification(PushNotification::PhaseChanged(change)) => {
                self.log.append(change.log_line());
                self.apply_server_phase(change.current, change.message.as_deref(), false, &mut effects);
            }
            CoordinatorEvent::Notification(PushNotification::Status(text)) => {
                self.log.append(text);
            }
            CoordinatorEvent::PhaseQueried(phase) => {
                self.log.append(format!("Server reports phase {}", phase));
                self.apply_server_phase(phase, None, true, &mut effects);
            }
            CoordinatorEvent::Policy { session_id, report } => {
                self.on_policy_report(session_id, report)
            }
        }

        Ok(effects)
    }

    fn reject(&mut self, err: TransferError) -> Result<()> {
        self.log_error(&err);
        Err(err)
    }

    /// Append the user line for `err`, traced by kind
    fn log_error(&mut self, err: &TransferError) {
        match err {
            TransferError::Cancelled(reason) => info!("{}", reason),
            e if e.is_policy_failure() => warn!("Policy action failed, continuing: {}", e),
            e if e.prevents_transfer() => {
                warn!(recoverable = e.is_recoverable(), "Transfer not started: {}", e)
            }
            e => error!("{}", e),
        }
        self.log.append(err.user_message());
    }

    fn on_file_selected(&mut self, selection: FileSelection, effects: &mut Vec<Effect>) -> Result<()> {
        if self.pending.is_some() {
            return self.reject(TransferError::SessionBusy(
                "waiting for disconnect confirmation".to_string(),
            ));
        }
        if let Some(phase) = self.session.as_ref().map(|s| s.phase()) {
            if phase.is_busy() {
                return self.reject(TransferError::SessionBusy(phase.to_string()));
            }
        }
        if let Err(e) = selection.gate.check() {
            return self.reject(e);
        }
        if !selection.settings.accepts_file(&selection.file.name) {
            return self.reject(TransferError::UnsupportedFile(selection.file.name));
        }

        if let Some(previous) = self.session.take() {
            debug!("Replacing finished session {}", previous.id());
            effects.push(Effect::CancelPending);
        }
        self.clear_log();
        self.log.append(STARTING_UPLOAD);

        let device_busy = selection.device_busy;
        if device_busy {
            self.log.append(CONFIRM_DISCONNECT);
        }

        let attempt = Uuid::new_v4();
        effects.push(Effect::ConfirmDisruption {
            attempt,
            device_busy,
        });
        self.pending = Some(PendingAttempt {
            id: attempt,
            selection,
        });
        Ok(())
    }

    fn on_disruption_resolved(
        &mut self,
        attempt: Uuid,
        decision: GuardDecision,
        effects: &mut Vec<Effect>,
    ) {
        let pending = match self.pending.take() {
            Some(pending) if pending.id == attempt => pending,
            other => {
                debug!("Ignoring answer for unknown attempt {}", attempt);
                self.pending = other;
                return;
            }
        };

        match decision {
            GuardDecision::Cancel => {
                self.log_error(&TransferError::Cancelled(format!(
                    "upload of {} declined, printer is busy",
                    pending.selection.file.name
                )));
            }
            GuardDecision::Allow => self.start_session(pending.selection, effects),
        }
    }

    fn start_session(&mut self, selection: FileSelection, effects: &mut Vec<Effect>) {
        let FileSelection {
            file,
            settings,
            gate,
            ..
        } = selection;

        let session = TransferSession::new(file.name.clone(), settings.clone());
        let session_id = session.id();
        info!("Session {} started for {}", session_id, file.name);
        self.session = Some(session);

        effects.push(Effect::ChangePhase(Phase::Upload));
        effects.push(Effect::BeginUpload {
            session_id,
            file,
            settings,
            gate,
        });
    }

    fn on_dismissed(&mut self, effects: &mut Vec<Effect>) {
        if let Some(session) = self.session.take() {
            info!("Session {} dismissed in {}", session.id(), session.phase());
        }
        self.pending = None;
        self.clear_log();
        effects.push(Effect::CancelPending);
    }

    fn on_upload_succeeded(&mut self, session_id: Uuid, stored_path: String, effects: &mut Vec<Effect>) {
        let Some(session) = live_session(&mut self.session, session_id) else {
            return;
        };
        if session.phase() != SessionPhase::Uploading {
            debug!("Upload result in {}, ignoring", session.phase());
            return;
        }

        session.set_stored_path(stored_path.clone());
        session.record_progress(100);
        session.transition(SessionPhase::AwaitingTransferStart);

        self.log.append(format!("{}: {}", UPLOAD_DONE, stored_path));
        self.log.append(STARTING_TRANSFER);
        effects.push(Effect::CaptureEndpoint { session_id });
    }

    fn on_upload_failed(&mut self, session_id: Uuid, reason: String, effects: &mut Vec<Effect>) {
        let Some(session) = live_session(&mut self.session, session_id) else {
            return;
        };
        if session.phase() != SessionPhase::Uploading {
            return;
        }

        // Nothing was stored, so there is nothing for the policy to act on
        session.transition(SessionPhase::CompleteFail);
        session.mark_policy_applied(0);

        self.log_error(&TransferError::Upload(reason));
        effects.push(Effect::ChangePhase(Phase::Inactive));
    }

    fn on_endpoint_captured(
        &mut self,
        session_id: Uuid,
        endpoint: Option<EndpointParams>,
        effects: &mut Vec<Effect>,
    ) {
        let Some(session) = live_session(&mut self.session, session_id) else {
            return;
        };
        if session.phase() != SessionPhase::AwaitingTransferStart
            || !session.capture_endpoint(endpoint.clone())
        {
            return;
        }
        let Some(stored_path) = session.stored_path() else {
            return;
        };

        let mut request = StartTransferRequest::new(stored_path);
        match &endpoint {
            Some(endpoint) => {
                request = request
                    .with_endpoint(endpoint)
                    .with_handler(HandlerType::Dialog);
            }
            None => {
                self.log
                    .append("Printer connection unknown, the server will choose the port");
            }
        }
        if let Some(commands) = session.settings().requested_post_commands() {
            self.log.append(format!(
                "Post-transfer commands: {}",
                commands.join("; ")
            ));
            request = request.with_post_transfer_commands(commands);
        }

        session.mark_transfer_requested();
        effects.push(Effect::StartTransfer {
            session_id,
            request,
        });
    }

    fn on_transfer_requested(
        &mut self,
        session_id: Uuid,
        result: std::result::Result<String, String>,
        effects: &mut Vec<Effect>,
    ) {
        let Some(session) = live_session(&mut self.session, session_id) else {
            return;
        };

        match result {
            Ok(remote_name) => {
                self.log
                    .append(format!("Transferring to printer as {}", remote_name));
            }
            Err(reason) => {
                // A running echo may already have moved the session on
                let open = matches!(
                    session.phase(),
                    SessionPhase::AwaitingTransferStart | SessionPhase::Transferring
                ) && !session.policy_applied();
                self.log.append(format!("Could not start transfer: {}", reason));
                if open {
                    self.finish(Outcome::Failure, effects);
                }
            }
        }
    }

    fn apply_server_phase(
        &mut self,
        phase: Phase,
        message: Option<&str>,
        reconciling: bool,
        effects: &mut Vec<Effect>,
    ) {
        let Some(session) = self.session.as_mut() else {
            debug!("Phase {} outside of any session", phase);
            return;
        };
        session.record_server_phase(phase);
        let current = session.phase();

        if !session.transfer_requested() {
            debug!("Phase {} in {} before the transfer was requested", phase, current);
            return;
        }

        if phase.is_running() {
            if current == SessionPhase::AwaitingTransferStart {
                info!("Session {} transferring", session.id());
                session.transition(SessionPhase::Transferring);
            }
            return;
        }

        if let Some(outcome) = phase.outcome() {
            let open = matches!(
                current,
                SessionPhase::AwaitingTransferStart | SessionPhase::Transferring
            ) && !session.policy_applied()
                && session.stored_path().is_some();
            if !open {
                debug!("Terminal phase {} in {}, policy already handled", phase, current);
                return;
            }
            if let Some(msg) = message.filter(|m| !m.is_empty()) {
                if !session.names_stored_path(msg) {
                    warn!(
                        "Ignoring {} for {}, session payload is {:?}",
                        phase,
                        msg,
                        session.stored_path()
                    );
                    return;
                }
            }
            let failure = matches!(outcome, Outcome::Failure)
                .then(|| TransferError::TransferFailed(session.file_name().to_string()));
            if let Some(err) = failure {
                self.log_error(&err);
            }
            self.finish(outcome, effects);
            return;
        }

        if reconciling && current == SessionPhase::Transferring {
            warn!("Session {} lost its outcome", session.id());
            session.transition(SessionPhase::CompleteFail);
            session.mark_policy_applied(0);
            self.log.append(OUTCOME_UNKNOWN);
        }
    }

    /// Close the session with `outcome` and plan its policy actions
    fn finish(&mut self, outcome: Outcome, effects: &mut Vec<Effect>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        session.transition(SessionPhase::from_outcome(outcome));
        let plan = PolicyEngine::plan(
            outcome,
            session.settings(),
            session.stored_path(),
            session.endpoint(),
        );
        session.mark_policy_applied(plan.action_count());
        info!(
            "Session {} finished: {:?}, {} policy action(s)",
            session.id(),
            outcome,
            plan.action_count()
        );
        let session_id = session.id();

        if let Some(reconnect) = &plan.reconnect {
            self.log.append(format!(
                "Printer will reconnect in {}...",
                format_delay(reconnect.delay)
            ));
        }
        if let Some(path) = &plan.cleanup {
            self.log.append(format!("Deleting uploaded file {}", path));
        }
        if !plan.is_empty() {
            effects.push(Effect::ApplyPolicy { session_id, plan });
        }
    }

    fn on_policy_report(&mut self, session_id: Uuid, report: PolicyReport) {
        let Some(session) = live_session(&mut self.session, session_id) else {
            return;
        };
        session.policy_action_finished();

        if matches!(report, PolicyReport::Reconnected { .. }) {
            self.close_requested = true;
        }
        match report.error() {
            Some(err) => self.log_error(&err),
            None => {
                self.log.append(report.log_line());
            }
        }
    }

    fn clear_log(&mut self) {
        self.log.clear();
        self.published = 0;
        self.cleared = true;
    }

    pub fn phase(&self) -> SessionPhase {
        self.session
            .as_ref()
            .map(|s| s.phase())
            .unwrap_or_default()
    }

    pub fn session(&self) -> Option<&TransferSession> {
        self.session.as_ref()
    }

    pub fn log(&self) -> &ActivityLog {
        &self.log
    }

    pub fn awaiting_confirmation(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|p| p.selection.device_busy)
    }

    pub fn is_settled(&self) -> bool {
        self.pending.is_none() && self.session.as_ref().map_or(true, |s| s.is_settled())
    }

    /// Log lines and flags since the previous update
    pub fn drain_update(&mut self) -> PanelUpdate {
        self.revision += 1;
        let lines = self.log.since(self.published).to_vec();
        self.published = self.log.len();

        PanelUpdate {
            revision: self.revision,
            session_id: self.session.as_ref().map(|s| s.id()),
            phase: self.phase(),
            cleared: std::mem::take(&mut self.cleared),
            lines,
            upload_progress: self.session.as_ref().and_then(|s| s.upload_progress()),
            close_requested: std::mem::take(&mut self.close_requested),
        }
    }

    pub fn snapshot(&self) -> PanelSnapshot {
        let session = self.session.as_ref();
        PanelSnapshot {
            revision: self.revision,
            session_id: session.map(|s| s.id()),
            phase: self.phase(),
            server_phase: session.and_then(|s| s.last_server_phase()),
            stored_path: session.and_then(|s| s.stored_path().map(str::to_string)),
            upload_progress: session.and_then(|s| s.upload_progress()),
            log: self.log.entries().to_vec(),
            awaiting_confirmation: self.awaiting_confirmation(),
            pending_policy_actions: session.map_or(0, |s| s.pending_policy_actions()),
            settled: self.is_settled(),
        }
    }
}
