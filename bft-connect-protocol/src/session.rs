//! Transfer session
//!
//! One upload-to-completion cycle. Fields are filled in at fixed transition
//! points and the write-once fields refuse a second write.

use crate::device::EndpointParams;
use crate::phase::{Phase, SessionPhase};
use crate::settings::TransferSettings;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TransferSession {
    id: Uuid,
    file_name: String,

    /// Snapshot taken when the session started; later toggles apply to the
    /// next session
    settings: TransferSettings,

    stored_path: Option<String>,

    /// `Some(None)` means capture ran but the device had no endpoint
    endpoint: Option<Option<EndpointParams>>,

    phase: SessionPhase,
    previous_phase: Option<SessionPhase>,
    last_server_phase: Option<Phase>,
    upload_progress: Option<u8>,

    /// Set once the start-transfer request went out; server phases before
    /// that belong to some earlier transfer
    transfer_requested: bool,

    started_at: DateTime<Utc>,
    last_event_at: DateTime<Utc>,

    policy_applied: bool,
    pending_policy_actions: usize,
}

impl TransferSession {
    /// New session, already uploading
    pub fn new(file_name: impl Into<String>, settings: TransferSettings) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            file_name: file_name.into(),
            settings,
            stored_path: None,
            endpoint: None,
            phase: SessionPhase::Uploading,
            previous_phase: Some(SessionPhase::Idle),
            last_server_phase: None,
            upload_progress: None,
            transfer_requested: false,
            started_at: now,
            last_event_at: now,
            policy_applied: false,
            pending_policy_actions: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn previous_phase(&self) -> Option<SessionPhase> {
        self.previous_phase
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn last_event_at(&self) -> DateTime<Utc> {
        self.last_event_at
    }

    pub fn touch(&mut self) {
        self.last_event_at = Utc::now();
    }

    pub fn transition(&mut self, to: SessionPhase) {
        if self.phase != to {
            self.previous_phase = Some(self.phase);
            self.phase = to;
        }
        self.touch();
    }

    pub fn stored_path(&self) -> Option<&str> {
        self.stored_path.as_deref()
    }

    /// Returns false when a stored path was already recorded
    pub fn set_stored_path(&mut self, path: impl Into<String>) -> bool {
        if self.stored_path.is_some() {
            return false;
        }
        self.stored_path = Some(path.into());
        true
    }

    /// Whether a terminal message names this session's payload
    ///
    /// The server may report an absolute path for the stored file, so a
    /// path ending in `/<stored_path>` matches too.
    pub fn names_stored_path(&self, message: &str) -> bool {
        match self.stored_path.as_deref() {
            Some(stored) => {
                let stored = stored.trim_start_matches('/');
                message == stored
                    || message.trim_start_matches('/') == stored
                    || message.ends_with(&format!("/{}", stored))
            }
            None => false,
        }
    }

    pub fn endpoint(&self) -> Option<&EndpointParams> {
        self.endpoint.as_ref().and_then(|e| e.as_ref())
    }

    pub fn endpoint_captured(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Record the device endpoint; returns false if already captured
    pub fn capture_endpoint(&mut self, endpoint: Option<EndpointParams>) -> bool {
        if self.endpoint.is_some() {
            return false;
        }
        self.endpoint = Some(endpoint);
        true
    }

    pub fn last_server_phase(&self) -> Option<Phase> {
        self.last_server_phase
    }

    pub fn record_server_phase(&mut self, phase: Phase) {
        self.last_server_phase = Some(phase);
        self.touch();
    }

    pub fn upload_progress(&self) -> Option<u8> {
        self.upload_progress
    }

    pub fn record_progress(&mut self, percent: u8) {
        self.upload_progress = Some(self.upload_progress.map_or(percent, |p| p.max(percent)));
        self.touch();
    }

    pub fn transfer_requested(&self) -> bool {
        self.transfer_requested
    }

    pub fn mark_transfer_requested(&mut self) {
        self.transfer_requested = true;
        self.touch();
    }

    pub fn policy_applied(&self) -> bool {
        self.policy_applied
    }

    /// Close the policy window with `actions` reports still to come
    pub fn mark_policy_applied(&mut self, actions: usize) {
        self.policy_applied = true;
        self.pending_policy_actions = actions;
    }

    pub fn pending_policy_actions(&self) -> usize {
        self.pending_policy_actions
    }

    pub fn policy_action_finished(&mut self) {
        self.pending_policy_actions = self.pending_policy_actions.saturating_sub(1);
    }

    /// Terminal with every policy action reported back
    pub fn is_settled(&self) -> bool {
        self.phase.is_terminal() && self.pending_policy_actions == 0
    }
}
