//! Transfer Coordinator
//!
//! Runs the [`PhaseStateMachine`] on a single task. User actions, upload
//! progress, server notifications and policy reports all enter through one
//! unbounded queue and are handled in arrival order.
//!
//! Effects that need I/O are spawned and report back through the same queue,
//! so the task never waits on anything but its next event. The pending
//! confirmation prompt and the reconnect timer are the only tasks it
//! cancels.
//!
//! ```rust,ignore
//! let coordinator = TransferCoordinator::start(collaborators, settings);
//! let mut updates = coordinator.subscribe();
//!
//! coordinator.select_file(UploadFile::from_path("fw.bin").await?).await?;
//! while let Ok(update) = updates.recv().await {
//!     for line in &update.lines {
//!         println!("{}", line.text);
//!     }
//! }
//! ```

use crate::device::DeviceConnection;
use crate::gate::ConnectionGate;
use crate::guard::{ConfirmationPrompt, DisruptionGuard};
use crate::phase::{Phase, PhaseChange};
use crate::policy::{PolicyEngine, ReportSink};
use crate::server::{PushNotification, TransferServer};
use crate::settings::SettingsManager;
use crate::state_machine::{
    CoordinatorEvent, Effect, FileSelection, PanelSnapshot, PanelUpdate, PhaseStateMachine,
};
use crate::upload::{StorageEndpoint, UploadCoordinator, UploadFile, UploadUpdate};
use crate::{Result, TransferError};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Buffered panel updates per subscriber
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// External collaborators the coordinator drives
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn StorageEndpoint>,
    pub server: Arc<dyn TransferServer>,
    pub device: Arc<dyn DeviceConnection>,
    pub prompt: Arc<dyn ConfirmationPrompt>,
}

enum Command {
    Event {
        event: CoordinatorEvent,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    Shutdown,
}

/// Posts events back into the coordinator queue
#[derive(Clone)]
struct EventPoster(mpsc::UnboundedSender<Command>);

impl EventPoster {
    fn post(&self, event: CoordinatorEvent) {
        if self.0.send(Command::Event { event, reply: None }).is_err() {
            debug!("Coordinator stopped, dropping event");
        }
    }
}

/// Handle to a running coordinator
pub struct TransferCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    updates: broadcast::Sender<PanelUpdate>,
    snapshot: watch::Receiver<PanelSnapshot>,
    settings: Arc<SettingsManager>,
    device: Arc<dyn DeviceConnection>,
    server: Arc<dyn TransferServer>,
    task: JoinHandle<()>,
}

impl TransferCoordinator {
    /// Spawn the coordinator task
    pub fn start(collaborators: Collaborators, settings: Arc<SettingsManager>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot) = watch::channel(PanelSnapshot {
            settled: true,
            ..Default::default()
        });

        let worker = CoordinatorTask {
            machine: PhaseStateMachine::new(),
            uploads: UploadCoordinator::new(collaborators.storage.clone()),
            guard: DisruptionGuard::new(collaborators.prompt.clone()),
            policy: PolicyEngine::new(collaborators.server.clone(), collaborators.device.clone()),
            server: collaborators.server.clone(),
            device: collaborators.device.clone(),
            poster: EventPoster(commands.clone()),
            prompt_task: None,
            updates: updates.clone(),
            snapshot: snapshot_tx,
        };

        info!("Starting transfer coordinator");
        let task = tokio::spawn(worker.run(rx));

        Self {
            commands,
            updates,
            snapshot,
            settings,
            device: collaborators.device,
            server: collaborators.server,
            task,
        }
    }

    async fn request(&self, event: CoordinatorEvent) -> Result<()> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(Command::Event {
                event,
                reply: Some(reply),
            })
            .map_err(|_| TransferError::ChannelClosed)?;
        answer.await.map_err(|_| TransferError::ChannelClosed)?
    }

    fn send(&self, event: CoordinatorEvent) -> Result<()> {
        self.commands
            .send(Command::Event { event, reply: None })
            .map_err(|_| TransferError::ChannelClosed)
    }

    /// Start the workflow for `file`
    ///
    /// Takes a settings snapshot and the device state now. Returns once the
    /// selection is accepted (the confirmation prompt may still be open) or
    /// with the reason it was rejected.
    pub async fn select_file(&self, file: UploadFile) -> Result<()> {
        let settings = self.settings.current();
        let gate = ConnectionGate::from_device(self.device.as_ref(), &settings.required_capability);
        let device_busy = self.device.is_printing();

        debug!(
            "File selected: {} (gate open: {}, device busy: {})",
            file.name,
            gate.can_upload(),
            device_busy
        );

        self.request(CoordinatorEvent::FileSelected(FileSelection {
            file,
            settings,
            gate,
            device_busy,
        }))
        .await
    }

    /// Feed a server push notification
    pub fn push(&self, notification: PushNotification) -> Result<()> {
        self.send(CoordinatorEvent::Notification(notification))
    }

    pub fn push_phase_change(&self, change: PhaseChange) -> Result<()> {
        self.push(PushNotification::PhaseChanged(change))
    }

    pub fn push_status(&self, text: impl Into<String>) -> Result<()> {
        self.push(PushNotification::Status(text.into()))
    }

    /// Close the panel: reset the session, cancel prompt and reconnect
    ///
    /// The snapshot shows the reset session once this returns.
    pub async fn dismiss(&self) -> Result<()> {
        self.request(CoordinatorEvent::Dismissed).await
    }

    /// Read the server phase and feed it through the state machine
    ///
    /// For use after the push channel was lost.
    pub async fn reconcile(&self) -> Result<Phase> {
        let phase = self.server.query_phase().await?;
        info!("Reconciling with server phase {}", phase);
        self.request(CoordinatorEvent::PhaseQueried(phase)).await?;
        Ok(phase)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelUpdate> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> PanelSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<PanelSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until nothing is in flight any more
    pub async fn wait_until_settled(&self) -> Result<PanelSnapshot> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|s| s.settled)
            .await
            .map_err(|_| TransferError::ChannelClosed)?;
        Ok(snapshot.clone())
    }

    pub fn settings(&self) -> &Arc<SettingsManager> {
        &self.settings
    }

    /// Stop the coordinator task, cancelling pending work
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            error!("Coordinator task failed: {}", e);
        }
    }
}

struct CoordinatorTask {
    machine: PhaseStateMachine,
    uploads: UploadCoordinator,
    guard: DisruptionGuard,
    policy: PolicyEngine,
    server: Arc<dyn TransferServer>,
    device: Arc<dyn DeviceConnection>,
    poster: EventPoster,
    prompt_task: Option<JoinHandle<()>>,
    updates: broadcast::Sender<PanelUpdate>,
    snapshot: watch::Sender<PanelSnapshot>,
}

impl CoordinatorTask {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            let (event, reply) = match command {
                Command::Event { event, reply } => (event, reply),
                Command::Shutdown => break,
            };

            let result = match self.machine.handle(event) {
                Ok(effects) => {
                    for effect in effects {
                        self.run_effect(effect);
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            };

            self.publish();
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        }

        self.cancel_pending();
        info!("Transfer coordinator stopped");
    }

    fn publish(&mut self) {
        // No subscribers is fine, the snapshot still carries the state
        let _ = self.updates.send(self.machine.drain_update());
        self.snapshot.send_replace(self.machine.snapshot());
    }

    fn cancel_pending(&mut self) {
        if let Some(task) = self.prompt_task.take() {
            task.abort();
        }
        self.policy.cancel_pending();
    }

    fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::ConfirmDisruption {
                attempt,
                device_busy,
            } => self.confirm_disruption(attempt, device_busy),
            Effect::CancelPending => self.cancel_pending(),
            Effect::ChangePhase(phase) => {
                let server = self.server.clone();
                tokio::spawn(async move {
                    if let Err(e) = server.change_phase(phase).await {
                        warn!("Failed to send phase hint {}: {}", phase, e);
                    }
                });
            }
            Effect::BeginUpload {
                session_id,
                file,
                settings,
                gate,
            } => match self.uploads.begin_upload(&gate, &settings, file) {
                Ok(handle) => {
                    let poster = self.poster.clone();
                    tokio::spawn(async move {
                        let mut updates = Box::pin(handle.into_stream());
                        while let Some(update) = updates.next().await {
                            poster.post(match update {
                                UploadUpdate::Progress(percent) => CoordinatorEvent::UploadProgress {
                                    session_id,
                                    percent,
                                },
                                UploadUpdate::Succeeded(stored_path) => {
                                    CoordinatorEvent::UploadSucceeded {
                                        session_id,
                                        stored_path,
                                    }
                                }
                                UploadUpdate::Failed(reason) => CoordinatorEvent::UploadFailed {
                                    session_id,
                                    reason,
                                },
                            });
                        }
                    });
                }
                Err(e) => self.poster.post(CoordinatorEvent::UploadFailed {
                    session_id,
                    reason: e.to_string(),
                }),
            },
            Effect::CaptureEndpoint { session_id } => {
                let device = self.device.clone();
                let poster = self.poster.clone();
                tokio::spawn(async move {
                    let endpoint = match device.current_endpoint().await {
                        Ok(endpoint) => endpoint,
                        Err(e) => {
                            warn!("Could not read printer endpoint: {}", e);
                            None
                        }
                    };
                    poster.post(CoordinatorEvent::EndpointCaptured {
                        session_id,
                        endpoint,
                    });
                });
            }
            Effect::StartTransfer {
                session_id,
                request,
            } => {
                let device = self.device.clone();
                let server = self.server.clone();
                let poster = self.poster.clone();
                tokio::spawn(async move {
                    let result = match device.disconnect().await {
                        Ok(()) => server
                            .start_transfer(&request)
                            .await
                            .map(|response| response.remote_name)
                            .map_err(|e| e.to_string()),
                        Err(e) => Err(format!("could not disconnect printer: {}", e)),
                    };
                    if let Err(reason) = &result {
                        warn!("Start transfer for {} failed: {}", request.local_path, reason);
                    }
                    poster.post(CoordinatorEvent::TransferRequested { session_id, result });
                });
            }
            Effect::ApplyPolicy { session_id, plan } => {
                let poster = self.poster.clone();
                let sink: ReportSink = Arc::new(move |report| {
                    poster.post(CoordinatorEvent::Policy { session_id, report })
                });
                self.policy.apply(&plan, sink);
            }
        }
    }

    fn confirm_disruption(&mut self, attempt: Uuid, device_busy: bool) {
        if let Some(previous) = self.prompt_task.take() {
            previous.abort();
        }

        let guard = self.guard.clone();
        let poster = self.poster.clone();
        self.prompt_task = Some(tokio::spawn(async move {
            let decision = guard.confirm_if_disruptive(device_busy).await;
            poster.post(CoordinatorEvent::DisruptionResolved { attempt, decision });
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::GuardDecision;
    use crate::phase::SessionPhase;
    use crate::server::HandlerType;
    use crate::settings::{DeleteUploadPolicy, MemorySettingsStore, TransferSettings};
    use crate::state_machine::{CANCELLED, CONFIRM_DISCONNECT, STARTING_UPLOAD};
    use crate::test_utils::{MockDevice, MockServer, MockStorage, ScriptedPrompt};
    use crate::{BlockedReason, EndpointParams};
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    const STORED: &str = "marlinbft/fw.bin";

    struct Harness {
        coordinator: TransferCoordinator,
        storage: Arc<MockStorage>,
        server: Arc<MockServer>,
        device: Arc<MockDevice>,
        prompt: Arc<ScriptedPrompt>,
    }

    async fn harness(
        settings: TransferSettings,
        storage: MockStorage,
        device: MockDevice,
        prompt: ScriptedPrompt,
    ) -> Harness {
        let storage = Arc::new(storage);
        let server = Arc::new(MockServer::new());
        let device = Arc::new(device);
        let prompt = Arc::new(prompt);

        let manager = SettingsManager::load(Arc::new(MemorySettingsStore::new(settings)))
            .await
            .unwrap();
        let coordinator = TransferCoordinator::start(
            Collaborators {
                storage: storage.clone(),
                server: server.clone(),
                device: device.clone(),
                prompt: prompt.clone(),
            },
            Arc::new(manager),
        );

        Harness {
            coordinator,
            storage,
            server,
            device,
            prompt,
        }
    }

    fn firmware() -> UploadFile {
        UploadFile {
            name: "fw.bin".to_string(),
            path: PathBuf::from("/tmp/fw.bin"),
            size: 2048,
        }
    }

    async fn wait_for(
        coordinator: &TransferCoordinator,
        condition: impl FnMut(&PanelSnapshot) -> bool,
    ) -> PanelSnapshot {
        let mut rx = coordinator.watch();
        let snapshot = timeout(Duration::from_secs(30), rx.wait_for(condition))
            .await
            .expect("timed out waiting for coordinator")
            .unwrap();
        snapshot.clone()
    }

    fn has_line(snapshot: &PanelSnapshot, prefix: &str) -> bool {
        snapshot.log.iter().any(|e| e.text.starts_with(prefix))
    }

    fn complete_ok() -> PhaseChange {
        PhaseChange::new(Phase::Transfer, Phase::CompleteOk).with_message(STORED)
    }

    /// Select the firmware and wait until the server accepted the transfer
    async fn run_to_transfer(h: &Harness) {
        h.coordinator.select_file(firmware()).await.unwrap();
        wait_for(&h.coordinator, |s| has_line(s, "Transferring to printer as")).await;
    }

    #[tokio::test]
    async fn test_cancel_on_busy_device_has_no_side_effects() {
        let h = harness(
            TransferSettings::default(),
            MockStorage::succeeding(STORED),
            MockDevice::printing(),
            ScriptedPrompt::answering(GuardDecision::Cancel),
        )
        .await;

        h.coordinator.select_file(firmware()).await.unwrap();
        let snapshot = h.coordinator.wait_until_settled().await.unwrap();

        assert_eq!(snapshot.phase, SessionPhase::Idle);
        let lines: Vec<_> = snapshot.log.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(lines, vec![STARTING_UPLOAD, CONFIRM_DISCONNECT, CANCELLED]);
        assert_eq!(h.prompt.times_asked(), 1);
        assert_eq!(h.server.command_count(), 0);
        assert!(h.storage.uploads().is_empty());
        assert_eq!(h.device.disconnects(), 0);
        assert!(h.device.is_printing());
    }

    #[tokio::test]
    async fn test_idle_device_is_never_prompted() {
        let h = harness(
            TransferSettings::default(),
            MockStorage::succeeding(STORED),
            MockDevice::ready(),
            ScriptedPrompt::answering(GuardDecision::Cancel),
        )
        .await;

        run_to_transfer(&h).await;

        assert_eq!(h.prompt.times_asked(), 0);
        assert_eq!(h.server.phase_commands(), vec![Phase::Upload]);
        assert_eq!(h.device.disconnects(), 1);

        let starts = h.server.starts();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].local_path, STORED);
        assert_eq!(starts[0].port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(starts[0].baudrate, Some(250000));
        assert_eq!(starts[0].handler_type, Some(HandlerType::Dialog));
    }

    #[tokio::test]
    async fn test_confirmed_disruption_proceeds() {
        let h = harness(
            TransferSettings::default(),
            MockStorage::succeeding(STORED),
            MockDevice::printing(),
            ScriptedPrompt::answering(GuardDecision::Allow),
        )
        .await;

        run_to_transfer(&h).await;
        assert_eq!(h.prompt.times_asked(), 1);
        assert_eq!(h.server.starts().len(), 1);
        assert!(!h.device.is_printing());
    }

    #[tokio::test]
    async fn test_success_reconnects_and_requests_close() {
        let h = harness(
            TransferSettings::default(),
            MockStorage::succeeding(STORED),
            MockDevice::ready(),
            ScriptedPrompt::answering(GuardDecision::Allow),
        )
        .await;
        let mut updates = h.coordinator.subscribe();

        run_to_transfer(&h).await;
        h.coordinator
            .push_phase_change(PhaseChange::new(Phase::Connect, Phase::Transfer))
            .unwrap();
        h.coordinator.push_status("Done!").unwrap();
        h.coordinator.push_phase_change(complete_ok()).unwrap();

        let snapshot = wait_for(&h.coordinator, |s| {
            s.phase == SessionPhase::CompleteOk && s.settled
        })
        .await;

        assert_eq!(
            h.device.connects(),
            vec![EndpointParams::new("/dev/ttyACM0", 250000)]
        );
        assert!(h.server.deletes().is_empty());
        assert!(has_line(&snapshot, "Done!"));
        assert!(has_line(&snapshot, "Reconnected to printer on /dev/ttyACM0@250000"));

        let mut close_requested = false;
        while let Ok(update) = updates.try_recv() {
            close_requested |= update.close_requested;
        }
        assert!(close_requested);
    }

    #[tokio::test]
    async fn test_duplicate_terminal_events_clean_up_once() {
        let settings = TransferSettings {
            delete_upload_policy: DeleteUploadPolicy::Always,
            reconnect_after_success: false,
            ..Default::default()
        };
        let h = harness(
            settings,
            MockStorage::succeeding(STORED),
            MockDevice::ready(),
            ScriptedPrompt::answering(GuardDecision::Allow),
        )
        .await;

        run_to_transfer(&h).await;
        for _ in 0..3 {
            h.coordinator.push_phase_change(complete_ok()).unwrap();
        }
        h.coordinator
            .push_phase_change(PhaseChange::new(Phase::CompleteOk, Phase::Inactive))
            .unwrap();

        wait_for(&h.coordinator, |s| {
            s.settled && s.log.iter().any(|e| e.text.starts_with("Phase CompleteOK -> Inactive"))
        })
        .await;
        assert_eq!(h.server.deletes().len(), 1);
        assert_eq!(h.server.deletes()[0].path, STORED);
    }

    #[tokio::test]
    async fn test_failed_cleanup_is_logged_only() {
        let settings = TransferSettings {
            delete_upload_policy: DeleteUploadPolicy::OnlyOnFail,
            ..Default::default()
        };
        let h = harness(
            settings,
            MockStorage::succeeding(STORED),
            MockDevice::ready(),
            ScriptedPrompt::answering(GuardDecision::Allow),
        )
        .await;
        h.server.fail_delete();

        run_to_transfer(&h).await;
        h.coordinator
            .push_phase_change(PhaseChange::new(Phase::Transfer, Phase::CompleteFail))
            .unwrap();

        let snapshot = h.coordinator.wait_until_settled().await.unwrap();
        assert_eq!(snapshot.phase, SessionPhase::CompleteFail);
        assert!(has_line(&snapshot, "Failed to delete uploaded file"));
        assert!(h.device.connects().is_empty());
    }

    #[tokio::test]
    async fn test_upload_failure_ends_session() {
        let h = harness(
            TransferSettings::default(),
            MockStorage::failing("503 Service Unavailable"),
            MockDevice::ready(),
            ScriptedPrompt::answering(GuardDecision::Allow),
        )
        .await;

        h.coordinator.select_file(firmware()).await.unwrap();
        let snapshot = wait_for(&h.coordinator, |s| s.phase == SessionPhase::CompleteFail).await;

        assert!(snapshot.settled);
        assert!(h.server.starts().is_empty());
        assert_eq!(h.device.disconnects(), 0);

        // The Inactive hint is fire-and-forget, give it a moment
        timeout(Duration::from_secs(5), async {
            while h.server.phase_commands().len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(h.server.phase_commands(), vec![Phase::Upload, Phase::Inactive]);
    }

    #[tokio::test]
    async fn test_busy_session_rejects_second_upload() {
        let h = harness(
            TransferSettings::default(),
            MockStorage::held(STORED),
            MockDevice::ready(),
            ScriptedPrompt::answering(GuardDecision::Allow),
        )
        .await;

        h.coordinator.select_file(firmware()).await.unwrap();
        wait_for(&h.coordinator, |s| s.phase == SessionPhase::Uploading).await;

        let second = h.coordinator.select_file(firmware()).await;
        assert!(matches!(second, Err(TransferError::SessionBusy(_))));

        h.storage.release();
        wait_for(&h.coordinator, |s| has_line(s, "Transferring to printer as")).await;
        assert_eq!(h.storage.uploads().len(), 1);
    }

    #[tokio::test]
    async fn test_blocked_gate_rejects_before_io() {
        let device = MockDevice::ready();
        device.set_operational(false);
        let h = harness(
            TransferSettings::default(),
            MockStorage::succeeding(STORED),
            device,
            ScriptedPrompt::answering(GuardDecision::Allow),
        )
        .await;

        let result = h.coordinator.select_file(firmware()).await;
        assert!(matches!(
            result,
            Err(TransferError::Blocked(BlockedReason::NotConnected))
        ));
        assert!(h.storage.uploads().is_empty());
        assert_eq!(h.server.command_count(), 0);
        assert!(h.coordinator.snapshot().settled);
    }

    #[tokio::test]
    async fn test_reconcile_applies_missed_outcome() {
        let settings = TransferSettings {
            delete_upload_policy: DeleteUploadPolicy::OnlyOnFail,
            ..Default::default()
        };
        let h = harness(
            settings,
            MockStorage::succeeding(STORED),
            MockDevice::ready(),
            ScriptedPrompt::answering(GuardDecision::Allow),
        )
        .await;

        run_to_transfer(&h).await;
        h.server.set_phase(Phase::CompleteFail);

        assert_eq!(h.coordinator.reconcile().await.unwrap(), Phase::CompleteFail);
        let snapshot = h.coordinator.wait_until_settled().await.unwrap();
        assert_eq!(snapshot.phase, SessionPhase::CompleteFail);
        assert_eq!(snapshot.server_phase, Some(Phase::CompleteFail));
        assert_eq!(h.server.deletes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_cancels_scheduled_reconnect() {
        let settings = TransferSettings {
            reconnect_delay_ms: 5000,
            ..Default::default()
        };
        let h = harness(
            settings,
            MockStorage::succeeding(STORED),
            MockDevice::ready(),
            ScriptedPrompt::answering(GuardDecision::Allow),
        )
        .await;

        run_to_transfer(&h).await;
        h.coordinator.push_phase_change(complete_ok()).unwrap();
        let snapshot = wait_for(&h.coordinator, |s| s.phase == SessionPhase::CompleteOk).await;
        assert_eq!(snapshot.pending_policy_actions, 1);
        assert!(has_line(&snapshot, "Printer will reconnect in 5s..."));

        h.coordinator.dismiss().await.unwrap();
        assert_eq!(h.coordinator.snapshot().phase, SessionPhase::Idle);
        sleep(Duration::from_secs(10)).await;

        assert!(h.device.connects().is_empty());
        assert!(h.coordinator.snapshot().log.is_empty());
    }

    #[tokio::test]
    async fn test_dismiss_cancels_pending_prompt() {
        let h = harness(
            TransferSettings::default(),
            MockStorage::succeeding(STORED),
            MockDevice::printing(),
            ScriptedPrompt::pending(),
        )
        .await;

        h.coordinator.select_file(firmware()).await.unwrap();
        let snapshot = wait_for(&h.coordinator, |s| s.awaiting_confirmation).await;
        assert!(!snapshot.settled);

        h.coordinator.dismiss().await.unwrap();
        let snapshot = h.coordinator.snapshot();
        assert!(snapshot.settled);
        assert!(!snapshot.awaiting_confirmation);
        assert_eq!(h.server.command_count(), 0);

        // A new attempt is accepted right away
        h.coordinator.select_file(firmware()).await.unwrap();
        assert!(h.coordinator.snapshot().awaiting_confirmation);
    }

    #[tokio::test]
    async fn test_shutdown_closes_channel() {
        let h = harness(
            TransferSettings::default(),
            MockStorage::succeeding(STORED),
            MockDevice::ready(),
            ScriptedPrompt::answering(GuardDecision::Allow),
        )
        .await;
        let watch = h.coordinator.watch();

        h.coordinator.shutdown().await;
        assert!(watch.has_changed().is_err());
    }
}
