//! Local collaborators
//!
//! Stand-ins for the storage endpoint, transfer server and printer link so
//! the coordinator can be driven from a terminal. Uploads land in a local
//! directory; the server replays a script of push notifications.

use async_trait::async_trait;
use bft_connect_protocol::{
    remote_file_name, ByteProgress, ConfirmationPrompt, DeleteFileRequest, DeviceConnection,
    DisruptionWarning, EndpointParams, GuardDecision, Phase, PhaseChange, PushNotification,
    Result, StartTransferRequest, StartTransferResponse, StorageEndpoint, TransferError,
    TransferServer, UploadFile, UploadResponse, CAP_BINARY_FILE_TRANSFER,
};
use serde::Deserialize;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const CHUNK_SIZE: usize = 64 * 1024;

/// Placeholder replaced by the stored path when a script is replayed
pub const LOCAL_PATH_PLACEHOLDER: &str = "{local_path}";

/// Storage endpoint backed by a local directory
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl StorageEndpoint for LocalStorage {
    async fn upload(
        &self,
        file: &UploadFile,
        destination_folder: &str,
        progress: mpsc::UnboundedSender<ByteProgress>,
    ) -> Result<UploadResponse> {
        let folder = self.root.join(destination_folder);
        tokio::fs::create_dir_all(&folder).await?;

        let mut source = tokio::fs::File::open(&file.path).await?;
        let mut target = tokio::fs::File::create(folder.join(&file.name)).await?;
        let total = file.size;
        let mut loaded = 0u64;
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            target.write_all(&buf[..n]).await?;
            loaded += n as u64;
            // The receiver may already be gone if the session was dismissed
            let _ = progress.send(ByteProgress { loaded, total });
        }
        target.flush().await?;

        if loaded != total {
            return Err(TransferError::Upload(format!(
                "{} changed during upload ({} of {} bytes)",
                file.name, loaded, total
            )));
        }

        debug!("Stored {} bytes under {}", loaded, folder.display());
        Ok(UploadResponse::local(
            file.name.clone(),
            format!("{}/{}", destination_folder, file.name),
        ))
    }
}

/// Printer link simulated with flags
pub struct LocalDevice {
    endpoint: EndpointParams,
    reports_capability: bool,
    operational: AtomicBool,
    printing: AtomicBool,
}

impl LocalDevice {
    pub fn new(endpoint: EndpointParams, reports_capability: bool, printing: bool) -> Self {
        Self {
            endpoint,
            reports_capability,
            operational: AtomicBool::new(true),
            printing: AtomicBool::new(printing),
        }
    }
}

#[async_trait]
impl DeviceConnection for LocalDevice {
    fn is_operational(&self) -> bool {
        self.operational.load(Ordering::SeqCst)
    }

    fn is_printing(&self) -> bool {
        self.printing.load(Ordering::SeqCst)
    }

    fn has_capability(&self, capability: &str) -> bool {
        self.reports_capability && capability == CAP_BINARY_FILE_TRANSFER
    }

    async fn current_endpoint(&self) -> Result<Option<EndpointParams>> {
        if self.is_operational() {
            Ok(Some(self.endpoint.clone()))
        } else {
            Ok(None)
        }
    }

    async fn connect(&self, endpoint: &EndpointParams) -> Result<()> {
        info!("Connecting to printer on {}", endpoint);
        self.operational.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        info!("Disconnecting from printer on {}", self.endpoint);
        self.operational.store(false, Ordering::SeqCst);
        self.printing.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// One line of a replay script
///
/// Either a pause or a notification in its wire form:
///
/// ```text
/// {"wait_ms": 250}
/// {"status": "Connecting to printer"}
/// {"phase_changed": {"prev": "Transfer", "curr": "CompleteOK", "msg": "{local_path}"}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ScriptStep {
    Wait { wait_ms: u64 },
    Notify(PushNotification),
}

impl ScriptStep {
    /// Parse JSON lines, skipping blanks and `#` comments
    pub fn parse_script(text: &str) -> Result<Vec<ScriptStep>> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| serde_json::from_str(line).map_err(TransferError::from))
            .collect()
    }

    /// Built-in run of a transfer ending in `terminal`
    pub fn default_script(terminal: Phase) -> Vec<ScriptStep> {
        let change = |prev, curr| {
            ScriptStep::Notify(PushNotification::PhaseChanged(PhaseChange::new(prev, curr)))
        };
        let status = |text: &str| ScriptStep::Notify(PushNotification::Status(text.to_string()));
        let wait = |ms| ScriptStep::Wait { wait_ms: ms };

        vec![
            status("Connecting to printer"),
            change(Phase::Inactive, Phase::Connect),
            wait(200),
            change(Phase::Connect, Phase::Transfer),
            wait(500),
            change(Phase::Transfer, terminal),
            ScriptStep::Notify(PushNotification::PhaseChanged(
                PhaseChange::new(Phase::Transfer, terminal).with_message(LOCAL_PATH_PLACEHOLDER),
            )),
            status("Done!"),
            change(terminal, Phase::Inactive),
        ]
    }

    /// Replace the stored path placeholder in messages
    fn render(&self, local_path: &str) -> ScriptStep {
        match self {
            ScriptStep::Wait { .. } => self.clone(),
            ScriptStep::Notify(PushNotification::Status(text)) => ScriptStep::Notify(
                PushNotification::Status(text.replace(LOCAL_PATH_PLACEHOLDER, local_path)),
            ),
            ScriptStep::Notify(PushNotification::PhaseChanged(change)) => {
                let mut change = change.clone();
                change.message = change
                    .message
                    .map(|m| m.replace(LOCAL_PATH_PLACEHOLDER, local_path));
                ScriptStep::Notify(PushNotification::PhaseChanged(change))
            }
        }
    }
}

/// Transfer server that replays a script once a transfer starts
pub struct ScriptedServer {
    root: PathBuf,
    script: Vec<ScriptStep>,
    notifications: mpsc::UnboundedSender<PushNotification>,
    phase: Arc<Mutex<Phase>>,
}

impl ScriptedServer {
    pub fn new(
        root: impl Into<PathBuf>,
        script: Vec<ScriptStep>,
        notifications: mpsc::UnboundedSender<PushNotification>,
    ) -> Self {
        Self {
            root: root.into(),
            script,
            notifications,
            phase: Arc::new(Mutex::new(Phase::Inactive)),
        }
    }

    fn set_phase(phase: &Mutex<Phase>, value: Phase) {
        if let Ok(mut guard) = phase.lock() {
            *guard = value;
        }
    }

    fn stored_file(&self, path: &str) -> PathBuf {
        self.root.join(Path::new(path.trim_start_matches('/')))
    }
}

#[async_trait]
impl TransferServer for ScriptedServer {
    async fn start_transfer(
        &self,
        request: &StartTransferRequest,
    ) -> Result<StartTransferResponse> {
        if !self.stored_file(&request.local_path).exists() {
            return Err(TransferError::collaborator(format!(
                "{} is not in storage",
                request.local_path
            )));
        }

        let steps: Vec<ScriptStep> = self
            .script
            .iter()
            .map(|step| step.render(&request.local_path))
            .collect();
        let tx = self.notifications.clone();
        let phase = self.phase.clone();

        info!(
            "Replaying {} script steps for {}",
            steps.len(),
            request.local_path
        );
        tokio::spawn(async move {
            for step in steps {
                match step {
                    ScriptStep::Wait { wait_ms } => {
                        tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                    }
                    ScriptStep::Notify(notification) => {
                        if let PushNotification::PhaseChanged(change) = &notification {
                            Self::set_phase(&phase, change.current);
                        }
                        if tx.send(notification).is_err() {
                            debug!("Notification receiver gone, stopping replay");
                            return;
                        }
                    }
                }
            }
        });

        Ok(StartTransferResponse {
            remote_name: remote_file_name(&request.local_path),
        })
    }

    async fn change_phase(&self, phase: Phase) -> Result<()> {
        debug!("Client entered {}", phase);
        Self::set_phase(&self.phase, phase);
        Ok(())
    }

    async fn delete_file(&self, request: &DeleteFileRequest) -> Result<()> {
        let path = self.stored_file(&request.path);
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| TransferError::collaborator(format!("{}: {}", path.display(), e)))
    }

    async fn query_phase(&self) -> Result<Phase> {
        self.phase
            .lock()
            .map(|phase| *phase)
            .map_err(|_| TransferError::collaborator("phase lock poisoned"))
    }
}

/// Asks on the terminal before disrupting a running job
pub struct TerminalPrompt;

fn parse_answer(line: &str) -> GuardDecision {
    match line.trim().to_ascii_lowercase().as_str() {
        "c" | "continue" | "y" | "yes" => GuardDecision::Allow,
        _ => GuardDecision::Cancel,
    }
}

#[async_trait]
impl ConfirmationPrompt for TerminalPrompt {
    async fn confirm(&self, warning: &DisruptionWarning) -> GuardDecision {
        let warning = warning.clone();
        let answer = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = writeln!(stderr, "{}\n{}", warning.title, warning.message);
            let _ = write!(
                stderr,
                "[{}/{}] ",
                warning.choices[1].to_lowercase(),
                warning.choices[0]
            );
            let _ = stderr.flush();

            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => parse_answer(&line),
            Ok(Err(e)) => {
                warn!("Could not read answer: {}", e);
                GuardDecision::Cancel
            }
            Err(e) => {
                warn!("Prompt task failed: {}", e);
                GuardDecision::Cancel
            }
        }
    }
}
