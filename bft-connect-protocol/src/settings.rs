//! Transfer Settings
//!
//! User-configured options for the upload-to-device workflow, resolved once
//! per session from a persistent [`SettingsStore`].
//!
//! All mutation goes through [`SettingsManager`], which persists the new
//! value before anyone observes it:
//!
//! ```text
//! update(f) ─→ clone ─→ f(&mut clone) ─→ store.save(&clone) ─→ watch::send
//! ```
//!
//! A session takes a snapshot at upload start; toggles made while a transfer
//! runs apply to the next session.

use crate::{Result, TransferError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

/// Capability the device firmware must report for binary file transfer
pub const CAP_BINARY_FILE_TRANSFER: &str = "BINARY_FILE_TRANSFER";

/// When to delete the uploaded payload after the session ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DeleteUploadPolicy {
    #[default]
    Never,
    OnlyOnSuccess,
    OnlyOnFail,
    Always,
}

impl DeleteUploadPolicy {
    pub const ALL: [DeleteUploadPolicy; 4] = [
        DeleteUploadPolicy::Never,
        DeleteUploadPolicy::OnlyOnSuccess,
        DeleteUploadPolicy::OnlyOnFail,
        DeleteUploadPolicy::Always,
    ];

    /// Whether the upload must be deleted for the given outcome
    pub fn deletes_on(&self, outcome: crate::Outcome) -> bool {
        use crate::Outcome;
        match self {
            DeleteUploadPolicy::Never => false,
            DeleteUploadPolicy::OnlyOnSuccess => outcome == Outcome::Success,
            DeleteUploadPolicy::OnlyOnFail => outcome == Outcome::Failure,
            DeleteUploadPolicy::Always => true,
        }
    }
}

impl std::str::FromStr for DeleteUploadPolicy {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "never" => Ok(DeleteUploadPolicy::Never),
            "onlyonsuccess" => Ok(DeleteUploadPolicy::OnlyOnSuccess),
            "onlyonfail" => Ok(DeleteUploadPolicy::OnlyOnFail),
            "always" => Ok(DeleteUploadPolicy::Always),
            _ => Err(TransferError::Settings(format!(
                "unknown delete policy '{}'",
                s
            ))),
        }
    }
}

/// Settings for one transfer session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Destination folder on the storage endpoint
    #[serde(default = "default_upload_folder")]
    pub upload_folder: String,

    /// Capability the connected device must report
    #[serde(default = "default_required_capability")]
    pub required_capability: String,

    /// Accepted payload extensions (without the dot)
    #[serde(default = "default_accept_extensions")]
    pub accept_extensions: Vec<String>,

    /// Commands sent to the device after a successful transfer
    #[serde(default = "default_post_transfer_commands")]
    pub post_transfer_commands: Vec<String>,

    #[serde(default)]
    pub post_transfer_enabled: bool,

    #[serde(default = "default_true")]
    pub reconnect_after_success: bool,

    #[serde(default)]
    pub reconnect_delay_ms: u64,

    #[serde(default)]
    pub delete_upload_policy: DeleteUploadPolicy,
}

fn default_upload_folder() -> String {
    "marlinbft".to_string()
}

fn default_required_capability() -> String {
    CAP_BINARY_FILE_TRANSFER.to_string()
}

fn default_accept_extensions() -> Vec<String> {
    vec!["bin".to_string(), "cur".to_string()]
}

fn default_post_transfer_commands() -> Vec<String> {
    vec!["M997".to_string()]
}

fn default_true() -> bool {
    true
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            upload_folder: default_upload_folder(),
            required_capability: default_required_capability(),
            accept_extensions: default_accept_extensions(),
            post_transfer_commands: default_post_transfer_commands(),
            post_transfer_enabled: false,
            reconnect_after_success: true,
            reconnect_delay_ms: 0,
            delete_upload_policy: DeleteUploadPolicy::Never,
        }
    }
}

impl TransferSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Post-transfer commands to request, if enabled
    pub fn requested_post_commands(&self) -> Option<&[String]> {
        if self.post_transfer_enabled && !self.post_transfer_commands.is_empty() {
            Some(&self.post_transfer_commands)
        } else {
            None
        }
    }

    /// Post-transfer commands as a single `;`-separated line
    pub fn post_commands_line(&self) -> String {
        self.post_transfer_commands.join(";")
    }

    /// Check a file name against the accepted extensions
    ///
    /// An empty list accepts everything.
    pub fn accepts_file(&self, file_name: &str) -> bool {
        if self.accept_extensions.is_empty() {
            return true;
        }
        let Some((_, ext)) = file_name.rsplit_once('.') else {
            return false;
        };
        self.accept_extensions
            .iter()
            .any(|accepted| accepted.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }
}

/// Split a `;`-separated command line into individual commands
pub fn parse_command_line(line: &str) -> Vec<String> {
    line.split(';')
        .map(str::trim)
        .filter(|cmd| !cmd.is_empty())
        .map(str::to_string)
        .collect()
}

/// Persistent settings storage
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Load settings, falling back to defaults for missing fields
    async fn load(&self) -> Result<TransferSettings>;

    /// Persist settings; must only return once the value is durable
    async fn save(&self, settings: &TransferSettings) -> Result<()>;
}

/// In-memory store, useful for embedding and tests
#[derive(Default)]
pub struct MemorySettingsStore {
    settings: std::sync::Mutex<TransferSettings>,
}

impl MemorySettingsStore {
    pub fn new(settings: TransferSettings) -> Self {
        Self {
            settings: std::sync::Mutex::new(settings),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> Result<TransferSettings> {
        self.settings
            .lock()
            .map(|s| s.clone())
            .map_err(|_| TransferError::Settings("settings lock poisoned".to_string()))
    }

    async fn save(&self, settings: &TransferSettings) -> Result<()> {
        let mut guard = self
            .settings
            .lock()
            .map_err(|_| TransferError::Settings("settings lock poisoned".to_string()))?;
        *guard = settings.clone();
        Ok(())
    }
}

/// Single entry point for settings reads and updates
pub struct SettingsManager {
    store: Arc<dyn SettingsStore>,
    current: watch::Sender<TransferSettings>,
    /// Serializes persist-then-notify
    write_lock: Mutex<()>,
}

impl SettingsManager {
    /// Load settings from the store
    pub async fn load(store: Arc<dyn SettingsStore>) -> Result<Self> {
        let settings = store.load().await?;
        info!(
            "Loaded transfer settings (upload folder '{}', delete policy {:?})",
            settings.upload_folder, settings.delete_upload_policy
        );
        let (current, _) = watch::channel(settings);
        Ok(Self {
            store,
            current,
            write_lock: Mutex::new(()),
        })
    }

    /// Snapshot of the current settings
    pub fn current(&self) -> TransferSettings {
        self.current.borrow().clone()
    }

    /// Subscribe to persisted changes
    pub fn subscribe(&self) -> watch::Receiver<TransferSettings> {
        self.current.subscribe()
    }

    /// Apply a mutation, persist it, then publish it
    ///
    /// If persisting fails the published value is left untouched.
    pub async fn update<F>(&self, mutate: F) -> Result<TransferSettings>
    where
        F: FnOnce(&mut TransferSettings),
    {
        let _guard = self.write_lock.lock().await;
        let mut next = self.current();
        mutate(&mut next);

        self.store.save(&next).await?;
        self.current.send_replace(next.clone());
        debug!("Persisted transfer settings: {:?}", next);
        Ok(next)
    }

    pub async fn toggle_reconnect(&self) -> Result<bool> {
        let s = self
            .update(|s| s.reconnect_after_success = !s.reconnect_after_success)
            .await?;
        Ok(s.reconnect_after_success)
    }

    pub async fn toggle_post_transfer(&self) -> Result<bool> {
        let s = self
            .update(|s| s.post_transfer_enabled = !s.post_transfer_enabled)
            .await?;
        Ok(s.post_transfer_enabled)
    }

    pub async fn set_delete_policy(&self, policy: DeleteUploadPolicy) -> Result<()> {
        self.update(|s| s.delete_upload_policy = policy).await?;
        Ok(())
    }

    pub async fn set_reconnect_delay_ms(&self, delay_ms: u64) -> Result<()> {
        self.update(|s| s.reconnect_delay_ms = delay_ms).await?;
        Ok(())
    }

    /// Replace post-transfer commands from a `;`-separated line
    pub async fn set_post_commands_line(&self, line: &str) -> Result<()> {
        let commands = parse_command_line(line);
        self.update(|s| s.post_transfer_commands = commands).await?;
        Ok(())
    }
}
