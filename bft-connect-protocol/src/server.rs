//! Transfer server commands
//!
//! The server owns the actual device transfer. The coordinator talks to it
//! through fire-and-forget commands and hears back through push
//! notifications ([`PushNotification`]).
//!
//! ## Start-transfer payload
//!
//! ```json
//! {
//!     "local_path": "marlinbft/firmware.bin",
//!     "port": "/dev/ttyACM0",
//!     "baudrate": 250000,
//!     "handler_type": "dialog"
//! }
//! ```
//!
//! When the server resolves connection parameters itself only `local_path`
//! is sent.

use crate::device::EndpointParams;
use crate::phase::{Phase, PhaseChange};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How the server reports progress for a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HandlerType {
    /// Phase-change events on the event bus, consumed by an interactive panel
    #[default]
    Dialog,
    /// Plain API caller, no phase narration
    Api,
}

/// Start-transfer command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTransferRequest {
    pub local_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baudrate: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler_type: Option<HandlerType>,

    /// Override of the server's post-transfer commands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_transfer_gcode: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_transfer_gcode_enable: Option<bool>,
}

impl StartTransferRequest {
    /// Simplified variant: the server resolves the connection itself
    pub fn new(local_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            port: None,
            baudrate: None,
            handler_type: None,
            post_transfer_gcode: None,
            post_transfer_gcode_enable: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: &EndpointParams) -> Self {
        self.port = Some(endpoint.port.clone());
        self.baudrate = Some(endpoint.baudrate);
        self
    }

    pub fn with_handler(mut self, handler: HandlerType) -> Self {
        self.handler_type = Some(handler);
        self
    }

    pub fn with_post_transfer_commands(mut self, commands: &[String]) -> Self {
        self.post_transfer_gcode = Some(commands.to_vec());
        self.post_transfer_gcode_enable = Some(true);
        self
    }
}

/// Server reply to a start-transfer command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTransferResponse {
    /// Name the file will have on the device
    pub remote_name: String,
}

/// Storage tier for file commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    #[default]
    Local,
}

/// File deletion command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteFileRequest {
    #[serde(rename = "storageTier")]
    pub storage_tier: StorageTier,
    pub path: String,
}

impl DeleteFileRequest {
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            storage_tier: StorageTier::Local,
            path: path.into(),
        }
    }
}

/// Notification pushed by the server
///
/// Phase changes drive the state machine; status lines are narration only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushNotification {
    PhaseChanged(PhaseChange),
    Status(String),
}

/// Commands the coordinator sends to the transfer server
#[async_trait]
pub trait TransferServer: Send + Sync {
    /// Ask the server to stream the stored file to the device
    async fn start_transfer(&self, request: &StartTransferRequest)
        -> Result<StartTransferResponse>;

    /// Tell the server which phase the client has entered
    async fn change_phase(&self, phase: Phase) -> Result<()>;

    /// Delete a stored file
    async fn delete_file(&self, request: &DeleteFileRequest) -> Result<()>;

    /// Current server phase, for reconciliation after missed events
    async fn query_phase(&self) -> Result<Phase>;
}

/// Device-side file name for a stored path
///
/// The device filesystem only takes 8.3 names: the stem is cut to eight
/// characters and the extension (with its dot) to four.
///
/// ```rust
/// use bft_connect_protocol::remote_file_name;
///
/// assert_eq!(remote_file_name("marlinbft/firmware-v2.bin"), "firmware.bin");
/// assert_eq!(remote_file_name("boot.cur"), "boot.cur");
/// ```
pub fn remote_file_name(local_path: &str) -> String {
    let basename = local_path.rsplit('/').next().unwrap_or(local_path);
    let (stem, ext) = match basename.rfind('.') {
        Some(idx) if idx > 0 => basename.split_at(idx),
        _ => (basename, ""),
    };
    let stem: String = stem.chars().take(8).collect();
    let ext: String = ext.chars().take(4).collect();
    format!("{}{}", stem, ext)
}
