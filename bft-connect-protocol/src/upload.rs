//! Upload Coordinator
//!
//! First stage of the hand-off: sends the payload to the storage endpoint
//! and reports progress until the endpoint answers with the stored path.
//!
//! ## Flow
//!
//! 1. Gate check and extension check, before any I/O
//! 2. The storage endpoint streams the file and reports `{loaded, total}`
//! 3. Byte counts become integer percentages, monotonically non-decreasing
//! 4. The stored path from the endpoint response is handed to the next stage
//!
//! ```rust,ignore
//! let mut handle = uploads.begin_upload(&gate, &settings, file)?;
//! while let Some(update) = handle.next().await {
//!     match update {
//!         UploadUpdate::Progress(pct) => println!("{}%", pct),
//!         UploadUpdate::Succeeded(path) => println!("stored at {}", path),
//!         UploadUpdate::Failed(reason) => eprintln!("{}", reason),
//!     }
//! }
//! ```

use crate::gate::ConnectionGate;
use crate::settings::TransferSettings;
use crate::{Result, TransferError};
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Capacity of the per-upload update channel
const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Payload selected by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    /// File name (with extension)
    pub name: String,

    /// Path of the payload on the client
    pub path: PathBuf,

    /// Size in bytes
    pub size: u64,
}

impl UploadFile {
    /// Read name and size from the filesystem
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::UnsupportedFile(path.display().to_string()))?
            .to_string();

        Ok(Self {
            name,
            path: path.to_path_buf(),
            size: metadata.len(),
        })
    }
}

/// Raw progress callback from the storage endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteProgress {
    pub loaded: u64,
    pub total: u64,
}

/// Storage endpoint response body
///
/// ```json
/// { "files": { "local": { "name": "fw.bin", "path": "marlinbft/fw.bin" } }, "done": true }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub files: UploadedFiles,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFiles {
    pub local: StoredFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub name: String,
    pub path: String,
}

impl UploadResponse {
    pub fn local(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            files: UploadedFiles {
                local: StoredFile {
                    name: name.into(),
                    path: path.into(),
                },
            },
            done: true,
        }
    }

    /// Path assigned by the server; the only valid input to a transfer
    pub fn stored_path(&self) -> &str {
        &self.files.local.path
    }
}

/// File storage endpoint on the server
#[async_trait]
pub trait StorageEndpoint: Send + Sync {
    /// Upload `file` into `destination_folder`, reporting progress
    async fn upload(
        &self,
        file: &UploadFile,
        destination_folder: &str,
        progress: mpsc::UnboundedSender<ByteProgress>,
    ) -> Result<UploadResponse>;
}

/// Progress or terminal result of one upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadUpdate {
    /// Percentage complete, 0-100
    Progress(u8),
    /// Stored path reported by the endpoint
    Succeeded(String),
    Failed(String),
}

/// Converts byte counts to percentages that never go backwards
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last: Option<u8>,
}

impl ProgressTracker {
    /// Returns a percentage only when it moved forward
    pub fn observe(&mut self, progress: ByteProgress) -> Option<u8> {
        let pct = if progress.total == 0 {
            0
        } else {
            (progress.loaded.saturating_mul(100) / progress.total).min(100) as u8
        };

        match self.last {
            Some(last) if pct <= last => None,
            _ => {
                self.last = Some(pct);
                Some(pct)
            }
        }
    }

    pub fn last(&self) -> Option<u8> {
        self.last
    }
}

/// Receiving side of a running upload
pub struct UploadHandle {
    updates: mpsc::Receiver<UploadUpdate>,
}

impl UploadHandle {
    /// Next update; `None` after the terminal result
    pub async fn next(&mut self) -> Option<UploadUpdate> {
        self.updates.recv().await
    }

    /// Updates as a stream
    pub fn into_stream(self) -> impl Stream<Item = UploadUpdate> {
        futures::stream::unfold(self, |mut handle| async move {
            handle.next().await.map(|update| (update, handle))
        })
    }
}

/// Drives uploads against a storage endpoint
#[derive(Clone)]
pub struct UploadCoordinator {
    storage: Arc<dyn StorageEndpoint>,
}

impl UploadCoordinator {
    pub fn new(storage: Arc<dyn StorageEndpoint>) -> Self {
        Self { storage }
    }

    /// Start uploading `file` into the configured folder
    ///
    /// Rejects before any network I/O when the gate denies or the file
    /// type is not accepted.
    pub fn begin_upload(
        &self,
        gate: &ConnectionGate,
        settings: &TransferSettings,
        file: UploadFile,
    ) -> Result<UploadHandle> {
        gate.check()?;
        if !settings.accepts_file(&file.name) {
            return Err(TransferError::UnsupportedFile(file.name));
        }

        let (tx, updates) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let storage = self.storage.clone();
        let folder = settings.upload_folder.clone();

        info!("Uploading {} ({} bytes) to '{}'", file.name, file.size, folder);

        tokio::spawn(async move {
            let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
            let mut tracker = ProgressTracker::default();

            let upload = storage.upload(&file, &folder, progress_tx);
            tokio::pin!(upload);

            let result = loop {
                tokio::select! {
                    biased;
                    Some(progress) = progress_rx.recv() => {
                        if let Some(pct) = tracker.observe(progress) {
                            let _ = tx.send(UploadUpdate::Progress(pct)).await;
                        }
                    }
                    result = &mut upload => break result,
                }
            };

            while let Ok(progress) = progress_rx.try_recv() {
                if let Some(pct) = tracker.observe(progress) {
                    let _ = tx.send(UploadUpdate::Progress(pct)).await;
                }
            }

            let terminal = match result {
                Ok(response) => {
                    debug!("Upload of {} stored at {}", file.name, response.stored_path());
                    UploadUpdate::Succeeded(response.stored_path().to_string())
                }
                Err(e) => {
                    warn!("Upload of {} failed: {}", file.name, e);
                    UploadUpdate::Failed(e.to_string())
                }
            };

            if tx.send(terminal).await.is_err() {
                debug!("Upload result for {} dropped, receiver gone", file.name);
            }
        });

        Ok(UploadHandle { updates })
    }
}
