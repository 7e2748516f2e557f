//! Fakes built on the public collaborator traits

#![allow(dead_code)]

use async_trait::async_trait;
use bft_connect_protocol::{
    remote_file_name, ByteProgress, Collaborators, DeleteFileRequest, DeviceConnection,
    EndpointParams, FixedPrompt, GuardDecision, MemorySettingsStore, Phase, Result,
    SettingsManager, StartTransferRequest, StartTransferResponse, StorageEndpoint,
    TransferCoordinator, TransferError, TransferServer, TransferSettings, UploadFile,
    UploadResponse, CAP_BINARY_FILE_TRANSFER,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub const STORED: &str = "marlinbft/fw.bin";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("bft_connect_protocol=debug")
        .with_test_writer()
        .try_init();
}

pub struct Storage;

#[async_trait]
impl StorageEndpoint for Storage {
    async fn upload(
        &self,
        file: &UploadFile,
        folder: &str,
        progress: mpsc::UnboundedSender<ByteProgress>,
    ) -> Result<UploadResponse> {
        let _ = progress.send(ByteProgress {
            loaded: file.size,
            total: file.size,
        });
        Ok(UploadResponse::local(
            file.name.clone(),
            format!("{}/{}", folder, file.name),
        ))
    }
}

#[derive(Default)]
pub struct Server {
    pub reject_start: AtomicBool,
    pub fail_delete: AtomicBool,
    pub starts: Mutex<Vec<StartTransferRequest>>,
    pub deletes: Mutex<Vec<DeleteFileRequest>>,
}

#[async_trait]
impl TransferServer for Server {
    async fn start_transfer(
        &self,
        request: &StartTransferRequest,
    ) -> Result<StartTransferResponse> {
        self.starts.lock().unwrap().push(request.clone());
        if self.reject_start.load(Ordering::SeqCst) {
            return Err(TransferError::collaborator("transfer already running"));
        }
        Ok(StartTransferResponse {
            remote_name: remote_file_name(&request.local_path),
        })
    }

    async fn change_phase(&self, _phase: Phase) -> Result<()> {
        Ok(())
    }

    async fn delete_file(&self, request: &DeleteFileRequest) -> Result<()> {
        self.deletes.lock().unwrap().push(request.clone());
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(TransferError::collaborator("file locked"));
        }
        Ok(())
    }

    async fn query_phase(&self) -> Result<Phase> {
        Ok(Phase::Inactive)
    }
}

pub struct Device {
    pub operational: AtomicBool,
    pub fail_connect: AtomicBool,
    pub connects: Mutex<Vec<EndpointParams>>,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            operational: AtomicBool::new(true),
            fail_connect: AtomicBool::new(false),
            connects: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DeviceConnection for Device {
    fn is_operational(&self) -> bool {
        self.operational.load(Ordering::SeqCst)
    }

    fn is_printing(&self) -> bool {
        false
    }

    fn has_capability(&self, capability: &str) -> bool {
        capability == CAP_BINARY_FILE_TRANSFER
    }

    async fn current_endpoint(&self) -> Result<Option<EndpointParams>> {
        Ok(Some(EndpointParams::new("/dev/ttyACM0", 250000)))
    }

    async fn connect(&self, endpoint: &EndpointParams) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransferError::collaborator("port in use"));
        }
        self.connects.lock().unwrap().push(endpoint.clone());
        self.operational.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.operational.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub async fn coordinator(
    settings: TransferSettings,
    server: Arc<Server>,
    device: Arc<Device>,
) -> TransferCoordinator {
    let manager = SettingsManager::load(Arc::new(MemorySettingsStore::new(settings)))
        .await
        .unwrap();
    TransferCoordinator::start(
        Collaborators {
            storage: Arc::new(Storage),
            server,
            device,
            prompt: Arc::new(FixedPrompt(GuardDecision::Allow)),
        },
        Arc::new(manager),
    )
}

pub fn firmware() -> UploadFile {
    UploadFile {
        name: "fw.bin".to_string(),
        path: PathBuf::from("fw.bin"),
        size: 1024,
    }
}
