//! Collaborator fakes for unit tests

use crate::device::{DeviceConnection, EndpointParams};
use crate::guard::{ConfirmationPrompt, DisruptionWarning, GuardDecision};
use crate::phase::Phase;
use crate::server::{
    remote_file_name, DeleteFileRequest, StartTransferRequest, StartTransferResponse,
    TransferServer,
};
use crate::upload::{ByteProgress, StorageEndpoint, UploadFile, UploadResponse};
use crate::{Result, TransferError, CAP_BINARY_FILE_TRANSFER};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{mpsc, Notify};

/// Storage endpoint that answers with a fixed path or error
pub struct MockStorage {
    result: std::result::Result<String, String>,
    uploads: Mutex<Vec<(String, String)>>,
    /// When set, uploads wait until notified
    gate: Option<Notify>,
}

impl MockStorage {
    pub fn succeeding(stored_path: &str) -> Self {
        Self {
            result: Ok(stored_path.to_string()),
            uploads: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            result: Err(reason.to_string()),
            uploads: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Uploads block until [`MockStorage::release`] is called
    pub fn held(stored_path: &str) -> Self {
        Self {
            gate: Some(Notify::new()),
            ..Self::succeeding(stored_path)
        }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    /// (file name, destination folder) of every upload started
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageEndpoint for MockStorage {
    async fn upload(
        &self,
        file: &UploadFile,
        destination_folder: &str,
        progress: mpsc::UnboundedSender<ByteProgress>,
    ) -> Result<UploadResponse> {
        self.uploads
            .lock()
            .unwrap()
            .push((file.name.clone(), destination_folder.to_string()));

        let total = file.size;
        for loaded in [0, total / 2, total] {
            let _ = progress.send(ByteProgress { loaded, total });
        }

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        match &self.result {
            Ok(path) => Ok(UploadResponse::local(file.name.clone(), path.clone())),
            Err(reason) => Err(TransferError::Upload(reason.clone())),
        }
    }
}

/// Device with scripted state that records link operations
pub struct MockDevice {
    operational: AtomicBool,
    printing: AtomicBool,
    capability: AtomicBool,
    endpoint: Mutex<Option<EndpointParams>>,
    connects: Mutex<Vec<EndpointParams>>,
    disconnects: AtomicUsize,
    fail_connect: AtomicBool,
}

impl MockDevice {
    pub fn ready() -> Self {
        Self {
            operational: AtomicBool::new(true),
            printing: AtomicBool::new(false),
            capability: AtomicBool::new(true),
            endpoint: Mutex::new(Some(EndpointParams::new("/dev/ttyACM0", 250000))),
            connects: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
        }
    }

    pub fn printing() -> Self {
        let device = Self::ready();
        device.set_printing(true);
        device
    }

    pub fn set_operational(&self, value: bool) {
        self.operational.store(value, Ordering::SeqCst);
    }

    pub fn set_printing(&self, value: bool) {
        self.printing.store(value, Ordering::SeqCst);
    }

    pub fn set_capability(&self, value: bool) {
        self.capability.store(value, Ordering::SeqCst);
    }

    pub fn set_endpoint(&self, endpoint: Option<EndpointParams>) {
        *self.endpoint.lock().unwrap() = endpoint;
    }

    pub fn fail_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    pub fn connects(&self) -> Vec<EndpointParams> {
        self.connects.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceConnection for MockDevice {
    fn is_operational(&self) -> bool {
        self.operational.load(Ordering::SeqCst)
    }

    fn is_printing(&self) -> bool {
        self.printing.load(Ordering::SeqCst)
    }

    fn has_capability(&self, capability: &str) -> bool {
        capability == CAP_BINARY_FILE_TRANSFER && self.capability.load(Ordering::SeqCst)
    }

    async fn current_endpoint(&self) -> Result<Option<EndpointParams>> {
        Ok(self.endpoint.lock().unwrap().clone())
    }

    async fn connect(&self, endpoint: &EndpointParams) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransferError::collaborator("port busy"));
        }
        self.connects.lock().unwrap().push(endpoint.clone());
        self.operational.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.operational.store(false, Ordering::SeqCst);
        self.printing.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Transfer server that records every command
pub struct MockServer {
    starts: Mutex<Vec<StartTransferRequest>>,
    phases: Mutex<Vec<Phase>>,
    deletes: Mutex<Vec<DeleteFileRequest>>,
    current_phase: Mutex<Phase>,
    reject_start: AtomicBool,
    fail_delete: AtomicBool,
}

impl MockServer {
    pub fn new() -> Self {
        Self {
            starts: Mutex::new(Vec::new()),
            phases: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
            current_phase: Mutex::new(Phase::Inactive),
            reject_start: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
        }
    }

    pub fn reject_start(&self) {
        self.reject_start.store(true, Ordering::SeqCst);
    }

    pub fn fail_delete(&self) {
        self.fail_delete.store(true, Ordering::SeqCst);
    }

    pub fn set_phase(&self, phase: Phase) {
        *self.current_phase.lock().unwrap() = phase;
    }

    pub fn starts(&self) -> Vec<StartTransferRequest> {
        self.starts.lock().unwrap().clone()
    }

    pub fn phase_commands(&self) -> Vec<Phase> {
        self.phases.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<DeleteFileRequest> {
        self.deletes.lock().unwrap().clone()
    }

    /// Total commands of any kind
    pub fn command_count(&self) -> usize {
        self.starts().len() + self.phase_commands().len() + self.deletes().len()
    }
}

#[async_trait]
impl TransferServer for MockServer {
    async fn start_transfer(
        &self,
        request: &StartTransferRequest,
    ) -> Result<StartTransferResponse> {
        self.starts.lock().unwrap().push(request.clone());
        if self.reject_start.load(Ordering::SeqCst) {
            return Err(TransferError::collaborator("409 Conflict"));
        }
        Ok(StartTransferResponse {
            remote_name: remote_file_name(&request.local_path),
        })
    }

    async fn change_phase(&self, phase: Phase) -> Result<()> {
        self.phases.lock().unwrap().push(phase);
        Ok(())
    }

    async fn delete_file(&self, request: &DeleteFileRequest) -> Result<()> {
        self.deletes.lock().unwrap().push(request.clone());
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(TransferError::collaborator("file is in use"));
        }
        Ok(())
    }

    async fn query_phase(&self) -> Result<Phase> {
        Ok(*self.current_phase.lock().unwrap())
    }
}

/// Prompt with a fixed answer, or one that never answers
pub struct ScriptedPrompt {
    answer: Option<GuardDecision>,
    asked: AtomicUsize,
}

impl ScriptedPrompt {
    pub fn answering(decision: GuardDecision) -> Self {
        Self {
            answer: Some(decision),
            asked: AtomicUsize::new(0),
        }
    }

    /// Never resolves; the coordinator has to cancel it
    pub fn pending() -> Self {
        Self {
            answer: None,
            asked: AtomicUsize::new(0),
        }
    }

    pub fn times_asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfirmationPrompt for ScriptedPrompt {
    async fn confirm(&self, _warning: &DisruptionWarning) -> GuardDecision {
        self.asked.fetch_add(1, Ordering::SeqCst);
        match self.answer {
            Some(decision) => decision,
            None => std::future::pending().await,
        }
    }
}
