//! BFT Connect Protocol
//!
//! Coordinates handing a firmware or file payload from a client to a printer
//! controller in three stages: upload to the server, server-side transfer to
//! the device over its serial link, and device-side completion. The client
//! view (phase and activity log) is kept in step with the phase and status
//! notifications the server pushes.
//!
//! The storage endpoint, the transfer server, the device connection, the
//! settings store and the confirmation dialog are external. They plug in
//! through the traits in [`upload`], [`server`], [`device`], [`settings`] and
//! [`guard`].

pub mod activity_log;
pub mod coordinator;
pub mod device;
pub mod gate;
pub mod guard;
pub mod phase;
pub mod policy;
pub mod server;
pub mod session;
pub mod settings;
pub mod state_machine;
pub mod upload;

mod error;

pub use activity_log::{ActivityLog, LogEntry};
pub use coordinator::{Collaborators, TransferCoordinator};
pub use device::{DeviceConnection, EndpointParams};
pub use error::{Result, TransferError};
pub use gate::{BlockedReason, ConnectionGate, READY_HELP_TEXT};
pub use guard::{ConfirmationPrompt, DisruptionGuard, DisruptionWarning, FixedPrompt, GuardDecision};
pub use phase::{Outcome, Phase, PhaseChange, SessionPhase};
pub use policy::{PolicyEngine, PolicyPlan, PolicyReport, ReconnectPlan};
pub use server::{
    remote_file_name, DeleteFileRequest, HandlerType, PushNotification, StartTransferRequest,
    StartTransferResponse, StorageTier, TransferServer,
};
pub use session::TransferSession;
pub use settings::{
    parse_command_line, DeleteUploadPolicy, MemorySettingsStore, SettingsManager, SettingsStore,
    TransferSettings, CAP_BINARY_FILE_TRANSFER,
};
pub use state_machine::{
    CoordinatorEvent, Effect, FileSelection, PanelSnapshot, PanelUpdate, PhaseStateMachine,
};
pub use upload::{
    ByteProgress, StorageEndpoint, UploadCoordinator, UploadFile, UploadHandle, UploadResponse,
    UploadUpdate,
};

#[cfg(test)]
pub mod test_utils;
