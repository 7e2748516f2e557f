//! Device connection surface
//!
//! The physical link to the printer is owned by an external connection
//! manager. This module only describes what the coordinator needs from it.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Parameters needed to reopen the device link
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointParams {
    /// Serial port, e.g. `/dev/ttyACM0`
    pub port: String,
    pub baudrate: u32,
}

impl EndpointParams {
    pub fn new(port: impl Into<String>, baudrate: u32) -> Self {
        Self {
            port: port.into(),
            baudrate,
        }
    }
}

impl fmt::Display for EndpointParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.port, self.baudrate)
    }
}

/// Connection manager for the device link
///
/// State queries are synchronous snapshots; link operations are async.
#[async_trait]
pub trait DeviceConnection: Send + Sync {
    /// Link is open and the device accepts commands
    fn is_operational(&self) -> bool;

    /// Device is running a job that a disconnect would interrupt
    fn is_printing(&self) -> bool;

    /// Device firmware reported the given capability
    fn has_capability(&self, capability: &str) -> bool;

    /// Endpoint of the currently selected connection, if any
    async fn current_endpoint(&self) -> Result<Option<EndpointParams>>;

    async fn connect(&self, endpoint: &EndpointParams) -> Result<()>;

    /// Close the link; resolves once the link is down
    async fn disconnect(&self) -> Result<()>;
}
