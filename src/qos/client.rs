use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::entities::nas_device;

/// Vendor-neutral description of a bandwidth queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    pub up_rate_kbps: i64,
    pub down_rate_kbps: i64,
    /// Vendor-specific knobs, e.g. `target` for the subscriber address.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl QueueConfig {
    pub fn extra_str(&self, key: &str) -> Option<String> {
        match self.extra.get(key)? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(if *b { "yes" } else { "no" }.to_string()),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum VendorError {
    #[error("Connection to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },
    #[error("Operation timed out: {0}")]
    Timeout(String),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Device rejected the request: {0}")]
    Trap(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),
    #[error("Queue not found on device: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where and how to reach a device's management interface.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl ConnectParams {
    /// Builds the parameters from a device row; `None` when the API credentials are
    /// missing or the port is out of range.
    pub fn from_device(device: &nas_device::Model, timeout: Duration) -> Option<Self> {
        let (username, password) = device.api_credentials()?;
        let port = u16::try_from(device.api_port).ok().filter(|p| *p != 0)?;
        Some(Self {
            host: device.ipaddr.clone(),
            port,
            username: username.to_owned(),
            password: password.to_owned(),
            timeout,
        })
    }

    /// Key used by the connection cache.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Queue operations every vendor adapter provides. An instance owns one device
/// connection; `close` releases it.
#[async_trait]
pub trait VendorClient: Send + Sync {
    /// Creates the queue and returns the vendor-assigned object id.
    async fn create_queue(&self, config: &QueueConfig) -> Result<String, VendorError>;
    async fn delete_queue(&self, remote_id: &str) -> Result<(), VendorError>;
    async fn update_queue(&self, remote_id: &str, config: &QueueConfig) -> Result<(), VendorError>;
    async fn get_queue(&self, remote_id: &str) -> Result<QueueConfig, VendorError>;
    /// Device name as the management API reports it. Doubles as a liveness check.
    async fn identity(&self) -> Result<String, VendorError>;
    async fn close(&self) -> Result<(), VendorError>;
}

/// Opens vendor clients. One connector is registered per vendor code.
#[async_trait]
pub trait VendorConnector: Send + Sync {
    async fn connect(
        &self,
        params: &ConnectParams,
    ) -> Result<std::sync::Arc<dyn VendorClient>, VendorError>;
}
