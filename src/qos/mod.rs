//! QoS reconciliation: desired queue records in the store are pushed to devices through
//! per-vendor clients.

pub mod cache;
pub mod client;
pub mod registry;
pub mod routeros;
pub mod service;

#[cfg(test)]
pub mod testing;

use std::time::Duration;

use sea_orm::DbErr;
use thiserror::Error;

pub use self::client::{ConnectParams, QueueConfig, VendorClient, VendorConnector, VendorError};
pub use self::registry::VendorRegistry;
pub use self::service::{QosService, SyncSummary};

#[derive(Error, Debug)]
pub enum QosError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Capability disabled: {0}")]
    CapabilityDisabled(String),
    #[error("Unsupported vendor: {0}")]
    UnsupportedVendor(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Vendor error: {0}")]
    Vendor(#[from] VendorError),
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

/// Batch sizes and the retry cap shared by the periodic sweep and manual triggers.
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    /// Failed records stop being selected once `retry_count` reaches this value.
    pub max_retries: i32,
    pub pending_batch: u64,
    pub failed_batch: u64,
    pub vendor_timeout: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            pending_batch: 100,
            failed_batch: 50,
            vendor_timeout: Duration::from_secs(3),
        }
    }
}

impl SyncPolicy {
    pub fn allows_retry(&self, retry_count: i32) -> bool {
        retry_count < self.max_retries
    }
}
