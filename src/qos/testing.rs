//! Scripted vendor client and connector for the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::client::{ConnectParams, QueueConfig, VendorClient, VendorConnector, VendorError};

#[derive(Default)]
pub struct ScriptedClient {
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
    closes: AtomicUsize,
    fail_create: AtomicBool,
    fail_update: AtomicBool,
    fail_delete: AtomicBool,
    create_delay_ms: AtomicU64,
}

impl ScriptedClient {
    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_update(&self, fail: bool) {
        self.fail_update.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Makes every create take `delay` before answering.
    pub fn slow_create(&self, delay: Duration) {
        self.create_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl VendorClient for ScriptedClient {
    async fn create_queue(&self, _config: &QueueConfig) -> Result<String, VendorError> {
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(VendorError::Timeout("scripted create failure".into()));
        }
        Ok(format!("*{n:X}"))
    }

    async fn delete_queue(&self, _remote_id: &str) -> Result<(), VendorError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(VendorError::Trap("scripted delete failure".into()));
        }
        Ok(())
    }

    async fn update_queue(
        &self,
        _remote_id: &str,
        _config: &QueueConfig,
    ) -> Result<(), VendorError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(VendorError::Protocol("scripted update failure".into()));
        }
        Ok(())
    }

    async fn get_queue(&self, remote_id: &str) -> Result<QueueConfig, VendorError> {
        Err(VendorError::NotFound(remote_id.to_owned()))
    }

    async fn identity(&self) -> Result<String, VendorError> {
        Ok("scripted".to_string())
    }

    async fn close(&self) -> Result<(), VendorError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out the same scripted client on every connect.
pub struct ScriptedConnector {
    client: Arc<ScriptedClient>,
    connects: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(client: Arc<ScriptedClient>) -> Self {
        Self {
            client,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VendorConnector for ScriptedConnector {
    async fn connect(&self, _params: &ConnectParams) -> Result<Arc<dyn VendorClient>, VendorError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.client.clone())
    }
}
