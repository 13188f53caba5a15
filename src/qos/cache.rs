//! Live vendor connections shared across reconciliation runs, one per device address.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::client::{VendorClient, VendorError};

#[derive(Default)]
pub struct ConnectionCache {
    clients: Mutex<HashMap<String, Arc<dyn VendorClient>>>,
}

fn same_client(a: &Arc<dyn VendorClient>, b: &Arc<dyn VendorClient>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl ConnectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached client for `address`, connecting with `connect` when there is
    /// none. The lock is not held while connecting; if another caller cached a client for
    /// the same address in the meantime, the fresh one is closed and the cached one wins.
    pub async fn get_or_connect<F, Fut>(
        &self,
        address: &str,
        connect: F,
    ) -> Result<Arc<dyn VendorClient>, VendorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn VendorClient>, VendorError>>,
    {
        if let Some(client) = self.clients.lock().await.get(address) {
            return Ok(client.clone());
        }

        let fresh = connect().await?;

        let mut clients = self.clients.lock().await;
        if let Some(existing) = clients.get(address) {
            let existing = existing.clone();
            drop(clients);
            if let Err(e) = fresh.close().await {
                debug!(address = %address, error = %e, "Failed to close redundant connection.");
            }
            return Ok(existing);
        }
        clients.insert(address.to_owned(), fresh.clone());
        debug!(address = %address, "Cached new vendor connection.");
        Ok(fresh)
    }

    /// Drops and closes the cached client for `address`, but only if it is still `client`.
    pub async fn evict(&self, address: &str, client: &Arc<dyn VendorClient>) {
        let removed = {
            let mut clients = self.clients.lock().await;
            match clients.get(address) {
                Some(cached) if same_client(cached, client) => clients.remove(address),
                _ => None,
            }
        };
        if let Some(client) = removed {
            debug!(address = %address, "Evicting vendor connection.");
            if let Err(e) = client.close().await {
                warn!(address = %address, error = %e, "Error closing evicted connection.");
            }
        }
    }

    pub async fn close_all(&self) {
        let drained: Vec<(String, Arc<dyn VendorClient>)> =
            self.clients.lock().await.drain().collect();
        for (address, client) in drained {
            if let Err(e) = client.close().await {
                warn!(address = %address, error = %e, "Error closing cached connection.");
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }
}
