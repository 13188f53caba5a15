use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use super::cache::ConnectionCache;
use super::client::{ConnectParams, QueueConfig, VendorClient};
use super::registry::VendorRegistry;
use super::{QosError, SyncPolicy};
use crate::db::entities::{nas_device, qos_audit_log, qos_queue};
use crate::db::enums::{AuditAction, QueueStatus, RunResult};
use crate::db::repository::{
    AuditRepository, DeviceDirectory, QueueFilter, QueueRepository, UserDirectory,
};

pub const POLICY_TYPE_SIMPLE: &str = "simple";
pub const COMM_METHOD_API: &str = "api";

/// Outcome of one batch of reconciliations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub processed: usize,
    pub synced: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub last_error: Option<String>,
}

impl SyncSummary {
    fn record<T>(&mut self, result: &Result<T, QosError>) {
        self.processed += 1;
        match result {
            Ok(_) => self.synced += 1,
            Err(e) => {
                self.failed += 1;
                self.last_error = Some(e.to_string());
            }
        }
    }
}

fn desired_config(record: &qos_queue::Model) -> QueueConfig {
    QueueConfig {
        name: record.policy_name.clone(),
        up_rate_kbps: record.up_rate_kbps,
        down_rate_kbps: record.down_rate_kbps,
        extra: record
            .extra_config
            .as_ref()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default(),
    }
}

/// Keeps queue records and device-side queues in agreement.
pub struct QosService {
    queues: Arc<dyn QueueRepository>,
    audits: Arc<dyn AuditRepository>,
    devices: Arc<dyn DeviceDirectory>,
    users: Arc<dyn UserDirectory>,
    registry: VendorRegistry,
    cache: ConnectionCache,
    policy: SyncPolicy,
    /// Held for every device-side change so a pending record is never created twice.
    sweep_lock: tokio::sync::Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl QosService {
    pub fn new(
        queues: Arc<dyn QueueRepository>,
        audits: Arc<dyn AuditRepository>,
        devices: Arc<dyn DeviceDirectory>,
        users: Arc<dyn UserDirectory>,
        registry: VendorRegistry,
        policy: SyncPolicy,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            queues,
            audits,
            devices,
            users,
            registry,
            cache: ConnectionCache::new(),
            policy,
            sweep_lock: tokio::sync::Mutex::new(()),
            shutdown_tx,
            loop_handle: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    pub async fn cached_connections(&self) -> usize {
        self.cache.len().await
    }

    /// Spawns the periodic sweep loop and returns immediately. Calling it again while the
    /// loop runs is a no-op.
    pub fn start(self: &Arc<Self>, interval: Duration) {
        let mut slot = self
            .loop_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!("QoS reconciliation loop is already running.");
            return;
        }

        self.shutdown_tx.send_replace(false);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let service = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "QoS reconciliation loop started.");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let summary = service.run_sweep().await;
                        if summary.processed > 0 {
                            info!(
                                processed = summary.processed,
                                synced = summary.synced,
                                failed = summary.failed,
                                duration_ms = summary.duration_ms,
                                "QoS sweep finished."
                            );
                        }
                    }
                }
            }
            info!("QoS reconciliation loop stopped.");
        }));
    }

    /// Stops the loop, waits for any sweep in flight and closes every cached connection.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        let handle = self
            .loop_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "QoS reconciliation loop ended abnormally.");
            }
        }

        // Sweeps started by the dispatcher or an operator do not run on the loop task.
        let _guard = self.sweep_lock.lock().await;
        self.cache.close_all().await;
        info!("QoS reconciliation service stopped.");
    }

    /// Inserts a pending record for the pair, derived from the user's rate plan.
    pub async fn create_queue(
        &self,
        user_id: i64,
        device_id: i64,
    ) -> Result<qos_queue::Model, QosError> {
        let user = self
            .users
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| QosError::NotFound(format!("user {user_id}")))?;
        let device = self.find_device(device_id).await?;
        if !device.qos_enabled {
            return Err(QosError::CapabilityDisabled(format!(
                "QoS is disabled on device {}",
                device.name
            )));
        }
        if self
            .queues
            .get_by_user_and_device(user_id, device_id)
            .await?
            .is_some()
        {
            return Err(QosError::AlreadyExists(format!(
                "queue for user {user_id} on device {device_id}"
            )));
        }

        let extra = user
            .ip_addr
            .as_deref()
            .filter(|ip| !ip.is_empty())
            .map(|ip| json!({ "target": ip }));
        let now = Utc::now();
        let record = qos_queue::Model {
            id: 0,
            user_id,
            device_id,
            device_addr: device.ipaddr.clone(),
            vendor_code: device.vendor_code.clone(),
            policy_name: format!("qos-{}", user.username),
            policy_type: POLICY_TYPE_SIMPLE.to_string(),
            up_rate_kbps: user.up_rate_kbps,
            down_rate_kbps: user.down_rate_kbps,
            comm_method: COMM_METHOD_API.to_string(),
            extra_config: extra,
            remote_id: String::new(),
            status: QueueStatus::Pending,
            last_error: String::new(),
            retry_count: 0,
            created_at: now,
            updated_at: now,
            synced_at: None,
        };
        let created = self.queues.create(record).await?;
        info!(queue_id = created.id, user_id, device_id, "Created pending QoS queue.");
        Ok(created)
    }

    /// Removes the record. A failing remote delete is logged and audited but the local
    /// record goes regardless.
    pub async fn delete_queue(&self, user_id: i64, device_id: i64) -> Result<(), QosError> {
        let _guard = self.sweep_lock.lock().await;
        let record = self
            .queues
            .get_by_user_and_device(user_id, device_id)
            .await?
            .ok_or_else(|| {
                QosError::NotFound(format!("queue for user {user_id} on device {device_id}"))
            })?;

        if record.has_remote_object() {
            let outcome = self.delete_remote(&record).await;
            if let Err(e) = &outcome {
                warn!(
                    queue_id = record.id,
                    remote_id = %record.remote_id,
                    error = %e,
                    "Remote queue delete failed; removing local record anyway."
                );
            }
            let response = outcome.map(|_| json!({ "removed": record.remote_id }));
            self.audit(&record, AuditAction::Delete, None, response.as_ref())
                .await;
        }

        self.queues.delete(record.id).await?;
        info!(queue_id = record.id, user_id, device_id, "Deleted QoS queue.");
        Ok(())
    }

    async fn delete_remote(&self, record: &qos_queue::Model) -> Result<(), QosError> {
        let device = self.find_device(record.device_id).await?;
        let (address, client) = self.client_for(&device).await?;
        if let Err(e) = client.delete_queue(&record.remote_id).await {
            self.cache.evict(&address, &client).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Reconciles one record now. The stored copy is re-read once no sweep is running,
    /// so a record synced in the meantime gets an update instead of a second create.
    pub async fn sync_queue(
        &self,
        record: qos_queue::Model,
    ) -> Result<qos_queue::Model, QosError> {
        let _guard = self.sweep_lock.lock().await;
        let current = self
            .queues
            .get_by_id(record.id)
            .await?
            .ok_or_else(|| QosError::NotFound(format!("queue {}", record.id)))?;
        self.reconcile(current).await
    }

    /// Pushes one record to its device and persists the outcome. Callers hold
    /// `sweep_lock`.
    #[instrument(skip(self, record), fields(queue_id = record.id))]
    async fn reconcile(&self, record: qos_queue::Model) -> Result<qos_queue::Model, QosError> {
        let action = if record.has_remote_object() {
            AuditAction::Update
        } else {
            AuditAction::Create
        };
        let config = desired_config(&record);
        let request = serde_json::to_value(&config).ok();

        match self.push(&record, &config).await {
            Ok((device, remote_id)) => {
                let response = json!({ "remote_id": remote_id });
                let mut synced = record.clone();
                synced.remote_id = remote_id;
                synced.device_addr = device.ipaddr;
                synced.vendor_code = device.vendor_code;
                synced.status = QueueStatus::Synced;
                synced.last_error.clear();
                synced.retry_count = 0;
                synced.synced_at = Some(Utc::now());

                let saved = self.queues.update(synced).await.inspect_err(|e| {
                    error!(error = %e, "Queue synced on device but the record could not be saved.");
                })?;
                self.audit(&saved, action, request, Ok(&response)).await;
                debug!(remote_id = %saved.remote_id, "QoS queue synced.");
                Ok(saved)
            }
            Err(err) => {
                self.record_failure(&record, &err).await;
                self.audit(&record, action, request, Err(&err)).await;
                Err(err)
            }
        }
    }

    /// Creates or updates the device-side queue; yields the resolved device and remote id.
    async fn push(
        &self,
        record: &qos_queue::Model,
        config: &QueueConfig,
    ) -> Result<(nas_device::Model, String), QosError> {
        let device = self.find_device(record.device_id).await?;
        if !device.qos_enabled {
            return Err(QosError::CapabilityDisabled(format!(
                "QoS is disabled on device {}",
                device.name
            )));
        }
        let (address, client) = self.client_for(&device).await?;

        let result = if record.has_remote_object() {
            client
                .update_queue(&record.remote_id, config)
                .await
                .map(|_| record.remote_id.clone())
        } else {
            client.create_queue(config).await
        };

        match result {
            Ok(remote_id) => Ok((device, remote_id)),
            Err(e) => {
                self.cache.evict(&address, &client).await;
                Err(e.into())
            }
        }
    }

    async fn record_failure(&self, record: &qos_queue::Model, err: &QosError) {
        let message = err.to_string();
        warn!(
            queue_id = record.id,
            device_id = record.device_id,
            error = %message,
            "QoS queue sync failed."
        );

        // Synced records keep their state; the device still holds the last pushed config.
        if record.status == QueueStatus::Synced {
            return;
        }

        let persisted = if matches!(err, QosError::UnsupportedVendor(_)) {
            let mut dormant = record.clone();
            dormant.status = QueueStatus::Failed;
            dormant.last_error = message;
            dormant.retry_count = (record.retry_count + 1).max(self.policy.max_retries);
            self.queues.update(dormant).await.map(|_| ())
        } else {
            match self
                .queues
                .update_status(record.id, QueueStatus::Failed, &message)
                .await
            {
                Ok(()) => self.queues.increment_retry(record.id).await,
                Err(e) => Err(e),
            }
        };

        if let Err(e) = persisted {
            error!(queue_id = record.id, error = %e, "Failed to persist QoS failure state.");
        }
    }

    async fn audit(
        &self,
        record: &qos_queue::Model,
        action: AuditAction,
        request: Option<serde_json::Value>,
        outcome: Result<&serde_json::Value, &QosError>,
    ) {
        let (result, response, error_message) = match outcome {
            Ok(response) => (RunResult::Success, Some(response.clone()), None),
            Err(e) => (RunResult::Failed, None, Some(e.to_string())),
        };
        let entry = qos_audit_log::Model {
            id: 0,
            queue_id: record.id,
            user_id: record.user_id,
            device_id: record.device_id,
            action: action.as_str().to_string(),
            result: result.as_str().to_string(),
            request_payload: request,
            response_payload: response,
            error_message,
            executed_at: Utc::now(),
        };
        if let Err(e) = self.audits.create(entry).await {
            error!(queue_id = record.id, error = %e, "Failed to write QoS audit entry.");
        }
    }

    async fn find_device(&self, device_id: i64) -> Result<nas_device::Model, QosError> {
        self.devices
            .get_by_id(device_id)
            .await?
            .ok_or_else(|| QosError::NotFound(format!("device {device_id}")))
    }

    async fn client_for(
        &self,
        device: &nas_device::Model,
    ) -> Result<(String, Arc<dyn VendorClient>), QosError> {
        let connector = self
            .registry
            .get(&device.vendor_code)
            .ok_or_else(|| QosError::UnsupportedVendor(device.vendor_code.clone()))?;
        let params = ConnectParams::from_device(device, self.policy.vendor_timeout)
            .ok_or_else(|| {
                QosError::CapabilityDisabled(format!(
                    "device {} has no usable management API credentials",
                    device.name
                ))
            })?;
        let address = params.address();
        let client = self
            .cache
            .get_or_connect(&address, || async { connector.connect(&params).await })
            .await?;
        Ok((address, client))
    }

    /// One reconciliation pass: pending records first, then failed records below the
    /// retry cap that were not already handled in this pass.
    #[instrument(skip(self))]
    pub async fn run_sweep(&self) -> SyncSummary {
        let _guard = self.sweep_lock.lock().await;
        let started = Instant::now();
        let mut summary = SyncSummary::default();
        let mut handled = HashSet::new();

        match self.queues.get_pending(self.policy.pending_batch).await {
            Ok(records) => {
                for record in records {
                    handled.insert(record.id);
                    let result = self.reconcile(record).await;
                    summary.record(&result);
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to load pending QoS queues.");
                summary.last_error = Some(e.to_string());
            }
        }

        // Records that just failed in the pending phase must not take up failed slots.
        let failed_limit = self.policy.failed_batch + handled.len() as u64;
        match self
            .queues
            .get_failed(failed_limit, self.policy.max_retries)
            .await
        {
            Ok(records) => {
                let retryable = records
                    .into_iter()
                    .filter(|r| !handled.contains(&r.id))
                    .take(self.policy.failed_batch as usize);
                for record in retryable {
                    let result = self.reconcile(record).await;
                    summary.record(&result);
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to load failed QoS queues.");
                summary.last_error = Some(e.to_string());
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        summary
    }

    /// Reconciles the pending and retryable records of one device now.
    #[instrument(skip(self))]
    pub async fn sync_device(&self, device_id: i64) -> Result<SyncSummary, QosError> {
        self.find_device(device_id).await?;
        let _guard = self.sweep_lock.lock().await;
        let started = Instant::now();
        let mut summary = SyncSummary::default();

        let pending_filter = QueueFilter {
            device_id: Some(device_id),
            status: Some(QueueStatus::Pending),
            ..Default::default()
        };
        let (pending, _) = self
            .queues
            .list(&pending_filter, 1, self.policy.pending_batch)
            .await?;

        let failed_filter = QueueFilter {
            status: Some(QueueStatus::Failed),
            ..pending_filter
        };
        let (failed, _) = self
            .queues
            .list(&failed_filter, 1, self.policy.failed_batch)
            .await?;

        let retryable = failed
            .into_iter()
            .filter(|r| self.policy.allows_retry(r.retry_count));
        for record in pending.into_iter().chain(retryable) {
            let result = self.reconcile(record).await;
            summary.record(&result);
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            device_id,
            processed = summary.processed,
            failed = summary.failed,
            "Manual QoS sync finished."
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{MemoryStore, fixtures};
    use crate::qos::registry::VENDOR_MIKROTIK;
    use crate::qos::testing::{ScriptedClient, ScriptedConnector};

    struct Harness {
        store: Arc<MemoryStore>,
        client: Arc<ScriptedClient>,
        connector: Arc<ScriptedConnector>,
        service: Arc<QosService>,
    }

    fn harness() -> Harness {
        harness_with(SyncPolicy::default())
    }

    fn harness_with(policy: SyncPolicy) -> Harness {
        let store = Arc::new(MemoryStore::new());
        store.insert_device(fixtures::device(1));
        store.insert_user(fixtures::user(1));
        store.insert_user(fixtures::user(2));

        let client = Arc::new(ScriptedClient::default());
        let connector = Arc::new(ScriptedConnector::new(client.clone()));
        let mut registry = VendorRegistry::new();
        registry.register(VENDOR_MIKROTIK, connector.clone());

        let service = Arc::new(QosService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            registry,
            policy,
        ));
        Harness {
            store,
            client,
            connector,
            service,
        }
    }

    #[tokio::test]
    async fn test_create_queue_derives_config_from_user() {
        let h = harness();
        let record = h.service.create_queue(1, 1).await.unwrap();

        assert_eq!(record.status, QueueStatus::Pending);
        assert_eq!(record.policy_name, "qos-user1");
        assert_eq!(record.policy_type, POLICY_TYPE_SIMPLE);
        assert_eq!(record.comm_method, COMM_METHOD_API);
        assert_eq!((record.up_rate_kbps, record.down_rate_kbps), (2048, 10240));
        assert_eq!(record.device_addr, "10.0.0.1");
        assert_eq!(record.extra_config, Some(json!({ "target": "100.64.0.1" })));
        assert!(record.remote_id.is_empty());

        let err = h.service.create_queue(1, 1).await.unwrap_err();
        assert!(matches!(err, QosError::AlreadyExists(_)));
        assert_eq!(h.store.queues().len(), 1);
    }

    #[tokio::test]
    async fn test_create_queue_on_disabled_device_is_rejected() {
        let h = harness();
        h.store.set_device_qos(1, false);

        let err = h.service.create_queue(1, 1).await.unwrap_err();
        assert!(matches!(err, QosError::CapabilityDisabled(_)));
        assert!(h.store.queues().is_empty());
    }

    #[tokio::test]
    async fn test_create_queue_unknown_user_or_device() {
        let h = harness();
        assert!(matches!(
            h.service.create_queue(42, 1).await.unwrap_err(),
            QosError::NotFound(_)
        ));
        assert!(matches!(
            h.service.create_queue(1, 42).await.unwrap_err(),
            QosError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_sweep_syncs_pending_record() {
        let h = harness();
        let created = h.service.create_queue(1, 1).await.unwrap();

        let summary = h.service.run_sweep().await;
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.synced, 1);
        assert_eq!(summary.failed, 0);

        let stored = h.store.queue(created.id).unwrap();
        assert_eq!(stored.status, QueueStatus::Synced);
        assert_eq!(stored.remote_id, "*1");
        assert!(stored.last_error.is_empty());
        assert!(stored.synced_at.unwrap() >= stored.created_at);

        let audits = h.store.audits();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].action, "create");
        assert_eq!(audits[0].result, "success");
        assert_eq!(audits[0].queue_id, created.id);
    }

    #[tokio::test]
    async fn test_resync_of_synced_record_updates_instead_of_creating() {
        let h = harness();
        let created = h.service.create_queue(1, 1).await.unwrap();
        h.service.run_sweep().await;

        let synced = h.store.queue(created.id).unwrap();
        let again = h.service.sync_queue(synced).await.unwrap();

        assert_eq!(h.client.create_calls(), 1);
        assert_eq!(h.client.update_calls(), 1);
        assert_eq!(again.remote_id, "*1");
        assert_eq!(again.status, QueueStatus::Synced);
    }

    #[tokio::test]
    async fn test_concurrent_sweeps_create_queue_once() {
        let h = harness();
        let created = h.service.create_queue(1, 1).await.unwrap();
        h.client.slow_create(Duration::from_millis(50));

        let (first, second) = tokio::join!(h.service.run_sweep(), h.service.run_sweep());
        assert_eq!(first.synced + second.synced, 1);
        assert_eq!(h.client.create_calls(), 1);
        assert_eq!(h.store.queue(created.id).unwrap().remote_id, "*1");

        let stale = created.clone();
        let (swept, synced) = tokio::join!(h.service.sync_device(1), h.service.sync_queue(stale));
        assert_eq!(swept.unwrap().processed, 0);
        assert_eq!(synced.unwrap().remote_id, "*1");
        assert_eq!(h.client.create_calls(), 1);
        assert_eq!(h.client.update_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_update_keeps_synced_record_synced() {
        let h = harness();
        let created = h.service.create_queue(1, 1).await.unwrap();
        h.service.run_sweep().await;
        h.client.fail_update(true);

        let synced = h.store.queue(created.id).unwrap();
        assert!(h.service.sync_queue(synced).await.is_err());

        let stored = h.store.queue(created.id).unwrap();
        assert_eq!(stored.status, QueueStatus::Synced);
        assert_eq!(stored.remote_id, "*1");
        assert_eq!(stored.retry_count, 0);
        assert!(stored.last_error.is_empty());

        let audits = h.store.audits();
        let update = audits.iter().find(|a| a.action == "update").unwrap();
        assert_eq!(update.result, "failed");
        assert_eq!(h.service.run_sweep().await.processed, 0);
    }

    #[tokio::test]
    async fn test_sync_queue_of_removed_record_is_not_found() {
        let h = harness();
        let created = h.service.create_queue(1, 1).await.unwrap();
        h.service.delete_queue(1, 1).await.unwrap();

        assert!(matches!(
            h.service.sync_queue(created).await.unwrap_err(),
            QosError::NotFound(_)
        ));
        assert_eq!(h.client.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_pending_failures_do_not_crowd_out_failed_batch() {
        let h = harness_with(SyncPolicy {
            failed_batch: 1,
            ..SyncPolicy::default()
        });
        let older = h.service.create_queue(1, 1).await.unwrap();
        let retrying = h.service.create_queue(2, 1).await.unwrap();
        QueueRepository::update_status(
            h.store.as_ref(),
            retrying.id,
            QueueStatus::Failed,
            "timeout",
        )
        .await
        .unwrap();
        QueueRepository::increment_retry(h.store.as_ref(), retrying.id)
            .await
            .unwrap();
        h.client.fail_create(true);

        let summary = h.service.run_sweep().await;
        assert_eq!(summary.processed, 2);
        assert_eq!(h.client.create_calls(), 2);
        assert_eq!(h.store.queue(older.id).unwrap().retry_count, 1);
        assert_eq!(h.store.queue(retrying.id).unwrap().retry_count, 2);
    }

    #[tokio::test]
    async fn test_three_failing_sweeps_make_record_dormant() {
        let h = harness();
        let created = h.service.create_queue(1, 1).await.unwrap();
        h.client.fail_create(true);

        for expected_retries in 1..=3 {
            let summary = h.service.run_sweep().await;
            assert_eq!(summary.processed, 1);
            assert_eq!(summary.failed, 1);
            assert!(summary.last_error.is_some());

            let stored = h.store.queue(created.id).unwrap();
            assert_eq!(stored.status, QueueStatus::Failed);
            assert_eq!(stored.retry_count, expected_retries);
            assert!(!stored.last_error.is_empty());
        }

        let failed = QueueRepository::get_failed(h.store.as_ref(), 50, 3).await.unwrap();
        assert!(failed.is_empty());

        let summary = h.service.run_sweep().await;
        assert_eq!(summary.processed, 0);
        assert_eq!(h.client.create_calls(), 3);
        assert_eq!(
            h.store.audits().iter().filter(|a| a.result == "failed").count(),
            3
        );
    }

    #[tokio::test]
    async fn test_failed_record_recovers_on_next_sweep() {
        let h = harness();
        let created = h.service.create_queue(1, 1).await.unwrap();
        h.client.fail_create(true);
        h.service.run_sweep().await;

        h.client.fail_create(false);
        let summary = h.service.run_sweep().await;
        assert_eq!(summary.synced, 1);

        let stored = h.store.queue(created.id).unwrap();
        assert_eq!(stored.status, QueueStatus::Synced);
        assert_eq!(stored.retry_count, 0);
        assert!(stored.last_error.is_empty());
    }

    #[tokio::test]
    async fn test_vendor_error_evicts_cached_connection() {
        let h = harness();
        h.service.create_queue(1, 1).await.unwrap();
        h.service.create_queue(2, 1).await.unwrap();

        h.service.run_sweep().await;
        assert_eq!(h.connector.connects(), 1);
        assert_eq!(h.service.cached_connections().await, 1);

        let mut record = h.store.queues()[0].clone();
        h.client.fail_update(true);
        assert!(h.service.sync_queue(record.clone()).await.is_err());
        assert_eq!(h.service.cached_connections().await, 0);
        assert_eq!(h.client.close_calls(), 1);

        h.client.fail_update(false);
        record = h.store.queue(record.id).unwrap();
        h.service.sync_queue(record).await.unwrap();
        assert_eq!(h.connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_vendor_goes_dormant_immediately() {
        let h = harness();
        let mut device = fixtures::device(2);
        device.vendor_code = "9".into();
        h.store.insert_device(device);
        let created = h.service.create_queue(1, 2).await.unwrap();

        let summary = h.service.run_sweep().await;
        assert_eq!(summary.failed, 1);

        let stored = h.store.queue(created.id).unwrap();
        assert_eq!(stored.status, QueueStatus::Failed);
        assert_eq!(stored.retry_count, 3);
        assert!(stored.last_error.contains("Unsupported vendor"));
        assert_eq!(h.service.run_sweep().await.processed, 0);
    }

    #[tokio::test]
    async fn test_qos_disabled_after_creation_fails_record() {
        let h = harness();
        let created = h.service.create_queue(1, 1).await.unwrap();
        h.store.set_device_qos(1, false);

        h.service.run_sweep().await;
        let stored = h.store.queue(created.id).unwrap();
        assert_eq!(stored.status, QueueStatus::Failed);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(h.client.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_one_failing_device_does_not_block_others() {
        let h = harness();
        let mut broken = fixtures::device(2);
        broken.api_username = None;
        h.store.insert_device(broken);
        let bad = h.service.create_queue(1, 2).await.unwrap();
        let good = h.service.create_queue(2, 1).await.unwrap();

        let summary = h.service.run_sweep().await;
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.synced, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(h.store.queue(bad.id).unwrap().status, QueueStatus::Failed);
        assert_eq!(h.store.queue(good.id).unwrap().status, QueueStatus::Synced);
    }

    #[tokio::test]
    async fn test_delete_with_failing_remote_still_removes_record() {
        let h = harness();
        let created = h.service.create_queue(1, 1).await.unwrap();
        h.service.run_sweep().await;
        h.client.fail_delete(true);

        h.service.delete_queue(1, 1).await.unwrap();
        assert!(h.store.queue(created.id).is_none());
        assert_eq!(h.client.delete_calls(), 1);

        let audits = h.store.audits();
        let delete = audits.iter().find(|a| a.action == "delete").unwrap();
        assert_eq!(delete.result, "failed");
        assert!(delete.error_message.is_some());
    }

    #[tokio::test]
    async fn test_delete_without_remote_object_skips_device() {
        let h = harness();
        h.service.create_queue(1, 1).await.unwrap();
        h.service.delete_queue(1, 1).await.unwrap();

        assert_eq!(h.connector.connects(), 0);
        assert!(h.store.queues().is_empty());
        assert!(matches!(
            h.service.delete_queue(1, 1).await.unwrap_err(),
            QosError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_sync_device_only_touches_that_device() {
        let h = harness();
        h.store.insert_device(fixtures::device(2));
        let on_one = h.service.create_queue(1, 1).await.unwrap();
        let on_two = h.service.create_queue(1, 2).await.unwrap();

        let summary = h.service.sync_device(1).await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(h.store.queue(on_one.id).unwrap().status, QueueStatus::Synced);
        assert_eq!(h.store.queue(on_two.id).unwrap().status, QueueStatus::Pending);

        assert!(matches!(
            h.service.sync_device(99).await.unwrap_err(),
            QosError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_start_and_stop_loop() {
        let h = harness();
        let created = h.service.create_queue(1, 1).await.unwrap();
        h.service.start(Duration::from_millis(20));

        let mut synced = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if h.store.queue(created.id).unwrap().status == QueueStatus::Synced {
                synced = true;
                break;
            }
        }
        assert!(synced);

        h.service.stop().await;
        assert_eq!(h.service.cached_connections().await, 0);
        assert_eq!(h.client.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_stop_waits_for_sweep_in_flight() {
        let h = harness();
        let created = h.service.create_queue(1, 1).await.unwrap();
        h.client.slow_create(Duration::from_millis(50));

        let service = h.service.clone();
        let sweep = tokio::spawn(async move { service.run_sweep().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.service.stop().await;

        assert_eq!(h.store.queue(created.id).unwrap().status, QueueStatus::Synced);
        assert_eq!(h.service.cached_connections().await, 0);
        assert_eq!(h.client.close_calls(), 1);
        assert_eq!(sweep.await.unwrap().synced, 1);
    }
}
