//! Built-in task handlers.

use std::sync::Arc;

use async_trait::async_trait;

use super::{TaskDispatcher, TaskError, TaskHandler};
use crate::db::entities::scheduled_task;
use crate::db::repository::AuditRepository;
use crate::probe::{FleetProber, ProbeChannel};
use crate::qos::QosService;

pub const TASK_QOS_SYNC: &str = "qos_sync";
pub const TASK_LATENCY_PROBE: &str = "nas_latency_probe";
pub const TASK_SNMP_PROBE: &str = "nas_snmp_probe";
pub const TASK_API_PROBE: &str = "nas_api_probe";
pub const TASK_AUDIT_CLEANUP: &str = "qos_audit_cleanup";

pub struct QosSyncHandler {
    service: Arc<QosService>,
}

impl QosSyncHandler {
    pub fn new(service: Arc<QosService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl TaskHandler for QosSyncHandler {
    async fn run(&self, _task: &scheduled_task::Model) -> Result<String, TaskError> {
        let summary = self.service.run_sweep().await;
        let mut message = format!(
            "processed {}, synced {}, failed {} in {} ms",
            summary.processed, summary.synced, summary.failed, summary.duration_ms
        );
        if let Some(last_error) = summary.last_error {
            message.push_str(&format!("; last error: {last_error}"));
        }
        Ok(message)
    }
}

pub struct ProbeSweepHandler {
    prober: Arc<FleetProber>,
    channel: ProbeChannel,
}

impl ProbeSweepHandler {
    pub fn new(prober: Arc<FleetProber>, channel: ProbeChannel) -> Self {
        Self { prober, channel }
    }
}

#[async_trait]
impl TaskHandler for ProbeSweepHandler {
    async fn run(&self, _task: &scheduled_task::Model) -> Result<String, TaskError> {
        let summary = self.prober.sweep(self.channel).await?;
        Ok(format!(
            "{} probe: {} devices, {} ok, {} failed in {} ms",
            self.channel, summary.processed, summary.succeeded, summary.failed, summary.duration_ms
        ))
    }
}

pub struct AuditCleanupHandler {
    audits: Arc<dyn AuditRepository>,
    retention_days: i64,
}

impl AuditCleanupHandler {
    pub fn new(audits: Arc<dyn AuditRepository>, retention_days: i64) -> Self {
        Self {
            audits,
            retention_days,
        }
    }
}

#[async_trait]
impl TaskHandler for AuditCleanupHandler {
    async fn run(&self, _task: &scheduled_task::Model) -> Result<String, TaskError> {
        let removed = self.audits.delete_older_than(self.retention_days).await?;
        Ok(format!(
            "removed {removed} audit entries older than {} days",
            self.retention_days
        ))
    }
}

/// Registers the handlers for every built-in task type.
pub fn register_builtin(
    dispatcher: &mut TaskDispatcher,
    service: Arc<QosService>,
    prober: Arc<FleetProber>,
    audits: Arc<dyn AuditRepository>,
    retention_days: i64,
) {
    dispatcher.register(TASK_QOS_SYNC, Arc::new(QosSyncHandler::new(service)));
    for (task_type, channel) in [
        (TASK_LATENCY_PROBE, ProbeChannel::Latency),
        (TASK_SNMP_PROBE, ProbeChannel::Snmp),
        (TASK_API_PROBE, ProbeChannel::Api),
    ] {
        dispatcher.register(
            task_type,
            Arc::new(ProbeSweepHandler::new(prober.clone(), channel)),
        );
    }
    dispatcher.register(
        TASK_AUDIT_CLEANUP,
        Arc::new(AuditCleanupHandler::new(audits, retention_days)),
    );
}
