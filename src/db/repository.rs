//! Repository traits through which the core reads and writes the record store.
//!
//! The reconciliation service, the fleet prober and the task dispatcher only see these
//! traits. `DbStore` implements them on top of SeaORM; tests use an in-process store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DbErr;

use crate::db::entities::{nas_device, qos_audit_log, qos_queue, scheduled_task, user};
use crate::db::enums::{QueueStatus, RunResult};

/// Optional predicates for listing queue records. `None` means "any".
#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    pub user_id: Option<i64>,
    pub device_id: Option<i64>,
    pub status: Option<QueueStatus>,
}

impl QueueFilter {
    pub fn matches(&self, queue: &qos_queue::Model) -> bool {
        self.user_id.is_none_or(|id| queue.user_id == id)
            && self.device_id.is_none_or(|id| queue.device_id == id)
            && self.status.is_none_or(|s| queue.status == s)
    }
}

#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Inserts a record. The `id` of the argument is ignored.
    async fn create(&self, queue: qos_queue::Model) -> Result<qos_queue::Model, DbErr>;
    async fn update(&self, queue: qos_queue::Model) -> Result<qos_queue::Model, DbErr>;
    async fn get_by_id(&self, id: i64) -> Result<Option<qos_queue::Model>, DbErr>;
    async fn get_by_remote_id(&self, remote_id: &str) -> Result<Option<qos_queue::Model>, DbErr>;
    /// Pending records, oldest created first.
    async fn get_pending(&self, limit: u64) -> Result<Vec<qos_queue::Model>, DbErr>;
    /// Failed records with `retry_count < retry_cap`, oldest created first.
    async fn get_failed(&self, limit: u64, retry_cap: i32) -> Result<Vec<qos_queue::Model>, DbErr>;
    async fn get_by_user_and_device(
        &self,
        user_id: i64,
        device_id: i64,
    ) -> Result<Option<qos_queue::Model>, DbErr>;
    async fn delete(&self, id: i64) -> Result<(), DbErr>;
    async fn delete_by_remote_id(&self, remote_id: &str) -> Result<u64, DbErr>;
    async fn update_status(&self, id: i64, status: QueueStatus, error: &str) -> Result<(), DbErr>;
    async fn increment_retry(&self, id: i64) -> Result<(), DbErr>;
    /// One page (1-based) of matching records plus the total number of matches.
    async fn list(
        &self,
        filter: &QueueFilter,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<qos_queue::Model>, u64), DbErr>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn create(&self, entry: qos_audit_log::Model) -> Result<qos_audit_log::Model, DbErr>;
    async fn get_by_queue_id(&self, queue_id: i64) -> Result<Vec<qos_audit_log::Model>, DbErr>;
    /// Removes entries executed more than `days` days ago; returns the number removed.
    async fn delete_older_than(&self, days: i64) -> Result<u64, DbErr>;
}

/// Latency channel columns of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyUpdate {
    pub latency_ms: i32,
    pub message: String,
    pub probed_at: DateTime<Utc>,
}

/// SNMP channel columns of a device. `model` is only written when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmpUpdate {
    pub ok: bool,
    pub message: String,
    pub model: Option<String>,
    pub probed_at: DateTime<Utc>,
}

/// API channel columns of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiUpdate {
    pub ok: bool,
    pub message: String,
    pub probed_at: DateTime<Utc>,
}

/// Read access to devices plus the column-scoped writes owned by the prober.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn get_by_id(&self, id: i64) -> Result<Option<nas_device::Model>, DbErr>;
    async fn list_enabled(&self) -> Result<Vec<nas_device::Model>, DbErr>;
    async fn update_latency(&self, id: i64, update: &LatencyUpdate) -> Result<(), DbErr>;
    async fn update_snmp(&self, id: i64, update: &SnmpUpdate) -> Result<(), DbErr>;
    async fn update_api(&self, id: i64, update: &ApiUpdate) -> Result<(), DbErr>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_by_id(&self, id: i64) -> Result<Option<user::Model>, DbErr>;
}

/// Bookkeeping written after every task execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRunRecord {
    pub last_run_at: DateTime<Utc>,
    pub next_run_at: DateTime<Utc>,
    pub result: RunResult,
    pub message: String,
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn list_enabled(&self) -> Result<Vec<scheduled_task::Model>, DbErr>;
    async fn get_by_id(&self, id: i64) -> Result<Option<scheduled_task::Model>, DbErr>;
    async fn record_run(&self, id: i64, run: &TaskRunRecord) -> Result<(), DbErr>;
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>, DbErr>;
}
