//! Persistence layer: SeaORM entities, query functions and the repository traits the
//! core consumes.

pub mod entities;
pub mod enums;
pub mod repository;
pub mod services;

#[cfg(test)]
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, DbErr};

use crate::db::entities::{nas_device, qos_audit_log, qos_queue, scheduled_task, user};
use crate::db::enums::QueueStatus;
use crate::db::repository::{
    ApiUpdate, AuditRepository, DeviceDirectory, LatencyUpdate, QueueFilter, QueueRepository,
    SettingsRepository, SnmpUpdate, TaskRepository, TaskRunRecord, UserDirectory,
};

/// Record store backed by a SeaORM connection pool.
#[derive(Clone, Debug)]
pub struct DbStore {
    db: Arc<DatabaseConnection>,
}

impl DbStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }
}

#[async_trait]
impl QueueRepository for DbStore {
    async fn create(&self, queue: qos_queue::Model) -> Result<qos_queue::Model, DbErr> {
        services::create_queue(self.connection(), queue).await
    }

    async fn update(&self, queue: qos_queue::Model) -> Result<qos_queue::Model, DbErr> {
        services::update_queue(self.connection(), queue).await
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<qos_queue::Model>, DbErr> {
        services::get_queue_by_id(self.connection(), id).await
    }

    async fn get_by_remote_id(&self, remote_id: &str) -> Result<Option<qos_queue::Model>, DbErr> {
        services::get_queue_by_remote_id(self.connection(), remote_id).await
    }

    async fn get_pending(&self, limit: u64) -> Result<Vec<qos_queue::Model>, DbErr> {
        services::get_pending_queues(self.connection(), limit).await
    }

    async fn get_failed(&self, limit: u64, retry_cap: i32) -> Result<Vec<qos_queue::Model>, DbErr> {
        services::get_failed_queues(self.connection(), limit, retry_cap).await
    }

    async fn get_by_user_and_device(
        &self,
        user_id: i64,
        device_id: i64,
    ) -> Result<Option<qos_queue::Model>, DbErr> {
        services::get_queue_by_user_and_device(self.connection(), user_id, device_id).await
    }

    async fn delete(&self, id: i64) -> Result<(), DbErr> {
        services::delete_queue(self.connection(), id).await
    }

    async fn delete_by_remote_id(&self, remote_id: &str) -> Result<u64, DbErr> {
        services::delete_queue_by_remote_id(self.connection(), remote_id).await
    }

    async fn update_status(&self, id: i64, status: QueueStatus, error: &str) -> Result<(), DbErr> {
        services::update_queue_status(self.connection(), id, status, error).await
    }

    async fn increment_retry(&self, id: i64) -> Result<(), DbErr> {
        services::increment_queue_retry(self.connection(), id).await
    }

    async fn list(
        &self,
        filter: &QueueFilter,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<qos_queue::Model>, u64), DbErr> {
        services::list_queues(self.connection(), filter, page, page_size).await
    }
}

#[async_trait]
impl AuditRepository for DbStore {
    async fn create(&self, entry: qos_audit_log::Model) -> Result<qos_audit_log::Model, DbErr> {
        services::create_audit_log(self.connection(), entry).await
    }

    async fn get_by_queue_id(&self, queue_id: i64) -> Result<Vec<qos_audit_log::Model>, DbErr> {
        services::get_audit_logs_by_queue_id(self.connection(), queue_id).await
    }

    async fn delete_older_than(&self, days: i64) -> Result<u64, DbErr> {
        services::delete_audit_logs_older_than(self.connection(), days).await
    }
}

#[async_trait]
impl DeviceDirectory for DbStore {
    async fn get_by_id(&self, id: i64) -> Result<Option<nas_device::Model>, DbErr> {
        services::get_device_by_id(self.connection(), id).await
    }

    async fn list_enabled(&self) -> Result<Vec<nas_device::Model>, DbErr> {
        services::list_enabled_devices(self.connection()).await
    }

    async fn update_latency(&self, id: i64, update: &LatencyUpdate) -> Result<(), DbErr> {
        services::update_device_latency(self.connection(), id, update).await
    }

    async fn update_snmp(&self, id: i64, update: &SnmpUpdate) -> Result<(), DbErr> {
        services::update_device_snmp(self.connection(), id, update).await
    }

    async fn update_api(&self, id: i64, update: &ApiUpdate) -> Result<(), DbErr> {
        services::update_device_api(self.connection(), id, update).await
    }
}

#[async_trait]
impl UserDirectory for DbStore {
    async fn get_by_id(&self, id: i64) -> Result<Option<user::Model>, DbErr> {
        services::get_user_by_id(self.connection(), id).await
    }
}

#[async_trait]
impl TaskRepository for DbStore {
    async fn list_enabled(&self) -> Result<Vec<scheduled_task::Model>, DbErr> {
        services::list_enabled_tasks(self.connection()).await
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<scheduled_task::Model>, DbErr> {
        services::get_task_by_id(self.connection(), id).await
    }

    async fn record_run(&self, id: i64, run: &TaskRunRecord) -> Result<(), DbErr> {
        services::record_task_run(self.connection(), id, run).await
    }
}

#[async_trait]
impl SettingsRepository for DbStore {
    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>, DbErr> {
        Ok(services::get_setting(self.connection(), key)
            .await?
            .map(|setting| setting.value))
    }
}
