//! In-process record store used by the unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sea_orm::DbErr;

use crate::db::entities::{nas_device, qos_audit_log, qos_queue, scheduled_task, user};
use crate::db::enums::QueueStatus;
use crate::db::repository::{
    ApiUpdate, AuditRepository, DeviceDirectory, LatencyUpdate, QueueFilter, QueueRepository,
    SettingsRepository, SnmpUpdate, TaskRepository, TaskRunRecord, UserDirectory,
};

#[derive(Default)]
struct State {
    next_id: i64,
    queues: BTreeMap<i64, qos_queue::Model>,
    audits: Vec<qos_audit_log::Model>,
    devices: BTreeMap<i64, nas_device::Model>,
    users: HashMap<i64, user::Model>,
    tasks: BTreeMap<i64, scheduled_task::Model>,
    settings: HashMap<String, serde_json::Value>,
    failing_devices: HashSet<i64>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_device(&self, device: nas_device::Model) {
        self.state.lock().unwrap().devices.insert(device.id, device);
    }

    pub fn insert_user(&self, user: user::Model) {
        self.state.lock().unwrap().users.insert(user.id, user);
    }

    pub fn insert_task(&self, task: scheduled_task::Model) {
        self.state.lock().unwrap().tasks.insert(task.id, task);
    }

    pub fn set_setting(&self, key: &str, value: serde_json::Value) {
        self.state.lock().unwrap().settings.insert(key.to_owned(), value);
    }

    pub fn set_device_qos(&self, id: i64, enabled: bool) {
        if let Some(device) = self.state.lock().unwrap().devices.get_mut(&id) {
            device.qos_enabled = enabled;
        }
    }

    /// Makes every probe write for `id` fail with a database error.
    pub fn fail_device_writes(&self, id: i64) {
        self.state.lock().unwrap().failing_devices.insert(id);
    }

    pub fn device(&self, id: i64) -> Option<nas_device::Model> {
        self.state.lock().unwrap().devices.get(&id).cloned()
    }

    pub fn queue(&self, id: i64) -> Option<qos_queue::Model> {
        self.state.lock().unwrap().queues.get(&id).cloned()
    }

    pub fn queues(&self) -> Vec<qos_queue::Model> {
        self.state.lock().unwrap().queues.values().cloned().collect()
    }

    pub fn audits(&self) -> Vec<qos_audit_log::Model> {
        self.state.lock().unwrap().audits.clone()
    }

    pub fn push_audit(&self, entry: qos_audit_log::Model) {
        self.state.lock().unwrap().audits.push(entry);
    }

    pub fn task(&self, id: i64) -> Option<scheduled_task::Model> {
        self.state.lock().unwrap().tasks.get(&id).cloned()
    }

    fn device_write<F>(&self, id: i64, apply: F) -> Result<(), DbErr>
    where
        F: FnOnce(&mut nas_device::Model),
    {
        let mut state = self.state.lock().unwrap();
        if state.failing_devices.contains(&id) {
            return Err(DbErr::Custom(format!("write to device {id} rejected")));
        }
        match state.devices.get_mut(&id) {
            Some(device) => {
                apply(device);
                Ok(())
            }
            None => Err(DbErr::RecordNotFound(format!("device {id}"))),
        }
    }
}

fn oldest_first(mut queues: Vec<qos_queue::Model>) -> Vec<qos_queue::Model> {
    queues.sort_by_key(|q| (q.created_at, q.id));
    queues
}

#[async_trait]
impl QueueRepository for MemoryStore {
    async fn create(&self, mut queue: qos_queue::Model) -> Result<qos_queue::Model, DbErr> {
        let mut state = self.state.lock().unwrap();
        queue.id = state.next_id();
        state.queues.insert(queue.id, queue.clone());
        Ok(queue)
    }

    async fn update(&self, mut queue: qos_queue::Model) -> Result<qos_queue::Model, DbErr> {
        let mut state = self.state.lock().unwrap();
        match state.queues.get_mut(&queue.id) {
            Some(stored) => {
                queue.updated_at = Utc::now();
                *stored = queue.clone();
                Ok(queue)
            }
            None => Err(DbErr::RecordNotFound(format!("queue {}", queue.id))),
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<qos_queue::Model>, DbErr> {
        Ok(self.queue(id))
    }

    async fn get_by_remote_id(&self, remote_id: &str) -> Result<Option<qos_queue::Model>, DbErr> {
        Ok(self
            .queues()
            .into_iter()
            .find(|q| !remote_id.is_empty() && q.remote_id == remote_id))
    }

    async fn get_pending(&self, limit: u64) -> Result<Vec<qos_queue::Model>, DbErr> {
        let pending = self
            .queues()
            .into_iter()
            .filter(|q| q.status == QueueStatus::Pending)
            .collect();
        Ok(oldest_first(pending).into_iter().take(limit as usize).collect())
    }

    async fn get_failed(&self, limit: u64, retry_cap: i32) -> Result<Vec<qos_queue::Model>, DbErr> {
        let failed = self
            .queues()
            .into_iter()
            .filter(|q| q.status == QueueStatus::Failed && q.retry_count < retry_cap)
            .collect();
        Ok(oldest_first(failed).into_iter().take(limit as usize).collect())
    }

    async fn get_by_user_and_device(
        &self,
        user_id: i64,
        device_id: i64,
    ) -> Result<Option<qos_queue::Model>, DbErr> {
        Ok(self
            .queues()
            .into_iter()
            .find(|q| q.user_id == user_id && q.device_id == device_id))
    }

    async fn delete(&self, id: i64) -> Result<(), DbErr> {
        self.state.lock().unwrap().queues.remove(&id);
        Ok(())
    }

    async fn delete_by_remote_id(&self, remote_id: &str) -> Result<u64, DbErr> {
        let mut state = self.state.lock().unwrap();
        let before = state.queues.len();
        state.queues.retain(|_, q| q.remote_id != remote_id);
        Ok((before - state.queues.len()) as u64)
    }

    async fn update_status(&self, id: i64, status: QueueStatus, error: &str) -> Result<(), DbErr> {
        let mut state = self.state.lock().unwrap();
        let queue = state
            .queues
            .get_mut(&id)
            .ok_or_else(|| DbErr::RecordNotFound(format!("queue {id}")))?;
        queue.status = status;
        queue.last_error = error.to_owned();
        queue.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_retry(&self, id: i64) -> Result<(), DbErr> {
        let mut state = self.state.lock().unwrap();
        let queue = state
            .queues
            .get_mut(&id)
            .ok_or_else(|| DbErr::RecordNotFound(format!("queue {id}")))?;
        queue.retry_count += 1;
        Ok(())
    }

    async fn list(
        &self,
        filter: &QueueFilter,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<qos_queue::Model>, u64), DbErr> {
        let matching = oldest_first(
            self.queues()
                .into_iter()
                .filter(|q| filter.matches(q))
                .collect(),
        );
        let total = matching.len() as u64;
        let page_size = page_size.max(1);
        let skip = page.saturating_sub(1) * page_size;
        let items = matching
            .into_iter()
            .skip(skip as usize)
            .take(page_size as usize)
            .collect();
        Ok((items, total))
    }
}

#[async_trait]
impl AuditRepository for MemoryStore {
    async fn create(&self, mut entry: qos_audit_log::Model) -> Result<qos_audit_log::Model, DbErr> {
        let mut state = self.state.lock().unwrap();
        entry.id = state.next_id();
        state.audits.push(entry.clone());
        Ok(entry)
    }

    async fn get_by_queue_id(&self, queue_id: i64) -> Result<Vec<qos_audit_log::Model>, DbErr> {
        Ok(self
            .audits()
            .into_iter()
            .filter(|a| a.queue_id == queue_id)
            .collect())
    }

    async fn delete_older_than(&self, days: i64) -> Result<u64, DbErr> {
        let cutoff = Utc::now() - Duration::days(days);
        let mut state = self.state.lock().unwrap();
        let before = state.audits.len();
        state.audits.retain(|a| a.executed_at >= cutoff);
        Ok((before - state.audits.len()) as u64)
    }
}

#[async_trait]
impl DeviceDirectory for MemoryStore {
    async fn get_by_id(&self, id: i64) -> Result<Option<nas_device::Model>, DbErr> {
        Ok(self.device(id))
    }

    async fn list_enabled(&self) -> Result<Vec<nas_device::Model>, DbErr> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .devices
            .values()
            .filter(|d| d.enabled)
            .cloned()
            .collect())
    }

    async fn update_latency(&self, id: i64, update: &LatencyUpdate) -> Result<(), DbErr> {
        self.device_write(id, |device| {
            device.latency_ms = Some(update.latency_ms);
            device.last_latency_at = Some(update.probed_at);
            device.last_latency_msg = Some(update.message.clone());
        })
    }

    async fn update_snmp(&self, id: i64, update: &SnmpUpdate) -> Result<(), DbErr> {
        self.device_write(id, |device| {
            device.last_snmp_at = Some(update.probed_at);
            device.last_snmp_ok = Some(update.ok);
            device.last_snmp_msg = Some(update.message.clone());
            if let Some(model) = &update.model {
                device.model = Some(model.clone());
            }
        })
    }

    async fn update_api(&self, id: i64, update: &ApiUpdate) -> Result<(), DbErr> {
        self.device_write(id, |device| {
            device.last_api_at = Some(update.probed_at);
            device.last_api_ok = Some(update.ok);
            device.last_api_msg = Some(update.message.clone());
        })
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn get_by_id(&self, id: i64) -> Result<Option<user::Model>, DbErr> {
        Ok(self.state.lock().unwrap().users.get(&id).cloned())
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn list_enabled(&self) -> Result<Vec<scheduled_task::Model>, DbErr> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tasks
            .values()
            .filter(|t| t.enabled)
            .cloned()
            .collect())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<scheduled_task::Model>, DbErr> {
        Ok(self.task(id))
    }

    async fn record_run(&self, id: i64, run: &TaskRunRecord) -> Result<(), DbErr> {
        let mut state = self.state.lock().unwrap();
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| DbErr::RecordNotFound(format!("task {id}")))?;
        task.last_run_at = Some(run.last_run_at);
        task.next_run_at = Some(run.next_run_at);
        task.last_result = Some(run.result.as_str().to_owned());
        task.last_message = Some(run.message.clone());
        Ok(())
    }
}

#[async_trait]
impl SettingsRepository for MemoryStore {
    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>, DbErr> {
        Ok(self.state.lock().unwrap().settings.get(key).cloned())
    }
}

pub mod fixtures {
    //! Row builders shared by the test modules.

    use chrono::Utc;

    use crate::db::entities::{nas_device, scheduled_task, user};
    use crate::qos::registry::VENDOR_MIKROTIK;

    pub fn device(id: i64) -> nas_device::Model {
        let now = Utc::now();
        nas_device::Model {
            id,
            name: format!("nas-{id}"),
            ipaddr: format!("10.0.0.{id}"),
            vendor_code: VENDOR_MIKROTIK.to_owned(),
            model: None,
            enabled: true,
            qos_enabled: true,
            snmp_enabled: true,
            snmp_port: 161,
            snmp_community: Some("public".to_owned()),
            api_enabled: true,
            api_port: 8728,
            api_username: Some("admin".to_owned()),
            api_password: Some("secret".to_owned()),
            latency_ms: None,
            last_latency_at: None,
            last_latency_msg: None,
            last_snmp_at: None,
            last_snmp_ok: None,
            last_snmp_msg: None,
            last_api_at: None,
            last_api_ok: None,
            last_api_msg: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn user(id: i64) -> user::Model {
        let now = Utc::now();
        user::Model {
            id,
            username: format!("user{id}"),
            up_rate_kbps: 2048,
            down_rate_kbps: 10240,
            ip_addr: Some(format!("100.64.0.{id}")),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn task(id: i64, task_type: &str, interval_secs: i64) -> scheduled_task::Model {
        let now = Utc::now();
        scheduled_task::Model {
            id,
            name: format!("{task_type}-{id}"),
            task_type: task_type.to_owned(),
            interval_secs,
            enabled: true,
            last_run_at: None,
            next_run_at: None,
            last_result: None,
            last_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}
