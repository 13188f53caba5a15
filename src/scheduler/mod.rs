//! Runs stored periodic tasks through handlers registered by task type.

pub mod handlers;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OwnedMutexGuard, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::db::entities::scheduled_task;
use crate::db::enums::RunResult;
use crate::db::repository::{TaskRepository, TaskRunRecord};
use crate::probe::ProbeError;
use crate::qos::QosError;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task {0} not found")]
    NotFound(i64),
    #[error("No handler registered for task type '{0}'")]
    UnknownType(String),
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Qos(#[from] QosError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

/// Work behind one task type. The returned string becomes the task's `last_message`.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, task: &scheduled_task::Model) -> Result<String, TaskError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRunSummary {
    pub task_id: i64,
    pub task_type: String,
    pub result: RunResult,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub next_run_at: DateTime<Utc>,
    pub duration_ms: u64,
}

fn is_due(task: &scheduled_task::Model, now: DateTime<Utc>) -> bool {
    task.next_run_at.is_none_or(|next| next <= now)
}

pub struct TaskDispatcher {
    tasks: Arc<dyn TaskRepository>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    /// One lock per task id; a run holds it for its whole duration.
    running: DashMap<i64, Arc<tokio::sync::Mutex<()>>>,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskDispatcher {
    pub fn new(tasks: Arc<dyn TaskRepository>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            tasks,
            handlers: HashMap::new(),
            running: DashMap::new(),
            shutdown_tx,
            loop_handle: Mutex::new(None),
        }
    }

    pub fn register(&mut self, task_type: &str, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_type.to_owned(), handler);
    }

    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    fn task_lock(&self, task_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.running.entry(task_id).or_default().clone()
    }

    /// Spawns the fixed-cadence dispatch loop and returns immediately.
    pub fn start(self: &Arc<Self>, tick: Duration) {
        let mut slot = self
            .loop_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!("Task dispatcher is already running.");
            return;
        }

        self.shutdown_tx.send_replace(false);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let dispatcher = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            info!(tick_secs = tick.as_secs(), "Task dispatcher started.");
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = dispatcher.tick().await {
                            error!(error = %e, "Failed to load scheduled tasks.");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Task dispatcher stopped.");
        }));
    }

    /// Stops scheduling new runs. Runs already started finish on their own.
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Starts every enabled task that is due and not already running. The handles resolve
    /// when the corresponding runs have finished and been recorded.
    pub async fn tick(self: &Arc<Self>) -> Result<Vec<JoinHandle<TaskRunSummary>>, DbErr> {
        let now = Utc::now();
        let mut started = Vec::new();
        for task in self.tasks.list_enabled().await? {
            if !is_due(&task, now) {
                continue;
            }
            let guard = match self.task_lock(task.id).try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    debug!(
                        task_id = task.id,
                        task_type = %task.task_type,
                        "Previous run still in progress; skipping."
                    );
                    continue;
                }
            };
            let dispatcher = Arc::clone(self);
            started.push(tokio::spawn(async move {
                dispatcher.execute(task, guard).await
            }));
        }
        Ok(started)
    }

    /// Runs a task immediately regardless of its schedule, waiting for any run of the
    /// same task that is still in progress.
    pub async fn run_now(&self, task_id: i64) -> Result<TaskRunSummary, TaskError> {
        let task = self
            .tasks
            .get_by_id(task_id)
            .await?
            .ok_or(TaskError::NotFound(task_id))?;
        let guard = self.task_lock(task_id).lock_owned().await;
        info!(task_id, task_type = %task.task_type, "Running task on demand.");
        Ok(self.execute(task, guard).await)
    }

    async fn execute(
        &self,
        task: scheduled_task::Model,
        _guard: OwnedMutexGuard<()>,
    ) -> TaskRunSummary {
        let started_at = Utc::now();
        let timer = Instant::now();

        let outcome = match self.handlers.get(&task.task_type) {
            Some(handler) => handler.run(&task).await,
            None => Err(TaskError::UnknownType(task.task_type.clone())),
        };
        let (result, message) = match outcome {
            Ok(message) => (RunResult::Success, message),
            Err(e) => {
                warn!(
                    task_id = task.id,
                    task_type = %task.task_type,
                    error = %e,
                    "Task run failed."
                );
                (RunResult::Failed, e.to_string())
            }
        };

        let finished_at = Utc::now();
        let next_run_at = finished_at + chrono::Duration::seconds(task.interval_secs.max(1));
        let record = TaskRunRecord {
            last_run_at: finished_at,
            next_run_at,
            result,
            message: message.clone(),
        };
        if let Err(e) = self.tasks.record_run(task.id, &record).await {
            error!(task_id = task.id, error = %e, "Failed to record task run.");
        }

        let duration_ms = timer.elapsed().as_millis() as u64;
        debug!(
            task_id = task.id,
            task_type = %task.task_type,
            %result,
            duration_ms,
            "Task run finished."
        );
        TaskRunSummary {
            task_id: task.id,
            task_type: task.task_type,
            result,
            message,
            started_at,
            next_run_at,
            duration_ms,
        }
    }
}
