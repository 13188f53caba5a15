use std::sync::Arc;

use sea_orm::DatabaseConnection;
use tracing::info;

use crate::db::DbStore;
use crate::db::repository::{
    AuditRepository, DeviceDirectory, QueueRepository, SettingsRepository, TaskRepository,
    UserDirectory,
};
use crate::probe::{DeviceProbe, FleetProber, NetworkProbe};
use crate::qos::{QosService, VendorRegistry};
use crate::scheduler::TaskDispatcher;
use crate::scheduler::handlers::register_builtin;
use crate::server::config::ServerConfig;

/// Store handles shared by the services. `DbStore` fills every slot in production.
#[derive(Clone)]
pub struct Stores {
    pub queues: Arc<dyn QueueRepository>,
    pub audits: Arc<dyn AuditRepository>,
    pub devices: Arc<dyn DeviceDirectory>,
    pub users: Arc<dyn UserDirectory>,
    pub tasks: Arc<dyn TaskRepository>,
    pub settings: Arc<dyn SettingsRepository>,
}

impl Stores {
    pub fn from_database(db: Arc<DatabaseConnection>) -> Self {
        let store = Arc::new(DbStore::new(db));
        Self {
            queues: store.clone(),
            audits: store.clone(),
            devices: store.clone(),
            users: store.clone(),
            tasks: store.clone(),
            settings: store,
        }
    }
}

pub struct AppContext {
    pub qos: Arc<QosService>,
    pub prober: Arc<FleetProber>,
    pub dispatcher: Arc<TaskDispatcher>,
}

impl AppContext {
    pub fn new(
        config: &ServerConfig,
        stores: Stores,
        registry: VendorRegistry,
        probe: Arc<dyn DeviceProbe>,
    ) -> Self {
        let qos = Arc::new(QosService::new(
            stores.queues,
            stores.audits.clone(),
            stores.devices.clone(),
            stores.users,
            registry,
            config.sync_policy(),
        ));
        let prober = Arc::new(FleetProber::new(
            stores.devices,
            stores.settings,
            probe,
            config.probe_limits(),
        ));

        let mut dispatcher = TaskDispatcher::new(stores.tasks);
        register_builtin(
            &mut dispatcher,
            qos.clone(),
            prober.clone(),
            stores.audits,
            config.audit_retention_days,
        );

        Self {
            qos,
            prober,
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Production wiring: database store, built-in vendor clients, live network probes.
    pub fn production(config: &ServerConfig, db: Arc<DatabaseConnection>) -> Self {
        let registry = VendorRegistry::with_builtin();
        let probe = NetworkProbe::new(registry.clone(), config.vendor_timeout());
        Self::new(config, Stores::from_database(db), registry, Arc::new(probe))
    }

    pub fn start(&self, config: &ServerConfig) {
        self.qos.start(config.reconcile_interval());
        self.dispatcher.start(config.dispatcher_tick());
        info!(
            reconcile_secs = config.reconcile_interval_secs,
            tick_secs = config.dispatcher_tick_secs,
            task_types = ?self.dispatcher.task_types(),
            "Background services started."
        );
    }

    pub async fn stop(&self) {
        self.dispatcher.stop();
        self.qos.stop().await;
        info!("Background services stopped.");
    }
}
