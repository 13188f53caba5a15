use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::probe::ProbeLimits;
use crate::qos::SyncPolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub log_dir: String,
    pub reconcile_interval_secs: u64,
    pub dispatcher_tick_secs: u64,
    pub max_retries: i32,
    pub pending_batch: u64,
    pub failed_batch: u64,
    pub latency_max_workers: usize,
    pub snmp_max_workers: usize,
    pub api_max_workers: usize,
    pub audit_retention_days: i64,
    pub vendor_timeout_secs: u64,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    database_url: Option<String>,
    database_max_connections: Option<u32>,
    log_dir: Option<String>,
    reconcile_interval_secs: Option<u64>,
    dispatcher_tick_secs: Option<u64>,
    max_retries: Option<i32>,
    pending_batch: Option<u64>,
    failed_batch: Option<u64>,
    latency_max_workers: Option<usize>,
    snmp_max_workers: Option<usize>,
    api_max_workers: Option<usize>,
    audit_retention_days: Option<i64>,
    vendor_timeout_secs: Option<u64>,
}

fn default_database_max_connections() -> u32 {
    10
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_reconcile_interval_secs() -> u64 {
    30
}

fn default_dispatcher_tick_secs() -> u64 {
    10
}

fn default_max_retries() -> i32 {
    3
}

fn default_pending_batch() -> u64 {
    100
}

fn default_failed_batch() -> u64 {
    50
}

fn default_latency_max_workers() -> usize {
    50
}

fn default_snmp_max_workers() -> usize {
    25
}

fn default_api_max_workers() -> usize {
    25
}

fn default_audit_retention_days() -> i64 {
    30
}

fn default_vendor_timeout_secs() -> u64 {
    3
}

impl PartialServerConfig {
    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// `self` wins over `lower` field by field.
    fn or(self, lower: Self) -> Self {
        Self {
            database_url: self.database_url.or(lower.database_url),
            database_max_connections: self
                .database_max_connections
                .or(lower.database_max_connections),
            log_dir: self.log_dir.or(lower.log_dir),
            reconcile_interval_secs: self
                .reconcile_interval_secs
                .or(lower.reconcile_interval_secs),
            dispatcher_tick_secs: self.dispatcher_tick_secs.or(lower.dispatcher_tick_secs),
            max_retries: self.max_retries.or(lower.max_retries),
            pending_batch: self.pending_batch.or(lower.pending_batch),
            failed_batch: self.failed_batch.or(lower.failed_batch),
            latency_max_workers: self.latency_max_workers.or(lower.latency_max_workers),
            snmp_max_workers: self.snmp_max_workers.or(lower.snmp_max_workers),
            api_max_workers: self.api_max_workers.or(lower.api_max_workers),
            audit_retention_days: self.audit_retention_days.or(lower.audit_retention_days),
            vendor_timeout_secs: self.vendor_timeout_secs.or(lower.vendor_timeout_secs),
        }
    }

    fn finish(self) -> Result<ServerConfig, ConfigError> {
        let config = ServerConfig {
            database_url: self
                .database_url
                .ok_or(ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: self
                .database_max_connections
                .unwrap_or_else(default_database_max_connections),
            log_dir: self.log_dir.unwrap_or_else(default_log_dir),
            reconcile_interval_secs: self
                .reconcile_interval_secs
                .unwrap_or_else(default_reconcile_interval_secs),
            dispatcher_tick_secs: self
                .dispatcher_tick_secs
                .unwrap_or_else(default_dispatcher_tick_secs),
            max_retries: self.max_retries.unwrap_or_else(default_max_retries),
            pending_batch: self.pending_batch.unwrap_or_else(default_pending_batch),
            failed_batch: self.failed_batch.unwrap_or_else(default_failed_batch),
            latency_max_workers: self
                .latency_max_workers
                .unwrap_or_else(default_latency_max_workers),
            snmp_max_workers: self
                .snmp_max_workers
                .unwrap_or_else(default_snmp_max_workers),
            api_max_workers: self.api_max_workers.unwrap_or_else(default_api_max_workers),
            audit_retention_days: self
                .audit_retention_days
                .unwrap_or_else(default_audit_retention_days),
            vendor_timeout_secs: self
                .vendor_timeout_secs
                .unwrap_or_else(default_vendor_timeout_secs),
        };
        config.validate()?;
        Ok(config)
    }
}

impl ServerConfig {
    /// Layers, highest first: environment (after `.env` is loaded), the TOML file at
    /// `config_path` when it exists, built-in defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::load_with(config_path, env::vars())
    }

    /// Environment keys are the upper-cased field names, e.g. `DATABASE_URL`.
    fn load_with(
        config_path: Option<&str>,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        let file_config = match config_path {
            Some(path) => PartialServerConfig::from_file(Path::new(path))?,
            None => PartialServerConfig::default(),
        };
        let env_config: PartialServerConfig = envy::from_iter(vars)?;
        env_config.or(file_config).finish()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("database_max_connections", self.database_max_connections > 0),
            ("reconcile_interval_secs", self.reconcile_interval_secs > 0),
            ("dispatcher_tick_secs", self.dispatcher_tick_secs > 0),
            ("max_retries", self.max_retries > 0),
            ("pending_batch", self.pending_batch > 0),
            ("failed_batch", self.failed_batch > 0),
            ("latency_max_workers", self.latency_max_workers > 0),
            ("snmp_max_workers", self.snmp_max_workers > 0),
            ("api_max_workers", self.api_max_workers > 0),
            ("audit_retention_days", self.audit_retention_days > 0),
            ("vendor_timeout_secs", self.vendor_timeout_secs > 0),
        ];
        match positive.iter().find(|(_, ok)| !ok) {
            Some((name, _)) => Err(ConfigError::NotPositive(*name)),
            None => Ok(()),
        }
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn dispatcher_tick(&self) -> Duration {
        Duration::from_secs(self.dispatcher_tick_secs)
    }

    pub fn vendor_timeout(&self) -> Duration {
        Duration::from_secs(self.vendor_timeout_secs)
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            max_retries: self.max_retries,
            pending_batch: self.pending_batch,
            failed_batch: self.failed_batch,
            vendor_timeout: self.vendor_timeout(),
        }
    }

    pub fn probe_limits(&self) -> ProbeLimits {
        ProbeLimits {
            latency: self.latency_max_workers,
            snmp: self.snmp_max_workers,
            api: self.api_max_workers,
        }
    }
}
