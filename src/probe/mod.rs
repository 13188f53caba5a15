//! Fleet probing: latency, SNMP and management-API reachability for every enabled device.
//!
//! Each sweep snapshots the enabled devices once and probes the eligible ones
//! concurrently, bounded by a per-channel worker limit. Every channel writes only its
//! own columns on the device row.

pub mod latency;
pub mod snmp;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use self::latency::{IcmpPinger, LatencyResult};
use self::snmp::{SNMP_RETRIES, SNMP_TIMEOUT, SnmpError};
use crate::db::entities::nas_device;
use crate::db::repository::{
    ApiUpdate, DeviceDirectory, LatencyUpdate, SettingsRepository, SnmpUpdate,
};
use crate::qos::VendorRegistry;
use crate::qos::client::{ConnectParams, VendorError};

const DEFAULT_SNMP_PORT: u16 = 161;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Capability disabled: {0}")]
    CapabilityDisabled(String),
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeChannel {
    Latency,
    Snmp,
    Api,
}

impl ProbeChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeChannel::Latency => "latency",
            ProbeChannel::Snmp => "snmp",
            ProbeChannel::Api => "api",
        }
    }

    /// Settings key overriding the worker limit for this channel.
    pub fn settings_key(&self) -> &'static str {
        match self {
            ProbeChannel::Latency => "probe.latency_max_workers",
            ProbeChannel::Snmp => "probe.snmp_max_workers",
            ProbeChannel::Api => "probe.api_max_workers",
        }
    }

    pub fn is_eligible(&self, device: &nas_device::Model) -> bool {
        device.enabled
            && match self {
                ProbeChannel::Latency => true,
                ProbeChannel::Snmp => device.snmp_enabled && device.snmp_community().is_some(),
                ProbeChannel::Api => device.api_enabled && device.api_credentials().is_some(),
            }
    }
}

impl fmt::Display for ProbeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default worker limits per channel, used when no setting overrides them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeLimits {
    pub latency: usize,
    pub snmp: usize,
    pub api: usize,
}

impl Default for ProbeLimits {
    fn default() -> Self {
        Self {
            latency: 50,
            snmp: 25,
            api: 25,
        }
    }
}

impl ProbeLimits {
    pub fn get(&self, channel: ProbeChannel) -> usize {
        match channel {
            ProbeChannel::Latency => self.latency,
            ProbeChannel::Snmp => self.snmp,
            ProbeChannel::Api => self.api,
        }
    }
}

/// Positive integer, given either as a JSON number or a numeric string.
fn parse_limit(value: &serde_json::Value) -> Option<usize> {
    let n = match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    usize::try_from(n).ok().filter(|n| *n > 0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeSummary {
    pub channel: ProbeChannel,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub last_error: Option<String>,
}

impl ProbeSummary {
    fn new(channel: ProbeChannel) -> Self {
        Self {
            channel,
            processed: 0,
            succeeded: 0,
            failed: 0,
            duration_ms: 0,
            last_error: None,
        }
    }

    fn record(&mut self, outcome: Result<(), String>) {
        self.processed += 1;
        match outcome {
            Ok(()) => self.succeeded += 1,
            Err(message) => {
                self.failed += 1;
                self.last_error = Some(message);
            }
        }
    }
}

/// The network side of a probe, one method per channel.
#[async_trait]
pub trait DeviceProbe: Send + Sync {
    async fn latency(&self, device: &nas_device::Model) -> LatencyResult;
    /// First line of the device's `sysDescr`.
    async fn snmp(&self, device: &nas_device::Model) -> Result<String, SnmpError>;
    /// Whether `api_identity` knows how to talk to this vendor.
    fn supports_api(&self, vendor_code: &str) -> bool;
    async fn api_identity(&self, device: &nas_device::Model) -> Result<String, VendorError>;
}

/// Probes real devices over ICMP/TCP, UDP/161 and the vendor management APIs known to
/// `registry`.
pub struct NetworkProbe {
    pinger: IcmpPinger,
    registry: VendorRegistry,
    api_timeout: Duration,
}

impl NetworkProbe {
    pub fn new(registry: VendorRegistry, api_timeout: Duration) -> Self {
        Self::with_pinger(IcmpPinger::new(), registry, api_timeout)
    }

    pub fn with_pinger(
        pinger: IcmpPinger,
        registry: VendorRegistry,
        api_timeout: Duration,
    ) -> Self {
        Self {
            pinger,
            registry,
            api_timeout,
        }
    }
}

#[async_trait]
impl DeviceProbe for NetworkProbe {
    async fn latency(&self, device: &nas_device::Model) -> LatencyResult {
        latency::measure(&self.pinger, device).await
    }

    async fn snmp(&self, device: &nas_device::Model) -> Result<String, SnmpError> {
        let community = device.snmp_community().ok_or(SnmpError::NoCommunity)?;
        let port = u16::try_from(device.snmp_port)
            .ok()
            .filter(|p| *p != 0)
            .unwrap_or(DEFAULT_SNMP_PORT);
        snmp::get_sys_descr(&device.ipaddr, port, community, SNMP_TIMEOUT, SNMP_RETRIES).await
    }

    fn supports_api(&self, vendor_code: &str) -> bool {
        self.registry.supports(vendor_code)
    }

    async fn api_identity(&self, device: &nas_device::Model) -> Result<String, VendorError> {
        let connector = self.registry.get(&device.vendor_code).ok_or_else(|| {
            VendorError::InvalidConfig(format!("no API adapter for vendor {}", device.vendor_code))
        })?;
        let params = ConnectParams::from_device(device, self.api_timeout).ok_or_else(|| {
            VendorError::InvalidConfig("missing API credentials or port".to_string())
        })?;
        let client = connector.connect(&params).await?;
        let identity = client.identity().await;
        if let Err(e) = client.close().await {
            debug!(device_id = device.id, error = %e, "Error closing API probe session.");
        }
        identity
    }
}

/// Runs one channel against one device and writes that channel's columns.
async fn probe_device(
    channel: ProbeChannel,
    device: &nas_device::Model,
    probe: &dyn DeviceProbe,
    directory: &dyn DeviceDirectory,
) -> Result<(), String> {
    let (written, outcome) = match channel {
        ProbeChannel::Latency => {
            let result = probe.latency(device).await;
            let update = LatencyUpdate {
                latency_ms: result.latency_ms,
                message: result.message.clone(),
                probed_at: Utc::now(),
            };
            let outcome = if result.is_reachable() {
                Ok(())
            } else {
                Err(result.message)
            };
            (directory.update_latency(device.id, &update).await, outcome)
        }
        ProbeChannel::Snmp => {
            let (update, outcome) = match probe.snmp(device).await {
                Ok(model) => (
                    SnmpUpdate {
                        ok: true,
                        message: format!("sysDescr: {model}"),
                        model: Some(model),
                        probed_at: Utc::now(),
                    },
                    Ok(()),
                ),
                Err(e) => (
                    SnmpUpdate {
                        ok: false,
                        message: e.to_string(),
                        model: None,
                        probed_at: Utc::now(),
                    },
                    Err(e.to_string()),
                ),
            };
            (directory.update_snmp(device.id, &update).await, outcome)
        }
        ProbeChannel::Api => {
            let result = if probe.supports_api(&device.vendor_code) {
                probe
                    .api_identity(device)
                    .await
                    .map_err(|e| e.to_string())
            } else {
                Err(format!("unsupported vendor {}", device.vendor_code))
            };
            let update = ApiUpdate {
                ok: result.is_ok(),
                message: match &result {
                    Ok(identity) => format!("identity: {identity}"),
                    Err(message) => message.clone(),
                },
                probed_at: Utc::now(),
            };
            (
                directory.update_api(device.id, &update).await,
                result.map(|_| ()),
            )
        }
    };

    if let Err(e) = written {
        error!(device_id = device.id, %channel, error = %e, "Failed to store probe result.");
        return Err(format!("failed to store {channel} result: {e}"));
    }
    if let Err(message) = &outcome {
        debug!(device_id = device.id, %channel, error = %message, "Probe failed.");
    }
    outcome
}

pub struct FleetProber {
    devices: Arc<dyn DeviceDirectory>,
    settings: Arc<dyn SettingsRepository>,
    probe: Arc<dyn DeviceProbe>,
    limits: ProbeLimits,
}

impl FleetProber {
    pub fn new(
        devices: Arc<dyn DeviceDirectory>,
        settings: Arc<dyn SettingsRepository>,
        probe: Arc<dyn DeviceProbe>,
        limits: ProbeLimits,
    ) -> Self {
        Self {
            devices,
            settings,
            probe,
            limits,
        }
    }

    pub async fn sweep_latency(&self) -> Result<ProbeSummary, ProbeError> {
        self.sweep(ProbeChannel::Latency).await
    }

    pub async fn sweep_snmp(&self) -> Result<ProbeSummary, ProbeError> {
        self.sweep(ProbeChannel::Snmp).await
    }

    pub async fn sweep_api(&self) -> Result<ProbeSummary, ProbeError> {
        self.sweep(ProbeChannel::Api).await
    }

    pub async fn probe_latency_now(&self, device_id: i64) -> Result<ProbeSummary, ProbeError> {
        self.probe_now(ProbeChannel::Latency, device_id).await
    }

    pub async fn probe_snmp_now(&self, device_id: i64) -> Result<ProbeSummary, ProbeError> {
        self.probe_now(ProbeChannel::Snmp, device_id).await
    }

    pub async fn probe_api_now(&self, device_id: i64) -> Result<ProbeSummary, ProbeError> {
        self.probe_now(ProbeChannel::Api, device_id).await
    }

    /// Worker limit for `channel`: the settings override when it holds a positive
    /// integer, the configured default otherwise.
    pub async fn worker_limit(&self, channel: ProbeChannel) -> usize {
        let default = self.limits.get(channel).max(1);
        match self.settings.get_setting(channel.settings_key()).await {
            Ok(Some(value)) => parse_limit(&value).unwrap_or_else(|| {
                warn!(
                    key = channel.settings_key(),
                    %value,
                    "Ignoring invalid worker limit setting."
                );
                default
            }),
            Ok(None) => default,
            Err(e) => {
                warn!(
                    key = channel.settings_key(),
                    error = %e,
                    "Failed to read worker limit setting."
                );
                default
            }
        }
    }

    /// Probes every eligible enabled device once and waits for all of them. Only a failure
    /// to list the devices is returned as an error.
    #[instrument(skip(self))]
    pub async fn sweep(&self, channel: ProbeChannel) -> Result<ProbeSummary, ProbeError> {
        let started = Instant::now();
        let devices = self.devices.list_enabled().await?;
        let limit = self.worker_limit(channel).await;
        let semaphore = Arc::new(Semaphore::new(limit));

        let mut tasks = JoinSet::new();
        for device in devices.into_iter().filter(|d| channel.is_eligible(d)) {
            let semaphore = semaphore.clone();
            let probe = self.probe.clone();
            let directory = self.devices.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| e.to_string())?;
                probe_device(channel, &device, probe.as_ref(), directory.as_ref()).await
            });
        }

        let mut summary = ProbeSummary::new(channel);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    error!(%channel, error = %e, "Probe task aborted.");
                    summary.record(Err(format!("probe task aborted: {e}")));
                }
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            %channel,
            workers = limit,
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            duration_ms = summary.duration_ms,
            "Probe sweep finished."
        );
        Ok(summary)
    }

    /// Probes one device on one channel right away.
    #[instrument(skip(self))]
    pub async fn probe_now(
        &self,
        channel: ProbeChannel,
        device_id: i64,
    ) -> Result<ProbeSummary, ProbeError> {
        let device = self
            .devices
            .get_by_id(device_id)
            .await?
            .ok_or_else(|| ProbeError::NotFound(format!("device {device_id}")))?;
        if !channel.is_eligible(&device) {
            return Err(ProbeError::CapabilityDisabled(format!(
                "{channel} probing is not enabled on device {}",
                device.name
            )));
        }

        let started = Instant::now();
        let mut summary = ProbeSummary::new(channel);
        summary.record(
            probe_device(channel, &device, self.probe.as_ref(), self.devices.as_ref()).await,
        );
        summary.duration_ms = started.elapsed().as_millis() as u64;
        Ok(summary)
    }
}
