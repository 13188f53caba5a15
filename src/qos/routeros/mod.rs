//! MikroTik RouterOS adapter: simple queues over the RouterOS API (default port 8728).

pub mod protocol;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, instrument};

use self::protocol::{ApiConnection, Response};
use super::client::{ConnectParams, QueueConfig, VendorClient, VendorConnector, VendorError};

pub const DEFAULT_API_PORT: u16 = 8728;

/// Attributes managed by the adapter itself; extras may not override them.
const RESERVED_ATTRIBUTES: &[&str] = &[".id", "name", "max-limit"];

/// Formats a rate in Kbps the way RouterOS prints it (`k` = 1000 bit/s).
pub fn format_rate(kbps: i64) -> String {
    if kbps <= 0 {
        "0".to_string()
    } else if kbps % 1_000_000 == 0 {
        format!("{}G", kbps / 1_000_000)
    } else if kbps % 1000 == 0 {
        format!("{}M", kbps / 1000)
    } else {
        format!("{kbps}k")
    }
}

/// Parses a RouterOS rate (`512k`, `10M`, `1G`, or plain bit/s) into Kbps.
pub fn parse_rate(value: &str) -> Option<i64> {
    let value = value.trim();
    let (digits, multiplier) = match value.chars().last()? {
        'k' | 'K' => (&value[..value.len() - 1], 1),
        'M' => (&value[..value.len() - 1], 1000),
        'G' => (&value[..value.len() - 1], 1_000_000),
        _ => return value.parse::<i64>().ok().map(|bps| bps / 1000),
    };
    digits.parse::<i64>().ok().map(|n| n * multiplier)
}

/// `max-limit` value: upload (target → device) first, then download.
pub fn max_limit(config: &QueueConfig) -> String {
    format!(
        "{}/{}",
        format_rate(config.up_rate_kbps),
        format_rate(config.down_rate_kbps)
    )
}

fn validate(config: &QueueConfig) -> Result<(), VendorError> {
    if config.name.trim().is_empty() {
        return Err(VendorError::InvalidConfig("queue name is empty".to_string()));
    }
    if config.up_rate_kbps < 0 || config.down_rate_kbps < 0 {
        return Err(VendorError::InvalidConfig(format!(
            "negative rate {}/{} kbps",
            config.up_rate_kbps, config.down_rate_kbps
        )));
    }
    Ok(())
}

/// Builds the `=key=value` words shared by `add` and `set`.
fn queue_attributes(config: &QueueConfig) -> Vec<String> {
    let mut words = vec![
        format!("=name={}", config.name),
        format!("=max-limit={}", max_limit(config)),
    ];
    let mut keys: Vec<&String> = config.extra.keys().collect();
    keys.sort();
    for key in keys {
        if RESERVED_ATTRIBUTES.contains(&key.as_str()) {
            continue;
        }
        if let Some(value) = config.extra_str(key) {
            words.push(format!("={key}={value}"));
        }
    }
    words
}

pub struct RouterOsClient {
    address: String,
    timeout: Duration,
    conn: Mutex<ApiConnection<TcpStream>>,
}

impl RouterOsClient {
    /// Dials the device and logs in. Both steps share the configured timeout.
    #[instrument(skip(params), fields(address = %params.address()))]
    pub async fn connect(params: &ConnectParams) -> Result<Self, VendorError> {
        let address = params.address();
        let stream = match timeout(params.timeout, TcpStream::connect(address.as_str())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(VendorError::Connect {
                    addr: address,
                    reason: e.to_string(),
                });
            }
            Err(_) => return Err(VendorError::Timeout(format!("connect to {address}"))),
        };
        stream.set_nodelay(true)?;

        let mut conn = ApiConnection::new(stream);
        match timeout(params.timeout, conn.login(&params.username, &params.password)).await {
            Ok(result) => result?,
            Err(_) => return Err(VendorError::Timeout(format!("login to {address}"))),
        }
        debug!("Logged in to RouterOS API.");

        Ok(Self {
            address,
            timeout: params.timeout,
            conn: Mutex::new(conn),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn call(&self, words: &[String]) -> Result<Response, VendorError> {
        let command = words.first().cloned().unwrap_or_default();
        let mut conn = self.conn.lock().await;
        match timeout(self.timeout, conn.talk(words)).await {
            Ok(result) => result,
            Err(_) => Err(VendorError::Timeout(format!("{command} on {}", self.address))),
        }
    }
}

#[async_trait]
impl VendorClient for RouterOsClient {
    async fn create_queue(&self, config: &QueueConfig) -> Result<String, VendorError> {
        validate(config)?;
        if config.extra_str("target").is_none() {
            return Err(VendorError::InvalidConfig(
                "simple queue requires a 'target'".to_string(),
            ));
        }

        let mut words = vec!["/queue/simple/add".to_string()];
        words.extend(queue_attributes(config));
        let response = self.call(&words).await?;

        response
            .done
            .get("ret")
            .filter(|id| !id.is_empty())
            .cloned()
            .ok_or_else(|| VendorError::Protocol("add reply carried no object id".to_string()))
    }

    async fn delete_queue(&self, remote_id: &str) -> Result<(), VendorError> {
        let words = ["/queue/simple/remove".to_string(), format!("=.id={remote_id}")];
        match self.call(&words).await {
            Ok(_) => Ok(()),
            // Already gone on the device.
            Err(VendorError::Trap(reason)) if reason.contains("no such item") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn update_queue(&self, remote_id: &str, config: &QueueConfig) -> Result<(), VendorError> {
        validate(config)?;
        let mut words = vec!["/queue/simple/set".to_string(), format!("=.id={remote_id}")];
        words.extend(queue_attributes(config));
        self.call(&words).await.map(|_| ())
    }

    async fn identity(&self) -> Result<String, VendorError> {
        let response = self.call(&["/system/identity/print".to_string()]).await?;
        response
            .rows
            .first()
            .and_then(|row| row.get("name"))
            .map(str::to_owned)
            .ok_or_else(|| VendorError::Protocol("identity reply carried no name".to_string()))
    }

    async fn get_queue(&self, remote_id: &str) -> Result<QueueConfig, VendorError> {
        let words = ["/queue/simple/print".to_string(), format!("?.id={remote_id}")];
        let response = self.call(&words).await?;
        let row = response
            .rows
            .first()
            .ok_or_else(|| VendorError::NotFound(remote_id.to_owned()))?;

        let (up, down) = row
            .get("max-limit")
            .and_then(|limit| limit.split_once('/'))
            .map(|(up, down)| (parse_rate(up).unwrap_or(0), parse_rate(down).unwrap_or(0)))
            .unwrap_or((0, 0));

        let mut extra = serde_json::Map::new();
        for (key, value) in &row.attributes {
            if !RESERVED_ATTRIBUTES.contains(&key.as_str()) {
                extra.insert(key.clone(), serde_json::Value::String(value.clone()));
            }
        }

        Ok(QueueConfig {
            name: row.get("name").unwrap_or_default().to_owned(),
            up_rate_kbps: up,
            down_rate_kbps: down,
            extra,
        })
    }

    async fn close(&self) -> Result<(), VendorError> {
        let mut conn = self.conn.lock().await;
        // The device answers /quit with !fatal and drops the socket; no reply is awaited.
        let _ = timeout(Duration::from_secs(1), conn.send(&["/quit"])).await;
        conn.shutdown().await?;
        Ok(())
    }
}

/// Connector registered for vendor code 14988.
pub struct RouterOsConnector;

#[async_trait]
impl VendorConnector for RouterOsConnector {
    async fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn VendorClient>, VendorError> {
        Ok(Arc::new(RouterOsClient::connect(params).await?))
    }
}
