use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;
use url::Url;

use crate::error::{BrokerError, Result};

/// Failure count at which a pooled proxy is reported as unhealthy
pub const UNHEALTHY_FAILURE_THRESHOLD: u32 = 3;

/// Egress proxy protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    #[default]
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks5 => "socks5",
        }
    }

    pub fn is_socks(&self) -> bool {
        matches!(self, ProxyProtocol::Socks5)
    }
}

impl FromStr for ProxyProtocol {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "http" => Ok(ProxyProtocol::Http),
            "https" => Ok(ProxyProtocol::Https),
            "socks5" => Ok(ProxyProtocol::Socks5),
            other => Err(BrokerError::InvalidConfig(format!("unsupported protocol: {}", other))),
        }
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Session behaviour requested from a gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Keep the same exit IP for the session duration
    Sticky,
    /// New exit IP per request
    Rotating,
}

impl FromStr for SessionMode {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sticky" => Ok(SessionMode::Sticky),
            "rotating" => Ok(SessionMode::Rotating),
            other => Err(BrokerError::InvalidConfig(format!("unknown session mode: {}", other))),
        }
    }
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Sticky => "sticky",
            SessionMode::Rotating => "rotating",
        }
    }
}

/// Geographic location of an egress credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProxyLocation {
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

/// One egress credential issued by a vendor adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub protocol: ProxyProtocol,
    /// Provider type tag of the issuing adapter
    pub provider: String,
    pub location: ProxyLocation,
    /// Vendor quality score (0-100)
    pub quality: u8,
    /// Last known latency in milliseconds
    pub latency: u32,
    pub in_use: bool,
    pub failure_count: u32,
    #[serde(rename = "costPerGB")]
    pub cost_per_gb: f64,
    pub session_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl ProxyInfo {
    /// Fresh, unused credential with no auth, location or metadata yet
    pub fn new(
        id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        provider: &str,
        cost_per_gb: f64,
    ) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            username: None,
            password: None,
            protocol: ProxyProtocol::default(),
            provider: provider.to_string(),
            location: ProxyLocation::default(),
            quality: 0,
            latency: 0,
            in_use: false,
            failure_count: 0,
            cost_per_gb,
            session_id: None,
            expires_at: None,
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    /// Set `expires_at` to `minutes` after creation
    pub fn expire_after_minutes(&mut self, minutes: u32) {
        self.expires_at = Some(self.created_at + chrono::Duration::minutes(minutes as i64));
    }

    /// Connection URL with credentials, suitable for `reqwest::Proxy::all`
    pub fn proxy_url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}://{}:{}",
            self.protocol.as_str(),
            self.host,
            self.port
        ))?;

        if let Some(ref username) = self.username {
            if !username.is_empty() {
                let rejected =
                    || BrokerError::InvalidConfig(format!("proxy url for {} cannot carry credentials", self.id));
                url.set_username(username).map_err(|_| rejected())?;
                url.set_password(self.password.as_deref()).map_err(|_| rejected())?;
            }
        }

        Ok(url)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    pub fn is_healthy(&self) -> bool {
        self.failure_count < UNHEALTHY_FAILURE_THRESHOLD
    }
}

/// Options accepted by `ProviderAdapter::get_proxy_list`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetProxyOptions {
    pub country: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub protocol: Option<ProxyProtocol>,
    pub session: Option<SessionMode>,
    /// Sticky session duration in minutes
    pub session_duration: Option<u32>,
    pub limit: Option<usize>,
    pub zip: Option<String>,
    pub asn: Option<String>,
    pub continent: Option<String>,
}

impl GetProxyOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }

    /// Requested batch size; zero is treated as unset
    pub fn limit_or(&self, default: usize) -> usize {
        match self.limit {
            Some(0) | None => default,
            Some(limit) => limit,
        }
    }

    pub fn protocol_or_default(&self) -> ProxyProtocol {
        self.protocol.unwrap_or_default()
    }

    pub fn is_sticky(&self) -> bool {
        self.session == Some(SessionMode::Sticky)
    }
}

/// Raw vendor counters before derivation
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageCounters {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub bandwidth_mb: f64,
    pub average_latency: f64,
}

/// Aggregate vendor-reported usage for a time window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyUsageStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    #[serde(rename = "totalBandwidthMB")]
    pub total_bandwidth_mb: f64,
    pub total_cost: f64,
    pub average_latency: f64,
    pub avg_cost_per_request: f64,
    #[serde(rename = "avgCostPerGB")]
    pub avg_cost_per_gb: f64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

impl ProxyUsageStats {
    /// All-zero snapshot; a missing window bound defaults to now
    pub fn empty(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        cost_per_gb: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            success_rate: 0.0,
            total_bandwidth_mb: 0.0,
            total_cost: 0.0,
            average_latency: 0.0,
            avg_cost_per_request: 0.0,
            avg_cost_per_gb: cost_per_gb,
            period_start: start.unwrap_or(now),
            period_end: end.unwrap_or(now),
        }
    }

    /// Derive rates and cost from raw counters
    pub fn from_counters(
        counters: UsageCounters,
        cost_per_gb: f64,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        let mut stats = Self::empty(start, end, cost_per_gb);
        let total_cost = (counters.bandwidth_mb / 1024.0) * cost_per_gb;

        stats.total_requests = counters.total_requests;
        stats.successful_requests = counters.successful_requests;
        stats.failed_requests = counters.failed_requests;
        stats.total_bandwidth_mb = counters.bandwidth_mb;
        stats.average_latency = counters.average_latency;
        stats.total_cost = total_cost;

        if counters.total_requests > 0 {
            let total = counters.total_requests as f64;
            stats.success_rate = counters.successful_requests as f64 / total;
            stats.avg_cost_per_request = total_cost / total;
        }

        stats
    }

    /// Replace the derived cost with a vendor-reported figure
    pub fn with_reported_cost(mut self, total_cost: f64) -> Self {
        self.total_cost = total_cost;
        self.avg_cost_per_request = if self.total_requests > 0 {
            total_cost / self.total_requests as f64
        } else {
            0.0
        };
        self
    }
}

/// One country/continent a vendor can route through
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub country: String,
    pub country_name: String,
    #[serde(default)]
    pub cities: Vec<String>,
    #[serde(default)]
    pub states: Vec<String>,
    pub available_proxies: u64,
    #[serde(rename = "costPerGB")]
    pub cost_per_gb: f64,
}

impl Region {
    pub fn new(country: &str, country_name: &str, cost_per_gb: f64) -> Self {
        Self {
            country: country.to_string(),
            country_name: country_name.to_string(),
            cities: Vec::new(),
            states: Vec::new(),
            available_proxies: 0,
            cost_per_gb,
        }
    }
}

/// Build regions from a static `(code, name)` table
pub fn static_regions(table: &[(&str, &str)], cost_per_gb: f64) -> Vec<Region> {
    table
        .iter()
        .map(|(code, name)| Region::new(code, name, cost_per_gb))
        .collect()
}

/// Outcome of a single health check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub proxy_id: String,
    pub healthy: bool,
    /// Elapsed check time in milliseconds
    pub response_time: u64,
    pub checked_at: DateTime<Utc>,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

/// Snapshot of an adapter's in-memory pool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total: usize,
    pub in_use: usize,
    pub available: usize,
    pub unhealthy: usize,
    pub by_country: BTreeMap<String, usize>,
    pub average_quality: f64,
    pub average_latency: f64,
}
