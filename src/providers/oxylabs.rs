//! Oxylabs gateway adapter
//!
//! Residential traffic goes through `pr.oxylabs.io:7777`, datacenter through
//! `dc.oxylabs.io:8001`. Usernames read `customer-<user>-cc-us-st-us_ny-city-new_york-sessid-<id>`;
//! datacenter IPs cannot be targeted by city.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::any::Any;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use super::base::{
    date_param, json_f64, json_items, json_string, json_string_list, json_u64, AdapterSettings,
    AuthScheme, BaseAdapter,
};
use super::pool::ProxyPool;
use super::session::{session_id, proxy_id, slug, UsernameBuilder};
use super::{bytes_to_mb, degraded_stats, ProviderAdapter, DEFAULT_BATCH_SIZE};
use crate::error::{BrokerError, Result};
use crate::models::{
    static_regions, GetProxyOptions, ProviderConfig, ProviderType, ProxyInfo, ProxyLocation,
    ProxyUsageStats, Region, UsageCounters,
};

const QUALITY: u8 = 92;
const DEFAULT_STICKY_MINUTES: u32 = 10;

const FALLBACK_REGIONS: &[(&str, &str)] = &[
    ("US", "United States"),
    ("GB", "United Kingdom"),
    ("DE", "Germany"),
    ("FR", "France"),
    ("CA", "Canada"),
    ("AU", "Australia"),
    ("JP", "Japan"),
    ("KR", "South Korea"),
    ("SG", "Singapore"),
    ("BR", "Brazil"),
    ("IN", "India"),
    ("MX", "Mexico"),
    ("IT", "Italy"),
    ("ES", "Spain"),
    ("NL", "Netherlands"),
    ("SE", "Sweden"),
    ("CH", "Switzerland"),
    ("PL", "Poland"),
    ("TR", "Turkey"),
    ("ZA", "South Africa"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OxylabsProxyType {
    #[default]
    Residential,
    Datacenter,
}

impl FromStr for OxylabsProxyType {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "residential" => Ok(OxylabsProxyType::Residential),
            "datacenter" => Ok(OxylabsProxyType::Datacenter),
            other => Err(BrokerError::InvalidConfig(format!("unknown oxylabs proxy type: {}", other))),
        }
    }
}

impl OxylabsProxyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OxylabsProxyType::Residential => "residential",
            OxylabsProxyType::Datacenter => "datacenter",
        }
    }

    pub fn gateway(&self) -> (&'static str, u16) {
        match self {
            OxylabsProxyType::Residential => ("pr.oxylabs.io", 7777),
            OxylabsProxyType::Datacenter => ("dc.oxylabs.io", 8001),
        }
    }

    fn supports_city(&self) -> bool {
        matches!(self, OxylabsProxyType::Residential)
    }
}

impl fmt::Display for OxylabsProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct OxylabsAdapter {
    base: BaseAdapter,
    pool: ProxyPool,
    proxy_type: RwLock<OxylabsProxyType>,
}

impl OxylabsAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        Self {
            base: BaseAdapter::new(ProviderType::Oxylabs, settings, AuthScheme::Standard),
            pool: ProxyPool::new(),
            proxy_type: RwLock::new(OxylabsProxyType::default()),
        }
    }

    pub fn proxy_type(&self) -> OxylabsProxyType {
        *self.proxy_type.read()
    }

    /// Switch gateway family; cached credentials belong to the old gateway and are dropped
    pub fn switch_proxy_type(&self, proxy_type: OxylabsProxyType) {
        *self.proxy_type.write() = proxy_type;
        self.pool.clear();
        info!(vendor = self.name(), proxy_type = %proxy_type, "Switched proxy type");
    }

    fn customer(username: &str) -> String {
        if username.starts_with("customer-") {
            username.to_string()
        } else {
            format!("customer-{}", username)
        }
    }

    fn parse_region(item: &Value, cost_per_gb: f64) -> Option<Region> {
        let code = json_string(item, "code")?;
        let name = json_string(item, "name").unwrap_or_else(|| code.clone());
        let mut region = Region::new(&code, &name, cost_per_gb);
        region.cities = json_string_list(item, "cities");
        region.available_proxies = json_u64(item, "ip_count");
        Some(region)
    }
}

#[async_trait]
impl ProviderAdapter for OxylabsAdapter {
    fn base(&self) -> &BaseAdapter {
        &self.base
    }

    fn pool(&self) -> &ProxyPool {
        &self.pool
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn initialize(&mut self, config: ProviderConfig) -> Result<()> {
        let proxy_type = config
            .extra_str("proxyType")
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        *self.proxy_type.write() = proxy_type;
        self.base.initialize(config)?;

        if !self.test_connection().await? {
            warn!(vendor = self.name(), "Failed to connect to vendor API during initialization");
        }
        Ok(())
    }

    async fn get_proxy_list(&self, options: &GetProxyOptions) -> Result<Vec<ProxyInfo>> {
        let config = self.base.config()?;
        let proxy_type = self.proxy_type();
        let (host, port) = proxy_type.gateway();

        let city = options.city.as_deref().filter(|_| proxy_type.supports_city());
        let prefix = UsernameBuilder::new(&Self::customer(
            config.username.as_deref().unwrap_or_default(),
        ))
        .token_opt("cc", options.country.as_deref().map(str::to_lowercase))
        .token_opt("st", options.state.as_deref().map(slug))
        .token_opt("city", city.map(slug))
        .build();

        let sesstime = options
            .session_duration
            .or_else(|| options.is_sticky().then_some(DEFAULT_STICKY_MINUTES));

        let limit = options.limit_or(DEFAULT_BATCH_SIZE);
        let mut proxies = Vec::with_capacity(limit);

        for _ in 0..limit {
            let session = session_id();
            let username = UsernameBuilder::new(&prefix)
                .token("sessid", &session)
                .token_opt("sesstime", sesstime.map(|m| m.to_string()))
                .build();

            let mut proxy = ProxyInfo::new(
                proxy_id(ProviderType::Oxylabs.as_str()),
                host,
                port,
                ProviderType::Oxylabs.as_str(),
                config.cost_per_gb,
            );
            proxy.username = Some(username);
            proxy.password = config.password.clone();
            proxy.protocol = options.protocol_or_default();
            proxy.location = ProxyLocation {
                country: options
                    .country
                    .as_deref()
                    .map(str::to_uppercase)
                    .unwrap_or_else(|| "US".to_string()),
                state: options.state.clone(),
                city: city.map(str::to_string),
            };
            proxy.quality = QUALITY;
            proxy.session_id = Some(session);
            proxy.metadata.insert("proxyType".into(), json!(proxy_type.as_str()));
            proxy.metadata.insert("gateway".into(), json!(true));
            if let Some(minutes) = sesstime {
                proxy.expire_after_minutes(minutes);
            }

            proxies.push(proxy);
        }

        info!(
            vendor = self.name(),
            count = proxies.len(),
            proxy_type = %proxy_type,
            "Generated proxy configurations"
        );
        Ok(self.pool.cache_all(proxies))
    }

    async fn get_usage_stats(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<ProxyUsageStats> {
        let cost_per_gb = self.base.cost_per_gb()?;

        let mut query = Vec::new();
        if let Some(from) = date_param(start) {
            query.push(("date_from", from));
        }
        if let Some(to) = date_param(end) {
            query.push(("date_to", to));
        }

        let body = match self.base.get_json("/v1/traffic", &query).await {
            Ok(Value::Null) => return degraded_stats(&self.base, start, end, &"empty traffic response"),
            Ok(body) => body,
            Err(e) => return degraded_stats(&self.base, start, end, &e),
        };

        let total = json_u64(&body, "queries");
        let successful = json_u64(&body, "successful");
        let counters = UsageCounters {
            total_requests: total,
            successful_requests: successful,
            failed_requests: total.saturating_sub(successful),
            bandwidth_mb: bytes_to_mb(json_u64(&body, "traffic")),
            average_latency: json_f64(&body, "avg_response_time"),
        };

        Ok(ProxyUsageStats::from_counters(counters, cost_per_gb, start, end))
    }

    async fn get_available_regions(&self) -> Result<Vec<Region>> {
        let cost_per_gb = self.base.cost_per_gb()?;

        let body = match self.base.get_json("/v1/locations", &[]).await {
            Ok(body) => body,
            Err(e) => {
                warn!(vendor = self.name(), error = %e, "Failed to get regions, using fallback list");
                return Ok(static_regions(FALLBACK_REGIONS, cost_per_gb));
            }
        };

        // Unrecognized shapes are an empty answer, not a failure
        let regions = json_items(&body, "countries")
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| Self::parse_region(item, cost_per_gb))
                    .collect()
            })
            .unwrap_or_default();
        Ok(regions)
    }

    async fn test_connection(&self) -> Result<bool> {
        self.base.ensure_initialized()?;
        match self.base.get_ok("/v1/user").await {
            Ok(ok) => Ok(ok),
            Err(e) => {
                warn!(vendor = self.name(), error = %e, "Connection test failed");
                Ok(false)
            }
        }
    }
}
