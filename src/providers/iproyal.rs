//! IPRoyal adapter
//!
//! Unlike the gateway vendors, IPRoyal hands out concrete IPs through
//! `POST /generate-proxy-list`; every returned entry is authenticated with the account
//! credentials from the provider config.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::any::Any;
use tracing::{info, instrument, warn};

use super::base::{
    date_param, json_f64, json_items, json_string, json_string_list, json_u64, AdapterSettings,
    AuthScheme, BaseAdapter,
};
use super::pool::ProxyPool;
use super::{degraded_stats, ProviderAdapter, DEFAULT_BATCH_SIZE};
use crate::error::Result;
use crate::models::{
    static_regions, GetProxyOptions, ProviderConfig, ProviderType, ProxyInfo, ProxyLocation,
    ProxyProtocol, ProxyUsageStats, Region, UsageCounters,
};

const DEFAULT_QUALITY: u8 = 80;

/// Vendor fields carried over into `ProxyInfo::metadata`
const METADATA_FIELDS: &[&str] = &["isp", "asn", "connection_type"];

const FALLBACK_REGIONS: &[(&str, &str)] = &[
    ("US", "United States"),
    ("GB", "United Kingdom"),
    ("DE", "Germany"),
    ("FR", "France"),
    ("CA", "Canada"),
    ("AU", "Australia"),
    ("JP", "Japan"),
    ("BR", "Brazil"),
    ("IN", "India"),
    ("NL", "Netherlands"),
];

pub struct IpRoyalAdapter {
    base: BaseAdapter,
    pool: ProxyPool,
}

impl IpRoyalAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        Self {
            base: BaseAdapter::new(ProviderType::IpRoyal, settings, AuthScheme::Standard),
            pool: ProxyPool::new(),
        }
    }

    fn map_proxy(&self, item: &Value, config: &ProviderConfig) -> Option<ProxyInfo> {
        let ip = json_string(item, "ip")?;
        let port = u16::try_from(json_u64(item, "port")).ok().filter(|p| *p > 0)?;

        let mut proxy = ProxyInfo::new(
            format!("{}-{}:{}", ProviderType::IpRoyal.as_str(), ip, port),
            ip,
            port,
            ProviderType::IpRoyal.as_str(),
            config.cost_per_gb,
        );
        proxy.username = config.username.clone();
        proxy.password = config.password.clone();
        proxy.protocol = item
            .get("protocol")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        proxy.location = ProxyLocation {
            country: json_string(item, "country_code").unwrap_or_else(|| "US".to_string()),
            state: json_string(item, "state"),
            city: json_string(item, "city"),
        };
        proxy.quality = item
            .get("quality")
            .and_then(Value::as_u64)
            .map(|q| q.min(100) as u8)
            .unwrap_or(DEFAULT_QUALITY);
        proxy.latency = u32::try_from(json_u64(item, "latency")).unwrap_or(u32::MAX);
        proxy.session_id = json_string(item, "session_id");
        proxy.expires_at = item
            .get("expires_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        for field in METADATA_FIELDS {
            if let Some(value) = item.get(*field).filter(|v| !v.is_null()) {
                proxy.metadata.insert((*field).to_string(), value.clone());
            }
        }

        Some(proxy)
    }

    fn parse_region(item: &Value, cost_per_gb: f64) -> Option<Region> {
        let code = json_string(item, "code")?;
        let name = json_string(item, "name").unwrap_or_else(|| code.clone());
        let mut region = Region::new(&code, &name, cost_per_gb);
        region.cities = json_string_list(item, "cities");
        region.states = json_string_list(item, "states");
        region.available_proxies = json_u64(item, "proxy_count");
        Some(region)
    }
}

#[async_trait]
impl ProviderAdapter for IpRoyalAdapter {
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
        self.base.initialize(config)?;
        if !self.test_connection().await? {
            warn!(vendor = self.name(), "Failed to connect to vendor API during initialization");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(vendor = "IPRoyal"))]
    async fn get_proxy_list(&self, options: &GetProxyOptions) -> Result<Vec<ProxyInfo>> {
        let config = self.base.config()?;

        let body = json!({
            "country": options.country,
            "city": options.city,
            "protocol": options.protocol_or_default().as_str(),
            "rotation": if options.is_sticky() { "session" } else { "rotating" },
            "limit": options.limit_or(DEFAULT_BATCH_SIZE),
        });

        // Transport failures propagate: there is no local fallback for concrete IPs
        let response = self.base.post_json("/generate-proxy-list", &body).await?;

        let proxies: Vec<ProxyInfo> = json_items(&response, "proxies")
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| self.map_proxy(item, config))
                    .collect()
            })
            .unwrap_or_default();

        info!(count = proxies.len(), "Fetched proxies");
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
            query.push(("start_date", from));
        }
        if let Some(to) = date_param(end) {
            query.push(("end_date", to));
        }

        let body = match self.base.get_json("/usage/stats", &query).await {
            Ok(body @ Value::Object(_)) => body,
            Ok(_) => return degraded_stats(&self.base, start, end, &"unexpected usage response"),
            Err(e) => return degraded_stats(&self.base, start, end, &e),
        };

        let counters = UsageCounters {
            total_requests: json_u64(&body, "total_requests"),
            successful_requests: json_u64(&body, "successful_requests"),
            failed_requests: json_u64(&body, "failed_requests"),
            bandwidth_mb: json_f64(&body, "total_bandwidth_mb"),
            average_latency: json_f64(&body, "average_latency"),
        };

        let stats = ProxyUsageStats::from_counters(counters, cost_per_gb, start, end);
        Ok(match body.get("total_cost").and_then(Value::as_f64) {
            Some(reported) => stats.with_reported_cost(reported),
            None => stats,
        })
    }

    async fn get_available_regions(&self) -> Result<Vec<Region>> {
        let cost_per_gb = self.base.cost_per_gb()?;

        let regions = match self.base.get_json("/locations", &[]).await {
            Ok(body) => json_items(&body, "countries")
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| Self::parse_region(item, cost_per_gb))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default(),
            Err(e) => {
                warn!(vendor = self.name(), error = %e, "Failed to get regions");
                Vec::new()
            }
        };

        if regions.is_empty() {
            return Ok(static_regions(FALLBACK_REGIONS, cost_per_gb));
        }
        Ok(regions)
    }

    async fn test_connection(&self) -> Result<bool> {
        self.base.ensure_initialized()?;
        match self.base.get_ok("/account/balance").await {
            Ok(ok) => Ok(ok),
            Err(e) => {
                warn!(vendor = self.name(), error = %e, "Connection test failed");
                Ok(false)
            }
        }
    }
}
