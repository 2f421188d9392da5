//! SmartProxy gateway adapter
//!
//! One backconnect endpoint (`gate.smartproxy.com:7000` unless overridden through
//! `extra.gateway` / `extra.port`), routing in the username:
//! `user-<user>-continent-eu-country-de-state-xx-city-berlin-zip-x-asn-x-session-<id>-sessionduration-<min>`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::any::Any;
use tracing::{debug, warn};

use super::base::{
    date_param, json_f64, json_items, json_string, json_u64, AdapterSettings, AuthScheme,
    BaseAdapter,
};
use super::pool::ProxyPool;
use super::session::{proxy_id, session_id, slug, UsernameBuilder};
use super::{bytes_to_mb, degraded_stats, ProviderAdapter, DEFAULT_BATCH_SIZE};
use crate::error::Result;
use crate::models::{
    static_regions, GetProxyOptions, ProviderConfig, ProviderType, ProxyInfo, ProxyLocation,
    ProxyUsageStats, Region, SessionMode, UsageCounters,
};

pub const DEFAULT_GATEWAY: &str = "gate.smartproxy.com";
pub const DEFAULT_PORT: u16 = 7000;
const QUALITY: u8 = 90;

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

pub struct SmartProxyAdapter {
    base: BaseAdapter,
    pool: ProxyPool,
    gateway: String,
    port: u16,
}

impl SmartProxyAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        Self {
            base: BaseAdapter::new(ProviderType::SmartProxy, settings, AuthScheme::Standard),
            pool: ProxyPool::new(),
            gateway: DEFAULT_GATEWAY.to_string(),
            port: DEFAULT_PORT,
        }
    }

    pub fn gateway(&self) -> (&str, u16) {
        (&self.gateway, self.port)
    }

    fn user_prefix(username: &str) -> String {
        if username.starts_with("user-") {
            username.to_string()
        } else {
            format!("user-{}", username)
        }
    }
}

#[async_trait]
impl ProviderAdapter for SmartProxyAdapter {
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
        self.gateway = config.extra_str("gateway").unwrap_or(DEFAULT_GATEWAY).to_string();
        self.port = config.extra_u16("port").unwrap_or(DEFAULT_PORT);
        self.base.initialize(config)
    }

    async fn get_proxy_list(&self, options: &GetProxyOptions) -> Result<Vec<ProxyInfo>> {
        let config = self.base.config()?;

        let prefix = UsernameBuilder::new(&Self::user_prefix(
            config.username.as_deref().unwrap_or_default(),
        ))
        .token_opt("continent", options.continent.as_deref().map(str::to_lowercase))
        .token_opt("country", options.country.as_deref().map(str::to_lowercase))
        .token_opt("state", options.state.as_deref().map(slug))
        .token_opt("city", options.city.as_deref().map(slug))
        .token_opt("zip", options.zip.as_deref())
        .token_opt("asn", options.asn.as_deref())
        .build();

        let rotating = options.session == Some(SessionMode::Rotating);
        let limit = options.limit_or(DEFAULT_BATCH_SIZE);
        let mut proxies = Vec::with_capacity(limit);

        for _ in 0..limit {
            let mut proxy = ProxyInfo::new(
                proxy_id(ProviderType::SmartProxy.as_str()),
                self.gateway.as_str(),
                self.port,
                ProviderType::SmartProxy.as_str(),
                config.cost_per_gb,
            );

            let mut username = UsernameBuilder::new(&prefix);
            if !rotating {
                let session = session_id();
                username = username
                    .token("session", &session)
                    .token_opt("sessionduration", options.session_duration.map(|m| m.to_string()));
                proxy.session_id = Some(session);
                if let Some(minutes) = options.session_duration {
                    proxy.expire_after_minutes(minutes);
                }
            }

            proxy.username = Some(username.build());
            proxy.password = config.password.clone();
            proxy.protocol = options.protocol_or_default();
            proxy.location = ProxyLocation {
                country: options
                    .country
                    .as_deref()
                    .map(str::to_uppercase)
                    .unwrap_or_else(|| "ANY".to_string()),
                state: options.state.clone(),
                city: options.city.clone(),
            };
            proxy.quality = QUALITY;
            proxy.metadata.insert("gateway".into(), json!(true));
            proxy.metadata.insert("rotating".into(), json!(rotating));

            proxies.push(proxy);
        }

        debug!(vendor = self.name(), count = proxies.len(), "Generated proxy configurations");
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
            query.push(("from", from));
        }
        if let Some(to) = date_param(end) {
            query.push(("to", to));
        }

        let body = match self.base.get_json("/v2/statistics/traffic", &query).await {
            Ok(Value::Null) => return degraded_stats(&self.base, start, end, &"empty traffic response"),
            Ok(body) => body,
            Err(e) => return degraded_stats(&self.base, start, end, &e),
        };

        let total = json_u64(&body, "requests");
        let successful = json_u64(&body, "successful_requests");
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

        let regions = self
            .base
            .get_json("/v2/endpoints", &[])
            .await
            .ok()
            .and_then(|body| {
                json_items(&body, "locations").map(|items| {
                    items
                        .iter()
                        .filter_map(|item| {
                            let code = json_string(item, "code")?.to_uppercase();
                            let name = json_string(item, "name").unwrap_or_else(|| code.clone());
                            Some(Region::new(&code, &name, cost_per_gb))
                        })
                        .collect::<Vec<_>>()
                })
            })
            .filter(|regions| !regions.is_empty());

        match regions {
            Some(regions) => Ok(regions),
            None => {
                warn!(vendor = self.name(), "Region listing unavailable, using fallback list");
                Ok(static_regions(FALLBACK_REGIONS, cost_per_gb))
            }
        }
    }

    async fn test_connection(&self) -> Result<bool> {
        self.base.ensure_initialized()?;
        match self.base.get_ok("/v2/subscriptions").await {
            Ok(ok) => Ok(ok),
            Err(e) => {
                warn!(vendor = self.name(), error = %e, "Connection test failed");
                Ok(false)
            }
        }
    }
}
