//! IPIDEA tunnel / sub-account adapter
//!
//! The open API is keyed by an `appkey` field in every JSON body and answers with
//! `{ "ret": 0, "ret_data": ... }`. Sub-accounts from `proxy_account_list` are issued first;
//! the remainder is made up of locally generated `zone-custom` tunnel credentials.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::any::Any;
use tracing::{debug, error, info, warn};

use super::base::{json_f64, json_string, json_u64, AdapterSettings, AuthScheme, BaseAdapter};
use super::pool::ProxyPool;
use super::session::{proxy_id, session_id, squash, UsernameBuilder};
use super::{degraded_stats, ProviderAdapter, DEFAULT_BATCH_SIZE};
use crate::error::{BrokerError, Result};
use crate::models::{
    static_regions, GetProxyOptions, ProviderConfig, ProviderType, ProxyInfo, ProxyLocation,
    ProxyProtocol, ProxyUsageStats, Region, UsageCounters,
};

pub const HTTP_GATEWAY: &str = "proxy.ipidea.io";
pub const SOCKS_GATEWAY: &str = "socks.ipidea.io";
pub const DEFAULT_PORT: u16 = 2336;
const QUALITY: u8 = 85;
const ACCOUNT_PAGE_SIZE: u32 = 100;
const DEFAULT_SESSION_MINUTES: u32 = 30;
const MAX_SESSION_MINUTES: u32 = 120;

const SUPPORTED_REGIONS: &[(&str, &str)] = &[
    ("US", "United States"),
    ("GB", "United Kingdom"),
    ("DE", "Germany"),
    ("FR", "France"),
    ("CA", "Canada"),
    ("AU", "Australia"),
    ("JP", "Japan"),
    ("KR", "South Korea"),
    ("SG", "Singapore"),
    ("HK", "Hong Kong"),
    ("TW", "Taiwan"),
    ("BR", "Brazil"),
    ("IN", "India"),
    ("RU", "Russia"),
    ("MX", "Mexico"),
    ("IT", "Italy"),
    ("ES", "Spain"),
    ("NL", "Netherlands"),
    ("PL", "Poland"),
    ("TH", "Thailand"),
    ("VN", "Vietnam"),
    ("PH", "Philippines"),
    ("ID", "Indonesia"),
    ("MY", "Malaysia"),
];

pub struct IpideaAdapter {
    base: BaseAdapter,
    pool: ProxyPool,
}

impl IpideaAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        Self {
            base: BaseAdapter::new(ProviderType::Ipidea, settings, AuthScheme::Custom),
            pool: ProxyPool::new(),
        }
    }

    /// POST to the open API with `appkey` merged into the body
    async fn open_api(&self, path: &str, params: Value) -> Result<Value> {
        let config = self.base.config()?;

        let mut body = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Some(key) = config.api_key.as_deref() {
            body.insert("appkey".into(), json!(key));
        }

        self.base.post_json(path, &Value::Object(body)).await
    }

    /// Open API call that must answer `ret == 0`; yields `ret_data`
    async fn open_api_ok(&self, path: &str, params: Value) -> Result<Value> {
        let body = self.open_api(path, params).await?;
        if body.get("ret").and_then(Value::as_i64) == Some(0) {
            return Ok(body.get("ret_data").cloned().unwrap_or(Value::Null));
        }

        let message = json_string(&body, "msg").unwrap_or_else(|| "non-zero ret".to_string());
        Err(BrokerError::vendor(self.name(), message))
    }

    fn gateway(&self, config: &ProviderConfig, protocol: ProxyProtocol) -> (String, u16) {
        let host = config
            .extra_str("gateway")
            .unwrap_or(if protocol.is_socks() { SOCKS_GATEWAY } else { HTTP_GATEWAY });
        let port = config.extra_u16("port").unwrap_or(DEFAULT_PORT);
        (host.to_string(), port)
    }

    fn account_proxy(&self, account: &Value, config: &ProviderConfig, options: &GetProxyOptions) -> Option<ProxyInfo> {
        let protocol = options.protocol_or_default();
        let (host, port) = self.gateway(config, protocol);
        let name = json_string(account, "account").or_else(|| json_string(account, "username"));
        let key = name.clone().or_else(|| json_string(account, "id"))?;

        let mut proxy = ProxyInfo::new(
            format!("{}-{}", ProviderType::Ipidea.as_str(), key),
            host,
            port,
            ProviderType::Ipidea.as_str(),
            config.cost_per_gb,
        );
        proxy.username = name;
        proxy.password = json_string(account, "password");
        proxy.protocol = protocol;
        proxy.location = ProxyLocation {
            country: json_string(account, "region")
                .or_else(|| options.country.clone())
                .unwrap_or_else(|| "ANY".to_string()),
            state: None,
            city: options.city.clone(),
        };
        proxy.quality = QUALITY;
        for (field, meta_key) in [("id", "accountId"), ("flow_limit", "flowLimit"), ("flow_used", "flowUsed")] {
            if let Some(value) = account.get(field).filter(|v| !v.is_null()) {
                proxy.metadata.insert(meta_key.into(), value.clone());
            }
        }
        Some(proxy)
    }

    fn tunnel_proxy(&self, config: &ProviderConfig, options: &GetProxyOptions) -> ProxyInfo {
        let protocol = options.protocol_or_default();
        let (host, port) = self.gateway(config, protocol);

        let base = config.username.as_deref().unwrap_or_default();
        let zoned = if base.contains("-zone-custom") {
            UsernameBuilder::new(base)
        } else {
            UsernameBuilder::new(base).token("zone", "custom")
        };
        let mut username = zoned
            .token_opt("region", options.country.as_deref().map(str::to_lowercase))
            .token_opt("st", options.state.as_deref().map(squash))
            .token_opt("city", options.city.as_deref().map(squash));

        let mut sticky = None;
        if options.is_sticky() {
            let session = session_id();
            let minutes = options
                .session_duration
                .unwrap_or(DEFAULT_SESSION_MINUTES)
                .min(MAX_SESSION_MINUTES);
            username = username
                .token("session", &session)
                .token("sessTime", minutes.to_string());
            sticky = Some((session, minutes));
        }
        let username = username.token_opt("asn", options.asn.as_deref()).build();

        let mut proxy = ProxyInfo::new(
            proxy_id("ipidea-tunnel"),
            host.clone(),
            port,
            ProviderType::Ipidea.as_str(),
            config.cost_per_gb,
        );
        proxy.username = Some(username);
        proxy.password = Some(config.password.clone().unwrap_or_default());
        proxy.protocol = protocol;
        proxy.location = ProxyLocation {
            country: options.country.clone().unwrap_or_else(|| "ANY".to_string()),
            state: options.state.clone(),
            city: options.city.clone(),
        };
        proxy.quality = QUALITY;
        proxy.metadata.insert("type".into(), json!("tunnel"));
        proxy.metadata.insert("gateway".into(), json!(host));
        if let Some((session, minutes)) = sticky {
            proxy.session_id = Some(session);
            proxy.expire_after_minutes(minutes);
        }
        proxy
    }

    fn tunnels(&self, config: &ProviderConfig, options: &GetProxyOptions, count: usize) -> Vec<ProxyInfo> {
        (0..count).map(|_| self.tunnel_proxy(config, options)).collect()
    }

    /// Sub-accounts first, tunnels for the rest; `fresh_only` skips accounts already cached
    async fn collect(&self, options: &GetProxyOptions, limit: usize, fresh_only: bool) -> Result<Vec<ProxyInfo>> {
        let config = self.base.config()?;

        let params = json!({ "page": 1, "limit": ACCOUNT_PAGE_SIZE });
        let response = self.open_api("/api/open/proxy_account_list", params).await?;

        if response.get("ret").and_then(Value::as_i64) != Some(0) {
            error!(vendor = self.name(), "Failed to get proxy accounts, generating tunnels");
            return Ok(self.pool.cache_all(self.tunnels(config, options, limit)));
        }

        let mut proxies: Vec<ProxyInfo> = response
            .pointer("/ret_data/list")
            .and_then(Value::as_array)
            .map(|accounts| {
                accounts
                    .iter()
                    .filter_map(|account| self.account_proxy(account, config, options))
                    .filter(|proxy| !fresh_only || self.pool.get(&proxy.id).is_none())
                    .take(limit)
                    .collect()
            })
            .unwrap_or_default();

        let remaining = limit - proxies.len();
        proxies.extend(self.tunnels(config, options, remaining));

        info!(vendor = self.name(), count = proxies.len(), "Retrieved proxies");
        Ok(self.pool.cache_all(proxies))
    }

    pub async fn add_whitelist_ip(&self, ip: &str) -> Result<bool> {
        self.base.ensure_initialized()?;
        match self.open_api_ok("/api/open/white_add", json!({ "ip": ip })).await {
            Ok(_) => {
                info!(vendor = self.name(), ip, "Added IP to whitelist");
                Ok(true)
            }
            Err(e) => {
                warn!(vendor = self.name(), ip, error = %e, "Failed to add IP to whitelist");
                Ok(false)
            }
        }
    }

    pub async fn whitelist_ips(&self) -> Result<Vec<String>> {
        self.base.ensure_initialized()?;
        match self.open_api_ok("/api/open/white_list", json!({})).await {
            Ok(data) => Ok(data
                .get("list")
                .and_then(Value::as_array)
                .map(|ips| ips.iter().filter_map(|ip| ip.as_str().map(str::to_string)).collect())
                .unwrap_or_default()),
            Err(e) => {
                warn!(vendor = self.name(), error = %e, "Failed to list whitelist IPs");
                Ok(Vec::new())
            }
        }
    }

    pub async fn remove_whitelist_ip(&self, ip: &str) -> Result<bool> {
        self.base.ensure_initialized()?;
        match self.open_api_ok("/api/open/white_del", json!({ "ip": ip })).await {
            Ok(_) => {
                info!(vendor = self.name(), ip, "Removed IP from whitelist");
                Ok(true)
            }
            Err(e) => {
                warn!(vendor = self.name(), ip, error = %e, "Failed to remove IP from whitelist");
                Ok(false)
            }
        }
    }

    /// Remaining traffic in MB, 0 when unknown
    pub async fn remaining_flow(&self) -> Result<f64> {
        self.base.ensure_initialized()?;
        match self.open_api_ok("/api/open/flow_left", json!({})).await {
            Ok(data) => Ok(json_f64(&data, "flow_left")),
            Err(e) => {
                warn!(vendor = self.name(), error = %e, "Failed to get remaining flow");
                Ok(0.0)
            }
        }
    }

    pub async fn set_flow_warning(&self, threshold_mb: u64) -> Result<bool> {
        self.base.ensure_initialized()?;
        let params = json!({ "flow_warning": threshold_mb });
        match self.open_api_ok("/api/open/flow_warning_set", params).await {
            Ok(_) => {
                info!(vendor = self.name(), threshold_mb, "Set flow warning threshold");
                Ok(true)
            }
            Err(e) => {
                warn!(vendor = self.name(), error = %e, "Failed to set flow warning");
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for IpideaAdapter {
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

    async fn get_proxy_list(&self, options: &GetProxyOptions) -> Result<Vec<ProxyInfo>> {
        self.collect(options, options.limit_or(DEFAULT_BATCH_SIZE), false).await
    }

    /// Accounts already cached are not counted twice, so the pool grows by exactly the deficit
    async fn refresh_pool(&self, min_size: usize) -> Result<usize> {
        self.base.ensure_initialized()?;

        let current = self.pool.len();
        if current >= min_size {
            debug!(vendor = self.name(), current, min_size, "Pool meets minimum size");
            return Ok(0);
        }

        self.collect(&GetProxyOptions::default(), min_size - current, true)
            .await?;
        Ok(self.pool.len().saturating_sub(current))
    }

    async fn get_usage_stats(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<ProxyUsageStats> {
        let cost_per_gb = self.base.cost_per_gb()?;

        let flow = match self.open_api("/api/open/flow_left", json!({})).await {
            Ok(flow) => flow,
            Err(e) => return degraded_stats(&self.base, start, end, &e),
        };
        let flow_left = flow.get("ret_data").map(|d| json_f64(d, "flow_left")).unwrap_or(0.0);
        debug!(vendor = self.name(), flow_left_mb = flow_left, "Remaining flow");

        let mut params = Map::new();
        if let Some(start) = start {
            params.insert("start_time".into(), json!(start.timestamp()));
        }
        if let Some(end) = end {
            params.insert("end_time".into(), json!(end.timestamp()));
        }

        let usage = match self.open_api("/api/open/flow_use_record", Value::Object(params)).await {
            Ok(usage) => usage.get("ret_data").cloned().unwrap_or(Value::Null),
            Err(e) => return degraded_stats(&self.base, start, end, &e),
        };

        let counters = UsageCounters {
            total_requests: json_u64(&usage, "total_requests"),
            successful_requests: json_u64(&usage, "successful_requests"),
            failed_requests: json_u64(&usage, "failed_requests"),
            bandwidth_mb: json_f64(&usage, "total_flow"),
            average_latency: json_f64(&usage, "average_latency"),
        };
        Ok(ProxyUsageStats::from_counters(counters, cost_per_gb, start, end))
    }

    async fn get_available_regions(&self) -> Result<Vec<Region>> {
        let cost_per_gb = self.base.cost_per_gb()?;
        Ok(static_regions(SUPPORTED_REGIONS, cost_per_gb))
    }

    async fn test_connection(&self) -> Result<bool> {
        self.base.ensure_initialized()?;
        match self.open_api_ok("/api/open/flow_left", json!({})).await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(vendor = self.name(), error = %e, "Connection test failed");
                Ok(false)
            }
        }
    }
}
