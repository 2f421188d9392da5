//! Kookeey adapter
//!
//! Two modes. Direct mode builds gateway credentials locally from the account id and
//! sub-user (`<accountId>-<user>-<CC>-<session>-<N>m`). API mode calls the signed REST API:
//! each request carries `accessid`, `ts` and `signature`, where the signature is
//! `base64(HMAC-SHA1(token, sorted "k=v" pairs joined by "&"))` over the business params.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use sha1::Sha1;
use std::any::Any;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use super::base::{json_f64, json_string, json_string_list, json_u64, AdapterSettings, AuthScheme, BaseAdapter};
use super::pool::ProxyPool;
use super::session::{proxy_id, random_base36};
use super::{degraded_stats, ProviderAdapter};
use crate::error::{BrokerError, Result};
use crate::models::{
    GetProxyOptions, ProviderConfig, ProviderType, ProxyInfo, ProxyLocation, ProxyProtocol,
    ProxyUsageStats, Region, UsageCounters,
};

type HmacSha1 = Hmac<Sha1>;

pub const DEFAULT_GATEWAY: &str = "gate-hk.kkoip.com";
pub const DEFAULT_PORT: u16 = 18705;
const DEFAULT_GROUP: u64 = 1;
const DEFAULT_LIMIT: usize = 10;
const DEFAULT_SESSION_MINUTES: u32 = 5;
const DIRECT_QUALITY: u8 = 90;
const DIRECT_LATENCY: u32 = 100;
const API_QUALITY: u8 = 80;
const API_LATENCY: u32 = 200;

/// Credentials read from `ProviderConfig::extra`
#[derive(Debug, Clone, Default)]
struct Credentials {
    account_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    gateway: String,
    port: u16,
    access_id: Option<String>,
    token: Option<String>,
    group_id: u64,
}

impl Credentials {
    fn from_config(config: &ProviderConfig) -> Self {
        let field = |key: &str| config.extra_str(key).map(str::to_string);
        let known = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());
        Self {
            account_id: field("accountId"),
            username: field("username").or_else(|| known(&config.username)),
            password: field("password").or_else(|| known(&config.password)),
            gateway: field("gateway").unwrap_or_else(|| DEFAULT_GATEWAY.to_string()),
            port: config.extra_u16("port").unwrap_or(DEFAULT_PORT),
            access_id: field("accessId").or_else(|| known(&config.api_key)),
            token: field("token").or_else(|| known(&config.token)),
            group_id: config.extra_u64("groupId").filter(|g| *g > 0).unwrap_or(DEFAULT_GROUP),
        }
    }

    fn has_direct_auth(&self) -> bool {
        self.account_id.is_some() && self.username.is_some() && self.password.is_some()
    }

    fn has_api_auth(&self) -> bool {
        self.access_id.is_some() && self.token.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KookeeyBalance {
    pub balance: f64,
    pub currency: String,
}

pub struct KookeeyAdapter {
    base: BaseAdapter,
    pool: ProxyPool,
    credentials: Credentials,
}

/// `base64(HMAC-SHA1(token, "k1=v1&k2=v2"))` with keys in ascending order
pub fn sign(token: &str, params: &BTreeMap<&str, String>) -> Result<String> {
    let payload = params
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");

    let mut mac = HmacSha1::new_from_slice(token.as_bytes())
        .map_err(|e| BrokerError::Internal(format!("hmac key: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

impl KookeeyAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        Self {
            base: BaseAdapter::new(ProviderType::Kookeey, settings, AuthScheme::Custom),
            pool: ProxyPool::new(),
            credentials: Credentials::default(),
        }
    }

    pub fn is_direct_mode(&self) -> bool {
        self.credentials.has_direct_auth()
    }

    /// Signed GET against the vendor API, returning the raw envelope
    async fn signed_request(&self, path: &str, params: BTreeMap<&str, String>) -> Result<Value> {
        self.base.ensure_initialized()?;
        let (access_id, token) = match (&self.credentials.access_id, &self.credentials.token) {
            (Some(access_id), Some(token)) => (access_id, token),
            _ => {
                return Err(BrokerError::InvalidConfig(
                    "Kookeey API access requires accessId and token".to_string(),
                ))
            }
        };

        let signature = sign(token, &params)?;
        let mut query = vec![
            ("accessid", access_id.clone()),
            ("signature", signature),
            ("ts", Utc::now().timestamp().to_string()),
        ];
        query.extend(params.into_iter());

        let builder = self.base.request(Method::GET, path)?.query(&query);
        self.base.send_json(builder).await
    }

    /// `data` of a `success` envelope, or the vendor's `msg` as an error
    fn unwrap_envelope(&self, body: Value) -> Result<Value> {
        if body.get("success").and_then(Value::as_bool) == Some(true) {
            return Ok(body.get("data").cloned().unwrap_or(Value::Null));
        }
        let message = json_string(&body, "msg").unwrap_or_else(|| "unsuccessful response".to_string());
        Err(BrokerError::vendor(self.name(), message))
    }

    async fn signed_get(&self, path: &str, params: BTreeMap<&str, String>) -> Result<Value> {
        let body = self.signed_request(path, params).await?;
        self.unwrap_envelope(body)
    }

    fn direct_username(&self, country: &str, session: &str, minutes: u32) -> String {
        format!(
            "{}-{}-{}-{}-{}m",
            self.credentials.account_id.as_deref().unwrap_or_default(),
            self.credentials.username.as_deref().unwrap_or_default(),
            country,
            session,
            minutes
        )
    }

    fn direct_proxy(&self, options: &GetProxyOptions, cost_per_gb: f64) -> ProxyInfo {
        let country = options
            .country
            .as_deref()
            .map(str::to_uppercase)
            .unwrap_or_else(|| "US".to_string());
        let minutes = options.session_duration.unwrap_or(DEFAULT_SESSION_MINUTES);
        let session = random_base36(8);

        let mut proxy = ProxyInfo::new(
            proxy_id("kookeey-direct"),
            self.credentials.gateway.as_str(),
            self.credentials.port,
            ProviderType::Kookeey.as_str(),
            cost_per_gb,
        );
        proxy.username = Some(self.direct_username(&country, &session, minutes));
        proxy.password = self.credentials.password.clone();
        proxy.location = ProxyLocation {
            country,
            state: None,
            city: options.city.clone(),
        };
        proxy.quality = DIRECT_QUALITY;
        proxy.latency = DIRECT_LATENCY;
        proxy.session_id = Some(session);
        proxy.expire_after_minutes(minutes);
        proxy
    }

    fn direct_proxies(&self, options: &GetProxyOptions, cost_per_gb: f64) -> Vec<ProxyInfo> {
        let limit = options.limit_or(DEFAULT_LIMIT);
        let proxies: Vec<ProxyInfo> = (0..limit).map(|_| self.direct_proxy(options, cost_per_gb)).collect();
        info!(vendor = self.name(), count = proxies.len(), "Generated direct proxies");
        self.pool.cache_all(proxies)
    }

    fn extracted_proxy(&self, item: &Value, options: &GetProxyOptions, cost_per_gb: f64) -> ProxyInfo {
        let group = self.credentials.group_id;
        let host = json_string(item, "host")
            .or_else(|| json_string(item, "ip"))
            .unwrap_or_else(|| DEFAULT_GATEWAY.to_string());
        let port = u16::try_from(json_u64(item, "port"))
            .ok()
            .filter(|p| *p > 0)
            .unwrap_or(DEFAULT_PORT);

        let mut proxy = ProxyInfo::new(
            proxy_id(&format!("kookeey-{}", group)),
            host,
            port,
            ProviderType::Kookeey.as_str(),
            cost_per_gb,
        );
        proxy.username = json_string(item, "username");
        proxy.password = json_string(item, "password");
        proxy.protocol = item
            .get("protocol")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        proxy.location = ProxyLocation {
            country: options.country.as_deref().map(str::to_uppercase).unwrap_or_default(),
            state: options.state.clone(),
            city: options.city.clone(),
        };
        proxy.quality = item
            .get("quality")
            .and_then(Value::as_u64)
            .filter(|q| *q > 0)
            .map(|q| q.min(100) as u8)
            .unwrap_or(API_QUALITY);
        proxy.latency = item
            .get("latency")
            .and_then(Value::as_u64)
            .filter(|l| *l > 0)
            .map(|l| u32::try_from(l).unwrap_or(u32::MAX))
            .unwrap_or(API_LATENCY);
        proxy.metadata.insert("groupId".into(), group.into());
        if let Some(minutes) = options.session_duration {
            proxy.expire_after_minutes(minutes);
        }
        proxy
    }

    async fn api_proxies(&self, options: &GetProxyOptions, cost_per_gb: f64) -> Result<Vec<ProxyInfo>> {
        let mut params = BTreeMap::new();
        params.insert("g", self.credentials.group_id.to_string());
        params.insert("num", options.limit_or(DEFAULT_LIMIT).to_string());
        params.insert("format", "json".to_string());
        if let Some(country) = options.country.as_deref() {
            params.insert("country", country.to_lowercase());
        }
        if let Some(state) = options.state.as_deref() {
            params.insert("state", state.to_string());
        }
        if let Some(city) = options.city.as_deref() {
            params.insert("city", city.to_string());
        }
        if let Some(minutes) = options.session_duration {
            params.insert("duration", minutes.to_string());
        }

        let body = self.signed_request("/extract", params).await?;
        let data = match self.unwrap_envelope(body) {
            Ok(data) => data,
            Err(e) => {
                error!(vendor = self.name(), error = %e, "Failed to extract proxies");
                return Ok(Vec::new());
            }
        };

        let items = match data {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            single => vec![single],
        };
        let proxies: Vec<ProxyInfo> = items
            .iter()
            .map(|item| self.extracted_proxy(item, options, cost_per_gb))
            .collect();

        info!(vendor = self.name(), count = proxies.len(), "Extracted proxies from API");
        Ok(self.pool.cache_all(proxies))
    }

    /// One credential, or `NoProxiesAvailable`
    pub async fn get_proxy(&self, options: &GetProxyOptions) -> Result<ProxyInfo> {
        let mut single = options.clone();
        single.limit = Some(1);
        self.get_proxy_list(&single)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BrokerError::NoProxiesAvailable {
                vendor: self.name().to_string(),
            })
    }

    /// Available IPs in a group, 0 when unknown
    pub async fn stock(&self, group_id: u64) -> Result<u64> {
        let params = BTreeMap::from([("g", group_id.to_string())]);
        match self.signed_get("/stock", params).await {
            Ok(data) => Ok(json_u64(&data, "stock")),
            Err(e @ BrokerError::NotInitialized { .. }) => Err(e),
            Err(e) => {
                warn!(vendor = self.name(), error = %e, "Failed to get stock");
                Ok(0)
            }
        }
    }

    pub async fn balance(&self) -> Result<KookeeyBalance> {
        match self.signed_get("/balance", BTreeMap::new()).await {
            Ok(data) => Ok(KookeeyBalance {
                balance: json_f64(&data, "balance"),
                currency: json_string(&data, "currency").unwrap_or_else(|| "USD".to_string()),
            }),
            Err(e @ BrokerError::NotInitialized { .. }) => Err(e),
            Err(e) => {
                warn!(vendor = self.name(), error = %e, "Failed to get balance");
                Ok(KookeeyBalance {
                    balance: 0.0,
                    currency: "USD".to_string(),
                })
            }
        }
    }

    pub async fn orders(&self, page: u32, limit: u32) -> Result<Vec<Value>> {
        let params = BTreeMap::from([("limit", limit.to_string()), ("page", page.to_string())]);
        match self.signed_get("/orders", params).await {
            Ok(data) => Ok(data
                .get("list")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()),
            Err(e @ BrokerError::NotInitialized { .. }) => Err(e),
            Err(e) => {
                warn!(vendor = self.name(), error = %e, "Failed to get orders");
                Ok(Vec::new())
            }
        }
    }

    /// Remaining traffic in MB, 0 when unknown
    pub async fn remaining_flow(&self) -> Result<f64> {
        match self.signed_get("/flow/remaining", BTreeMap::new()).await {
            Ok(data) => Ok(json_f64(&data, "remainingMB")),
            Err(e @ BrokerError::NotInitialized { .. }) => Err(e),
            Err(e) => {
                warn!(vendor = self.name(), error = %e, "Failed to get remaining flow");
                Ok(0.0)
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for KookeeyAdapter {
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
        let credentials = Credentials::from_config(&config);
        if !credentials.has_direct_auth() && !credentials.has_api_auth() {
            return Err(BrokerError::InvalidConfig(
                "Kookeey requires accountId + username + password for direct auth, or accessId + token for API auth"
                    .to_string(),
            ));
        }

        self.credentials = credentials;
        self.base.initialize(config)?;

        if self.credentials.has_api_auth() {
            if !self.test_connection().await? {
                warn!(vendor = self.name(), "Failed to connect to vendor API during initialization");
            }
        } else {
            info!(vendor = self.name(), "Initialized with direct proxy authentication");
        }
        Ok(())
    }

    async fn get_proxy_list(&self, options: &GetProxyOptions) -> Result<Vec<ProxyInfo>> {
        let cost_per_gb = self.base.cost_per_gb()?;
        if self.is_direct_mode() {
            return Ok(self.direct_proxies(options, cost_per_gb));
        }
        self.api_proxies(options, cost_per_gb).await
    }

    /// Never fails once initialized; vendor errors count as nothing added
    async fn refresh_pool(&self, min_size: usize) -> Result<usize> {
        self.base.ensure_initialized()?;

        let current = self.pool.len();
        if current >= min_size {
            debug!(vendor = self.name(), current, min_size, "Pool meets minimum size");
            return Ok(0);
        }

        match self.get_proxy_list(&GetProxyOptions::with_limit(min_size - current)).await {
            Ok(_) => Ok(self.pool.len().saturating_sub(current)),
            Err(e) => {
                error!(vendor = self.name(), error = %e, "Failed to refresh pool");
                Ok(0)
            }
        }
    }

    async fn get_usage_stats(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<ProxyUsageStats> {
        let cost_per_gb = self.base.cost_per_gb()?;

        let mut params = BTreeMap::new();
        if let Some(start) = start {
            params.insert("start", start.timestamp().to_string());
        }
        if let Some(end) = end {
            params.insert("end", end.timestamp().to_string());
        }

        let data = match self.signed_get("/usage", params).await {
            Ok(data) => data,
            Err(e) => return degraded_stats(&self.base, start, end, &e),
        };

        let counters = UsageCounters {
            total_requests: json_u64(&data, "totalRequests"),
            successful_requests: json_u64(&data, "successfulRequests"),
            failed_requests: json_u64(&data, "failedRequests"),
            bandwidth_mb: json_f64(&data, "totalBandwidthMB"),
            average_latency: json_f64(&data, "averageLatency"),
        };
        Ok(ProxyUsageStats::from_counters(counters, cost_per_gb, start, end))
    }

    /// No static fallback is defined for this vendor
    async fn get_available_regions(&self) -> Result<Vec<Region>> {
        let cost_per_gb = self.base.cost_per_gb()?;

        let data = match self.signed_get("/regions", BTreeMap::new()).await {
            Ok(data) => data,
            Err(e) => {
                warn!(vendor = self.name(), error = %e, "Failed to get regions");
                return Ok(Vec::new());
            }
        };

        let regions = data
            .get("regions")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let code = json_string(item, "country").or_else(|| json_string(item, "code"))?;
                        let name = json_string(item, "name")
                            .or_else(|| json_string(item, "countryName"))
                            .unwrap_or_else(|| code.clone());
                        let mut region = Region::new(&code, &name, cost_per_gb);
                        region.cities = json_string_list(item, "cities");
                        region.available_proxies = match json_u64(item, "stock") {
                            0 => json_u64(item, "availableProxies"),
                            stock => stock,
                        };
                        Some(region)
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(regions)
    }

    /// Direct mode without an API token checks the gateway itself
    async fn test_connection(&self) -> Result<bool> {
        self.base.ensure_initialized()?;

        if self.is_direct_mode() && self.credentials.token.is_none() {
            let candidate = self.direct_proxy(
                &GetProxyOptions {
                    country: Some("US".to_string()),
                    session_duration: Some(1),
                    ..Default::default()
                },
                0.0,
            );
            return self.base.validate_proxy(&candidate).await;
        }

        let params = BTreeMap::from([("g", DEFAULT_GROUP.to_string())]);
        match self.signed_get("/stock", params).await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(vendor = self.name(), error = %e, "Connection test failed");
                Ok(false)
            }
        }
    }

    /// Evicts instead of flagging: extracted IPs are single-use
    async fn release_proxy(&self, proxy_id: &str) -> Result<()> {
        self.base.ensure_initialized()?;
        self.pool.remove(proxy_id);
        debug!(vendor = self.name(), proxy_id, "Released proxy from cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::base::test_support::{closed_port, fake_forward_proxy};
    use crate::providers::test_support::{config, settings};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "secret-token";

    fn direct_config(gateway: &str, port: u16) -> ProviderConfig {
        let mut cfg = config(ProviderType::Kookeey, "https://api.kookeey.test", 3.0);
        cfg.extra.insert("accountId".into(), json!("1001"));
        cfg.extra.insert("username".into(), json!("sub"));
        cfg.extra.insert("password".into(), json!("pw"));
        cfg.extra.insert("gateway".into(), json!(gateway));
        cfg.extra.insert("port".into(), json!(port));
        cfg
    }

    async fn api_adapter() -> (MockServer, KookeeyAdapter) {
        let server = MockServer::start().await;
        let stock_sig = sign(TOKEN, &BTreeMap::from([("g", "1".to_string())])).unwrap();
        Mock::given(method("GET"))
            .and(path("/stock"))
            .and(query_param("accessid", "acc-1"))
            .and(query_param("signature", stock_sig.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "data": { "stock": 420 }
            })))
            .mount(&server)
            .await;

        let mut cfg = config(ProviderType::Kookeey, &server.uri(), 3.0);
        cfg.api_key = Some("acc-1".to_string());
        cfg.extra.insert("token".into(), json!(TOKEN));

        let mut adapter = KookeeyAdapter::new(settings());
        adapter.initialize(cfg).await.unwrap();
        (server, adapter)
    }

    #[test]
    fn test_signature_is_order_independent_hmac_sha1() {
        let mut a = BTreeMap::new();
        a.insert("num", "5".to_string());
        a.insert("g", "1".to_string());
        let b = BTreeMap::from([("g", "1".to_string()), ("num", "5".to_string())]);

        let sig = sign("key", &a).unwrap();
        assert_eq!(sig, sign("key", &b).unwrap());
        assert_ne!(sig, sign("other", &a).unwrap());

        let mut mac = HmacSha1::new_from_slice(b"key").unwrap();
        mac.update(b"g=1&num=5");
        assert_eq!(sig, BASE64.encode(mac.finalize().into_bytes()));
    }

    #[tokio::test]
    async fn test_initialize_requires_some_credentials() {
        let mut adapter = KookeeyAdapter::new(settings());
        let err = adapter
            .initialize(config(ProviderType::Kookeey, "https://api.kookeey.test", 3.0))
            .await
            .unwrap_err();
        assert!(err.is_config_error());
        assert!(!adapter.is_initialized());
    }

    #[tokio::test]
    async fn test_direct_mode_credentials() {
        let mut adapter = KookeeyAdapter::new(settings());
        adapter.initialize(direct_config(DEFAULT_GATEWAY, DEFAULT_PORT)).await.unwrap();
        assert!(adapter.is_direct_mode());

        let options = GetProxyOptions {
            country: Some("jp".to_string()),
            session_duration: Some(30),
            ..Default::default()
        };
        let proxies = adapter.get_proxy_list(&options).await.unwrap();
        assert_eq!(proxies.len(), 10);

        let proxy = &proxies[0];
        let session = proxy.session_id.as_deref().unwrap();
        assert_eq!(session.len(), 8);
        assert_eq!(proxy.username.as_deref().unwrap(), format!("1001-sub-JP-{}-30m", session));
        assert_eq!((proxy.host.as_str(), proxy.port), (DEFAULT_GATEWAY, DEFAULT_PORT));
        assert_eq!(proxy.password.as_deref(), Some("pw"));
        assert_eq!(proxy.quality, 90);
        assert_eq!(proxy.latency, 100);
        let ttl = proxy.expires_at.unwrap() - proxy.created_at;
        assert_eq!(ttl.num_minutes(), 30);
    }

    #[tokio::test]
    async fn test_direct_defaults_to_us_and_five_minutes() {
        let mut adapter = KookeeyAdapter::new(settings());
        adapter.initialize(direct_config(DEFAULT_GATEWAY, DEFAULT_PORT)).await.unwrap();

        let proxy = adapter.get_proxy(&GetProxyOptions::default()).await.unwrap();
        assert!(proxy.username.as_deref().unwrap().starts_with("1001-sub-US-"));
        assert!(proxy.username.as_deref().unwrap().ends_with("-5m"));
        assert_eq!(adapter.pool_size(), 1);
    }

    #[tokio::test]
    async fn test_direct_connection_checks_gateway() {
        let (port, handle) = fake_forward_proxy("HTTP/1.1 200 OK", r#"{"ip":"198.51.100.4"}"#).await;
        let mut adapter = KookeeyAdapter::new(settings());
        adapter.initialize(direct_config("127.0.0.1", port)).await.unwrap();

        assert!(adapter.test_connection().await.unwrap());
        let request = handle.await.unwrap();
        assert!(request.to_lowercase().contains("proxy-authorization: basic"));

        let dead = closed_port().await;
        let mut adapter = KookeeyAdapter::new(settings());
        adapter.initialize(direct_config("127.0.0.1", dead)).await.unwrap();
        assert!(!adapter.test_connection().await.unwrap());
    }

    #[tokio::test]
    async fn test_release_evicts_from_cache() {
        let mut adapter = KookeeyAdapter::new(settings());
        adapter.initialize(direct_config(DEFAULT_GATEWAY, DEFAULT_PORT)).await.unwrap();

        let proxies = adapter.get_proxy_list(&GetProxyOptions::with_limit(2)).await.unwrap();
        adapter.release_proxy(&proxies[0].id).await.unwrap();
        assert!(adapter.cached_proxy(&proxies[0].id).is_none());
        assert_eq!(adapter.pool_size(), 1);
    }

    #[tokio::test]
    async fn test_api_mode_connection_and_stock() {
        let (_server, adapter) = api_adapter().await;
        assert!(!adapter.is_direct_mode());
        assert!(adapter.test_connection().await.unwrap());
        assert_eq!(adapter.stock(1).await.unwrap(), 420);
        // Unsigned group: no mock matches
        assert_eq!(adapter.stock(2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_api_extract() {
        let (server, adapter) = api_adapter().await;
        Mock::given(method("GET"))
            .and(path("/extract"))
            .and(query_param("g", "1"))
            .and(query_param("num", "2"))
            .and(query_param("format", "json"))
            .and(query_param("country", "us"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": [
                    { "ip": "203.0.113.1", "port": 9000, "username": "u1", "password": "p1" },
                    { "host": "hk.kkoip.com", "quality": 95, "latency": 50, "protocol": "socks5" }
                ]
            })))
            .mount(&server)
            .await;

        let options = GetProxyOptions {
            country: Some("US".to_string()),
            limit: Some(2),
            ..Default::default()
        };
        let proxies = adapter.get_proxy_list(&options).await.unwrap();
        assert_eq!(proxies.len(), 2);

        assert_eq!((proxies[0].host.as_str(), proxies[0].port), ("203.0.113.1", 9000));
        assert_eq!(proxies[0].username.as_deref(), Some("u1"));
        assert_eq!(proxies[0].quality, 80);
        assert_eq!(proxies[0].latency, 200);
        assert_eq!(proxies[0].location.country, "US");

        assert_eq!(proxies[1].port, DEFAULT_PORT);
        assert_eq!(proxies[1].quality, 95);
        assert_eq!(proxies[1].protocol, ProxyProtocol::Socks5);
    }

    #[tokio::test]
    async fn test_api_extract_unsuccessful_is_empty_and_refresh_swallows_errors() {
        let (server, adapter) = api_adapter().await;
        Mock::given(method("GET"))
            .and(path("/extract"))
            .and(query_param("num", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false, "msg": "insufficient balance"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/extract"))
            .and(query_param("num", "5"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(adapter.get_proxy_list(&GetProxyOptions::with_limit(3)).await.unwrap().is_empty());
        assert!(adapter.get_proxy_list(&GetProxyOptions::with_limit(5)).await.is_err());
        assert_eq!(adapter.refresh_pool(5).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_api_reads() {
        let (server, adapter) = api_adapter().await;
        for (route, data) in [
            ("/balance", json!({ "balance": 12.5 })),
            ("/orders", json!({ "list": [{ "id": 1 }, { "id": 2 }] })),
            ("/flow/remaining", json!({ "remainingMB": 300 })),
            ("/usage", json!({ "totalRequests": 4, "successfulRequests": 3, "totalBandwidthMB": 512 })),
            ("/regions", json!({ "regions": [{ "code": "HK", "name": "Hong Kong", "stock": 7 }] })),
        ] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": data })))
                .mount(&server)
                .await;
        }

        let balance = adapter.balance().await.unwrap();
        assert_eq!(balance, KookeeyBalance { balance: 12.5, currency: "USD".to_string() });
        assert_eq!(adapter.orders(1, 10).await.unwrap().len(), 2);
        assert_eq!(adapter.remaining_flow().await.unwrap(), 300.0);

        let stats = adapter.get_usage_stats(None, None).await.unwrap();
        assert_eq!(stats.total_requests, 4);
        assert!((stats.success_rate - 0.75).abs() < 1e-9);
        assert!((stats.total_cost - 1.5).abs() < 1e-9);

        let regions = adapter.get_available_regions().await.unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].country, "HK");
        assert_eq!(regions[0].available_proxies, 7);
    }

    #[tokio::test]
    async fn test_reads_degrade_when_vendor_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stock"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "data": { "stock": 1 }
            })))
            .mount(&server)
            .await;
        for route in ["/usage", "/regions"] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({ "success": true, "data": { "totalRequests": 9 } }))
                        .set_delay(std::time::Duration::from_secs(2)),
                )
                .mount(&server)
                .await;
        }

        let mut cfg = config(ProviderType::Kookeey, &server.uri(), 3.0);
        cfg.api_key = Some("acc-1".to_string());
        cfg.token = Some(TOKEN.to_string());
        cfg.timeout = Some(std::time::Duration::from_millis(100));
        let mut adapter = KookeeyAdapter::new(settings());
        adapter.initialize(cfg).await.unwrap();

        let stats = adapter.get_usage_stats(None, None).await.unwrap();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert!(adapter.get_available_regions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reads_degrade_without_api_credentials() {
        let mut adapter = KookeeyAdapter::new(settings());
        adapter.initialize(direct_config(DEFAULT_GATEWAY, DEFAULT_PORT)).await.unwrap();

        assert!(adapter.get_available_regions().await.unwrap().is_empty());
        assert_eq!(adapter.get_usage_stats(None, None).await.unwrap().total_requests, 0);
        assert_eq!(adapter.balance().await.unwrap().balance, 0.0);
    }
}
