//! Bright Data superproxy adapter
//!
//! Every credential targets `brd.superproxy.io:33335`; routing is carried in the username as
//! `<base>-country-xx-state-xx-city-xx-zip-xxxxx-asn-n-session-<alnum>`. State and zip are only
//! accepted by the gateway together with `country-us`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::any::Any;
use tracing::{debug, info, instrument, warn};

use super::base::{date_param, json_f64, json_string_list, json_u64, AdapterSettings, AuthScheme, BaseAdapter};
use super::pool::ProxyPool;
use super::session::{compact_session_id, proxy_id, slug, UsernameBuilder};
use super::{bytes_to_mb, degraded_stats, ProviderAdapter, DEFAULT_BATCH_SIZE};
use crate::error::{BrokerError, Result};
use crate::models::{
    static_regions, GetProxyOptions, ProviderConfig, ProviderType, ProxyInfo, ProxyLocation,
    ProxyUsageStats, Region, SessionMode, UsageCounters,
};

pub const SUPER_PROXY_HOST: &str = "brd.superproxy.io";
pub const SUPER_PROXY_PORT: u16 = 33335;
const DEFAULT_ZONE: &str = "residential";
const QUALITY: u8 = 95;

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
];

/// Routing applied when a request leaves a field unset
#[derive(Debug, Clone, Default)]
struct RoutingDefaults {
    country: Option<String>,
    state: Option<String>,
    city: Option<String>,
    zip: Option<String>,
    asn: Option<String>,
    session: Option<SessionMode>,
}

impl RoutingDefaults {
    fn from_config(config: &ProviderConfig) -> Self {
        let field = |key: &str| config.extra_str(key).map(str::to_string);
        Self {
            country: field("defaultCountry"),
            state: field("defaultState"),
            city: field("defaultCity"),
            zip: field("defaultZip"),
            asn: field("defaultAsn"),
            session: config.extra_str("sessionMode").and_then(|s| s.parse().ok()),
        }
    }
}

pub struct BrightDataAdapter {
    base: BaseAdapter,
    pool: ProxyPool,
    zone: String,
    defaults: RoutingDefaults,
}

impl BrightDataAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        Self {
            base: BaseAdapter::new(ProviderType::BrightData, settings, AuthScheme::Standard),
            pool: ProxyPool::new(),
            zone: DEFAULT_ZONE.to_string(),
            defaults: RoutingDefaults::default(),
        }
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Username shared by every credential of one request, before the session token
    fn routed_username(&self, base: &str, country: Option<&str>, options: &GetProxyOptions) -> String {
        let is_us = country.map(|c| c.eq_ignore_ascii_case("us")).unwrap_or(false);
        let state = options.state.as_deref().or(self.defaults.state.as_deref());
        let city = options.city.as_deref().or(self.defaults.city.as_deref());
        let zip = options.zip.as_deref().or(self.defaults.zip.as_deref());
        let asn = options.asn.as_deref().or(self.defaults.asn.as_deref());

        UsernameBuilder::new(base)
            .token_opt("country", country.map(str::to_lowercase))
            .token_opt("state", state.filter(|_| is_us).map(slug))
            .token_opt("city", city.map(slug))
            .token_opt("zip", zip.filter(|_| is_us))
            .token_opt("asn", asn)
            .build()
    }

    fn parse_regions(&self, body: &Value, cost_per_gb: f64) -> Option<Vec<Region>> {
        let countries = body.get("countries")?.as_object()?;
        Some(
            countries
                .iter()
                .map(|(code, data)| {
                    let mut region = Region::new(code, code, cost_per_gb);
                    if let Some(name) = data.get("name").and_then(Value::as_str) {
                        region.country_name = name.to_string();
                    }
                    region.cities = json_string_list(data, "cities");
                    region.states = json_string_list(data, "states");
                    region.available_proxies = json_u64(data, "ips");
                    region
                })
                .collect(),
        )
    }
}

#[async_trait]
impl ProviderAdapter for BrightDataAdapter {
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
        self.zone = config.extra_str("zone").unwrap_or(DEFAULT_ZONE).to_string();
        self.defaults = RoutingDefaults::from_config(&config);
        self.base.initialize(config)?;

        if !self.test_connection().await? {
            warn!(vendor = self.name(), "Failed to connect to vendor API during initialization");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(vendor = "BrightData"))]
    async fn get_proxy_list(&self, options: &GetProxyOptions) -> Result<Vec<ProxyInfo>> {
        let config = self.base.config()?;

        let country = options.country.as_deref().or(self.defaults.country.as_deref());
        let session = options.session.or(self.defaults.session);
        let username = self.routed_username(
            config.username.as_deref().unwrap_or_default(),
            country,
            options,
        );

        let limit = options.limit_or(DEFAULT_BATCH_SIZE);
        let mut proxies = Vec::with_capacity(limit);

        for _ in 0..limit {
            let mut proxy = ProxyInfo::new(
                proxy_id(ProviderType::BrightData.as_str()),
                SUPER_PROXY_HOST,
                SUPER_PROXY_PORT,
                ProviderType::BrightData.as_str(),
                config.cost_per_gb,
            );

            proxy.username = Some(match session {
                Some(SessionMode::Sticky) => {
                    let session_id = compact_session_id();
                    let routed = format!("{}-session-{}", username, session_id);
                    proxy.session_id = Some(session_id);
                    routed
                }
                _ => username.clone(),
            });
            proxy.password = config.password.clone();
            proxy.protocol = options.protocol_or_default();
            proxy.location = ProxyLocation {
                country: country.map(str::to_uppercase).unwrap_or_else(|| "ANY".to_string()),
                state: options.state.clone().or_else(|| self.defaults.state.clone()),
                city: options.city.clone().or_else(|| self.defaults.city.clone()),
            };
            proxy.quality = QUALITY;
            proxy.metadata.insert("zone".into(), json!(self.zone));
            proxy.metadata.insert("superProxy".into(), json!(true));
            proxy.metadata.insert(
                "sessionMode".into(),
                session.map(|s| json!(s.as_str())).unwrap_or(Value::Null),
            );
            if let (Some(SessionMode::Sticky), Some(minutes)) = (session, options.session_duration) {
                proxy.expire_after_minutes(minutes);
            }

            proxies.push(proxy);
        }

        info!(count = proxies.len(), zone = %self.zone, "Generated proxy configurations");
        Ok(self.pool.cache_all(proxies))
    }

    async fn get_usage_stats(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<ProxyUsageStats> {
        let cost_per_gb = self.base.cost_per_gb()?;

        let mut query = vec![("zone", self.zone.clone())];
        if let Some(from) = date_param(start) {
            query.push(("from", from));
        }
        if let Some(to) = date_param(end) {
            query.push(("to", to));
        }

        let body = match self.base.get_json("/api/stats", &query).await {
            Ok(Value::Null) => {
                return degraded_stats(&self.base, start, end, &"empty stats response");
            }
            Ok(body) => body,
            Err(e) => return degraded_stats(&self.base, start, end, &e),
        };

        let total = json_u64(&body, "requests");
        let successful = json_u64(&body, "success");
        let counters = UsageCounters {
            total_requests: total,
            successful_requests: successful,
            failed_requests: total.saturating_sub(successful),
            bandwidth_mb: bytes_to_mb(json_u64(&body, "bandwidth")),
            average_latency: json_f64(&body, "avg_latency"),
        };

        Ok(ProxyUsageStats::from_counters(counters, cost_per_gb, start, end))
    }

    async fn get_available_regions(&self) -> Result<Vec<Region>> {
        let cost_per_gb = self.base.cost_per_gb()?;

        let parsed = self
            .base
            .get_json("/api/zone/route", &[])
            .await
            .and_then(|body| {
                self.parse_regions(&body, cost_per_gb)
                    .ok_or_else(|| BrokerError::vendor(self.name(), "missing countries in route response"))
            });

        match parsed {
            Ok(regions) => {
                debug!(count = regions.len(), "Retrieved regions");
                Ok(regions)
            }
            Err(e) => {
                warn!(vendor = self.name(), error = %e, "Failed to get regions, using fallback list");
                Ok(static_regions(FALLBACK_REGIONS, cost_per_gb))
            }
        }
    }

    async fn test_connection(&self) -> Result<bool> {
        self.base.ensure_initialized()?;
        match self.base.get_ok("/zone").await {
            Ok(ok) => Ok(ok),
            Err(e) => {
                warn!(vendor = self.name(), error = %e, "Connection test failed");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::{config, settings};
    use std::collections::HashSet;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup() -> (MockServer, BrightDataAdapter) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zone"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut cfg = config(ProviderType::BrightData, &server.uri(), 10.0);
        cfg.username = Some("brd-customer-c1-zone-residential".to_string());
        cfg.password = Some("pw".to_string());

        let mut adapter = BrightDataAdapter::new(settings());
        adapter.initialize(cfg).await.unwrap();
        (server, adapter)
    }

    #[tokio::test]
    async fn test_initialize_survives_unreachable_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zone"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut adapter = BrightDataAdapter::new(settings());
        adapter
            .initialize(config(ProviderType::BrightData, &server.uri(), 10.0))
            .await
            .unwrap();
        assert!(adapter.is_initialized());
        assert_eq!(adapter.zone(), "residential");
        assert!(!adapter.test_connection().await.unwrap());
    }

    #[tokio::test]
    async fn test_us_routing_username() {
        let (_server, adapter) = setup().await;

        let options = GetProxyOptions {
            country: Some("US".to_string()),
            state: Some("New York".to_string()),
            city: Some("New York".to_string()),
            zip: Some("10001".to_string()),
            asn: Some("7922".to_string()),
            limit: Some(1),
            ..Default::default()
        };
        let proxies = adapter.get_proxy_list(&options).await.unwrap();

        assert_eq!(proxies.len(), 1);
        let proxy = &proxies[0];
        assert_eq!(
            proxy.username.as_deref(),
            Some("brd-customer-c1-zone-residential-country-us-state-new_york-city-new_york-zip-10001-asn-7922")
        );
        assert_eq!(proxy.host, SUPER_PROXY_HOST);
        assert_eq!(proxy.port, SUPER_PROXY_PORT);
        assert_eq!(proxy.quality, 95);
        assert_eq!(proxy.location.country, "US");
        assert_eq!(proxy.metadata["zone"], json!("residential"));
        assert_eq!(proxy.metadata["superProxy"], json!(true));
        assert!(proxy.session_id.is_none());
    }

    #[tokio::test]
    async fn test_state_and_zip_dropped_outside_us() {
        let (_server, adapter) = setup().await;

        let options = GetProxyOptions {
            country: Some("DE".to_string()),
            state: Some("Bavaria".to_string()),
            zip: Some("80331".to_string()),
            limit: Some(1),
            ..Default::default()
        };
        let proxies = adapter.get_proxy_list(&options).await.unwrap();
        assert_eq!(
            proxies[0].username.as_deref(),
            Some("brd-customer-c1-zone-residential-country-de")
        );
    }

    #[tokio::test]
    async fn test_sticky_sessions_are_unique_and_alphanumeric() {
        let (_server, adapter) = setup().await;

        let options = GetProxyOptions {
            session: Some(SessionMode::Sticky),
            session_duration: Some(10),
            ..Default::default()
        };
        let proxies = adapter.get_proxy_list(&options).await.unwrap();
        assert_eq!(proxies.len(), DEFAULT_BATCH_SIZE);

        let sessions: HashSet<_> = proxies.iter().filter_map(|p| p.session_id.clone()).collect();
        assert_eq!(sessions.len(), DEFAULT_BATCH_SIZE);
        for proxy in &proxies {
            let session = proxy.session_id.as_deref().unwrap();
            assert!(session.chars().all(|c| c.is_ascii_alphanumeric()));
            assert!(proxy.username.as_deref().unwrap().ends_with(&format!("-session-{}", session)));
            assert!(proxy.expires_at.is_some());
        }
        assert_eq!(proxies[0].location.country, "ANY");
    }

    #[tokio::test]
    async fn test_pool_refresh_is_monotonic() {
        let (_server, adapter) = setup().await;

        adapter.get_proxy_list(&GetProxyOptions::with_limit(20)).await.unwrap();
        assert_eq!(adapter.pool_size(), 20);
        assert_eq!(adapter.refresh_pool(15).await.unwrap(), 0);
        assert_eq!(adapter.pool_size(), 20);
        assert_eq!(adapter.refresh_pool(35).await.unwrap(), 15);
        assert_eq!(adapter.pool_size(), 35);

        adapter.clear_cache();
        assert_eq!(adapter.pool_size(), 0);
    }

    #[tokio::test]
    async fn test_usage_stats_from_byte_counters() {
        let (server, adapter) = setup().await;
        Mock::given(method("GET"))
            .and(path("/api/stats"))
            .and(query_param("zone", "residential"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "bandwidth": 5368709120u64,
                "requests": 1000,
                "success": 950,
                "avg_latency": 120
            })))
            .mount(&server)
            .await;

        let stats = adapter.get_usage_stats(None, None).await.unwrap();
        assert_eq!(stats.total_requests, 1000);
        assert_eq!(stats.successful_requests, 950);
        assert_eq!(stats.failed_requests, 50);
        assert!((stats.success_rate - 0.95).abs() < 1e-9);
        assert!((stats.total_bandwidth_mb - 5120.0).abs() < 1e-6);
        assert!((stats.total_cost - 50.0).abs() < 1e-6);
        assert_eq!(stats.average_latency, 120.0);
        assert_eq!(stats.avg_cost_per_gb, 10.0);
    }

    #[tokio::test]
    async fn test_usage_stats_date_params() {
        let (server, adapter) = setup().await;
        Mock::given(method("GET"))
            .and(path("/api/stats"))
            .and(query_param("from", "2024-01-01"))
            .and(query_param("to", "2024-01-31"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let start: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let end: DateTime<Utc> = "2024-01-31T23:59:59Z".parse().unwrap();
        let stats = adapter.get_usage_stats(Some(start), Some(end)).await.unwrap();

        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.avg_cost_per_request, 0.0);
        assert_eq!(stats.period_start, start);
        assert_eq!(stats.period_end, end);
    }

    #[tokio::test]
    async fn test_usage_stats_degrade_on_error() {
        let (server, adapter) = setup().await;
        Mock::given(method("GET"))
            .and(path("/api/stats"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let stats = adapter.get_usage_stats(None, None).await.unwrap();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.total_cost, 0.0);
        assert_eq!(stats.avg_cost_per_gb, 10.0);
    }

    #[tokio::test]
    async fn test_regions_from_route_api() {
        let (server, adapter) = setup().await;
        Mock::given(method("GET"))
            .and(path("/api/zone/route"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "countries": {
                    "US": {"name": "United States", "cities": ["new_york"], "ips": 1000},
                    "DE": {}
                }
            })))
            .mount(&server)
            .await;

        let regions = adapter.get_available_regions().await.unwrap();
        assert_eq!(regions.len(), 2);
        let us = regions.iter().find(|r| r.country == "US").unwrap();
        assert_eq!(us.country_name, "United States");
        assert_eq!(us.cities, vec!["new_york"]);
        assert_eq!(us.available_proxies, 1000);
        let de = regions.iter().find(|r| r.country == "DE").unwrap();
        assert_eq!(de.country_name, "DE");
    }

    #[tokio::test]
    async fn test_regions_fallback() {
        let (_server, adapter) = setup().await;

        let regions = adapter.get_available_regions().await.unwrap();
        assert_eq!(regions.len(), 15);
        assert_eq!(regions[0].country, "US");
        assert!(regions.iter().all(|r| r.cost_per_gb == 10.0));
    }

    #[tokio::test]
    async fn test_defaults_from_extra() {
        let server = MockServer::start().await;
        let mut cfg = config(ProviderType::BrightData, &server.uri(), 10.0);
        cfg.username = Some("brd-customer-c1".to_string());
        cfg.extra.insert("zone".into(), json!("isp"));
        cfg.extra.insert("defaultCountry".into(), json!("gb"));
        cfg.extra.insert("sessionMode".into(), json!("sticky"));

        let mut adapter = BrightDataAdapter::new(settings());
        adapter.initialize(cfg).await.unwrap();

        let proxies = adapter.get_proxy_list(&GetProxyOptions::with_limit(1)).await.unwrap();
        let username = proxies[0].username.as_deref().unwrap();
        assert!(username.starts_with("brd-customer-c1-country-gb-session-"));
        assert_eq!(proxies[0].location.country, "GB");
        assert_eq!(proxies[0].metadata["zone"], json!("isp"));
        assert_eq!(proxies[0].metadata["sessionMode"], json!("sticky"));
    }
}
