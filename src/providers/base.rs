//! Shared adapter scaffolding: vendor HTTP client, auth injection, proxy probing and cost

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::models::provider::as_u64;
use crate::models::{HealthCheckResult, ProviderConfig, ProviderType, ProxyInfo};

const USER_AGENT_VALUE: &str = concat!("egress-broker/", env!("CARGO_PKG_VERSION"));

/// Header carrying `ProviderConfig::token` when neither an API key nor basic auth is set
pub const TOKEN_HEADER: &str = "X-Api-Token";

/// Broker-wide knobs every adapter is built with
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    /// Echo-my-IP endpoint; must answer 200 with a JSON `ip` field
    pub validation_url: String,
    pub default_timeout: Duration,
    pub health_check_timeout: Duration,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self::from(&BrokerConfig::default())
    }
}

impl From<&BrokerConfig> for AdapterSettings {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            validation_url: config.validation_url.clone(),
            default_timeout: config.provider_timeout(),
            health_check_timeout: config.health_check_timeout(),
        }
    }
}

/// How outbound vendor requests are authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// Bearer API key, else basic auth, else the token header
    Standard,
    /// The adapter signs or keys its own requests
    Custom,
}

struct Connected {
    config: ProviderConfig,
    client: Client,
}

/// Common state embedded in every vendor adapter
pub struct BaseAdapter {
    provider_type: ProviderType,
    settings: AdapterSettings,
    auth: AuthScheme,
    connected: Option<Connected>,
}

struct CheckFailure {
    status: Option<u16>,
    error: String,
}

impl BaseAdapter {
    pub fn new(provider_type: ProviderType, settings: AdapterSettings, auth: AuthScheme) -> Self {
        Self {
            provider_type,
            settings,
            auth,
            connected: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.provider_type.display_name()
    }

    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    pub fn settings(&self) -> &AdapterSettings {
        &self.settings
    }

    pub fn is_initialized(&self) -> bool {
        self.connected.is_some()
    }

    /// Build the vendor client; replaces any previous config wholesale
    pub fn initialize(&mut self, config: ProviderConfig) -> Result<()> {
        Url::parse(&config.api_url)?;

        let timeout = config.timeout.unwrap_or(self.settings.default_timeout);
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        info!(
            vendor = self.name(),
            name = %config.name,
            api_url = %config.api_url,
            timeout_ms = timeout.as_millis() as u64,
            "Adapter initialized"
        );

        self.connected = Some(Connected { config, client });
        Ok(())
    }

    fn connected(&self) -> Result<&Connected> {
        self.connected
            .as_ref()
            .ok_or_else(|| BrokerError::not_initialized(self.name()))
    }

    /// Initialization guard; every contract method goes through here
    pub fn ensure_initialized(&self) -> Result<()> {
        self.connected().map(|_| ())
    }

    pub fn config(&self) -> Result<&ProviderConfig> {
        self.connected().map(|c| &c.config)
    }

    pub fn cost_per_gb(&self) -> Result<f64> {
        self.config().map(|c| c.cost_per_gb)
    }

    /// Vendor API request with authentication applied
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let connected = self.connected()?;
        let url = join_url(&connected.config.api_url, path);
        let builder = connected.client.request(method, url);

        Ok(match self.auth {
            AuthScheme::Standard => apply_standard_auth(builder, &connected.config),
            AuthScheme::Custom => builder,
        })
    }

    /// Send a vendor request; non-2xx responses are logged and returned untouched
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                BrokerError::Timeout
            } else {
                BrokerError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                vendor = self.name(),
                status = status.as_u16(),
                url = %response.url(),
                "Vendor API request failed"
            );
        }

        Ok(response)
    }

    /// Send and decode a JSON body; non-2xx becomes a vendor error, an empty body is `Null`
    pub async fn send_json(&self, builder: RequestBuilder) -> Result<Value> {
        let response = self.send(builder).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BrokerError::vendor(
                self.name(),
                format!("HTTP {}", status.as_u16()),
            ));
        }

        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let builder = self.request(Method::GET, path)?.query(query);
        self.send_json(builder).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let builder = self.request(Method::POST, path)?.json(body);
        self.send_json(builder).await
    }

    /// GET that only cares about a 200 status
    pub async fn get_ok(&self, path: &str) -> Result<bool> {
        let response = self.send(self.request(Method::GET, path)?).await?;
        Ok(response.status().as_u16() == 200)
    }

    /// Fetch the public IP through the candidate proxy
    pub async fn validate_proxy(&self, proxy: &ProxyInfo) -> Result<bool> {
        self.ensure_initialized()?;
        let healthy = self.check_through(proxy).await.is_ok();
        debug!(vendor = self.name(), proxy_id = %proxy.id, healthy, "Proxy validated");
        Ok(healthy)
    }

    pub async fn check_health(&self, proxy: &ProxyInfo) -> Result<HealthCheckResult> {
        self.ensure_initialized()?;

        let start = Instant::now();
        let outcome = self.check_through(proxy).await;
        let response_time = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(status) => HealthCheckResult {
                proxy_id: proxy.id.clone(),
                healthy: true,
                response_time,
                checked_at: Utc::now(),
                status_code: Some(status),
                error: None,
            },
            Err(failure) => {
                warn!(
                    vendor = self.name(),
                    proxy_id = %proxy.id,
                    error = %failure.error,
                    "Proxy is unhealthy"
                );
                HealthCheckResult {
                    proxy_id: proxy.id.clone(),
                    healthy: false,
                    response_time,
                    checked_at: Utc::now(),
                    status_code: failure.status,
                    error: Some(failure.error),
                }
            }
        };

        Ok(result)
    }

    async fn check_through(&self, proxy: &ProxyInfo) -> std::result::Result<u16, CheckFailure> {
        let fail = |status: Option<u16>, error: String| CheckFailure { status, error };

        let proxy_url = proxy.proxy_url().map_err(|e| fail(None, e.to_string()))?;
        let upstream = reqwest::Proxy::all(proxy_url.as_str())
            .map_err(|e| fail(None, format!("invalid proxy url: {}", e)))?;

        let client = Client::builder()
            .proxy(upstream)
            .timeout(self.settings.health_check_timeout)
            .build()
            .map_err(|e| fail(None, format!("client build failed: {}", e)))?;

        let response = client
            .get(&self.settings.validation_url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    fail(None, "request timed out".to_string())
                } else {
                    fail(None, format!("request failed: {}", e))
                }
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(fail(Some(status), format!("unexpected status {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| fail(Some(status), format!("invalid body: {}", e)))?;

        match body.get("ip").and_then(Value::as_str).map(str::trim) {
            Some(ip) if !ip.is_empty() => Ok(status),
            _ => Err(fail(Some(status), "response has no ip field".to_string())),
        }
    }

    /// `(bandwidth_mb / 1024) * cost_per_gb`
    pub fn estimate_cost(&self, bandwidth_mb: f64) -> Result<f64> {
        Ok((bandwidth_mb / 1024.0) * self.cost_per_gb()?)
    }
}

fn apply_standard_auth(builder: RequestBuilder, config: &ProviderConfig) -> RequestBuilder {
    if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
        return builder.bearer_auth(key);
    }
    if config.has_basic_auth() {
        return builder.basic_auth(
            config.username.as_deref().unwrap_or_default(),
            config.password.as_deref(),
        );
    }
    match config.token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => builder.header(TOKEN_HEADER, token),
        None => builder,
    }
}

fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// `YYYY-MM-DD` query value for an optional window bound
pub(crate) fn date_param(date: Option<DateTime<Utc>>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

pub(crate) fn json_u64(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(as_u64).unwrap_or(0)
}

pub(crate) fn json_f64(value: &Value, key: &str) -> f64 {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

pub(crate) fn json_string(value: &Value, key: &str) -> Option<String> {
    match value.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn json_string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Array body, or the array under `key` of an object body
pub(crate) fn json_items<'a>(body: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    match body {
        Value::Array(items) => Some(items),
        Value::Object(map) => map.get(key).and_then(Value::as_array),
        _ => None,
    }
}
