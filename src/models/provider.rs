use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::BrokerError;

/// Closed set of supported proxy vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    BrightData,
    Oxylabs,
    SmartProxy,
    IpRoyal,
    Ipidea,
    Kookeey,
}

impl ProviderType {
    pub const ALL: [ProviderType; 6] = [
        ProviderType::BrightData,
        ProviderType::Oxylabs,
        ProviderType::SmartProxy,
        ProviderType::IpRoyal,
        ProviderType::Ipidea,
        ProviderType::Kookeey,
    ];

    /// Type tag as stored in `proxy_providers.provider_type`
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::BrightData => "brightdata",
            ProviderType::Oxylabs => "oxylabs",
            ProviderType::SmartProxy => "smartproxy",
            ProviderType::IpRoyal => "iproyal",
            ProviderType::Ipidea => "ipidea",
            ProviderType::Kookeey => "kookeey",
        }
    }

    /// Vendor name used in log lines and error messages
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderType::BrightData => "BrightData",
            ProviderType::Oxylabs => "Oxylabs",
            ProviderType::SmartProxy => "SmartProxy",
            ProviderType::IpRoyal => "IPRoyal",
            ProviderType::Ipidea => "IPIDEA",
            ProviderType::Kookeey => "Kookeey",
        }
    }

    /// Management API host used when the stored config has no `apiUrl`
    pub fn default_api_url(&self) -> &'static str {
        match self {
            ProviderType::BrightData => "https://api.brightdata.com",
            ProviderType::Oxylabs => "https://api.oxylabs.io",
            ProviderType::SmartProxy => "https://api.smartproxy.com",
            ProviderType::IpRoyal => "https://api.iproyal.com",
            ProviderType::Ipidea => "https://api.ipidea.net",
            ProviderType::Kookeey => "https://api.kookeey.com",
        }
    }
}

impl FromStr for ProviderType {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "brightdata" => Ok(ProviderType::BrightData),
            "oxylabs" => Ok(ProviderType::Oxylabs),
            "smartproxy" => Ok(ProviderType::SmartProxy),
            "iproyal" => Ok(ProviderType::IpRoyal),
            "ipidea" => Ok(ProviderType::Ipidea),
            "kookeey" => Ok(ProviderType::Kookeey),
            _ => Err(BrokerError::UnknownProviderType(s.to_string())),
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted vendor configuration row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProviderRow {
    pub id: Uuid,
    pub provider_type: String,
    pub name: String,
    /// Plaintext JSON object or encrypted envelope
    pub config: Value,
    pub cost_per_gb: f64,
    pub enabled: bool,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Keys of the stored config object that map onto typed fields
const KNOWN_KEYS: &[&str] = &[
    "apiUrl",
    "apiKey",
    "username",
    "password",
    "token",
    "timeout",
    "maxRetries",
    "extra",
    // row columns win over these
    "name",
    "costPerGB",
    "enabled",
    "priority",
];

/// Vendor connection parameters handed to `ProviderAdapter::initialize`
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    pub api_url: String,
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    /// Vendor API timeout; `None` uses the broker default
    pub timeout: Option<Duration>,
    pub max_retries: u32,
    pub cost_per_gb: f64,
    pub enabled: bool,
    pub priority: i32,
    /// Vendor-specific fields (zone, proxyType, gateway, port, ...)
    pub extra: Map<String, Value>,
}

impl ProviderConfig {
    /// Minimal config for a vendor, mostly useful for tests and tooling
    pub fn new(provider_type: ProviderType, name: impl Into<String>, cost_per_gb: f64) -> Self {
        Self {
            name: name.into(),
            api_url: provider_type.default_api_url().to_string(),
            api_key: None,
            username: None,
            password: None,
            token: None,
            timeout: None,
            max_retries: 3,
            cost_per_gb,
            enabled: true,
            priority: 0,
            extra: Map::new(),
        }
    }

    /// Map a decrypted camelCase config object plus its row onto a `ProviderConfig`
    pub fn from_stored(provider_type: ProviderType, row: &ProviderRow, stored: &Map<String, Value>) -> Self {
        let mut extra = Map::new();

        if let Some(Value::Object(nested)) = stored.get("extra") {
            for (key, value) in nested {
                extra.insert(key.clone(), value.clone());
            }
        }
        for (key, value) in stored {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                extra.insert(key.clone(), value.clone());
            }
        }

        Self {
            name: row.name.clone(),
            api_url: string_field(stored, "apiUrl")
                .unwrap_or_else(|| provider_type.default_api_url().to_string()),
            api_key: string_field(stored, "apiKey"),
            username: string_field(stored, "username"),
            password: string_field(stored, "password"),
            token: string_field(stored, "token"),
            timeout: stored
                .get("timeout")
                .and_then(as_u64)
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            max_retries: stored
                .get("maxRetries")
                .and_then(as_u64)
                .map(|n| n.min(u32::MAX as u64) as u32)
                .unwrap_or(3),
            cost_per_gb: row.cost_per_gb,
            enabled: row.enabled,
            priority: row.priority,
            extra,
        }
    }

    pub fn has_basic_auth(&self) -> bool {
        non_empty(&self.username) && non_empty(&self.password)
    }

    /// Non-empty string in `extra`
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Port-like value in `extra`, accepting numbers or numeric strings
    pub fn extra_u16(&self, key: &str) -> Option<u16> {
        self.extra
            .get(key)
            .and_then(as_u64)
            .and_then(|n| u16::try_from(n).ok())
            .filter(|n| *n > 0)
    }

    pub fn extra_u64(&self, key: &str) -> Option<u64> {
        self.extra.get(key).and_then(as_u64)
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().map(|s| !s.is_empty()).unwrap_or(false)
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Lenient unsigned integer read used for vendor JSON and stored config
pub(crate) fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
