//! Vendor adapters behind one polymorphic contract
//!
//! Every adapter embeds a [`BaseAdapter`] (vendor HTTP client, auth, probing, cost) and a
//! [`ProxyPool`] (issued credentials). Vendor modules only add their addressing scheme and
//! the read APIs for usage and regions.

pub mod base;
pub mod brightdata;
pub mod ipidea;
pub mod iproyal;
pub mod kookeey;
pub mod manager;
pub mod oxylabs;
pub mod pool;
pub mod session;
pub mod smartproxy;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::any::Any;
use tracing::warn;

use crate::error::Result;
use crate::models::{
    GetProxyOptions, HealthCheckResult, PoolStats, ProviderConfig, ProviderType, ProxyInfo,
    ProxyUsageStats, Region,
};

pub use base::{AdapterSettings, AuthScheme, BaseAdapter};
pub use brightdata::BrightDataAdapter;
pub use ipidea::IpideaAdapter;
pub use iproyal::IpRoyalAdapter;
pub use kookeey::KookeeyAdapter;
pub use manager::{AdapterManager, ReloadOutcome};
pub use oxylabs::{OxylabsAdapter, OxylabsProxyType};
pub use pool::ProxyPool;
pub use smartproxy::SmartProxyAdapter;

/// Batch size used when `GetProxyOptions::limit` is unset
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// The contract every vendor adapter satisfies
///
/// All methods except `initialize` and the cache accessors fail with
/// `BrokerError::NotInitialized` until `initialize` has succeeded.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn base(&self) -> &BaseAdapter;

    fn pool(&self) -> &ProxyPool;

    /// Downcast hook for vendor-specific operations
    fn as_any(&self) -> &dyn Any;

    fn name(&self) -> &'static str {
        self.base().name()
    }

    fn provider_type(&self) -> ProviderType {
        self.base().provider_type()
    }

    fn is_initialized(&self) -> bool {
        self.base().is_initialized()
    }

    async fn initialize(&mut self, config: ProviderConfig) -> Result<()>;

    async fn get_proxy_list(&self, options: &GetProxyOptions) -> Result<Vec<ProxyInfo>>;

    /// Best-effort vendor counters; only the initialization guard is an error
    async fn get_usage_stats(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<ProxyUsageStats>;

    /// Supported regions, or a vendor fallback list when the vendor API fails
    async fn get_available_regions(&self) -> Result<Vec<Region>>;

    async fn test_connection(&self) -> Result<bool>;

    /// Top the cache up to `min_size`; returns how many new cache entries appeared
    ///
    /// Vendors that hand back credentials already cached overwrite them, so the count is
    /// taken from the cache rather than from the fetched batch.
    async fn refresh_pool(&self, min_size: usize) -> Result<usize> {
        self.base().ensure_initialized()?;

        let current = self.pool().len();
        if current >= min_size {
            return Ok(0);
        }

        self.get_proxy_list(&GetProxyOptions::with_limit(min_size - current))
            .await?;
        Ok(self.pool().len().saturating_sub(current))
    }

    async fn validate_proxy(&self, proxy: &ProxyInfo) -> Result<bool> {
        self.base().validate_proxy(proxy).await
    }

    async fn check_health(&self, proxy: &ProxyInfo) -> Result<HealthCheckResult> {
        let result = self.base().check_health(proxy).await?;
        let latency = u32::try_from(result.response_time).unwrap_or(u32::MAX);
        self.pool().record_check(&proxy.id, result.healthy, latency);
        Ok(result)
    }

    fn estimate_cost(&self, bandwidth_mb: f64) -> Result<f64> {
        self.base().estimate_cost(bandwidth_mb)
    }

    /// Hand a proxy back; the default just clears its in-use flag
    async fn release_proxy(&self, proxy_id: &str) -> Result<()> {
        self.base().ensure_initialized()?;
        self.pool().set_in_use(proxy_id, false);
        Ok(())
    }

    fn cached_proxy(&self, proxy_id: &str) -> Option<ProxyInfo> {
        self.pool().get(proxy_id)
    }

    fn clear_cache(&self) {
        self.pool().clear();
    }

    fn pool_size(&self) -> usize {
        self.pool().len()
    }

    fn pool_stats(&self) -> PoolStats {
        self.pool().stats()
    }
}

/// Construct the uninitialized adapter for a vendor
pub fn create_adapter(provider_type: ProviderType, settings: AdapterSettings) -> Box<dyn ProviderAdapter> {
    match provider_type {
        ProviderType::BrightData => Box::new(BrightDataAdapter::new(settings)),
        ProviderType::Oxylabs => Box::new(OxylabsAdapter::new(settings)),
        ProviderType::SmartProxy => Box::new(SmartProxyAdapter::new(settings)),
        ProviderType::IpRoyal => Box::new(IpRoyalAdapter::new(settings)),
        ProviderType::Ipidea => Box::new(IpideaAdapter::new(settings)),
        ProviderType::Kookeey => Box::new(KookeeyAdapter::new(settings)),
    }
}

/// Zero-valued stats for a failed vendor read, with the failure logged
pub(crate) fn degraded_stats(
    base: &BaseAdapter,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    error: &dyn std::fmt::Display,
) -> Result<ProxyUsageStats> {
    let cost_per_gb = base.cost_per_gb()?;
    warn!(vendor = base.name(), error = %error, "Failed to get usage stats");
    Ok(ProxyUsageStats::empty(start, end, cost_per_gb))
}

/// Bytes reported by a vendor, converted to MB
pub(crate) fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::time::Duration;

    pub fn settings() -> AdapterSettings {
        AdapterSettings {
            validation_url: "http://validation.test/json".to_string(),
            default_timeout: Duration::from_secs(5),
            health_check_timeout: Duration::from_secs(2),
        }
    }

    /// Config pointing the vendor API at `api_url`
    pub fn config(provider_type: ProviderType, api_url: &str, cost_per_gb: f64) -> ProviderConfig {
        let mut config = ProviderConfig::new(provider_type, "test", cost_per_gb);
        config.api_url = api_url.to_string();
        config
    }

    /// Assert that a contract call fails with the vendor-named guard error
    pub fn assert_not_initialized<T: std::fmt::Debug>(result: Result<T>, vendor: &str) {
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), format!("{} adapter not initialized", vendor));
    }

    /// Every guarded contract method on a fresh adapter
    pub async fn assert_guarded(adapter: &dyn ProviderAdapter) {
        let vendor = adapter.name();
        let candidate = ProxyInfo::new("p", "127.0.0.1", 1, adapter.provider_type().as_str(), 1.0);

        assert!(!adapter.is_initialized());
        assert_not_initialized(adapter.get_proxy_list(&GetProxyOptions::default()).await, vendor);
        assert_not_initialized(adapter.get_usage_stats(None, None).await, vendor);
        assert_not_initialized(adapter.get_available_regions().await, vendor);
        assert_not_initialized(adapter.test_connection().await, vendor);
        assert_not_initialized(adapter.refresh_pool(10).await, vendor);
        assert_not_initialized(adapter.validate_proxy(&candidate).await, vendor);
        assert_not_initialized(adapter.check_health(&candidate).await, vendor);
        assert_not_initialized(adapter.estimate_cost(1.0), vendor);
        assert_not_initialized(adapter.release_proxy("p").await, vendor);
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_every_vendor_is_guarded_before_initialize() {
        for provider_type in ProviderType::ALL {
            let adapter = create_adapter(provider_type, settings());
            assert_eq!(adapter.provider_type(), provider_type);
            assert_eq!(adapter.name(), provider_type.display_name());
            assert_guarded(adapter.as_ref()).await;
        }
    }

    #[test]
    fn test_downcast_to_vendor_type() {
        let adapter = create_adapter(ProviderType::Ipidea, settings());
        assert!(adapter.as_any().downcast_ref::<IpideaAdapter>().is_some());
        assert!(adapter.as_any().downcast_ref::<KookeeyAdapter>().is_none());
    }

    #[test]
    fn test_bytes_to_mb() {
        assert_eq!(bytes_to_mb(0), 0.0);
        assert_eq!(bytes_to_mb(5 * 1024 * 1024 * 1024), 5120.0);
    }
}
