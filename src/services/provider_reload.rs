//! Provider reload service
//!
//! Periodically rebuilds the adapter registry so configuration edits made through the
//! management layer take effect without a restart.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, instrument};

use crate::config::BrokerConfig;
use crate::error::Result;
use crate::providers::AdapterManager;

/// Provider reload service configuration
#[derive(Clone)]
pub struct ProviderReloadConfig {
    /// How often to reload every enabled provider
    pub reload_interval: Duration,
}

impl Default for ProviderReloadConfig {
    fn default() -> Self {
        Self {
            reload_interval: Duration::from_secs(300),
        }
    }
}

impl From<&BrokerConfig> for ProviderReloadConfig {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            reload_interval: Duration::from_secs(config.reload_interval.max(1)),
        }
    }
}

pub struct ProviderReloadService {
    manager: Arc<AdapterManager>,
    config: ProviderReloadConfig,
}

impl ProviderReloadService {
    pub fn new(manager: Arc<AdapterManager>, config: ProviderReloadConfig) -> Self {
        Self { manager, config }
    }

    /// Run until the shutdown channel flips to `true`
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.reload_interval.as_secs(),
            "Starting provider reload service"
        );

        let mut ticker = interval(self.config.reload_interval);
        ticker.tick().await; // Startup already loaded the registry

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reload().await {
                        error!(error = %e, "Provider reload failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Provider reload service shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One reload pass; the previous registry stays in place if the store is unreachable
    pub async fn reload(&self) -> Result<usize> {
        let loaded = self.manager.load_all_providers().await?;
        debug!(loaded, "Provider registry refreshed");
        Ok(loaded)
    }
}

/// Handle for stopping the provider reload service
pub struct ProviderReloadHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl ProviderReloadHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for ProviderReloadHandle {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ConfigCipher;
    use crate::error::BrokerError;
    use crate::models::ProviderRow;
    use crate::providers::test_support::settings;
    use crate::repository::ProviderStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use serde_json::json;
    use uuid::Uuid;

    struct FlakyStore {
        rows: Vec<ProviderRow>,
        fail: Mutex<bool>,
    }

    #[async_trait]
    impl ProviderStore for FlakyStore {
        async fn enabled_providers(&self) -> Result<Vec<ProviderRow>> {
            if *self.fail.lock() {
                return Err(BrokerError::DatabaseConnection("store offline".into()));
            }
            Ok(self.rows.clone())
        }

        async fn find_provider(&self, id: Uuid) -> Result<Option<ProviderRow>> {
            Ok(self.rows.iter().find(|row| row.id == id).cloned())
        }
    }

    fn smartproxy_row() -> ProviderRow {
        ProviderRow {
            id: Uuid::new_v4(),
            provider_type: "smartproxy".to_string(),
            name: "smart".to_string(),
            config: json!({ "username": "u", "password": "p" }),
            cost_per_gb: 4.0,
            enabled: true,
            priority: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn service(store: Arc<FlakyStore>) -> ProviderReloadService {
        let cipher = ConfigCipher::from_secret("reload-test").unwrap();
        let manager = Arc::new(AdapterManager::new(store, cipher, settings()));
        ProviderReloadService::new(manager, ProviderReloadConfig::default())
    }

    #[test]
    fn test_config_from_broker_config() {
        let broker = BrokerConfig {
            reload_interval: 0,
            ..Default::default()
        };
        assert_eq!(ProviderReloadConfig::from(&broker).reload_interval, Duration::from_secs(1));
        assert_eq!(
            ProviderReloadConfig::default().reload_interval,
            Duration::from_secs(300)
        );
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_registry() {
        let store = Arc::new(FlakyStore {
            rows: vec![smartproxy_row()],
            fail: Mutex::new(false),
        });
        let service = service(store.clone());

        assert_eq!(service.reload().await.unwrap(), 1);
        *store.fail.lock() = true;
        assert!(service.reload().await.is_err());
        assert_eq!(service.manager.registry_len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(FlakyStore {
            rows: Vec::new(),
            fail: Mutex::new(false),
        });
        let service = service(store);
        let (handle, shutdown) = ProviderReloadHandle::new();

        let task = tokio::spawn(async move { service.run(shutdown).await });
        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
