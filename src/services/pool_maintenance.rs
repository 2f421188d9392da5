//! Pool maintenance service
//!
//! Tops every registered adapter's credential cache up to a minimum size. Adapters are
//! refreshed one after another, so two refreshes never overlap on the same adapter.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, instrument, warn};

use crate::config::BrokerConfig;
use crate::providers::AdapterManager;

#[derive(Clone)]
pub struct PoolMaintenanceConfig {
    /// How often to top up the pools
    pub refresh_interval: Duration,
    /// Minimum number of cached credentials per adapter
    pub min_pool_size: usize,
}

impl Default for PoolMaintenanceConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            min_pool_size: 100,
        }
    }
}

impl From<&BrokerConfig> for PoolMaintenanceConfig {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            refresh_interval: Duration::from_secs(config.pool_refresh_interval.max(1)),
            min_pool_size: config.pool_min_size,
        }
    }
}

/// Outcome of one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub adapters: usize,
    pub added: usize,
    pub failed: usize,
}

pub struct PoolMaintenanceService {
    manager: Arc<AdapterManager>,
    config: PoolMaintenanceConfig,
}

impl PoolMaintenanceService {
    pub fn new(manager: Arc<AdapterManager>, config: PoolMaintenanceConfig) -> Self {
        Self { manager, config }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.refresh_interval.as_secs(),
            min_pool_size = self.config.min_pool_size,
            "Starting pool maintenance service"
        );

        self.refresh_all().await;

        let mut ticker = interval(self.config.refresh_interval);
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh_all().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Pool maintenance service shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Refresh each active adapter in turn; a failing adapter does not stop the pass
    pub async fn refresh_all(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        for adapter in self.manager.get_active_adapters() {
            report.adapters += 1;
            match adapter.refresh_pool(self.config.min_pool_size).await {
                Ok(0) => {}
                Ok(added) => {
                    debug!(vendor = adapter.name(), added, "Pool topped up");
                    report.added += added;
                }
                Err(e) => {
                    warn!(vendor = adapter.name(), error = %e, "Pool refresh failed");
                    report.failed += 1;
                }
            }
        }

        if report.added > 0 || report.failed > 0 {
            info!(
                adapters = report.adapters,
                added = report.added,
                failed = report.failed,
                "Pool maintenance pass finished"
            );
        }
        report
    }
}

/// Handle for stopping the pool maintenance service
pub struct PoolMaintenanceHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl PoolMaintenanceHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for PoolMaintenanceHandle {
    fn default() -> Self {
        Self::new().0
    }
}
