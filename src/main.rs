//! Egress Broker daemon
//!
//! Loads vendor adapters from the configuration store and keeps them fresh until shutdown.

use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use egress_broker::config::{Config, LogConfig};
use egress_broker::crypto::ConfigCipher;
use egress_broker::database::Database;
use egress_broker::error::Result;
use egress_broker::providers::{AdapterManager, AdapterSettings};
use egress_broker::repository::ProviderRepository;
use egress_broker::services::{
    PoolMaintenanceConfig, PoolMaintenanceHandle, PoolMaintenanceService, ProviderReloadConfig,
    ProviderReloadHandle, ProviderReloadService,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting Egress Broker");

    if config.crypto.is_default_key() {
        warn!("ENCRYPTION_KEY is not set, using the built-in default key");
    }

    // Connect to database
    let db = Database::new(&config).await?;
    db.run_migrations().await?;

    let cipher = ConfigCipher::from_secret(&config.crypto.encryption_key)?;
    let store = Arc::new(ProviderRepository::new(db.pool().clone()));
    let manager = Arc::new(AdapterManager::new(
        store,
        cipher,
        AdapterSettings::from(&config.broker),
    ));

    let loaded = manager.load_all_providers().await?;
    info!(loaded, "Provider adapters ready");

    let mut tasks = Vec::new();

    let (reload_handle, reload_shutdown) = ProviderReloadHandle::new();
    if config.broker.reload_interval > 0 {
        let service = ProviderReloadService::new(
            manager.clone(),
            ProviderReloadConfig::from(&config.broker),
        );
        tasks.push(tokio::spawn(async move {
            service.run(reload_shutdown).await;
        }));
    } else {
        info!("Provider reload service disabled");
    }

    let (pool_handle, pool_shutdown) = PoolMaintenanceHandle::new();
    if config.broker.pool_refresh_interval > 0 {
        let service = PoolMaintenanceService::new(
            manager.clone(),
            PoolMaintenanceConfig::from(&config.broker),
        );
        tasks.push(tokio::spawn(async move {
            service.run(pool_shutdown).await;
        }));
    } else {
        info!("Pool maintenance service disabled");
    }

    shutdown_signal().await;
    info!("Shutdown signal received");

    reload_handle.shutdown();
    pool_handle.shutdown();

    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            error!(error = %e, "Background task panicked");
        }
    }

    db.close().await;
    info!("Egress Broker stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("egress_broker={}", log.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
