//! Background services

pub mod pool_maintenance;
pub mod provider_reload;

pub use pool_maintenance::{
    MaintenanceReport, PoolMaintenanceConfig, PoolMaintenanceHandle, PoolMaintenanceService,
};
pub use provider_reload::{ProviderReloadConfig, ProviderReloadHandle, ProviderReloadService};
