//! Egress Broker - uniform adapter layer over proxy vendors
//!
//! Every vendor is driven through the same [`providers::ProviderAdapter`] contract: issue
//! egress credentials, report usage and cost, list regions and validate proxies.
//!
//! ## Features
//!
//! - Six vendor adapters (BrightData, Oxylabs, SmartProxy, IPRoyal, IPIDEA, Kookeey)
//! - Username-encoded routing for gateway vendors, sub-account fetching for tunnel vendors
//! - Per-adapter credential cache with health bookkeeping
//! - Registry of initialized adapters built from PostgreSQL configuration rows
//! - AES-256-CBC envelope for stored vendor secrets
//! - Background provider reload and pool top-up services

pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod models;
pub mod providers;
pub mod repository;
pub mod services;

pub use config::Config;
pub use crypto::ConfigCipher;
pub use database::Database;
pub use error::{BrokerError, Result};
pub use providers::{AdapterManager, ProviderAdapter};
