//! Adapter registry
//!
//! Builds one initialized adapter per enabled configuration row and keeps them keyed by row id.
//! A row that fails to decrypt, names an unknown vendor, or fails `initialize` is logged and
//! skipped; it never prevents the remaining rows from loading.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{create_adapter, AdapterSettings, ProviderAdapter};
use crate::crypto::{decrypt_config, ConfigCipher};
use crate::error::Result;
use crate::models::{ProviderConfig, ProviderRow, ProviderType};
use crate::repository::ProviderStore;

/// Result of reloading a single configuration row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Row no longer exists
    Removed,
    /// Row exists but is disabled
    Disabled,
    /// Row rebuilt and re-registered
    Reloaded,
}

#[derive(Clone)]
struct RegistryEntry {
    name: String,
    priority: i32,
    provider_type: ProviderType,
    adapter: Arc<dyn ProviderAdapter>,
}

pub struct AdapterManager {
    store: Arc<dyn ProviderStore>,
    cipher: ConfigCipher,
    settings: AdapterSettings,
    registry: RwLock<HashMap<Uuid, RegistryEntry>>,
}

impl AdapterManager {
    pub fn new(store: Arc<dyn ProviderStore>, cipher: ConfigCipher, settings: AdapterSettings) -> Self {
        Self {
            store,
            cipher,
            settings,
            registry: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the whole registry from enabled rows; returns the number registered
    #[instrument(skip(self))]
    pub async fn load_all_providers(&self) -> Result<usize> {
        let rows = self.store.enabled_providers().await?;
        let mut next = HashMap::with_capacity(rows.len());

        for row in &rows {
            match self.build_entry(row).await {
                Ok(entry) => {
                    info!(
                        provider_id = %row.id,
                        vendor = entry.provider_type.display_name(),
                        name = %row.name,
                        "Loaded provider"
                    );
                    next.insert(row.id, entry);
                }
                Err(e) => {
                    warn!(provider_id = %row.id, name = %row.name, error = %e, "Skipping provider");
                }
            }
        }

        let loaded = next.len();
        *self.registry.write() = next;

        info!(loaded, configured = rows.len(), "Provider registry loaded");
        Ok(loaded)
    }

    /// Re-read one row and bring the registry in line with it
    #[instrument(skip(self))]
    pub async fn reload_adapter(&self, id: Uuid) -> Result<ReloadOutcome> {
        let row = match self.store.find_provider(id).await? {
            None => {
                self.registry.write().remove(&id);
                info!(provider_id = %id, "Provider removed from registry");
                return Ok(ReloadOutcome::Removed);
            }
            Some(row) => row,
        };

        if !row.enabled {
            self.registry.write().remove(&id);
            info!(provider_id = %id, "Provider disabled, removed from registry");
            return Ok(ReloadOutcome::Disabled);
        }

        match self.build_entry(&row).await {
            Ok(entry) => {
                self.registry.write().insert(id, entry);
                info!(provider_id = %id, name = %row.name, "Provider reloaded");
                Ok(ReloadOutcome::Reloaded)
            }
            Err(e) => {
                self.registry.write().remove(&id);
                warn!(provider_id = %id, error = %e, "Provider reload failed, removed from registry");
                Err(e)
            }
        }
    }

    /// Build and register a row regardless of its enabled flag
    pub async fn add_adapter(&self, row: &ProviderRow) -> Result<()> {
        let entry = self.build_entry(row).await?;
        self.registry.write().insert(row.id, entry);
        Ok(())
    }

    pub fn remove_adapter(&self, id: Uuid) -> bool {
        self.registry.write().remove(&id).is_some()
    }

    /// Snapshot of the registry ordered by descending priority
    pub fn get_active_adapters(&self) -> Vec<Arc<dyn ProviderAdapter>> {
        self.sorted_entries()
            .into_iter()
            .map(|entry| entry.adapter)
            .collect()
    }

    pub fn get_adapter_by_id(&self, id: Uuid) -> Option<Arc<dyn ProviderAdapter>> {
        self.registry.read().get(&id).map(|entry| entry.adapter.clone())
    }

    /// Highest-priority adapter of the given vendor
    pub fn get_adapter_by_type(&self, provider_type: ProviderType) -> Option<Arc<dyn ProviderAdapter>> {
        self.sorted_entries()
            .into_iter()
            .find(|entry| entry.provider_type == provider_type)
            .map(|entry| entry.adapter)
    }

    pub fn registry_len(&self) -> usize {
        self.registry.read().len()
    }

    pub fn registry_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.registry.read().keys().copied().collect();
        ids.sort();
        ids
    }

    fn sorted_entries(&self) -> Vec<RegistryEntry> {
        let mut entries: Vec<RegistryEntry> = self.registry.read().values().cloned().collect();
        entries.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        entries
    }

    async fn build_entry(&self, row: &ProviderRow) -> Result<RegistryEntry> {
        let provider_type: ProviderType = row.provider_type.parse()?;

        let stored = decrypt_config(&self.cipher, &row.config);
        let config = ProviderConfig::from_stored(provider_type, row, &stored);

        let mut adapter = create_adapter(provider_type, self.settings.clone());
        adapter.initialize(config).await?;
        debug!(provider_id = %row.id, vendor = adapter.name(), "Adapter initialized");

        Ok(RegistryEntry {
            name: row.name.clone(),
            priority: row.priority,
            provider_type,
            adapter: Arc::from(adapter),
        })
    }
}
