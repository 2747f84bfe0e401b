//! Minecraft Server integration
//!
//! Monitors a Minecraft Java Edition server. Each config entry gets a
//! [`MinecraftServerCoordinator`] that is forwarded to the binary sensor and
//! sensor platforms.

mod constants;
mod coordinator;
mod error;
pub mod migration;

use std::sync::Arc;

use async_trait::async_trait;
use ha_config_entries::{ConfigEntries, ConfigEntry, Integration, IntegrationError};
use ha_registries::{DeviceRegistry, EntityRegistry, Registries};
use tracing::debug;

pub use constants::*;
pub use coordinator::{
    CoordinatorTable, MinecraftServerConfig, MinecraftServerCoordinator, ServerStatus,
    StatusError, StatusSource,
};
pub use error::{MinecraftServerError, MinecraftServerResult};

/// The `minecraft_server` integration
pub struct MinecraftServer {
    coordinators: CoordinatorTable,
    devices: Arc<DeviceRegistry>,
    entities: Arc<EntityRegistry>,
    status_source: Arc<dyn StatusSource>,
}

impl MinecraftServer {
    pub fn new(registries: &Registries, status_source: Arc<dyn StatusSource>) -> Self {
        Self {
            coordinators: CoordinatorTable::new(),
            devices: Arc::clone(&registries.devices),
            entities: Arc::clone(&registries.entities),
            status_source,
        }
    }

    /// Coordinators of the loaded entries
    pub fn coordinators(&self) -> &CoordinatorTable {
        &self.coordinators
    }

    async fn setup(
        &self,
        entries: &ConfigEntries,
        entry: &ConfigEntry,
    ) -> MinecraftServerResult<()> {
        let config = MinecraftServerConfig::from_entry_data(&entry.data)?;
        debug!(
            "Creating coordinator instance for '{}' ({})",
            config.name, config.host
        );

        let coordinator = Arc::new(MinecraftServerCoordinator::new(
            entry.entry_id.clone(),
            config,
            Arc::clone(&self.status_source),
        ));
        coordinator.first_refresh().await?;

        self.coordinators.insert(coordinator);
        entries.forward_entry_setups(entry, &PLATFORMS);
        Ok(())
    }
}

#[async_trait]
impl Integration for MinecraftServer {
    fn domain(&self) -> &str {
        DOMAIN
    }

    fn version(&self) -> u32 {
        VERSION
    }

    async fn setup_entry(
        &self,
        entries: &ConfigEntries,
        entry: &ConfigEntry,
    ) -> Result<bool, IntegrationError> {
        self.setup(entries, entry).await?;
        Ok(true)
    }

    async fn unload_entry(
        &self,
        entries: &ConfigEntries,
        entry: &ConfigEntry,
    ) -> Result<bool, IntegrationError> {
        let unload_ok = entries.unload_platforms(entry, &PLATFORMS);
        self.coordinators.remove(&entry.entry_id);
        Ok(unload_ok)
    }

    async fn migrate_entry(
        &self,
        entries: &ConfigEntries,
        entry: &ConfigEntry,
    ) -> Result<bool, IntegrationError> {
        Ok(migration::migrate_entry(entries, &self.devices, &self.entities, entry).await?)
    }
}
