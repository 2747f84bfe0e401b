//! Home Assistant Registries
//!
//! This crate provides persistent registries for tracking:
//! - Entities (EntityRegistry)
//! - Devices (DeviceRegistry)
//!
//! Both registries use JSON persistence in the `.storage/` directory
//! with versioning.

pub mod storage;

pub mod device_registry;
pub mod entity_registry;

// Re-export main types
pub use storage::{Storable, Storage, StorageError, StorageFile, StorageResult};

pub use entity_registry::{
    DisabledBy, EntityEntry, EntityRegistry, EntityRegistryData, EntityRegistryError,
    EntityUpdate,
};

pub use device_registry::{
    DeviceEntry, DeviceEntryType, DeviceIdentifier, DeviceRegistry, DeviceRegistryData,
    DeviceRegistryError,
};

use std::sync::Arc;

/// Device and entity registries sharing one storage root
pub struct Registries {
    pub storage: Arc<Storage>,
    pub entities: Arc<EntityRegistry>,
    pub devices: Arc<DeviceRegistry>,
}

impl Registries {
    /// Create new registries with the given config directory
    pub fn new(config_dir: impl AsRef<std::path::Path>) -> Self {
        let storage = Arc::new(Storage::new(config_dir));

        Self {
            entities: Arc::new(EntityRegistry::new(storage.clone())),
            devices: Arc::new(DeviceRegistry::new(storage.clone())),
            storage,
        }
    }

    /// Load all registries from storage
    pub async fn load_all(&self) -> StorageResult<()> {
        self.entities.load().await?;
        self.devices.load().await?;
        Ok(())
    }

    /// Save all registries to storage
    pub async fn save_all(&self) -> StorageResult<()> {
        self.entities.save().await?;
        self.devices.save().await?;
        Ok(())
    }
}
