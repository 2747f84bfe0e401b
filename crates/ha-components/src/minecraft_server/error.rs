//! Minecraft Server errors

use ha_config_entries::{ConfigEntriesError, IntegrationError};
use ha_registries::{DeviceRegistryError, EntityRegistryError, StorageError};
use thiserror::Error;

use super::coordinator::StatusError;

#[derive(Debug, Error)]
pub enum MinecraftServerError {
    #[error("Invalid config entry data: {0}")]
    InvalidConfig(#[from] serde_json::Error),

    #[error("Server not ready: {0}")]
    NotReady(#[from] StatusError),

    /// Version 1 entries always carry the unique id the identifiers were built from
    #[error("Config entry {0} has no legacy unique ID to migrate from")]
    MissingLegacyUniqueId(String),

    #[error("Malformed legacy unique ID: {0}")]
    MalformedUniqueId(String),

    #[error(transparent)]
    ConfigEntries(#[from] ConfigEntriesError),

    #[error(transparent)]
    DeviceRegistry(#[from] DeviceRegistryError),

    #[error(transparent)]
    EntityRegistry(#[from] EntityRegistryError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type MinecraftServerResult<T> = Result<T, MinecraftServerError>;

impl From<MinecraftServerError> for IntegrationError {
    fn from(err: MinecraftServerError) -> Self {
        match err {
            MinecraftServerError::NotReady(_) => IntegrationError::NotReady(err.to_string()),
            MinecraftServerError::InvalidConfig(_) => IntegrationError::SetupFailed(err.to_string()),
            _ => IntegrationError::MigrationFailed(err.to_string()),
        }
    }
}
