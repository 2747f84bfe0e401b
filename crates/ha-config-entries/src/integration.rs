//! Integration hooks
//!
//! An integration plugs into the config entry lifecycle by implementing
//! [`Integration`] and registering itself with
//! [`ConfigEntries::register_integration`](crate::ConfigEntries::register_integration).

use async_trait::async_trait;
use thiserror::Error;

use crate::entry::ConfigEntry;
use crate::manager::ConfigEntries;

/// Errors an integration reports back to the config entry manager
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntegrationError {
    /// The remote side is not reachable yet; setup will be retried
    #[error("Config entry not ready: {0}")]
    NotReady(String),

    #[error("Setup failed: {0}")]
    SetupFailed(String),

    #[error("Unload failed: {0}")]
    UnloadFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Lifecycle hooks of an integration.
///
/// Every hook receives the manager so it can update the entry or forward
/// it to platforms.
#[async_trait]
pub trait Integration: Send + Sync {
    /// Integration domain (e.g., "minecraft_server")
    fn domain(&self) -> &str;

    /// Current major version of this integration's config entries
    fn version(&self) -> u32 {
        1
    }

    /// Current minor version of this integration's config entries
    fn minor_version(&self) -> u32 {
        1
    }

    /// Set up a config entry. Returning `Ok(false)` marks a setup error.
    async fn setup_entry(
        &self,
        entries: &ConfigEntries,
        entry: &ConfigEntry,
    ) -> Result<bool, IntegrationError>;

    /// Unload a loaded config entry.
    async fn unload_entry(
        &self,
        entries: &ConfigEntries,
        entry: &ConfigEntry,
    ) -> Result<bool, IntegrationError>;

    /// Migrate an entry stored with another version.
    ///
    /// Called during setup when the stored version differs from
    /// [`Integration::version`]. Integrations without a migration path keep
    /// the default, which leaves the entry in `MigrationError`.
    async fn migrate_entry(
        &self,
        _entries: &ConfigEntries,
        _entry: &ConfigEntry,
    ) -> Result<bool, IntegrationError> {
        Ok(false)
    }
}
