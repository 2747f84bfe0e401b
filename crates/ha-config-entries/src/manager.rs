//! Config Entries Manager
//!
//! Manages the lifecycle of configuration entries.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use ha_core::Platform;
use ha_registries::{Storable, Storage, StorageResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::entry::{ConfigEntry, ConfigEntryState, ConfigEntryUpdate};
use crate::integration::{Integration, IntegrationError};
use crate::state_machine::{calculate_retry_delay, InvalidTransition};

/// Storage key for config entries
pub const STORAGE_KEY: &str = "core.config_entries";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 5;

/// Config entries errors
#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error("Cannot unload entry in state {0:?}")]
    CannotUnload(ConfigEntryState),

    #[error(transparent)]
    InvalidState(#[from] InvalidTransition),

    #[error("Entry not ready: {reason} (retrying in {retry_in:?})")]
    NotReady { reason: String, retry_in: Duration },

    #[error("Setup failed: {0}")]
    SetupFailed(String),

    #[error("Unload failed: {0}")]
    UnloadFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] ha_registries::StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Config entries data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    pub entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Config Entries Manager
///
/// Owns every config entry and drives its lifecycle:
/// - Loading/saving from storage
/// - Entry creation, update and removal
/// - Version migration, setup and unload through the registered [`Integration`]
/// - Tracking which platforms each entry was forwarded to
pub struct ConfigEntries {
    storage: Arc<Storage>,

    /// Primary index: entry_id -> ConfigEntry
    entries: DashMap<String, ConfigEntry>,

    /// Index: domain -> set of entry_ids
    by_domain: DashMap<String, HashSet<String>>,

    /// Index: (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,

    /// Serializes setup/unload across all entries
    setup_lock: Mutex<()>,

    /// Registered integrations by domain
    integrations: DashMap<String, Arc<dyn Integration>>,

    /// Platforms each entry was forwarded to
    platforms: DashMap<String, BTreeSet<Platform>>,
}

impl ConfigEntries {
    /// Create a new config entries manager
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
            setup_lock: Mutex::new(()),
            integrations: DashMap::new(),
            platforms: DashMap::new(),
        }
    }

    /// Load entries from storage
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(file) = self.storage.load::<ConfigEntriesData>().await? {
            info!(
                "Loading {} config entries from storage (v{}.{})",
                file.data.entries.len(),
                file.version,
                file.minor_version
            );
            for entry in file.data.entries {
                self.index_entry(&entry);
            }
        }
        Ok(())
    }

    /// Save entries to storage
    pub async fn save(&self) -> StorageResult<()> {
        let mut entries: Vec<ConfigEntry> =
            self.entries.iter().map(|r| r.value().clone()).collect();
        entries.sort_by_key(|e| e.created_at);

        let count = entries.len();
        self.storage.save(&ConfigEntriesData { entries }).await?;
        debug!("Saved {} config entries to storage", count);
        Ok(())
    }

    fn index_entry(&self, entry: &ConfigEntry) {
        let entry_id = entry.entry_id.clone();

        self.entries.insert(entry_id.clone(), entry.clone());

        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry_id.clone());

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .insert((entry.domain.clone(), unique_id.clone()), entry_id);
        }
    }

    fn unindex_entry(&self, entry: &ConfigEntry) {
        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.remove(&entry.entry_id);
        }

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }

        self.entries.remove(&entry.entry_id);
    }

    /// Get an entry by ID
    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    fn require(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        self.get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))
    }

    /// Get all entries for a domain
    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.by_domain
            .get(domain)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Get entry by unique_id
    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        self.by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .and_then(|entry_id| self.get(&entry_id))
    }

    /// Add a new config entry
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            if self.get_by_unique_id(&entry.domain, unique_id).is_some() {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index_entry(&entry);
        self.save().await?;

        info!(
            "Added config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry.entry_id
        );
        Ok(entry)
    }

    /// Update an existing entry and persist it
    pub async fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self.require(entry_id)?;

        if let Some(Some(ref unique_id)) = update.unique_id {
            if let Some(other) = self.get_by_unique_id(&entry.domain, unique_id) {
                if other.entry_id != entry.entry_id {
                    return Err(ConfigEntriesError::AlreadyExists {
                        domain: entry.domain.clone(),
                        unique_id: unique_id.clone(),
                    });
                }
            }
        }

        self.unindex_entry(&entry);

        let mut updated = entry;
        if let Some(title) = update.title {
            updated.title = title;
        }
        if let Some(data) = update.data {
            updated.data = data;
        }
        if let Some(options) = update.options {
            updated.options = options;
        }
        if let Some(unique_id) = update.unique_id {
            updated.unique_id = unique_id;
        }
        if let Some(version) = update.version {
            updated.version = version;
        }
        if let Some(minor_version) = update.minor_version {
            updated.minor_version = minor_version;
        }
        updated.modified_at = Utc::now();

        self.index_entry(&updated);
        self.save().await?;

        debug!("Updated config entry: {}", entry_id);
        Ok(updated)
    }

    /// Remove an entry, unloading it first if it is loaded
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        if self.require(entry_id)?.is_loaded() {
            self.unload(entry_id).await?;
        }

        let entry = self.require(entry_id)?;
        self.unindex_entry(&entry);
        self.platforms.remove(entry_id);
        self.save().await?;

        info!(
            "Removed config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry_id
        );
        Ok(entry)
    }

    /// Move an entry to a new lifecycle state, enforcing the FSM
    fn transition(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<()> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        if let Err(e) = entry.try_set_state(state, reason) {
            warn!("Entry {}: {}", entry_id, e);
            return Err(e.into());
        }
        debug!("Entry {} state changed to {:?}", entry_id, state);
        Ok(())
    }

    /// Register the integration handling a domain
    pub fn register_integration(&self, integration: Arc<dyn Integration>) {
        let domain = integration.domain().to_string();
        debug!("Registered integration for domain: {}", domain);
        self.integrations.insert(domain, integration);
    }

    fn integration(&self, domain: &str) -> Option<Arc<dyn Integration>> {
        self.integrations.get(domain).map(|r| Arc::clone(r.value()))
    }

    /// Set up an entry: migrate it if its version is behind, then call the
    /// integration's setup hook.
    pub async fn setup(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;

        let entry = self.require(entry_id)?;
        if entry.is_disabled() {
            debug!("Skipping setup for disabled entry: {}", entry_id);
            return Ok(());
        }

        self.transition(entry_id, ConfigEntryState::SetupInProgress, None)?;

        let Some(integration) = self.integration(&entry.domain) else {
            self.transition(entry_id, ConfigEntryState::Loaded, None)?;
            debug!(
                "No integration registered for domain {}, marking as loaded",
                entry.domain
            );
            return Ok(());
        };

        if let Err(reason) = self.migrate(integration.as_ref(), &entry).await {
            self.transition(
                entry_id,
                ConfigEntryState::MigrationError,
                Some(reason.clone()),
            )?;
            return Err(ConfigEntriesError::MigrationFailed(reason));
        }

        // Migration may have rewritten the entry
        let entry = self.require(entry_id)?;

        match integration.setup_entry(self, &entry).await {
            Ok(true) => {
                self.transition(entry_id, ConfigEntryState::Loaded, None)?;
                info!("Setup completed for entry: {} ({})", entry.title, entry_id);
                Ok(())
            }
            Ok(false) => {
                let reason = format!("Integration {} returned false from setup", entry.domain);
                warn!("Setup failed for entry {}: {}", entry_id, reason);
                self.transition(entry_id, ConfigEntryState::SetupError, Some(reason.clone()))?;
                Err(ConfigEntriesError::SetupFailed(reason))
            }
            Err(IntegrationError::NotReady(reason)) => {
                let retry_in = calculate_retry_delay(entry.tries);
                if let Some(mut stored) = self.entries.get_mut(entry_id) {
                    stored.increment_tries();
                }
                warn!(
                    "Config entry '{}' for {} integration not ready yet: {}; retrying in {:?}",
                    entry.title, entry.domain, reason, retry_in
                );
                self.transition(entry_id, ConfigEntryState::SetupRetry, Some(reason.clone()))?;
                Err(ConfigEntriesError::NotReady { reason, retry_in })
            }
            Err(e) => {
                let reason = e.to_string();
                warn!("Setup failed for entry {}: {}", entry_id, reason);
                self.transition(entry_id, ConfigEntryState::SetupError, Some(reason.clone()))?;
                Err(ConfigEntriesError::SetupFailed(reason))
            }
        }
    }

    /// Bring an entry to the integration's version.
    ///
    /// Returns the failure reason when the entry cannot be used.
    async fn migrate(
        &self,
        integration: &dyn Integration,
        entry: &ConfigEntry,
    ) -> Result<(), String> {
        let (version, minor_version) = (integration.version(), integration.minor_version());
        if entry.version == version && entry.minor_version == minor_version {
            return Ok(());
        }

        if entry.version > version || (entry.version == version && entry.minor_version > minor_version) {
            let reason = format!(
                "Unable to downgrade {} entry {} from {}.{} to {}.{}",
                entry.domain, entry.entry_id, entry.version, entry.minor_version, version, minor_version
            );
            error!("{}", reason);
            return Err(reason);
        }

        match integration.migrate_entry(self, entry).await {
            Ok(true) => {
                debug!("Migrated config entry {} for {}", entry.entry_id, entry.domain);
                Ok(())
            }
            Ok(false) => {
                let reason = format!(
                    "Migration of {} entry {} from version {}.{} failed",
                    entry.domain, entry.entry_id, entry.version, entry.minor_version
                );
                error!("{}", reason);
                Err(reason)
            }
            Err(e) => {
                error!(
                    "Error migrating entry {} for {}: {}",
                    entry.title, entry.domain, e
                );
                Err(e.to_string())
            }
        }
    }

    /// Unload an entry.
    ///
    /// Returns `Ok(true)` when the entry ends up `NotLoaded`.
    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<bool> {
        let _lock = self.setup_lock.lock().await;

        let entry = self.require(entry_id)?;
        if !entry.state.is_recoverable() {
            return Err(ConfigEntriesError::CannotUnload(entry.state));
        }

        match entry.state {
            ConfigEntryState::NotLoaded => return Ok(true),
            ConfigEntryState::Loaded => {}
            _ => {
                // Failed or pending setups have nothing to tear down
                self.transition(entry_id, ConfigEntryState::UnloadInProgress, None)?;
                self.transition(entry_id, ConfigEntryState::NotLoaded, None)?;
                return Ok(true);
            }
        }

        self.transition(entry_id, ConfigEntryState::UnloadInProgress, None)?;

        let result = match self.integration(&entry.domain) {
            Some(integration) => integration.unload_entry(self, &entry).await,
            None => Ok(true),
        };

        match result {
            Ok(true) => {
                self.transition(entry_id, ConfigEntryState::NotLoaded, None)?;
                info!("Unloaded entry: {} ({})", entry.title, entry_id);
                Ok(true)
            }
            Ok(false) => {
                let reason = "Integration reported unload failure".to_string();
                self.transition(entry_id, ConfigEntryState::FailedUnload, Some(reason))?;
                warn!("Unload failed for entry: {} ({})", entry.title, entry_id);
                Ok(false)
            }
            Err(e) => {
                let reason = e.to_string();
                self.transition(entry_id, ConfigEntryState::FailedUnload, Some(reason.clone()))?;
                Err(ConfigEntriesError::UnloadFailed(reason))
            }
        }
    }

    /// Reload an entry (unload + setup)
    pub async fn reload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        if !self.unload(entry_id).await? {
            return Err(ConfigEntriesError::UnloadFailed(entry_id.to_string()));
        }
        self.setup(entry_id).await
    }

    /// Set up every known entry, one at a time
    pub async fn setup_all(&self) -> Vec<ConfigEntriesResult<()>> {
        let mut entry_ids = self.entry_ids();
        entry_ids.sort();

        let mut results = Vec::with_capacity(entry_ids.len());
        for entry_id in entry_ids {
            results.push(self.setup(&entry_id).await);
        }
        results
    }

    /// Forward an entry's setup to entity platforms
    pub fn forward_entry_setups(&self, entry: &ConfigEntry, platforms: &[Platform]) {
        let mut loaded = self.platforms.entry(entry.entry_id.clone()).or_default();
        for platform in platforms {
            if loaded.insert(*platform) {
                debug!("Forwarded entry {} to platform {}", entry.entry_id, platform);
            }
        }
    }

    /// Unload an entry's platforms.
    ///
    /// Returns false if any of them had not been set up.
    pub fn unload_platforms(&self, entry: &ConfigEntry, platforms: &[Platform]) -> bool {
        let Some(mut loaded) = self.platforms.get_mut(&entry.entry_id) else {
            return platforms.is_empty();
        };

        let mut unload_ok = true;
        for platform in platforms {
            if !loaded.remove(platform) {
                warn!(
                    "Platform {} was not set up for entry {}",
                    platform, entry.entry_id
                );
                unload_ok = false;
            }
        }

        let now_empty = loaded.is_empty();
        drop(loaded);
        if now_empty {
            self.platforms.remove(&entry.entry_id);
        }
        unload_ok
    }

    /// Platforms an entry is currently forwarded to
    pub fn loaded_platforms(&self, entry_id: &str) -> Vec<Platform> {
        self.platforms
            .get(entry_id)
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Get all entry IDs
    pub fn entry_ids(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    /// Get count of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ConfigEntrySource;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn create_test_manager() -> (TempDir, ConfigEntries) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path()));
        (temp_dir, ConfigEntries::new(storage))
    }

    /// Integration whose hooks return canned results
    struct StubIntegration {
        version: u32,
        setup: Result<bool, IntegrationError>,
        unload: Result<bool, IntegrationError>,
        migrate: Result<bool, IntegrationError>,
        migrate_calls: AtomicUsize,
    }

    impl StubIntegration {
        fn new(version: u32) -> Self {
            Self {
                version,
                setup: Ok(true),
                unload: Ok(true),
                migrate: Ok(true),
                migrate_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Integration for StubIntegration {
        fn domain(&self) -> &str {
            "stub"
        }

        fn version(&self) -> u32 {
            self.version
        }

        async fn setup_entry(
            &self,
            entries: &ConfigEntries,
            entry: &ConfigEntry,
        ) -> Result<bool, IntegrationError> {
            entries.forward_entry_setups(entry, &[Platform::Sensor]);
            self.setup.clone()
        }

        async fn unload_entry(
            &self,
            entries: &ConfigEntries,
            entry: &ConfigEntry,
        ) -> Result<bool, IntegrationError> {
            entries.unload_platforms(entry, &[Platform::Sensor]);
            self.unload.clone()
        }

        async fn migrate_entry(
            &self,
            entries: &ConfigEntries,
            entry: &ConfigEntry,
        ) -> Result<bool, IntegrationError> {
            self.migrate_calls.fetch_add(1, Ordering::SeqCst);
            if self.migrate == Ok(true) {
                entries
                    .update(&entry.entry_id, ConfigEntryUpdate::new().version(self.version))
                    .await
                    .map_err(|e| IntegrationError::MigrationFailed(e.to_string()))?;
            }
            self.migrate.clone()
        }
    }

    #[tokio::test]
    async fn test_duplicate_unique_id_rejected() {
        let (_dir, manager) = create_test_manager();

        manager
            .add(ConfigEntry::new("stub", "One").with_unique_id("same-id"))
            .await
            .unwrap();
        let result = manager
            .add(ConfigEntry::new("stub", "Two").with_unique_id("same-id"))
            .await;

        assert!(matches!(
            result,
            Err(ConfigEntriesError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_clears_unique_id() {
        let (_dir, manager) = create_test_manager();
        let entry = manager
            .add(ConfigEntry::new("stub", "Test").with_unique_id("legacy"))
            .await
            .unwrap();

        let updated = manager
            .update(
                &entry.entry_id,
                ConfigEntryUpdate::new().unique_id(None).version(2),
            )
            .await
            .unwrap();

        assert_eq!(updated.unique_id, None);
        assert_eq!(updated.version, 2);
        assert!(manager.get_by_unique_id("stub", "legacy").is_none());
    }

    #[tokio::test]
    async fn test_setup_without_integration() {
        let (_dir, manager) = create_test_manager();
        let entry = manager.add(ConfigEntry::new("stub", "Test")).await.unwrap();

        manager.setup(&entry.entry_id).await.unwrap();
        assert!(manager.get(&entry.entry_id).unwrap().is_loaded());
    }

    #[tokio::test]
    async fn test_setup_and_unload_with_integration() {
        let (_dir, manager) = create_test_manager();
        manager.register_integration(Arc::new(StubIntegration::new(1)));
        let entry = manager.add(ConfigEntry::new("stub", "Test")).await.unwrap();

        manager.setup(&entry.entry_id).await.unwrap();
        assert!(manager.get(&entry.entry_id).unwrap().is_loaded());
        assert_eq!(manager.loaded_platforms(&entry.entry_id), vec![Platform::Sensor]);

        assert!(manager.unload(&entry.entry_id).await.unwrap());
        assert_eq!(
            manager.get(&entry.entry_id).unwrap().state,
            ConfigEntryState::NotLoaded
        );
        assert!(manager.loaded_platforms(&entry.entry_id).is_empty());
    }

    #[tokio::test]
    async fn test_setup_runs_migration_when_behind() {
        let (_dir, manager) = create_test_manager();
        let integration = Arc::new(StubIntegration::new(2));
        manager.register_integration(integration.clone());
        let entry = manager.add(ConfigEntry::new("stub", "Test")).await.unwrap();

        manager.setup(&entry.entry_id).await.unwrap();

        assert_eq!(integration.migrate_calls.load(Ordering::SeqCst), 1);
        let stored = manager.get(&entry.entry_id).unwrap();
        assert_eq!(stored.version, 2);
        assert!(stored.is_loaded());
    }

    #[tokio::test]
    async fn test_migration_failure_is_terminal() {
        let (_dir, manager) = create_test_manager();
        let mut integration = StubIntegration::new(2);
        integration.migrate = Ok(false);
        manager.register_integration(Arc::new(integration));
        let entry = manager.add(ConfigEntry::new("stub", "Test")).await.unwrap();

        let result = manager.setup(&entry.entry_id).await;
        assert!(matches!(result, Err(ConfigEntriesError::MigrationFailed(_))));
        assert_eq!(
            manager.get(&entry.entry_id).unwrap().state,
            ConfigEntryState::MigrationError
        );

        let retry = manager.setup(&entry.entry_id).await;
        assert!(matches!(retry, Err(ConfigEntriesError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_downgrade_refused_without_calling_hook() {
        let (_dir, manager) = create_test_manager();
        let integration = Arc::new(StubIntegration::new(1));
        manager.register_integration(integration.clone());
        let entry = manager
            .add(ConfigEntry::new("stub", "Test").with_version(3, 1))
            .await
            .unwrap();

        let result = manager.setup(&entry.entry_id).await;
        assert!(matches!(result, Err(ConfigEntriesError::MigrationFailed(_))));
        assert_eq!(integration.migrate_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            manager.get(&entry.entry_id).unwrap().state,
            ConfigEntryState::MigrationError
        );
    }

    #[tokio::test]
    async fn test_not_ready_moves_to_setup_retry() {
        let (_dir, manager) = create_test_manager();
        let mut integration = StubIntegration::new(1);
        integration.setup = Err(IntegrationError::NotReady("offline".to_string()));
        manager.register_integration(Arc::new(integration));
        let entry = manager.add(ConfigEntry::new("stub", "Test")).await.unwrap();

        let result = manager.setup(&entry.entry_id).await;
        match result {
            Err(ConfigEntriesError::NotReady { reason, retry_in }) => {
                assert_eq!(reason, "offline");
                assert_eq!(retry_in.as_secs(), 5);
            }
            other => panic!("expected NotReady, got {:?}", other),
        }

        let stored = manager.get(&entry.entry_id).unwrap();
        assert_eq!(stored.state, ConfigEntryState::SetupRetry);
        assert_eq!(stored.tries, 1);

        let second = manager.setup(&entry.entry_id).await;
        match second {
            Err(ConfigEntriesError::NotReady { retry_in, .. }) => {
                assert_eq!(retry_in.as_secs(), 10)
            }
            other => panic!("expected NotReady, got {:?}", other),
        }
        assert_eq!(manager.get(&entry.entry_id).unwrap().tries, 2);
    }

    #[tokio::test]
    async fn test_setup_failure() {
        let (_dir, manager) = create_test_manager();
        let mut integration = StubIntegration::new(1);
        integration.setup = Err(IntegrationError::SetupFailed("bad host".to_string()));
        manager.register_integration(Arc::new(integration));
        let entry = manager.add(ConfigEntry::new("stub", "Test")).await.unwrap();

        let result = manager.setup(&entry.entry_id).await;
        assert!(matches!(result, Err(ConfigEntriesError::SetupFailed(_))));
        assert_eq!(
            manager.get(&entry.entry_id).unwrap().state,
            ConfigEntryState::SetupError
        );

        // A failed setup unloads without calling the hook
        assert!(manager.unload(&entry.entry_id).await.unwrap());
        assert_eq!(
            manager.get(&entry.entry_id).unwrap().state,
            ConfigEntryState::NotLoaded
        );
    }

    #[tokio::test]
    async fn test_unload_reporting_false_fails_unload() {
        let (_dir, manager) = create_test_manager();
        let mut integration = StubIntegration::new(1);
        integration.unload = Ok(false);
        manager.register_integration(Arc::new(integration));
        let entry = manager.add(ConfigEntry::new("stub", "Test")).await.unwrap();
        manager.setup(&entry.entry_id).await.unwrap();

        assert!(!manager.unload(&entry.entry_id).await.unwrap());
        assert_eq!(
            manager.get(&entry.entry_id).unwrap().state,
            ConfigEntryState::FailedUnload
        );
    }

    #[tokio::test]
    async fn test_unload_platforms_reports_missing() {
        let (_dir, manager) = create_test_manager();
        let entry = ConfigEntry::new("stub", "Test");

        manager.forward_entry_setups(&entry, &[Platform::Sensor]);
        assert!(!manager.unload_platforms(&entry, &[Platform::Sensor, Platform::BinarySensor]));
        assert!(manager.loaded_platforms(&entry.entry_id).is_empty());
    }

    #[tokio::test]
    async fn test_remove_unloads_first() {
        let (_dir, manager) = create_test_manager();
        manager.register_integration(Arc::new(StubIntegration::new(1)));
        let entry = manager.add(ConfigEntry::new("stub", "Test")).await.unwrap();
        manager.setup(&entry.entry_id).await.unwrap();

        manager.remove(&entry.entry_id).await.unwrap();
        assert!(manager.is_empty());
        assert!(manager.loaded_platforms(&entry.entry_id).is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path()));

        {
            let manager = ConfigEntries::new(storage.clone());
            manager
                .add(
                    ConfigEntry::new("stub", "Test")
                        .with_unique_id("test-123")
                        .with_source(ConfigEntrySource::Import),
                )
                .await
                .unwrap();
        }

        let manager = ConfigEntries::new(storage);
        manager.load().await.unwrap();

        assert_eq!(manager.len(), 1);
        let entry = manager.get_by_unique_id("stub", "test-123").unwrap();
        assert_eq!(entry.title, "Test");
        assert_eq!(entry.source, ConfigEntrySource::Import);
        assert_eq!(entry.state, ConfigEntryState::NotLoaded);
    }
}
