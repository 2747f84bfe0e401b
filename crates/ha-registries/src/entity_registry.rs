//! Entity Registry
//!
//! Tracks registered entities keyed by entity_id, with a
//! `(domain, platform, unique_id)` index and a per config entry index.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::storage::{Storable, Storage, StorageError, StorageResult};

/// Errors that can occur in the entity registry
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EntityRegistryError {
    /// Entity was not found
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Another entity of the same domain and platform owns the unique_id
    #[error("Unique id '{unique_id}' is already in use by {existing_entity_id}")]
    UniqueIdCollision {
        unique_id: String,
        existing_entity_id: String,
    },

    /// The requested entity_id is already registered
    #[error("Entity id '{0}' is already registered")]
    EntityIdCollision(String),
}

/// Storage key for entity registry
pub const STORAGE_KEY: &str = "core.entity_registry";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 19;

/// Reason an entity or device was disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisabledBy {
    ConfigEntry,
    Device,
    Hass,
    Integration,
    User,
}

/// A registered entity entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEntry {
    /// Internal id
    pub id: String,
    /// Full entity ID (domain.object_id)
    pub entity_id: String,
    /// Platform-specific unique identifier
    pub unique_id: String,
    /// Unique id before the last change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_unique_id: Option<String>,
    /// Integration that provides this entity
    pub platform: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_entry_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// User-set name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Platform default name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<DisabledBy>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl EntityEntry {
    /// Create a new entity entry with minimal required fields
    pub fn new(
        entity_id: impl Into<String>,
        platform: impl Into<String>,
        unique_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            entity_id: entity_id.into(),
            unique_id: unique_id.into(),
            previous_unique_id: None,
            platform: platform.into(),
            config_entry_id: None,
            device_id: None,
            name: None,
            original_name: None,
            disabled_by: None,
            created_at: now,
            modified_at: now,
        }
    }

    /// Get the domain from entity_id
    pub fn domain(&self) -> &str {
        self.entity_id.split('.').next().unwrap_or(&self.entity_id)
    }

    /// Check if entity is disabled
    pub fn is_disabled(&self) -> bool {
        self.disabled_by.is_some()
    }

    fn unique_key(&self) -> UniqueKey {
        (
            self.domain().to_string(),
            self.platform.clone(),
            self.unique_id.clone(),
        )
    }
}

/// Fields a migration may change on an entity.
///
/// `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityUpdate {
    pub new_unique_id: Option<String>,
    pub new_entity_id: Option<String>,
}

impl EntityUpdate {
    /// Update that only changes the unique id
    pub fn unique_id(new_unique_id: impl Into<String>) -> Self {
        Self {
            new_unique_id: Some(new_unique_id.into()),
            new_entity_id: None,
        }
    }
}

/// Entity registry data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityRegistryData {
    pub entities: Vec<EntityEntry>,
}

impl Storable for EntityRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// (domain, platform, unique_id)
type UniqueKey = (String, String, String);

/// Entity Registry
///
/// Entries are stored as `Arc<EntityEntry>`; updates swap in a new `Arc`.
/// The primary index keeps insertion order so saves are stable.
pub struct EntityRegistry {
    storage: Arc<Storage>,

    /// Primary index: entity_id -> EntityEntry
    by_entity_id: RwLock<IndexMap<String, Arc<EntityEntry>>>,

    /// Index: (domain, platform, unique_id) -> entity_id
    by_unique_id: DashMap<UniqueKey, String>,

    /// Index: config_entry_id -> entity_ids in registration order
    by_config_entry_id: DashMap<String, IndexSet<String>>,
}

impl EntityRegistry {
    /// Create a new entity registry
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            by_entity_id: RwLock::new(IndexMap::new()),
            by_unique_id: DashMap::new(),
            by_config_entry_id: DashMap::new(),
        }
    }

    /// Load from storage
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(file) = self.storage.load::<EntityRegistryData>().await? {
            info!(
                "Loading {} entities from storage (v{}.{})",
                file.data.entities.len(),
                file.version,
                file.minor_version
            );
            for entry in file.data.entities {
                self.index_entry(Arc::new(entry));
            }
        }
        Ok(())
    }

    /// Save to storage
    pub async fn save(&self) -> StorageResult<()> {
        let entities: Vec<EntityEntry> = self
            .by_entity_id
            .read()
            .map(|idx| idx.values().map(|e| (**e).clone()).collect())
            .unwrap_or_default();

        let count = entities.len();
        self.storage.save(&EntityRegistryData { entities }).await?;
        debug!("Saved {} entities to storage", count);
        Ok(())
    }

    fn index_entry(&self, entry: Arc<EntityEntry>) {
        let entity_id = entry.entity_id.clone();

        self.by_unique_id
            .insert(entry.unique_key(), entity_id.clone());

        if let Some(ref config_entry_id) = entry.config_entry_id {
            self.by_config_entry_id
                .entry(config_entry_id.clone())
                .or_default()
                .insert(entity_id.clone());
        }

        if let Ok(mut idx) = self.by_entity_id.write() {
            idx.insert(entity_id, entry);
        }
    }

    /// Remove an entry from the secondary indexes
    fn unindex_secondary(&self, entry: &EntityEntry) {
        self.by_unique_id.remove(&entry.unique_key());

        if let Some(ref config_entry_id) = entry.config_entry_id {
            if let Some(mut ids) = self.by_config_entry_id.get_mut(config_entry_id) {
                ids.shift_remove(&entry.entity_id);
            }
        }
    }

    /// Get entity by entity_id
    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .ok()
            .and_then(|idx| idx.get(entity_id).cloned())
    }

    /// Look up the entity_id registered for a unique id
    pub fn get_entity_id(&self, domain: &str, platform: &str, unique_id: &str) -> Option<String> {
        let key = (
            domain.to_string(),
            platform.to_string(),
            unique_id.to_string(),
        );
        self.by_unique_id.get(&key).map(|r| r.value().clone())
    }

    /// Get all entities of a config entry, in registration order
    pub fn get_by_config_entry_id(&self, config_entry_id: &str) -> Vec<Arc<EntityEntry>> {
        self.by_config_entry_id
            .get(config_entry_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Check if an entity_id is registered
    pub fn is_registered(&self, entity_id: &str) -> bool {
        self.by_entity_id
            .read()
            .map(|idx| idx.contains_key(entity_id))
            .unwrap_or(false)
    }

    /// Get or create an entity entry.
    ///
    /// An entity already registered under the same
    /// `(domain, platform, unique_id)` is returned unchanged. New entities
    /// get `<domain>.<suggested_object_id>`, suffixed `_2`, `_3`, ... when
    /// taken.
    pub fn get_or_create(
        &self,
        domain: &str,
        platform: &str,
        unique_id: &str,
        suggested_object_id: &str,
        config_entry_id: Option<&str>,
    ) -> Arc<EntityEntry> {
        if let Some(existing) = self
            .get_entity_id(domain, platform, unique_id)
            .and_then(|entity_id| self.get(&entity_id))
        {
            debug!("Found existing entity by unique_id: {}", existing.entity_id);
            return existing;
        }

        let entity_id = self.generate_entity_id(domain, suggested_object_id);
        let mut entry = EntityEntry::new(entity_id.clone(), platform, unique_id);
        entry.config_entry_id = config_entry_id.map(String::from);

        let entry = Arc::new(entry);
        self.index_entry(Arc::clone(&entry));
        info!("Registered new entity: {}", entity_id);
        entry
    }

    /// Pick a free `<domain>.<object_id>`, appending `_2`, `_3`, ... if needed
    pub fn generate_entity_id(&self, domain: &str, suggested_object_id: &str) -> String {
        let preferred = format!("{}.{}", domain, suggested_object_id);
        if !self.is_registered(&preferred) {
            return preferred;
        }
        let mut tries = 1;
        loop {
            tries += 1;
            let candidate = format!("{}_{}", preferred, tries);
            if !self.is_registered(&candidate) {
                return candidate;
            }
        }
    }

    /// Update an entity entry with a closure.
    ///
    /// The closure must not change `entity_id`; use [`Self::apply_update`]
    /// for renames.
    pub fn update<F>(&self, entity_id: &str, f: F) -> Result<Arc<EntityEntry>, EntityRegistryError>
    where
        F: FnOnce(&mut EntityEntry),
    {
        let current = self
            .get(entity_id)
            .ok_or_else(|| EntityRegistryError::NotFound(entity_id.to_string()))?;
        let mut entry = (*current).clone();
        f(&mut entry);
        entry.entity_id = current.entity_id.clone();
        entry.modified_at = Utc::now();

        Ok(self.reindex(&current, entry))
    }

    /// Apply an [`EntityUpdate`], checking unique_id and entity_id conflicts.
    pub fn apply_update(
        &self,
        entity_id: &str,
        update: EntityUpdate,
    ) -> Result<Arc<EntityEntry>, EntityRegistryError> {
        let current = self
            .get(entity_id)
            .ok_or_else(|| EntityRegistryError::NotFound(entity_id.to_string()))?;

        if let Some(ref new_unique_id) = update.new_unique_id {
            if let Some(owner) =
                self.get_entity_id(current.domain(), &current.platform, new_unique_id)
            {
                if owner != current.entity_id {
                    return Err(EntityRegistryError::UniqueIdCollision {
                        unique_id: new_unique_id.clone(),
                        existing_entity_id: owner,
                    });
                }
            }
        }
        if let Some(ref new_entity_id) = update.new_entity_id {
            if new_entity_id != entity_id && self.is_registered(new_entity_id) {
                return Err(EntityRegistryError::EntityIdCollision(new_entity_id.clone()));
            }
        }

        let mut entry = (*current).clone();
        if let Some(new_unique_id) = update.new_unique_id {
            if new_unique_id != entry.unique_id {
                entry.previous_unique_id = Some(std::mem::replace(&mut entry.unique_id, new_unique_id));
            }
        }
        if let Some(new_entity_id) = update.new_entity_id {
            entry.entity_id = new_entity_id;
        }
        entry.modified_at = Utc::now();

        Ok(self.reindex(&current, entry))
    }

    /// Swap `current` for its updated version.
    ///
    /// An entity that keeps its entity_id and config entry keeps its
    /// position in both ordered indexes.
    fn reindex(&self, current: &EntityEntry, entry: EntityEntry) -> Arc<EntityEntry> {
        self.by_unique_id.remove(&current.unique_key());

        let renamed = entry.entity_id != current.entity_id;
        if renamed || entry.config_entry_id != current.config_entry_id {
            if let Some(ref config_entry_id) = current.config_entry_id {
                if let Some(mut ids) = self.by_config_entry_id.get_mut(config_entry_id) {
                    ids.shift_remove(&current.entity_id);
                }
            }
        }
        if renamed {
            if let Ok(mut idx) = self.by_entity_id.write() {
                idx.shift_remove(&current.entity_id);
            }
        }

        let entry = Arc::new(entry);
        self.index_entry(Arc::clone(&entry));
        entry
    }

    /// Run a migration over every entity of a config entry, then persist.
    ///
    /// `f` is called once per entity in registration order; returned updates
    /// are applied immediately. The first error stops the run. Updates that
    /// were already applied are saved either way.
    pub async fn migrate_entries<F, E>(&self, config_entry_id: &str, f: F) -> Result<usize, E>
    where
        F: FnMut(&EntityEntry) -> Result<Option<EntityUpdate>, E>,
        E: From<EntityRegistryError> + From<StorageError>,
    {
        let outcome = self.apply_migration(config_entry_id, f);
        self.save().await?;
        outcome
    }

    fn apply_migration<F, E>(&self, config_entry_id: &str, mut f: F) -> Result<usize, E>
    where
        F: FnMut(&EntityEntry) -> Result<Option<EntityUpdate>, E>,
        E: From<EntityRegistryError>,
    {
        let mut migrated = 0;
        for entry in self.get_by_config_entry_id(config_entry_id) {
            if let Some(update) = f(&entry)? {
                self.apply_update(&entry.entity_id, update)?;
                migrated += 1;
            }
        }
        Ok(migrated)
    }

    /// Remove an entity
    pub fn remove(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        let entry = self
            .by_entity_id
            .write()
            .ok()
            .and_then(|mut idx| idx.shift_remove(entity_id))?;
        self.unindex_secondary(&entry);
        info!("Removed entity: {}", entity_id);
        Some(entry)
    }

    /// Get count of registered entities
    pub fn len(&self) -> usize {
        self.by_entity_id.read().map(|idx| idx.len()).unwrap_or(0)
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
