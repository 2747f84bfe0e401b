//! Device Registry
//!
//! Tracks devices by their `(domain, id)` identifiers and the config
//! entries that own them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::entity_registry::DisabledBy;
use crate::storage::{Storable, Storage, StorageResult};

/// Storage key for device registry
pub const STORAGE_KEY: &str = "core.device_registry";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 12;

/// Errors raised by device registry mutations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceRegistryError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Identifier {identifier:?} is already registered to device {existing_device_id}")]
    IdentifierCollision {
        identifier: DeviceIdentifier,
        existing_device_id: String,
    },
}

/// Device entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceEntryType {
    /// Service device (virtual)
    Service,
}

/// A device identifier `(domain, id)` pair.
///
/// Serialized as a two element array. Older storage files may hold numeric
/// ids, which are read back as strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceIdentifier(pub String, pub String);

impl DeviceIdentifier {
    pub fn new(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self(domain.into(), id.into())
    }

    pub fn domain(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.1
    }
}

impl<'de> Deserialize<'de> for DeviceIdentifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        let (domain, id): (String, serde_json::Value) = Deserialize::deserialize(deserializer)?;
        let id = match id {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(D::Error::custom(format!(
                    "device identifier id must be a string or number, got {}",
                    other
                )))
            }
        };
        Ok(Self(domain, id))
    }
}

/// A registered device entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Internal UUID
    pub id: String,

    /// Identifiers by domain (e.g., [["minecraft_server", "01J..."]])
    #[serde(default)]
    pub identifiers: Vec<DeviceIdentifier>,

    /// Config entries this device belongs to
    #[serde(default)]
    pub config_entries: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// User-set name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_by_user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Software/firmware version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<DeviceEntryType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<DisabledBy>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl DeviceEntry {
    /// Create a new device entry
    pub fn new(name: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            identifiers: Vec::new(),
            config_entries: Vec::new(),
            name: name.map(str::to_string),
            name_by_user: None,
            manufacturer: None,
            model: None,
            sw_version: None,
            entry_type: None,
            disabled_by: None,
            created_at: now,
            modified_at: now,
        }
    }

    /// Get display name (user name or device name)
    pub fn display_name(&self) -> &str {
        self.name_by_user
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("")
    }

    /// Check if device is disabled
    pub fn is_disabled(&self) -> bool {
        self.disabled_by.is_some()
    }
}

/// Device registry data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceRegistryData {
    pub devices: Vec<DeviceEntry>,
}

impl Storable for DeviceRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Device Registry
///
/// Lookups by device id, by identifier, and by owning config entry.
/// The config entry index keeps registration order so that enumeration
/// is deterministic.
pub struct DeviceRegistry {
    storage: Arc<Storage>,

    /// Primary index: device_id -> DeviceEntry
    by_id: DashMap<String, Arc<DeviceEntry>>,

    /// Index: identifier -> device_id
    by_identifier: DashMap<DeviceIdentifier, String>,

    /// Index: config_entry_id -> device_ids in registration order
    by_config_entry_id: DashMap<String, IndexSet<String>>,
}

impl DeviceRegistry {
    /// Create a new device registry
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            by_id: DashMap::new(),
            by_identifier: DashMap::new(),
            by_config_entry_id: DashMap::new(),
        }
    }

    /// Load from storage
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(file) = self.storage.load::<DeviceRegistryData>().await? {
            info!(
                "Loading {} devices from storage (v{}.{})",
                file.data.devices.len(),
                file.version,
                file.minor_version
            );

            let mut devices = file.data.devices;
            devices.sort_by_key(|d| d.created_at);
            for device in devices {
                self.index_entry(Arc::new(device));
            }
        }
        Ok(())
    }

    /// Save to storage
    pub async fn save(&self) -> StorageResult<()> {
        let mut devices: Vec<DeviceEntry> =
            self.by_id.iter().map(|r| (**r.value()).clone()).collect();
        devices.sort_by_key(|d| d.created_at);

        let count = devices.len();
        self.storage.save(&DeviceRegistryData { devices }).await?;
        debug!("Saved {} devices to storage", count);
        Ok(())
    }

    fn index_entry(&self, entry: Arc<DeviceEntry>) {
        let device_id = entry.id.clone();

        for identifier in &entry.identifiers {
            self.by_identifier
                .insert(identifier.clone(), device_id.clone());
        }
        for config_entry_id in &entry.config_entries {
            self.by_config_entry_id
                .entry(config_entry_id.clone())
                .or_default()
                .insert(device_id.clone());
        }

        self.by_id.insert(device_id, entry);
    }

    fn unindex_entry(&self, entry: &DeviceEntry) {
        for identifier in &entry.identifiers {
            self.by_identifier
                .remove_if(identifier, |_, owner| owner == &entry.id);
        }
        for config_entry_id in &entry.config_entries {
            if let Some(mut ids) = self.by_config_entry_id.get_mut(config_entry_id) {
                ids.shift_remove(&entry.id);
            }
        }
        self.by_id.remove(&entry.id);
    }

    /// Get device by ID
    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        self.by_id.get(device_id).map(|r| Arc::clone(r.value()))
    }

    /// Get device by one of its identifiers
    pub fn get_by_identifier(&self, domain: &str, id: &str) -> Option<Arc<DeviceEntry>> {
        self.by_identifier
            .get(&DeviceIdentifier::new(domain, id))
            .and_then(|device_id| self.get(device_id.value()))
    }

    /// Get all devices of a config entry, in registration order
    pub fn get_by_config_entry_id(&self, config_entry_id: &str) -> Vec<Arc<DeviceEntry>> {
        self.by_config_entry_id
            .get(config_entry_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Get or create a device for a config entry.
    ///
    /// An existing device matching any identifier is returned, with the
    /// config entry and missing identifiers merged in.
    pub fn get_or_create(
        &self,
        config_entry_id: &str,
        identifiers: &[DeviceIdentifier],
        name: Option<&str>,
    ) -> Arc<DeviceEntry> {
        let existing = identifiers
            .iter()
            .find_map(|ident| self.get_by_identifier(ident.domain(), ident.id()));

        if let Some(existing) = existing {
            debug!("Found existing device by identifier: {}", existing.id);
            let needs_entry = !existing.config_entries.iter().any(|c| c == config_entry_id);
            let missing: Vec<_> = identifiers
                .iter()
                .filter(|i| !existing.identifiers.contains(i))
                .cloned()
                .collect();
            if !needs_entry && missing.is_empty() {
                return existing;
            }
            return self
                .update(&existing.id, |device| {
                    if needs_entry {
                        device.config_entries.push(config_entry_id.to_string());
                    }
                    device.identifiers.extend(missing);
                })
                .unwrap_or(existing);
        }

        let mut entry = DeviceEntry::new(name);
        entry.identifiers = identifiers.to_vec();
        entry.config_entries.push(config_entry_id.to_string());

        let entry = Arc::new(entry);
        self.index_entry(Arc::clone(&entry));
        info!("Registered new device: {:?} ({})", name, entry.id);
        entry
    }

    /// Update a device entry in place.
    ///
    /// Returns `None` if the device does not exist.
    pub fn update<F>(&self, device_id: &str, f: F) -> Option<Arc<DeviceEntry>>
    where
        F: FnOnce(&mut DeviceEntry),
    {
        let current = self.get(device_id)?;

        let mut entry = (*current).clone();
        f(&mut entry);
        entry.modified_at = Utc::now();

        // Config entries the device stays in keep their position
        for identifier in &current.identifiers {
            self.by_identifier
                .remove_if(identifier, |_, owner| owner == device_id);
        }
        for config_entry_id in &current.config_entries {
            if !entry.config_entries.contains(config_entry_id) {
                if let Some(mut ids) = self.by_config_entry_id.get_mut(config_entry_id) {
                    ids.shift_remove(device_id);
                }
            }
        }

        let entry = Arc::new(entry);
        self.index_entry(Arc::clone(&entry));
        Some(entry)
    }

    /// Replace the whole identifier set of a device.
    ///
    /// Fails if one of the new identifiers already belongs to another device.
    pub fn update_identifiers(
        &self,
        device_id: &str,
        new_identifiers: Vec<DeviceIdentifier>,
    ) -> Result<Arc<DeviceEntry>, DeviceRegistryError> {
        if self.get(device_id).is_none() {
            return Err(DeviceRegistryError::NotFound(device_id.to_string()));
        }

        for identifier in &new_identifiers {
            if let Some(owner) = self.by_identifier.get(identifier) {
                if owner.value() != device_id {
                    return Err(DeviceRegistryError::IdentifierCollision {
                        identifier: identifier.clone(),
                        existing_device_id: owner.value().clone(),
                    });
                }
            }
        }

        self.update(device_id, |device| device.identifiers = new_identifiers)
            .ok_or_else(|| DeviceRegistryError::NotFound(device_id.to_string()))
    }

    /// Remove a device
    pub fn remove(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        let entry = self.get(device_id)?;
        self.unindex_entry(&entry);
        info!("Removed device: {}", device_id);
        Some(entry)
    }

    /// Get count of registered devices
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_registry() -> (TempDir, DeviceRegistry) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path()));
        (temp_dir, DeviceRegistry::new(storage))
    }

    #[test]
    fn test_get_or_create_reuses_device() {
        let (_dir, registry) = create_test_registry();
        let ident = DeviceIdentifier::new("minecraft_server", "abc123");

        let first = registry.get_or_create("E1", &[ident.clone()], Some("Server"));
        let second = registry.get_or_create("E1", &[ident], Some("Other name"));

        assert_eq!(first.id, second.id);
        assert_eq!(registry.len(), 1);
        assert_eq!(second.name.as_deref(), Some("Server"));
    }

    #[test]
    fn test_get_or_create_merges_config_entry() {
        let (_dir, registry) = create_test_registry();
        let ident = DeviceIdentifier::new("minecraft_server", "abc123");

        registry.get_or_create("E1", &[ident.clone()], None);
        let device = registry.get_or_create("E2", &[ident], None);

        assert_eq!(device.config_entries, vec!["E1", "E2"]);
        assert_eq!(registry.get_by_config_entry_id("E2").len(), 1);
    }

    #[test]
    fn test_devices_for_config_entry_keep_order() {
        let (_dir, registry) = create_test_registry();
        let a = registry.get_or_create("E1", &[DeviceIdentifier::new("d", "a")], None);
        let b = registry.get_or_create("E1", &[DeviceIdentifier::new("d", "b")], None);
        registry.get_or_create("E2", &[DeviceIdentifier::new("d", "c")], None);

        let ids: Vec<_> = registry
            .get_by_config_entry_id("E1")
            .iter()
            .map(|d| d.id.clone())
            .collect();
        assert_eq!(ids, vec![a.id.clone(), b.id.clone()]);

        registry
            .update_identifiers(&a.id, vec![DeviceIdentifier::new("d", "a2")])
            .unwrap();
        let ids: Vec<_> = registry
            .get_by_config_entry_id("E1")
            .iter()
            .map(|d| d.id.clone())
            .collect();
        assert_eq!(ids, vec![a.id.clone(), b.id.clone()]);
    }

    #[test]
    fn test_update_identifiers_reindexes() {
        let (_dir, registry) = create_test_registry();
        let device = registry.get_or_create(
            "E1",
            &[DeviceIdentifier::new("minecraft_server", "abc123")],
            None,
        );

        registry
            .update_identifiers(
                &device.id,
                vec![DeviceIdentifier::new("minecraft_server", "E1")],
            )
            .unwrap();

        assert!(registry
            .get_by_identifier("minecraft_server", "abc123")
            .is_none());
        assert_eq!(
            registry
                .get_by_identifier("minecraft_server", "E1")
                .unwrap()
                .id,
            device.id
        );
    }

    #[test]
    fn test_update_identifiers_collision() {
        let (_dir, registry) = create_test_registry();
        let first = registry.get_or_create("E1", &[DeviceIdentifier::new("d", "one")], None);
        registry.get_or_create("E1", &[DeviceIdentifier::new("d", "two")], None);

        let result = registry.update_identifiers(&first.id, vec![DeviceIdentifier::new("d", "two")]);
        assert!(matches!(
            result,
            Err(DeviceRegistryError::IdentifierCollision { .. })
        ));
        assert_eq!(
            registry.get(&first.id).unwrap().identifiers,
            vec![DeviceIdentifier::new("d", "one")]
        );
    }

    #[test]
    fn test_update_identifiers_unknown_device() {
        let (_dir, registry) = create_test_registry();
        let result = registry.update_identifiers("missing", vec![]);
        assert_eq!(
            result.unwrap_err(),
            DeviceRegistryError::NotFound("missing".to_string())
        );
    }

    #[test]
    fn test_numeric_identifier_deserializes() {
        let ident: DeviceIdentifier = serde_json::from_str(r#"["zwave", 42]"#).unwrap();
        assert_eq!(ident, DeviceIdentifier::new("zwave", "42"));

        let json = serde_json::to_string(&ident).unwrap();
        assert_eq!(json, r#"["zwave","42"]"#);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path()));

        {
            let registry = DeviceRegistry::new(storage.clone());
            registry.get_or_create(
                "E1",
                &[DeviceIdentifier::new("minecraft_server", "E1")],
                Some("Server"),
            );
            registry.save().await.unwrap();
        }

        let registry = DeviceRegistry::new(storage);
        registry.load().await.unwrap();
        let device = registry.get_by_identifier("minecraft_server", "E1").unwrap();
        assert_eq!(device.display_name(), "Server");
        assert_eq!(registry.get_by_config_entry_id("E1").len(), 1);
    }
}
