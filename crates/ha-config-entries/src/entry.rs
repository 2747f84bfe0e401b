//! Config Entry types
//!
//! A ConfigEntry represents a single instance of an integration's configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::state_machine::InvalidTransition;

/// Config entry lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryState {
    /// Initial state, not yet set up
    #[default]
    NotLoaded,
    /// Currently being configured (non-recoverable)
    SetupInProgress,
    /// Successfully set up (recoverable)
    Loaded,
    /// Setup failed (recoverable)
    SetupError,
    /// Waiting to retry setup (recoverable)
    SetupRetry,
    /// Version migration failed (not recoverable)
    MigrationError,
    /// Currently unloading (non-recoverable)
    UnloadInProgress,
    /// Unload failed (not recoverable)
    FailedUnload,
}

impl ConfigEntryState {
    /// Check if the entry can be unloaded/reloaded from this state
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConfigEntryState::Loaded
                | ConfigEntryState::SetupError
                | ConfigEntryState::SetupRetry
                | ConfigEntryState::NotLoaded
        )
    }
}

/// Source of the config entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntrySource {
    /// Configured via UI/API
    #[default]
    User,
    /// Imported from YAML config
    Import,
    /// Generic discovery
    Discovery,
    /// DHCP discovery
    Dhcp,
    /// mDNS/Bonjour discovery
    Zeroconf,
    /// User hiding a discovery
    Ignore,
    /// Re-authentication flow
    Reauth,
    /// User reconfiguring existing entry
    Reconfigure,
    /// System-created entry
    System,
}

/// Reason an entry was disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryDisabledBy {
    User,
}

/// A configuration entry for an integration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Unique identifier (ULID), assigned once
    pub entry_id: String,

    /// Integration domain (e.g., "minecraft_server")
    pub domain: String,

    /// Human-readable display name
    pub title: String,

    /// Configuration data written by the config flow
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,

    /// User-configurable options
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,

    /// Major schema version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Minor schema version
    #[serde(default = "default_version")]
    pub minor_version: u32,

    /// Optional unique identifier for duplicate prevention
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    #[serde(default)]
    pub source: ConfigEntrySource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<ConfigEntryDisabledBy>,

    /// Current lifecycle state (not persisted)
    #[serde(skip, default)]
    pub state: ConfigEntryState,

    /// Human-readable explanation for failed states (not persisted)
    #[serde(skip, default)]
    pub reason: Option<String>,

    /// Number of setup retry attempts (not persisted)
    #[serde(skip, default)]
    pub tries: u32,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl ConfigEntry {
    /// Create a new config entry
    pub fn new(domain: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            domain: domain.into(),
            title: title.into(),
            data: HashMap::new(),
            options: HashMap::new(),
            version: 1,
            minor_version: 1,
            unique_id: None,
            source: ConfigEntrySource::User,
            disabled_by: None,
            state: ConfigEntryState::NotLoaded,
            reason: None,
            tries: 0,
            created_at: now,
            modified_at: now,
        }
    }

    /// Set entry id (entries restored from storage or tests)
    pub fn with_entry_id(mut self, entry_id: impl Into<String>) -> Self {
        self.entry_id = entry_id.into();
        self
    }

    /// Set entry data
    pub fn with_data(mut self, data: HashMap<String, serde_json::Value>) -> Self {
        self.data = data;
        self
    }

    /// Set unique_id
    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    /// Set source
    pub fn with_source(mut self, source: ConfigEntrySource) -> Self {
        self.source = source;
        self
    }

    /// Set version
    pub fn with_version(mut self, version: u32, minor_version: u32) -> Self {
        self.version = version;
        self.minor_version = minor_version;
        self
    }

    /// Check if entry is disabled
    pub fn is_disabled(&self) -> bool {
        self.disabled_by.is_some()
    }

    /// Check if entry is loaded
    pub fn is_loaded(&self) -> bool {
        self.state == ConfigEntryState::Loaded
    }

    /// Attempt to transition to a new state with validation.
    ///
    /// On success, updates the state and reason fields. The retry counter is
    /// reset on every state outside the setup/retry loop.
    pub fn try_set_state(
        &mut self,
        new_state: ConfigEntryState,
        reason: Option<String>,
    ) -> Result<(), InvalidTransition> {
        self.state.try_transition(new_state)?;

        self.state = new_state;
        self.reason = reason;

        if !matches!(
            new_state,
            ConfigEntryState::SetupRetry | ConfigEntryState::SetupInProgress
        ) {
            self.tries = 0;
        }

        Ok(())
    }

    /// Increment the retry counter and return the new count
    pub fn increment_tries(&mut self) -> u32 {
        self.tries += 1;
        self.tries
    }
}

/// Update data for a config entry
///
/// `unique_id` is doubly optional: `Some(None)` clears it.
#[derive(Debug, Default)]
pub struct ConfigEntryUpdate {
    pub title: Option<String>,
    pub data: Option<HashMap<String, serde_json::Value>>,
    pub options: Option<HashMap<String, serde_json::Value>>,
    pub unique_id: Option<Option<String>>,
    pub version: Option<u32>,
    pub minor_version: Option<u32>,
}

impl ConfigEntryUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn data(mut self, data: HashMap<String, serde_json::Value>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn unique_id(mut self, unique_id: Option<String>) -> Self {
        self.unique_id = Some(unique_id);
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_entry_new() {
        let entry = ConfigEntry::new("minecraft_server", "mc.example.com");
        assert_eq!(entry.domain, "minecraft_server");
        assert_eq!(entry.state, ConfigEntryState::NotLoaded);
        assert_eq!(entry.version, 1);
        assert!(!entry.entry_id.is_empty());
    }

    #[test]
    fn test_state_recoverable() {
        assert!(ConfigEntryState::NotLoaded.is_recoverable());
        assert!(ConfigEntryState::Loaded.is_recoverable());
        assert!(ConfigEntryState::SetupError.is_recoverable());
        assert!(ConfigEntryState::SetupRetry.is_recoverable());

        assert!(!ConfigEntryState::SetupInProgress.is_recoverable());
        assert!(!ConfigEntryState::MigrationError.is_recoverable());
        assert!(!ConfigEntryState::UnloadInProgress.is_recoverable());
        assert!(!ConfigEntryState::FailedUnload.is_recoverable());
    }

    #[test]
    fn test_try_set_state_resets_tries() {
        let mut entry = ConfigEntry::new("minecraft_server", "Test");
        entry.try_set_state(ConfigEntryState::SetupInProgress, None).unwrap();
        entry.increment_tries();
        entry
            .try_set_state(ConfigEntryState::SetupRetry, Some("offline".into()))
            .unwrap();
        assert_eq!(entry.tries, 1);

        entry.try_set_state(ConfigEntryState::SetupInProgress, None).unwrap();
        entry.try_set_state(ConfigEntryState::Loaded, None).unwrap();
        assert_eq!(entry.tries, 0);
        assert_eq!(entry.reason, None);
    }

    #[test]
    fn test_version_defaults_when_missing() {
        let json = r#"{"entry_id": "E1", "domain": "minecraft_server", "title": "mc", "unique_id": "abc123"}"#;
        let entry: ConfigEntry = serde_json::from_str(json).unwrap();

        assert_eq!(entry.version, 1);
        assert_eq!(entry.minor_version, 1);
        assert_eq!(entry.unique_id.as_deref(), Some("abc123"));
        assert_eq!(entry.state, ConfigEntryState::NotLoaded);
    }

    #[test]
    fn test_cleared_unique_id_not_serialized() {
        let entry = ConfigEntry::new("minecraft_server", "mc");
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("unique_id").is_none());
        assert!(json.get("state").is_none());
    }
}
