//! Minecraft Server data coordinator
//!
//! Holds the latest status of one server. Fetching the status is delegated
//! to a [`StatusSource`], which owns the network protocol.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ha_core::conf::{CONF_HOST, CONF_NAME};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::constants::{
    KEY_LATENCY, KEY_MOTD, KEY_PLAYERS_MAX, KEY_PLAYERS_ONLINE, KEY_PROTOCOL_VERSION, KEY_VERSION,
    SCAN_INTERVAL,
};
use super::error::{MinecraftServerError, MinecraftServerResult};

/// Config entry data of a Minecraft server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinecraftServerConfig {
    pub name: String,
    /// Host name or address, optionally with `:port`
    pub host: String,
}

impl MinecraftServerConfig {
    /// Decode from config entry data
    pub fn from_entry_data(
        data: &std::collections::HashMap<String, Value>,
    ) -> MinecraftServerResult<Self> {
        let object: serde_json::Map<String, Value> =
            data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        Ok(serde_json::from_value(Value::Object(object))?)
    }

    /// Encode as config entry data
    pub fn to_entry_data(&self) -> std::collections::HashMap<String, Value> {
        [
            (CONF_NAME.to_string(), json!(self.name)),
            (CONF_HOST.to_string(), json!(self.host)),
        ]
        .into_iter()
        .collect()
    }
}

/// Failure to query a server
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StatusError {
    #[error("Connection to {host} failed: {reason}")]
    Unreachable { host: String, reason: String },

    #[error("Invalid status response from {host}: {reason}")]
    InvalidResponse { host: String, reason: String },
}

/// Status snapshot of a server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Round trip time in milliseconds
    pub latency: f64,
    pub motd: String,
    pub players_online: u32,
    pub players_max: u32,
    #[serde(default)]
    pub players_list: Vec<String>,
    pub protocol_version: i32,
    pub version: String,
}

impl ServerStatus {
    /// Value of a sensor key, `None` for unknown keys
    pub fn value(&self, key: &str) -> Option<Value> {
        let value = match key {
            KEY_LATENCY => json!(self.latency),
            KEY_MOTD => json!(self.motd),
            KEY_PLAYERS_MAX => json!(self.players_max),
            KEY_PLAYERS_ONLINE => json!(self.players_online),
            KEY_PROTOCOL_VERSION => json!(self.protocol_version),
            KEY_VERSION => json!(self.version),
            _ => return None,
        };
        Some(value)
    }
}

/// Source of server status
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, host: &str) -> Result<ServerStatus, StatusError>;
}

/// Polls one Minecraft server and keeps its latest status
pub struct MinecraftServerCoordinator {
    config_entry_id: String,
    config: MinecraftServerConfig,
    source: Arc<dyn StatusSource>,
    data: RwLock<Option<ServerStatus>>,
    last_update_success: AtomicBool,
    last_updated: RwLock<Option<DateTime<Utc>>>,
}

impl MinecraftServerCoordinator {
    pub fn new(
        config_entry_id: impl Into<String>,
        config: MinecraftServerConfig,
        source: Arc<dyn StatusSource>,
    ) -> Self {
        Self {
            config_entry_id: config_entry_id.into(),
            config,
            source,
            data: RwLock::new(None),
            last_update_success: AtomicBool::new(false),
            last_updated: RwLock::new(None),
        }
    }

    pub fn config_entry_id(&self) -> &str {
        &self.config_entry_id
    }

    pub fn config(&self) -> &MinecraftServerConfig {
        &self.config
    }

    pub fn update_interval(&self) -> Duration {
        SCAN_INTERVAL
    }

    /// First refresh during setup; a failure means the entry is not ready
    pub async fn first_refresh(&self) -> MinecraftServerResult<()> {
        self.refresh().await.map_err(MinecraftServerError::NotReady)
    }

    /// Fetch a fresh status. The previous data is kept on failure.
    pub async fn refresh(&self) -> Result<(), StatusError> {
        match self.source.fetch_status(&self.config.host).await {
            Ok(status) => {
                debug!(
                    "Fetched status of '{}' ({}): {}/{} players online",
                    self.config.name, self.config.host, status.players_online, status.players_max
                );
                if let Ok(mut data) = self.data.write() {
                    *data = Some(status);
                }
                if let Ok(mut last_updated) = self.last_updated.write() {
                    *last_updated = Some(Utc::now());
                }
                self.last_update_success.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                if self.last_update_success.swap(false, Ordering::SeqCst) {
                    warn!("Error fetching '{}' data: {}", self.config.name, e);
                }
                Err(e)
            }
        }
    }

    /// Latest status, if any refresh succeeded
    pub fn data(&self) -> Option<ServerStatus> {
        self.data.read().ok().and_then(|d| d.clone())
    }

    pub fn last_update_success(&self) -> bool {
        self.last_update_success.load(Ordering::SeqCst)
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated.read().ok().and_then(|t| *t)
    }
}

/// Coordinators of loaded config entries, keyed by entry id
#[derive(Default)]
pub struct CoordinatorTable {
    coordinators: DashMap<String, Arc<MinecraftServerCoordinator>>,
}

impl CoordinatorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a coordinator, replacing any previous one for the entry
    pub fn insert(&self, coordinator: Arc<MinecraftServerCoordinator>) {
        self.coordinators
            .insert(coordinator.config_entry_id().to_string(), coordinator);
    }

    pub fn get(&self, config_entry_id: &str) -> Option<Arc<MinecraftServerCoordinator>> {
        self.coordinators
            .get(config_entry_id)
            .map(|r| Arc::clone(r.value()))
    }

    pub fn remove(&self, config_entry_id: &str) -> Option<Arc<MinecraftServerCoordinator>> {
        self.coordinators.remove(config_entry_id).map(|(_, c)| c)
    }

    pub fn len(&self) -> usize {
        self.coordinators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinators.is_empty()
    }
}
