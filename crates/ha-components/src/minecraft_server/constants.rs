//! Minecraft Server constants

use std::time::Duration;

use ha_core::Platform;

pub const DOMAIN: &str = "minecraft_server";

/// Config entry version; 1 keyed identifiers on the legacy unique id
pub const VERSION: u32 = 2;

pub const DEFAULT_NAME: &str = "Minecraft Server";
pub const DEFAULT_PORT: u16 = 25565;

pub const SCAN_INTERVAL: Duration = Duration::from_secs(60);

pub const PLATFORMS: [Platform; 2] = [Platform::BinarySensor, Platform::Sensor];

// Sensor keys
pub const KEY_LATENCY: &str = "latency";
pub const KEY_MOTD: &str = "motd";
pub const KEY_PLAYERS_MAX: &str = "players_max";
pub const KEY_PLAYERS_ONLINE: &str = "players_online";
pub const KEY_PROTOCOL_VERSION: &str = "protocol_version";
pub const KEY_VERSION: &str = "version";

// Binary sensor keys
pub const KEY_STATUS: &str = "status";
