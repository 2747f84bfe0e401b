//! Config entry migration
//!
//! Version 1 built entity and device identifiers from the entry's unique id,
//! which was derived from the server address. Version 2 builds them from the
//! config entry id.

use ha_config_entries::{ConfigEntries, ConfigEntry, ConfigEntryUpdate};
use ha_registries::{DeviceIdentifier, DeviceRegistry, EntityEntry, EntityRegistry, EntityUpdate};
use tracing::debug;

use super::constants::{DOMAIN, KEY_LATENCY, KEY_MOTD, VERSION};
use super::error::{MinecraftServerError, MinecraftServerResult};

/// Migrate a config entry and the registry records built from it.
///
/// Entries already past version 1 are left untouched.
pub async fn migrate_entry(
    entries: &ConfigEntries,
    devices: &DeviceRegistry,
    entities: &EntityRegistry,
    entry: &ConfigEntry,
) -> MinecraftServerResult<bool> {
    debug!("Migrating from version {}", entry.version);
    let mut version = entry.version;

    if entry.version == 1 {
        let old_unique_id = entry
            .unique_id
            .clone()
            .ok_or_else(|| MinecraftServerError::MissingLegacyUniqueId(entry.entry_id.clone()))?;
        let config_entry_id = entry.entry_id.as_str();

        debug!("Migrating config entry. Resetting unique ID: {}", old_unique_id);
        let updated = entries
            .update(
                config_entry_id,
                ConfigEntryUpdate::new().unique_id(None).version(VERSION),
            )
            .await?;
        version = updated.version;

        migrate_device_identifiers(devices, config_entry_id, &old_unique_id).await?;

        entities
            .migrate_entries(config_entry_id, |entity| {
                migrate_entity_unique_id(config_entry_id, entity).map(Some)
            })
            .await?;
    }

    debug!("Migration to version {} successful", version);
    Ok(true)
}

/// Re-key the entry's device on the config entry id.
///
/// Only the first device carrying the legacy unique id is migrated. Returns
/// whether one was found.
pub async fn migrate_device_identifiers(
    devices: &DeviceRegistry,
    config_entry_id: &str,
    old_unique_id: &str,
) -> MinecraftServerResult<bool> {
    let Some(device) = devices
        .get_by_config_entry_id(config_entry_id)
        .into_iter()
        .find(|device| device.identifiers.iter().any(|i| i.id() == old_unique_id))
    else {
        return Ok(false);
    };

    let new_identifiers = vec![DeviceIdentifier::new(DOMAIN, config_entry_id)];
    debug!(
        "Migrating device identifiers from {:?} to {:?}",
        device.identifiers, new_identifiers
    );
    devices.update_identifiers(&device.id, new_identifiers)?;
    devices.save().await?;
    Ok(true)
}

/// New entity update for a version 1 entity.
pub fn migrate_entity_unique_id(
    config_entry_id: &str,
    entity: &EntityEntry,
) -> MinecraftServerResult<EntityUpdate> {
    let new_unique_id = convert_unique_id(config_entry_id, &entity.unique_id)?;
    debug!(
        "Migrating entity unique ID from {} to {}",
        entity.unique_id, new_unique_id
    );
    Ok(EntityUpdate::unique_id(new_unique_id))
}

/// Convert a version 1 unique id to `<config_entry_id>-<key>`.
///
/// Version 1 ids come in three shapes, all with the entity type third:
/// `<host>-srv-<type>`, `<host>-<port>-<type>` and `<mac>-<port>-<type>`.
/// Version 1 also stored entity names ("Protocol Version") instead of keys.
pub fn convert_unique_id(
    config_entry_id: &str,
    legacy_unique_id: &str,
) -> MinecraftServerResult<String> {
    let entity_type = legacy_unique_id
        .split('-')
        .nth(2)
        .ok_or_else(|| MinecraftServerError::MalformedUniqueId(legacy_unique_id.to_string()))?;

    let normalized = entity_type.to_lowercase().replace(' ', "_");
    let key = match normalized.as_str() {
        "world_message" => KEY_MOTD,
        "latency_time" => KEY_LATENCY,
        other => other,
    };

    Ok(format!("{config_entry_id}-{key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_entity_names_to_keys() {
        let cases = [
            ("abc123-25565-Protocol Version", "E1-protocol_version"),
            ("mc.example.com-srv-Players Online", "E1-players_online"),
            ("mc.example.com-25565-Version", "E1-version"),
            ("00:11:22:33:44:55-25565-Players Max", "E1-players_max"),
            ("mc.example.com-srv-Status", "E1-status"),
        ];
        for (legacy, expected) in cases {
            assert_eq!(convert_unique_id("E1", legacy).unwrap(), expected);
        }
    }

    #[test]
    fn test_convert_renamed_keys() {
        assert_eq!(
            convert_unique_id("E1", "host-srv-World Message").unwrap(),
            "E1-motd"
        );
        assert_eq!(
            convert_unique_id("E1", "host-srv-Latency Time").unwrap(),
            "E1-latency"
        );
    }

    #[test]
    fn test_convert_too_few_segments() {
        for legacy in ["host-Status", "Status", ""] {
            let result = convert_unique_id("E1", legacy);
            assert!(
                matches!(result, Err(MinecraftServerError::MalformedUniqueId(ref id)) if id == legacy),
                "{legacy}"
            );
        }
    }

    #[test]
    fn test_convert_extra_segments_reads_third() {
        // Hosts containing '-' shift the type token; the third segment is used anyway
        assert_eq!(
            convert_unique_id("E1", "my-host-srv-World Message").unwrap(),
            "E1-srv"
        );
    }

    #[test]
    fn test_migrate_entity_unique_id() {
        let entity = EntityEntry::new(
            "sensor.survival_latency",
            DOMAIN,
            "mc.example.com-srv-Latency Time",
        );
        let update = migrate_entity_unique_id("E1", &entity).unwrap();
        assert_eq!(update.new_unique_id.as_deref(), Some("E1-latency"));
        assert_eq!(update.new_entity_id, None);
    }
}
