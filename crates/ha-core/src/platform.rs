//! Entity platforms an integration can forward its config entries to

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error for an unknown platform name
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown platform: {0}")]
pub struct PlatformError(pub String);

/// Entity platform (matches `homeassistant.const.Platform`)
///
/// Only the platforms the Rust host knows how to track are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    BinarySensor,
    Button,
    Light,
    Sensor,
    Switch,
}

impl Platform {
    /// The platform's domain string (e.g. "binary_sensor")
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::BinarySensor => "binary_sensor",
            Platform::Button => "button",
            Platform::Light => "light",
            Platform::Sensor => "sensor",
            Platform::Switch => "switch",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binary_sensor" => Ok(Platform::BinarySensor),
            "button" => Ok(Platform::Button),
            "light" => Ok(Platform::Light),
            "sensor" => Ok(Platform::Sensor),
            "switch" => Ok(Platform::Switch),
            other => Err(PlatformError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_str() {
        assert_eq!(Platform::BinarySensor.as_str(), "binary_sensor");
        assert_eq!(Platform::Sensor.to_string(), "sensor");
    }

    #[test]
    fn test_parse_platform() {
        assert_eq!("sensor".parse::<Platform>().unwrap(), Platform::Sensor);
        assert_eq!(
            "climate".parse::<Platform>().unwrap_err(),
            PlatformError("climate".to_string())
        );
    }

    #[test]
    fn test_serde_matches_domain() {
        let json = serde_json::to_string(&Platform::BinarySensor).unwrap();
        assert_eq!(json, "\"binary_sensor\"");
    }
}
