//! Core types for Home Assistant
//!
//! This crate provides the vocabulary shared between the host and its
//! integrations: entity platforms and the well-known configuration keys
//! stored in config entry data.

mod platform;

pub use platform::{Platform, PlatformError};

/// Well-known keys of config entry data (matches `homeassistant.const`)
pub mod conf {
    /// Host name or address of a remote service
    pub const CONF_HOST: &str = "host";

    /// Display name chosen by the user
    pub const CONF_NAME: &str = "name";
}
