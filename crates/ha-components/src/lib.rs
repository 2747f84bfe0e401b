//! Home Assistant Built-in Components
//!
//! This crate contains implementations of Home Assistant's built-in components
//! (integrations) that don't require Python.

pub mod minecraft_server;

pub use minecraft_server::{
    CoordinatorTable, MinecraftServer, MinecraftServerConfig, MinecraftServerCoordinator,
    MinecraftServerError, ServerStatus, StatusError, StatusSource,
};
