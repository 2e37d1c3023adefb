//! Domain layer: device-independent types and configuration.

pub mod models;
pub mod settings;
