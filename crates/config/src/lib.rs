//! Configuration loading and schema for portside.
//!
//! Config file: `portside.toml`, searched in `./` then `~/.config/portside/`.
//! `PORTSIDE_*` environment variables override file values.

pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, discover_and_load, load_config},
    schema::{
        AuthConfig, BrowserConfig, BrowserMode, GatewayConfig, HealthConfig, PortsideConfig,
        TunnelConfig,
    },
};
