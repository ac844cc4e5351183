//! Config discovery, loading, and environment overrides.

use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::schema::PortsideConfig;

/// Standard config file name.
const CONFIG_FILENAME: &str = "portside.toml";

/// Load config from the given path.
pub fn load_config(path: &Path) -> anyhow::Result<PortsideConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
    Ok(cfg)
}

/// Discover and load config from standard locations, then apply
/// environment overrides.
///
/// Search order:
/// 1. `explicit` (errors are fatal when the caller named a path)
/// 2. `./portside.toml` (project-local)
/// 3. `~/.config/portside/portside.toml` (user-global)
///
/// Falls back to `PortsideConfig::default()` when nothing is found.
pub fn discover_and_load(explicit: Option<&Path>) -> anyhow::Result<PortsideConfig> {
    let mut cfg = if let Some(path) = explicit {
        load_config(path)?
    } else if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                PortsideConfig::default()
            },
        }
    } else {
        debug!("no config file found, using defaults");
        PortsideConfig::default()
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILENAME);
    if local.exists() {
        return Some(local);
    }
    let global = config_dir()?.join(CONFIG_FILENAME);
    global.exists().then_some(global)
}

/// Returns the user-global config directory (`~/.config/portside/`).
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|d| d.join("portside"))
}

/// Apply `PORTSIDE_*` environment overrides on top of the loaded file.
/// Credentials in particular are usually supplied this way rather than
/// written into a config file.
fn apply_env_overrides(cfg: &mut PortsideConfig) {
    if let Ok(dir) = std::env::var("PORTSIDE_GATEWAY_DIR") {
        cfg.gateway.root_dir = PathBuf::from(dir);
    }
    if let Ok(port) = std::env::var("PORTSIDE_PORT") {
        match port.parse() {
            Ok(p) => cfg.gateway.default_port = p,
            Err(_) => warn!(value = %port, "ignoring non-numeric PORTSIDE_PORT"),
        }
    }
    if let Ok(user) = std::env::var("PORTSIDE_USERNAME") {
        cfg.auth.username = Some(user);
    }
    if let Ok(pass) = std::env::var("PORTSIDE_PASSWORD") {
        cfg.auth.password = Some(Secret::new(pass));
    }
}
