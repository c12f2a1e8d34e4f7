//! Configuration loading from `~/.keymesh/config.toml` with defaults.

use keymesh_types::NodeConfig;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

/// Load node configuration from a TOML file, with defaults.
///
/// A missing, unreadable or malformed file yields [`NodeConfig::default`];
/// the reason is logged.
pub fn load_config(path: Option<&Path>) -> NodeConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if config_path.exists() {
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<NodeConfig>(&contents) {
                Ok(config) => {
                    info!(path = %config_path.display(), "Loaded configuration");
                    return config;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        path = %config_path.display(),
                        "Failed to parse config, using defaults"
                    );
                }
            },
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to read config file, using defaults"
                );
            }
        }
    } else {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
    }

    NodeConfig::default()
}

/// Apply command-line overrides on top of a loaded config.
///
/// `--listen` and `--bootstrap` each clear the other mode from the file, so a
/// flag always wins over whatever the file selected.
pub fn apply_overrides(
    config: &mut NodeConfig,
    listen: Option<SocketAddr>,
    bootstrap: Option<String>,
    quiet: bool,
) {
    if let Some(addr) = listen {
        config.listen = Some(addr);
        config.bootstrap = None;
    }
    if let Some(url) = bootstrap {
        config.bootstrap = Some(url);
        config.listen = None;
    }
    if quiet {
        config.log = false;
    }
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    keymesh_home().join("config.toml")
}

/// Get the default keymesh home directory.
pub fn keymesh_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".keymesh")
}
