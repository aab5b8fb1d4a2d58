//! Default paths for powertier components
//!
//! Provides centralized path defaults that all crates can use.
//! Paths are user-writable by default (no root required):
//! - Config: `$XDG_CONFIG_HOME/powertier/config.toml` or `~/.config/powertier/config.toml`
//! - Data: `$XDG_DATA_HOME/powertier` or `~/.local/share/powertier`
//! - State: `$XDG_STATE_HOME/powertier` or `~/.local/state/powertier`

use std::path::PathBuf;

/// Environment variable for overriding the config file path
pub const POWERTIER_CONFIG_ENV: &str = "POWERTIER_CONFIG";

/// Environment variable for overriding the data directory
pub const POWERTIER_DATA_DIR_ENV: &str = "POWERTIER_DATA_DIR";

/// Config filename within the config directory
const CONFIG_FILENAME: &str = "config.toml";

/// State database filename within the state directory
const STATE_DB_FILENAME: &str = "powertier.db";

/// Application subdirectory name
const APP_DIR: &str = "powertier";

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$POWERTIER_CONFIG` environment variable (if set)
/// 2. `$XDG_CONFIG_HOME/powertier/config.toml` (if XDG_CONFIG_HOME is set)
/// 3. `~/.config/powertier/config.toml` (fallback)
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(POWERTIER_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}

/// Get the default data directory (where tier JSON files live).
///
/// Order of precedence:
/// 1. `$POWERTIER_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/powertier` (if XDG_DATA_HOME is set)
/// 3. `~/.local/share/powertier` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(POWERTIER_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking POWERTIER_DATA_DIR env var.
/// Used for default values in configs where the env var is checked separately.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    // Last resort
    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// Get the default state directory (schedule state, sync records, audit log).
///
/// Order of precedence:
/// 1. `$XDG_STATE_HOME/powertier` (if XDG_STATE_HOME is set)
/// 2. `~/.local/state/powertier` (fallback)
pub fn default_state_dir() -> PathBuf {
    if let Ok(state_home) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(state_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("state")
            .join(APP_DIR);
    }

    // Last resort
    PathBuf::from("/tmp").join(APP_DIR).join("state")
}

/// Get the default state database path
pub fn default_state_db_path() -> PathBuf {
    default_state_dir().join(STATE_DB_FILENAME)
}
