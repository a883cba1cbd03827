//! Platform-specific configuration paths.
//!
//! - Linux: `~/.config/pulsar/`
//! - macOS: `~/Library/Application Support/pulsar/`
//! - Windows: `%APPDATA%\pulsar\`

use std::path::{Path, PathBuf};

/// Application name used for directory paths.
const APP_NAME: &str = "pulsar";

/// File name of the VM configuration.
pub const CONFIG_FILE: &str = "pulsar.toml";

/// Returns the user-specific configuration directory.
///
/// Returns a fallback path if the config directory cannot be determined.
pub fn user_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Returns `<config_dir>/pulsar/pulsar.toml`.
pub fn default_config_path() -> PathBuf {
    user_config_dir().join(CONFIG_FILE)
}

/// Resolves the config file to load.
///
/// An explicit path is returned as is, existing or not, so that a typo
/// surfaces as a read error. Without one, the default path is used only if
/// the file exists.
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let path = default_config_path();
            path.is_file().then_some(path)
        }
    }
}
