//! Configuration file resolution and loading
//!
//! Resolution order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config file (`<config_dir>/cueforge/config.toml`)
//! 4. System config file (`/etc/cueforge/config.toml`, Linux only)
//! 5. Built-in defaults (no file)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CUEFORGE_CONFIG";

/// Directory name used under the platform config directory
const APP_DIR: &str = "cueforge";

/// Where a resolved config file came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    CommandLine(PathBuf),
    Environment(PathBuf),
    UserFile(PathBuf),
    SystemFile(PathBuf),
    Defaults,
}

impl ConfigSource {
    /// Path of the file to load, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::CommandLine(p)
            | ConfigSource::Environment(p)
            | ConfigSource::UserFile(p)
            | ConfigSource::SystemFile(p) => Some(p),
            ConfigSource::Defaults => None,
        }
    }
}

/// Resolve which config file to use
///
/// Explicit paths (CLI, env) are returned even if the file does not exist so
/// the loader can report a clear error. Implicit locations are only used when
/// present.
pub fn resolve_config_file(cli_arg: Option<&Path>, env_var_name: &str) -> ConfigSource {
    if let Some(path) = cli_arg {
        return ConfigSource::CommandLine(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return ConfigSource::Environment(PathBuf::from(path));
        }
    }

    if let Some(path) = user_config_path() {
        if path.exists() {
            return ConfigSource::UserFile(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system = PathBuf::from("/etc").join(APP_DIR).join("config.toml");
        if system.exists() {
            return ConfigSource::SystemFile(system);
        }
    }

    ConfigSource::Defaults
}

/// Per-user config file location for this platform
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

/// Per-user data directory (shows, logs)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("./cueforge_data"))
}

/// Parse a TOML document into `T`
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T> {
    toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
}

/// Load `T` from the resolved source, falling back to `T::default()`
pub fn load_config<T>(source: &ConfigSource) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match source.path() {
        Some(path) => {
            debug!("Loading config file {}", path.display());
            let content = std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
            })?;
            parse_toml(&content)
        }
        None => Ok(T::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serial_test::serial;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        name: String,
        rate: u32,
    }

    #[test]
    #[serial]
    fn test_cli_takes_priority_over_env() {
        std::env::set_var("CUEFORGE_TEST_CONFIG_A", "/from/env.toml");
        let source = resolve_config_file(Some(Path::new("/from/cli.toml")), "CUEFORGE_TEST_CONFIG_A");
        assert_eq!(source, ConfigSource::CommandLine(PathBuf::from("/from/cli.toml")));
        std::env::remove_var("CUEFORGE_TEST_CONFIG_A");
    }

    #[test]
    #[serial]
    fn test_env_used_without_cli() {
        std::env::set_var("CUEFORGE_TEST_CONFIG_B", "/from/env.toml");
        let source = resolve_config_file(None, "CUEFORGE_TEST_CONFIG_B");
        assert_eq!(source, ConfigSource::Environment(PathBuf::from("/from/env.toml")));
        std::env::remove_var("CUEFORGE_TEST_CONFIG_B");
    }

    #[test]
    fn test_defaults_have_no_path() {
        assert_eq!(ConfigSource::Defaults.path(), None);
        let loaded: Sample = load_config(&ConfigSource::Defaults).unwrap();
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "name = \"booth\"\nrate = 48000\n").unwrap();

        let loaded: Sample = load_config(&ConfigSource::CommandLine(path)).unwrap();
        assert_eq!(loaded.name, "booth");
        assert_eq!(loaded.rate, 48000);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result: Result<Sample> =
            load_config(&ConfigSource::CommandLine(PathBuf::from("/nonexistent/cueforge.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_malformed_toml_is_error() {
        let result: Result<Sample> = parse_toml("rate = \"fast\"");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
