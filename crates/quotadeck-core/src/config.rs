use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Overrides the data directory, handy for tests and portable installs
pub const DATA_DIR_ENV: &str = "QUOTADECK_DATA_DIR";

/// Application configuration
///
/// Only non-secret plumbing lives here. Everything the user edits in the
/// dashboard (thresholds, refresh interval, language) is stored encrypted
/// alongside the accounts.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from the default location, falling back to defaults
    pub fn load() -> crate::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| crate::Error::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// `config.toml` under the platform config dir (XDG on Linux, AppData on Windows)
    pub fn config_path() -> crate::Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| crate::Error::ConfigError("Could not find config directory".into()))?
            .join("quotadeck");

        Ok(config_dir.join("config.toml"))
    }

    /// Where `auth.json` and `credentials.enc` live.
    /// Priority: env var > config file > platform data dir
    pub fn data_dir(&self) -> crate::Result<PathBuf> {
        resolve_data_dir(
            std::env::var_os(DATA_DIR_ENV).map(PathBuf::from),
            self.storage.data_dir.clone(),
        )
    }
}

fn resolve_data_dir(env: Option<PathBuf>, configured: Option<PathBuf>) -> crate::Result<PathBuf> {
    if let Some(dir) = env.filter(|d| !d.as_os_str().is_empty()) {
        return Ok(dir);
    }
    if let Some(dir) = configured {
        return Ok(dir);
    }
    dirs::data_dir()
        .map(|dir| dir.join("quotadeck"))
        .ok_or_else(|| crate::Error::ConfigError("Could not find data directory".into()))
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StorageConfig {
    /// Custom data directory
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// tracing filter used when RUST_LOG is not set
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "quotadeck=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.logging.filter, "quotadeck=info");
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[storage]\ndata_dir = \"/srv/quotadeck\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.storage.data_dir, Some(PathBuf::from("/srv/quotadeck")));
        assert_eq!(config.logging.filter, "quotadeck=info");
    }

    #[test]
    fn test_full_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[storage]\ndata_dir = \"/srv/quotadeck\"\n\n[logging]\nfilter = \"quotadeck=debug\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.storage.data_dir, Some(PathBuf::from("/srv/quotadeck")));
        assert_eq!(config.logging.filter, "quotadeck=debug");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "storage = [").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(crate::Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_data_dir_priority() {
        let env = Some(PathBuf::from("/from/env"));
        let configured = Some(PathBuf::from("/from/config"));

        assert_eq!(
            resolve_data_dir(env, configured.clone()).unwrap(),
            PathBuf::from("/from/env")
        );
        assert_eq!(
            resolve_data_dir(Some(PathBuf::new()), configured.clone()).unwrap(),
            PathBuf::from("/from/config")
        );
        assert_eq!(
            resolve_data_dir(None, configured).unwrap(),
            PathBuf::from("/from/config")
        );
    }
}
