//! Persisted user settings (`~/.rosdbg/settings.json`).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Settings file name inside the settings directory.
pub const SETTINGS_FILE: &str = "settings.json";

/// Settings load/save failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError
{
    #[error("No home directory to store settings in")]
    NoHomeDirectory,

    #[error("Settings file {}: {source}", path.display())]
    Io
    {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed settings file {}: {source}", path.display())]
    Parse
    {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// What the user configured last time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings
{
    /// Root of the kernel source tree; source files are opened relative to it
    pub source_directory: Option<PathBuf>,
    /// Build output directory searched for symbol files
    pub output_directory: Option<PathBuf>,
    /// Last connection, e.g. `tcp:localhost:5000` or `pipe:/tmp/reactos:client`
    pub connection: Option<String>,
    /// Default log level for the terminal UI
    pub log_level: Option<String>,
}

impl Settings
{
    /// `~/.rosdbg`
    ///
    /// ## Errors
    ///
    /// [`ConfigError::NoHomeDirectory`] if the home directory is unknown.
    pub fn directory() -> Result<PathBuf, ConfigError>
    {
        dirs::home_dir()
            .map(|home| home.join(".rosdbg"))
            .ok_or(ConfigError::NoHomeDirectory)
    }

    /// Load the user's settings, or defaults if none were saved.
    ///
    /// ## Errors
    ///
    /// As for [`Settings::load_from`].
    pub fn load() -> Result<Self, ConfigError>
    {
        Self::load_from(&Self::directory()?.join(SETTINGS_FILE))
    }

    /// Load settings from `path`; a missing file yields defaults.
    ///
    /// ## Errors
    ///
    /// [`ConfigError::Io`] if the file exists but cannot be read and
    /// [`ConfigError::Parse`] if it is not valid settings JSON.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError>
    {
        if !path.exists() {
            tracing::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save to `~/.rosdbg/settings.json`, returning the path written.
    ///
    /// ## Errors
    ///
    /// As for [`Settings::save_to`].
    pub fn save(&self) -> Result<PathBuf, ConfigError>
    {
        let path = Self::directory()?.join(SETTINGS_FILE);
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save to `path`, creating its directory.
    ///
    /// ## Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError>
    {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_error)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(io_error)?;
        tracing::info!("Settings saved to {}", path.display());
        Ok(())
    }

    /// Overlay `other`'s set fields on top of these.
    #[must_use]
    pub fn merged(mut self, other: Settings) -> Self
    {
        if other.source_directory.is_some() {
            self.source_directory = other.source_directory;
        }
        if other.output_directory.is_some() {
            self.output_directory = other.output_directory;
        }
        if other.connection.is_some() {
            self.connection = other.connection;
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
        self
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults()
    {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join(SETTINGS_FILE)).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_save_and_load()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);
        let settings = Settings {
            source_directory: Some(PathBuf::from("/src/reactos")),
            output_directory: Some(PathBuf::from("/src/reactos/output-MinGW-i386")),
            connection: Some("tcp:localhost:5000".to_string()),
            log_level: None,
        };
        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn test_partial_file_fills_defaults()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, r#"{ "connection": "serial:/dev/ttyS0:115200" }"#).unwrap();
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.connection.as_deref(), Some("serial:/dev/ttyS0:115200"));
        assert!(settings.output_directory.is_none());
    }

    #[test]
    fn test_malformed_file_is_rejected()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, "not json").unwrap();
        assert!(matches!(Settings::load_from(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_merged_prefers_set_fields()
    {
        let saved = Settings {
            connection: Some("tcp:localhost:5000".to_string()),
            log_level: Some("debug".to_string()),
            ..Settings::default()
        };
        let flags = Settings {
            connection: Some("pipe:/tmp/vm".to_string()),
            ..Settings::default()
        };
        let merged = saved.merged(flags);
        assert_eq!(merged.connection.as_deref(), Some("pipe:/tmp/vm"));
        assert_eq!(merged.log_level.as_deref(), Some("debug"));
    }
}
