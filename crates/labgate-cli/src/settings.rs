//! JSON settings file of the `labgate` binary.
//!
//! Every field has a default, so an empty object (or no file at all) is a
//! valid configuration:
//!
//! ```json
//! {
//!   "database": { "path": "data/labgate.db", "max_connections": 8 },
//!   "logging": { "level": "info" },
//!   "session": { "read_timeout_ms": 3000 },
//!   "alerts": { "enabled": true }
//! }
//! ```

use anyhow::{Context, Result};
use labgate_core::constants::{DEFAULT_READ_TIMEOUT_MS, DEFAULT_STOP_TIMEOUT_MS, MAX_BUFFER_SIZE};
use labgate_network::SessionSettings;
use labgate_storage::DatabaseConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
    pub session: SessionSection,
    pub alerts: AlertSettings,
}

impl Settings {
    /// Read `path`, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid settings file {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "labgate.db".to_string(),
            max_connections: 8,
            busy_timeout_ms: 10_000,
        }
    }
}

impl DatabaseSettings {
    pub fn to_config(&self) -> DatabaseConfig {
        DatabaseConfig::new(self.path.clone())
            .max_connections(self.max_connections.max(1))
            .busy_timeout(Duration::from_millis(self.busy_timeout_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub ansi: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub read_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub max_buffer: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            max_buffer: MAX_BUFFER_SIZE,
        }
    }
}

impl SessionSection {
    pub fn to_settings(&self) -> SessionSettings {
        SessionSettings::default()
            .read_timeout(Duration::from_millis(self.read_timeout_ms.max(1)))
            .stop_timeout(Duration::from_millis(self.stop_timeout_ms))
            .max_buffer(self.max_buffer.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub enabled: bool,
    pub queue_capacity: usize,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_path_gives_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.session.to_settings(), SessionSettings::default());
    }

    #[test]
    fn test_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "database": {{ "path": "/var/lib/labgate/lab.db" }}, "session": {{ "read_timeout_ms": 500 }} }}"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.database.path, "/var/lib/labgate/lab.db");
        assert_eq!(settings.database.max_connections, 8);
        assert_eq!(
            settings.session.to_settings().read_timeout,
            Duration::from_millis(500)
        );
        assert!(settings.alerts.enabled);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(Settings::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_database_config() {
        let config = DatabaseSettings::default().to_config();
        assert_eq!(config.database_path, "labgate.db");
        assert_eq!(config.busy_timeout, Duration::from_secs(10));
    }
}
