//! Server configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file)
//! is a valid configuration.
//!
//! ```toml
//! listen = "127.0.0.1:8081"
//! db_path = "~/.local/share/chatdrive/chatdrive.db"
//! storage_channel = -1001234567890
//! max_part_size = 2147483648
//! handoff_capacity = 8
//! realm = "chatdrive"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{AUTH_REJECTION_DELAY, DEFAULT_DAV_PORT, DEFAULT_REALM};
use chatdrive_transfer::DEFAULT_HANDOFF_CAPACITY;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebDAV listener binds.
    pub listen: SocketAddr,
    /// SQLite metadata database.
    pub db_path: PathBuf,
    /// Chat that receives uploaded blobs.
    pub storage_channel: i64,
    /// Largest part sent to the blob store; `None` uses the store's ceiling.
    pub max_part_size: Option<u64>,
    /// Hand-off depth between the request body and the part transfer.
    pub handoff_capacity: usize,
    /// Basic-auth realm.
    pub realm: String,
    /// Delay before answering a failed login, in milliseconds.
    pub auth_rejection_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], DEFAULT_DAV_PORT)),
            db_path: Self::default_db_path(),
            storage_channel: 0,
            max_part_size: None,
            handoff_capacity: DEFAULT_HANDOFF_CAPACITY,
            realm: DEFAULT_REALM.to_string(),
            auth_rejection_delay_ms: AUTH_REJECTION_DELAY.as_millis() as u64,
        }
    }
}

impl ServerConfig {
    /// `<data dir>/chatdrive/chatdrive.db`
    pub fn default_db_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chatdrive")
            .join("chatdrive.db")
    }

    /// `<config dir>/chatdrive/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("chatdrive").join("config.toml"))
    }

    /// Parse a TOML document.
    pub fn from_toml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Load from a file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let path: PathBuf = shellexpand::tilde(&path.to_string_lossy()).as_ref().into();
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_toml(&text, &path)
    }

    /// Load `path` if given, else the default file if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::load(&default),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Point at a different database, expanding `~`.
    pub fn set_db_path(&mut self, path: &Path) {
        self.db_path = path.to_path_buf();
        self.expand_paths();
    }

    pub fn auth_rejection_delay(&self) -> Duration {
        Duration::from_millis(self.auth_rejection_delay_ms)
    }

    fn expand_paths(&mut self) {
        let expanded = shellexpand::tilde(&self.db_path.to_string_lossy()).into_owned();
        self.db_path = PathBuf::from(expanded);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_part_size == Some(0) {
            return Err(ConfigError::Invalid("max_part_size must be positive".into()));
        }
        if self.handoff_capacity == 0 {
            return Err(ConfigError::Invalid("handoff_capacity must be positive".into()));
        }
        if self.realm.contains('"') {
            return Err(ConfigError::Invalid("realm must not contain quotes".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ServerConfig::from_toml("", Path::new("test.toml")).unwrap();
        assert_eq!(config.listen.port(), DEFAULT_DAV_PORT);
        assert_eq!(config.realm, "chatdrive");
        assert_eq!(config.handoff_capacity, 8);
        assert_eq!(config.max_part_size, None);
    }

    #[test]
    fn test_full_config() {
        let text = r#"
            listen = "0.0.0.0:9000"
            db_path = "~/drive.db"
            storage_channel = -100123
            max_part_size = 1048576
            handoff_capacity = 2
            realm = "home"
        "#;
        let config = ServerConfig::from_toml(text, Path::new("test.toml")).unwrap();
        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.storage_channel, -100123);
        assert_eq!(config.max_part_size, Some(1_048_576));
        assert!(!config.db_path.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_invalid_values_rejected() {
        for text in ["max_part_size = 0", "handoff_capacity = 0", "realm = 'a\"b'"] {
            let err = ServerConfig::from_toml(text, Path::new("bad.toml")).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{text}");
        }
        let err = ServerConfig::from_toml("listen = 5", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "realm = \"files\"\n").unwrap();
        assert_eq!(ServerConfig::load(&path).unwrap().realm, "files");
        assert!(matches!(
            ServerConfig::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
