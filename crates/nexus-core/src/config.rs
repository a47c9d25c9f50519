//! Client configuration

use crate::envelope::SamplingParams;
use nexus_wire::{ConnectionConfig, DEFAULT_PACKET_SIZE, TcpConnector};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 50006;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;
pub const DEFAULT_USER_NAME: &str = "User";
pub const DEFAULT_BOT_NAME: &str = "Assistant";

/// Connection, naming, and sampling settings for a chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub packet_size: usize,
    pub retry_delay_secs: u64,
    pub user_name: String,
    pub bot_name: String,
    pub sampling: SamplingParams,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            packet_size: DEFAULT_PACKET_SIZE,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            user_name: DEFAULT_USER_NAME.to_string(),
            bot_name: DEFAULT_BOT_NAME.to_string(),
            sampling: SamplingParams::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check the settings both ends and the dialogue depend on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.packet_size == 0 {
            return Err(ConfigError::Invalid("packet_size must be at least 1".into()));
        }
        if self.user_name.trim().is_empty() || self.bot_name.trim().is_empty() {
            return Err(ConfigError::Invalid("user and bot names must not be empty".into()));
        }
        if self.user_name == self.bot_name {
            return Err(ConfigError::Invalid(format!(
                "user and bot share the name {:?}",
                self.user_name
            )));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            packet_size: self.packet_size,
            retry_delay: self.retry_delay(),
        }
    }

    pub fn connector(&self) -> TcpConnector {
        TcpConnector::new(self.host.clone(), self.port)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Path used when no configuration file is given
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("nexus").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from(".nexus/config.toml"))
}

/// Load configuration from the given path or the default location.
///
/// A missing file yields the defaults. YAML is read for `.yaml`/`.yml`
/// paths, TOML otherwise.
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);

    let config = if path.exists() {
        debug!("Loading configuration from {:?}", path);
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => ClientConfig::from_yaml(&path)?,
            _ => ClientConfig::from_file(&path)?,
        }
    } else {
        debug!("No configuration at {:?}, using defaults", path);
        ClientConfig::default()
    };

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 50006);
        assert_eq!(config.packet_size, 4096);
        assert_eq!(config.retry_delay(), Duration::from_secs(2));
        assert_eq!(config.user_name, "User");
        assert_eq!(config.bot_name, "Assistant");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            port = 6000
            bot_name = "Nova"

            [sampling]
            temperature = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.bot_name, "Nova");
        assert_eq!(config.host, "localhost");
        assert_eq!(config.sampling.temperature, 0.5);
        assert_eq!(config.sampling.top_k, 50);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero = ClientConfig {
            packet_size: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(zero.validate(), Err(ConfigError::Invalid(_))));

        let same = ClientConfig {
            user_name: "Echo".into(),
            bot_name: "Echo".into(),
            ..ClientConfig::default()
        };
        assert!(matches!(same.validate(), Err(ConfigError::Invalid(_))));

        let empty = ClientConfig {
            user_name: " ".into(),
            ..ClientConfig::default()
        };
        assert!(matches!(empty.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_save_and_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = ClientConfig {
            host: "10.0.0.5".into(),
            retry_delay_secs: 5,
            ..ClientConfig::default()
        };
        config.to_file(&path).unwrap();

        assert_eq!(load_config(Some(&path)).unwrap(), config);
    }

    #[test]
    fn test_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "host: example.org\npacket_size: 1024\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.host, "example.org");
        assert_eq!(config.packet_size, 1024);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_connection_settings() {
        let config = ClientConfig::default();
        assert_eq!(config.connection_config().packet_size, 4096);
        assert_eq!(config.connector().port(), 50006);
        assert_eq!(config.connector().host(), "localhost");
    }
}
