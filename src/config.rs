//! TOML configuration for the command line client
//!
//! ```toml
//! [broker]
//! broker_url = "ssl://broker.example:8883"
//! client_id = "dev-1"
//!
//! [identity]
//! ca_cert_path = "certs/ca.pem"
//! cert_path = "certs/client.pem"
//! key_path = "certs/client.key"
//!
//! [session]
//! topic = "sample-topic/test"
//! qos = 1
//! ```
//!
//! Relative identity paths are resolved against the directory holding the
//! configuration file.

use crate::session::profile::{
    qos_from_level, SessionProfile, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_KEEP_ALIVE_SECS,
    DEFAULT_PAYLOAD, DEFAULT_TOPIC,
};
use crate::session::ConnectionOptions;
use crate::transport::mqtt::parse_broker_url;
use crate::transport::BrokerEndpoint;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main client configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MtlsConfig {
    pub broker: BrokerSection,
    pub identity: IdentitySection,
    #[serde(default)]
    pub session: SessionSection,
    /// Directory relative identity paths are resolved against
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// `ssl://host:port` or `mqtts://host:port`; port defaults to 8883
    pub broker_url: String,
    pub client_id: String,
}

/// PEM files making up the client identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentitySection {
    pub ca_cert_path: PathBuf,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Session parameters; every field is optional
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSection {
    pub topic: String,
    pub qos: u8,
    pub payload: String,
    pub retain: bool,
    pub clean_session: bool,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    pub subscribe_on_connect: bool,
    pub publish_on_connect: bool,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            qos: 1,
            payload: DEFAULT_PAYLOAD.to_string(),
            retain: false,
            clean_session: true,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            subscribe_on_connect: true,
            publish_on_connect: true,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Failed to read identity file {}", path.display())]
    IdentityFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MtlsConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: MtlsConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint()?;

        if self.broker.client_id.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.client_id must not be empty".to_string(),
            ));
        }
        if self.session.topic.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "session.topic must not be empty".to_string(),
            ));
        }
        if qos_from_level(self.session.qos).is_none() {
            return Err(ConfigError::InvalidConfig(format!(
                "session.qos must be 0, 1 or 2 but {} was given",
                self.session.qos
            )));
        }
        if self.session.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "session.connect_timeout_secs must be positive".to_string(),
            ));
        }
        if self.session.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "session.keep_alive_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Result<BrokerEndpoint, ConfigError> {
        parse_broker_url(&self.broker.broker_url)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }

    /// Resolve an identity path against the configuration file's directory
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn read_identity_file(&self, path: &Path) -> Result<String, ConfigError> {
        let resolved = self.resolve_path(path);
        std::fs::read_to_string(&resolved).map_err(|source| ConfigError::IdentityFile {
            path: resolved,
            source,
        })
    }

    /// Read the PEM files and build validated connection options
    pub fn connection_options(&self) -> Result<ConnectionOptions, ConfigError> {
        let endpoint = self.endpoint()?;
        let ca_cert = self.read_identity_file(&self.identity.ca_cert_path)?;
        let cert = self.read_identity_file(&self.identity.cert_path)?;
        let key = self.read_identity_file(&self.identity.key_path)?;

        ConnectionOptions::new(
            ca_cert,
            cert,
            key,
            self.broker.client_id.clone(),
            endpoint.host(),
            endpoint.port(),
        )
        .map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }

    pub fn profile(&self) -> SessionProfile {
        let session = &self.session;
        let defaults = SessionProfile::default();
        SessionProfile {
            topic: session.topic.clone(),
            qos: qos_from_level(session.qos).unwrap_or(defaults.qos),
            payload: Bytes::from(session.payload.clone()),
            retain: session.retain,
            clean_session: session.clean_session,
            keep_alive: Duration::from_secs(session.keep_alive_secs),
            connect_timeout: Duration::from_secs(session.connect_timeout_secs),
            subscribe_on_connect: session.subscribe_on_connect,
            publish_on_connect: session.publish_on_connect,
        }
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[broker]
broker_url = "ssl://broker.example:8883"
client_id = "dev-1"

[identity]
ca_cert_path = "tests/fixtures/ca.pem"
cert_path = "tests/fixtures/client.pem"
key_path = "tests/fixtures/client.key"
"#;
        Self::from_toml_str(toml_content).expect("Test config should parse")
    }
}
