//! Inspector configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Terminal table settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub enabled: bool,
    /// Lines above the table (banner and column headers)
    pub header_lines: u16,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            header_lines: 10,
        }
    }
}

/// Inspector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    /// sea-orm connection string of the exchange store
    pub database_url: String,
    /// Store capacity
    pub max_logged_requests: usize,
    /// Clear stored exchanges when the store is opened
    pub truncate_on_start: bool,
    /// Recorded when a request has no `x-original-host` header
    pub subdomain: Option<String>,
    /// Port of the dashboard the remote sink pushes to
    pub dashboard_port: u16,
    /// Bind address of the query API
    pub api_addr: SocketAddr,
    #[serde(with = "duration_secs")]
    pub push_timeout: Duration,
    /// host:port of the local server replays are sent to
    pub local_target: String,
    #[serde(with = "duration_secs")]
    pub replay_timeout: Duration,
    pub terminal: TerminalConfig,
    /// Extra matchers enabled after the defaults, by name
    pub request_matchers: Vec<String>,
}

/// Helper module for serializing Duration as seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_logged_requests: 25,
            truncate_on_start: true,
            subdomain: None,
            dashboard_port: 4040,
            api_addr: SocketAddr::from(([127, 0, 0, 1], 4040)),
            push_timeout: Duration::from_secs(2),
            local_target: "127.0.0.1:80".to_string(),
            replay_timeout: Duration::from_secs(30),
            terminal: TerminalConfig::default(),
            request_matchers: Vec::new(),
        }
    }
}

impl InspectorConfig {
    pub fn builder() -> InspectorConfigBuilder {
        InspectorConfigBuilder::default()
    }

    /// Parse and validate a YAML document. Missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: InspectorConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_logged_requests == 0 {
            return Err(ConfigError::Invalid(
                "max_logged_requests must be at least 1".to_string(),
            ));
        }
        if self.local_target.trim().is_empty() {
            return Err(ConfigError::Invalid("local_target is required".to_string()));
        }
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid("database_url is required".to_string()));
        }
        Ok(())
    }
}

/// Builder for InspectorConfig
#[derive(Default)]
pub struct InspectorConfigBuilder {
    config: InspectorConfig,
}

impl InspectorConfigBuilder {
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = url.into();
        self
    }

    pub fn max_logged_requests(mut self, max: usize) -> Self {
        self.config.max_logged_requests = max;
        self
    }

    pub fn truncate_on_start(mut self, enabled: bool) -> Self {
        self.config.truncate_on_start = enabled;
        self
    }

    pub fn subdomain(mut self, subdomain: impl Into<String>) -> Self {
        self.config.subdomain = Some(subdomain.into());
        self
    }

    pub fn dashboard_port(mut self, port: u16) -> Self {
        self.config.dashboard_port = port;
        self
    }

    pub fn api_addr(mut self, addr: SocketAddr) -> Self {
        self.config.api_addr = addr;
        self
    }

    pub fn push_timeout(mut self, timeout: Duration) -> Self {
        self.config.push_timeout = timeout;
        self
    }

    pub fn local_target(mut self, target: impl Into<String>) -> Self {
        self.config.local_target = target.into();
        self
    }

    pub fn replay_timeout(mut self, timeout: Duration) -> Self {
        self.config.replay_timeout = timeout;
        self
    }

    pub fn terminal(mut self, enabled: bool) -> Self {
        self.config.terminal.enabled = enabled;
        self
    }

    pub fn header_lines(mut self, lines: u16) -> Self {
        self.config.terminal.header_lines = lines;
        self
    }

    pub fn request_matcher(mut self, name: impl Into<String>) -> Self {
        self.config.request_matchers.push(name.into());
        self
    }

    pub fn build(self) -> Result<InspectorConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = InspectorConfig::default();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.max_logged_requests, 25);
        assert!(config.truncate_on_start);
        assert_eq!(config.dashboard_port, 4040);
        assert_eq!(config.push_timeout, Duration::from_secs(2));
        assert_eq!(config.terminal.header_lines, 10);
    }

    #[test]
    fn test_config_builder() {
        let config = InspectorConfig::builder()
            .max_logged_requests(5)
            .local_target("127.0.0.1:3000")
            .subdomain("myapp")
            .request_matcher("stripe")
            .build()
            .unwrap();

        assert_eq!(config.max_logged_requests, 5);
        assert_eq!(config.local_target, "127.0.0.1:3000");
        assert_eq!(config.subdomain.as_deref(), Some("myapp"));
        assert_eq!(config.request_matchers, vec!["stripe"]);
    }

    #[test]
    fn test_config_builder_rejects_zero_capacity() {
        let result = InspectorConfig::builder().max_logged_requests(0).build();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_config_builder_rejects_empty_target() {
        let result = InspectorConfig::builder().local_target("  ").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = InspectorConfig::from_yaml_str(
            "max_logged_requests: 50\npush_timeout: 5\nterminal:\n  enabled: false\n",
        )
        .unwrap();

        assert_eq!(config.max_logged_requests, 50);
        assert_eq!(config.push_timeout, Duration::from_secs(5));
        assert!(!config.terminal.enabled);
        assert_eq!(config.terminal.header_lines, 10);
        assert_eq!(config.local_target, "127.0.0.1:80");
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let config = InspectorConfig::builder()
            .database_url("sqlite://./inspect.db?mode=rwc")
            .replay_timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_yaml().unwrap().as_bytes()).unwrap();

        let loaded = InspectorConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_yaml_value() {
        let result = InspectorConfig::from_yaml_str("max_logged_requests: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
