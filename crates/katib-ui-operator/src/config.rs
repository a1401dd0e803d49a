//! # Charm Configuration
//!
//! Configuration values supplied by the host on every event

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Port the Katib UI listens on when nothing else is configured
pub const DEFAULT_PORT: u16 = 8080;

/// Validated charm configuration
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct CharmConfig {
    /// HTTP port of the Katib UI container
    pub port: u16,
}

impl Default for CharmConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

/// Either a flat value file (`port: 8080`) or a charm `config.yaml`
/// (`options: {port: {type: int, default: 8080}}`).
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum RawConfig {
    Options { options: HashMap<String, RawOption> },
    Values { port: Option<i64> },
}

#[derive(Deserialize, Debug)]
struct RawOption {
    default: Option<serde_yaml::Value>,
}

impl CharmConfig {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }

        let raw: RawConfig = serde_yaml::from_str(yaml)?;
        let port = match raw {
            RawConfig::Options { options } => options
                .get("port")
                .and_then(|opt| opt.default.as_ref())
                .map(|value| serde_yaml::from_value::<i64>(value.clone()))
                .transpose()?,
            RawConfig::Values { port } => port,
        };

        match port {
            Some(port) => Ok(Self::new(validate_port(port)?)),
            None => Ok(Self::default()),
        }
    }

    /// Read and parse a YAML config file
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_yaml_str(&contents)
    }
}

fn validate_port(port: i64) -> Result<u16, ConfigError> {
    u16::try_from(port)
        .ok()
        .filter(|port| *port > 0)
        .ok_or(ConfigError::InvalidPort(port))
}

/// Where the configuration for the next event comes from
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Fixed values, e.g. from CLI flags
    Static(CharmConfig),

    /// Re-read from disk on every event
    File(PathBuf),
}

impl ConfigSource {
    pub async fn load(&self) -> Result<CharmConfig, ConfigError> {
        match self {
            ConfigSource::Static(config) => Ok(config.clone()),
            ConfigSource::File(path) => CharmConfig::from_path(path).await,
        }
    }
}

impl Default for ConfigSource {
    fn default() -> Self {
        ConfigSource::Static(CharmConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_flat_values() {
        let config = CharmConfig::from_yaml_str("port: 5000\n").unwrap();
        assert_eq!(config.port, 5000);
    }

    #[test]
    fn test_options_file_uses_default() {
        let yaml = r#"
options:
  port:
    type: int
    default: 8080
    description: HTTP port
"#;
        let config = CharmConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_missing_port_falls_back_to_default() {
        assert_eq!(CharmConfig::from_yaml_str("").unwrap().port, DEFAULT_PORT);
        assert_eq!(CharmConfig::from_yaml_str("{}").unwrap().port, DEFAULT_PORT);
    }

    #[test]
    fn test_out_of_range_ports_are_rejected() {
        for bad in ["port: 0", "port: -1", "port: 70000"] {
            match CharmConfig::from_yaml_str(bad) {
                Err(ConfigError::InvalidPort(_)) => {}
                other => panic!("expected InvalidPort for {bad:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_non_integer_port_is_a_parse_error() {
        assert!(matches!(
            CharmConfig::from_yaml_str("port: http"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_file_source_reloads_every_time() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port: 9000").unwrap();
        let source = ConfigSource::File(file.path().to_path_buf());
        assert_eq!(source.load().await.unwrap().port, 9000);

        std::fs::write(file.path(), "port: 9001\n").unwrap();
        assert_eq!(source.load().await.unwrap().port, 9001);
    }

    #[tokio::test]
    async fn test_missing_file_is_a_read_error() {
        let source = ConfigSource::File(PathBuf::from("/nonexistent/katib-ui/config.yaml"));
        assert!(matches!(source.load().await, Err(ConfigError::Read { .. })));
    }
}
