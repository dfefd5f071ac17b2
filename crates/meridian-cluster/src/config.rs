//! Cluster configuration with layered loading.
//!
//! Settings come from a TOML file merged with `MERIDIAN_`-prefixed
//! environment variables. The peer client reads the
//! `cluster.rpc.client.grpc` section; the key layout is kept compatible
//! with existing deployments.

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::{Error as FigmentError, Figment};
use serde::Deserialize;
use thiserror::Error;

/// Dotted path of the peer client section.
const RPC_CLIENT_SECTION: &str = "cluster.rpc.client.grpc";

/// Errors that can occur when loading cluster configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error from the Figment configuration library.
    #[error("configuration error: {0}")]
    Figment(Box<FigmentError>),

    /// The specified configuration file was not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<FigmentError> for ConfigError {
    fn from(err: FigmentError) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Peer client settings, the `cluster.rpc.client.grpc` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcClientConfig {
    /// Maximum time to establish a peer connection.
    #[serde(
        default = "default_dial_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub dialtimeout: Duration,

    /// Defer connecting to a peer until the first call.
    #[serde(default)]
    pub lazyconnection: bool,

    /// Deadline applied to every cross-node call.
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub requesttimeout: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            dialtimeout: default_dial_timeout(),
            lazyconnection: false,
            requesttimeout: default_request_timeout(),
        }
    }
}

impl RpcClientConfig {
    /// Loads configuration from the specified file path.
    ///
    /// Environment variables prefixed with `MERIDIAN_` override file
    /// settings. A missing `cluster.rpc.client.grpc` section yields the
    /// defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("MERIDIAN_").split("__").lowercase(false));
        Self::extract(&figment)
    }

    /// Parses configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new().merge(Toml::string(content));
        Self::extract(&figment)
    }

    fn extract(figment: &Figment) -> Result<Self, ConfigError> {
        if figment.find_value(RPC_CLIENT_SECTION).is_err() {
            return Ok(Self::default());
        }
        figment
            .extract_inner::<Self>(RPC_CLIENT_SECTION)
            .map_err(ConfigError::from)
    }
}

const fn default_dial_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Some(stripped) = s.strip_suffix("ms") {
        let ms: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("invalid duration: {s}"))?;
        Ok(Duration::from_millis(ms))
    } else if let Some(stripped) = s.strip_suffix('s') {
        let secs: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("invalid duration: {s}"))?;
        Ok(Duration::from_secs(secs))
    } else if let Some(stripped) = s.strip_suffix('m') {
        let mins: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("invalid duration: {s}"))?;
        Ok(Duration::from_secs(mins * 60))
    } else {
        let secs: u64 = s.parse().map_err(|_| format!("invalid duration: {s}"))?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_suffixes() {
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
    }

    #[test]
    fn config_from_string() {
        let config = RpcClientConfig::parse(
            r#"
            [cluster.rpc.client.grpc]
            dialtimeout = "3s"
            lazyconnection = true
            requesttimeout = "750ms"
        "#,
        )
        .unwrap();

        assert_eq!(config.dialtimeout, Duration::from_secs(3));
        assert!(config.lazyconnection);
        assert_eq!(config.requesttimeout, Duration::from_millis(750));
    }

    #[test]
    fn config_defaults() {
        let config = RpcClientConfig::parse(
            r#"
            [cluster.rpc.client.grpc]
            lazyconnection = true
        "#,
        )
        .unwrap();

        assert_eq!(config.dialtimeout, Duration::from_secs(5));
        assert_eq!(config.requesttimeout, Duration::from_secs(5));
    }

    #[test]
    fn missing_section_yields_defaults() {
        let config = RpcClientConfig::parse("[other]\nx = 1\n").unwrap();
        assert!(!config.lazyconnection);
        assert_eq!(config.dialtimeout, Duration::from_secs(5));
    }
}
