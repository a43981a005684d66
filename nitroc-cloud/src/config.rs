use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::util::http::Uri;
use crate::util::json::{deserialize_duration_from_ms, serialize_duration_to_ms};
use crate::util::types::DeviceToken;

/// Cloud connection configuration
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CloudConfig {
    /// Base address of the telemetry server
    pub server: Uri,

    /// Device access token, part of every endpoint path
    pub token: DeviceToken,

    #[serde(default)]
    pub request: RequestConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Total timeout for telemetry, attribute and RPC reply uploads
    #[serde(
        deserialize_with = "deserialize_duration_from_ms",
        serialize_with = "serialize_duration_to_ms"
    )]
    pub upload_timeout: Duration,

    #[serde(
        deserialize_with = "deserialize_duration_from_ms",
        serialize_with = "serialize_duration_to_ms"
    )]
    pub connect_timeout: Duration,

    /// How long the server may hold an RPC long-poll open
    #[serde(
        deserialize_with = "deserialize_duration_from_ms",
        serialize_with = "serialize_duration_to_ms"
    )]
    pub rpc_timeout: Duration,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            upload_timeout: Duration::from_millis(5_000),
            connect_timeout: Duration::from_millis(5_000),
            rpc_timeout: Duration::from_millis(10_000),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Deserialize, Debug, Default)]
struct ApiSection {
    #[serde(rename = "Server")]
    server: Option<Uri>,

    #[serde(rename = "Token")]
    token: Option<DeviceToken>,
}

/// The on-disk configuration file
///
/// ```toml
/// [API]
/// Server = "tb.example.com:8080"
/// Token = "A1_TEST_TOKEN"
///
/// [request]
/// upload_timeout = 5000
/// ```
#[derive(Deserialize, Debug, Default)]
pub struct ConfigFile {
    #[serde(rename = "API", default)]
    api: ApiSection,

    #[serde(default)]
    request: RequestConfig,
}

impl ConfigFile {
    /// Read the configuration file at `path`
    ///
    /// A missing file is not an error, the device then runs without a
    /// cloud connection unless server and token are given elsewhere.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                debug!("loading configuration from {}", path.display());
                Self::parse(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("configuration file {} not found", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Merge command line overrides and build the cloud configuration
    ///
    /// Returns `None` unless both a server and a token are known.
    pub fn into_cloud_config(
        self,
        server: Option<Uri>,
        token: Option<DeviceToken>,
    ) -> Option<CloudConfig> {
        let server = server.or(self.api.server)?;
        let token = token.or(self.api.token).filter(|t| !t.is_empty())?;

        Some(CloudConfig {
            server,
            token,
            request: self.request,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::io::Write;

    use super::*;

    #[test]
    fn it_reads_the_api_section() {
        let file = ConfigFile::parse(
            r#"
            [API]
            Server = "tb.example.com:8080"
            Token = "A1_TEST_TOKEN"
            "#,
        )
        .unwrap();

        let config = file.into_cloud_config(None, None).unwrap();
        assert_eq!(config.server.to_string(), "http://tb.example.com:8080/");
        assert_eq!(config.token.as_str(), "A1_TEST_TOKEN");
        assert_eq!(config.request.upload_timeout, Duration::from_secs(5));
        assert_eq!(config.request.rpc_timeout, Duration::from_secs(10));
    }

    #[test]
    fn it_reads_request_timeouts() {
        let file = ConfigFile::parse(
            r#"
            [API]
            Server = "https://tb.example.com"
            Token = "abc"

            [request]
            upload_timeout = 2500
            "#,
        )
        .unwrap();

        let config = file.into_cloud_config(None, None).unwrap();
        assert_eq!(config.request.upload_timeout, Duration::from_millis(2500));
        assert_eq!(config.request.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn overrides_take_precedence() {
        let file = ConfigFile::parse(
            r#"
            [API]
            Server = "tb.example.com"
            Token = "from-file"
            "#,
        )
        .unwrap();

        let config = file
            .into_cloud_config(
                Some("localhost:9090".parse().unwrap()),
                Some(DeviceToken::from("from-cli")),
            )
            .unwrap();
        assert_eq!(config.server.to_string(), "http://localhost:9090/");
        assert_eq!(config.token.as_str(), "from-cli");
    }

    #[test]
    fn it_requires_server_and_token() {
        let file = ConfigFile::parse("[API]\nServer = \"tb.example.com\"\n").unwrap();
        assert!(file.into_cloud_config(None, None).is_none());

        let file = ConfigFile::parse("[API]\nServer = \"tb.example.com\"\nToken = \"\"\n").unwrap();
        assert!(file.into_cloud_config(None, None).is_none());

        assert!(
            ConfigFile::default()
                .into_cloud_config(None, Some(DeviceToken::from("abc")))
                .is_none()
        );
    }

    #[test]
    fn it_rejects_malformed_files() {
        assert!(matches!(
            ConfigFile::parse("[API\nServer ="),
            Err(ConfigError::Parse(_))
        ));
        assert!(ConfigFile::parse("[API]\nServer = \"\"\n").is_err());
    }

    #[test]
    fn a_missing_file_yields_no_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let file = ConfigFile::from_file(&dir.path().join("nitroc.toml")).unwrap();
        assert!(file.into_cloud_config(None, None).is_none());
    }

    #[test]
    fn it_loads_files_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[API]\nServer = \"127.0.0.1:8080\"\nToken = \"xyz\"").unwrap();

        let config = ConfigFile::from_file(file.path())
            .unwrap()
            .into_cloud_config(None, None)
            .unwrap();
        assert_eq!(config.token.as_str(), "xyz");
    }
}
