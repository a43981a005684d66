use clap::Parser;
use std::path::PathBuf;

use crate::api::LocalAddress;
use crate::util::http::Uri;
use crate::util::types::DeviceToken;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/nitroc/cloud.toml";

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)] // read from Cargo.toml
pub struct Cli {
    /// Path of the cloud configuration file
    #[arg(
        env = "NITROC_CONFIG",
        long = "config",
        value_name = "path",
        default_value = DEFAULT_CONFIG_PATH
    )]
    pub config: PathBuf,

    /// Cloud server address, overrides the configuration file
    #[arg(env = "NITROC_CLOUD_SERVER", long = "cloud-server", value_name = "uri")]
    pub cloud_server: Option<Uri>,

    /// Device access token, overrides the configuration file
    #[arg(
        env = "NITROC_CLOUD_TOKEN",
        long = "cloud-token",
        value_name = "token"
    )]
    pub cloud_token: Option<DeviceToken>,

    /// Local API listen address
    #[arg(
        env = "NITROC_LOCAL_API_ADDRESS",
        long = "local-api-address",
        value_name = "addr"
    )]
    pub local_api_address: Option<LocalAddress>,

    /// Do not start reporting until enabled through the local API
    #[arg(long = "no-autostart")]
    pub no_autostart: bool,
}

pub fn parse() -> Cli {
    Parser::parse()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn it_uses_defaults_without_arguments() {
        let cli = Cli::try_parse_from(["nitroc"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(cli.local_api_address.is_none());
        assert!(!cli.no_autostart);
    }

    #[test]
    fn it_parses_cloud_overrides() {
        let cli = Cli::try_parse_from([
            "nitroc",
            "--cloud-server",
            "http://things.example.com:8080",
            "--cloud-token",
            "A1_TEST_TOKEN",
            "--local-api-address",
            "/run/nitroc.sock",
        ])
        .unwrap();

        assert_eq!(
            cli.cloud_server.as_ref().and_then(|s| s.host()),
            Some("things.example.com")
        );
        assert_eq!(
            cli.cloud_token.map(String::from),
            Some("A1_TEST_TOKEN".to_owned())
        );
        assert!(matches!(cli.local_api_address, Some(LocalAddress::Unix(_))));
    }
}
