//! Command-line and environment configuration.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 9474;

/// Data directory used when none is given.
const DEFAULT_DATA_DIR: &str = "./designer-data";

/// Command-line arguments. Every flag can also be set from the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "touch-designer", version, about = "ESPHome touch panel designer service")]
pub struct ServerArgs {
    /// Address to bind.
    #[arg(long, env = "DESIGNER_BIND", default_value = "127.0.0.1")]
    pub bind: IpAddr,

    /// Port to listen on.
    #[arg(long, env = "DESIGNER_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory for devices, assets and user recipes.
    #[arg(long, env = "DESIGNER_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Where generated configurations are written. Defaults to `<data-dir>/esphome`.
    #[arg(long, env = "DESIGNER_DEPLOY_DIR")]
    pub deploy_dir: Option<PathBuf>,

    /// Directory of widget schema overrides.
    #[arg(long, env = "DESIGNER_SCHEMAS_DIR")]
    pub schemas_dir: Option<PathBuf>,

    /// Home Assistant base URL.
    #[arg(long, env = "HA_URL")]
    pub ha_url: Option<String>,

    /// Home Assistant long-lived access token.
    #[arg(long, env = "HA_TOKEN", hide_env_values = true)]
    pub ha_token: Option<String>,
}

/// Home Assistant connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeAssistantConfig {
    /// Base URL, e.g. `http://homeassistant.local:8123`.
    pub url: String,
    /// Bearer token.
    pub token: String,
}

/// Resolved server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listen address.
    pub addr: SocketAddr,
    /// Root data directory.
    pub data_dir: PathBuf,
    /// Artifact and deploy record directory.
    pub deploy_dir: PathBuf,
    /// Optional schema override directory.
    pub schemas_dir: Option<PathBuf>,
    /// Capability lookups are deferred when absent.
    pub home_assistant: Option<HomeAssistantConfig>,
}

impl ServerConfig {
    /// Configuration rooted at `data_dir` with defaults for everything else.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            deploy_dir: data_dir.join("esphome"),
            data_dir,
            schemas_dir: None,
            home_assistant: None,
        }
    }

    /// Device persistence directory.
    #[must_use]
    pub fn devices_dir(&self) -> PathBuf {
        self.data_dir.join("devices")
    }

    /// Uploaded asset directory.
    #[must_use]
    pub fn assets_dir(&self) -> PathBuf {
        self.data_dir.join("assets")
    }

    /// User recipe directory.
    #[must_use]
    pub fn recipes_dir(&self) -> PathBuf {
        self.data_dir.join("recipes")
    }
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> Self {
        let deploy_dir = args
            .deploy_dir
            .unwrap_or_else(|| args.data_dir.join("esphome"));
        // A URL without a token (or the reverse) leaves the resolver unconfigured.
        let home_assistant = match (args.ha_url, args.ha_token) {
            (Some(url), Some(token)) if !url.trim().is_empty() && !token.trim().is_empty() => {
                Some(HomeAssistantConfig { url, token })
            }
            _ => None,
        };
        Self {
            addr: SocketAddr::new(args.bind, args.port),
            data_dir: args.data_dir,
            deploy_dir,
            schemas_dir: args.schemas_dir,
            home_assistant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ServerArgs {
        let mut argv = vec!["touch-designer"];
        argv.extend_from_slice(args);
        ServerArgs::try_parse_from(argv).expect("should parse")
    }

    #[test]
    fn test_deploy_dir_defaults_under_data_dir() {
        let config = ServerConfig::from(parse(&["--data-dir", "/srv/designer", "--port", "8080"]));
        assert_eq!(config.deploy_dir, PathBuf::from("/srv/designer/esphome"));
        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.devices_dir(), PathBuf::from("/srv/designer/devices"));
    }

    #[test]
    fn test_explicit_deploy_dir_wins() {
        let config = ServerConfig::from(parse(&[
            "--data-dir",
            "/srv/designer",
            "--deploy-dir",
            "/config/esphome",
        ]));
        assert_eq!(config.deploy_dir, PathBuf::from("/config/esphome"));
    }

    #[test]
    fn test_home_assistant_needs_url_and_token() {
        let only_url = ServerConfig::from(parse(&["--ha-url", "http://ha.local:8123"]));
        assert!(only_url.home_assistant.is_none());

        let both = ServerConfig::from(parse(&[
            "--ha-url",
            "http://ha.local:8123",
            "--ha-token",
            "secret",
        ]));
        assert_eq!(
            both.home_assistant,
            Some(HomeAssistantConfig {
                url: "http://ha.local:8123".into(),
                token: "secret".into(),
            })
        );
    }

    #[test]
    fn test_invalid_bind_rejected() {
        let result = ServerArgs::try_parse_from(["touch-designer", "--bind", "not-an-ip"]);
        assert!(result.is_err());
    }
}
