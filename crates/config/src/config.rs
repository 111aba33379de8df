//! Configuration files.

use serde::{Deserialize, Serialize};
use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    path::Path,
    time::Duration,
};

/// The default port for RLPx connections.
pub const DEFAULT_RLPX_PORT: u16 = 30303;

/// Configuration for the relay node.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct Config {
    /// Configuration for the RLPx listener and its sessions.
    pub network: NetworkSection,
}

impl Config {
    /// Loads the config from `path`, writing the default config there if the file does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, confy::ConfyError> {
        confy::load_path(path)
    }

    /// Writes the config to `path` as TOML.
    pub fn store(&self, path: impl AsRef<Path>) -> Result<(), confy::ConfyError> {
        confy::store_path(path, self)
    }
}

/// Listener and session settings.
///
/// Durations are written in humantime form, for example `15s` or `1m 30s`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct NetworkSection {
    /// Address to listen for incoming connections.
    pub listen_addr: SocketAddr,
    /// Client version sent in the hello message. The built-in version when unset.
    pub client_version: Option<String>,
    /// Whether outbound handshakes use the pre-EIP-8 auth layout.
    pub legacy_handshake: bool,
    /// Nodes to dial on startup, as `enode://` URLs.
    pub boot_nodes: Vec<String>,
    /// Interval between two pings on an established session.
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
    /// How long to wait for a pong.
    #[serde(with = "humantime_serde")]
    pub ping_timeout: Duration,
    /// How long the remote has to complete the handshake, up to and including its hello.
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    /// How long an `eth` peer has to send its status after the session is established.
    #[serde(with = "humantime_serde")]
    pub status_timeout: Duration,
    /// How long to keep the transport open after sending a disconnect.
    #[serde(with = "humantime_serde")]
    pub disconnect_grace: Duration,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_RLPX_PORT)),
            client_version: None,
            legacy_handshake: false,
            boot_nodes: Vec::new(),
            ping_interval: Duration::from_secs(15),
            ping_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            status_timeout: Duration::from_secs(5),
            disconnect_grace: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENSION: &str = "toml";

    fn with_tempdir(filename: &str, proc: fn(&std::path::Path)) {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join(filename).with_extension(EXTENSION);

        proc(&config_path);

        temp_dir.close().unwrap()
    }

    #[test]
    fn test_store_config() {
        with_tempdir("config-store-test", |config_path| {
            let config = Config::default();
            config.store(config_path).unwrap();
            assert!(config_path.exists());
        })
    }

    #[test]
    fn test_load_config() {
        with_tempdir("config-load-test", |config_path| {
            let mut config = Config::default();
            config.network.ping_interval = Duration::from_secs(30);
            config.network.boot_nodes.push(format!("enode://{}@127.0.0.1:30303", "ab".repeat(64)));
            config.store(config_path).unwrap();

            let loaded_config = Config::load_or_default(config_path).unwrap();
            assert_eq!(config, loaded_config);
        })
    }

    #[test]
    fn missing_file_yields_default() {
        with_tempdir("config-missing-test", |config_path| {
            let loaded = Config::load_or_default(config_path).unwrap();
            assert_eq!(loaded, Config::default());
        })
    }

    #[test]
    fn durations_are_human_readable() {
        let toml = toml::to_string(&Config::default()).unwrap();
        assert!(toml.contains("ping_interval = \"15s\""));
        assert!(toml.contains("disconnect_grace = \"2s\""));

        let partial: Config = toml::from_str("[network]\nstatus_timeout = \"1m 30s\"\n").unwrap();
        assert_eq!(partial.network.status_timeout, Duration::from_secs(90));
        assert_eq!(partial.network.ping_timeout, Duration::from_secs(10));
    }
}
