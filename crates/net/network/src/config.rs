//! Network config support

use crate::{error::NetworkError, node_record::NodeRecord};
use relay_config::NetworkSection;
use relay_ecies::{algorithm::HandshakeVariant, util::pk2id, PeerId};
use relay_eth_wire::{HelloMessageWithProtocols, Protocol};
use secp256k1::{SecretKey, SECP256K1};
use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    time::Duration,
};

/// reexports for convenience
#[doc(hidden)]
mod __reexport {
    pub use secp256k1::SecretKey;
}
pub use __reexport::*;

/// The default port for RLPx connections.
pub const DEFAULT_RLPX_PORT: u16 = relay_config::config::DEFAULT_RLPX_PORT;

/// Convenience function to create a new random [`SecretKey`]
pub fn rng_secret_key() -> SecretKey {
    SecretKey::new(&mut rand::thread_rng())
}

/// Liveness settings applied to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Interval between two pings once the session is established.
    pub ping_interval: Duration,
    /// How long to wait for a pong before disconnecting.
    pub ping_timeout: Duration,
    /// Deadline for the remote hello, counted from connection start.
    pub handshake_timeout: Duration,
    /// Deadline for the `eth` status, counted from session establishment.
    pub status_timeout: Duration,
    /// How long the transport stays open after a disconnect was sent.
    pub disconnect_grace: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(15),
            ping_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            status_timeout: Duration::from_secs(5),
            disconnect_grace: Duration::from_secs(2),
        }
    }
}

impl From<&NetworkSection> for SessionTimeouts {
    fn from(section: &NetworkSection) -> Self {
        Self {
            ping_interval: section.ping_interval,
            ping_timeout: section.ping_timeout,
            handshake_timeout: section.handshake_timeout,
            status_timeout: section.status_timeout,
            disconnect_grace: section.disconnect_grace,
        }
    }
}

/// All network related initialization settings.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// The node's secret key, from which the node's identity is derived.
    pub secret_key: SecretKey,
    /// Where to listen for incoming connections.
    pub listener_addr: SocketAddr,
    /// The `p2p` hello sent on every connection, including the locally supported protocols.
    pub hello_message: HelloMessageWithProtocols,
    /// Nodes to dial once the listener is up.
    pub boot_nodes: Vec<NodeRecord>,
    /// Auth layout used when dialing.
    pub handshake_variant: HandshakeVariant,
    /// Session liveness settings.
    pub timeouts: SessionTimeouts,
}

// === impl NetworkConfig ===

impl NetworkConfig {
    /// Create a new instance with all mandatory fields set, rest is field with defaults.
    pub fn new(secret_key: SecretKey) -> Self {
        Self::builder(secret_key).build()
    }

    /// Convenience method for creating the corresponding builder type
    pub fn builder(secret_key: SecretKey) -> NetworkConfigBuilder {
        NetworkConfigBuilder::new(secret_key)
    }

    /// Creates the config from the `[network]` section of the configuration file.
    pub fn from_section(
        secret_key: SecretKey,
        section: &NetworkSection,
    ) -> Result<Self, NetworkError> {
        let boot_nodes = section
            .boot_nodes
            .iter()
            .map(|url| url.parse::<NodeRecord>())
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = Self::builder(secret_key)
            .listener_addr(section.listen_addr)
            .boot_nodes(boot_nodes)
            .timeouts(SessionTimeouts::from(section));
        if let Some(client_version) = &section.client_version {
            builder = builder.client_version(client_version.clone());
        }
        if section.legacy_handshake {
            builder = builder.handshake_variant(HandshakeVariant::Legacy);
        }
        Ok(builder.build())
    }

    /// Sets the address for the incoming connection listener.
    pub const fn set_listener_addr(mut self, listener_addr: SocketAddr) -> Self {
        self.listener_addr = listener_addr;
        self
    }

    /// The node id derived from the secret key.
    pub fn local_id(&self) -> PeerId {
        self.hello_message.id
    }
}

/// Builder for [`NetworkConfig`](struct.NetworkConfig.html).
#[derive(Debug)]
pub struct NetworkConfigBuilder {
    /// The node's secret key, from which the node's identity is derived.
    secret_key: SecretKey,
    /// Listener address, `0.0.0.0:30303` by default.
    listener_addr: Option<SocketAddr>,
    /// Client version advertised in the hello.
    client_version: Option<String>,
    /// Locally supported protocols, `eth/68` by default.
    protocols: Vec<Protocol>,
    /// Nodes to dial once the listener is up.
    boot_nodes: Vec<NodeRecord>,
    /// Auth layout used when dialing.
    handshake_variant: HandshakeVariant,
    /// Session liveness settings.
    timeouts: SessionTimeouts,
}

// === impl NetworkConfigBuilder ===

#[allow(missing_docs)]
impl NetworkConfigBuilder {
    pub fn new(secret_key: SecretKey) -> Self {
        Self {
            secret_key,
            listener_addr: None,
            client_version: None,
            protocols: vec![Protocol::eth_68()],
            boot_nodes: Vec::new(),
            handshake_variant: HandshakeVariant::default(),
            timeouts: SessionTimeouts::default(),
        }
    }

    /// Returns the configured [`PeerId`]
    pub fn get_peer_id(&self) -> PeerId {
        pk2id(&self.secret_key.public_key(SECP256K1))
    }

    /// Sets the socket address the listener binds to.
    pub const fn listener_addr(mut self, listener_addr: SocketAddr) -> Self {
        self.listener_addr = Some(listener_addr);
        self
    }

    /// Sets the client version advertised in the hello.
    pub fn client_version(mut self, client_version: impl Into<String>) -> Self {
        self.client_version = Some(client_version.into());
        self
    }

    /// Replaces the locally supported protocols.
    pub fn protocols(mut self, protocols: impl IntoIterator<Item = Protocol>) -> Self {
        self.protocols = protocols.into_iter().collect();
        self
    }

    /// Adds a locally supported protocol.
    pub fn add_protocol(mut self, protocol: Protocol) -> Self {
        self.protocols.push(protocol);
        self
    }

    /// Sets the boot nodes.
    pub fn boot_nodes(mut self, nodes: impl IntoIterator<Item = NodeRecord>) -> Self {
        self.boot_nodes = nodes.into_iter().collect();
        self
    }

    /// Sets the auth layout used when dialing.
    pub const fn handshake_variant(mut self, variant: HandshakeVariant) -> Self {
        self.handshake_variant = variant;
        self
    }

    /// Sets the session liveness settings.
    pub const fn timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Consumes the type and creates the actual [`NetworkConfig`].
    pub fn build(self) -> NetworkConfig {
        let peer_id = self.get_peer_id();
        let Self {
            secret_key,
            listener_addr,
            client_version,
            protocols,
            boot_nodes,
            handshake_variant,
            timeouts,
        } = self;

        let listener_addr = listener_addr.unwrap_or_else(|| {
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_RLPX_PORT))
        });

        let mut hello = HelloMessageWithProtocols::builder(peer_id)
            .protocols(protocols)
            .port(listener_addr.port());
        if let Some(client_version) = client_version {
            hello = hello.client_version(client_version);
        }

        NetworkConfig {
            secret_key,
            listener_addr,
            hello_message: hello.build(),
            boot_nodes,
            handshake_variant,
            timeouts,
        }
    }
}
