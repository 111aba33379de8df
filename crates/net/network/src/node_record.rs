//! `enode://` URLs identifying a node by its public key and TCP address.

use relay_ecies::{util::pk2id, PeerId};
use secp256k1::{SecretKey, SECP256K1};
use std::{
    fmt::{self, Write},
    net::{IpAddr, SocketAddr},
    num::ParseIntError,
    str::FromStr,
};
use url::{Host, Url};

/// A node that accepts RLPx connections.
///
/// Parsed from and displayed as `enode://<hex id>@<ip>:<port>[?discport=<udp port>]`. The
/// discovery port is only carried along, this node does not run discovery.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct NodeRecord {
    /// The IP address of the node.
    pub address: IpAddr,
    /// TCP port that accepts RLPx connections.
    pub tcp_port: u16,
    /// UDP discovery port.
    pub udp_port: u16,
    /// Public key of the node.
    pub id: PeerId,
}

impl NodeRecord {
    /// Creates a new record from a socket addr and peer id.
    pub const fn new(addr: SocketAddr, id: PeerId) -> Self {
        Self { address: addr.ip(), tcp_port: addr.port(), udp_port: addr.port(), id }
    }

    /// Derive the [`NodeRecord`] from the secret key and addr
    pub fn from_secret_key(addr: SocketAddr, sk: &SecretKey) -> Self {
        Self::new(addr, pk2id(&sk.public_key(SECP256K1)))
    }

    /// The TCP address to dial.
    pub const fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.tcp_port)
    }
}

impl fmt::Display for NodeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("enode://")?;
        alloy_primitives::hex::encode(self.id.as_slice()).fmt(f)?;
        f.write_char('@')?;
        self.tcp_addr().fmt(f)?;
        if self.tcp_port != self.udp_port {
            f.write_str("?discport=")?;
            self.udp_port.fmt(f)?;
        }
        Ok(())
    }
}

/// Possible error types when parsing a [`NodeRecord`]
#[derive(Debug, thiserror::Error)]
pub enum NodeRecordParseError {
    /// Invalid url
    #[error("Failed to parse url: {0}")]
    InvalidUrl(String),
    /// Invalid id
    #[error("Failed to parse id: {0}")]
    InvalidId(String),
    /// Invalid discport
    #[error("Failed to parse discport query: {0}")]
    Discport(ParseIntError),
}

impl FromStr for NodeRecord {
    type Err = NodeRecordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("enode://")
            .ok_or_else(|| NodeRecordParseError::InvalidUrl("missing enode:// scheme".to_string()))?;

        // the enode scheme would make the parser treat the host as opaque, which rejects ipv4
        let url = Url::parse(&format!("http://{rest}"))
            .map_err(|e| NodeRecordParseError::InvalidUrl(e.to_string()))?;

        let address = match url.host() {
            Some(Host::Ipv4(ip)) => IpAddr::V4(ip),
            Some(Host::Ipv6(ip)) => IpAddr::V6(ip),
            Some(Host::Domain(domain)) => {
                return Err(NodeRecordParseError::InvalidUrl(format!("{domain} is not an ip address")))
            }
            None => return Err(NodeRecordParseError::InvalidUrl("no host specified".to_string())),
        };

        let tcp_port = url
            .port()
            .ok_or_else(|| NodeRecordParseError::InvalidUrl("no port specified".to_string()))?;

        let udp_port = if let Some(discovery_port) = url
            .query_pairs()
            .find_map(|(maybe_disc, port)| (maybe_disc.as_ref() == "discport").then_some(port))
        {
            discovery_port.parse::<u16>().map_err(NodeRecordParseError::Discport)?
        } else {
            tcp_port
        };

        let id = url
            .username()
            .parse::<PeerId>()
            .map_err(|e| NodeRecordParseError::InvalidId(e.to_string()))?;

        Ok(Self { address, tcp_port, udp_port, id })
    }
}
