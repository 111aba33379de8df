//! Possible errors when interacting with the network.

use crate::node_record::NodeRecordParseError;
use relay_ecies::ECIESError;
use relay_eth_wire::errors::{EthStreamError, P2PStreamError};

/// All error variants for the network
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// General IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Failed to set up the handshake for an outbound connection.
    #[error(transparent)]
    Ecies(#[from] ECIESError),
    /// A configured node URL could not be parsed.
    #[error(transparent)]
    NodeRecord(#[from] NodeRecordParseError),
}

/// Errors that end or disturb a single peer session.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Handshake or frame authentication failed.
    #[error(transparent)]
    Ecies(#[from] ECIESError),
    /// Violation of the `p2p` base protocol.
    #[error(transparent)]
    P2P(#[from] P2PStreamError),
    /// Violation of the `eth` sub-protocol.
    #[error(transparent)]
    Eth(#[from] EthStreamError),
    /// The remote did not complete the handshake in time.
    #[error("handshake timed out")]
    HandshakeTimeout,
    /// The capability was not negotiated with the peer.
    #[error("capability {0} is not shared with the peer")]
    CapabilityNotShared(String),
}
