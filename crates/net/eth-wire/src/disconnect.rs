//! Disconnect

use alloy_rlp::{
    BufMut, Decodable, Encodable, Error as RlpError, Header, EMPTY_LIST_CODE, EMPTY_STRING_CODE,
};
use bytes::Buf;
use std::fmt::Display;

/// RLPx disconnect reason.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// Disconnect requested by the local node or remote peer.
    #[default]
    DisconnectRequested = 0x00,
    /// TCP related error
    TcpSubsystemError = 0x01,
    /// Breach of protocol at the transport or p2p level
    ProtocolBreach = 0x02,
    /// Node has no matching protocols.
    UselessPeer = 0x03,
    /// Either the remote or local node has too many peers.
    TooManyPeers = 0x04,
    /// Already connected to the peer.
    AlreadyConnected = 0x05,
    /// `p2p` protocol version is incompatible
    IncompatibleP2PProtocolVersion = 0x06,
    /// Hello carried a node identity other than the expected one.
    InvalidIdentity = 0x07,
    /// Local or remote client is shutting down.
    ClientQuitting = 0x08,
    /// Unexpected identity in handshake.
    UnexpectedIdentity = 0x09,
    /// The node is connected to itself
    ConnectedToSelf = 0x0a,
    /// Peer or local node did not respond to a ping, or the handshake stalled.
    Timeout = 0x0b,
    /// Peer or local node violated a subprotocol-specific rule.
    SubprotocolSpecific = 0x10,
}

impl DisconnectReason {
    /// All known reasons, in code order.
    pub const ALL: [Self; 13] = [
        Self::DisconnectRequested,
        Self::TcpSubsystemError,
        Self::ProtocolBreach,
        Self::UselessPeer,
        Self::TooManyPeers,
        Self::AlreadyConnected,
        Self::IncompatibleP2PProtocolVersion,
        Self::InvalidIdentity,
        Self::ClientQuitting,
        Self::UnexpectedIdentity,
        Self::ConnectedToSelf,
        Self::Timeout,
        Self::SubprotocolSpecific,
    ];
}

impl Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            Self::DisconnectRequested => "Disconnect requested",
            Self::TcpSubsystemError => "TCP sub-system error",
            Self::ProtocolBreach => "Breach of protocol, e.g. a malformed message, bad RLP, ...",
            Self::UselessPeer => "Useless peer",
            Self::TooManyPeers => "Too many peers",
            Self::AlreadyConnected => "Already connected",
            Self::IncompatibleP2PProtocolVersion => "Incompatible P2P protocol version",
            Self::InvalidIdentity => "Invalid node identity",
            Self::ClientQuitting => "Client quitting",
            Self::UnexpectedIdentity => "Unexpected identity in handshake",
            Self::ConnectedToSelf => "Identity is the same as this node (i.e. connected to itself)",
            Self::Timeout => "Timeout",
            Self::SubprotocolSpecific => "Some other reason specific to a subprotocol",
        };

        f.write_str(message)
    }
}

/// This represents an unknown disconnect reason with the given code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown disconnect reason: {0}")]
pub struct UnknownDisconnectReason(pub u8);

impl TryFrom<u8> for DisconnectReason {
    // This error type should not be used to crash the node, but rather to log the error and
    // disconnect the peer.
    type Error = UnknownDisconnectReason;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|reason| *reason as u8 == value)
            .ok_or(UnknownDisconnectReason(value))
    }
}

/// The [`Encodable`] implementation for [`DisconnectReason`] encodes the disconnect reason in a
/// single-element RLP list.
impl Encodable for DisconnectReason {
    fn encode(&self, out: &mut dyn BufMut) {
        vec![*self as u8].encode(out);
    }

    fn length(&self) -> usize {
        vec![*self as u8].length()
    }
}

/// The [`Decodable`] implementation for [`DisconnectReason`] supports either a disconnect reason
/// encoded a single byte or a RLP list containing the disconnect reason.
impl Decodable for DisconnectReason {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        if buf.is_empty() {
            return Err(RlpError::InputTooShort)
        }

        if buf[0] >= EMPTY_LIST_CODE {
            let header = Header::decode(buf)?;
            if header.payload_length == 0 {
                // an empty list carries no reason
                return Ok(Self::DisconnectRequested)
            }
            if header.payload_length != 1 {
                return Err(RlpError::ListLengthMismatch {
                    expected: 1,
                    got: header.payload_length,
                })
            }
        }

        let reason = match buf[0] {
            // the empty string encodes zero
            EMPTY_STRING_CODE => 0,
            code if code < EMPTY_STRING_CODE => code,
            _ => return Err(RlpError::Custom("invalid disconnect reason encoding")),
        };
        buf.advance(1);
        Self::try_from(reason).map_err(|_| RlpError::Custom("unknown disconnect reason"))
    }
}
