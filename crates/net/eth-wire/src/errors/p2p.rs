//! Error handling for the `p2p` base protocol.

use crate::{capability::Capability, DisconnectReason};
use alloy_rlp::Error as RlpError;
use std::io;

/// Errors when sending/receiving p2p messages. These should result in kicking the peer.
#[derive(thiserror::Error, Debug)]
pub enum P2PStreamError {
    /// I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// RLP encoding/decoding error.
    #[error(transparent)]
    Rlp(#[from] RlpError),

    /// Error in compression/decompression of message data.
    #[error(transparent)]
    Snap(#[from] snap::Error),

    /// Error during the P2P handshake.
    #[error(transparent)]
    HandshakeError(#[from] P2PHandshakeError),

    /// Message size exceeds maximum length error.
    #[error("message size ({message_size}) exceeds max length ({max_size})")]
    MessageTooBig {
        /// The actual size of the message received.
        message_size: usize,
        /// The maximum allowed size for the message.
        max_size: usize,
    },

    /// Unknown reserved P2P message ID error.
    #[error("unknown reserved p2p message id: {0}")]
    UnknownReservedMessageId(u8),

    /// Empty protocol message received error.
    #[error("empty protocol message received")]
    EmptyProtocolMessage,

    /// A capability message id arrived before the remote hello.
    #[error("message id {0} received before hello")]
    MessageBeforeHello(u8),

    /// No negotiated capability owns the message id.
    #[error("message id {0} is not owned by any shared capability")]
    UnownedMessageId(u8),

    /// A capability tried to send a message id outside its reserved range.
    #[error("message id {id} is out of range for {cap} ({messages} messages)")]
    MessageIdOutOfRange {
        /// The capability sending the message.
        cap: Capability,
        /// Relative message id.
        id: u8,
        /// Number of reserved message ids.
        messages: u8,
    },

    /// Ping timeout error.
    #[error("ping timed out")]
    PingTimeout,

    /// Disconnected error.
    #[error("disconnected")]
    Disconnected(DisconnectReason),
}

impl P2PStreamError {
    /// Returns the [`DisconnectReason`] if it is the `Disconnected` variant.
    pub const fn as_disconnected(&self) -> Option<DisconnectReason> {
        let reason = match self {
            Self::HandshakeError(P2PHandshakeError::Disconnected(reason)) |
            Self::Disconnected(reason) => reason,
            _ => return None,
        };

        Some(*reason)
    }

    /// The disconnect reason to send when this error ends a session.
    pub const fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            Self::Io(_) => DisconnectReason::TcpSubsystemError,
            Self::HandshakeError(P2PHandshakeError::NoSharedCapabilities) => {
                DisconnectReason::UselessPeer
            }
            Self::HandshakeError(P2PHandshakeError::UnexpectedIdentity { .. }) => {
                DisconnectReason::InvalidIdentity
            }
            Self::PingTimeout => DisconnectReason::Timeout,
            _ => DisconnectReason::ProtocolBreach,
        }
    }
}

/// Errors when conducting a p2p handshake.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum P2PHandshakeError {
    /// Hello message received/sent outside of handshake error.
    #[error("hello message can only be recv/sent in handshake")]
    HelloNotInHandshake,

    /// Received a non-hello message when trying to handshake.
    #[error("received non-hello message when trying to handshake")]
    NonHelloMessageInHandshake,

    /// No capabilities shared with the peer.
    #[error("no capabilities shared with peer")]
    NoSharedCapabilities,

    /// The remote announced a node id other than the one dialed.
    #[error("unexpected identity in hello: expected {expected}, got {got}")]
    UnexpectedIdentity {
        /// The dialed node id.
        expected: alloy_primitives::B512,
        /// The id from the hello.
        got: alloy_primitives::B512,
    },

    /// Error indicating that the peer disconnected during the handshake.
    #[error("disconnected by peer: {0}")]
    Disconnected(DisconnectReason),

    /// Error decoding a message during the handshake.
    #[error("error decoding a message during handshake: {0}")]
    DecodeError(#[from] RlpError),
}
