//! Error handling for `eth` messages.

use crate::errors::P2PStreamError;
use alloy_rlp::Error as RlpError;

/// Errors when handling `eth` messages.
#[derive(thiserror::Error, Debug)]
pub enum EthStreamError {
    /// Error from the underlying p2p connection.
    #[error(transparent)]
    P2PStreamError(#[from] P2PStreamError),
    /// RLP decoding error.
    #[error(transparent)]
    Rlp(#[from] RlpError),
    /// The relative message id is not part of `eth/68`.
    #[error("unknown eth message id {0:#04x}")]
    UnknownMessageId(u8),
    /// A request does not carry the fields this node needs to answer it.
    #[error("malformed {0} message")]
    MalformedMessage(&'static str),
    /// No `Status` arrived within the configured timeout.
    #[error("status not received in time")]
    StatusTimeout,
}
