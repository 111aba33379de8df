//! RLPx ECIES handshake and framed transport.
//!
//! [`ECIES`](algorithm::ECIES) holds the cryptographic session of one connection and
//! [`ECIESCodec`] drives it over a byte stream.

pub mod algorithm;
pub mod mac;
pub mod util;

mod error;
pub use error::{ECIESError, ECIESErrorImpl};

mod codec;
pub use codec::{ECIESCodec, ECIESState};

use alloy_primitives::B512;
use bytes::{Bytes, BytesMut};

/// Node identity: the uncompressed secp256k1 public key without its `0x04` prefix.
pub type PeerId = B512;

/// Raw egress values for an ECIES protocol
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EgressECIESValue {
    /// The AUTH message being sent out
    Auth,
    /// The ACK message being sent out
    Ack,
    /// The message being sent out (wrapped bytes)
    Message(Bytes),
}

/// Raw ingress values for an ECIES protocol
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngressECIESValue {
    /// Receiving a message from a [`PeerId`]
    AuthReceive(PeerId),
    /// Receiving an ACK message
    Ack,
    /// Receiving a message
    Message(BytesMut),
}
