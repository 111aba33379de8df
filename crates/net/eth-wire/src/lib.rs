//! Implementation of the devp2p base (`p2p`) protocol messages, capability negotiation and the
//! `eth` wire types relayed by this node.

pub mod block;
pub mod capability;
mod disconnect;
pub mod errors;
pub mod eth;
mod hello;
mod item;
mod p2p;

pub use crate::{
    capability::{Capability, Protocol, ProtocolKind, SharedCapability},
    disconnect::{DisconnectReason, UnknownDisconnectReason},
    hello::{HelloMessage, HelloMessageBuilder, HelloMessageWithProtocols, ProtocolVersion},
    item::{RlpItem, MAX_RLP_DEPTH},
    p2p::{
        compress, decode_message_id, decompress, P2PMessage, P2PMessageID, MAX_PAYLOAD_SIZE,
        MAX_RESERVED_MESSAGE_ID,
    },
};

/// Client version advertised in the hello message unless configured otherwise.
pub const RELAY_CLIENT_VERSION: &str = concat!("relay/v", env!("CARGO_PKG_VERSION"));
