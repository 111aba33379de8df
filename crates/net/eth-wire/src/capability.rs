//! All capability related types and the negotiation of shared capabilities.

use crate::{eth::ETH_68_MESSAGES, p2p::MAX_RESERVED_MESSAGE_ID};
use alloy_rlp::{RlpDecodable, RlpEncodable};
use std::{borrow::Cow, fmt};

/// A message indicating a supported capability and capability version.
#[derive(Clone, Debug, PartialEq, Eq, Hash, RlpEncodable, RlpDecodable)]
pub struct Capability {
    /// The name of the subprotocol
    pub name: Cow<'static, str>,
    /// The version of the subprotocol
    pub version: usize,
}

impl Capability {
    /// Create a new `Capability` with the given name and version.
    pub const fn new(name: String, version: usize) -> Self {
        Self { name: Cow::Owned(name), version }
    }

    /// Create a new `Capability` with the given static name and version.
    pub const fn new_static(name: &'static str, version: usize) -> Self {
        Self { name: Cow::Borrowed(name), version }
    }

    /// Returns the `eth/68` capability.
    pub const fn eth_68() -> Self {
        Self::new_static("eth", 68)
    }

    /// Whether this is any eth version.
    pub fn is_eth(&self) -> bool {
        self.name == "eth"
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

/// The closed set of sub-protocol implementations a negotiated capability can be served by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    /// The `eth` gossip protocol.
    Eth,
    /// Messages are handed to the application untouched.
    Raw,
}

/// A locally supported protocol: the advertised [`Capability`] plus the number of message ids it
/// reserves.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Protocol {
    /// The name of the subprotocol
    pub cap: Capability,
    /// The number of messages used/reserved by this protocol
    ///
    /// This is used for message ID multiplexing
    pub messages: u8,
    /// Implementation that serves the protocol once negotiated.
    pub kind: ProtocolKind,
}

impl Protocol {
    /// Create a new protocol with the given name, version and message count.
    pub const fn new(cap: Capability, messages: u8, kind: ProtocolKind) -> Self {
        Self { cap, messages, kind }
    }

    /// Returns the `eth/68` protocol.
    pub const fn eth_68() -> Self {
        Self::new(Capability::eth_68(), ETH_68_MESSAGES, ProtocolKind::Eth)
    }

    /// Returns a protocol whose messages are forwarded to the application.
    pub const fn raw(cap: Capability, messages: u8) -> Self {
        Self::new(cap, messages, ProtocolKind::Raw)
    }
}

impl From<Protocol> for Capability {
    fn from(protocol: Protocol) -> Self {
        protocol.cap
    }
}

/// A capability shared with the remote and the absolute message id range assigned to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedCapability {
    /// The locally configured protocol.
    pub protocol: Protocol,
    /// First absolute message id of the protocol.
    pub offset: u8,
}

impl SharedCapability {
    /// The capability name.
    pub fn name(&self) -> &str {
        &self.protocol.cap.name
    }

    /// The negotiated version.
    pub const fn version(&self) -> usize {
        self.protocol.cap.version
    }

    /// Number of reserved message ids.
    pub const fn messages(&self) -> u8 {
        self.protocol.messages
    }

    /// Returns true if the absolute message id falls into this capability's range.
    pub const fn owns(&self, message_id: u8) -> bool {
        message_id >= self.offset && message_id - self.offset < self.protocol.messages
    }
}

/// Computes the capabilities shared with the remote and assigns their message id offsets.
///
/// Only exact name and version matches count. For each name the highest shared version is kept,
/// the first match wins on ties. The result is sorted by name and offsets start right after the
/// reserved `p2p` range, so both peers derive the same table independently.
pub fn shared_capabilities(local: &[Protocol], remote: &[Capability]) -> Vec<SharedCapability> {
    let mut shared: Vec<&Protocol> = Vec::new();
    for cap in remote {
        let Some(protocol) = local.iter().find(|p| p.cap == *cap) else { continue };
        match shared.iter_mut().find(|existing| existing.cap.name == protocol.cap.name) {
            Some(existing) if existing.cap.version < protocol.cap.version => *existing = protocol,
            Some(_) => {}
            None => shared.push(protocol),
        }
    }
    shared.sort_by(|a, b| a.cap.name.cmp(&b.cap.name));

    let mut offset = MAX_RESERVED_MESSAGE_ID + 1;
    shared
        .into_iter()
        .map(|protocol| {
            let cap = SharedCapability { protocol: protocol.clone(), offset };
            offset = offset.saturating_add(protocol.messages);
            cap
        })
        .collect()
}
