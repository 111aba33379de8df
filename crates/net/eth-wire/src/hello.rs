use crate::{
    capability::{Capability, Protocol},
    RELAY_CLIENT_VERSION,
};
use alloy_rlp::{Decodable, Header, RlpDecodableWrapper, RlpEncodable, RlpEncodableWrapper};
use relay_ecies::PeerId;
use std::fmt;

/// Default TCP port advertised when none is configured.
pub const DEFAULT_PORT: u16 = 30303;

/// The version of the `p2p` base protocol.
///
/// Remote hellos may carry any version. Only versions 5 and above switch on snappy compression.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    RlpEncodableWrapper,
    RlpDecodableWrapper,
)]
pub struct ProtocolVersion(pub u8);

impl ProtocolVersion {
    /// `p2p` version 4
    pub const V4: Self = Self(4);
    /// `p2p` version 5, adds snappy compression of all messages after hello
    pub const V5: Self = Self(5);

    /// Whether messages after hello are snappy compressed.
    pub const fn uses_compression(self) -> bool {
        self.0 >= Self::V5.0
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::V5
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// This is a superset of [`HelloMessage`] that provides additional protocol [`Protocol`]
/// information about the number of messages used by each capability in order to do proper
/// message ID multiplexing.
///
/// This type is required for the `p2p` handshake because the [`HelloMessage`] does not share the
/// number of messages used by each capability.
///
/// To get the encodable [`HelloMessage`] without the additional protocol information, use the
/// [`HelloMessageWithProtocols::message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloMessageWithProtocols {
    /// The version of the `p2p` protocol.
    pub protocol_version: ProtocolVersion,
    /// Specifies the client software identity, as a human-readable string (e.g.
    /// "Ethereum(++)/1.0.0").
    pub client_version: String,
    /// The list of supported capabilities and their versions.
    pub protocols: Vec<Protocol>,
    /// The port that the client is listening on, zero indicates the client is not listening.
    pub port: u16,
    /// The secp256k1 public key corresponding to the node's private key.
    pub id: PeerId,
}

impl HelloMessageWithProtocols {
    /// Starts a new `HelloMessageProtocolsBuilder`
    ///
    /// ```
    /// use relay_ecies::util::pk2id;
    /// use relay_eth_wire::HelloMessageWithProtocols;
    /// use secp256k1::{SecretKey, SECP256K1};
    /// let secret_key = SecretKey::new(&mut rand::thread_rng());
    /// let id = pk2id(&secret_key.public_key(SECP256K1));
    /// let status = HelloMessageWithProtocols::builder(id).build();
    /// ```
    pub const fn builder(id: PeerId) -> HelloMessageBuilder {
        HelloMessageBuilder::new(id)
    }

    /// Returns the raw [`HelloMessage`] without the additional protocol information.
    pub fn message(&self) -> HelloMessage {
        HelloMessage {
            protocol_version: self.protocol_version,
            client_version: self.client_version.clone(),
            capabilities: self.protocols.iter().map(|p| p.cap.clone()).collect(),
            port: self.port,
            id: self.id,
        }
    }
}

/// Raw rlpx protocol message used in the `p2p` handshake, containing information about the
/// supported RLPx protocol version and capabilities.
///
/// Decoding is lenient: elements after `id` are ignored, as EIP-8 asks, and a client version
/// that is not utf8 is read lossily.
///
/// See also <https://github.com/ethereum/devp2p/blob/master/rlpx.md#hello-0x00>
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable)]
pub struct HelloMessage {
    /// The version of the `p2p` protocol.
    pub protocol_version: ProtocolVersion,
    /// Specifies the client software identity, as a human-readable string (e.g.
    /// "Ethereum(++)/1.0.0").
    pub client_version: String,
    /// The list of supported capabilities and their versions.
    pub capabilities: Vec<Capability>,
    /// The port that the client is listening on, zero indicates the client is not listening.
    pub port: u16,
    /// The secp256k1 public key corresponding to the node's private key.
    pub id: PeerId,
}

impl HelloMessage {
    /// Starts a new `HelloMessageBuilder`
    ///
    /// ```
    /// use relay_ecies::util::pk2id;
    /// use relay_eth_wire::HelloMessage;
    /// use secp256k1::{SecretKey, SECP256K1};
    /// let secret_key = SecretKey::new(&mut rand::thread_rng());
    /// let id = pk2id(&secret_key.public_key(SECP256K1));
    /// let status = HelloMessage::builder(id).build();
    /// ```
    pub const fn builder(id: PeerId) -> HelloMessageBuilder {
        HelloMessageBuilder::new(id)
    }
}

impl Decodable for HelloMessage {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString)
        }
        let mut payload = &buf[..header.payload_length];
        let hello = Self {
            protocol_version: ProtocolVersion::decode(&mut payload)?,
            client_version: String::from_utf8_lossy(Header::decode_bytes(&mut payload, false)?)
                .into_owned(),
            capabilities: Decodable::decode(&mut payload)?,
            port: u16::decode(&mut payload)?,
            id: PeerId::decode(&mut payload)?,
        };
        *buf = &buf[header.payload_length..];
        Ok(hello)
    }
}

/// Builder for [`HelloMessageWithProtocols`]
#[derive(Debug)]
pub struct HelloMessageBuilder {
    /// The version of the `p2p` protocol.
    pub protocol_version: Option<ProtocolVersion>,
    /// Specifies the client software identity, as a human-readable string (e.g.
    /// "Ethereum(++)/1.0.0").
    pub client_version: Option<String>,
    /// The list of supported protocols.
    pub protocols: Option<Vec<Protocol>>,
    /// The port that the client is listening on, zero indicates the client is not listening.
    pub port: Option<u16>,
    /// The secp256k1 public key corresponding to the node's private key.
    pub id: PeerId,
}

impl HelloMessageBuilder {
    /// Create a new builder to configure a [`HelloMessage`]
    pub const fn new(id: PeerId) -> Self {
        Self { protocol_version: None, client_version: None, protocols: None, port: None, id }
    }

    /// Sets the port the client is listening on
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Adds a new protocol to use.
    pub fn protocol(mut self, protocol: impl Into<Protocol>) -> Self {
        self.protocols.get_or_insert_with(Vec::new).push(protocol.into());
        self
    }

    /// Sets protocols to use.
    pub fn protocols(mut self, protocols: impl IntoIterator<Item = Protocol>) -> Self {
        self.protocols.get_or_insert_with(Vec::new).extend(protocols);
        self
    }

    /// Sets client version.
    pub fn client_version(mut self, client_version: impl Into<String>) -> Self {
        self.client_version = Some(client_version.into());
        self
    }

    /// Sets protocol version.
    pub const fn protocol_version(mut self, protocol_version: ProtocolVersion) -> Self {
        self.protocol_version = Some(protocol_version);
        self
    }

    /// Consumes the type and returns the configured [`HelloMessageWithProtocols`]
    ///
    /// Unset fields will be set to their default values:
    /// - `protocol_version`: [`ProtocolVersion::V5`]
    /// - `client_version`: [`RELAY_CLIENT_VERSION`]
    /// - `protocols`: `eth/68`
    /// - `port`: [`DEFAULT_PORT`]
    pub fn build(self) -> HelloMessageWithProtocols {
        let Self { protocol_version, client_version, protocols, port, id } = self;
        HelloMessageWithProtocols {
            protocol_version: protocol_version.unwrap_or_default(),
            client_version: client_version.unwrap_or_else(|| RELAY_CLIENT_VERSION.to_string()),
            protocols: protocols.unwrap_or_else(|| vec![Protocol::eth_68()]),
            port: port.unwrap_or(DEFAULT_PORT),
            id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::P2PMessage;
    use alloy_rlp::{Encodable, EMPTY_STRING_CODE};
    use relay_ecies::util::pk2id;
    use secp256k1::{SecretKey, SECP256K1};

    fn hello() -> HelloMessage {
        let secret_key = SecretKey::new(&mut rand::thread_rng());
        let id = pk2id(&secret_key.public_key(SECP256K1));
        HelloMessage {
            protocol_version: ProtocolVersion::V5,
            client_version: "relay/0.1.0".to_string(),
            capabilities: vec![Capability::eth_68()],
            port: DEFAULT_PORT,
            id,
        }
    }

    /// Encodes the hello fields by hand, with a raw client version and extra trailing elements.
    fn encode_hello_fields(
        hello: &HelloMessage,
        client_version: &[u8],
        extra: &[u64],
    ) -> Vec<u8> {
        let payload_length = hello.protocol_version.length() +
            client_version.length() +
            hello.capabilities.length() +
            hello.port.length() +
            hello.id.length() +
            extra.iter().map(|value| value.length()).sum::<usize>();

        let mut encoded = Vec::new();
        Header { list: true, payload_length }.encode(&mut encoded);
        hello.protocol_version.encode(&mut encoded);
        client_version.encode(&mut encoded);
        hello.capabilities.encode(&mut encoded);
        hello.port.encode(&mut encoded);
        hello.id.encode(&mut encoded);
        for value in extra {
            value.encode(&mut encoded);
        }
        encoded
    }

    #[test]
    fn test_hello_encoding_round_trip() {
        let hello = P2PMessage::Hello(hello());

        let mut hello_encoded = Vec::new();
        hello.encode(&mut hello_encoded);

        let hello_decoded = P2PMessage::decode(&mut &hello_encoded[..]).unwrap();

        assert_eq!(hello, hello_decoded);
    }

    #[test]
    fn hello_encoding_length() {
        let hello = hello();
        assert_eq!(alloy_rlp::encode(&hello).len(), hello.length());
        assert_eq!(
            alloy_rlp::encode(&hello),
            encode_hello_fields(&hello, hello.client_version.as_bytes(), &[])
        );
    }

    #[test]
    fn hello_message_id_prefix() {
        // ensure that the hello message id is prefixed
        let hello = P2PMessage::Hello(hello());

        let mut hello_encoded = Vec::new();
        hello.encode(&mut hello_encoded);

        // zero is encoded as 0x80, the empty string code in RLP
        assert_eq!(hello_encoded[0], EMPTY_STRING_CODE);
    }

    #[test]
    fn trailing_hello_fields_are_ignored() {
        let hello = hello();
        let encoded = encode_hello_fields(&hello, hello.client_version.as_bytes(), &[0xdead, 7]);
        assert_eq!(alloy_rlp::decode_exact::<HelloMessage>(&encoded).unwrap(), hello);
    }

    #[test]
    fn any_protocol_version_is_accepted() {
        for version in [3u8, 4, 5, 6, 0x7f] {
            let hello = HelloMessage { protocol_version: ProtocolVersion(version), ..hello() };
            let decoded = alloy_rlp::decode_exact::<HelloMessage>(alloy_rlp::encode(&hello)).unwrap();
            assert_eq!(decoded.protocol_version.0, version);
            assert_eq!(decoded.protocol_version.uses_compression(), version >= 5);
        }
    }

    #[test]
    fn client_version_is_read_lossily() {
        let hello = hello();
        let encoded = encode_hello_fields(&hello, b"geth\xff/1.0", &[]);
        let decoded = alloy_rlp::decode_exact::<HelloMessage>(&encoded).unwrap();
        assert_eq!(decoded.client_version, "geth\u{fffd}/1.0");
        assert_eq!(decoded.id, hello.id);
    }

    #[test]
    fn builder_defaults() {
        let id = PeerId::repeat_byte(1);
        let hello = HelloMessageWithProtocols::builder(id).port(0).build();
        assert_eq!(hello.protocol_version, ProtocolVersion::V5);
        assert_eq!(hello.protocols, vec![Protocol::eth_68()]);
        assert_eq!(hello.message().capabilities, vec![Capability::eth_68()]);
        assert!(hello.protocol_version.uses_compression());
        assert!(!ProtocolVersion::V4.uses_compression());
    }
}
