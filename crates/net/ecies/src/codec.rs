use crate::{
    algorithm::{HandshakeVariant, ACK_LEGACY_LEN, AUTH_LEGACY_LEN, ECIES},
    ECIESError, ECIESErrorImpl, EgressECIESValue, IngressECIESValue, PeerId,
};
use bytes::BytesMut;
use secp256k1::SecretKey;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{instrument, trace};

/// Tokio codec for ECIES
#[derive(Debug)]
pub struct ECIESCodec {
    ecies: ECIES,
    state: ECIESState,
    variant: HandshakeVariant,
}

/// Current ECIES state of a connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ECIESState {
    /// The first stage of the ECIES handshake, where each side of the connection sends an auth
    /// message containing the ephemeral public key, signature of the public key, nonce, and other
    /// metadata.
    Auth,

    /// The second stage of the ECIES handshake, where each side of the connection sends an ack
    /// message containing the nonce and other metadata.
    Ack,

    /// The third stage of the ECIES handshake, where header is parsed, message integrity checks
    /// performed, and message is decrypted.
    Header,

    /// The final stage, where the ECIES message is actually read and returned by the ECIES codec.
    Body,
}

impl ECIESCodec {
    /// Create a new server codec using the given secret key
    pub fn new_server(secret_key: SecretKey) -> Self {
        Self::server(ECIES::new_server(secret_key))
    }

    /// Create a new client codec using the given secret key and the server's public id
    pub fn new_client(secret_key: SecretKey, remote_id: PeerId) -> Result<Self, ECIESError> {
        Ok(Self::client(ECIES::new_client(secret_key, remote_id)?, HandshakeVariant::Eip8))
    }

    /// Wraps a responder session. The handshake variant is detected from the received auth.
    pub fn server(ecies: ECIES) -> Self {
        Self { ecies, state: ECIESState::Auth, variant: HandshakeVariant::Eip8 }
    }

    /// Wraps an initiator session that sends its auth in the given variant.
    pub fn client(ecies: ECIES, variant: HandshakeVariant) -> Self {
        Self { ecies, state: ECIESState::Ack, variant }
    }

    /// The byte-stream phase the codec is in.
    pub const fn state(&self) -> ECIESState {
        self.state
    }

    /// The handshake variant in use.
    pub const fn variant(&self) -> HandshakeVariant {
        self.variant
    }

    /// The remote node id, once known.
    pub const fn remote_id(&self) -> Option<PeerId> {
        self.ecies.remote_id()
    }

    /// Returns true once frames can be written.
    pub const fn is_frame_ready(&self) -> bool {
        self.ecies.is_frame_ready()
    }

    /// Number of buffered bytes the current phase needs before it can make progress.
    ///
    /// In the auth phase a leading `0x04` marks a legacy auth of fixed size, anything else is the
    /// EIP-8 size prefix. Until two bytes are buffered the legacy size is reported.
    pub fn next_expected_len(&self, buf: &[u8]) -> usize {
        match self.state {
            ECIESState::Auth => match buf {
                [first, second, ..] if *first != 0x04 => {
                    2 + u16::from_be_bytes([*first, *second]) as usize
                }
                _ => AUTH_LEGACY_LEN,
            },
            ECIESState::Ack => match self.variant {
                HandshakeVariant::Legacy => ACK_LEGACY_LEN,
                HandshakeVariant::Eip8 => match buf {
                    [first, second, ..] => 2 + u16::from_be_bytes([*first, *second]) as usize,
                    _ => 2,
                },
            },
            ECIESState::Header => ECIES::header_len(),
            ECIESState::Body => self.ecies.body_len().unwrap_or(ECIES::header_len()),
        }
    }
}

impl Decoder for ECIESCodec {
    type Item = IngressECIESValue;
    type Error = ECIESError;

    #[instrument(level = "trace", skip_all, fields(peer = ?self.ecies.remote_id(), state = ?self.state))]
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                ECIESState::Auth => {
                    trace!(target: "net::ecies", "parsing auth");
                    let total_size = self.next_expected_len(buf);
                    if buf.len() < total_size {
                        trace!(target: "net::ecies", "current len {}, need {}", buf.len(), total_size);
                        return Ok(None)
                    }

                    let mut data = buf.split_to(total_size);
                    if data[0] == 0x04 {
                        self.ecies.read_auth_legacy(&mut data)?;
                        self.variant = HandshakeVariant::Legacy;
                    } else {
                        self.ecies.read_auth(&mut data)?;
                        self.variant = HandshakeVariant::Eip8;
                    }

                    self.state = ECIESState::Header;
                    let remote_id = self
                        .ecies
                        .remote_id()
                        .ok_or(ECIESErrorImpl::HandshakeIncomplete("auth without remote id"))?;
                    return Ok(Some(IngressECIESValue::AuthReceive(remote_id)))
                }
                ECIESState::Ack => {
                    trace!(target: "net::ecies", "parsing ack with len {}", buf.len());
                    let total_size = self.next_expected_len(buf);
                    if buf.len() < total_size {
                        return Ok(None)
                    }

                    let mut data = buf.split_to(total_size);
                    match self.variant {
                        HandshakeVariant::Eip8 => self.ecies.read_ack(&mut data)?,
                        HandshakeVariant::Legacy => self.ecies.read_ack_legacy(&mut data)?,
                    }

                    self.state = ECIESState::Header;
                    return Ok(Some(IngressECIESValue::Ack))
                }
                ECIESState::Header => {
                    if buf.len() < ECIES::header_len() {
                        trace!(target: "net::ecies", "current len {}, need {}", buf.len(), ECIES::header_len());
                        return Ok(None)
                    }

                    self.ecies.read_header(&mut buf.split_to(ECIES::header_len()))?;
                    self.state = ECIESState::Body;
                }
                ECIESState::Body => {
                    let body_len = self.ecies.body_len()?;
                    if buf.len() < body_len {
                        return Ok(None)
                    }

                    let mut data = buf.split_to(body_len);
                    let mut ret = BytesMut::new();
                    ret.extend_from_slice(self.ecies.read_body(&mut data)?);

                    self.state = ECIESState::Header;
                    return Ok(Some(IngressECIESValue::Message(ret)))
                }
            }
        }
    }
}

impl Encoder<EgressECIESValue> for ECIESCodec {
    type Error = ECIESError;

    #[instrument(level = "trace", skip(self, buf), fields(peer = ?self.ecies.remote_id(), state = ?self.state))]
    fn encode(&mut self, item: EgressECIESValue, buf: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            EgressECIESValue::Auth => {
                let auth = match self.variant {
                    HandshakeVariant::Eip8 => self.ecies.create_auth()?,
                    HandshakeVariant::Legacy => self.ecies.create_auth_legacy()?,
                };
                buf.extend_from_slice(&auth);
                self.state = ECIESState::Ack;
                Ok(())
            }
            EgressECIESValue::Ack => {
                let ack = match self.variant {
                    HandshakeVariant::Eip8 => self.ecies.create_ack()?,
                    HandshakeVariant::Legacy => self.ecies.create_ack_legacy()?,
                };
                buf.extend_from_slice(&ack);
                Ok(())
            }
            EgressECIESValue::Message(data) => {
                self.ecies.write_header(buf, data.len())?;
                self.ecies.write_body(buf, &data)?;
                Ok(())
            }
        }
    }
}
