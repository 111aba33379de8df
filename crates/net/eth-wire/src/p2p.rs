//! The reserved `p2p` base protocol messages and payload compression.

use crate::{disconnect::DisconnectReason, errors::P2PStreamError, HelloMessage};
use bytes::{Buf, BufMut};
use alloy_rlp::{Decodable, Encodable, Error as RlpError, EMPTY_LIST_CODE, EMPTY_STRING_CODE};

/// [`MAX_PAYLOAD_SIZE`] is the maximum size of an uncompressed message payload.
/// This is defined in [EIP-706](https://eips.ethereum.org/EIPS/eip-706).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Highest message id reserved by the `p2p` base protocol. Capability ranges start right after.
pub const MAX_RESERVED_MESSAGE_ID: u8 = 0x0f;

/// Message IDs for `p2p` subprotocol messages.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum P2PMessageID {
    /// Message ID for the [`P2PMessage::Hello`] message.
    Hello = 0x00,

    /// Message ID for the [`P2PMessage::Disconnect`] message.
    Disconnect = 0x01,

    /// Message ID for the [`P2PMessage::Ping`] message.
    Ping = 0x02,

    /// Message ID for the [`P2PMessage::Pong`] message.
    Pong = 0x03,
}

impl From<P2PMessageID> for u8 {
    fn from(id: P2PMessageID) -> Self {
        id as Self
    }
}

impl TryFrom<u8> for P2PMessageID {
    type Error = P2PStreamError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            0x00 => Ok(Self::Hello),
            0x01 => Ok(Self::Disconnect),
            0x02 => Ok(Self::Ping),
            0x03 => Ok(Self::Pong),
            _ => Err(P2PStreamError::UnknownReservedMessageId(id)),
        }
    }
}

/// Represents a message used in the `p2p` subprotocol.
///
/// The encoding is `rlp(id) || rlp(payload)` without compression. Compression of everything but
/// [`P2PMessage::Hello`] is applied by the connection once both sides speak `p2p` v5.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum P2PMessage {
    /// The first packet sent over the connection, and sent once by both sides.
    Hello(HelloMessage),

    /// Inform the peer that a disconnection is imminent; if received, a peer should disconnect
    /// immediately.
    Disconnect(DisconnectReason),

    /// Requests an immediate reply of [`P2PMessage::Pong`] from the peer.
    Ping,

    /// Reply to the peer's [`P2PMessage::Ping`] packet.
    Pong,
}

impl P2PMessage {
    /// Gets the [`P2PMessageID`] for the given message.
    pub const fn message_id(&self) -> P2PMessageID {
        match self {
            Self::Hello(_) => P2PMessageID::Hello,
            Self::Disconnect(_) => P2PMessageID::Disconnect,
            Self::Ping => P2PMessageID::Ping,
            Self::Pong => P2PMessageID::Pong,
        }
    }

    /// Encodes only the payload, without the leading message id.
    pub fn encode_payload(&self, out: &mut dyn BufMut) {
        match self {
            Self::Hello(msg) => msg.encode(out),
            Self::Disconnect(msg) => msg.encode(out),
            Self::Ping | Self::Pong => out.put_u8(EMPTY_LIST_CODE),
        }
    }

    /// Decodes the payload of a message whose id has already been read.
    pub fn decode_payload(id: P2PMessageID, payload: &[u8]) -> alloy_rlp::Result<Self> {
        let mut buf = payload;
        let msg = match id {
            P2PMessageID::Hello => Self::Hello(HelloMessage::decode(&mut buf)?),
            P2PMessageID::Disconnect => {
                // some clients send an empty body
                if buf.is_empty() {
                    Self::Disconnect(DisconnectReason::default())
                } else {
                    Self::Disconnect(DisconnectReason::decode(&mut buf)?)
                }
            }
            // ping and pong payloads carry no information
            P2PMessageID::Ping => Self::Ping,
            P2PMessageID::Pong => Self::Pong,
        };
        Ok(msg)
    }
}

impl Encodable for P2PMessage {
    fn encode(&self, out: &mut dyn BufMut) {
        u8::from(self.message_id()).encode(out);
        self.encode_payload(out);
    }

    fn length(&self) -> usize {
        let payload_len = match self {
            Self::Hello(msg) => msg.length(),
            Self::Disconnect(msg) => msg.length(),
            Self::Ping | Self::Pong => 1,
        };
        u8::from(self.message_id()).length() + payload_len
    }
}

impl Decodable for P2PMessage {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let (id, payload) = decode_message_id(*buf)?;
        let id = P2PMessageID::try_from(id)
            .map_err(|_| RlpError::Custom("unknown p2p message id"))?;
        let msg = Self::decode_payload(id, payload)?;
        buf.advance(buf.len());
        Ok(msg)
    }
}

/// Splits a frame body into its message id and the remaining payload.
///
/// The id is a single byte. `0x80`, the RLP encoding of zero, is read as id `0`.
pub fn decode_message_id(body: &[u8]) -> Result<(u8, &[u8]), RlpError> {
    let (&first, payload) = body.split_first().ok_or(RlpError::InputTooShort)?;
    let id = match first {
        EMPTY_STRING_CODE => 0,
        id if id < EMPTY_STRING_CODE => id,
        _ => return Err(RlpError::Custom("message id is not a single byte")),
    };
    Ok((id, payload))
}

/// Snappy compresses a message payload.
pub fn compress(payload: &[u8]) -> Result<Vec<u8>, P2PStreamError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(P2PStreamError::MessageTooBig {
            message_size: payload.len(),
            max_size: MAX_PAYLOAD_SIZE,
        })
    }
    Ok(snap::raw::Encoder::new().compress_vec(payload)?)
}

/// Snappy decompresses a message payload, refusing payloads that would exceed
/// [`MAX_PAYLOAD_SIZE`] once decompressed.
pub fn decompress(payload: &[u8]) -> Result<Vec<u8>, P2PStreamError> {
    let decompressed_len = snap::raw::decompress_len(payload)?;
    if decompressed_len > MAX_PAYLOAD_SIZE {
        return Err(P2PStreamError::MessageTooBig {
            message_size: decompressed_len,
            max_size: MAX_PAYLOAD_SIZE,
        })
    }
    let mut out = vec![0u8; decompressed_len];
    let written = snap::raw::Decoder::new().decompress(payload, &mut out)?;
    out.truncate(written);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_pong_encoding() {
        assert_eq!(alloy_rlp::encode(&P2PMessage::Ping), vec![0x02, 0xc0]);
        assert_eq!(alloy_rlp::encode(&P2PMessage::Pong), vec![0x03, 0xc0]);
        assert_eq!(P2PMessage::Ping.length(), 2);
    }

    #[test]
    fn disconnect_encoding() {
        let msg = P2PMessage::Disconnect(DisconnectReason::UselessPeer);
        let encoded = alloy_rlp::encode(&msg);
        assert_eq!(encoded, vec![0x01, 0xc1, 0x03]);
        assert_eq!(alloy_rlp::decode_exact::<P2PMessage>(&encoded).unwrap(), msg);

        // an empty body still means a disconnect
        assert_eq!(
            alloy_rlp::decode_exact::<P2PMessage>([0x01]).unwrap(),
            P2PMessage::Disconnect(DisconnectReason::DisconnectRequested)
        );
    }

    #[test]
    fn message_id_zero_is_empty_string() {
        assert_eq!(decode_message_id(&[0x80, 0xc0]).unwrap(), (0, &[0xc0][..]));
        assert_eq!(decode_message_id(&[0x10]).unwrap(), (0x10, &[][..]));
        assert!(decode_message_id(&[]).is_err());
        assert!(decode_message_id(&[0x81, 0x80]).is_err());
    }

    #[test]
    fn unknown_reserved_id() {
        assert!(matches!(
            P2PMessageID::try_from(0x04),
            Err(P2PStreamError::UnknownReservedMessageId(0x04))
        ));
        assert!(alloy_rlp::decode_exact::<P2PMessage>([0x05, 0xc0]).is_err());
    }

    #[test]
    fn snappy_round_trip() {
        let payload = vec![0xabu8; 4096];
        let compressed = compress(&payload).unwrap();
        assert!(compressed.len() < payload.len());
        assert_eq!(decompress(&compressed).unwrap(), payload);
    }

    #[test]
    fn decompress_rejects_garbage() {
        assert!(decompress(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
    }
}
