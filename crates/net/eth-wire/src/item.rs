//! A dynamically shaped RLP value for payloads this node relays without a typed model.

use alloy_primitives::FixedBytes;
use alloy_rlp::{BufMut, Decodable, Encodable, Error as RlpError, Header};
use bytes::Bytes;

/// Deepest list nesting [`RlpItem`] decodes. Deeper input is rejected instead of recursing
/// further.
pub const MAX_RLP_DEPTH: usize = 128;

/// Either a byte string or a list of items.
///
/// Used where the message layout is not fixed, such as the `eth` status, which differs between
/// chains, or transactions taken from the block feed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RlpItem {
    /// A byte string.
    Bytes(Bytes),
    /// An ordered list of items.
    List(Vec<RlpItem>),
}

impl RlpItem {
    /// The empty list `[]`.
    pub const fn empty_list() -> Self {
        Self::List(Vec::new())
    }

    /// The empty byte string, also the encoding of integer zero.
    pub const fn empty_bytes() -> Self {
        Self::Bytes(Bytes::new())
    }

    /// Creates a list item from an iterator of items.
    pub fn list(items: impl IntoIterator<Item = Self>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Returns the byte string if this is one.
    pub const fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            Self::List(_) => None,
        }
    }

    /// Returns the list elements if this is a list.
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            Self::Bytes(_) => None,
        }
    }

    /// Returns the list element at `index`, if this is a list that long.
    pub fn get(&self, index: usize) -> Option<&Self> {
        self.as_list().and_then(|items| items.get(index))
    }

    /// Interprets the byte string as a big-endian unsigned integer.
    pub fn as_u64(&self) -> Result<u64, RlpError> {
        let bytes = self.as_bytes().ok_or(RlpError::UnexpectedList)?;
        if bytes.len() > 8 {
            return Err(RlpError::Overflow)
        }
        if bytes.first() == Some(&0) {
            return Err(RlpError::LeadingZero)
        }
        Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }

    fn decode_at_depth(buf: &mut &[u8], depth: usize) -> alloy_rlp::Result<Self> {
        let mut rest = *buf;
        let header = Header::decode(&mut rest)?;
        if !header.list {
            return Bytes::decode(buf).map(Self::Bytes)
        }
        if depth >= MAX_RLP_DEPTH {
            return Err(RlpError::Custom("rlp list nesting too deep"))
        }

        if rest.len() < header.payload_length {
            return Err(RlpError::InputTooShort)
        }
        let (mut payload, remainder) = rest.split_at(header.payload_length);
        let mut items = Vec::new();
        while !payload.is_empty() {
            items.push(Self::decode_at_depth(&mut payload, depth + 1)?);
        }
        *buf = remainder;
        Ok(Self::List(items))
    }
}

impl Encodable for RlpItem {
    fn encode(&self, out: &mut dyn BufMut) {
        match self {
            Self::Bytes(bytes) => bytes.encode(out),
            Self::List(items) => items.encode(out),
        }
    }

    fn length(&self) -> usize {
        match self {
            Self::Bytes(bytes) => bytes.length(),
            Self::List(items) => items.length(),
        }
    }
}

impl Decodable for RlpItem {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        Self::decode_at_depth(buf, 0)
    }
}

impl From<Bytes> for RlpItem {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for RlpItem {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(bytes))
    }
}

impl<const N: usize> From<FixedBytes<N>> for RlpItem {
    fn from(bytes: FixedBytes<N>) -> Self {
        Self::Bytes(Bytes::copy_from_slice(bytes.as_slice()))
    }
}

impl From<&str> for RlpItem {
    fn from(s: &str) -> Self {
        Self::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<u64> for RlpItem {
    fn from(value: u64) -> Self {
        let be = value.to_be_bytes();
        Self::Bytes(Bytes::copy_from_slice(&be[(value.leading_zeros() / 8) as usize..]))
    }
}

impl From<Vec<Self>> for RlpItem {
    fn from(items: Vec<Self>) -> Self {
        Self::List(items)
    }
}
