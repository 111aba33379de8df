use crate::IngressECIESValue;
use thiserror::Error;

/// An error that occurs while reading or writing to an ECIES stream.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ECIESError {
    inner: Box<ECIESErrorImpl>,
}

impl ECIESError {
    /// Consumes the type and returns the error enum
    pub fn into_inner(self) -> ECIESErrorImpl {
        *self.inner
    }

    /// Returns a reference to the inner error
    pub const fn inner(&self) -> &ECIESErrorImpl {
        &self.inner
    }

    /// Returns true if the error is a failed authentication of handshake or frame data.
    pub const fn is_auth_failure(&self) -> bool {
        matches!(
            *self.inner,
            ECIESErrorImpl::TagCheckDecryptFailed |
                ECIESErrorImpl::TagCheckHeaderFailed |
                ECIESErrorImpl::TagCheckBodyFailed |
                ECIESErrorImpl::EphemeralKeyHashMismatch
        )
    }
}

impl From<ECIESErrorImpl> for ECIESError {
    fn from(source: ECIESErrorImpl) -> Self {
        Self { inner: Box::new(source) }
    }
}

/// An error that occurs while reading or writing to an ECIES stream.
#[derive(Debug, Error)]
pub enum ECIESErrorImpl {
    /// Error during IO
    #[error(transparent)]
    IO(std::io::Error),
    /// Error when checking the HMAC tag against the tag on the message being decrypted
    #[error("tag check failure in decrypt_message")]
    TagCheckDecryptFailed,
    /// Error when checking the HMAC tag against the tag on the header
    #[error("tag check failure in read_header")]
    TagCheckHeaderFailed,
    /// Error when checking the HMAC tag against the tag on the body
    #[error("tag check failure in read_body")]
    TagCheckBodyFailed,
    /// Error when parsing AUTH data
    #[error("invalid auth data")]
    InvalidAuthData,
    /// Error when parsing ACK data
    #[error("invalid ack data")]
    InvalidAckData,
    /// Error when reading the header if its length is <3
    #[error("invalid body data")]
    InvalidHeader,
    /// The encrypted handshake message does not start with an uncompressed public key
    #[error("wrong ECIES header tag {0:#04x}")]
    WrongEciesHeader(u8),
    /// The encrypted handshake message is shorter than the ECIES envelope
    #[error("ECIES message of {0} bytes is too short")]
    EnvelopeTooShort(usize),
    /// The size prefix of an EIP-8 handshake message disagrees with the received bytes
    #[error("invalid handshake size prefix: declared {declared}, got {got}")]
    InvalidSizePrefix {
        /// Size declared in the prefix.
        declared: usize,
        /// Size of the received payload.
        got: usize,
    },
    /// The legacy auth carried an ephemeral key commitment that does not match the recovered key
    #[error("ephemeral public key hash mismatch")]
    EphemeralKeyHashMismatch,
    /// A header was read while the body of the previous frame is still pending
    #[error("header read while a body of {0} bytes is pending")]
    BodyPending(usize),
    /// A body was read without a preceding header
    #[error("body read without a preceding header")]
    MissingHeader,
    /// The frame body does not match the size announced by its header
    #[error("invalid frame body size: expected {expected}, got {got}")]
    InvalidBodySize {
        /// Padded size plus MAC announced by the header.
        expected: usize,
        /// Received size.
        got: usize,
    },
    /// A frame or handshake step was attempted before the required handshake data is known
    #[error("handshake has not progressed far enough: {0}")]
    HandshakeIncomplete(&'static str),
    /// The frame body does not fit the 3-byte size field
    #[error("frame body of {0} bytes is too large")]
    FrameTooLarge(usize),
    /// Error when interacting with secp256k1
    #[error(transparent)]
    Secp256k1(#[from] secp256k1::Error),
    /// Error when decoding RLP data
    #[error(transparent)]
    RLPDecoding(#[from] alloy_rlp::Error),
    /// Error when converting to integer
    #[error(transparent)]
    FromInt(#[from] std::num::TryFromIntError),
    /// The codec received a value that is not valid in its current state
    #[error("invalid handshake: expected {expected:?}, got {msg:?} instead")]
    InvalidHandshake {
        /// The expected return value from the ECIES stream
        expected: IngressECIESValue,
        /// The actual value returned from the peer
        msg: Option<IngressECIESValue>,
    },
}

impl From<std::io::Error> for ECIESError {
    fn from(source: std::io::Error) -> Self {
        ECIESErrorImpl::IO(source).into()
    }
}

impl From<secp256k1::Error> for ECIESError {
    fn from(source: secp256k1::Error) -> Self {
        ECIESErrorImpl::Secp256k1(source).into()
    }
}

impl From<alloy_rlp::Error> for ECIESError {
    fn from(source: alloy_rlp::Error) -> Self {
        ECIESErrorImpl::RLPDecoding(source).into()
    }
}

impl From<std::num::TryFromIntError> for ECIESError {
    fn from(source: std::num::TryFromIntError) -> Self {
        ECIESErrorImpl::FromInt(source).into()
    }
}
