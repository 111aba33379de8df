//! The ECIES handshake and frame cipher of one RLPx session.

use crate::{
    error::ECIESErrorImpl,
    mac::{HeaderBytes, MAC},
    util::{ecdh_x, hmac_sha256, id2pk, kdf, pk2id, sha256, UNCOMPRESSED_PUBLIC_KEY_SIZE},
    ECIESError, PeerId,
};
use aes::{
    cipher::{KeyIvInit, StreamCipher},
    Aes128, Aes256,
};
use alloy_primitives::{keccak256, B128, B256};
use alloy_rlp::{Decodable, Encodable, Header, RlpEncodable};
use bytes::{BufMut, Bytes, BytesMut};
use rand::{thread_rng, Rng};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, PublicKey, SecretKey, SECP256K1,
};
use tracing::trace;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Version advertised in auth and ack messages.
const PROTOCOL_VERSION: u8 = 4;

/// Bytes added by the ECIES envelope: ephemeral public key, IV and HMAC tag.
pub const ECIES_OVERHEAD: usize = UNCOMPRESSED_PUBLIC_KEY_SIZE + 16 + 32;

/// Plaintext size of a legacy auth message.
pub const AUTH_LEGACY_PLAIN_LEN: usize = 65 + 32 + 64 + 32 + 1;
/// Wire size of a legacy auth message.
pub const AUTH_LEGACY_LEN: usize = AUTH_LEGACY_PLAIN_LEN + ECIES_OVERHEAD;
/// Plaintext size of a legacy ack message.
pub const ACK_LEGACY_PLAIN_LEN: usize = 64 + 32 + 1;
/// Wire size of a legacy ack message.
pub const ACK_LEGACY_LEN: usize = ACK_LEGACY_PLAIN_LEN + ECIES_OVERHEAD;

/// Largest body size the 3-byte frame header can announce.
pub const MAX_FRAME_BODY_SIZE: usize = 0xff_ffff;

/// Layout of the handshake messages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HandshakeVariant {
    /// Size-prefixed RLP messages with random padding.
    #[default]
    Eip8,
    /// Fixed-layout messages used before EIP-8.
    Legacy,
}

/// Symmetric state derived once both handshake messages are known.
#[derive(Clone)]
struct FrameCiphers {
    ingress_aes: Aes256Ctr,
    egress_aes: Aes256Ctr,
    ingress_mac: MAC,
    egress_mac: MAC,
}

impl core::fmt::Debug for FrameCiphers {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrameCiphers")
            .field("ingress_mac", &self.ingress_mac)
            .field("egress_mac", &self.egress_mac)
            .finish_non_exhaustive()
    }
}

/// The ECIES state of one RLPx session.
///
/// The handshake methods fill in the remote key material. Once the ack is written (responder)
/// or read (initiator) the frame ciphers are set up and the `*_header`/`*_body` methods become
/// usable.
#[derive(Clone, Debug)]
pub struct ECIES {
    secret_key: SecretKey,
    public_key: PublicKey,
    remote_public_key: Option<PublicKey>,
    remote_id: Option<PeerId>,

    ephemeral_secret_key: SecretKey,
    ephemeral_public_key: PublicKey,
    ephemeral_shared_secret: Option<B256>,
    remote_ephemeral_public_key: Option<PublicKey>,

    nonce: B256,
    remote_nonce: Option<B256>,

    init_msg: Option<Bytes>,
    remote_init_msg: Option<Bytes>,

    frame: Option<FrameCiphers>,
    body_size: Option<usize>,
}

impl ECIES {
    fn new_static(secret_key: SecretKey, nonce: B256, ephemeral_secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(SECP256K1, &secret_key);
        let ephemeral_public_key = PublicKey::from_secret_key(SECP256K1, &ephemeral_secret_key);
        Self {
            secret_key,
            public_key,
            remote_public_key: None,
            remote_id: None,
            ephemeral_secret_key,
            ephemeral_public_key,
            ephemeral_shared_secret: None,
            remote_ephemeral_public_key: None,
            nonce,
            remote_nonce: None,
            init_msg: None,
            remote_init_msg: None,
            frame: None,
            body_size: None,
        }
    }

    /// Create a new client with the given static secret key, remote peer id, nonce, and ephemeral
    /// secret key.
    pub fn new_static_client(
        secret_key: SecretKey,
        remote_id: PeerId,
        nonce: B256,
        ephemeral_secret_key: SecretKey,
    ) -> Result<Self, ECIESError> {
        let mut ecies = Self::new_static(secret_key, nonce, ephemeral_secret_key);
        ecies.remote_public_key = Some(id2pk(remote_id)?);
        ecies.remote_id = Some(remote_id);
        Ok(ecies)
    }

    /// Create a new ECIES client with the given static secret key and remote peer ID.
    pub fn new_client(secret_key: SecretKey, remote_id: PeerId) -> Result<Self, ECIESError> {
        let mut rng = thread_rng();
        let nonce = B256::from(rng.gen::<[u8; 32]>());
        let ephemeral_secret_key = SecretKey::new(&mut rng);
        Self::new_static_client(secret_key, remote_id, nonce, ephemeral_secret_key)
    }

    /// Create a new server with the given static secret key, nonce, and ephemeral secret key.
    pub fn new_static_server(
        secret_key: SecretKey,
        nonce: B256,
        ephemeral_secret_key: SecretKey,
    ) -> Self {
        Self::new_static(secret_key, nonce, ephemeral_secret_key)
    }

    /// Create a new ECIES server with the given static secret key.
    pub fn new_server(secret_key: SecretKey) -> Self {
        let mut rng = thread_rng();
        let nonce = B256::from(rng.gen::<[u8; 32]>());
        let ephemeral_secret_key = SecretKey::new(&mut rng);
        Self::new_static_server(secret_key, nonce, ephemeral_secret_key)
    }

    /// Return the remote peer id, known from construction (initiator) or from the auth
    /// message (responder).
    pub const fn remote_id(&self) -> Option<PeerId> {
        self.remote_id
    }

    /// Our own node id.
    pub fn local_id(&self) -> PeerId {
        pk2id(&self.public_key)
    }

    /// Returns true once the frame ciphers are derived.
    pub const fn is_frame_ready(&self) -> bool {
        self.frame.is_some()
    }

    fn remote_public_key(&self) -> Result<PublicKey, ECIESError> {
        self.remote_public_key
            .ok_or_else(|| ECIESErrorImpl::HandshakeIncomplete("remote public key unknown").into())
    }

    /// Wraps `data` in the ECIES envelope for the remote static key, authenticating
    /// `shared_data` along with the ciphertext.
    fn encrypt_message(
        &self,
        data: &[u8],
        shared_data: &[u8],
        out: &mut BytesMut,
    ) -> Result<(), ECIESError> {
        let remote_public_key = self.remote_public_key()?;
        let mut rng = thread_rng();

        out.reserve(ECIES_OVERHEAD + data.len());
        let secret_key = SecretKey::new(&mut rng);
        out.extend_from_slice(
            &PublicKey::from_secret_key(SECP256K1, &secret_key).serialize_uncompressed(),
        );

        let x = ecdh_x(&remote_public_key, &secret_key);
        let mut key = [0u8; 32];
        kdf(x, &[], &mut key);

        let enc_key = B128::from_slice(&key[..16]);
        let mac_key = sha256(&key[16..32]);

        let iv = B128::from(rng.gen::<[u8; 16]>());
        let mut encryptor = Aes128Ctr::new(enc_key.as_slice().into(), iv.as_slice().into());

        let mut encrypted = data.to_vec();
        encryptor.apply_keystream(&mut encrypted);

        let tag = hmac_sha256(mac_key.as_slice(), &[iv.as_slice(), &encrypted], shared_data);

        out.extend_from_slice(iv.as_slice());
        out.extend_from_slice(&encrypted);
        out.extend_from_slice(tag.as_slice());
        Ok(())
    }

    /// Opens an ECIES envelope addressed to our static key and returns the plaintext.
    fn decrypt_message<'a>(
        &self,
        data: &'a mut [u8],
        shared_data: &[u8],
    ) -> Result<&'a mut [u8], ECIESError> {
        if data.len() < ECIES_OVERHEAD {
            return Err(ECIESErrorImpl::EnvelopeTooShort(data.len()).into())
        }
        if data[0] != 0x04 {
            return Err(ECIESErrorImpl::WrongEciesHeader(data[0]).into())
        }

        let (pubkey_bytes, encrypted) = data.split_at_mut(UNCOMPRESSED_PUBLIC_KEY_SIZE);
        let public_key = PublicKey::from_slice(pubkey_bytes)?;
        let tag_index = encrypted.len() - 32;
        let (data_iv, tag_bytes) = encrypted.split_at_mut(tag_index);
        let (iv, encrypted_data) = data_iv.split_at_mut(16);
        let tag = B256::from_slice(tag_bytes);

        let x = ecdh_x(&public_key, &self.secret_key);
        let mut key = [0u8; 32];
        kdf(x, &[], &mut key);
        let enc_key = B128::from_slice(&key[..16]);
        let mac_key = sha256(&key[16..32]);

        let check_tag = hmac_sha256(mac_key.as_slice(), &[&*iv, &*encrypted_data], shared_data);
        if check_tag != tag {
            return Err(ECIESErrorImpl::TagCheckDecryptFailed.into())
        }

        let mut decryptor = Aes128Ctr::new(enc_key.as_slice().into(), (&iv[..]).into());
        decryptor.apply_keystream(encrypted_data);
        Ok(encrypted_data)
    }

    /// Seals an EIP-8 plaintext: the 2-byte big-endian size prefix is authenticated as shared
    /// data and kept in front of the envelope.
    fn seal_eip8(&self, plain: &[u8]) -> Result<Bytes, ECIESError> {
        let size = u16::try_from(plain.len() + ECIES_OVERHEAD)?;
        let prefix = size.to_be_bytes();
        let mut out = BytesMut::with_capacity(2 + size as usize);
        out.extend_from_slice(&prefix);
        self.encrypt_message(plain, &prefix, &mut out)?;
        Ok(out.freeze())
    }

    /// Opens a size-prefixed EIP-8 message, checking the prefix against the received length.
    fn open_eip8<'a>(&self, data: &'a mut [u8]) -> Result<&'a mut [u8], ECIESError> {
        if data.len() < 2 {
            return Err(ECIESErrorImpl::EnvelopeTooShort(data.len()).into())
        }
        let (prefix, envelope) = data.split_at_mut(2);
        let declared = u16::from_be_bytes([prefix[0], prefix[1]]) as usize;
        if declared != envelope.len() {
            return Err(
                ECIESErrorImpl::InvalidSizePrefix { declared, got: envelope.len() }.into()
            )
        }
        self.decrypt_message(envelope, prefix)
    }

    /// Signs `ecdh(remote static, own static) ^ nonce` with the ephemeral key.
    fn sign_auth(&self, remote_public_key: &PublicKey) -> [u8; 65] {
        let x = ecdh_x(remote_public_key, &self.secret_key);
        let msg = x ^ self.nonce;
        let (rec_id, sig) = SECP256K1
            .sign_ecdsa_recoverable(&Message::from_digest(msg.0), &self.ephemeral_secret_key)
            .serialize_compact();

        let mut sig_bytes = [0u8; 65];
        sig_bytes[..64].copy_from_slice(&sig);
        sig_bytes[64] = rec_id.to_i32() as u8;
        sig_bytes
    }

    /// Learns the initiator's static key and nonce and recovers its ephemeral key from the auth
    /// signature.
    fn accept_auth(
        &mut self,
        sig_bytes: &[u8],
        remote_id: PeerId,
        remote_nonce: B256,
    ) -> Result<PublicKey, ECIESError> {
        let signature = RecoverableSignature::from_compact(
            &sig_bytes[..64],
            RecoveryId::from_i32(sig_bytes[64] as i32)?,
        )?;
        let remote_public_key = id2pk(remote_id)?;

        let x = ecdh_x(&remote_public_key, &self.secret_key);
        let remote_ephemeral_public_key = SECP256K1
            .recover_ecdsa(&Message::from_digest((x ^ remote_nonce).0), &signature)?;

        self.remote_id = Some(remote_id);
        self.remote_public_key = Some(remote_public_key);
        self.remote_nonce = Some(remote_nonce);
        self.remote_ephemeral_public_key = Some(remote_ephemeral_public_key);
        self.ephemeral_shared_secret =
            Some(ecdh_x(&remote_ephemeral_public_key, &self.ephemeral_secret_key));
        Ok(remote_ephemeral_public_key)
    }

    fn accept_ack(
        &mut self,
        remote_ephemeral_id: PeerId,
        remote_nonce: B256,
    ) -> Result<(), ECIESError> {
        let remote_ephemeral_public_key = id2pk(remote_ephemeral_id)?;
        self.remote_nonce = Some(remote_nonce);
        self.remote_ephemeral_public_key = Some(remote_ephemeral_public_key);
        self.ephemeral_shared_secret =
            Some(ecdh_x(&remote_ephemeral_public_key, &self.ephemeral_secret_key));
        Ok(())
    }

    /// Builds the EIP-8 auth message `[sig, id, nonce, version]` and returns the wire bytes.
    pub fn create_auth(&mut self) -> Result<Bytes, ECIESError> {
        let sig_bytes = self.sign_auth(&self.remote_public_key()?);
        let id = pk2id(&self.public_key);

        let mut plain = BytesMut::new();
        AuthBody { signature: sig_bytes, id, nonce: self.nonce, version: PROTOCOL_VERSION }
            .encode(&mut plain);
        pad_eip8(&mut plain);

        let out = self.seal_eip8(&plain)?;
        self.init_msg = Some(out.clone());
        trace!(target: "net::ecies", len = out.len(), "created eip8 auth");
        Ok(out)
    }

    /// Builds the fixed-layout legacy auth message and returns the wire bytes.
    pub fn create_auth_legacy(&mut self) -> Result<Bytes, ECIESError> {
        let sig_bytes = self.sign_auth(&self.remote_public_key()?);

        let mut plain = BytesMut::with_capacity(AUTH_LEGACY_PLAIN_LEN);
        plain.extend_from_slice(&sig_bytes);
        plain.extend_from_slice(keccak256(pk2id(&self.ephemeral_public_key)).as_slice());
        plain.extend_from_slice(pk2id(&self.public_key).as_slice());
        plain.extend_from_slice(self.nonce.as_slice());
        plain.put_u8(0);

        let mut out = BytesMut::with_capacity(AUTH_LEGACY_LEN);
        self.encrypt_message(&plain, &[], &mut out)?;
        let out = out.freeze();
        self.init_msg = Some(out.clone());
        trace!(target: "net::ecies", len = out.len(), "created legacy auth");
        Ok(out)
    }

    /// Reads an EIP-8 auth message including its size prefix.
    pub fn read_auth(&mut self, data: &mut [u8]) -> Result<(), ECIESError> {
        self.remote_init_msg = Some(Bytes::copy_from_slice(data));
        let plain = self.open_eip8(data)?;

        // padding after the list is ignored
        let AuthBody { signature, id: remote_id, nonce: remote_nonce, .. } =
            AuthBody::decode(&mut &plain[..])?;

        self.accept_auth(&signature, remote_id, remote_nonce)?;
        trace!(target: "net::ecies", ?remote_id, "read eip8 auth");
        Ok(())
    }

    /// Reads a fixed-layout legacy auth message.
    pub fn read_auth_legacy(&mut self, data: &mut [u8]) -> Result<(), ECIESError> {
        self.remote_init_msg = Some(Bytes::copy_from_slice(data));
        let plain = self.decrypt_message(data, &[])?;
        if plain.len() != AUTH_LEGACY_PLAIN_LEN {
            return Err(ECIESErrorImpl::InvalidAuthData.into())
        }

        let (sig_bytes, rest) = plain.split_at(65);
        let (ephemeral_hash, rest) = rest.split_at(32);
        let (remote_id, rest) = rest.split_at(64);
        let remote_nonce = B256::from_slice(&rest[..32]);

        let remote_ephemeral =
            self.accept_auth(sig_bytes, PeerId::from_slice(remote_id), remote_nonce)?;
        if keccak256(pk2id(&remote_ephemeral)).as_slice() != ephemeral_hash {
            return Err(ECIESErrorImpl::EphemeralKeyHashMismatch.into())
        }
        trace!(target: "net::ecies", remote_id = ?self.remote_id, "read legacy auth");
        Ok(())
    }

    /// Builds the EIP-8 ack `[ephemeral id, nonce, version]`, returns the wire bytes and derives
    /// the frame secrets.
    pub fn create_ack(&mut self) -> Result<Bytes, ECIESError> {
        let ephemeral_id = pk2id(&self.ephemeral_public_key);

        let mut plain = BytesMut::new();
        AckBody { ephemeral_id, nonce: self.nonce, version: PROTOCOL_VERSION }.encode(&mut plain);
        pad_eip8(&mut plain);

        let out = self.seal_eip8(&plain)?;
        self.init_msg = Some(out.clone());
        self.setup_frame(true)?;
        Ok(out)
    }

    /// Builds the fixed-layout legacy ack, returns the wire bytes and derives the frame secrets.
    pub fn create_ack_legacy(&mut self) -> Result<Bytes, ECIESError> {
        let mut plain = BytesMut::with_capacity(ACK_LEGACY_PLAIN_LEN);
        plain.extend_from_slice(pk2id(&self.ephemeral_public_key).as_slice());
        plain.extend_from_slice(self.nonce.as_slice());
        plain.put_u8(0);

        let mut out = BytesMut::with_capacity(ACK_LEGACY_LEN);
        self.encrypt_message(&plain, &[], &mut out)?;
        let out = out.freeze();
        self.init_msg = Some(out.clone());
        self.setup_frame(true)?;
        Ok(out)
    }

    /// Reads an EIP-8 ack message and derives the frame secrets.
    pub fn read_ack(&mut self, data: &mut [u8]) -> Result<(), ECIESError> {
        self.remote_init_msg = Some(Bytes::copy_from_slice(data));
        let plain = self.open_eip8(data)?;

        let AckBody { ephemeral_id: remote_ephemeral_id, nonce: remote_nonce, .. } =
            AckBody::decode(&mut &plain[..])?;
        self.accept_ack(remote_ephemeral_id, remote_nonce)?;
        self.setup_frame(false)
    }

    /// Reads a fixed-layout legacy ack message and derives the frame secrets.
    pub fn read_ack_legacy(&mut self, data: &mut [u8]) -> Result<(), ECIESError> {
        self.remote_init_msg = Some(Bytes::copy_from_slice(data));
        let plain = self.decrypt_message(data, &[])?;
        if plain.len() != ACK_LEGACY_PLAIN_LEN {
            return Err(ECIESErrorImpl::InvalidAckData.into())
        }

        let remote_ephemeral_id = PeerId::from_slice(&plain[..64]);
        let remote_nonce = B256::from_slice(&plain[64..96]);
        self.accept_ack(remote_ephemeral_id, remote_nonce)?;
        self.setup_frame(false)
    }

    /// Derives the frame ciphers and MACs from the handshake transcript.
    ///
    /// `incoming` is true for the responder. Both sides hash `recipient nonce || initiator nonce`.
    fn setup_frame(&mut self, incoming: bool) -> Result<(), ECIESError> {
        let remote_nonce = self
            .remote_nonce
            .ok_or(ECIESErrorImpl::HandshakeIncomplete("remote nonce unknown"))?;
        let ephemeral_shared_secret = self
            .ephemeral_shared_secret
            .ok_or(ECIESErrorImpl::HandshakeIncomplete("ephemeral shared secret unknown"))?;
        let init_msg =
            self.init_msg.as_ref().ok_or(ECIESErrorImpl::HandshakeIncomplete("init message"))?;
        let remote_init_msg = self
            .remote_init_msg
            .as_ref()
            .ok_or(ECIESErrorImpl::HandshakeIncomplete("remote init message"))?;

        let h_nonce = if incoming {
            keccak256([self.nonce.as_slice(), remote_nonce.as_slice()].concat())
        } else {
            keccak256([remote_nonce.as_slice(), self.nonce.as_slice()].concat())
        };
        let shared_secret =
            keccak256([ephemeral_shared_secret.as_slice(), h_nonce.as_slice()].concat());
        let aes_secret =
            keccak256([ephemeral_shared_secret.as_slice(), shared_secret.as_slice()].concat());
        let mac_secret =
            keccak256([ephemeral_shared_secret.as_slice(), aes_secret.as_slice()].concat());

        let iv = B128::ZERO;
        let mut ingress_mac = MAC::new(mac_secret);
        ingress_mac.update((mac_secret ^ self.nonce).as_slice());
        ingress_mac.update(remote_init_msg);
        let mut egress_mac = MAC::new(mac_secret);
        egress_mac.update((mac_secret ^ remote_nonce).as_slice());
        egress_mac.update(init_msg);

        self.frame = Some(FrameCiphers {
            ingress_aes: Aes256Ctr::new(aes_secret.as_slice().into(), iv.as_slice().into()),
            egress_aes: Aes256Ctr::new(aes_secret.as_slice().into(), iv.as_slice().into()),
            ingress_mac,
            egress_mac,
        });
        trace!(target: "net::ecies", incoming, "frame secrets derived");
        Ok(())
    }

    /// Appends the 32 byte authenticated header announcing a body of `size` bytes.
    pub fn write_header(&mut self, out: &mut BytesMut, size: usize) -> Result<(), ECIESError> {
        if size > MAX_FRAME_BODY_SIZE {
            return Err(ECIESErrorImpl::FrameTooLarge(size).into())
        }
        let frame = self.frame.as_mut().ok_or(ECIESErrorImpl::HandshakeIncomplete("frame"))?;

        let mut header: HeaderBytes = [0u8; 16];
        header[..3].copy_from_slice(&(size as u32).to_be_bytes()[1..]);
        // rlp([0, 0]) capability placeholder
        header[3..6].copy_from_slice(&[0xc2, 0x80, 0x80]);

        frame.egress_aes.apply_keystream(&mut header);
        frame.egress_mac.update_header(&header);
        let tag = frame.egress_mac.digest();

        out.reserve(Self::header_len());
        out.extend_from_slice(&header);
        out.extend_from_slice(tag.as_slice());
        Ok(())
    }

    /// Authenticates and decrypts a frame header, returning the announced body size.
    ///
    /// The MAC is checked over the ciphertext before anything is decrypted.
    pub fn read_header(&mut self, data: &mut [u8]) -> Result<usize, ECIESError> {
        if let Some(pending) = self.body_size {
            return Err(ECIESErrorImpl::BodyPending(pending).into())
        }
        if data.len() < Self::header_len() {
            return Err(ECIESErrorImpl::InvalidHeader.into())
        }
        let frame = self.frame.as_mut().ok_or(ECIESErrorImpl::HandshakeIncomplete("frame"))?;

        let (header_bytes, mac_bytes) = data.split_at_mut(16);
        let header = <&mut HeaderBytes>::try_from(header_bytes)
            .map_err(|_| ECIESErrorImpl::InvalidHeader)?;
        let mac = B128::from_slice(&mac_bytes[..16]);

        frame.ingress_mac.update_header(header);
        if frame.ingress_mac.digest() != mac {
            return Err(ECIESErrorImpl::TagCheckHeaderFailed.into())
        }

        frame.ingress_aes.apply_keystream(&mut header[..]);
        let body_size = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;
        self.body_size = Some(body_size);
        Ok(body_size)
    }

    /// Size of an authenticated frame header on the wire.
    pub const fn header_len() -> usize {
        32
    }

    /// Wire size of the pending body: its size rounded up to 16 plus the MAC.
    pub fn body_len(&self) -> Result<usize, ECIESError> {
        let len = self.body_size.ok_or(ECIESErrorImpl::MissingHeader)?;
        Ok(padded_len(len) + 16)
    }

    /// Appends the encrypted, zero padded body followed by its MAC.
    pub fn write_body(&mut self, out: &mut BytesMut, data: &[u8]) -> Result<(), ECIESError> {
        let frame = self.frame.as_mut().ok_or(ECIESErrorImpl::HandshakeIncomplete("frame"))?;

        let len = padded_len(data.len());
        let old_len = out.len();
        out.resize(old_len + len, 0);

        let encrypted = &mut out[old_len..old_len + len];
        encrypted[..data.len()].copy_from_slice(data);

        frame.egress_aes.apply_keystream(encrypted);
        frame.egress_mac.update_body(encrypted);
        let tag = frame.egress_mac.digest();

        out.extend_from_slice(tag.as_slice());
        Ok(())
    }

    /// Authenticates and decrypts the body announced by the last header, returning the payload
    /// without padding.
    pub fn read_body<'a>(&mut self, data: &'a mut [u8]) -> Result<&'a mut [u8], ECIESError> {
        let size = self.body_size.ok_or(ECIESErrorImpl::MissingHeader)?;
        let expected = padded_len(size) + 16;
        if data.len() != expected {
            return Err(ECIESErrorImpl::InvalidBodySize { expected, got: data.len() }.into())
        }
        let frame = self.frame.as_mut().ok_or(ECIESErrorImpl::HandshakeIncomplete("frame"))?;

        let (body, mac_bytes) = data.split_at_mut(expected - 16);
        let mac = B128::from_slice(mac_bytes);

        frame.ingress_mac.update_body(body);
        if frame.ingress_mac.digest() != mac {
            return Err(ECIESErrorImpl::TagCheckBodyFailed.into())
        }

        frame.ingress_aes.apply_keystream(body);
        self.body_size = None;
        Ok(&mut body[..size])
    }
}

/// RLP body of an EIP-8 auth message.
#[derive(Debug, RlpEncodable)]
struct AuthBody {
    signature: [u8; 65],
    id: PeerId,
    nonce: B256,
    version: u8,
}

/// Elements after the nonce are ignored, as EIP-8 requires. A missing version is accepted.
impl Decodable for AuthBody {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString)
        }
        let mut payload = &buf[..header.payload_length];
        let body = Self {
            signature: Decodable::decode(&mut payload)?,
            id: Decodable::decode(&mut payload)?,
            nonce: Decodable::decode(&mut payload)?,
            version: if payload.is_empty() { 0 } else { u8::decode(&mut payload)? },
        };
        *buf = &buf[header.payload_length..];
        Ok(body)
    }
}

/// RLP body of an EIP-8 ack message.
#[derive(Debug, RlpEncodable)]
struct AckBody {
    ephemeral_id: PeerId,
    nonce: B256,
    version: u8,
}

impl Decodable for AckBody {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString)
        }
        let mut payload = &buf[..header.payload_length];
        let body = Self {
            ephemeral_id: Decodable::decode(&mut payload)?,
            nonce: Decodable::decode(&mut payload)?,
            version: if payload.is_empty() { 0 } else { u8::decode(&mut payload)? },
        };
        *buf = &buf[header.payload_length..];
        Ok(body)
    }
}

const fn padded_len(len: usize) -> usize {
    if len % 16 == 0 {
        len
    } else {
        (len / 16 + 1) * 16
    }
}

/// Appends 100 to 250 random bytes, hiding the message size from observers.
fn pad_eip8(plain: &mut BytesMut) {
    let mut rng = thread_rng();
    let padding = rng.gen_range(100..=250);
    let start = plain.len();
    plain.resize(start + padding, 0);
    rng.fill(&mut plain[start..]);
}
