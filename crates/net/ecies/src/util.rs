//! Utility functions for hashing, key agreement and encoding.

use crate::PeerId;
use alloy_primitives::B256;
use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, SecretKey};
use sha2::{Digest, Sha256};

/// Size of an uncompressed secp256k1 public key, including the `0x04` tag.
pub const UNCOMPRESSED_PUBLIC_KEY_SIZE: usize = 65;

pub(crate) fn sha256(data: &[u8]) -> B256 {
    B256::from_slice(&Sha256::digest(data))
}

/// Produces a `HMAC_SHA256` digest of the `input_data` chunks followed by `auth_data`, keyed
/// with `key`.
pub(crate) fn hmac_sha256(key: &[u8], input: &[&[u8]], auth_data: &[u8]) -> B256 {
    let mut hmac =
        Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length");
    for input in input {
        hmac.update(input);
    }
    hmac.update(auth_data);
    B256::from_slice(&hmac.finalize().into_bytes())
}

/// Converts a [`PublicKey`] to a [`PeerId`] by stripping the
/// `SECP256K1_TAG_PUBKEY_UNCOMPRESSED` tag and storing the rest of the slice in the [`PeerId`].
pub fn pk2id(pk: &PublicKey) -> PeerId {
    PeerId::from_slice(&pk.serialize_uncompressed()[1..])
}

/// Converts a [`PeerId`] to a [`PublicKey`] by prepending the
/// `SECP256K1_TAG_PUBKEY_UNCOMPRESSED` tag.
pub fn id2pk(id: PeerId) -> Result<PublicKey, secp256k1::Error> {
    let mut s = [0u8; UNCOMPRESSED_PUBLIC_KEY_SIZE];
    s[0] = 4;
    s[1..].copy_from_slice(id.as_slice());
    PublicKey::from_slice(&s)
}

/// Computes the x coordinate of the ECDH shared point. Unlike libsecp256k1's default ECDH the
/// coordinate is not hashed.
pub fn ecdh_x(public_key: &PublicKey, secret_key: &SecretKey) -> B256 {
    B256::from_slice(&secp256k1::ecdh::shared_secret_point(public_key, secret_key)[..32])
}

/// NIST SP 800-56 concatenation key derivation with SHA-256.
///
/// Fills `dest` with `SHA256(counter || secret || s1)` blocks, the 32-bit big-endian counter
/// starting at 1.
pub fn kdf(secret: B256, s1: &[u8], dest: &mut [u8]) {
    for (counter, chunk) in (1u32..).zip(dest.chunks_mut(32)) {
        let mut hasher = Sha256::new();
        hasher.update(counter.to_be_bytes());
        hasher.update(secret);
        hasher.update(s1);
        let block = hasher.finalize();
        chunk.copy_from_slice(&block[..chunk.len()]);
    }
}
