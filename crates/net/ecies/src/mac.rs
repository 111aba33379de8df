use aes::{
    cipher::{BlockEncrypt, KeyInit},
    Aes256Enc, Block,
};
use alloy_primitives::{B128, B256};
use sha3::{Digest, Keccak256};

/// Bytes of one frame header as seen by the MAC.
pub type HeaderBytes = [u8; 16];

/// [`Ethereum MAC`](https://github.com/ethereum/devp2p/blob/master/rlpx.md#mac) state.
///
/// The ethereum MAC is a nonstandard MAC construction that uses AES-256 (without a mode, as a
/// block cipher) and Keccak-256. It only ever encrypts messages that are 128 bits long, and is
/// not defined as a general MAC.
#[derive(Clone, Debug)]
pub struct MAC {
    cipher: Aes256Enc,
    hasher: Keccak256,
}

impl MAC {
    /// Initialize the MAC with the given secret
    pub fn new(secret: B256) -> Self {
        Self { cipher: Aes256Enc::new(secret.as_slice().into()), hasher: Keccak256::new() }
    }

    /// Update the internal keccak256 hasher with the given data
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data)
    }

    /// Accumulate the given [`HeaderBytes`] into the MAC's internal state.
    pub fn update_header(&mut self, data: &HeaderBytes) {
        let mut encrypted = self.encrypted_digest();
        for (e, h) in encrypted.iter_mut().zip(data.iter()) {
            *e ^= *h;
        }
        self.hasher.update(encrypted);
    }

    /// Accumulate the given message body into the MAC's internal state.
    pub fn update_body(&mut self, data: &[u8]) {
        self.hasher.update(data);
        let prev = self.digest();
        let mut encrypted = self.encrypted_digest();
        for (e, p) in encrypted.iter_mut().zip(prev.iter()) {
            *e ^= *p;
        }
        self.hasher.update(encrypted);
    }

    /// Produce a digest by finalizing the internal keccak256 hasher and returning the first 128
    /// bits.
    pub fn digest(&self) -> B128 {
        B128::from_slice(&self.hasher.clone().finalize()[..16])
    }

    fn encrypted_digest(&self) -> Block {
        let mut block = Block::from(self.digest().0);
        self.cipher.encrypt_block(&mut block);
        block
    }
}
