//! AES-128 and SHA-256 as black-box primitives (§1, §4.2).
//!
//! Only two operations are exposed: single-block AES-128 ECB encrypt/decrypt
//! and `SHA-256(bytes) -> [u8; 32]`. No other cipher mode is wired up — the
//! security content of this format lives in how the key-derivation and
//! encryption-range logic in [`crate::password`] and [`crate::cmp`] apply
//! these primitives, not in the primitives themselves.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use sha2::{Digest, Sha256};

use crate::types::ENCRYPTION_BLOCK_BYTES;

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// An expanded AES-128 key, ready for repeated single-block ECB operations.
pub struct AesKey {
    cipher: Aes128,
}

impl AesKey {
    /// `K(x)` from §4.2: AES-128 key expansion of a 16-byte key.
    pub fn expand(key_bytes: &[u8; 16]) -> AesKey {
        AesKey {
            cipher: Aes128::new(GenericArray::from_slice(key_bytes)),
        }
    }

    /// Encrypt exactly one 16-byte block in place.
    pub fn encrypt_block(&self, block: &mut [u8; ENCRYPTION_BLOCK_BYTES]) {
        self.cipher
            .encrypt_block(GenericArray::from_mut_slice(block));
    }

    /// Decrypt exactly one 16-byte block in place.
    pub fn decrypt_block(&self, block: &mut [u8; ENCRYPTION_BLOCK_BYTES]) {
        self.cipher
            .decrypt_block(GenericArray::from_mut_slice(block));
    }

    /// Encrypt `buf` in place, block by block. `buf.len()` must be a
    /// multiple of 16 — the library never encrypts a partial tail (§4.2).
    pub fn encrypt_blocks(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len() % ENCRYPTION_BLOCK_BYTES, 0);
        for chunk in buf.chunks_exact_mut(ENCRYPTION_BLOCK_BYTES) {
            let block: &mut [u8; ENCRYPTION_BLOCK_BYTES] = chunk.try_into().unwrap();
            self.encrypt_block(block);
        }
    }

    /// Decrypt `buf` in place, block by block.
    pub fn decrypt_blocks(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len() % ENCRYPTION_BLOCK_BYTES, 0);
        for chunk in buf.chunks_exact_mut(ENCRYPTION_BLOCK_BYTES) {
            let block: &mut [u8; ENCRYPTION_BLOCK_BYTES] = chunk.try_into().unwrap();
            self.decrypt_block(block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecb_round_trips() {
        let key = AesKey::expand(&[0x42; 16]);
        let mut buf = *b"0123456789abcdef0123456789abcdef";
        let original = buf;
        key.encrypt_blocks(&mut buf);
        assert_ne!(buf, original);
        key.decrypt_blocks(&mut buf);
        assert_eq!(buf, original);
    }

    #[test]
    fn sha256_known_vector() {
        let digest = sha256(b"abc");
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sha256_empty_known_vector() {
        let digest = sha256(b"");
        assert_eq!(
            hex::encode(digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
