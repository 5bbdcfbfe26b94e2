use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

use crate::error::{Error, Result};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;

const KEY_CONTEXT: &str = "coffer 2026-01-01 backup payload key";

#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        EncryptionKey(bytes)
    }

    pub fn from_passphrase(passphrase: &str) -> Self {
        let bytes = blake3::derive_key(KEY_CONTEXT, passphrase.as_bytes());
        EncryptionKey(bytes)
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey(..)")
    }
}

// Payload layout: nonce followed by ciphertext, so decryption depends on
// nothing beyond the key.
pub fn encrypt(bytes: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|_| Error::EncryptionFailed)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, bytes)
        .map_err(|_| Error::EncryptionFailed)?;

    let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    payload.extend_from_slice(&nonce_bytes);
    payload.extend_from_slice(&ciphertext);
    Ok(payload)
}

pub fn decrypt(payload: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    if payload.len() < NONCE_SIZE {
        return Err(Error::PayloadTruncated(payload.len()));
    }

    let (nonce_bytes, ciphertext) = payload.split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|_| Error::DecryptionFailed)?;
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| Error::DecryptionFailed)
}
