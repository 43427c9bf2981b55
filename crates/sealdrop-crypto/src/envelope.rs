//! AES-256-GCM envelope: `[12-byte IV][ciphertext + 16-byte tag]`

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::SymmetricKey;
use crate::{IV_SIZE, KEY_SIZE, TAG_SIZE};

fn cipher_for(key: &SymmetricKey) -> CryptoResult<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| {
        CryptoError::KeyImport(format!(
            "AES-256-GCM needs a {KEY_SIZE}-byte key, got {} bytes",
            key.len()
        ))
    })
}

/// Seal `plaintext` under `key` with a fresh random IV.
pub fn encrypt(plaintext: &[u8], key: &SymmetricKey) -> CryptoResult<Vec<u8>> {
    let cipher = cipher_for(key)?;

    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut envelope = Vec::with_capacity(IV_SIZE + ciphertext.len());
    envelope.extend_from_slice(&iv);
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Open an envelope produced by [`encrypt`].
pub fn decrypt(envelope: &[u8], key: &SymmetricKey) -> CryptoResult<Vec<u8>> {
    if envelope.len() < IV_SIZE + TAG_SIZE {
        return Err(CryptoError::Format(format!(
            "envelope too short: {} bytes (expected at least {})",
            envelope.len(),
            IV_SIZE + TAG_SIZE
        )));
    }
    let cipher = cipher_for(key)?;

    let (iv, ciphertext) = envelope.split_at(IV_SIZE);
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::Decryption)
}
