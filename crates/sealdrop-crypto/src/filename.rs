//! Encrypted filename transport for the `X-Filename` header
//!
//! Modern links carry `base64(envelope)`; legacy links carry
//! `base64(salt || envelope)` so a recipient holding only the password can
//! derive the key before touching the body.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::envelope::{decrypt, encrypt};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::{decode_url_safe, SymmetricKey};
use crate::{IV_SIZE, SALT_SIZE, TAG_SIZE};

pub struct FilenameHeader;

impl FilenameHeader {
    pub fn encode_modern(name: &str, key: &SymmetricKey) -> CryptoResult<String> {
        let envelope = encrypt(name.as_bytes(), key)?;
        Ok(STANDARD.encode(envelope))
    }

    pub fn encode_legacy(
        name: &str,
        key: &SymmetricKey,
        salt: &[u8; SALT_SIZE],
    ) -> CryptoResult<String> {
        let envelope = encrypt(name.as_bytes(), key)?;
        let mut blob = Vec::with_capacity(SALT_SIZE + envelope.len());
        blob.extend_from_slice(salt);
        blob.extend_from_slice(&envelope);
        Ok(STANDARD.encode(blob))
    }

    /// Split a legacy header into its salt and filename envelope.
    pub fn split_legacy(header: &str) -> CryptoResult<([u8; SALT_SIZE], Vec<u8>)> {
        let blob = decode_url_safe(header)?;
        if blob.len() < SALT_SIZE + IV_SIZE + TAG_SIZE {
            return Err(CryptoError::Format(format!(
                "legacy filename header too short: {} bytes",
                blob.len()
            )));
        }
        let (salt_bytes, envelope) = blob.split_at(SALT_SIZE);
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(salt_bytes);
        Ok((salt, envelope.to_vec()))
    }

    pub fn decode_modern(header: &str, key: &SymmetricKey) -> CryptoResult<String> {
        let envelope = decode_url_safe(header)?;
        Self::open(&envelope, key)
    }

    /// Decrypt a legacy header with the key already derived from its salt.
    pub fn decode_legacy(header: &str, key: &SymmetricKey) -> CryptoResult<String> {
        let (_, envelope) = Self::split_legacy(header)?;
        Self::open(&envelope, key)
    }

    /// Decrypt a bare filename envelope.
    pub fn open(envelope: &[u8], key: &SymmetricKey) -> CryptoResult<String> {
        let plaintext = decrypt(envelope, key)?;
        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::Format("filename is not valid UTF-8".into()))
    }
}
