//! Share keys: generation and URL-fragment encoding

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};
use crate::KEY_SIZE;

/// Raw symmetric key material. Zeroized on drop.
///
/// Length is only checked when the key is used; AES-256-GCM accepts exactly
/// [`KEY_SIZE`] bytes and anything else surfaces as [`CryptoError::KeyImport`].
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    bytes: Vec<u8>,
}

impl SymmetricKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<[u8; KEY_SIZE]> for SymmetricKey {
    fn from(mut bytes: [u8; KEY_SIZE]) -> Self {
        let key = Self::from_bytes(bytes.to_vec());
        bytes.zeroize();
        key
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate `length` bytes of key material from the OS CSPRNG.
pub fn generate_key(length: usize) -> SymmetricKey {
    let mut bytes = vec![0u8; length];
    OsRng.fill_bytes(&mut bytes);
    SymmetricKey::from_bytes(bytes)
}

/// Encode a key for the share URL fragment: base64url, no padding.
pub fn encode_key(key: &SymmetricKey) -> String {
    URL_SAFE_NO_PAD.encode(key.as_bytes())
}

/// Decode a key from a share URL fragment.
///
/// Trailing `=` padding and the standard `+/` alphabet are tolerated; any other
/// character, or an impossible length, is a [`CryptoError::Format`].
pub fn decode_key(encoded: &str) -> CryptoResult<SymmetricKey> {
    decode_url_safe(encoded).map(SymmetricKey::from_bytes)
}

/// Lenient base64 decode shared by key fragments and filename headers.
pub(crate) fn decode_url_safe(encoded: &str) -> CryptoResult<Vec<u8>> {
    let trimmed = encoded.trim().trim_end_matches('=');

    let mut normalized = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        match ch {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' => normalized.push(ch),
            '+' => normalized.push('-'),
            '/' => normalized.push('_'),
            other => {
                return Err(CryptoError::Format(format!(
                    "invalid base64 character {other:?}"
                )))
            }
        }
    }

    URL_SAFE_NO_PAD
        .decode(normalized.as_bytes())
        .map_err(|e| CryptoError::Format(format!("invalid base64: {e}")))
}
