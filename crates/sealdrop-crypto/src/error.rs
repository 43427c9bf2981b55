use sealdrop_core::ShareError;
use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Malformed base64, truncated envelope, or wrong salt length.
    #[error("malformed data: {0}")]
    Format(String),

    #[error("key rejected: {0}")]
    KeyImport(String),

    /// Tag mismatch. Wrong key and tampering are deliberately indistinguishable.
    #[error("decryption failed")]
    Decryption,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("key derivation failed: {0}")]
    Kdf(String),
}

impl From<CryptoError> for ShareError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Format(msg) => ShareError::Format(msg),
            CryptoError::KeyImport(msg) => ShareError::KeyImport(msg),
            CryptoError::Decryption => ShareError::Decryption,
            other @ (CryptoError::Encryption(_) | CryptoError::Kdf(_)) => {
                ShareError::Other(anyhow::Error::new(other))
            }
        }
    }
}
