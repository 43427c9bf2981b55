//! sealdrop-crypto: client-side E2E encryption for sealdrop shares
//!
//! Every share is sealed under one random 256-bit key that never reaches the server:
//! ```text
//! SymmetricKey (256-bit, OS CSPRNG)  ──►  share URL fragment  #base64url(key)
//!   ├── filename envelope: AES-256-GCM  iv(12) || ct || tag(16)   → X-Filename header
//!   └── content envelope:  AES-256-GCM  iv(12) || ct || tag(16)   → request body
//! ```
//!
//! Legacy links instead derive the key with PBKDF2-HMAC-SHA256 from a password and a
//! 32-byte salt that travels in front of the filename envelope.

pub mod envelope;
pub mod error;
pub mod filename;
pub mod kdf;
pub mod keys;

pub use envelope::{decrypt, encrypt};
pub use error::{CryptoError, CryptoResult};
pub use filename::FilenameHeader;
pub use kdf::{derive_legacy_key, generate_password, generate_salt};
pub use keys::{decode_key, encode_key, generate_key, SymmetricKey};

/// Size of a content key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM IV (96-bit)
pub const IV_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the legacy PBKDF2 salt carried in the filename header
pub const SALT_SIZE: usize = 32;

/// PBKDF2-HMAC-SHA256 iteration count for legacy password-derived keys
pub const PBKDF2_ITERATIONS: u32 = 100_000;
