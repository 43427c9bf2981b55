//! Legacy key derivation: PBKDF2-HMAC-SHA256 password → share key

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::keys::SymmetricKey;
use crate::{KEY_SIZE, PBKDF2_ITERATIONS, SALT_SIZE};

/// Random bytes behind a generated legacy password (24 base64url characters).
const PASSWORD_BYTES: usize = 18;

/// Derive a 256-bit share key from a password and the 32-byte salt carried in
/// the filename header.
///
/// 100 000 iterations takes tens of milliseconds; async callers should run
/// this on a blocking thread.
pub fn derive_legacy_key(password: &SecretString, salt: &[u8; SALT_SIZE]) -> SymmetricKey {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        password.expose_secret().as_bytes(),
        salt,
        PBKDF2_ITERATIONS,
        &mut key,
    );
    SymmetricKey::from(key)
}

/// Fresh salt for one legacy upload.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Password used when a legacy upload is made without one.
pub fn generate_password() -> SecretString {
    let mut raw = [0u8; PASSWORD_BYTES];
    OsRng.fill_bytes(&mut raw);
    let password = URL_SAFE_NO_PAD.encode(raw);
    raw.zeroize();
    SecretString::from(password)
}
