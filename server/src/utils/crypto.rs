//! Cryptographic utility functions

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Fill a buffer of `len` bytes from the operating system RNG.
pub fn try_generate_key(len: usize) -> Result<Vec<u8>, rand::Error> {
    let mut key = vec![0u8; len];
    OsRng.try_fill_bytes(&mut key)?;
    Ok(key)
}

/// Generate a cryptographically secure random hex token (`2 * byte_len` chars)
pub fn try_generate_token(byte_len: usize) -> Result<String, rand::Error> {
    try_generate_key(byte_len).map(hex::encode)
}

/// Generate a URL-safe random token, suitable for query parameters
pub fn try_generate_url_token(byte_len: usize) -> Result<String, rand::Error> {
    try_generate_key(byte_len).map(|bytes| URL_SAFE_NO_PAD.encode(bytes))
}

/// Constant-time string comparison to prevent timing attacks
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// PKCE S256 code challenge: `BASE64URL(SHA256(verifier))` without padding
pub fn pkce_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}
