//! Password-derived authenticated encryption for the envelope body.
//!
//! PBKDF2-HMAC-SHA256 with a fixed iteration count and per-operation random
//! salt derives the AES-256-GCM key; the nonce is random per operation. Key
//! material is derived fresh for every call and never cached.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

pub const PBKDF2_ITERATIONS: u32 = 10_000;
/// Ceiling for iteration counts read back from an envelope header. No
/// revision of this format ever wrote more; a larger value is hostile input
/// that would pin the host thread in key derivation.
pub const MAX_PBKDF2_ITERATIONS: u32 = PBKDF2_ITERATIONS * 10;
pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;

/// Decode-only passphrase for envelopes written by the earlier format
/// revision, which encrypted without asking for a password. Weak
/// obfuscation, not a security boundary; never used when encoding.
pub const LEGACY_PASSPHRASE: &str = "vox-model-store";

/// Authentication failed: wrong password or tampered ciphertext.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AuthFailure;

pub(crate) fn derive_key(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations.max(1), &mut key);
    key
}

pub(crate) fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

pub(crate) fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

pub(crate) fn seal(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, AuthFailure> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AuthFailure)?;
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| AuthFailure)
}

pub(crate) fn open(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>, AuthFailure> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AuthFailure)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| AuthFailure)
}
