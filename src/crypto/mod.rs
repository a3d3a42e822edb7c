//! Crypto primitives shared by the token, OTP, and TOTP engines.
//!
//! Nothing in here touches storage. Secrets are generated with `OsRng`,
//! hashed with SHA-256 (salted or peppered), compared in constant time, and
//! encrypted at rest with ChaCha20-Poly1305 (`nonce || ciphertext`, AAD-bound
//! to the owning record).

use anyhow::{anyhow, Context, Result};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Shortest accepted magic-link secret.
pub const MIN_SECRET_LENGTH: usize = 16;
/// Longest accepted magic-link secret.
pub const MAX_SECRET_LENGTH: usize = 96;

const SALT_LENGTH: usize = 16;
const SECRET_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a random alphanumeric secret of the requested length.
///
/// The length is clamped to a safe range, so settings cannot request a
/// trivially brute-forceable token.
///
/// # Errors
/// Returns an error if the system RNG fails.
pub fn generate_secret(length: usize) -> Result<String> {
    let length = length.clamp(MIN_SECRET_LENGTH, MAX_SECRET_LENGTH);
    let mut raw = vec![0u8; length];
    OsRng
        .try_fill_bytes(&mut raw)
        .context("failed to generate token secret")?;
    let mut secret = String::with_capacity(length);
    for byte in raw {
        let idx = usize::from(byte) % SECRET_ALPHABET.len();
        if let Some(&ch) = SECRET_ALPHABET.get(idx) {
            secret.push(ch as char);
        }
    }
    Ok(secret)
}

/// Generate a random salt for token hashing.
///
/// # Errors
/// Returns an error if the system RNG fails.
pub fn generate_salt() -> Result<Vec<u8>> {
    let mut salt = vec![0u8; SALT_LENGTH];
    OsRng
        .try_fill_bytes(&mut salt)
        .context("failed to generate salt")?;
    Ok(salt)
}

/// Generate an n-digit numeric one-time code.
///
/// # Errors
/// Returns an error if the system RNG fails.
pub fn generate_numeric_code(digits: usize) -> Result<String> {
    let digits = digits.clamp(4, 10);
    let mut raw = vec![0u8; digits];
    OsRng
        .try_fill_bytes(&mut raw)
        .context("failed to generate one-time code")?;
    Ok(raw.iter().map(|byte| char::from(b'0' + byte % 10)).collect())
}

/// `SHA-256(secret || salt)`, the at-rest form of a magic-link secret.
#[must_use]
pub fn hash_with_salt(secret: &str, salt: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(salt);
    hasher.finalize().to_vec()
}

/// `SHA-256(code || pepper)`, the at-rest form of an OTP code.
/// The pepper never leaves server configuration, so leaked rows alone are not
/// enough to recover or forge codes.
#[must_use]
pub fn hash_peppered(code: &str, pepper: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hasher.update(pepper);
    hasher.finalize().to_vec()
}

/// Constant-time equality for secret hashes.
#[must_use]
pub fn timing_safe_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Encrypt a secret for storage. Output is `nonce (12 bytes) || ciphertext`.
///
/// The AAD binds the ciphertext to its owning record so rows cannot be
/// swapped between users.
///
/// # Errors
/// Returns an error if the key length is wrong or encryption fails.
pub fn encrypt_secret(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if key.len() != 32 {
        return Err(anyhow!("encryption key must be 32 bytes"));
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| anyhow!("encryption failure: {e}"))?;

    let mut result = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt a secret produced by [`encrypt_secret`].
///
/// # Errors
/// Returns an error if the input is malformed, the AAD does not match, or
/// the ciphertext was tampered with.
pub fn decrypt_secret(key: &[u8], data: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if key.len() != 32 {
        return Err(anyhow!("encryption key must be 32 bytes"));
    }
    if data.len() < 12 {
        return Err(anyhow!("invalid ciphertext length"));
    }

    let (nonce_bytes, ciphertext) = data.split_at(12);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|e| anyhow!("decryption failure: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn generate_secret_clamps_length() {
        let short = generate_secret(1).unwrap();
        assert_eq!(short.len(), MIN_SECRET_LENGTH);
        let long = generate_secret(4096).unwrap();
        assert_eq!(long.len(), MAX_SECRET_LENGTH);
        let exact = generate_secret(32).unwrap();
        assert_eq!(exact.len(), 32);
        assert!(exact.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn generate_numeric_code_is_digits_only() {
        let code = generate_numeric_code(6).unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn hash_with_salt_depends_on_both_inputs() {
        let hash = hash_with_salt("secret", b"salt-a");
        assert_eq!(hash, hash_with_salt("secret", b"salt-a"));
        assert_ne!(hash, hash_with_salt("secret", b"salt-b"));
        assert_ne!(hash, hash_with_salt("other", b"salt-a"));
        assert_eq!(hash.len(), 32);
    }

    #[test]
    fn timing_safe_eq_matches_equality() {
        assert!(timing_safe_eq(b"abc", b"abc"));
        assert!(!timing_safe_eq(b"abc", b"abd"));
        assert!(!timing_safe_eq(b"abc", b"abcd"));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn encrypt_decrypt_round_trip() {
        let key = [7u8; 32];
        let aad = b"totp-secret:v1|user";
        let encrypted = encrypt_secret(&key, b"the-seed", aad).unwrap();
        assert_ne!(encrypted, b"the-seed");
        let decrypted = decrypt_secret(&key, &encrypted, aad).unwrap();
        assert_eq!(decrypted, b"the-seed");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn decrypt_fails_on_wrong_aad() {
        let key = [7u8; 32];
        let encrypted = encrypt_secret(&key, b"seed", b"aad-one").unwrap();
        assert!(decrypt_secret(&key, &encrypted, b"aad-two").is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn decrypt_fails_on_tampered_ciphertext() {
        let key = [7u8; 32];
        let mut encrypted = encrypt_secret(&key, b"seed", b"aad").unwrap();
        let len = encrypted.len();
        if let Some(byte) = encrypted.get_mut(len - 1) {
            *byte ^= 0xFF;
        }
        assert!(decrypt_secret(&key, &encrypted, b"aad").is_err());
    }

    #[test]
    fn rejects_bad_key_length() {
        assert!(encrypt_secret(&[0u8; 16], b"seed", b"aad").is_err());
        assert!(decrypt_secret(&[0u8; 16], &[0u8; 40], b"aad").is_err());
    }
}
