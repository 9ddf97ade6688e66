//! Body encryption for reserved mailboxes.
//!
//! Recipients hand over an RSA public key as base64 of either a PEM
//! document or raw SubjectPublicKeyInfo DER. Bodies are encrypted with
//! RSA-OAEP (SHA-256) and stored base64-encoded, which is what the browser
//! client decrypts with WebCrypto.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand_core::OsRng;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use sha2::Sha256;

use crate::{EphimailError, Result};

/// Encrypts message bodies for a recipient's public key.
pub trait BodyEncryptor: Send + Sync {
    /// Encrypt the raw message `body` for `public_key`, returning the stored
    /// (base64 text) representation.
    fn encrypt(&self, body: &[u8], public_key: &str) -> Result<String>;
}

/// RSA-OAEP with SHA-256 over the whole body.
///
/// The body must fit in one OAEP block (key size minus 66 bytes); longer
/// bodies fail and the caller decides what to store instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct RsaOaepEncryptor;

impl RsaOaepEncryptor {
    /// Create a new encryptor.
    pub fn new() -> Self {
        Self
    }

    /// Decode a base64 public key (PEM or SPKI DER).
    pub fn parse_public_key(public_key: &str) -> Result<RsaPublicKey> {
        let bytes = STANDARD
            .decode(public_key.trim())
            .map_err(|e| EphimailError::Encryption(format!("failed to decode public key: {e}")))?;

        let parsed = match std::str::from_utf8(&bytes) {
            Ok(text) if text.contains("-----BEGIN") => RsaPublicKey::from_public_key_pem(text),
            _ => RsaPublicKey::from_public_key_der(&bytes),
        };
        parsed.map_err(|e| EphimailError::Encryption(format!("failed to parse public key: {e}")))
    }
}

impl BodyEncryptor for RsaOaepEncryptor {
    fn encrypt(&self, body: &[u8], public_key: &str) -> Result<String> {
        let key = Self::parse_public_key(public_key)?;
        let ciphertext = key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), body)
            .map_err(|e| EphimailError::Encryption(format!("failed to encrypt email: {e}")))?;
        Ok(STANDARD.encode(ciphertext))
    }
}
