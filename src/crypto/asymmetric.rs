//! Chunked RSA-OAEP(SHA-256) encryption.
//!
//! A 2048-bit key with SHA-256 OAEP can seal at most 190 bytes at once, so
//! payloads are cut into fixed 0xB0-byte plaintext chunks, each chunk is
//! sealed independently and the 256-byte ciphertexts are concatenated.

use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;

/// Plaintext bytes per sealed chunk.
pub const PLAINTEXT_CHUNK: usize = 0xB0;

/// Errors that can occur during asymmetric encryption operations.
#[derive(Error, Debug)]
pub enum AsymmetricError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid ciphertext length {len}: not a multiple of {chunk}")]
    InvalidCiphertextLength { len: usize, chunk: usize },
}

/// Encrypts `plaintext` for `public_key`, chunk by chunk.
///
/// An empty plaintext still produces one sealed (empty) chunk.
pub fn encrypt(plaintext: &[u8], public_key: &RsaPublicKey) -> Result<Vec<u8>, AsymmetricError> {
    let mut rng = OsRng;
    let chunks: Vec<&[u8]> = if plaintext.is_empty() {
        vec![plaintext]
    } else {
        plaintext.chunks(PLAINTEXT_CHUNK).collect()
    };

    let mut out = Vec::with_capacity(chunks.len() * public_key.size());
    for chunk in chunks {
        let sealed = public_key
            .encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)
            .map_err(|e| AsymmetricError::EncryptionFailed(e.to_string()))?;
        out.extend_from_slice(&sealed);
    }
    Ok(out)
}

/// Reverses [`encrypt`]: splits `ciphertext` into modulus-sized chunks and
/// concatenates their plaintexts.
pub fn decrypt(ciphertext: &[u8], secret_key: &RsaPrivateKey) -> Result<Vec<u8>, AsymmetricError> {
    let chunk = secret_key.size();
    if ciphertext.is_empty() || ciphertext.len() % chunk != 0 {
        return Err(AsymmetricError::InvalidCiphertextLength {
            len: ciphertext.len(),
            chunk,
        });
    }

    let mut out = Vec::with_capacity(ciphertext.len() / chunk * PLAINTEXT_CHUNK);
    for sealed in ciphertext.chunks(chunk) {
        let plain = secret_key
            .decrypt(Oaep::new::<Sha256>(), sealed)
            .map_err(|e| AsymmetricError::DecryptionFailed(e.to_string()))?;
        out.extend_from_slice(&plain);
    }
    Ok(out)
}
