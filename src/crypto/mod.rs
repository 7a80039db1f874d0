//! Cryptographic primitives.
//!
//! This module provides:
//! - RSA-OAEP(SHA-256) key pairs and chunked encryption
//! - AES-128-CBC with address-derived IVs
//! - PBKDF2-SHA256 key derivation and secure random bytes
//! - secp256k1 recoverable signatures and typed-data digests

pub mod asymmetric;
pub mod kdf;
pub mod keys;
pub mod signing;
pub mod symmetric;

pub use asymmetric::{AsymmetricError, PLAINTEXT_CHUNK};
pub use kdf::{derive_key, random_bytes, PBKDF2_ITERATIONS};
pub use keys::{
    decode_public_key_der, decode_public_key_pem, decode_secret_key_pem, encode_public_key_der,
    encode_public_key_pem, encode_secret_key_pem, load_public_key, load_secret_key, KeyError,
    KeyPair,
};
pub use signing::{keccak256, recover_address, typed_data_digest, EthKey, SigningError, TypedDomain};
pub use symmetric::{announcement_key, iv_from_address, SymmetricError};
