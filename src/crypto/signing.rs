//! secp256k1 signing with recoverable signatures and typed-data hashing.
//!
//! Account identities are secp256k1 keys; the account address is the last
//! 20 bytes of `keccak256` of the uncompressed public key. Signatures are
//! 65 bytes `r || s || v` with `v = 27 + recovery_id`, so the signer can be
//! recovered from a signature and the digest alone.

use std::fs;
use std::path::Path;

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use sha3::{Digest, Keccak256};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::ledger::Address;

/// Armor for identity key files.
const IDENTITY_KEY_HEADER: &str = "-----BEGIN CHAINWHISPER IDENTITY KEY-----";
const IDENTITY_KEY_FOOTER: &str = "-----END CHAINWHISPER IDENTITY KEY-----";

/// Length of a recoverable signature.
pub const SIGNATURE_LEN: usize = 65;

/// Errors that can occur during signing operations.
#[derive(Error, Debug)]
pub enum SigningError {
    #[error("Invalid signing key")]
    InvalidSigningKey,

    #[error("Invalid signature format")]
    InvalidSignature,

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Invalid key file format: {0}")]
    InvalidKeyFile(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A secp256k1 account key.
#[derive(Clone)]
pub struct EthKey {
    signing_key: SigningKey,
    address: Address,
}

impl std::fmt::Debug for EthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthKey")
            .field("address", &self.address)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl EthKey {
    /// Generates a fresh random key.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Builds a key from a 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, SigningError> {
        let signing_key = SigningKey::from_slice(bytes).map_err(|_| SigningError::InvalidSigningKey)?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = address_of(signing_key.verifying_key());
        Self {
            signing_key,
            address,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs a 32-byte digest, returning `r || s || v` with `v` in {27, 28}.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<[u8; SIGNATURE_LEN], SigningError> {
        let (signature, recovery_id) = self.sign_prehash(digest)?;
        let mut out = [0u8; SIGNATURE_LEN];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = 27 + recovery_id.to_byte();
        Ok(out)
    }

    /// Raw recoverable signature, for transaction signing where `v` is
    /// chain-dependent.
    pub fn sign_prehash(&self, digest: &[u8; 32]) -> Result<(Signature, RecoveryId), SigningError> {
        self.signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| SigningError::SigningFailed(e.to_string()))
    }

    /// Saves the secret scalar to an armored hex file (mode 0600 on unix).
    pub fn save_to_file(&self, path: &Path) -> Result<(), SigningError> {
        let secret = Zeroizing::new(hex::encode(self.signing_key.to_bytes()));
        let contents = format!("{}\n{}\n{}\n", IDENTITY_KEY_HEADER, secret.as_str(), IDENTITY_KEY_FOOTER);
        fs::write(path, contents)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    /// Loads a key saved with [`EthKey::save_to_file`]. A bare hex secret
    /// (optionally `0x`-prefixed) is accepted too.
    pub fn load_from_file(path: &Path) -> Result<Self, SigningError> {
        let contents = Zeroizing::new(fs::read_to_string(path)?);
        let body: String = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && *line != IDENTITY_KEY_HEADER && *line != IDENTITY_KEY_FOOTER)
            .collect();
        if body.starts_with("-----") {
            return Err(SigningError::InvalidKeyFile("unexpected armor".to_string()));
        }
        let body = body.trim_start_matches("0x");
        let bytes = Zeroizing::new(
            hex::decode(body).map_err(|e| SigningError::InvalidKeyFile(e.to_string()))?,
        );
        Self::from_secret_bytes(&bytes)
    }
}

fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    Address::from_uncompressed_public_key(point.as_bytes())
}

/// Recovers the signer address from a 65-byte signature over `digest`.
///
/// Accepts `v` as either `{0, 1}` or `{27, 28}`.
pub fn recover_address(digest: &[u8; 32], signature: &[u8]) -> Result<Address, SigningError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(SigningError::InvalidSignature);
    }
    let v = match signature[64] {
        v @ 0..=1 => v,
        v @ 27..=28 => v - 27,
        _ => return Err(SigningError::InvalidSignature),
    };
    let recovery_id = RecoveryId::from_byte(v).ok_or(SigningError::InvalidSignature)?;
    let sig = Signature::from_slice(&signature[..64]).map_err(|_| SigningError::InvalidSignature)?;
    let key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
        .map_err(|_| SigningError::InvalidSignature)?;
    Ok(address_of(&key))
}

/// `keccak256` helper.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Domain of a typed-data signature with only `name` and `version` set.
#[derive(Debug, Clone, Copy)]
pub struct TypedDomain<'a> {
    pub name: &'a str,
    pub version: &'a str,
}

impl TypedDomain<'_> {
    fn separator(&self) -> [u8; 32] {
        let type_hash = keccak256(b"EIP712Domain(string name,string version)");
        let mut buf = Vec::with_capacity(96);
        buf.extend_from_slice(&type_hash);
        buf.extend_from_slice(&keccak256(self.name.as_bytes()));
        buf.extend_from_slice(&keccak256(self.version.as_bytes()));
        keccak256(&buf)
    }
}

/// Digest of a typed-data struct whose members are all `string`.
///
/// `type_signature` is the canonical encoded type, e.g.
/// `Mail(string from,string body)`; `values` are the member values in
/// declaration order.
pub fn typed_data_digest(domain: &TypedDomain<'_>, type_signature: &str, values: &[&str]) -> [u8; 32] {
    let mut encoded = Vec::with_capacity(32 * (values.len() + 1));
    encoded.extend_from_slice(&keccak256(type_signature.as_bytes()));
    for value in values {
        encoded.extend_from_slice(&keccak256(value.as_bytes()));
    }
    let struct_hash = keccak256(&encoded);

    let mut message = Vec::with_capacity(66);
    message.extend_from_slice(&[0x19, 0x01]);
    message.extend_from_slice(&domain.separator());
    message.extend_from_slice(&struct_hash);
    keccak256(&message)
}
