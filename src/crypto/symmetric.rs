//! AES-128-CBC with PKCS#7 padding and address-derived key material.
//!
//! The IV is not random: it is taken from a fixed slice of an address, so
//! two messages to the same address share an IV. This keeps the wire
//! format readable by existing peers but leaks equal plaintext prefixes.

use aes::Aes128;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use thiserror::Error;

use crate::ledger::Address;

/// AES-128 key length.
pub const KEY_SIZE: usize = 16;

/// CBC IV length.
pub const IV_SIZE: usize = 16;

type Encryptor = cbc::Encryptor<Aes128>;
type Decryptor = cbc::Decryptor<Aes128>;

/// Errors that can occur during symmetric encryption.
#[derive(Error, Debug)]
pub enum SymmetricError {
    #[error("Invalid key or IV length")]
    InvalidKeyLength,

    #[error("Decryption failed: bad padding or ciphertext length")]
    DecryptionFailed,
}

/// Encrypts `plaintext` with AES-128-CBC.
pub fn encrypt(plaintext: &[u8], key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE]) -> Result<Vec<u8>, SymmetricError> {
    let cipher = Encryptor::new_from_slices(key, iv).map_err(|_| SymmetricError::InvalidKeyLength)?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// Decrypts AES-128-CBC ciphertext and strips the padding.
pub fn decrypt(ciphertext: &[u8], key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE]) -> Result<Vec<u8>, SymmetricError> {
    let cipher = Decryptor::new_from_slices(key, iv).map_err(|_| SymmetricError::InvalidKeyLength)?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| SymmetricError::DecryptionFailed)
}

/// IV derived from an address: hex characters `7..39` of its 40-character
/// lowercase form, decoded back to 16 bytes.
///
/// The window starts on an odd nibble, so each IV byte straddles two
/// address bytes.
pub fn iv_from_address(address: &Address) -> [u8; IV_SIZE] {
    let bytes = address.as_bytes();
    let mut iv = [0u8; IV_SIZE];
    for (i, out) in iv.iter_mut().enumerate() {
        *out = (bytes[3 + i] << 4) | (bytes[4 + i] >> 4);
    }
    iv
}

/// Key used to seal broadcast announcements to `address`: its first 16 bytes.
pub fn announcement_key(address: &Address) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&address.as_bytes()[..KEY_SIZE]);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_address() -> Address {
        "0x00112233445566778899aabbccddeeff01234567".parse().unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [7u8; KEY_SIZE];
        let iv = [9u8; IV_SIZE];
        let plaintext = b"Hello over the ledger";

        let encrypted = encrypt(plaintext, &key, &iv).unwrap();
        assert_eq!(encrypted.len() % 16, 0);
        assert_eq!(decrypt(&encrypted, &key, &iv).unwrap(), plaintext);
    }

    #[test]
    fn test_empty_plaintext_pads_full_block() {
        let key = [1u8; KEY_SIZE];
        let iv = [2u8; IV_SIZE];

        let encrypted = encrypt(b"", &key, &iv).unwrap();
        assert_eq!(encrypted.len(), 16);
        assert!(decrypt(&encrypted, &key, &iv).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_key_fails_or_differs() {
        let iv = [0u8; IV_SIZE];
        let encrypted = encrypt(b"secret data here", &[1u8; KEY_SIZE], &iv).unwrap();

        match decrypt(&encrypted, &[2u8; KEY_SIZE], &iv) {
            Ok(plain) => assert_ne!(plain, b"secret data here"),
            Err(e) => assert!(matches!(e, SymmetricError::DecryptionFailed)),
        }
    }

    #[test]
    fn test_bad_length_rejected() {
        let result = decrypt(&[0u8; 15], &[0u8; KEY_SIZE], &[0u8; IV_SIZE]);
        assert!(matches!(result, Err(SymmetricError::DecryptionFailed)));
    }

    #[test]
    fn test_iv_from_address_slice() {
        let iv = iv_from_address(&sample_address());
        // hex chars 7..39 of "00112233445566778899aabbccddeeff01234567"
        let expected = hex::decode("3445566778899aabbccddeeff0123456").unwrap();
        assert_eq!(iv.as_slice(), expected.as_slice());
    }

    #[test]
    fn test_announcement_key_is_address_prefix() {
        let key = announcement_key(&sample_address());
        assert_eq!(key.as_slice(), &sample_address().as_bytes()[..16]);
    }
}
