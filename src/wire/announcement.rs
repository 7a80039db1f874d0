//! Signed encryption-key announcements.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{decode, encode, CodecError};
use crate::crypto::signing::{recover_address, typed_data_digest, TypedDomain, SIGNATURE_LEN};
use crate::ledger::{Address, LedgerError, PrimaryWallet};

/// Typed-data domain of announcement signatures. Kept byte-for-byte so
/// that signatures from existing peers still verify.
pub const ANNOUNCEMENT_DOMAIN: TypedDomain<'static> = TypedDomain {
    name: "Ethereum Private Message over Waku",
    version: "1",
};

/// Encoded typed-data struct signed by announcers.
pub const ANNOUNCEMENT_TYPE: &str = "PublishEncryptionPublicKey(string message,string encryptionPublicKey,string ownerAddress,string willUseAddr,string randomSeed)";

/// Fixed `message` member; the backquoted names are literal.
const CERTIFICATION: &str = "By signing this message you certify that messages addressed to `ownerAddress` must be encrypted with `encryptionPublicKey`";

/// "My messages should be encrypted with this key, and my next frame will
/// come from `will_use_address`."
///
/// Broadcast announcements carry an all-zero `random_seed`; replies carry a
/// fresh one that both sides use as the key-derivation salt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAnnouncement {
    pub eth_address: Address,
    pub will_use_address: Address,
    /// SPKI DER of the announcer's RSA key.
    pub encryption_public_key: Vec<u8>,
    pub random_seed: [u8; 32],
    /// `r || s || v` over [`KeyAnnouncement::signing_digest`].
    pub signature: Vec<u8>,
}

impl KeyAnnouncement {
    /// Typed-data digest over every field except the signature.
    ///
    /// Keys and seeds are hashed as bare lowercase hex, addresses as
    /// `0x`-prefixed lowercase hex.
    pub fn signing_digest(
        eth_address: &Address,
        will_use_address: &Address,
        encryption_public_key: &[u8],
        random_seed: &[u8; 32],
    ) -> [u8; 32] {
        let key_hex = hex::encode(encryption_public_key);
        let owner = eth_address.to_string();
        let will_use = will_use_address.to_string();
        let seed_hex = hex::encode(random_seed);
        typed_data_digest(
            &ANNOUNCEMENT_DOMAIN,
            ANNOUNCEMENT_TYPE,
            &[CERTIFICATION, &key_hex, &owner, &will_use, &seed_hex],
        )
    }

    /// Builds and signs an announcement with the primary identity.
    pub async fn create(
        wallet: &dyn PrimaryWallet,
        will_use_address: Address,
        encryption_public_key: Vec<u8>,
        random_seed: [u8; 32],
    ) -> Result<Self, LedgerError> {
        let eth_address = wallet.address();
        let digest = Self::signing_digest(&eth_address, &will_use_address, &encryption_public_key, &random_seed);
        let signature = wallet.sign_typed_data(digest).await?;

        Ok(Self {
            eth_address,
            will_use_address,
            encryption_public_key,
            random_seed,
            signature: signature.to_vec(),
        })
    }

    /// True when the signature recovers to `eth_address`.
    pub fn is_valid(&self) -> bool {
        let digest = Self::signing_digest(
            &self.eth_address,
            &self.will_use_address,
            &self.encryption_public_key,
            &self.random_seed,
        );
        match recover_address(&digest, &self.signature) {
            Ok(signer) => signer == self.eth_address,
            Err(e) => {
                debug!(error = %e, "announcement signature unrecoverable");
                false
            }
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let announcement: Self = decode(bytes)?;
        if announcement.signature.len() != SIGNATURE_LEN {
            return Err(CodecError::FieldLength {
                field: "signature",
                expected: SIGNATURE_LEN,
                got: announcement.signature.len(),
            });
        }
        if announcement.encryption_public_key.is_empty() {
            return Err(CodecError::FieldLength {
                field: "encryption_public_key",
                expected: 1,
                got: 0,
            });
        }
        Ok(announcement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signing::EthKey;
    use crate::ledger::LocalWallet;

    async fn signed() -> (KeyAnnouncement, Address) {
        let key = EthKey::generate();
        let owner = key.address();
        let wallet = LocalWallet::new(key);
        let announcement = KeyAnnouncement::create(&wallet, Address([0x77; 20]), vec![1, 2, 3, 4], [9u8; 32])
            .await
            .unwrap();
        (announcement, owner)
    }

    #[tokio::test]
    async fn test_signed_announcement_validates() {
        let (announcement, owner) = signed().await;
        assert_eq!(announcement.eth_address, owner);
        assert!(announcement.is_valid());
    }

    #[tokio::test]
    async fn test_mutating_any_field_invalidates() {
        let (announcement, _) = signed().await;

        let mut key_changed = announcement.clone();
        key_changed.encryption_public_key.push(5);
        assert!(!key_changed.is_valid());

        let mut will_use_changed = announcement.clone();
        will_use_changed.will_use_address = Address([0x78; 20]);
        assert!(!will_use_changed.is_valid());

        let mut seed_changed = announcement.clone();
        seed_changed.random_seed[0] ^= 1;
        assert!(!seed_changed.is_valid());

        let mut owner_changed = announcement.clone();
        owner_changed.eth_address = Address([0x01; 20]);
        assert!(!owner_changed.is_valid());

        let mut signature_truncated = announcement;
        signature_truncated.signature.pop();
        assert!(!signature_truncated.is_valid());
    }

    #[tokio::test]
    async fn test_bytes_roundtrip_preserves_validity() {
        let (announcement, _) = signed().await;
        let bytes = announcement.to_bytes().unwrap();
        let decoded = KeyAnnouncement::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, announcement);
        assert!(decoded.is_valid());
    }

    #[tokio::test]
    async fn test_malformed_bytes_rejected() {
        let (announcement, _) = signed().await;
        let bytes = announcement.to_bytes().unwrap();

        assert!(matches!(
            KeyAnnouncement::from_bytes(&bytes[..bytes.len() - 3]),
            Err(CodecError::Malformed(_))
        ));

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(matches!(KeyAnnouncement::from_bytes(&trailing), Err(CodecError::Malformed(_))));

        let mut short_signature = announcement;
        short_signature.signature.truncate(64);
        let bytes = short_signature.to_bytes().unwrap();
        assert!(matches!(
            KeyAnnouncement::from_bytes(&bytes),
            Err(CodecError::FieldLength { field: "signature", .. })
        ));
    }

    #[test]
    fn test_digest_uses_literal_certification_text() {
        let a = KeyAnnouncement::signing_digest(&Address([1; 20]), &Address([2; 20]), &[3], &[0; 32]);
        let b = KeyAnnouncement::signing_digest(&Address([1; 20]), &Address([2; 20]), &[3], &[0; 32]);
        assert_eq!(a, b);
        assert!(CERTIFICATION.contains("`ownerAddress`"));
    }
}
