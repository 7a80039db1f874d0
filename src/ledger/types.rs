//! Value types shared by every layer that touches the chain.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// Number of bytes in an account address.
pub const ADDRESS_LEN: usize = 20;

/// Errors produced when parsing hex-encoded chain values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseHexError {
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Invalid length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

fn parse_fixed<const N: usize>(s: &str) -> Result<[u8; N], ParseHexError> {
    let bytes = hex::decode(strip_0x(s.trim())).map_err(|e| ParseHexError::InvalidHex(e.to_string()))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| ParseHexError::InvalidLength {
            expected: N,
            got: bytes.len(),
        })
}

/// A 20-byte account address.
///
/// Displays as lowercase `0x`-prefixed hex, which is also the canonical
/// string form used for map keys and key-derivation seeds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// Creates an address from a byte slice of exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseHexError> {
        bytes
            .try_into()
            .map(Self)
            .map_err(|_| ParseHexError::InvalidLength {
                expected: ADDRESS_LEN,
                got: bytes.len(),
            })
    }

    /// Derives the address of an uncompressed secp256k1 public key
    /// (65 bytes, leading `0x04`).
    pub fn from_uncompressed_public_key(point: &[u8]) -> Self {
        let digest = Keccak256::digest(&point[1..]);
        let mut out = [0u8; ADDRESS_LEN];
        out.copy_from_slice(&digest[12..]);
        Self(out)
    }

    /// Derives the inbound mailbox address for this address:
    /// `keccak256(address)[0..20]`.
    pub fn mailbox(&self) -> Self {
        let digest = Keccak256::digest(self.0);
        let mut out = [0u8; ADDRESS_LEN];
        out.copy_from_slice(&digest[..ADDRESS_LEN]);
        Self(out)
    }

    /// The low two bits of the last byte, used by the address-field scheme.
    pub fn low_bits(&self) -> u8 {
        self.0[ADDRESS_LEN - 1] & 0b11
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Lowercase hex without the `0x` prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = ParseHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed::<ADDRESS_LEN>(s).map(Self)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            <[u8; ADDRESS_LEN]>::deserialize(deserializer).map(Self)
        }
    }
}

/// A 32-byte transaction hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TxHash(pub [u8; 32]);

impl TxHash {
    /// Hash of a raw signed transaction.
    pub fn of_raw(raw: &[u8]) -> Self {
        Self(Keccak256::digest(raw).into())
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self)
    }
}

impl FromStr for TxHash {
    type Err = ParseHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed::<32>(s).map(Self)
    }
}

/// Transaction detail as returned by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxDetail {
    pub hash: TxHash,
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub nonce: u64,
    pub input: Vec<u8>,
    pub value: u128,
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub block_number: u64,
    pub success: bool,
}

/// One abstract transaction of a frame, before nonce and gas are assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIntent {
    pub to: Address,
    /// Amount in wei.
    pub value: u128,
    pub data: Vec<u8>,
}

impl TxIntent {
    /// A plain value transfer.
    pub fn transfer(to: Address, value: u128) -> Self {
        Self {
            to,
            value,
            data: Vec::new(),
        }
    }

    /// Gas limit: intrinsic 21000 plus calldata cost (16 per non-zero
    /// byte, 4 per zero byte).
    pub fn gas_limit(&self) -> u64 {
        let calldata: u64 = self
            .data
            .iter()
            .map(|b| if *b == 0 { 4 } else { 16 })
            .sum();
        21_000 + calldata
    }
}

/// Wei per gwei.
pub const GWEI: u128 = 1_000_000_000;
