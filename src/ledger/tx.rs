//! Legacy (EIP-155) transaction encoding, signing and sender recovery.

use rlp::{Rlp, RlpStream};
use thiserror::Error;

use super::types::{Address, TxHash};
use crate::crypto::signing::{keccak256, recover_address, EthKey, SigningError};

/// Errors produced while building or parsing raw transactions.
#[derive(Error, Debug)]
pub enum TxError {
    #[error("Malformed transaction: {0}")]
    Malformed(String),

    #[error("Signature error: {0}")]
    Signature(#[from] SigningError),
}

impl From<rlp::DecoderError> for TxError {
    fn from(e: rlp::DecoderError) -> Self {
        TxError::Malformed(e.to_string())
    }
}

/// An unsigned legacy transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTx {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Option<Address>,
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

/// A signed transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone)]
pub struct SignedTx {
    pub raw: Vec<u8>,
    pub hash: TxHash,
}

/// A raw transaction after parsing and sender recovery.
#[derive(Debug, Clone)]
pub struct DecodedTx {
    pub tx: LegacyTx,
    pub from: Address,
    pub hash: TxHash,
}

/// Big-endian bytes with leading zeros removed, as RLP encodes integers.
fn uint_bytes(value: u128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

fn parse_uint(bytes: &[u8]) -> Result<u128, TxError> {
    if bytes.len() > 16 {
        return Err(TxError::Malformed("integer wider than 128 bits".to_string()));
    }
    Ok(bytes.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b)))
}

fn parse_u64(bytes: &[u8]) -> Result<u64, TxError> {
    u64::try_from(parse_uint(bytes)?).map_err(|_| TxError::Malformed("integer wider than 64 bits".to_string()))
}

impl LegacyTx {
    fn append_body(&self, stream: &mut RlpStream) {
        stream.append(&uint_bytes(u128::from(self.nonce)));
        stream.append(&uint_bytes(self.gas_price));
        stream.append(&uint_bytes(u128::from(self.gas_limit)));
        match &self.to {
            Some(to) => stream.append(&to.as_bytes().to_vec()),
            None => stream.append_empty_data(),
        };
        stream.append(&uint_bytes(self.value));
        stream.append(&self.data);
    }

    /// Hash signed by the sender: `keccak256(rlp([..body, chainId, 0, 0]))`.
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut stream = RlpStream::new_list(9);
        self.append_body(&mut stream);
        stream.append(&uint_bytes(u128::from(self.chain_id)));
        stream.append_empty_data();
        stream.append_empty_data();
        keccak256(&stream.out())
    }

    /// Signs with `key`, producing the raw envelope and its hash.
    pub fn sign(&self, key: &EthKey) -> Result<SignedTx, TxError> {
        let (signature, recovery_id) = key.sign_prehash(&self.signing_hash())?;
        let v = u128::from(recovery_id.to_byte()) + u128::from(self.chain_id) * 2 + 35;
        let sig_bytes = signature.to_bytes();

        let mut stream = RlpStream::new_list(9);
        self.append_body(&mut stream);
        stream.append(&uint_bytes(v));
        stream.append(&trim_leading_zeros(&sig_bytes[..32]));
        stream.append(&trim_leading_zeros(&sig_bytes[32..]));

        let raw = stream.out().to_vec();
        let hash = TxHash::of_raw(&raw);
        Ok(SignedTx { raw, hash })
    }
}

/// Parses a signed legacy transaction and recovers its sender.
pub fn decode_signed(raw: &[u8]) -> Result<DecodedTx, TxError> {
    let rlp = Rlp::new(raw);
    if !rlp.is_list() || rlp.item_count()? != 9 {
        return Err(TxError::Malformed("expected a 9-item list".to_string()));
    }

    let field = |i: usize| -> Result<Vec<u8>, TxError> { Ok(rlp.at(i)?.data()?.to_vec()) };

    let to_bytes = field(3)?;
    let to = match to_bytes.len() {
        0 => None,
        20 => Some(Address::from_slice(&to_bytes).map_err(|e| TxError::Malformed(e.to_string()))?),
        n => return Err(TxError::Malformed(format!("recipient of {n} bytes"))),
    };

    let v = parse_u64(&field(6)?)?;
    if v < 35 {
        return Err(TxError::Malformed("pre-EIP-155 signature".to_string()));
    }
    let chain_id = (v - 35) / 2;
    let recovery = ((v - 35) % 2) as u8;

    let tx = LegacyTx {
        nonce: parse_u64(&field(0)?)?,
        gas_price: parse_uint(&field(1)?)?,
        gas_limit: parse_u64(&field(2)?)?,
        to,
        value: parse_uint(&field(4)?)?,
        data: field(5)?,
        chain_id,
    };

    let r = field(7)?;
    let s = field(8)?;
    if r.len() > 32 || s.len() > 32 {
        return Err(TxError::Malformed("signature component too wide".to_string()));
    }
    let mut signature = [0u8; 65];
    signature[32 - r.len()..32].copy_from_slice(&r);
    signature[64 - s.len()..64].copy_from_slice(&s);
    signature[64] = recovery;

    let from = recover_address(&tx.signing_hash(), &signature)?;
    Ok(DecodedTx {
        tx,
        from,
        hash: TxHash::of_raw(raw),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> LegacyTx {
        LegacyTx {
            nonce: 7,
            gas_price: 20_000_000_000,
            gas_limit: 21_576,
            to: Some(Address([0x42; 20])),
            value: 1,
            data: vec![0x21, 0x99, 0xd5, 0xcd, 0x00, 0x98],
            chain_id: 1337,
        }
    }

    #[test]
    fn test_sign_then_recover_sender() {
        let key = EthKey::generate();
        let tx = sample_tx();

        let signed = tx.sign(&key).unwrap();
        let decoded = decode_signed(&signed.raw).unwrap();

        assert_eq!(decoded.from, key.address());
        assert_eq!(decoded.tx, tx);
        assert_eq!(decoded.hash, signed.hash);
    }

    #[test]
    fn test_zero_values_encode_as_empty() {
        let key = EthKey::generate();
        let tx = LegacyTx {
            nonce: 0,
            value: 0,
            data: Vec::new(),
            ..sample_tx()
        };

        let decoded = decode_signed(&tx.sign(&key).unwrap().raw).unwrap();
        assert_eq!(decoded.tx.nonce, 0);
        assert_eq!(decoded.tx.value, 0);
        assert!(decoded.tx.data.is_empty());
    }

    #[test]
    fn test_signing_hash_binds_chain_id() {
        let other_chain = LegacyTx {
            chain_id: 1,
            ..sample_tx()
        };
        assert_ne!(other_chain.signing_hash(), sample_tx().signing_hash());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(decode_signed(&[0xc0]).is_err());
        assert!(decode_signed(&[0x01, 0x02, 0x03]).is_err());
    }
}
