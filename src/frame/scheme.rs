//! Where a symbol's tag lives inside a transaction.

use rand::RngCore;

use super::{encode_frame, FrameError, Symbol, TAG_MASK};
use crate::ledger::{Address, TxDetail, TxIntent};

/// Function-selector-like calldata prefix: a 4-byte selector, 12 zero
/// bytes of ABI padding and the first 38 hex digits of a dummy address.
/// The final byte is `0x9` followed by the tag nibble.
const CALLDATA_PREFIX: [u8; 35] = [
    0x21, 0x99, 0xd5, 0xcd, // selector
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
    0x68, 0x6d, 0x1d, 0x80, 0x70, 0xf7, 0xaa, 0x21, 0x3c, 0x7b, //
    0x12, 0xc4, 0x0b, 0x8a, 0x86, 0xfc, 0x72, 0xd5, 0x6c,
];

/// High nibble of the last calldata byte.
const CALLDATA_LAST_HIGH: u8 = 0x90;

/// Length of data-field calldata.
pub const CALLDATA_LEN: usize = CALLDATA_PREFIX.len() + 1;

/// A way of carrying a symbol tag in a transaction.
pub trait FramingScheme: Send + Sync {
    /// The transaction that carries `symbol`.
    fn intent_for(&self, symbol: Symbol) -> Result<TxIntent, FrameError>;

    /// The tag carried by `tx`, if `tx` belongs to this scheme.
    fn read_tag(&self, tx: &TxDetail) -> Option<u8>;
}

/// Every transaction goes to one mailbox; the tag is the low nibble of the
/// last calldata byte.
#[derive(Debug, Clone, Copy)]
pub struct DataFieldScheme {
    pub mailbox: Address,
}

impl DataFieldScheme {
    pub fn new(mailbox: Address) -> Self {
        Self { mailbox }
    }

    pub fn calldata(tag: u8) -> Vec<u8> {
        let mut data = Vec::with_capacity(CALLDATA_LEN);
        data.extend_from_slice(&CALLDATA_PREFIX);
        data.push(CALLDATA_LAST_HIGH | (tag & 0x0f));
        data
    }

    /// Tag nibble of well-formed calldata.
    pub fn tag_of(input: &[u8]) -> Option<u8> {
        let (last, prefix) = input.split_last()?;
        if prefix != CALLDATA_PREFIX.as_slice() || last & 0xf0 != CALLDATA_LAST_HIGH {
            return None;
        }
        Some(last & 0x0f)
    }
}

impl FramingScheme for DataFieldScheme {
    fn intent_for(&self, symbol: Symbol) -> Result<TxIntent, FrameError> {
        Ok(TxIntent {
            to: self.mailbox,
            value: 0,
            data: Self::calldata(symbol.tag()),
        })
    }

    fn read_tag(&self, tx: &TxDetail) -> Option<u8> {
        if tx.to != Some(self.mailbox) {
            return None;
        }
        Self::tag_of(&tx.input)
    }
}

/// Every transaction goes to a fresh random address whose low two bits
/// equal the tag's low two bits. The sender address identifies the frame.
#[derive(Debug, Clone, Copy)]
pub struct AddressFieldScheme {
    pub max_attempts: u32,
}

impl Default for AddressFieldScheme {
    fn default() -> Self {
        Self { max_attempts: 256 }
    }
}

impl AddressFieldScheme {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Rejection-samples a random address with `low_bits() == wanted`.
    pub fn find_address(&self, wanted: u8) -> Result<Address, FrameError> {
        let wanted = wanted & TAG_MASK;
        let mut rng = rand::thread_rng();
        let mut candidate = Address::default();
        for _ in 0..self.max_attempts {
            rng.fill_bytes(&mut candidate.0);
            if candidate.low_bits() == wanted {
                return Ok(candidate);
            }
        }
        Err(FrameError::AddressSearchExhausted {
            wanted,
            attempts: self.max_attempts,
        })
    }
}

impl FramingScheme for AddressFieldScheme {
    fn intent_for(&self, symbol: Symbol) -> Result<TxIntent, FrameError> {
        Ok(TxIntent::transfer(self.find_address(symbol.tag())?, 0))
    }

    fn read_tag(&self, tx: &TxDetail) -> Option<u8> {
        tx.to.map(|to| to.low_bits())
    }
}

/// Frames `payload` and maps every symbol to a transaction intent, in
/// submission order.
pub fn encode_intents(scheme: &dyn FramingScheme, payload: &[u8]) -> Result<Vec<TxIntent>, FrameError> {
    encode_frame(payload)
        .into_iter()
        .map(|symbol| scheme.intent_for(symbol))
        .collect()
}
