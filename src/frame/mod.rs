//! Bit-per-transaction framing.
//!
//! A payload becomes a *frame*: one start marker, eight symbols per byte
//! (least significant bit first) and one end marker. Each symbol is later
//! carried by one transaction; see [`scheme`] for where the 4-bit tag ends
//! up and [`accumulator`] for the receiving state machine.
//!
//! ```text
//! start  1000
//! bit b  100b
//! end    1011
//! ```
//!
//! Receivers only ever look at the low two bits of a tag.

pub mod accumulator;
pub mod scheme;

use thiserror::Error;

pub use accumulator::{FrameEvent, PendingFrame};
pub use scheme::{encode_intents, AddressFieldScheme, DataFieldScheme, FramingScheme};

/// Tag of the start marker.
pub const START_TAG: u8 = 0b1000;

/// Tag of the end marker.
pub const END_TAG: u8 = 0b1011;

/// Tag prefix of a payload bit.
pub const DATA_TAG: u8 = 0b1000;

/// Mask applied by receivers to a tag.
pub const TAG_MASK: u8 = 0b11;

/// Errors that can occur while framing or reassembling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Incomplete frame: {missing} of {expected} bits missing")]
    Incomplete { expected: u64, missing: u64 },

    #[error("Frame carries {bits} bits, not a whole number of bytes")]
    NotByteAligned { bits: u64 },

    #[error("Frame does not begin with a start marker")]
    MissingStart,

    #[error("Frame does not end with an end marker")]
    MissingEnd,

    #[error("Unexpected marker inside frame at position {0}")]
    UnexpectedMarker(usize),

    #[error("No address with low bits {wanted:#04b} found in {attempts} attempts")]
    AddressSearchExhausted { wanted: u8, attempts: u32 },
}

/// One transaction's worth of frame content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Start,
    Bit(bool),
    End,
}

impl Symbol {
    /// The 4-bit tag written on chain.
    pub fn tag(self) -> u8 {
        match self {
            Symbol::Start => START_TAG,
            Symbol::Bit(bit) => DATA_TAG | u8::from(bit),
            Symbol::End => END_TAG,
        }
    }
}

/// Bits of `payload`, least significant bit of each byte first.
pub fn bytes_to_bits(payload: &[u8]) -> impl Iterator<Item = bool> + '_ {
    payload
        .iter()
        .flat_map(|byte| (0..8).map(move |shift| (byte >> shift) & 1 == 1))
}

/// Packs bits back into bytes, least significant bit first.
pub fn bits_to_bytes(bits: &[bool]) -> Result<Vec<u8>, FrameError> {
    if bits.len() % 8 != 0 {
        return Err(FrameError::NotByteAligned {
            bits: bits.len() as u64,
        });
    }
    Ok(bits
        .chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |byte, (shift, bit)| byte | (u8::from(*bit) << shift))
        })
        .collect())
}

/// Frames `payload`: start marker, `8 * len` bits, end marker.
pub fn encode_frame(payload: &[u8]) -> Vec<Symbol> {
    let mut symbols = Vec::with_capacity(payload.len() * 8 + 2);
    symbols.push(Symbol::Start);
    symbols.extend(bytes_to_bits(payload).map(Symbol::Bit));
    symbols.push(Symbol::End);
    symbols
}

/// Reverses [`encode_frame`] on an already ordered symbol stream.
pub fn decode_frame(symbols: &[Symbol]) -> Result<Vec<u8>, FrameError> {
    let (first, rest) = symbols.split_first().ok_or(FrameError::MissingStart)?;
    if *first != Symbol::Start {
        return Err(FrameError::MissingStart);
    }
    let (last, body) = rest.split_last().ok_or(FrameError::MissingEnd)?;
    if *last != Symbol::End {
        return Err(FrameError::MissingEnd);
    }

    let bits = body
        .iter()
        .enumerate()
        .map(|(i, symbol)| match symbol {
            Symbol::Bit(bit) => Ok(*bit),
            _ => Err(FrameError::UnexpectedMarker(i + 1)),
        })
        .collect::<Result<Vec<_>, _>>()?;
    bits_to_bytes(&bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tags() {
        assert_eq!(Symbol::Start.tag(), 0b1000);
        assert_eq!(Symbol::Bit(false).tag(), 0b1000);
        assert_eq!(Symbol::Bit(true).tag(), 0b1001);
        assert_eq!(Symbol::End.tag(), 0b1011);
    }

    proptest! {
        #[test]
        fn test_roundtrip_any_payload(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
            let frame = encode_frame(&payload);

            prop_assert_eq!(frame.len(), 8 * payload.len() + 2);
            prop_assert_eq!(frame.first(), Some(&Symbol::Start));
            prop_assert_eq!(frame.last(), Some(&Symbol::End));
            prop_assert!(frame[1..frame.len() - 1].iter().all(|s| matches!(s, Symbol::Bit(_))));
            prop_assert_eq!(decode_frame(&frame).unwrap(), payload);
        }
    }

    #[test]
    fn test_lsb_first_order() {
        let frame = encode_frame(&[0b0000_0110]);
        let bits: Vec<_> = frame[1..9].to_vec();
        assert_eq!(bits[0], Symbol::Bit(false));
        assert_eq!(bits[1], Symbol::Bit(true));
        assert_eq!(bits[2], Symbol::Bit(true));
        assert_eq!(bits[7], Symbol::Bit(false));
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert_eq!(decode_frame(&[]), Err(FrameError::MissingStart));
        assert_eq!(decode_frame(&[Symbol::Start]), Err(FrameError::MissingEnd));
        assert_eq!(
            decode_frame(&[Symbol::Start, Symbol::Bit(true), Symbol::End]),
            Err(FrameError::NotByteAligned { bits: 1 })
        );
        assert_eq!(
            decode_frame(&[Symbol::Start, Symbol::Start, Symbol::End]),
            Err(FrameError::UnexpectedMarker(1))
        );
    }
}
