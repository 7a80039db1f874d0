//! Per-channel receive state machine: Idle -> Receiving -> Idle.

use std::collections::BTreeMap;

use super::{bits_to_bytes, FrameError, TAG_MASK};

const LOW_START: u8 = 0b00;
const LOW_END: u8 = 0b11;

/// What one observed tag did to a [`PendingFrame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// Not part of a frame.
    Ignored,
    /// A start marker opened a frame.
    Started,
    /// A payload bit was recorded.
    Recorded,
    /// An end marker closed the frame; the accumulator is idle again.
    Completed(Result<Vec<u8>, FrameError>),
}

/// Bits collected for one sender, keyed by transaction nonce.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingFrame {
    receiving: bool,
    start_nonce: Option<u64>,
    bits: BTreeMap<u64, bool>,
}

impl PendingFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_receiving(&self) -> bool {
        self.receiving
    }

    pub fn recorded(&self) -> usize {
        self.bits.len()
    }

    /// Feeds the tag of the transaction at `nonce`.
    ///
    /// While idle only a start marker (`..00`) matters. While receiving an
    /// end marker (`..11`) completes the frame and anything else records
    /// its low bit at `nonce`.
    pub fn observe(&mut self, nonce: u64, tag: u8) -> FrameEvent {
        let low = tag & TAG_MASK;

        if !self.receiving {
            if low != LOW_START {
                return FrameEvent::Ignored;
            }
            self.receiving = true;
            self.start_nonce = Some(nonce);
            self.bits.clear();
            return FrameEvent::Started;
        }

        if low == LOW_END {
            let result = self.reconstruct(nonce);
            self.reset();
            return FrameEvent::Completed(result);
        }

        self.bits.insert(nonce, low & 1 == 1);
        FrameEvent::Recorded
    }

    fn reset(&mut self) {
        self.receiving = false;
        self.start_nonce = None;
        self.bits.clear();
    }

    /// Packs bits from the first payload nonce up to (excluding) `end_nonce`.
    ///
    /// The first payload nonce is the lowest nonce seen, or the one right
    /// after the start marker if that is lower. Every nonce in the range
    /// must have been recorded.
    fn reconstruct(&self, end_nonce: u64) -> Result<Vec<u8>, FrameError> {
        let after_start = self.start_nonce.map(|n| n + 1);
        let min_observed = self.bits.keys().next().copied();
        let first = match (after_start, min_observed) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => end_nonce,
        };

        if end_nonce < first {
            return Err(FrameError::Incomplete {
                expected: 0,
                missing: 0,
            });
        }

        let expected = end_nonce - first;
        let mut bits = Vec::with_capacity(expected as usize);
        let mut missing = 0u64;
        for nonce in first..end_nonce {
            match self.bits.get(&nonce) {
                Some(bit) => bits.push(*bit),
                None => missing += 1,
            }
        }

        if missing > 0 {
            return Err(FrameError::Incomplete { expected, missing });
        }
        bits_to_bytes(&bits)
    }
}
