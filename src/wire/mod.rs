//! Wire message types and their binary codec.
//!
//! These are the payloads that get framed onto the chain. Decoding is
//! strict: trailing bytes, oversized fields and wrong fixed lengths are all
//! rejected rather than partially parsed.

pub mod announcement;
pub mod message;

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use announcement::{KeyAnnouncement, ANNOUNCEMENT_DOMAIN, ANNOUNCEMENT_TYPE};
pub use message::PrivateMessage;

/// Upper bound on any encoded wire message.
pub const MAX_WIRE_SIZE: u64 = 64 * 1024;

/// Errors that can occur while encoding or decoding wire messages.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Field {field} has length {got}, expected {expected}")]
    FieldLength {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Encoding failed: {0}")]
    Encode(String),
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_WIRE_SIZE)
        .reject_trailing_bytes()
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    options()
        .serialize(value)
        .map_err(|e| CodecError::Encode(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    options()
        .deserialize(bytes)
        .map_err(|e| CodecError::Malformed(e.to_string()))
}
