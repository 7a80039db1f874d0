//! Private chat messages.

use serde::{Deserialize, Serialize};

use super::{decode, encode, CodecError};
use crate::ledger::Address;

/// A message body addressed to one identity.
///
/// The recipient is inside the ciphertext so a receiver can reject frames
/// that decrypt cleanly but were meant for somebody else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMessage {
    pub to_address: Address,
    pub message: Vec<u8>,
}

impl PrivateMessage {
    pub fn new(to_address: Address, message: impl Into<Vec<u8>>) -> Self {
        Self {
            to_address,
            message: message.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        decode(bytes)
    }

    /// The body as text, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.message).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let msg = PrivateMessage::new(Address([5; 20]), "hello");
        let decoded = PrivateMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.text(), Some("hello"));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(PrivateMessage::from_bytes(&[]), Err(CodecError::Malformed(_))));
        assert!(PrivateMessage::from_bytes(&[0xff; 8]).is_err());
    }

    #[test]
    fn test_length_prefix_beyond_input_rejected() {
        let mut bytes = PrivateMessage::new(Address([5; 20]), "hello").to_bytes().unwrap();
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(PrivateMessage::from_bytes(&bytes), Err(CodecError::Malformed(_))));
    }
}
