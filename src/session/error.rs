//! Error types for the session layer.

use thiserror::Error;

use crate::crypto::{AsymmetricError, KeyError, SymmetricError};
use crate::frame::FrameError;
use crate::ledger::{Address, LedgerError, SubmitError};
use crate::wire::CodecError;

/// Errors that abort an outbound announcement or message.
///
/// Everything except `Submit` and `Ledger` happens before the first
/// transaction is sent.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("No encryption key known for {0}; wait for its announcement")]
    UnknownPeer(Address),

    #[error("No sending wallet for {0}; announce or connect first")]
    NoOutboundWallet(Address),

    #[error("Encoding error: {0}")]
    Codec(#[from] CodecError),

    #[error("Framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("RSA error: {0}")]
    Asymmetric(#[from] AsymmetricError),

    #[error("AES error: {0}")]
    Symmetric(#[from] SymmetricError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Submission failed: {0}")]
    Submit(#[from] SubmitError),
}

/// Why a completed frame produced no event.
///
/// These are per-frame: a failure never stops ingestion.
#[derive(Error, Debug)]
pub enum ReceiveError {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Announcement could not be decrypted with either the address key or the RSA key")]
    Undecryptable,

    #[error("Decoding error: {0}")]
    Codec(#[from] CodecError),

    #[error("Announcement claiming to be from {0} has an invalid signature")]
    InvalidSignature(Address),

    #[error("Announcement names {claimed} as its sending address but arrived from {sender}")]
    SenderMismatch { claimed: Address, sender: Address },

    #[error("Sending address {address} already belongs to peer {owner}")]
    AddressInUse { address: Address, owner: Address },

    #[error("Frame on the channel of unknown peer {0}")]
    UnknownPeer(Address),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("RSA error: {0}")]
    Asymmetric(#[from] AsymmetricError),

    #[error("AES error: {0}")]
    Symmetric(#[from] SymmetricError),

    #[error("Message is addressed to {0}, not to us")]
    WrongRecipient(Address),

    #[error("Message body is not valid UTF-8")]
    NotText,
}
