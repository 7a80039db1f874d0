//! Ledger access: chain value types, the RPC boundary, wallets and the
//! ordered batch submitter.
//!
//! Everything above this module talks to the chain through [`LedgerRpc`],
//! so the same code runs against a JSON-RPC node ([`json_rpc::JsonRpcLedger`])
//! and against the in-process [`memory::MemoryLedger`].

pub mod gateway;
pub mod json_rpc;
pub mod memory;
pub mod poll;
pub mod tx;
pub mod types;
pub mod wallet;

use async_trait::async_trait;
use thiserror::Error;

pub use gateway::{submit_ordered, GatewaySettings, SubmitError, SubmitReport};
pub use json_rpc::JsonRpcLedger;
pub use memory::MemoryLedger;
pub use poll::{CancelHandle, PollError, Poller};
pub use types::{Address, ParseHexError, Receipt, TxDetail, TxHash, TxIntent, GWEI};
pub use wallet::{DisposableWallet, LocalWallet, PrimaryWallet};

/// Errors returned by a ledger backend.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Signing failed: {0}")]
    Signing(String),
}

impl From<reqwest::Error> for LedgerError {
    fn from(e: reqwest::Error) -> Self {
        LedgerError::Transport(e.to_string())
    }
}

impl From<ParseHexError> for LedgerError {
    fn from(e: ParseHexError) -> Self {
        LedgerError::InvalidResponse(e.to_string())
    }
}

/// Read and write access to a chain.
///
/// Every method is a suspension point; implementations must be safe to
/// call from many tasks at once.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Number of the latest block.
    async fn block_number(&self) -> Result<u64, LedgerError>;

    /// Transaction hashes of block `number`, or `None` if it does not exist yet.
    async fn block_transactions(&self, number: u64) -> Result<Option<Vec<TxHash>>, LedgerError>;

    /// Full transaction detail, or `None` if unknown.
    async fn transaction(&self, hash: TxHash) -> Result<Option<TxDetail>, LedgerError>;

    /// Balance in wei.
    async fn balance(&self, address: Address) -> Result<u128, LedgerError>;

    /// Next nonce for `address`, counting pending transactions.
    async fn transaction_count(&self, address: Address) -> Result<u64, LedgerError>;

    /// Current gas price in wei.
    async fn gas_price(&self) -> Result<u128, LedgerError>;

    async fn chain_id(&self) -> Result<u64, LedgerError>;

    /// Submits a signed raw transaction.
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, LedgerError>;

    /// Receipt of a mined transaction, or `None` while pending.
    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, LedgerError>;
}
