//! Wallets: the user's primary identity and per-batch disposable senders.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::tx::{LegacyTx, SignedTx};
use super::types::{Address, TxHash, TxIntent};
use super::{LedgerError, LedgerRpc};
use crate::crypto::signing::{EthKey, SIGNATURE_LEN};

/// The user's permanent identity.
///
/// Only three capabilities are needed from it, so a hardware or remote
/// signer can stand in for [`LocalWallet`].
#[async_trait]
pub trait PrimaryWallet: Send + Sync {
    fn address(&self) -> Address;

    /// Signs a typed-data digest, returning `r || s || v`.
    async fn sign_typed_data(&self, digest: [u8; 32]) -> Result<[u8; SIGNATURE_LEN], LedgerError>;

    /// Signs and submits a transaction from this identity.
    async fn send_transaction(
        &self,
        ledger: &dyn LedgerRpc,
        intent: &TxIntent,
        gas_price: u128,
    ) -> Result<TxHash, LedgerError>;
}

/// A primary wallet backed by a key held in process.
#[derive(Debug)]
pub struct LocalWallet {
    key: EthKey,
    // Nonce lookup and submission must not interleave between two sends.
    send_lock: Mutex<()>,
}

impl LocalWallet {
    pub fn new(key: EthKey) -> Self {
        Self {
            key,
            send_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl PrimaryWallet for LocalWallet {
    fn address(&self) -> Address {
        self.key.address()
    }

    async fn sign_typed_data(&self, digest: [u8; 32]) -> Result<[u8; SIGNATURE_LEN], LedgerError> {
        self.key
            .sign_digest(&digest)
            .map_err(|e| LedgerError::Signing(e.to_string()))
    }

    async fn send_transaction(
        &self,
        ledger: &dyn LedgerRpc,
        intent: &TxIntent,
        gas_price: u128,
    ) -> Result<TxHash, LedgerError> {
        let _guard = self.send_lock.lock().await;
        let nonce = ledger.transaction_count(self.key.address()).await?;
        let chain_id = ledger.chain_id().await?;
        let signed = sign_intent(&self.key, intent, nonce, gas_price, chain_id)?;
        debug!(from = %self.key.address(), nonce, to = %intent.to, "primary wallet sending");
        ledger.send_raw_transaction(&signed.raw).await
    }
}

/// A freshly generated sender used for one framed batch.
#[derive(Debug, Clone)]
pub struct DisposableWallet {
    key: EthKey,
}

impl Default for DisposableWallet {
    fn default() -> Self {
        Self::generate()
    }
}

impl DisposableWallet {
    pub fn generate() -> Self {
        Self { key: EthKey::generate() }
    }

    pub fn address(&self) -> Address {
        self.key.address()
    }

    /// Signs `intent` at the given nonce and gas price.
    pub fn sign(&self, intent: &TxIntent, nonce: u64, gas_price: u128, chain_id: u64) -> Result<SignedTx, LedgerError> {
        sign_intent(&self.key, intent, nonce, gas_price, chain_id)
    }
}

fn sign_intent(
    key: &EthKey,
    intent: &TxIntent,
    nonce: u64,
    gas_price: u128,
    chain_id: u64,
) -> Result<SignedTx, LedgerError> {
    let tx = LegacyTx {
        nonce,
        gas_price,
        gas_limit: intent.gas_limit(),
        to: Some(intent.to),
        value: intent.value,
        data: intent.data.clone(),
        chain_id,
    };
    tx.sign(key).map_err(|e| LedgerError::Signing(e.to_string()))
}
