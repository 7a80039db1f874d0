//! In-process simulated chain for tests and offline runs.
//!
//! Accepts the same signed raw transactions a node would, recovers their
//! senders, enforces nonce order and balances, and seals pending
//! transactions into a new block whenever confirmed state is read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::tx::{decode_signed, DecodedTx};
use super::types::{Address, Receipt, TxDetail, TxHash, GWEI};
use super::{LedgerError, LedgerRpc};

/// Chain id reported by a default [`MemoryLedger`].
pub const DEFAULT_CHAIN_ID: u64 = 1337;

#[derive(Default)]
struct ChainState {
    balances: HashMap<Address, u128>,
    /// Outgoing value + gas of pending transactions, per sender.
    reserved: HashMap<Address, u128>,
    /// Next nonce per sender, pending transactions included.
    nonces: HashMap<Address, u64>,
    blocks: Vec<Vec<TxHash>>,
    transactions: HashMap<TxHash, TxDetail>,
    receipts: HashMap<TxHash, Receipt>,
    pending: Vec<(DecodedTx, u128)>,
}

impl ChainState {
    fn seal(&mut self) -> u64 {
        let number = self.blocks.len() as u64;
        let mut hashes = Vec::with_capacity(self.pending.len());

        for (decoded, cost) in std::mem::take(&mut self.pending) {
            let from = decoded.from;
            *self.balances.entry(from).or_default() -= cost;
            *self.reserved.entry(from).or_default() -= cost;
            if let Some(to) = decoded.tx.to {
                *self.balances.entry(to).or_default() += decoded.tx.value;
            }

            self.transactions.insert(
                decoded.hash,
                TxDetail {
                    hash: decoded.hash,
                    from,
                    to: decoded.tx.to,
                    nonce: decoded.tx.nonce,
                    input: decoded.tx.data,
                    value: decoded.tx.value,
                },
            );
            self.receipts.insert(
                decoded.hash,
                Receipt {
                    block_number: number,
                    success: true,
                },
            );
            hashes.push(decoded.hash);
        }

        debug!(block = number, transactions = hashes.len(), "sealed block");
        self.blocks.push(hashes);
        number
    }

    fn seal_pending(&mut self) {
        if !self.pending.is_empty() {
            self.seal();
        }
    }
}

/// A simulated chain implementing [`LedgerRpc`].
pub struct MemoryLedger {
    chain_id: u64,
    gas_price: u128,
    fetch_delay: Option<Duration>,
    state: Mutex<ChainState>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    failing_fetches: AtomicUsize,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryLedger {
    /// A chain with only the empty genesis block.
    pub fn new() -> Self {
        let state = ChainState {
            blocks: vec![Vec::new()],
            ..Default::default()
        };
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            gas_price: GWEI,
            fetch_delay: None,
            state: Mutex::new(state),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            failing_fetches: AtomicUsize::new(0),
        }
    }

    /// Delays every transaction-detail fetch by `delay`.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn with_gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = gas_price;
        self
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, ChainState>, LedgerError> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Transport("ledger state poisoned".to_string()))
    }

    /// Adds `wei` to `address` outside of any transaction.
    pub fn credit(&self, address: Address, wei: u128) -> Result<(), LedgerError> {
        *self.state()?.balances.entry(address).or_default() += wei;
        Ok(())
    }

    /// Seals all pending transactions into a new block, even if none are
    /// pending. Returns the new block number.
    pub fn mine(&self) -> Result<u64, LedgerError> {
        Ok(self.state()?.seal())
    }

    pub fn pending_count(&self) -> Result<usize, LedgerError> {
        Ok(self.state()?.pending.len())
    }

    /// Highest number of detail fetches observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn reset_peak(&self) {
        self.peak_in_flight.store(0, Ordering::SeqCst);
    }

    /// Makes the next `count` transaction-detail fetches fail with a
    /// transport error after their delay.
    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerRpc for MemoryLedger {
    async fn block_number(&self) -> Result<u64, LedgerError> {
        Ok(self.state()?.blocks.len() as u64 - 1)
    }

    async fn block_transactions(&self, number: u64) -> Result<Option<Vec<TxHash>>, LedgerError> {
        let state = self.state()?;
        Ok(usize::try_from(number)
            .ok()
            .and_then(|n| state.blocks.get(n))
            .cloned())
    }

    async fn transaction(&self, hash: TxHash) -> Result<Option<TxDetail>, LedgerError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        if self
            .failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(LedgerError::Transport(format!("fetch of {hash} failed")));
        }
        Ok(self.state()?.transactions.get(&hash).cloned())
    }

    async fn balance(&self, address: Address) -> Result<u128, LedgerError> {
        let mut state = self.state()?;
        state.seal_pending();
        Ok(state.balances.get(&address).copied().unwrap_or(0))
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, LedgerError> {
        Ok(self.state()?.nonces.get(&address).copied().unwrap_or(0))
    }

    async fn gas_price(&self) -> Result<u128, LedgerError> {
        Ok(self.gas_price)
    }

    async fn chain_id(&self) -> Result<u64, LedgerError> {
        Ok(self.chain_id)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, LedgerError> {
        let decoded = decode_signed(raw).map_err(|e| LedgerError::Rejected(e.to_string()))?;
        if decoded.tx.chain_id != self.chain_id {
            return Err(LedgerError::Rejected(format!(
                "chain id {} does not match {}",
                decoded.tx.chain_id, self.chain_id
            )));
        }

        let mut state = self.state()?;
        let from = decoded.from;
        let expected = state.nonces.get(&from).copied().unwrap_or(0);
        if decoded.tx.nonce != expected {
            return Err(LedgerError::Rejected(format!(
                "nonce {} for {}, expected {}",
                decoded.tx.nonce, from, expected
            )));
        }

        let cost = decoded.tx.value + u128::from(decoded.tx.gas_limit) * decoded.tx.gas_price;
        let balance = state.balances.get(&from).copied().unwrap_or(0);
        let reserved = state.reserved.get(&from).copied().unwrap_or(0);
        if balance.saturating_sub(reserved) < cost {
            return Err(LedgerError::Rejected(format!(
                "insufficient funds for {}: need {}, have {}",
                from,
                cost,
                balance.saturating_sub(reserved)
            )));
        }

        *state.reserved.entry(from).or_default() += cost;
        state.nonces.insert(from, expected + 1);
        let hash = decoded.hash;
        state.pending.push((decoded, cost));
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, LedgerError> {
        let mut state = self.state()?;
        state.seal_pending();
        Ok(state.receipts.get(&hash).copied())
    }
}
