//! Ordered submission of a framed batch from a disposable wallet.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use super::poll::{CancelHandle, PollError, Poller};
use super::types::{Address, TxHash, TxIntent, GWEI};
use super::wallet::{DisposableWallet, PrimaryWallet};
use super::{LedgerError, LedgerRpc};

/// Errors that abort a batch. Transactions already sent stay sent.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Nothing to submit")]
    EmptyBatch,

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Wait failed: {0}")]
    Wait(#[from] PollError),

    #[error("Transaction {index} ({hash}) reverted")]
    Reverted { index: usize, hash: TxHash },
}

/// Tunables for [`submit_ordered`].
#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    /// Minimum top-up sent to a disposable wallet, in wei.
    pub funding_wei: u128,
    /// Uniform batch gas price = current price × bump / 100.
    pub gas_price_bump_percent: u32,
    pub balance_poller: Poller,
    pub receipt_poller: Poller,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            funding_wei: 150_000 * GWEI,
            gas_price_bump_percent: 120,
            balance_poller: Poller::new(Duration::from_millis(200), 300),
            receipt_poller: Poller::new(Duration::from_millis(500), 600),
        }
    }
}

/// What a successful batch cost and produced.
#[derive(Debug, Clone)]
pub struct SubmitReport {
    pub sender: Address,
    pub hashes: Vec<TxHash>,
    pub gas_price: u128,
    /// Wei sent from the primary wallet, zero if the sender was already funded.
    pub funded_wei: u128,
}

/// Sends `intents` from `wallet` under one nonce sequence.
///
/// The wallet is topped up from `primary` first if it cannot cover the
/// whole batch. The first transaction and the second-to-last are awaited
/// until mined; the others are fired without waiting, and the last one
/// goes out only after the second-to-last is mined.
pub async fn submit_ordered(
    ledger: &dyn LedgerRpc,
    primary: &dyn PrimaryWallet,
    wallet: &DisposableWallet,
    intents: &[TxIntent],
    settings: &GatewaySettings,
    cancel: &CancelHandle,
) -> Result<SubmitReport, SubmitError> {
    if intents.is_empty() {
        return Err(SubmitError::EmptyBatch);
    }
    if cancel.is_cancelled() {
        return Err(PollError::Cancelled.into());
    }

    let sender = wallet.address();
    let gas_price = ledger.gas_price().await? * u128::from(settings.gas_price_bump_percent) / 100;
    let chain_id = ledger.chain_id().await?;
    let required: u128 = intents
        .iter()
        .map(|intent| intent.value + u128::from(intent.gas_limit()) * gas_price)
        .sum();

    info!(%sender, transactions = intents.len(), gas_price, required, "submitting batch");

    let balance = ledger.balance(sender).await?;
    let funded_wei = if balance < required {
        let top_up = settings.funding_wei.max(required - balance);
        primary
            .send_transaction(ledger, &TxIntent::transfer(sender, top_up), gas_price)
            .await?;
        debug!(%sender, top_up, "funding sent, waiting for balance");

        settings
            .balance_poller
            .until(cancel, || async {
                ledger
                    .balance(sender)
                    .await
                    .map(|balance| (balance >= required).then_some(balance))
            })
            .await?;
        top_up
    } else {
        0
    };

    let first_nonce = ledger.transaction_count(sender).await?;
    let last = intents.len() - 1;
    let mut hashes = Vec::with_capacity(intents.len());

    for (index, intent) in intents.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled.into());
        }

        let nonce = first_nonce + index as u64;
        let signed = wallet.sign(intent, nonce, gas_price, chain_id)?;
        let hash = ledger.send_raw_transaction(&signed.raw).await?;
        debug!(%sender, nonce, %hash, "sent");
        hashes.push(hash);

        let barrier = index == 0 || (last >= 1 && index == last - 1);
        if barrier && index != last {
            await_receipt(ledger, settings, cancel, index, hash).await?;
        }
    }

    info!(%sender, transactions = hashes.len(), "batch submitted");
    Ok(SubmitReport {
        sender,
        hashes,
        gas_price,
        funded_wei,
    })
}

async fn await_receipt(
    ledger: &dyn LedgerRpc,
    settings: &GatewaySettings,
    cancel: &CancelHandle,
    index: usize,
    hash: TxHash,
) -> Result<(), SubmitError> {
    let receipt = settings
        .receipt_poller
        .until(cancel, || ledger.transaction_receipt(hash))
        .await?;
    debug!(%hash, block = receipt.block_number, "confirmed");
    if receipt.success {
        Ok(())
    } else {
        Err(SubmitError::Reverted { index, hash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signing::EthKey;
    use crate::ledger::memory::MemoryLedger;
    use crate::ledger::wallet::LocalWallet;

    fn settings() -> GatewaySettings {
        GatewaySettings {
            balance_poller: Poller::new(Duration::from_millis(1), 50),
            receipt_poller: Poller::new(Duration::from_millis(1), 50),
            ..Default::default()
        }
    }

    fn funded_primary(ledger: &MemoryLedger) -> LocalWallet {
        let key = EthKey::generate();
        ledger.credit(key.address(), 10u128.pow(21)).unwrap();
        LocalWallet::new(key)
    }

    fn intents(n: u8) -> Vec<TxIntent> {
        (0..n).map(|i| TxIntent::transfer(Address([i; 20]), 0)).collect()
    }

    #[tokio::test]
    async fn test_batch_lands_in_nonce_order() {
        let ledger = MemoryLedger::new();
        let primary = funded_primary(&ledger);
        let wallet = DisposableWallet::generate();

        let report = submit_ordered(&ledger, &primary, &wallet, &intents(6), &settings(), &CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(report.hashes.len(), 6);
        assert!(report.funded_wei >= 150_000 * GWEI);
        assert_eq!(report.gas_price, GWEI * 120 / 100);

        // The final transaction is sent after the barrier and stays pending.
        assert_eq!(ledger.pending_count().unwrap(), 1);
        ledger.mine().unwrap();

        for (nonce, hash) in report.hashes.iter().enumerate() {
            let detail = ledger.transaction(*hash).await.unwrap().unwrap();
            assert_eq!(detail.nonce, nonce as u64);
            assert_eq!(detail.from, wallet.address());
        }
    }

    #[tokio::test]
    async fn test_end_marker_mined_after_all_payload() {
        let ledger = MemoryLedger::new();
        let primary = funded_primary(&ledger);
        let wallet = DisposableWallet::generate();

        let report = submit_ordered(&ledger, &primary, &wallet, &intents(5), &settings(), &CancelHandle::new())
            .await
            .unwrap();
        ledger.mine().unwrap();

        let mut blocks = Vec::new();
        for hash in &report.hashes {
            blocks.push(ledger.transaction_receipt(*hash).await.unwrap().unwrap().block_number);
        }
        let last = *blocks.last().unwrap();
        assert!(blocks[..blocks.len() - 1].iter().all(|b| *b < last));
        assert!(blocks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_prefunded_wallet_skips_funding() {
        let ledger = MemoryLedger::new();
        let primary = funded_primary(&ledger);
        let wallet = DisposableWallet::generate();
        ledger.credit(wallet.address(), 10u128.pow(18)).unwrap();

        let report = submit_ordered(&ledger, &primary, &wallet, &intents(2), &settings(), &CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(report.funded_wei, 0);
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let ledger = MemoryLedger::new();
        let primary = funded_primary(&ledger);
        let result = submit_ordered(
            &ledger,
            &primary,
            &DisposableWallet::generate(),
            &[],
            &settings(),
            &CancelHandle::new(),
        )
        .await;
        assert!(matches!(result, Err(SubmitError::EmptyBatch)));
    }

    #[tokio::test]
    async fn test_unfunded_primary_aborts_before_frame() {
        let ledger = MemoryLedger::new();
        let primary = LocalWallet::new(EthKey::generate());
        let wallet = DisposableWallet::generate();

        let result = submit_ordered(&ledger, &primary, &wallet, &intents(3), &settings(), &CancelHandle::new()).await;
        assert!(matches!(result, Err(SubmitError::Ledger(LedgerError::Rejected(_)))));
        assert_eq!(ledger.transaction_count(wallet.address()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_batch_stops() {
        let ledger = MemoryLedger::new();
        let primary = funded_primary(&ledger);
        let cancel = CancelHandle::new();
        cancel.cancel();

        let balance = ledger.balance(primary.address()).await.unwrap();

        let result = submit_ordered(&ledger, &primary, &DisposableWallet::generate(), &intents(3), &settings(), &cancel).await;
        assert!(matches!(result, Err(SubmitError::Wait(PollError::Cancelled))));

        // Nothing was funded or sent.
        assert_eq!(ledger.pending_count().unwrap(), 0);
        assert_eq!(ledger.transaction_count(primary.address()).await.unwrap(), 0);
        assert_eq!(ledger.balance(primary.address()).await.unwrap(), balance);
    }
}
