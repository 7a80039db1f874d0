//! Per-block processing: fetch, classify, accumulate, open.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::frame::{AddressFieldScheme, DataFieldScheme, FrameEvent, FramingScheme};
use crate::ledger::{Address, LedgerError, LedgerRpc, TxDetail, TxHash};
use crate::session::{Channel, InboundEvent, ReceiveError, Session};

/// Errors that stop a block from being processed at all.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Block {0} not found")]
    BlockNotFound(u64),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// A frame abandoned while processing a block.
#[derive(Debug)]
pub struct ReceiveFailure {
    pub channel: Channel,
    pub error: ReceiveError,
}

/// Outcome of one block.
#[derive(Debug, Default)]
pub struct BlockReport {
    pub block: u64,
    pub transactions: usize,
    pub events: Vec<InboundEvent>,
    pub failures: Vec<ReceiveFailure>,
}

/// Feeds blocks into a [`Session`].
pub struct Pipeline {
    session: Arc<Session>,
    ledger: Arc<dyn LedgerRpc>,
    fetch_limit: Semaphore,
}

impl Pipeline {
    pub fn new(session: Arc<Session>, ledger: Arc<dyn LedgerRpc>, fetch_concurrency: usize) -> Self {
        Self {
            session,
            ledger,
            fetch_limit: Semaphore::new(fetch_concurrency.max(1)),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerRpc> {
        &self.ledger
    }

    /// Processes block `number` to completion.
    ///
    /// Announcements are classified first so that a peer announced in this
    /// block is already known when its message frames are classified.
    pub async fn process_block(&self, number: u64) -> Result<BlockReport, IngestError> {
        let hashes = self
            .ledger
            .block_transactions(number)
            .await?
            .ok_or(IngestError::BlockNotFound(number))?;
        let transactions = self.fetch_all(&hashes).await?;

        let mut report = BlockReport {
            block: number,
            transactions: transactions.len(),
            ..Default::default()
        };

        let mailbox = self.session.mailbox();
        let mailbox_scheme = DataFieldScheme::new(mailbox);
        for tx in &transactions {
            if let Some(tag) = mailbox_scheme.read_tag(tx) {
                self.feed(Channel::Mailbox { sender: tx.from }, tx, tag, &mut report);
            }
        }

        let senders: HashMap<Address, Address> = self
            .session
            .peers()
            .iter()
            .map(|(peer, record)| (record.will_use_address, *peer))
            .collect();
        let address_scheme = AddressFieldScheme::default();
        for tx in &transactions {
            if tx.to == Some(mailbox) {
                continue;
            }
            let Some(peer) = senders.get(&tx.from) else {
                continue;
            };
            if let Some(tag) = address_scheme.read_tag(tx) {
                self.feed(Channel::Peer { peer: *peer }, tx, tag, &mut report);
            }
        }

        debug!(
            block = number,
            transactions = report.transactions,
            events = report.events.len(),
            failures = report.failures.len(),
            "block processed"
        );
        Ok(report)
    }

    /// Fetches every transaction concurrently, capped by the fetch limit,
    /// and returns them in block order.
    async fn fetch_all(&self, hashes: &[TxHash]) -> Result<Vec<TxDetail>, LedgerError> {
        let fetches = hashes.iter().map(|hash| async move {
            // Closed only if the pipeline is dropped mid-fetch.
            let _permit = self
                .fetch_limit
                .acquire()
                .await
                .map_err(|_| LedgerError::Transport("fetch limiter closed".to_string()))?;
            self.ledger.transaction(*hash).await
        });

        let mut transactions = Vec::with_capacity(hashes.len());
        for (hash, result) in hashes.iter().zip(join_all(fetches).await) {
            match result? {
                Some(tx) => transactions.push(tx),
                None => warn!(%hash, "transaction listed in block but not found"),
            }
        }
        Ok(transactions)
    }

    fn feed(&self, channel: Channel, tx: &TxDetail, tag: u8, report: &mut BlockReport) {
        let payload = match self.session.observe(channel, tx.nonce, tag) {
            FrameEvent::Completed(payload) => payload,
            FrameEvent::Started => {
                debug!(%channel, nonce = tx.nonce, "frame started");
                return;
            }
            FrameEvent::Recorded | FrameEvent::Ignored => return,
        };
        debug!(%channel, nonce = tx.nonce, "frame completed");

        let outcome = payload.map_err(ReceiveError::from).and_then(|payload| match channel {
            Channel::Mailbox { sender } => self.session.accept_announcement(sender, &payload),
            Channel::Peer { peer } => self.session.accept_message(&peer, &payload).map(Some),
        });

        match outcome {
            Ok(Some(event)) => report.events.push(event),
            Ok(None) => {}
            Err(error) => {
                warn!(%channel, block = report.block, error = %error, "frame abandoned");
                report.failures.push(ReceiveFailure { channel, error });
            }
        }
    }
}
