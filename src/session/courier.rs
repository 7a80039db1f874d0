//! Outbound flows: broadcast, reply and private message.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use super::{SendError, Session, BROADCAST_SEED};
use crate::crypto::random_bytes;
use crate::frame::{encode_intents, AddressFieldScheme, DataFieldScheme, FramingScheme};
use crate::ledger::{
    submit_ordered, Address, CancelHandle, DisposableWallet, GatewaySettings, LedgerRpc, SubmitReport,
};

/// Puts a [`Session`]'s outbound payloads on the ledger.
///
/// Batches are serialized: two frames from one sending wallet would
/// otherwise compete for the same nonces.
pub struct Courier {
    session: Arc<Session>,
    ledger: Arc<dyn LedgerRpc>,
    settings: GatewaySettings,
    address_scheme: AddressFieldScheme,
    cancel: CancelHandle,
    batch_lock: Mutex<()>,
}

impl Courier {
    pub fn new(session: Arc<Session>, ledger: Arc<dyn LedgerRpc>, settings: GatewaySettings) -> Self {
        Self {
            session,
            ledger,
            settings,
            address_scheme: AddressFieldScheme::default(),
            cancel: CancelHandle::new(),
            batch_lock: Mutex::new(()),
        }
    }

    pub fn with_address_attempts(mut self, max_attempts: u32) -> Self {
        self.address_scheme = AddressFieldScheme::new(max_attempts);
        self
    }

    /// Shares a cancellation handle with the rest of the process.
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Announces our encryption key to `target`'s mailbox.
    ///
    /// The frame is sent from the wallet we will later use for messages to
    /// `target`, generated here on first contact.
    pub async fn announce(&self, target: Address) -> Result<SubmitReport, SendError> {
        let _batch = self.batch_lock.lock().await;

        let wallet = self.session.outbound_wallet_or_generate(target);
        let announcement = self.session.announcement(wallet.address(), BROADCAST_SEED).await?;
        let payload = self.session.seal_broadcast(&target, &announcement)?;

        let report = self
            .submit(&DataFieldScheme::new(target.mailbox()), &wallet, &payload)
            .await?;
        info!(%target, sender = %report.sender, transactions = report.hashes.len(), "announcement sent");
        Ok(report)
    }

    /// Replies to a peer whose broadcast we accepted, fixing a fresh
    /// key-derivation salt for the pair.
    pub async fn connect(&self, peer: Address) -> Result<SubmitReport, SendError> {
        let _batch = self.batch_lock.lock().await;

        if self.session.peer(&peer).is_none() {
            return Err(SendError::UnknownPeer(peer));
        }
        let wallet = self.session.outbound_wallet_or_generate(peer);
        let salt = random_bytes::<32>();
        let announcement = self.session.announcement(wallet.address(), salt).await?;
        let payload = self.session.seal_reply(&peer, &announcement)?;

        let report = self
            .submit(&DataFieldScheme::new(peer.mailbox()), &wallet, &payload)
            .await?;
        self.session.set_kd_salt(&peer, salt)?;
        info!(%peer, sender = %report.sender, transactions = report.hashes.len(), "reply sent");
        Ok(report)
    }

    /// Sends `text` to `peer` over the address field.
    ///
    /// The send key only advances once the whole frame is submitted.
    pub async fn send(&self, peer: Address, text: &str) -> Result<SubmitReport, SendError> {
        let _batch = self.batch_lock.lock().await;

        let wallet = self
            .session
            .outbound_wallet(&peer)
            .ok_or(SendError::NoOutboundWallet(peer))?;
        let (payload, key) = self.session.seal_message(&peer, text)?;

        let report = self.submit(&self.address_scheme, &wallet, &payload).await?;
        self.session.commit_send_key(peer, key);
        info!(%peer, sender = %report.sender, transactions = report.hashes.len(), "message sent");
        Ok(report)
    }

    async fn submit(
        &self,
        scheme: &dyn FramingScheme,
        wallet: &DisposableWallet,
        payload: &[u8],
    ) -> Result<SubmitReport, SendError> {
        let intents = encode_intents(scheme, payload)?;
        Ok(submit_ordered(
            self.ledger.as_ref(),
            self.session.identity(),
            wallet,
            &intents,
            &self.settings,
            &self.cancel,
        )
        .await?)
    }
}
