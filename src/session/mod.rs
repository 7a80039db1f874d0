//! Per-identity session state: known peers, ratchet keys, frame
//! accumulators and sending wallets.
//!
//! All maps are [`CowMap`]s so that the block pipeline and concurrent
//! senders can read consistent snapshots while the other side publishes
//! updates. Sealing (outbound) and opening (inbound) of announcement and
//! message payloads live here; putting them on the ledger is the job of
//! [`courier::Courier`].

pub mod courier;
pub mod cow;
pub mod error;
pub mod ratchet;

use std::fmt;
use std::sync::Arc;

use rsa::RsaPublicKey;
use tracing::{debug, info};

use crate::crypto::{asymmetric, decode_public_key_der, symmetric, KeyError, KeyPair};
use crate::crypto::{announcement_key, iv_from_address};
use crate::frame::{FrameEvent, PendingFrame};
use crate::ledger::{Address, DisposableWallet, LedgerError, PrimaryWallet};
use crate::wire::{KeyAnnouncement, PrivateMessage};

pub use courier::Courier;
pub use cow::CowMap;
pub use error::{ReceiveError, SendError};
pub use ratchet::{derive_session_key, RatchetSeed, SessionKey};

/// Seed carried by broadcast announcements.
pub const BROADCAST_SEED: [u8; 32] = [0u8; 32];

/// What we know about a peer after accepting its announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub encryption_key: RsaPublicKey,
    /// Key-derivation salt shared with this peer.
    pub kd_salt: [u8; 32],
    /// Sender of the peer's private-message frames.
    pub will_use_address: Address,
}

/// Independent frame accumulation streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Data-field frames to our mailbox, one stream per sending address.
    Mailbox { sender: Address },
    /// Address-field frames from a known peer's sending wallet.
    Peer { peer: Address },
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Mailbox { sender } => write!(f, "mailbox:{sender}"),
            Channel::Peer { peer } => write!(f, "peer:{peer}"),
        }
    }
}

/// How an accepted announcement reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnouncementKind {
    /// Sealed with our address-derived key, zero seed.
    Broadcast,
    /// RSA-sealed to us, carrying a fresh key-derivation salt.
    Reply,
}

/// Something a completed frame told us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    PeerAnnounced {
        peer: Address,
        will_use_address: Address,
        kind: AnnouncementKind,
    },
    Message {
        from: Address,
        text: String,
    },
}

/// State owned by one identity.
pub struct Session {
    identity: Arc<dyn PrimaryWallet>,
    address: Address,
    mailbox: Address,
    keys: KeyPair,
    public_key_der: Vec<u8>,
    peers: CowMap<Address, PeerRecord>,
    send_keys: CowMap<Address, SessionKey>,
    recv_keys: CowMap<Address, SessionKey>,
    frames: CowMap<Channel, PendingFrame>,
    outbound: CowMap<Address, DisposableWallet>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address)
            .field("mailbox", &self.mailbox)
            .field("peers", &self.peers.len())
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

impl Session {
    pub fn new(identity: Arc<dyn PrimaryWallet>, keys: KeyPair) -> Result<Self, KeyError> {
        let address = identity.address();
        let public_key_der = keys.public_key_der()?;
        Ok(Self {
            identity,
            address,
            mailbox: address.mailbox(),
            keys,
            public_key_der,
            peers: CowMap::new(),
            send_keys: CowMap::new(),
            recv_keys: CowMap::new(),
            frames: CowMap::new(),
            outbound: CowMap::new(),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Where announcements to us are sent.
    pub fn mailbox(&self) -> Address {
        self.mailbox
    }

    pub fn identity(&self) -> &dyn PrimaryWallet {
        self.identity.as_ref()
    }

    pub fn peer(&self, address: &Address) -> Option<PeerRecord> {
        self.peers.get(address)
    }

    /// Snapshot of every known peer.
    pub fn peers(&self) -> Arc<std::collections::HashMap<Address, PeerRecord>> {
        self.peers.snapshot()
    }

    /// The wallet our frames to `peer` are sent from, if one exists.
    pub fn outbound_wallet(&self, peer: &Address) -> Option<DisposableWallet> {
        self.outbound.get(peer)
    }

    /// The wallet for `peer`, generating one on first contact.
    pub fn outbound_wallet_or_generate(&self, peer: Address) -> DisposableWallet {
        self.outbound.get_or_insert_with(peer, DisposableWallet::generate)
    }

    /// Feeds one observed tag to the accumulator of `channel`.
    pub fn observe(&self, channel: Channel, nonce: u64, tag: u8) -> FrameEvent {
        self.frames.update(|frames| {
            let event = frames.entry(channel).or_default().observe(nonce, tag);
            if matches!(event, FrameEvent::Completed(_)) {
                frames.remove(&channel);
            }
            event
        })
    }

    /// Our announcement naming `will_use_address` as the next sender.
    pub async fn announcement(&self, will_use_address: Address, seed: [u8; 32]) -> Result<KeyAnnouncement, LedgerError> {
        KeyAnnouncement::create(
            self.identity.as_ref(),
            will_use_address,
            self.public_key_der.clone(),
            seed,
        )
        .await
    }

    /// Seals a broadcast announcement so only `target` (or anyone who
    /// knows its address) can read it.
    pub fn seal_broadcast(&self, target: &Address, announcement: &KeyAnnouncement) -> Result<Vec<u8>, SendError> {
        let plaintext = announcement.to_bytes()?;
        Ok(symmetric::encrypt(
            &plaintext,
            &announcement_key(target),
            &iv_from_address(target),
        )?)
    }

    /// Seals a reply announcement with `peer`'s RSA key.
    pub fn seal_reply(&self, peer: &Address, announcement: &KeyAnnouncement) -> Result<Vec<u8>, SendError> {
        let record = self.peers.get(peer).ok_or(SendError::UnknownPeer(*peer))?;
        let plaintext = announcement.to_bytes()?;
        Ok(asymmetric::encrypt(&plaintext, &record.encryption_key)?)
    }

    /// Adopts `salt` for `peer` after our reply carrying it went out.
    pub fn set_kd_salt(&self, peer: &Address, salt: [u8; 32]) -> Result<(), SendError> {
        self.peers.update(|peers| match peers.get_mut(peer) {
            Some(record) => {
                record.kd_salt = salt;
                Ok(())
            }
            None => Err(SendError::UnknownPeer(*peer)),
        })
    }

    /// Encrypts `text` for `peer` under the next send key.
    ///
    /// The key is returned rather than stored; call
    /// [`Session::commit_send_key`] once the frame is on the ledger.
    pub fn seal_message(&self, peer: &Address, text: &str) -> Result<(Vec<u8>, SessionKey), SendError> {
        let record = self.peers.get(peer).ok_or(SendError::UnknownPeer(*peer))?;
        let prior = self.send_keys.get(peer);
        let key = derive_session_key(
            RatchetSeed::for_direction(prior.as_ref(), &self.address, peer),
            &record.kd_salt,
        );

        let body = PrivateMessage::new(*peer, text).to_bytes()?;
        let inner = symmetric::encrypt(&body, key.as_bytes(), &iv_from_address(peer))?;
        let sealed = asymmetric::encrypt(&inner, &record.encryption_key)?;
        Ok((sealed, key))
    }

    pub fn commit_send_key(&self, peer: Address, key: SessionKey) {
        self.send_keys.insert(peer, key);
    }

    /// Opens a completed mailbox frame sent by `sender` as an announcement
    /// and records the announcer.
    ///
    /// The announced will-use address must be `sender` itself and must not
    /// already belong to another peer, so every sending wallet maps to
    /// exactly one peer. Returns `Ok(None)` for our own announcements.
    pub fn accept_announcement(&self, sender: Address, payload: &[u8]) -> Result<Option<InboundEvent>, ReceiveError> {
        let (announcement, kind) = self.open_announcement(payload)?;

        if announcement.eth_address == self.address {
            debug!("ignoring our own announcement");
            return Ok(None);
        }
        if !announcement.is_valid() {
            return Err(ReceiveError::InvalidSignature(announcement.eth_address));
        }

        let peer = announcement.eth_address;
        let will_use_address = announcement.will_use_address;
        if will_use_address != sender {
            return Err(ReceiveError::SenderMismatch {
                claimed: will_use_address,
                sender,
            });
        }
        let encryption_key = decode_public_key_der(&announcement.encryption_public_key)?;

        self.peers.update(|peers| {
            let owner = peers
                .iter()
                .find(|(owner, record)| **owner != peer && record.will_use_address == will_use_address)
                .map(|(owner, _)| *owner);
            if let Some(owner) = owner {
                return Err(ReceiveError::AddressInUse {
                    address: will_use_address,
                    owner,
                });
            }

            // A broadcast must not reset a salt negotiated by an earlier reply.
            let kd_salt = match (kind, peers.get(&peer)) {
                (AnnouncementKind::Broadcast, Some(existing)) => existing.kd_salt,
                _ => announcement.random_seed,
            };
            peers.insert(
                peer,
                PeerRecord {
                    encryption_key,
                    kd_salt,
                    will_use_address,
                },
            );
            Ok(())
        })?;
        info!(%peer, %will_use_address, ?kind, "peer announced");

        Ok(Some(InboundEvent::PeerAnnounced {
            peer,
            will_use_address,
            kind,
        }))
    }

    fn open_announcement(&self, payload: &[u8]) -> Result<(KeyAnnouncement, AnnouncementKind), ReceiveError> {
        let broadcast = symmetric::decrypt(
            payload,
            &announcement_key(&self.address),
            &iv_from_address(&self.address),
        )
        .ok()
        .and_then(|plaintext| KeyAnnouncement::from_bytes(&plaintext).ok());
        if let Some(announcement) = broadcast {
            return Ok((announcement, AnnouncementKind::Broadcast));
        }

        let plaintext =
            asymmetric::decrypt(payload, self.keys.secret_key()).map_err(|_| ReceiveError::Undecryptable)?;
        let announcement = KeyAnnouncement::from_bytes(&plaintext)?;
        Ok((announcement, AnnouncementKind::Reply))
    }

    /// Opens a completed frame from `peer`'s sending wallet.
    ///
    /// The receive key advances as soon as the RSA layer opens, so a frame
    /// that fails later still consumes a ratchet step just as it did on the
    /// sender's side.
    pub fn accept_message(&self, peer: &Address, payload: &[u8]) -> Result<InboundEvent, ReceiveError> {
        let record = self.peers.get(peer).ok_or(ReceiveError::UnknownPeer(*peer))?;
        let inner = asymmetric::decrypt(payload, self.keys.secret_key())?;

        let key = self.recv_keys.update(|keys| {
            let key = derive_session_key(
                RatchetSeed::for_direction(keys.get(peer), peer, &self.address),
                &record.kd_salt,
            );
            keys.insert(*peer, key.clone());
            key
        });

        let body = symmetric::decrypt(&inner, key.as_bytes(), &iv_from_address(&self.address))?;
        let message = PrivateMessage::from_bytes(&body)?;
        if message.to_address != self.address {
            return Err(ReceiveError::WrongRecipient(message.to_address));
        }
        let text = message.text().ok_or(ReceiveError::NotText)?.to_string();

        Ok(InboundEvent::Message { from: *peer, text })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::keys::tests::shared_keypair;
    use crate::crypto::EthKey;
    use crate::frame::{encode_frame, END_TAG, START_TAG};
    use crate::ledger::LocalWallet;

    pub(crate) fn session() -> Session {
        let wallet = Arc::new(LocalWallet::new(EthKey::generate()));
        Session::new(wallet, shared_keypair().clone()).unwrap()
    }

    /// A sealed broadcast from `from` to `to` and the wallet it is sent from.
    async fn broadcast(from: &Session, to: &Session) -> (Address, Vec<u8>) {
        let wallet = from.outbound_wallet_or_generate(to.address());
        let announcement = from.announcement(wallet.address(), BROADCAST_SEED).await.unwrap();
        (wallet.address(), from.seal_broadcast(&to.address(), &announcement).unwrap())
    }

    /// `receiver` accepts a broadcast from `from`.
    async fn learn(receiver: &Session, from: &Session) {
        let (sender, payload) = broadcast(from, receiver).await;
        receiver.accept_announcement(sender, &payload).unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_announcement_registers_peer() {
        let (alice, bob) = (session(), session());
        let (sender, payload) = broadcast(&alice, &bob).await;

        let event = bob.accept_announcement(sender, &payload).unwrap();
        let will_use = alice.outbound_wallet(&bob.address()).unwrap().address();
        assert_eq!(
            event,
            Some(InboundEvent::PeerAnnounced {
                peer: alice.address(),
                will_use_address: will_use,
                kind: AnnouncementKind::Broadcast,
            })
        );

        let record = bob.peer(&alice.address()).unwrap();
        assert_eq!(record.kd_salt, BROADCAST_SEED);
        assert_eq!(record.will_use_address, will_use);
    }

    #[tokio::test]
    async fn test_own_announcement_is_ignored() {
        let alice = session();
        let announcement = alice.announcement(Address([1; 20]), BROADCAST_SEED).await.unwrap();
        let payload = alice.seal_broadcast(&alice.address(), &announcement).unwrap();

        assert_eq!(alice.accept_announcement(Address([1; 20]), &payload).unwrap(), None);
        assert!(alice.peers().is_empty());
    }

    #[tokio::test]
    async fn test_forged_announcement_rejected() {
        let (alice, bob) = (session(), session());
        let mut announcement = alice.announcement(Address([1; 20]), BROADCAST_SEED).await.unwrap();
        announcement.will_use_address = Address([2; 20]);
        let payload = alice.seal_broadcast(&bob.address(), &announcement).unwrap();

        assert!(matches!(
            bob.accept_announcement(Address([2; 20]), &payload),
            Err(ReceiveError::InvalidSignature(who)) if who == alice.address()
        ));
        assert!(bob.peer(&alice.address()).is_none());
    }

    #[tokio::test]
    async fn test_announcement_from_other_sender_rejected() {
        let (alice, bob) = (session(), session());
        let (wallet, payload) = broadcast(&alice, &bob).await;

        assert!(matches!(
            bob.accept_announcement(Address([7; 20]), &payload),
            Err(ReceiveError::SenderMismatch { claimed, sender })
                if claimed == wallet && sender == Address([7; 20])
        ));
        assert!(bob.peers().is_empty());
    }

    #[tokio::test]
    async fn test_sending_address_of_another_peer_rejected() {
        let (alice, bob, mallory) = (session(), session(), session());
        learn(&bob, &alice).await;
        let alice_wallet = alice.outbound_wallet(&bob.address()).unwrap().address();

        let claim = mallory.announcement(alice_wallet, BROADCAST_SEED).await.unwrap();
        let payload = mallory.seal_broadcast(&bob.address(), &claim).unwrap();
        assert!(matches!(
            bob.accept_announcement(alice_wallet, &payload),
            Err(ReceiveError::AddressInUse { address, owner })
                if address == alice_wallet && owner == alice.address()
        ));
        assert!(bob.peer(&mallory.address()).is_none());
        assert_eq!(bob.peer(&alice.address()).unwrap().will_use_address, alice_wallet);

        // The owner itself may announce the same wallet again.
        learn(&bob, &alice).await;
        assert_eq!(bob.peers().len(), 1);
    }

    #[test]
    fn test_garbage_payload_is_undecryptable() {
        let bob = session();
        assert!(matches!(
            bob.accept_announcement(Address([1; 20]), &[0u8; 48]),
            Err(ReceiveError::Undecryptable)
        ));
    }

    #[tokio::test]
    async fn test_reply_sets_salt_and_broadcast_keeps_it() {
        let (alice, bob) = (session(), session());
        learn(&bob, &alice).await;

        let salt = [0x42; 32];
        let reply_wallet = bob.outbound_wallet_or_generate(alice.address());
        let reply = bob.announcement(reply_wallet.address(), salt).await.unwrap();
        let sealed = bob.seal_reply(&alice.address(), &reply).unwrap();
        bob.set_kd_salt(&alice.address(), salt).unwrap();

        let event = alice.accept_announcement(reply_wallet.address(), &sealed).unwrap().unwrap();
        assert!(matches!(event, InboundEvent::PeerAnnounced { kind: AnnouncementKind::Reply, .. }));
        assert_eq!(alice.peer(&bob.address()).unwrap().kd_salt, salt);

        // Re-broadcast from alice must not reset bob's salt.
        learn(&bob, &alice).await;
        assert_eq!(bob.peer(&alice.address()).unwrap().kd_salt, salt);
    }

    #[test]
    fn test_seal_message_to_unknown_peer() {
        let alice = session();
        assert!(matches!(
            alice.seal_message(&Address([9; 20]), "hi"),
            Err(SendError::UnknownPeer(_))
        ));
    }

    #[tokio::test]
    async fn test_messages_ratchet_in_step() {
        let (alice, bob) = (session(), session());
        learn(&bob, &alice).await;
        learn(&alice, &bob).await;

        for text in ["first", "second", "third"] {
            let (sealed, key) = alice.seal_message(&bob.address(), text).unwrap();
            alice.commit_send_key(bob.address(), key);

            let event = bob.accept_message(&alice.address(), &sealed).unwrap();
            assert_eq!(
                event,
                InboundEvent::Message {
                    from: alice.address(),
                    text: text.to_string(),
                }
            );
        }
    }

    #[tokio::test]
    async fn test_uncommitted_send_key_reuses_step() {
        let (alice, bob) = (session(), session());
        learn(&bob, &alice).await;
        learn(&alice, &bob).await;

        let (_, first) = alice.seal_message(&bob.address(), "dropped").unwrap();
        let (_, again) = alice.seal_message(&bob.address(), "retry").unwrap();
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn test_skipped_message_desynchronizes_receiver() {
        let (alice, bob) = (session(), session());
        learn(&bob, &alice).await;
        learn(&alice, &bob).await;

        let (_, k1) = alice.seal_message(&bob.address(), "lost").unwrap();
        alice.commit_send_key(bob.address(), k1);
        let (second, k2) = alice.seal_message(&bob.address(), "arrives").unwrap();
        alice.commit_send_key(bob.address(), k2);

        assert!(matches!(
            bob.accept_message(&alice.address(), &second),
            Err(ReceiveError::Symmetric(_)) | Err(ReceiveError::Codec(_)) | Err(ReceiveError::NotText)
        ));
    }

    #[test]
    fn test_message_from_unknown_peer() {
        let bob = session();
        assert!(matches!(
            bob.accept_message(&Address([3; 20]), &[0u8; 256]),
            Err(ReceiveError::UnknownPeer(_))
        ));
    }

    #[test]
    fn test_observe_resets_channel_after_completion() {
        let bob = session();
        let channel = Channel::Mailbox { sender: Address([1; 20]) };

        let mut nonce = 0;
        let mut last = FrameEvent::Ignored;
        for symbol in encode_frame(&[0xA5]) {
            last = bob.observe(channel, nonce, symbol.tag());
            nonce += 1;
        }
        assert_eq!(last, FrameEvent::Completed(Ok(vec![0xA5])));

        // A stray end marker after completion is ignored, not a new frame.
        assert_eq!(bob.observe(channel, nonce, END_TAG), FrameEvent::Ignored);
        assert_eq!(bob.observe(channel, nonce + 1, START_TAG), FrameEvent::Started);
    }
}
