//! # chainwhisper - covert messaging over a public ledger
//!
//! chainwhisper carries arbitrary payloads over an ordinary transaction
//! stream. A payload is split into bits, each bit rides in one low-value
//! transaction from a disposable wallet, and the receiver rebuilds it by
//! scanning blocks in order.
//!
//! ## Overview
//!
//! - A frame is a start marker, the payload bits (least significant bit
//!   first) and an end marker, one transaction each
//! - Key announcements go to the recipient's **mailbox**
//!   (`keccak256(address)[0..20]`) with the tag in the calldata
//! - Private messages go to fresh random addresses whose **low two bits**
//!   carry the tag; the receiver follows the sender wallet instead
//! - Receivers reassemble by sender nonce, so transactions may land in any
//!   order inside a block
//!
//! ## Security Model
//!
//! - **Authenticated keys**: announcements are signed typed data recovering
//!   to the announcer's identity
//! - **Layered encryption**: messages are AES-128-CBC under a per-peer
//!   ratcheted key, then RSA-OAEP wrapped to the recipient
//! - **Ratchet**: every message advances a PBKDF2 chain seeded by the two
//!   addresses and a salt fixed by the reply announcement
//! - **Not hidden**: the scheme hides where the payload is, not that many
//!   small transactions exist
//!
//! ## Example Usage
//!
//! ```rust
//! use chainwhisper::frame::{decode_frame, encode_frame};
//!
//! let symbols = encode_frame(b"hi");
//! assert_eq!(symbols.len(), 2 * 8 + 2);
//! assert_eq!(decode_frame(&symbols).unwrap(), b"hi");
//! ```
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chainwhisper::crypto::{EthKey, KeyPair};
//! use chainwhisper::ledger::{GatewaySettings, JsonRpcLedger, LocalWallet};
//! use chainwhisper::session::{Courier, Session};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let identity = Arc::new(LocalWallet::new(EthKey::generate()));
//! let session = Arc::new(Session::new(identity, KeyPair::generate()?)?);
//! let ledger = Arc::new(JsonRpcLedger::new("http://127.0.0.1:8545")?);
//!
//! let courier = Courier::new(session, ledger, GatewaySettings::default());
//! courier
//!     .announce("0x00000000000000000000000000000000000000aa".parse()?)
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`crypto`]: RSA, AES, PBKDF2, secp256k1 signing and typed-data digests
//! - [`frame`]: bit framing, tag schemes and the receive accumulator
//! - [`wire`]: announcement and message encodings
//! - [`ledger`]: ledger access, transaction signing and ordered submission
//! - [`session`]: peers, ratchet keys and the outbound courier
//! - [`ingest`]: ordered block queue, watcher and per-block pipeline
//! - [`config`]: runtime configuration

pub mod config;
pub mod crypto;
pub mod frame;
pub mod ingest;
pub mod ledger;
pub mod session;
pub mod wire;

// Re-export commonly used types at the crate root
pub use config::{ConfigError, CourierConfig};
pub use crypto::{EthKey, KeyPair};
pub use frame::{decode_frame, encode_frame, FrameError, Symbol};
pub use ingest::{BlockQueue, BlockReport, BlockWatcher, Ingestor, Pipeline};
pub use ledger::{Address, JsonRpcLedger, LedgerError, LedgerRpc, MemoryLedger};
pub use session::{Courier, InboundEvent, ReceiveError, SendError, Session};
pub use wire::{KeyAnnouncement, PrivateMessage};
