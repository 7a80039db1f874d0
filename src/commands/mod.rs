//! Command module - Strategy pattern for CLI commands.
//!
//! Each command is a separate module implementing the `CommandExecutor` trait.

mod frame;
mod keygen;
mod mailbox;
mod run;
mod scan;

pub use frame::FrameCommand;
pub use keygen::KeygenCommand;
pub use mailbox::MailboxCommand;
pub use run::RunCommand;
pub use scan::ScanCommand;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use chainwhisper::config::CourierConfig;
use chainwhisper::crypto::{EthKey, KeyPair};
use chainwhisper::ingest::{BlockReport, ReceiveFailure};
use chainwhisper::ledger::{JsonRpcLedger, LocalWallet};
use chainwhisper::session::{AnnouncementKind, InboundEvent, Session};

/// Trait for command execution - Strategy pattern.
///
/// Each command struct holds its parsed arguments and implements
/// this trait to define its execution logic.
pub trait CommandExecutor {
    /// Executes the command with its parsed arguments.
    fn execute(&self) -> Result<()>;
}

/// Path of the identity key stored next to the encryption keys:
/// `{base}.eth.key`.
pub(crate) fn identity_key_path(base: &Path) -> PathBuf {
    let mut path = base.as_os_str().to_os_string();
    path.push(".eth.key");
    PathBuf::from(path)
}

/// Options shared by every command that talks to a ledger.
#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// Base path of your keys (reads .pub, .key and .eth.key)
    #[arg(short, long, default_value = "chainwhisper")]
    pub keys: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// JSON-RPC endpoint (overrides the config file)
    #[arg(long)]
    pub rpc_url: Option<String>,

    /// Maximum simultaneous transaction fetches (overrides the config file)
    #[arg(long)]
    pub fetch_concurrency: Option<usize>,
}

impl NodeArgs {
    pub fn config(&self) -> Result<CourierConfig> {
        let mut config = CourierConfig::load_or_default(self.config.as_deref())
            .context("Failed to load configuration")?;
        if let Some(url) = &self.rpc_url {
            config.rpc_url = url.clone();
        }
        if let Some(limit) = self.fetch_concurrency {
            config.fetch_concurrency = limit;
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    pub fn session(&self) -> Result<Session> {
        let identity_path = identity_key_path(&self.keys);
        let identity = EthKey::load_from_file(&identity_path)
            .with_context(|| format!("Failed to load identity key {}", identity_path.display()))?;
        let keys = KeyPair::load_from_files(&self.keys)
            .with_context(|| format!("Failed to load encryption keys {}", self.keys.display()))?;
        Session::new(Arc::new(LocalWallet::new(identity)), keys).context("Failed to start session")
    }

    pub fn ledger(&self, config: &CourierConfig) -> Result<Arc<JsonRpcLedger>> {
        let ledger = JsonRpcLedger::new(config.rpc_url.clone())
            .with_context(|| format!("Failed to create RPC client for {}", config.rpc_url))?;
        Ok(Arc::new(ledger))
    }
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to create tokio runtime")
}

/// Prints the events and failures of one block.
pub(crate) fn print_report(report: &BlockReport, verbose: bool) {
    for event in &report.events {
        match event {
            InboundEvent::PeerAnnounced {
                peer,
                will_use_address,
                kind,
            } => {
                let how = match kind {
                    AnnouncementKind::Broadcast => "announced",
                    AnnouncementKind::Reply => "replied",
                };
                println!("[block {}] {peer} {how} (sends from {will_use_address})", report.block);
            }
            InboundEvent::Message { from, text } => {
                println!("[block {}] <{from}> {text}", report.block);
            }
        }
    }
    if verbose {
        for ReceiveFailure { channel, error } in &report.failures {
            println!("[block {}] dropped frame on {channel}: {error}", report.block);
        }
    }
}
