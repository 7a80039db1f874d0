//! Mailbox derivation command.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use chainwhisper::crypto::EthKey;
use chainwhisper::ledger::Address;

use super::{identity_key_path, CommandExecutor};

/// Show the mailbox address announcements to an identity are sent to.
#[derive(Args, Debug)]
pub struct MailboxCommand {
    /// Identity address (0x-prefixed hex)
    #[arg(conflicts_with = "keys")]
    pub address: Option<String>,

    /// Base path of your keys; derives the mailbox of your own identity
    #[arg(short, long)]
    pub keys: Option<PathBuf>,
}

impl CommandExecutor for MailboxCommand {
    fn execute(&self) -> Result<()> {
        let address: Address = match (&self.address, &self.keys) {
            (Some(address), _) => address
                .parse()
                .with_context(|| format!("Invalid address: {address}"))?,
            (None, Some(keys)) => {
                let path = identity_key_path(keys);
                EthKey::load_from_file(&path)
                    .with_context(|| format!("Failed to load identity key {}", path.display()))?
                    .address()
            }
            (None, None) => bail!("Provide an address or --keys"),
        };

        println!("Identity: {address}");
        println!("Mailbox:  {}", address.mailbox());
        Ok(())
    }
}
