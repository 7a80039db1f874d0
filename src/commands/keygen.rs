//! Key generation command.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use chainwhisper::crypto::{EthKey, KeyPair};

use super::{identity_key_path, CommandExecutor};

/// Generate an identity key and an RSA encryption key pair.
#[derive(Args, Debug)]
pub struct KeygenCommand {
    /// Output path for keys (creates .pub, .key and .eth.key files)
    #[arg(short, long, default_value = "chainwhisper")]
    pub output: PathBuf,

    /// Import an existing identity secret (hex) instead of generating one
    #[arg(long)]
    pub identity_hex: Option<String>,

    /// Overwrite existing key files
    #[arg(long)]
    pub force: bool,
}

impl CommandExecutor for KeygenCommand {
    fn execute(&self) -> Result<()> {
        let pub_path = self.output.with_extension("pub");
        let key_path = self.output.with_extension("key");
        let identity_path = identity_key_path(&self.output);

        if !self.force {
            for path in [&pub_path, &key_path, &identity_path] {
                if path.exists() {
                    bail!("{} already exists (use --force to overwrite)", path.display());
                }
            }
        }

        let identity = match &self.identity_hex {
            Some(secret) => {
                let bytes = hex::decode(secret.trim().trim_start_matches("0x"))
                    .context("Identity secret is not valid hex")?;
                EthKey::from_secret_bytes(&bytes).context("Invalid identity secret")?
            }
            None => EthKey::generate(),
        };
        identity
            .save_to_file(&identity_path)
            .context("Failed to save identity key")?;

        let keypair = KeyPair::generate().context("Failed to generate encryption key pair")?;
        keypair
            .save_to_files(&self.output)
            .context("Failed to save encryption key pair")?;

        let address = identity.address();
        println!("Keys generated successfully:");
        println!();
        println!("Identity (secp256k1):");
        println!("  Key file: {}", identity_path.display());
        println!("  Address:  {address}");
        println!("  Mailbox:  {}", address.mailbox());
        println!();
        println!("Encryption keys (RSA-{}):", chainwhisper::crypto::keys::RSA_KEY_BITS);
        println!("  Public key:  {}", pub_path.display());
        println!("  Private key: {}", key_path.display());
        println!();
        println!("The identity address must hold funds: it pays for every frame you send.");
        println!("Keep .key and .eth.key secret.");

        Ok(())
    }
}
