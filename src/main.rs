//! chainwhisper - covert messaging over a public ledger
//!
//! Every message is split into bits and each bit rides in one transaction.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{CommandExecutor, FrameCommand, KeygenCommand, MailboxCommand, RunCommand, ScanCommand};

/// chainwhisper - covert messaging over a public ledger
///
/// Announce an encryption key to another identity, reply to announcements,
/// and exchange ratcheted, encrypted messages framed one bit per
/// transaction.
#[derive(Parser)]
#[command(name = "chainwhisper")]
#[command(version)]
#[command(about = "Covert point-to-point messaging carried one bit per transaction")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate identity and encryption keys
    Keygen(KeygenCommand),

    /// Show the mailbox address of an identity
    Mailbox(MailboxCommand),

    /// Frame a payload offline and show the resulting transactions
    Frame(FrameCommand),

    /// Process a block range once and print what it contains for you
    Scan(ScanCommand),

    /// Watch the chain and chat interactively
    Run(RunCommand),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Keygen(cmd) => cmd.execute(),
        Commands::Mailbox(cmd) => cmd.execute(),
        Commands::Frame(cmd) => cmd.execute(),
        Commands::Scan(cmd) => cmd.execute(),
        Commands::Run(cmd) => cmd.execute(),
    }
}
