//! One-shot block range scan.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::info;

use chainwhisper::ingest::Pipeline;
use chainwhisper::ledger::LedgerRpc;

use super::{print_report, runtime, CommandExecutor, NodeArgs};

/// Process a range of blocks once and print what was found.
///
/// Blocks are processed in ascending order, so an announcement earlier in
/// the range lets later messages from that peer be read.
#[derive(Args, Debug)]
pub struct ScanCommand {
    #[command(flatten)]
    pub node: NodeArgs,

    /// First block (defaults to the configured start block, else the head)
    #[arg(long)]
    pub from: Option<u64>,

    /// Last block, inclusive (defaults to the head)
    #[arg(long)]
    pub to: Option<u64>,

    /// Also print frames that were dropped
    #[arg(short, long)]
    pub verbose: bool,
}

impl CommandExecutor for ScanCommand {
    fn execute(&self) -> Result<()> {
        let config = self.node.config()?;
        let session = Arc::new(self.node.session()?);
        let ledger = self.node.ledger(&config)?;

        runtime()?.block_on(async {
            let head = ledger.block_number().await.context("Failed to read chain head")?;
            let to = self.to.unwrap_or(head);
            let from = self.from.or(config.start_block).unwrap_or(to);
            if from > to {
                bail!("Empty range: {from} > {to}");
            }

            info!(address = %session.address(), mailbox = %session.mailbox(), from, to, "scanning");
            let pipeline = Pipeline::new(Arc::clone(&session), ledger, config.fetch_concurrency);

            let (mut events, mut failures) = (0, 0);
            for block in from..=to {
                let report = pipeline
                    .process_block(block)
                    .await
                    .with_context(|| format!("Failed to process block {block}"))?;
                events += report.events.len();
                failures += report.failures.len();
                print_report(&report, self.verbose);
            }

            println!();
            println!(
                "Scanned {} blocks: {events} events, {failures} dropped frames, {} known peers",
                to - from + 1,
                session.peers().len()
            );
            anyhow::Ok(())
        })
    }
}
