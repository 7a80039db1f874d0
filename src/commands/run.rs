//! Interactive session: background ingestion plus a line-based prompt.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use chainwhisper::ingest::{BlockQueue, BlockWatcher, Ingestor, Pipeline};
use chainwhisper::ledger::{Address, CancelHandle};
use chainwhisper::session::Courier;

use super::{print_report, runtime, CommandExecutor, NodeArgs};

const HELP: &str = "\
Commands:
  /announce <address>      broadcast your key to an identity
  /connect <address>       reply to a received announcement
  /send <address> <text>   send a private message
  /peers                   list known peers
  /quit                    exit";

/// Watch the chain and send messages interactively.
#[derive(Args, Debug)]
pub struct RunCommand {
    #[command(flatten)]
    pub node: NodeArgs,

    /// First block to scan (overrides the config file; default: head)
    #[arg(long)]
    pub from: Option<u64>,

    /// Also print frames that were dropped
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Announce(Address),
    Connect(Address),
    Send(Address, String),
    Peers,
    Help,
    Quit,
    Empty,
}

fn parse_address(word: Option<&str>) -> Result<Address, String> {
    let word = word.ok_or("missing address")?;
    word.parse().map_err(|e| format!("invalid address {word}: {e}"))
}

fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }
    let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim_start();

    match command {
        "/announce" => Ok(Input::Announce(parse_address(rest.split_whitespace().next())?)),
        "/connect" => Ok(Input::Connect(parse_address(rest.split_whitespace().next())?)),
        "/send" => {
            let (address, text) = rest.split_once(char::is_whitespace).ok_or("usage: /send <address> <text>")?;
            let text = text.trim();
            if text.is_empty() {
                return Err("empty message".to_string());
            }
            Ok(Input::Send(parse_address(Some(address))?, text.to_string()))
        }
        "/peers" => Ok(Input::Peers),
        "/help" => Ok(Input::Help),
        "/quit" | "/exit" => Ok(Input::Quit),
        other => Err(format!("unknown command {other}; /help lists commands")),
    }
}

impl CommandExecutor for RunCommand {
    fn execute(&self) -> Result<()> {
        let mut config = self.node.config()?;
        if self.from.is_some() {
            config.start_block = self.from;
        }
        let session = Arc::new(self.node.session()?);
        let ledger = self.node.ledger(&config)?;
        let verbose = self.verbose;

        runtime()?.block_on(async move {
            let cancel = CancelHandle::new();
            let courier = Arc::new(
                Courier::new(Arc::clone(&session), ledger.clone(), config.gateway_settings())
                    .with_address_attempts(config.address_search_max_attempts)
                    .with_cancel(cancel.clone()),
            );

            let (reports_tx, mut reports) = mpsc::unbounded_channel();
            let pipeline = Pipeline::new(Arc::clone(&session), ledger.clone(), config.fetch_concurrency);
            let ingestor = Ingestor::new(pipeline, reports_tx, config.block_retry(), cancel.clone());
            let (queue, queue_task) = BlockQueue::spawn(Arc::new(ingestor));

            let watcher = BlockWatcher::new(ledger, config.block_poll_interval());
            let watcher_task = tokio::spawn({
                let cancel = cancel.clone();
                let start = config.start_block;
                async move {
                    // Dropping the queue lets the executor finish.
                    watcher.run(start, &queue, &cancel).await
                }
            });
            let printer = tokio::spawn(async move {
                while let Some(report) = reports.recv().await {
                    print_report(&report, verbose);
                }
            });

            info!(address = %session.address(), mailbox = %session.mailbox(), "session started");
            println!("Identity {} (mailbox {})", session.address(), session.mailbox());
            println!("{HELP}");

            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await.context("Failed to read input")? {
                let input = match parse_input(&line) {
                    Ok(input) => input,
                    Err(e) => {
                        eprintln!("{e}");
                        continue;
                    }
                };

                match input {
                    Input::Empty => {}
                    Input::Help => println!("{HELP}"),
                    Input::Quit => break,
                    Input::Peers => {
                        let peers = session.peers();
                        if peers.is_empty() {
                            println!("No peers yet.");
                        }
                        for (peer, record) in peers.iter() {
                            let can_send = session.outbound_wallet(peer).is_some();
                            println!(
                                "{peer}  sends from {}  {}",
                                record.will_use_address,
                                if can_send { "ready" } else { "not connected" }
                            );
                        }
                    }
                    Input::Announce(target) => {
                        let courier = Arc::clone(&courier);
                        tokio::spawn(async move {
                            match courier.announce(target).await {
                                Ok(report) => println!("Announced to {target} in {} transactions", report.hashes.len()),
                                Err(e) => eprintln!("Announce to {target} failed: {e}"),
                            }
                        });
                    }
                    Input::Connect(peer) => {
                        let courier = Arc::clone(&courier);
                        tokio::spawn(async move {
                            match courier.connect(peer).await {
                                Ok(report) => println!("Connected to {peer} in {} transactions", report.hashes.len()),
                                Err(e) => eprintln!("Connect to {peer} failed: {e}"),
                            }
                        });
                    }
                    Input::Send(peer, text) => {
                        let courier = Arc::clone(&courier);
                        tokio::spawn(async move {
                            match courier.send(peer, &text).await {
                                Ok(report) => println!("Sent to {peer} in {} transactions", report.hashes.len()),
                                Err(e) => eprintln!("Send to {peer} failed: {e}"),
                            }
                        });
                    }
                }
            }

            cancel.cancel();
            let next = watcher_task.await.context("Block watcher panicked")?;
            queue_task.await.context("Block queue panicked")?;
            printer.await.context("Report printer panicked")?;
            info!(next_block = next, "session stopped");
            anyhow::Ok(())
        })
    }
}
