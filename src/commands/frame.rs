//! Offline frame inspection.

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};

use chainwhisper::frame::{
    encode_intents, AddressFieldScheme, DataFieldScheme, FrameEvent, FramingScheme, PendingFrame,
};
use chainwhisper::ledger::{Address, TxDetail, TxHash, GWEI};

use super::CommandExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SchemeKind {
    /// Tag in the calldata of transactions to a mailbox
    Data,
    /// Tag in the low bits of a fresh recipient address
    Address,
}

/// Frame a payload into transaction intents without sending anything.
///
/// Prints every intent, the batch cost at the given gas price, and checks
/// that the intents decode back to the payload.
#[derive(Args, Debug)]
pub struct FrameCommand {
    /// Text payload
    #[arg(short, long, conflicts_with = "hex")]
    pub text: Option<String>,

    /// Hex payload
    #[arg(long, conflicts_with = "text")]
    pub hex: Option<String>,

    /// Where tags are carried
    #[arg(short, long, value_enum, default_value = "data")]
    pub scheme: SchemeKind,

    /// Recipient identity (data scheme: frames go to its mailbox)
    #[arg(long)]
    pub to: Option<String>,

    /// Gas price in gwei for the cost estimate
    #[arg(long, default_value = "1")]
    pub gas_price_gwei: u64,

    /// Print every intent
    #[arg(short, long)]
    pub verbose: bool,
}

impl CommandExecutor for FrameCommand {
    fn execute(&self) -> Result<()> {
        let payload = match (&self.text, &self.hex) {
            (Some(text), _) => text.as_bytes().to_vec(),
            (None, Some(hex_payload)) => hex::decode(hex_payload.trim().trim_start_matches("0x"))
                .context("Payload is not valid hex")?,
            (None, None) => bail!("Provide --text or --hex"),
        };

        let scheme: Box<dyn FramingScheme> = match self.scheme {
            SchemeKind::Data => {
                let to: Address = self
                    .to
                    .as_deref()
                    .context("--to is required for the data scheme")?
                    .parse()
                    .context("Invalid --to address")?;
                Box::new(DataFieldScheme::new(to.mailbox()))
            }
            SchemeKind::Address => Box::new(AddressFieldScheme::default()),
        };

        let intents = encode_intents(scheme.as_ref(), &payload).context("Failed to frame payload")?;
        let gas_price = u128::from(self.gas_price_gwei) * GWEI;
        let gas: u64 = intents.iter().map(|intent| intent.gas_limit()).sum();

        if self.verbose {
            for (i, intent) in intents.iter().enumerate() {
                let data = if intent.data.is_empty() {
                    String::new()
                } else {
                    format!(" data=0x{}", hex::encode(&intent.data))
                };
                println!("{i:>6}  to={}{data}", intent.to);
            }
            println!();
        }

        println!("Payload:      {} bytes", payload.len());
        println!("Transactions: {}", intents.len());
        println!("Gas:          {gas}");
        println!("Cost:         {} gwei", u128::from(gas) * gas_price / GWEI);

        // Replay the intents as if mined from one sender.
        let mut frame = PendingFrame::new();
        let mut decoded = None;
        for (nonce, intent) in intents.into_iter().enumerate() {
            let tx = TxDetail {
                hash: TxHash::default(),
                from: Address::default(),
                to: Some(intent.to),
                nonce: nonce as u64,
                input: intent.data,
                value: intent.value,
            };
            let tag = scheme.read_tag(&tx).context("Intent carries no readable tag")?;
            if let FrameEvent::Completed(result) = frame.observe(tx.nonce, tag) {
                decoded = Some(result.context("Frame did not decode")?);
            }
        }

        match decoded {
            Some(bytes) if bytes == payload => println!("Round trip:   ok"),
            Some(_) => bail!("Round trip produced a different payload"),
            None => bail!("Frame never completed"),
        }
        Ok(())
    }
}
