use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;
use tx_ledger::Engine;
use tx_ledger::csv::{CsvError, open_transactions, write_accounts};

/// Apply a csv log of client transactions and print the resulting accounts
#[derive(Debug, Parser)]
#[command(name = "tx-ledger", version)]
struct Args {
    /// Csv file with `type,client,tx,amount` rows
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Log filter used when `RUST_LOG` is not set
    #[arg(long, value_name = "FILTER", default_value = "warn")]
    log_level: String,

    /// Number of parsed transactions buffered ahead of the engine
    #[arg(long, value_name = "N", default_value_t = 16, value_parser = clap::value_parser!(u16).range(1..))]
    channel_capacity: u16,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), CsvError> {
    if args.input.extension().is_none_or(|ext| ext != "csv") {
        warn!(path = %args.input.display(), "input file seems to not be a csv file");
    }

    let transactions = open_transactions(&args.input)?;
    let (tx_sender, tx_receiver) = tokio::sync::mpsc::channel(usize::from(args.channel_capacity));

    // csv parsing is blocking, keep it off the engine's task
    let reader = tokio::task::spawn_blocking(move || {
        for result in transactions {
            match result {
                Ok(tx) => {
                    if tx_sender.blocking_send(tx).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    let mut engine = Engine::new();
    engine.run(ReceiverStream::new(tx_receiver)).await;

    if let Err(e) = reader.await {
        warn!("transaction reader stopped early: {e}");
    }

    write_accounts(std::io::stdout().lock(), engine.accounts())
}
