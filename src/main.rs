use std::env;
use std::io;
use std::path::Path;
use std::process::ExitCode;

use point_ledger::csv::{read_operations, write_balances};
use point_ledger::{Ledger, LedgerConfig, MemoryStore};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let path = env::args()
        .nth(1)
        .expect("usage: point-ledger <operations.csv>");

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let config = match LedgerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let operations = match read_operations(Path::new(&path)) {
        Ok(operations) => operations,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let ledger = Ledger::new(MemoryStore::new(), config);
    let (op_sender, op_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in operations {
            match result {
                Ok(operation) => {
                    if op_sender.send(operation).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    let summary = ledger.run(ReceiverStream::new(op_receiver)).await;
    info!(
        applied = summary.applied,
        rejected = summary.rejected,
        "all operations processed"
    );

    let mut snapshots = Vec::new();
    let accounts = match ledger.store().accounts() {
        Ok(accounts) => accounts,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    for account in accounts {
        match ledger.get_balance(account).await {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(e) => {
                error!(account, "{e}");
                return ExitCode::FAILURE;
            }
        }
    }

    if let Err(e) = write_balances(snapshots, io::stdout().lock()) {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
