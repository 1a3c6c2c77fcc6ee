// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::{Parser, Subcommand, ValueEnum};
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::error::Error;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use wallet_ledger::config::{Backend, Config};
use wallet_ledger::logging::{LogFormat, init_logging};
use wallet_ledger::server::{self, AppState};
use wallet_ledger::{BalanceStore, Engine, MemoryStore, Operation, PgStore, Wallet, WalletError, WalletId};

/// Wallet Ledger - per-wallet balances with safe concurrent deposits and withdrawals
///
/// Configuration comes from `config.env`, `config/wallet.*` and
/// `WALLET__*` environment variables; flags override them.
#[derive(Parser, Debug)]
#[command(name = "wallet-ledger")]
#[command(about = "Serve the wallet API or replay operation CSVs", long_about = None)]
struct Args {
    /// Storage backend, overriding `database.backend`
    #[arg(long, value_enum, global = true)]
    store: Option<StoreArg>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API (default)
    Serve {
        /// Listen port, overriding `server.port`
        #[arg(long)]
        port: Option<u16>,
    },
    /// Apply operations from a CSV file and print the resulting balances
    ///
    /// Expected format: wallet_id,operation_type,amount
    /// Example: wallet-ledger --store memory replay ops.csv > balances.csv
    Replay {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StoreArg {
    Postgres,
    Memory,
}

impl From<StoreArg> for Backend {
    fn from(arg: StoreArg) -> Self {
        match arg {
            StoreArg::Postgres => Backend::Postgres,
            StoreArg::Memory => Backend::Memory,
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };
    if let Some(store) = args.store {
        config.database.backend = store.into();
    }
    if let Some(Command::Serve { port: Some(port) }) = &args.command {
        config.server.port = *port;
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        process::exit(1);
    }

    init_logging(
        &config.logging.level,
        LogFormat::from_str_lossy(&config.logging.format),
    );

    let command = args.command.unwrap_or(Command::Serve { port: None });
    let result = match config.database.backend {
        Backend::Memory => run(Arc::new(MemoryStore::new()), &config, command).await,
        Backend::Postgres => match connect_postgres(&config).await {
            Ok(store) => run(Arc::new(store), &config, command).await,
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        error!(error = %e, "wallet-ledger failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn connect_postgres(config: &Config) -> Result<PgStore, Box<dyn Error>> {
    let db = &config.database;
    let store = PgStore::connect(&db.url(), &db.table, &db.pool()).await?;
    store.ensure_schema().await?;
    Ok(store)
}

async fn run<S: BalanceStore + 'static>(
    store: Arc<S>,
    config: &Config,
    command: Command,
) -> Result<(), Box<dyn Error>> {
    let engine = Engine::new(store);

    match command {
        Command::Serve { .. } => {
            let addr = format!("{}:{}", config.server.host, config.server.port);
            let listener = TcpListener::bind(&addr).await?;
            let state = AppState {
                engine,
                request_timeout: config.request_timeout(),
            };
            server::serve(listener, state).await?;
            info!("server stopped");
        }
        Command::Replay { input } => {
            let file = File::open(&input)
                .map_err(|e| format!("cannot open '{}': {}", input.display(), e))?;
            let wallets = replay(&engine, BufReader::new(file)).await?;
            write_balances(&wallets, std::io::stdout())?;
        }
    }
    Ok(())
}

/// Raw CSV record matching the input format.
///
/// Fields: `wallet_id, operation_type, amount`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    wallet_id: WalletId,
    operation_type: String,
    amount: Decimal,
}

/// Applies every operation of a CSV reader, in order, through the engine.
///
/// Rows that fail to parse and operations the engine rejects are logged and
/// skipped. Returns the final state of every wallet the file touched and
/// that exists afterwards, ordered by id.
///
/// # CSV Format
///
/// ```csv
/// wallet_id,operation_type,amount
/// 67e55044-10b1-426f-9247-bb680e5fe0c8,DEPOSIT,100.00
/// 67e55044-10b1-426f-9247-bb680e5fe0c8,WITHDRAW,40.00
/// ```
///
/// # Errors
///
/// Returns an error if reading fails or a touched wallet cannot be read back.
async fn replay<S: BalanceStore, R: Read>(
    engine: &Engine<S>,
    reader: R,
) -> Result<Vec<Wallet>, Box<dyn Error>> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .has_headers(true)
        .from_reader(reader);

    let mut touched = BTreeSet::new();
    let mut applied = 0usize;
    let mut skipped = 0usize;

    for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(row = line + 1, error = %e, "skipping malformed row");
                skipped += 1;
                continue;
            }
        };

        touched.insert(record.wallet_id);
        let operation =
            match Operation::parse(record.wallet_id, &record.operation_type, record.amount) {
                Ok(operation) => operation,
                Err(e) => {
                    warn!(row = line + 1, error = %e, "skipping invalid operation");
                    skipped += 1;
                    continue;
                }
            };

        match engine.apply(operation).await {
            Ok(_) => applied += 1,
            Err(e @ WalletError::Storage(_)) => return Err(e.into()),
            Err(e) => {
                warn!(row = line + 1, error = %e, "operation rejected");
                skipped += 1;
            }
        }
    }
    info!(applied, skipped, "replay finished");

    let mut wallets = Vec::with_capacity(touched.len());
    for wallet_id in touched {
        match engine.balance(wallet_id).await {
            Ok(wallet) => wallets.push(wallet),
            Err(WalletError::WalletNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(wallets)
}

/// Writes wallet balances as CSV with columns `wallet_id, balance`.
fn write_balances<W: Write>(wallets: &[Wallet], writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for wallet in wallets {
        wtr.serialize(wallet)?;
    }
    wtr.flush()?;
    Ok(())
}
