use std::fs::File;
use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use transfer_engine::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the resulting balances, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<_> = std::env::args().skip(1).collect();

    let accounts_path = args
        .first()
        .context("Expected the accounts file path as first argument. Exiting...")?;
    let requests_path = args
        .get(1)
        .context("Expected the payment requests file path as second argument. Exiting...")?;
    let config = match args.get(2) {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let store = Arc::new(InMemoryStore::with_lock_timeout(config.lock_timeout()));
    let accounts_file = File::open(accounts_path)
        .with_context(|| format!("Failed to open file with path: {accounts_path}. Exiting"))?;
    for account in CsvDecoder::new(accounts_file).decode_accounts()? {
        store
            .insert_account(account)
            .await
            .context("Failed to seed the account store")?;
    }

    let directory = Arc::new(InMemoryUserDirectory::new());
    let engine = TransferEngine::new(
        Arc::clone(&store),
        directory,
        Arc::new(SystemClock),
        config,
    );

    let requests_file = File::open(requests_path)
        .with_context(|| format!("Failed to open file with path: {requests_path}. Exiting"))?;
    let mut csv_decoder = CsvDecoder::new(requests_file);
    let summary = engine.process(csv_decoder.decode_orders()).await;
    info!(
        processed = summary.processed,
        failed = summary.failed,
        "Batch finished"
    );

    let balances = store.accounts().await;
    CsvEncoder::encode_balances(io::stdout(), &balances)
        .context("Failed to encode balances as Csv")?;

    Ok(())
}
