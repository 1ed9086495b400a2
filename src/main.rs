//! simple_bank - atomic fund transfers
//!
//! ```text
//! ┌──────────┐    ┌────────────────┐    ┌──────────────┐
//! │  Config  │───▶│ TransferEngine │───▶│ Ledger Store │
//! │  (YAML)  │    │ (lock order)   │    │ (PG / memory)│
//! └──────────┘    └────────────────┘    └──────────────┘
//! ```
//!
//! Usage:
//!
//! ```text
//! simple_bank [--env dev]                       # connect and health check
//! simple_bank [--env dev] transfer --from 1 --to 2 --amount 10.00 \
//!     [--sender alice --recipient bob]          # run one transfer, print JSON
//! ```

use anyhow::{Context, Result, bail};
use rust_decimal::Decimal;

use simple_bank::config::AppConfig;
use simple_bank::db::Database;
use simple_bank::ledger::{AccountId, MemoryLedger, Store};
use simple_bank::transfer::{TransferEngine, TransferTxParams};

// ============================================================
// ARGUMENTS
// ============================================================

fn get_env() -> String {
    get_arg("--env")
        .or_else(|| get_arg("-e"))
        .unwrap_or_else(|| "dev".to_string())
}

fn get_arg(name: &str) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == name && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

/// First positional argument after the program name. Flags and their values
/// are skipped, so `--sender transfer` is not a subcommand.
fn subcommand(args: &[String]) -> Option<&str> {
    let mut rest = args.iter().skip(1);
    while let Some(arg) = rest.next() {
        if arg.starts_with('-') {
            rest.next();
            continue;
        }
        return Some(arg.as_str());
    }
    None
}

fn use_transfer_mode() -> bool {
    let args: Vec<String> = std::env::args().collect();
    subcommand(&args) == Some("transfer")
}

fn transfer_params_from_args() -> Result<TransferTxParams> {
    let from_account_id: AccountId = get_arg("--from")
        .context("missing --from <account id>")?
        .parse()
        .context("--from must be an integer account id")?;
    let to_account_id: AccountId = get_arg("--to")
        .context("missing --to <account id>")?
        .parse()
        .context("--to must be an integer account id")?;
    let amount: Decimal = get_arg("--amount")
        .context("missing --amount <decimal>")?
        .parse()
        .context("--amount must be a decimal number")?;

    Ok(TransferTxParams {
        from_account_id,
        to_account_id,
        amount,
        sender: get_arg("--sender").unwrap_or_default(),
        recipient: get_arg("--recipient").unwrap_or_default(),
    })
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = simple_bank::logging::init_logging(&app_config)?;

    tracing::info!(
        git_hash = env!("GIT_HASH"),
        "Starting simple_bank in {} mode",
        env
    );

    let (store, database) = match &app_config.database.postgres_url {
        Some(url) => {
            let db = Database::connect(url, &app_config.database)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.ensure_schema().await?;
            (db.ledger_store(app_config.database.isolation), Some(db))
        }
        None => {
            tracing::warn!("No postgres_url configured, using in-memory ledger");
            (Store::memory(MemoryLedger::new()), None)
        }
    };
    tracing::info!(backend = store.backend_name(), "Ledger store ready");

    if !use_transfer_mode() {
        if let Some(db) = &database {
            db.health_check().await.context("Database health check failed")?;
        }
        println!("✅ simple_bank ready ({} backend)", store.backend_name());
        return Ok(());
    }

    let params = transfer_params_from_args()?;
    let engine = TransferEngine::with_retry_policy(store, app_config.transfer.retry_policy());
    let timeout = app_config.transfer.timeout();

    let result = tokio::time::timeout(timeout, engine.transfer_tx_with_retry(params)).await;
    match result {
        Ok(Ok(tx)) => {
            println!("{}", serde_json::to_string_pretty(&tx)?);
            Ok(())
        }
        Ok(Err(e)) => bail!("transfer failed [{}]: {}", e.code(), e),
        Err(_) => bail!("transfer timed out after {}ms", timeout.as_millis()),
    }
}
