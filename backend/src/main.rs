use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

use subscription_backend::config::{ClientSettings, DEFAULT_LOCKED_AMOUNT};
use subscription_backend::journal::{self, JournalEntry};
use subscription_backend::model::now_millis;
use subscription_backend::penalty::DAY_MS;
use subscription_backend::{
    LedgerClient, ReceiptId, SolanaLedger, SubscriptionConfig, SubscriptionService,
};

#[derive(Parser)]
#[command(name = "subscription", about = "Lock stake for a subscription and withdraw it")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lock the configured stake and mint a receipt for the signing wallet
    Subscribe,
    /// Release a subscription's stake, minus the early-withdrawal penalty
    Withdraw { receipt: ReceiptId },
    /// Show an active subscription and what withdrawing now would pay out
    Status {
        receipt: ReceiptId,
        #[arg(long)]
        json: bool,
    },
    /// Evaluate the configured penalty schedule without touching the ledger
    Quote {
        /// Subscription start time (ms since epoch)
        #[arg(long)]
        start: u64,
        /// Withdrawal time (ms since epoch), defaults to now
        #[arg(long)]
        at: Option<u64>,
        #[arg(long, default_value_t = DEFAULT_LOCKED_AMOUNT)]
        amount: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    if let Err(e) = dotenv {
        tracing::debug!(error = %e, "no .env file loaded");
    }

    let cli = Cli::parse();
    let config = SubscriptionConfig::from_env().context("Invalid subscription configuration")?;

    match cli.command {
        Command::Quote { start, at, amount } => {
            let at = at.unwrap_or_else(now_millis);
            let split = config.penalty.split(start, at, amount);
            println!("🧮 Elapsed: {:.2} days", at.saturating_sub(start) as f64 / DAY_MS as f64);
            println!("   Owner receives:    {}", split.owner_amount);
            println!("   Treasury receives: {}", split.treasury_amount);
        }
        Command::Subscribe => {
            let (service, pool) = connect(config).await?;
            let owner = service.ledger().signer();
            println!("\n🔒 Locking {} for {}...", service.config().locked_amount, owner);
            let subscribed = service.subscribe(owner, now_millis()).await?;

            println!("✅ Subscription created! Transaction: {}", subscribed.tx);
            println!("   Receipt: {}", subscribed.record.receipt_id);
            println!("   Receipt asset name: {}", subscribed.record.receipt_id.to_asset_name_hex());
            write_journal(pool.as_ref(), JournalEntry::subscribed(&subscribed)).await;
        }
        Command::Withdraw { receipt } => {
            let (service, pool) = connect(config).await?;
            println!("\n📤 Withdrawing {}...", receipt);
            let withdrawn = service.withdraw(&receipt, now_millis()).await?;

            println!("✅ Withdraw successful! Transaction: {}", withdrawn.tx);
            println!("   Owner received:    {}", withdrawn.split.owner_amount);
            println!("   Treasury received: {}", withdrawn.split.treasury_amount);
            println!("   Receipt {} burned", receipt);
            write_journal(pool.as_ref(), JournalEntry::withdrawn(&withdrawn)).await;
        }
        Command::Status { receipt, json } => {
            let (service, pool) = connect(config).await?;
            let quote = service.quote(&receipt, now_millis()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&quote)?);
                return Ok(());
            }

            println!("\n🔍 Subscription {}", receipt);
            println!("   Owner: {}", quote.record.owner);
            match quote.record.started_at() {
                Some(started) => println!("   Started: {}", started),
                None => println!("   Started: {} ms", quote.record.start_time),
            }
            println!("   Locked: {}", quote.record.locked_amount);
            println!("   Elapsed: {:.2} days", quote.elapsed_ms as f64 / DAY_MS as f64);
            println!("\n💰 Withdrawing now would pay:");
            println!("   Owner:    {}", quote.split.owner_amount);
            println!("   Treasury: {}", quote.split.treasury_amount);

            if let Some(pool) = pool.as_ref() {
                let history = journal::entries_for_receipt(pool, receipt.as_str()).await?;
                println!("\n📜 Journal entries: {}", history.len());
                for entry in history {
                    println!("   {} {} {}", entry.created_at, entry.action, entry.tx_handle);
                }
            }
        }
    }

    Ok(())
}

/// Connect to the ledger RPC and, when configured, the journal database.
async fn connect(
    config: SubscriptionConfig,
) -> Result<(SubscriptionService<SolanaLedger>, Option<PgPool>)> {
    let settings = ClientSettings::from_env();
    let program_id = settings
        .program_id
        .as_deref()
        .context("SUBSCRIPTION_PROGRAM_ID must be set in environment or .env file")?;

    let ledger = SolanaLedger::new(&settings.rpc_url, &settings.keypair_path, program_id)?;
    println!("✅ Connected to Solana RPC: {}", settings.rpc_url);

    let pool = match settings.database_url.as_deref() {
        Some(url) => {
            let pool = journal::get_db_pool(url).await?;
            println!("✅ Successfully connected to journal database!");
            Some(pool)
        }
        None => None,
    };

    Ok((SubscriptionService::new(config, ledger), pool))
}

/// The ledger is authoritative; a journal failure is reported but not fatal.
async fn write_journal(pool: Option<&PgPool>, entry: JournalEntry) {
    let Some(pool) = pool else { return };
    match journal::record_submission(pool, &entry).await {
        Ok(()) => println!("✅ Saved to journal"),
        Err(e) => {
            tracing::error!(error = %e, receipt = %entry.receipt_id, "failed to write journal");
            eprintln!("❌ Failed to save to journal: {}", e);
        }
    }
}
