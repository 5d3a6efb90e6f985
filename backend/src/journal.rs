use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::prelude::FromRow;

use crate::lifecycle::{Subscribed, Withdrawn};

/// Kind of submission recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalAction {
    Subscribe,
    Withdraw,
}

impl JournalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Withdraw => "withdraw",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct JournalEntry {
    pub receipt_id: String,
    pub action: String,
    pub owner: String,
    pub tx_handle: String,
    pub owner_amount: i64,
    pub treasury_amount: i64,
    pub created_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn subscribed(event: &Subscribed) -> Self {
        Self {
            receipt_id: event.record.receipt_id.to_string(),
            action: JournalAction::Subscribe.as_str().to_string(),
            owner: event.record.owner.to_hex(),
            tx_handle: event.tx.to_string(),
            // Funds move into the lock; nothing is paid out yet.
            owner_amount: 0,
            treasury_amount: 0,
            created_at: Utc::now(),
        }
    }

    pub fn withdrawn(event: &Withdrawn) -> Self {
        Self {
            receipt_id: event.record.receipt_id.to_string(),
            action: JournalAction::Withdraw.as_str().to_string(),
            owner: event.record.owner.to_hex(),
            tx_handle: event.tx.to_string(),
            owner_amount: clamp_i64(event.split.owner_amount),
            treasury_amount: clamp_i64(event.split.treasury_amount),
            created_at: Utc::now(),
        }
    }
}

// Postgres BIGINT is signed.
fn clamp_i64(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}

pub async fn get_db_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .context("Failed to connect to Postgres. Ensure the service is running.")?;

    Ok(pool)
}

/// Store a confirmed submission in the journal.
pub async fn record_submission(pool: &PgPool, entry: &JournalEntry) -> Result<()> {
    sqlx::query(
        "INSERT INTO subscription_journal
            (receipt_id, action, owner, tx_handle, owner_amount, treasury_amount, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(&entry.receipt_id)
    .bind(&entry.action)
    .bind(&entry.owner)
    .bind(&entry.tx_handle)
    .bind(entry.owner_amount)
    .bind(entry.treasury_amount)
    .bind(entry.created_at)
    .execute(pool)
    .await
    .context("Failed to write journal entry")?;

    Ok(())
}

/// Journal history of one receipt, oldest first.
pub async fn entries_for_receipt(pool: &PgPool, receipt_id: &str) -> Result<Vec<JournalEntry>> {
    let rows = sqlx::query_as::<_, JournalEntry>(
        "SELECT receipt_id, action, owner, tx_handle, owner_amount, treasury_amount, created_at
         FROM subscription_journal
         WHERE receipt_id = $1
         ORDER BY created_at",
    )
    .bind(receipt_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
