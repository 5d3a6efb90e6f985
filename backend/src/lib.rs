//! Backend for a token-locking subscription scheme.
//!
//! Subscribing locks a fixed stake under the subscription contract and mints a
//! receipt token; withdrawing releases the stake, less an early-withdrawal
//! penalty paid to the treasury, and burns the receipt.

pub mod config;
pub mod error;
pub mod journal;
pub mod ledger;
pub mod lifecycle;
pub mod model;
pub mod penalty;

pub use config::{ClientSettings, SubscriptionConfig};
pub use error::SubscriptionError;
pub use ledger::{LedgerClient, MemoryLedger, Operation, SolanaLedger, TransactionRequest};
pub use lifecycle::{SubscriptionService, Subscribed, WithdrawalQuote, Withdrawn};
pub use model::{Address, AssetId, OwnerId, ReceiptId, SubscriptionDatum, SubscriptionRecord, TxHandle};
pub use penalty::{PenaltySchedule, PenaltySplit, PenaltyTier};
