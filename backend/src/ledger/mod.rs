//! Ledger client abstraction.
//!
//! The ledger resolves subscription records and applies transaction requests
//! atomically: every operation in a request commits together or none does.
//! Spending and minting rules live in the on-chain contract; clients only carry
//! the request there.

pub mod memory;
pub mod solana_client;

use serde::Serialize;

use crate::error::SubscriptionError;
use crate::model::{Address, AssetId, OwnerId, ReceiptId, SubscriptionDatum, SubscriptionRecord, TxHandle};

pub use memory::MemoryLedger;
pub use solana_client::SolanaLedger;

/// One step of an atomic transaction request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Operation {
    /// Move `amount` of `asset` from the signer to `destination`, tagged with `datum`.
    LockAsset {
        destination: Address,
        asset: AssetId,
        amount: u64,
        datum: SubscriptionDatum,
    },
    /// Consume the record behind `receipt` and release its locked funds to the request.
    UnlockRecord { receipt: ReceiptId },
    /// Pay `amount` of `asset` to `recipient` out of the released funds.
    PayAsset {
        recipient: Address,
        asset: AssetId,
        amount: u64,
    },
    /// Create one receipt token under `policy`, payable to `recipient`.
    MintToken {
        policy: AssetId,
        receipt: ReceiptId,
        recipient: Address,
    },
    /// Destroy the receipt token under `policy`.
    BurnToken { policy: AssetId, receipt: ReceiptId },
}

/// Operations submitted together, plus the transaction-level constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransactionRequest {
    pub operations: Vec<Operation>,
    /// Earliest time (ms) at which the transaction is valid.
    pub valid_from: Option<u64>,
    /// Outpoint of a deployed contract copy to read instead of attaching it.
    pub reference_script: Option<String>,
}

impl TransactionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, op: Operation) -> Self {
        self.operations.push(op);
        self
    }

    pub fn valid_from(mut self, time_ms: u64) -> Self {
        self.valid_from = Some(time_ms);
        self
    }

    pub fn reference_script(mut self, outpoint: Option<String>) -> Self {
        self.reference_script = outpoint;
        self
    }
}

/// External ledger: resolves records and submits signed transactions.
#[allow(async_fn_in_trait)]
pub trait LedgerClient {
    /// Identity this client signs transactions with.
    fn signer(&self) -> OwnerId;

    /// Look up the active record behind `receipt`, if any.
    async fn resolve_record(
        &self,
        receipt: &ReceiptId,
    ) -> Result<Option<SubscriptionRecord>, SubscriptionError>;

    /// Sign and submit `request` as a single atomic transaction.
    async fn submit(&self, request: TransactionRequest) -> Result<TxHandle, SubscriptionError>;
}
