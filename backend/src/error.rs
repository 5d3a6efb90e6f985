use crate::model::{AssetId, ReceiptId};

/// Failures surfaced by the subscription lifecycle. None of these are retried.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("insufficient funds: need {needed} of {asset}")]
    InsufficientFunds { asset: AssetId, needed: u64 },

    #[error("subscription record not found for receipt {0}")]
    RecordNotFound(ReceiptId),

    #[error("authorization failed: {0}")]
    AuthorizationFailure(String),

    #[error("receipt {0} already exists")]
    DuplicateReceipt(ReceiptId),

    #[error("ledger submission failed: {0}")]
    SubmissionFailure(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid receipt id: {0}")]
    InvalidReceipt(String),
}
