//! Subscribe and withdraw flows.
//!
//! Each flow makes at most one lookup and one atomic submission. Validation of
//! the lock, mint, payout and burn belongs to the contract behind the ledger;
//! this module only sequences the requests.

use serde::Serialize;

use crate::config::SubscriptionConfig;
use crate::error::SubscriptionError;
use crate::ledger::{LedgerClient, Operation, TransactionRequest};
use crate::model::{Address, OwnerId, ReceiptId, SubscriptionRecord, TxHandle};
use crate::penalty::PenaltySplit;

/// Result of a successful subscribe.
#[derive(Debug, Clone, Serialize)]
pub struct Subscribed {
    pub record: SubscriptionRecord,
    pub tx: TxHandle,
}

/// Result of a successful withdraw.
#[derive(Debug, Clone, Serialize)]
pub struct Withdrawn {
    pub record: SubscriptionRecord,
    pub split: PenaltySplit,
    pub tx: TxHandle,
}

/// What a withdraw would pay out at a given time.
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalQuote {
    pub record: SubscriptionRecord,
    pub elapsed_ms: u64,
    pub split: PenaltySplit,
}

pub struct SubscriptionService<L> {
    config: SubscriptionConfig,
    ledger: L,
}

impl<L: LedgerClient> SubscriptionService<L> {
    pub fn new(config: SubscriptionConfig, ledger: L) -> Self {
        Self { config, ledger }
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Lock the configured stake for `owner` and mint its receipt token.
    #[tracing::instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn subscribe(&self, owner: OwnerId, now: u64) -> Result<Subscribed, SubscriptionError> {
        let record = SubscriptionRecord::new(owner, now, self.config.locked_amount)?;

        if self.ledger.resolve_record(&record.receipt_id).await?.is_some() {
            tracing::warn!(receipt = %record.receipt_id, "receipt already active");
            return Err(SubscriptionError::DuplicateReceipt(record.receipt_id));
        }

        let request = self.subscribe_request(&record);
        tracing::debug!(operations = request.operations.len(), "submitting subscribe");
        let tx = self.ledger.submit(request).await?;

        tracing::info!(
            receipt = %record.receipt_id,
            amount = record.locked_amount,
            %tx,
            "subscription created"
        );
        Ok(Subscribed { record, tx })
    }

    /// Release the stake behind `receipt`, less the penalty, and burn the receipt.
    #[tracing::instrument(skip(self, receipt), fields(receipt = %receipt))]
    pub async fn withdraw(&self, receipt: &ReceiptId, now: u64) -> Result<Withdrawn, SubscriptionError> {
        let quote = self.quote(receipt, now).await?;
        let request = self.withdraw_request(&quote.record, &quote.split, now);
        tracing::debug!(operations = request.operations.len(), "submitting withdraw");
        let tx = self.ledger.submit(request).await?;

        tracing::info!(
            owner_amount = quote.split.owner_amount,
            treasury_amount = quote.split.treasury_amount,
            %tx,
            "subscription withdrawn"
        );
        Ok(Withdrawn {
            record: quote.record,
            split: quote.split,
            tx,
        })
    }

    /// Penalty split a withdraw of `receipt` would produce at `now`.
    pub async fn quote(&self, receipt: &ReceiptId, now: u64) -> Result<WithdrawalQuote, SubscriptionError> {
        let record = self
            .ledger
            .resolve_record(receipt)
            .await?
            .ok_or_else(|| SubscriptionError::RecordNotFound(receipt.clone()))?;

        if now < record.start_time {
            tracing::warn!(
                start_time = record.start_time,
                now,
                "clock is behind record start; treating elapsed time as zero"
            );
        }
        let split = self
            .config
            .penalty
            .split(record.start_time, now, record.locked_amount);

        Ok(WithdrawalQuote {
            elapsed_ms: now.saturating_sub(record.start_time),
            record,
            split,
        })
    }

    fn subscribe_request(&self, record: &SubscriptionRecord) -> TransactionRequest {
        TransactionRequest::new()
            .push(Operation::LockAsset {
                destination: self.config.contract_address.clone(),
                asset: self.config.stake_asset.clone(),
                amount: record.locked_amount,
                datum: record.datum(),
            })
            .push(Operation::MintToken {
                policy: self.config.receipt_policy.clone(),
                receipt: record.receipt_id.clone(),
                recipient: Address::of_owner(&record.owner),
            })
    }

    fn withdraw_request(
        &self,
        record: &SubscriptionRecord,
        split: &PenaltySplit,
        now: u64,
    ) -> TransactionRequest {
        let mut request = TransactionRequest::new()
            .push(Operation::UnlockRecord {
                receipt: record.receipt_id.clone(),
            })
            .push(Operation::PayAsset {
                recipient: Address::of_owner(&record.owner),
                asset: self.config.stake_asset.clone(),
                amount: split.owner_amount,
            });

        if split.has_treasury_payment() {
            request = request.push(Operation::PayAsset {
                recipient: self.config.treasury_address.clone(),
                asset: self.config.stake_asset.clone(),
                amount: split.treasury_amount,
            });
        }

        request
            .push(Operation::BurnToken {
                policy: self.config.receipt_policy.clone(),
                receipt: record.receipt_id.clone(),
            })
            .valid_from(now)
            .reference_script(self.config.reference_script.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::model::AssetId;
    use crate::penalty::{PenaltySchedule, PenaltyTier, DAY_MS};

    /// Records every request and answers lookups from a fixed record.
    struct RecordingLedger {
        record: Option<SubscriptionRecord>,
        submitted: Mutex<Vec<TransactionRequest>>,
    }

    impl RecordingLedger {
        fn new(record: Option<SubscriptionRecord>) -> Self {
            Self {
                record,
                submitted: Mutex::new(Vec::new()),
            }
        }

        fn submitted(&self) -> Vec<TransactionRequest> {
            self.submitted.lock().unwrap().clone()
        }
    }

    impl LedgerClient for RecordingLedger {
        fn signer(&self) -> OwnerId {
            owner()
        }

        async fn resolve_record(
            &self,
            receipt: &ReceiptId,
        ) -> Result<Option<SubscriptionRecord>, SubscriptionError> {
            Ok(self
                .record
                .clone()
                .filter(|record| &record.receipt_id == receipt))
        }

        async fn submit(&self, request: TransactionRequest) -> Result<TxHandle, SubscriptionError> {
            self.submitted.lock().unwrap().push(request);
            Ok(TxHandle("tx-1".into()))
        }
    }

    const START: u64 = 1_700_000_000_000;

    fn owner() -> OwnerId {
        OwnerId::from_public_key([9; 32])
    }

    fn config() -> SubscriptionConfig {
        SubscriptionConfig::builder()
            .stake_asset(AssetId("stake".into()))
            .receipt_policy(AssetId("receipts".into()))
            .contract_address(Address("contract".into()))
            .treasury_address(Address("treasury".into()))
            .reference_script("ref#0")
            .build()
            .unwrap()
    }

    fn active_record() -> SubscriptionRecord {
        SubscriptionRecord::new(owner(), START, 10_000).unwrap()
    }

    #[tokio::test]
    async fn subscribe_pairs_lock_with_mint() {
        let service = SubscriptionService::new(config(), RecordingLedger::new(None));
        let subscribed = service.subscribe(owner(), START).await.unwrap();

        let receipt = ReceiptId::derive(&owner(), START).unwrap();
        assert_eq!(subscribed.record.receipt_id, receipt);
        let submitted = service.ledger().submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(
            submitted[0].operations,
            vec![
                Operation::LockAsset {
                    destination: Address("contract".into()),
                    asset: AssetId("stake".into()),
                    amount: 10_000,
                    datum: subscribed.record.datum(),
                },
                Operation::MintToken {
                    policy: AssetId("receipts".into()),
                    receipt,
                    recipient: Address::of_owner(&owner()),
                },
            ]
        );
        assert_eq!(submitted[0].valid_from, None);
    }

    #[tokio::test]
    async fn subscribe_rejects_active_receipt() {
        let service = SubscriptionService::new(config(), RecordingLedger::new(Some(active_record())));
        let err = service.subscribe(owner(), START).await.unwrap_err();
        assert!(matches!(err, SubscriptionError::DuplicateReceipt(_)));
        assert!(service.ledger().submitted().is_empty());
    }

    #[tokio::test]
    async fn withdraw_pays_treasury_inside_penalty_window() {
        let service = SubscriptionService::new(config(), RecordingLedger::new(Some(active_record())));
        let now = START + 5 * DAY_MS;
        let receipt = active_record().receipt_id;

        let withdrawn = service.withdraw(&receipt, now).await.unwrap();
        assert_eq!(withdrawn.split.treasury_amount, 3_000);
        assert_eq!(withdrawn.split.owner_amount, 7_000);

        let request = &service.ledger().submitted()[0];
        assert_eq!(request.valid_from, Some(now));
        assert_eq!(request.reference_script.as_deref(), Some("ref#0"));
        assert_eq!(
            request.operations,
            vec![
                Operation::UnlockRecord {
                    receipt: receipt.clone()
                },
                Operation::PayAsset {
                    recipient: Address::of_owner(&owner()),
                    asset: AssetId("stake".into()),
                    amount: 7_000,
                },
                Operation::PayAsset {
                    recipient: Address("treasury".into()),
                    asset: AssetId("stake".into()),
                    amount: 3_000,
                },
                Operation::BurnToken {
                    policy: AssetId("receipts".into()),
                    receipt,
                },
            ]
        );
    }

    #[tokio::test]
    async fn withdraw_after_thirty_days_omits_treasury_payment() {
        let service = SubscriptionService::new(config(), RecordingLedger::new(Some(active_record())));
        let receipt = active_record().receipt_id;

        let withdrawn = service.withdraw(&receipt, START + 40 * DAY_MS).await.unwrap();
        assert_eq!(withdrawn.split.owner_amount, 10_000);

        let request = &service.ledger().submitted()[0];
        assert_eq!(request.operations.len(), 3);
        assert!(!request.operations.iter().any(|op| matches!(
            op,
            Operation::PayAsset { recipient, .. } if recipient.0 == "treasury"
        )));
    }

    #[tokio::test]
    async fn unknown_receipt_submits_nothing() {
        let service = SubscriptionService::new(config(), RecordingLedger::new(None));
        let receipt = ReceiptId::derive(&owner(), 1).unwrap();

        let err = service.withdraw(&receipt, START).await.unwrap_err();
        assert!(matches!(err, SubscriptionError::RecordNotFound(r) if r == receipt));
        assert!(service.ledger().submitted().is_empty());
    }

    #[tokio::test]
    async fn quote_clamps_clock_skew() {
        let service = SubscriptionService::new(config(), RecordingLedger::new(Some(active_record())));
        let quote = service
            .quote(&active_record().receipt_id, START - 1_000)
            .await
            .unwrap();
        assert_eq!(quote.elapsed_ms, 0);
        assert_eq!(quote.split.treasury_amount, 3_000);
        assert!(service.ledger().submitted().is_empty());
    }

    #[tokio::test]
    async fn quote_and_withdraw_follow_configured_schedule() {
        let schedule = PenaltySchedule::new(vec![PenaltyTier {
            below_ms: 60 * DAY_MS,
            treasury_percent: 50,
        }])
        .unwrap();
        let config = SubscriptionConfig {
            penalty: schedule,
            ..config()
        };
        let service = SubscriptionService::new(config, RecordingLedger::new(Some(active_record())));
        let receipt = active_record().receipt_id;

        let quote = service.quote(&receipt, START + 40 * DAY_MS).await.unwrap();
        assert_eq!(quote.split.treasury_amount, 5_000);

        let withdrawn = service.withdraw(&receipt, START + 40 * DAY_MS).await.unwrap();
        assert_eq!(withdrawn.split, quote.split);
    }

    #[tokio::test]
    async fn start_time_too_long_for_a_receipt_submits_nothing() {
        let service = SubscriptionService::new(config(), RecordingLedger::new(None));

        let err = service.subscribe(owner(), u64::MAX).await.unwrap_err();

        assert!(matches!(err, SubscriptionError::InvalidReceipt(_)));
        assert!(service.ledger().submitted().is_empty());
    }
}
