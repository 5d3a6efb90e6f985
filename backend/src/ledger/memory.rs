//! In-process ledger that stands in for the chain and the subscription contract.
//!
//! Requests are applied to a copy of the state and committed only when every
//! operation and contract rule passes, so a rejected request leaves no trace.
//! An unlock owes the treasury the penalty for the request's `valid_from`
//! time; the ledger has no clock of its own.
//! Handles created with [`MemoryLedger::session`] share state but sign as a
//! different owner.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{LedgerClient, Operation, TransactionRequest};
use crate::error::SubscriptionError;
use crate::model::{Address, AssetId, OwnerId, ReceiptId, SubscriptionRecord, TxHandle};
use crate::penalty::PenaltySchedule;

#[derive(Debug, Clone)]
struct LockedRecord {
    record: SubscriptionRecord,
    asset: AssetId,
    holder: Address,
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    balances: HashMap<(Address, AssetId), u64>,
    records: HashMap<ReceiptId, LockedRecord>,
    receipts: HashMap<(AssetId, ReceiptId), Address>,
    committed: u64,
}

impl LedgerState {
    fn debit(&mut self, from: &Address, asset: &AssetId, amount: u64) -> Result<(), SubscriptionError> {
        let balance = self.balances.entry((from.clone(), asset.clone())).or_default();
        if *balance < amount {
            return Err(SubscriptionError::InsufficientFunds {
                asset: asset.clone(),
                needed: amount,
            });
        }
        *balance -= amount;
        Ok(())
    }

    fn credit(&mut self, to: &Address, asset: &AssetId, amount: u64) {
        *self.balances.entry((to.clone(), asset.clone())).or_default() += amount;
    }
}

/// Receipts touched by one request, used for the pairing rules.
#[derive(Default)]
struct Touched {
    locked: BTreeSet<ReceiptId>,
    minted: BTreeSet<ReceiptId>,
    unlocked: BTreeSet<ReceiptId>,
    burned: BTreeSet<ReceiptId>,
    released: HashMap<AssetId, u64>,
    treasury_owed: HashMap<AssetId, u64>,
    treasury_paid: HashMap<AssetId, u64>,
}

/// Terms the contract enforces on every unlock.
#[derive(Debug, Clone)]
struct ContractTerms {
    penalty: PenaltySchedule,
    treasury: Address,
}

#[derive(Debug, Clone)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    terms: Arc<ContractTerms>,
    signer: OwnerId,
}

impl MemoryLedger {
    /// Empty ledger whose contract charges `penalty` to `treasury` on early unlocks.
    pub fn with_contract(signer: OwnerId, penalty: PenaltySchedule, treasury: Address) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            terms: Arc::new(ContractTerms { penalty, treasury }),
            signer,
        }
    }

    /// Handle on the same ledger that signs as `signer`.
    pub fn session(&self, signer: OwnerId) -> Self {
        Self {
            state: Arc::clone(&self.state),
            terms: Arc::clone(&self.terms),
            signer,
        }
    }

    pub async fn fund(&self, address: &Address, asset: &AssetId, amount: u64) {
        self.state.lock().await.credit(address, asset, amount);
    }

    pub async fn balance(&self, address: &Address, asset: &AssetId) -> u64 {
        self.state
            .lock()
            .await
            .balances
            .get(&(address.clone(), asset.clone()))
            .copied()
            .unwrap_or_default()
    }

    /// Current holder of a receipt token, if it exists.
    pub async fn receipt_holder(&self, policy: &AssetId, receipt: &ReceiptId) -> Option<Address> {
        self.state
            .lock()
            .await
            .receipts
            .get(&(policy.clone(), receipt.clone()))
            .cloned()
    }

    pub async fn active_records(&self) -> usize {
        self.state.lock().await.records.len()
    }

    /// Number of transactions committed so far.
    pub async fn committed(&self) -> u64 {
        self.state.lock().await.committed
    }

    fn apply(&self, state: &mut LedgerState, request: &TransactionRequest) -> Result<(), SubscriptionError> {
        let signer_address = Address::of_owner(&self.signer);
        let mut touched = Touched::default();

        for op in &request.operations {
            match op {
                Operation::LockAsset {
                    destination,
                    asset,
                    amount,
                    datum,
                } => {
                    if datum.owner != self.signer {
                        return Err(SubscriptionError::AuthorizationFailure(
                            "lock datum owner does not match signer".into(),
                        ));
                    }
                    let receipt = ReceiptId::derive(&datum.owner, datum.start_time)?;
                    if state.records.contains_key(&receipt) {
                        return Err(SubscriptionError::DuplicateReceipt(receipt));
                    }
                    state.debit(&signer_address, asset, *amount)?;
                    state.credit(destination, asset, *amount);
                    state.records.insert(
                        receipt.clone(),
                        LockedRecord {
                            record: SubscriptionRecord {
                                owner: datum.owner,
                                start_time: datum.start_time,
                                locked_amount: *amount,
                                receipt_id: receipt.clone(),
                            },
                            asset: asset.clone(),
                            holder: destination.clone(),
                        },
                    );
                    touched.locked.insert(receipt);
                }
                Operation::UnlockRecord { receipt } => {
                    let locked = state
                        .records
                        .remove(receipt)
                        .ok_or_else(|| SubscriptionError::RecordNotFound(receipt.clone()))?;
                    if locked.record.owner != self.signer {
                        return Err(SubscriptionError::AuthorizationFailure(format!(
                            "signer {} does not own {receipt}",
                            self.signer
                        )));
                    }
                    let unlock_time = request.valid_from.ok_or_else(|| {
                        SubscriptionError::SubmissionFailure(format!(
                            "unlock of {receipt} needs a validity start"
                        ))
                    })?;
                    let split = self.terms.penalty.split(
                        locked.record.start_time,
                        unlock_time,
                        locked.record.locked_amount,
                    );
                    state.debit(&locked.holder, &locked.asset, locked.record.locked_amount)?;
                    *touched
                        .treasury_owed
                        .entry(locked.asset.clone())
                        .or_default() += split.treasury_amount;
                    *touched.released.entry(locked.asset).or_default() += locked.record.locked_amount;
                    touched.unlocked.insert(receipt.clone());
                }
                Operation::PayAsset {
                    recipient,
                    asset,
                    amount,
                } => {
                    match touched.released.get_mut(asset) {
                        Some(pool) => {
                            if *pool < *amount {
                                return Err(SubscriptionError::SubmissionFailure(format!(
                                    "payouts of {asset} exceed released funds"
                                )));
                            }
                            *pool -= amount;
                            if *recipient == self.terms.treasury {
                                *touched.treasury_paid.entry(asset.clone()).or_default() += amount;
                            }
                        }
                        None => state.debit(&signer_address, asset, *amount)?,
                    }
                    state.credit(recipient, asset, *amount);
                }
                Operation::MintToken {
                    policy,
                    receipt,
                    recipient,
                } => {
                    let key = (policy.clone(), receipt.clone());
                    if state.receipts.contains_key(&key) {
                        return Err(SubscriptionError::DuplicateReceipt(receipt.clone()));
                    }
                    state.receipts.insert(key, recipient.clone());
                    touched.minted.insert(receipt.clone());
                }
                Operation::BurnToken { policy, receipt } => {
                    let holder = state
                        .receipts
                        .remove(&(policy.clone(), receipt.clone()))
                        .ok_or_else(|| SubscriptionError::RecordNotFound(receipt.clone()))?;
                    if holder != signer_address {
                        return Err(SubscriptionError::AuthorizationFailure(format!(
                            "signer does not hold receipt {receipt}"
                        )));
                    }
                    touched.burned.insert(receipt.clone());
                }
            }
        }

        if touched.locked != touched.minted {
            return Err(SubscriptionError::SubmissionFailure(
                "every lock must be paired with exactly one receipt mint".into(),
            ));
        }
        if touched.unlocked != touched.burned {
            return Err(SubscriptionError::SubmissionFailure(
                "every unlock must be paired with exactly one receipt burn".into(),
            ));
        }
        if touched.released.values().any(|left| *left > 0) {
            return Err(SubscriptionError::SubmissionFailure(
                "released funds must be paid out in full".into(),
            ));
        }
        for (asset, owed) in &touched.treasury_owed {
            let paid = touched.treasury_paid.get(asset).copied().unwrap_or_default();
            if paid < *owed {
                return Err(SubscriptionError::AuthorizationFailure(format!(
                    "treasury must receive {owed} {asset} as early-withdrawal penalty, got {paid}"
                )));
            }
        }
        Ok(())
    }
}

impl LedgerClient for MemoryLedger {
    fn signer(&self) -> OwnerId {
        self.signer
    }

    async fn resolve_record(
        &self,
        receipt: &ReceiptId,
    ) -> Result<Option<SubscriptionRecord>, SubscriptionError> {
        let state = self.state.lock().await;
        Ok(state.records.get(receipt).map(|locked| locked.record.clone()))
    }

    async fn submit(&self, request: TransactionRequest) -> Result<TxHandle, SubscriptionError> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        self.apply(&mut next, &request)?;

        next.committed += 1;
        let handle = TxHandle(format!("mem-{:08}", next.committed));
        *guard = next;

        tracing::debug!(
            tx = %handle,
            operations = request.operations.len(),
            "memory ledger committed transaction"
        );
        Ok(handle)
    }
}
