use std::env;

use crate::error::SubscriptionError;
use crate::model::{Address, AssetId};
use crate::penalty::PenaltySchedule;

pub const DEFAULT_LOCKED_AMOUNT: u64 = 10_000;
const DEFAULT_RPC_URL: &str = "http://localhost:8899";
const DEFAULT_KEYPAIR_PATH: &str = "./subscriber-keypair.json";

/// Deployment parameters of the subscription contract.
///
/// Built once at startup and handed to the service; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub stake_asset: AssetId,
    pub receipt_policy: AssetId,
    pub contract_address: Address,
    pub treasury_address: Address,
    pub locked_amount: u64,
    pub penalty: PenaltySchedule,
    /// Deployed copy of the contract that withdrawals may reference instead of
    /// attaching the script.
    pub reference_script: Option<String>,
}

impl SubscriptionConfig {
    pub fn builder() -> SubscriptionConfigBuilder {
        SubscriptionConfigBuilder::default()
    }

    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, SubscriptionError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, SubscriptionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut builder = Self::builder();
        if let Some(v) = var("SUBSCRIPTION_STAKE_ASSET") {
            builder = builder.stake_asset(AssetId(v));
        }
        if let Some(v) = var("SUBSCRIPTION_RECEIPT_POLICY") {
            builder = builder.receipt_policy(AssetId(v));
        }
        if let Some(v) = var("SUBSCRIPTION_CONTRACT_ADDRESS") {
            builder = builder.contract_address(Address(v));
        }
        if let Some(v) = var("SUBSCRIPTION_TREASURY_ADDRESS") {
            builder = builder.treasury_address(Address(v));
        }
        if let Some(v) = var("SUBSCRIPTION_AMOUNT") {
            let amount = v.parse::<u64>().map_err(|e| {
                SubscriptionError::InvalidConfig(format!("SUBSCRIPTION_AMOUNT {v:?}: {e}"))
            })?;
            builder = builder.locked_amount(amount);
        }
        if let Some(v) = var("SUBSCRIPTION_REFERENCE_SCRIPT") {
            builder = builder.reference_script(v);
        }
        builder.build()
    }
}

/// Builder for [`SubscriptionConfig`].
#[derive(Debug, Default)]
pub struct SubscriptionConfigBuilder {
    stake_asset: Option<AssetId>,
    receipt_policy: Option<AssetId>,
    contract_address: Option<Address>,
    treasury_address: Option<Address>,
    locked_amount: Option<u64>,
    penalty: Option<PenaltySchedule>,
    reference_script: Option<String>,
}

impl SubscriptionConfigBuilder {
    pub fn stake_asset(mut self, asset: AssetId) -> Self {
        self.stake_asset = Some(asset);
        self
    }

    pub fn receipt_policy(mut self, policy: AssetId) -> Self {
        self.receipt_policy = Some(policy);
        self
    }

    pub fn contract_address(mut self, address: Address) -> Self {
        self.contract_address = Some(address);
        self
    }

    pub fn treasury_address(mut self, address: Address) -> Self {
        self.treasury_address = Some(address);
        self
    }

    pub fn locked_amount(mut self, amount: u64) -> Self {
        self.locked_amount = Some(amount);
        self
    }

    pub fn penalty(mut self, schedule: PenaltySchedule) -> Self {
        self.penalty = Some(schedule);
        self
    }

    pub fn reference_script(mut self, outpoint: impl Into<String>) -> Self {
        self.reference_script = Some(outpoint.into());
        self
    }

    pub fn build(self) -> Result<SubscriptionConfig, SubscriptionError> {
        let missing = |what: &str| SubscriptionError::InvalidConfig(format!("{what} required"));

        let stake_asset = self.stake_asset.ok_or_else(|| missing("stake asset"))?;
        let receipt_policy = self.receipt_policy.ok_or_else(|| missing("receipt policy"))?;
        let contract_address = self
            .contract_address
            .ok_or_else(|| missing("contract address"))?;
        let treasury_address = self
            .treasury_address
            .ok_or_else(|| missing("treasury address"))?;
        let locked_amount = self.locked_amount.unwrap_or(DEFAULT_LOCKED_AMOUNT);

        if locked_amount == 0 {
            return Err(SubscriptionError::InvalidConfig(
                "locked amount must be > 0".into(),
            ));
        }
        if contract_address == treasury_address {
            return Err(SubscriptionError::InvalidConfig(
                "treasury address must differ from the contract address".into(),
            ));
        }

        let penalty = self.penalty.unwrap_or_default();
        penalty.validate()?;

        Ok(SubscriptionConfig {
            stake_asset,
            receipt_policy,
            contract_address,
            treasury_address,
            locked_amount,
            penalty,
            reference_script: self.reference_script,
        })
    }
}

/// Connection settings for the ledger RPC and the optional journal database.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub rpc_url: String,
    pub keypair_path: String,
    pub program_id: Option<String>,
    pub database_url: Option<String>,
}

impl ClientSettings {
    pub fn from_env() -> Self {
        let var = |key: &str| env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            rpc_url: var("SOLANA_RPC_URL").unwrap_or_else(|| DEFAULT_RPC_URL.to_string()),
            keypair_path: var("SOLANA_KEYPAIR_PATH")
                .unwrap_or_else(|| DEFAULT_KEYPAIR_PATH.to_string()),
            program_id: var("SUBSCRIPTION_PROGRAM_ID"),
            database_url: var("DATABASE_URL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::penalty::PenaltyTier;

    fn full_builder() -> SubscriptionConfigBuilder {
        SubscriptionConfig::builder()
            .stake_asset(AssetId("stake".into()))
            .receipt_policy(AssetId("receipts".into()))
            .contract_address(Address("contract".into()))
            .treasury_address(Address("treasury".into()))
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_ten_thousand_units() {
        let config = full_builder().build().unwrap();
        assert_eq!(config.locked_amount, DEFAULT_LOCKED_AMOUNT);
        assert_eq!(config.penalty, PenaltySchedule::default());
        assert!(config.reference_script.is_none());
    }

    #[test]
    fn missing_fields_are_named() {
        let err = SubscriptionConfig::builder()
            .stake_asset(AssetId("stake".into()))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("receipt policy"));

        let err = SubscriptionConfig::builder().build().unwrap_err();
        assert!(err.to_string().contains("stake asset"));
    }

    #[test]
    fn zero_amount_is_rejected() {
        let err = full_builder().locked_amount(0).build().unwrap_err();
        assert!(err.to_string().contains("locked amount"));
    }

    #[test]
    fn treasury_cannot_be_contract() {
        let err = full_builder()
            .treasury_address(Address("contract".into()))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("treasury"));
    }

    #[test]
    fn custom_schedule_is_kept() {
        let schedule = PenaltySchedule::new(vec![PenaltyTier {
            below_ms: 1_000,
            treasury_percent: 50,
        }])
        .unwrap();
        let config = full_builder().penalty(schedule.clone()).build().unwrap();
        assert_eq!(config.penalty, schedule);
    }

    #[test]
    fn reads_from_lookup() {
        let config = SubscriptionConfig::from_lookup(lookup(&[
            ("SUBSCRIPTION_STAKE_ASSET", "StakeMint111"),
            ("SUBSCRIPTION_RECEIPT_POLICY", "ReceiptPolicy111"),
            ("SUBSCRIPTION_CONTRACT_ADDRESS", "Vault111"),
            ("SUBSCRIPTION_TREASURY_ADDRESS", "Treasury111"),
            ("SUBSCRIPTION_AMOUNT", " 25000 "),
            ("SUBSCRIPTION_REFERENCE_SCRIPT", "ref#0"),
        ]))
        .unwrap();
        assert_eq!(config.stake_asset, AssetId("StakeMint111".into()));
        assert_eq!(config.locked_amount, 25_000);
        assert_eq!(config.reference_script.as_deref(), Some("ref#0"));
    }

    #[test]
    fn bad_amount_in_lookup_fails() {
        let err = SubscriptionConfig::from_lookup(lookup(&[
            ("SUBSCRIPTION_STAKE_ASSET", "a"),
            ("SUBSCRIPTION_RECEIPT_POLICY", "b"),
            ("SUBSCRIPTION_CONTRACT_ADDRESS", "c"),
            ("SUBSCRIPTION_TREASURY_ADDRESS", "d"),
            ("SUBSCRIPTION_AMOUNT", "ten"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("SUBSCRIPTION_AMOUNT"));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let err = SubscriptionConfig::from_lookup(lookup(&[("SUBSCRIPTION_STAKE_ASSET", "  ")]))
            .unwrap_err();
        assert!(err.to_string().contains("stake asset"));
    }
}
