//! Early-withdrawal penalty policy.
//!
//! The locked stake is split between the owner and the treasury depending on
//! how long the subscription has been active. Tiers are evaluated on elapsed
//! milliseconds with inclusive lower bounds, so a withdrawal at exactly ten
//! days falls into the second tier.

use serde::{Deserialize, Serialize};

use crate::error::SubscriptionError;

pub const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Withdrawals with `elapsed < below_ms` pay `treasury_percent` of the stake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyTier {
    pub below_ms: u64,
    pub treasury_percent: u8,
}

/// Ordered penalty tiers. Past the last threshold no penalty applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltySchedule {
    tiers: Vec<PenaltyTier>,
}

impl Default for PenaltySchedule {
    fn default() -> Self {
        Self {
            tiers: vec![
                PenaltyTier {
                    below_ms: 10 * DAY_MS,
                    treasury_percent: 30,
                },
                PenaltyTier {
                    below_ms: 20 * DAY_MS,
                    treasury_percent: 20,
                },
                PenaltyTier {
                    below_ms: 30 * DAY_MS,
                    treasury_percent: 10,
                },
            ],
        }
    }
}

/// How a locked stake is divided at withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltySplit {
    pub treasury_amount: u64,
    pub owner_amount: u64,
}

impl PenaltySplit {
    /// A zero penalty emits no treasury transfer.
    pub fn has_treasury_payment(&self) -> bool {
        self.treasury_amount > 0
    }
}

impl PenaltySchedule {
    pub fn new(tiers: Vec<PenaltyTier>) -> Result<Self, SubscriptionError> {
        let schedule = Self { tiers };
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn tiers(&self) -> &[PenaltyTier] {
        &self.tiers
    }

    pub fn validate(&self) -> Result<(), SubscriptionError> {
        for tier in &self.tiers {
            if tier.treasury_percent > 100 {
                return Err(SubscriptionError::InvalidConfig(format!(
                    "treasury_percent must be <= 100, got {}",
                    tier.treasury_percent
                )));
            }
        }
        if self
            .tiers
            .windows(2)
            .any(|pair| pair[1].below_ms <= pair[0].below_ms)
        {
            return Err(SubscriptionError::InvalidConfig(
                "penalty thresholds must strictly increase".into(),
            ));
        }
        Ok(())
    }

    /// Treasury percentage for a given elapsed duration.
    pub fn treasury_percent(&self, elapsed_ms: u64) -> u8 {
        self.tiers
            .iter()
            .find(|tier| elapsed_ms < tier.below_ms)
            .map_or(0, |tier| tier.treasury_percent)
    }

    /// Split `locked_amount` for a withdrawal at `current_time`.
    ///
    /// A `current_time` before `start_time` counts as zero elapsed.
    pub fn split(&self, start_time: u64, current_time: u64, locked_amount: u64) -> PenaltySplit {
        let elapsed = current_time.saturating_sub(start_time);
        let percent = u128::from(self.treasury_percent(elapsed));
        // percent <= 100, so the quotient never exceeds locked_amount.
        let treasury_amount = (u128::from(locked_amount) * percent / 100) as u64;
        PenaltySplit {
            treasury_amount,
            owner_amount: locked_amount - treasury_amount,
        }
    }
}
