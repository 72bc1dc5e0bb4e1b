//! Reward-per-unit-stake accumulator
//!
//! A redistributed loss raises `L_Coll` and `L_Debt` by `amount / total_stakes`
//! in O(1). Each position later collects `stake * (L - snapshot)` the next
//! time it is touched. Division remainders are carried into the next
//! distribution so no dust is lost.

use log::debug;
use primitive_types::U256;

use crate::error::{LedgerError, Result};
use crate::math::{checked_add, checked_sub, mul_div, to_amount, Amount, DECIMAL_PRECISION};
use crate::position::Position;

/// `(L_Coll, L_Debt)` as observed by a position
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RewardSnapshot {
    pub coll_index: Amount,
    pub debt_index: Amount,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingRewards {
    pub coll: Amount,
    pub debt: Amount,
}

impl PendingRewards {
    pub fn is_zero(&self) -> bool {
        self.coll == 0 && self.debt == 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RewardAccumulator {
    /// Collateral reward per unit staked
    pub l_coll: Amount,
    /// Debt reward per unit staked
    pub l_debt: Amount,

    pub total_stakes: Amount,
    /// `total_stakes` right after the last liquidation
    pub total_stakes_snapshot: Amount,
    /// Active + default collateral right after the last liquidation
    pub total_collateral_snapshot: Amount,

    /// Remainders of the last distribution, scaled by 1e18
    pub last_coll_error: Amount,
    pub last_debt_error: Amount,
}

impl RewardAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_snapshot(&self) -> RewardSnapshot {
        RewardSnapshot { coll_index: self.l_coll, debt_index: self.l_debt }
    }

    /// Rewards accrued to `position` since its snapshot
    pub fn pending(&self, position: &Position) -> Result<PendingRewards> {
        if position.stake == 0 {
            return Ok(PendingRewards::default());
        }
        let snapshot = position.reward_snapshot;
        let coll_delta = checked_sub(self.l_coll, snapshot.coll_index)?;
        let debt_delta = checked_sub(self.l_debt, snapshot.debt_index)?;
        Ok(PendingRewards {
            coll: mul_div(position.stake, coll_delta, DECIMAL_PRECISION)?,
            debt: mul_div(position.stake, debt_delta, DECIMAL_PRECISION)?,
        })
    }

    /// Fold pending rewards into `position` and move its snapshot to the
    /// current indices. Applying twice is the same as applying once.
    ///
    /// Only the position changes; moving the matching balances from the
    /// default pool to the active pool is the caller's job.
    pub fn apply_pending(&self, position: &mut Position) -> Result<PendingRewards> {
        let pending = self.pending(position)?;
        position.collateral = checked_add(position.collateral, pending.coll)?;
        position.debt = checked_add(position.debt, pending.debt)?;
        position.reward_snapshot = self.current_snapshot();
        Ok(pending)
    }

    /// Stake for `collateral` under the current system snapshots.
    ///
    /// Before the first liquidation (no snapshots) the stake equals the
    /// collateral.
    pub fn compute_stake(&self, collateral: Amount) -> Result<Amount> {
        if self.total_stakes_snapshot == 0 || self.total_collateral_snapshot == 0 {
            return Ok(collateral);
        }
        mul_div(collateral, self.total_stakes_snapshot, self.total_collateral_snapshot)
    }

    /// Recompute `position.stake` from its collateral and update the total
    pub fn update_stake_and_total(&mut self, position: &mut Position) -> Result<Amount> {
        let new_stake = self.compute_stake(position.collateral)?;
        let total = checked_add(checked_sub(self.total_stakes, position.stake)?, new_stake)?;
        self.total_stakes = total;
        position.stake = new_stake;
        Ok(new_stake)
    }

    pub fn remove_stake(&mut self, position: &mut Position) -> Result<()> {
        self.total_stakes = checked_sub(self.total_stakes, position.stake)?;
        position.stake = 0;
        Ok(())
    }

    /// Whether a loss of this size could be spread over the current stakes
    pub fn can_distribute(&self, coll: Amount, debt: Amount) -> bool {
        (coll == 0 && debt == 0) || self.total_stakes > 0
    }

    /// Spread `coll` and `debt` over all stakes.
    ///
    /// The liquidated position's stake must already be removed.
    pub fn distribute_loss(&mut self, coll: Amount, debt: Amount) -> Result<()> {
        if coll == 0 && debt == 0 {
            return Ok(());
        }
        if self.total_stakes == 0 {
            return Err(LedgerError::SoleRemainingPosition);
        }

        let (coll_per_unit, coll_error) = per_unit_staked(coll, self.last_coll_error, self.total_stakes)?;
        let (debt_per_unit, debt_error) = per_unit_staked(debt, self.last_debt_error, self.total_stakes)?;

        let l_coll = checked_add(self.l_coll, coll_per_unit)?;
        let l_debt = checked_add(self.l_debt, debt_per_unit)?;

        debug!(
            "redistributing coll {} debt {} over stakes {}: L_Coll {} -> {}, L_Debt {} -> {}",
            coll, debt, self.total_stakes, self.l_coll, l_coll, self.l_debt, l_debt
        );

        self.l_coll = l_coll;
        self.l_debt = l_debt;
        self.last_coll_error = coll_error;
        self.last_debt_error = debt_error;
        Ok(())
    }

    /// Record stakes and collateral after a liquidation so later stakes are
    /// proportional to collateral net of redistributions
    pub fn update_system_snapshots(&mut self, total_collateral: Amount) {
        self.total_stakes_snapshot = self.total_stakes;
        self.total_collateral_snapshot = total_collateral;
    }
}

/// `(amount * 1e18 + error) / total_stakes` and the new remainder
fn per_unit_staked(amount: Amount, error: Amount, total_stakes: Amount) -> Result<(Amount, Amount)> {
    let numerator = U256::from(amount) * U256::from(DECIMAL_PRECISION) + U256::from(error);
    let stakes = U256::from(total_stakes);
    let per_unit = numerator / stakes;
    let remainder = numerator - per_unit * stakes;
    Ok((to_amount(per_unit)?, to_amount(remainder)?))
}
