//! Liquidation of undercollateralized positions
//!
//! A liquidated position's debt is first offered to the absorption pool;
//! whatever the pool cannot take is redistributed over all remaining stakes
//! through the reward accumulator. The liquidator earns `coll /
//! percent_divisor` collateral plus the position's gas reserve.

use log::{info, warn};

use crate::config::RecoveryLiquidation;
use crate::engine::CreditEngine;
use crate::error::{LedgerError, Result};
use crate::external::{AbsorptionPool, CreditToken, FeeSink, OffsetSplit, PriceOracle};
use crate::math::{
    checked_add, checked_div, checked_sub, compute_icr, compute_tcr, is_recovery_mode, mul_div, Amount,
    DECIMAL_PRECISION,
};
use crate::pools::{transfer, CustodyPool};
use crate::position::{Owner, Status};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LiquidationMode {
    /// Offer to the absorption pool, redistribute the rest
    OffsetAndRedistribute,
    /// Recovery mode with ICR <= 100%: nothing is offered to the pool
    RedistributeAll,
    /// Recovery mode with MCR <= ICR < TCR: collateral capped at MCR, the
    /// excess goes to the owner's surplus
    Capped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiquidationOutcome {
    pub owner: Owner,
    pub mode: LiquidationMode,
    pub recovery_mode: bool,
    /// Entire debt and collateral at liquidation
    pub debt: Amount,
    pub collateral: Amount,
    pub debt_offset: Amount,
    pub coll_to_absorption: Amount,
    pub debt_redistributed: Amount,
    pub coll_redistributed: Amount,
    pub coll_gas_compensation: Amount,
    pub gas_compensation: Amount,
    pub coll_surplus: Amount,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LiquidationTotals {
    pub liquidated: Vec<Owner>,
    pub debt_offset: Amount,
    pub coll_to_absorption: Amount,
    pub debt_redistributed: Amount,
    pub coll_redistributed: Amount,
    pub coll_gas_compensation: Amount,
    pub gas_compensation: Amount,
    pub coll_surplus: Amount,
}

impl LiquidationTotals {
    fn add(&mut self, outcome: &LiquidationOutcome) {
        self.liquidated.push(outcome.owner);
        self.debt_offset = self.debt_offset.saturating_add(outcome.debt_offset);
        self.coll_to_absorption = self.coll_to_absorption.saturating_add(outcome.coll_to_absorption);
        self.debt_redistributed = self.debt_redistributed.saturating_add(outcome.debt_redistributed);
        self.coll_redistributed = self.coll_redistributed.saturating_add(outcome.coll_redistributed);
        self.coll_gas_compensation = self.coll_gas_compensation.saturating_add(outcome.coll_gas_compensation);
        self.gas_compensation = self.gas_compensation.saturating_add(outcome.gas_compensation);
        self.coll_surplus = self.coll_surplus.saturating_add(outcome.coll_surplus);
    }
}

impl<O, T, A, F> CreditEngine<O, T, A, F>
where
    O: PriceOracle,
    T: CreditToken,
    A: AbsorptionPool,
    F: FeeSink,
{
    fn liquidation_mode(&self, icr: Amount, tcr: Amount, debt: Amount, recovery: bool) -> Result<LiquidationMode> {
        let params = &self.params;
        if !recovery || params.recovery_liquidation == RecoveryLiquidation::BelowMcr {
            return if icr < params.mcr {
                Ok(LiquidationMode::OffsetAndRedistribute)
            } else {
                Err(LedgerError::NotLiquidatable)
            };
        }

        if icr <= DECIMAL_PRECISION {
            Ok(LiquidationMode::RedistributeAll)
        } else if icr < params.mcr {
            Ok(LiquidationMode::OffsetAndRedistribute)
        } else if icr < tcr && self.absorption.total_deposits() >= debt {
            Ok(LiquidationMode::Capped)
        } else {
            Err(LedgerError::NotLiquidatable)
        }
    }

    /// Compute what liquidating `target` would do, without changing anything
    pub fn preview_liquidation(&self, target: Owner) -> Result<LiquidationOutcome> {
        let params = &self.params;
        let position = self.positions.active(target)?;
        if self.positions.active_count() <= 1 {
            return Err(LedgerError::SoleRemainingPosition);
        }

        let price = self.price()?;
        let entire = self.entire_position(target)?;
        let (coll, debt) = (entire.collateral, entire.debt);
        let icr = compute_icr(coll, debt, price);
        let sys_debt = checked_add(self.entire_system_debt()?, entire.pending_interest)?;
        let tcr = compute_tcr(self.entire_system_coll()?, sys_debt, price);
        let recovery = is_recovery_mode(tcr, params.ccr);
        let mode = self.liquidation_mode(icr, tcr, debt, recovery)?;

        let divisor = u128::from(params.percent_divisor);
        let (coll_gas, split, coll_surplus) = match mode {
            LiquidationMode::OffsetAndRedistribute => {
                let coll_gas = checked_div(coll, divisor)?;
                let split = self.absorption.preview_offset(debt, checked_sub(coll, coll_gas)?)?;
                (coll_gas, split, 0)
            }
            LiquidationMode::RedistributeAll => (checked_div(coll, divisor)?, OffsetSplit::default(), 0),
            LiquidationMode::Capped => {
                let capped = mul_div(debt, params.mcr, price)?.min(coll);
                let coll_gas = checked_div(capped, divisor)?;
                let split = OffsetSplit { debt_offset: debt, coll_offset: checked_sub(capped, coll_gas)? };
                (coll_gas, split, checked_sub(coll, capped)?)
            }
        };

        let debt_redistributed = checked_sub(debt, split.debt_offset)?;
        let coll_redistributed =
            checked_sub(checked_sub(checked_sub(coll, coll_gas)?, split.coll_offset)?, coll_surplus)?;

        // someone has to be left holding stake to absorb a redistribution
        if (debt_redistributed > 0 || coll_redistributed > 0)
            && checked_sub(self.rewards.total_stakes, position.stake)? == 0
        {
            return Err(LedgerError::SoleRemainingPosition);
        }
        if split.debt_offset > self.token.balance_of(Owner::ABSORPTION_POOL) {
            return Err(LedgerError::InsufficientBalance);
        }
        if self.token.balance_of(Owner::GAS_POOL) < params.gas_compensation {
            return Err(LedgerError::InsufficientBalance);
        }

        Ok(LiquidationOutcome {
            owner: target,
            mode,
            recovery_mode: recovery,
            debt,
            collateral: coll,
            debt_offset: split.debt_offset,
            coll_to_absorption: split.coll_offset,
            debt_redistributed,
            coll_redistributed,
            coll_gas_compensation: coll_gas,
            gas_compensation: params.gas_compensation,
            coll_surplus,
        })
    }

    /// Liquidate `target`, paying compensation to `liquidator`.
    ///
    /// # Errors
    /// `PositionNotFound`, `SoleRemainingPosition` or `NotLiquidatable`, with
    /// no state change.
    pub fn liquidate(&mut self, target: Owner, liquidator: Owner) -> Result<LiquidationOutcome> {
        let outcome = self.preview_liquidation(target)?;
        self.commit_liquidation(&outcome, liquidator)?;
        Ok(outcome)
    }

    fn commit_liquidation(&mut self, outcome: &LiquidationOutcome, liquidator: Owner) -> Result<()> {
        let target = outcome.owner;
        self.accrue_interest()?;
        self.materialize(target)?;

        let position = self.positions.active_mut(target)?;
        self.rewards.remove_stake(position)?;

        if outcome.debt_offset > 0 {
            let split = self.absorption.offset(outcome.debt, outcome.coll_to_absorption_base())?;
            self.active_pool.decrease_debt(split.debt_offset)?;
            self.active_pool.send_collateral(split.coll_offset)?;
            self.token.burn(Owner::ABSORPTION_POOL, split.debt_offset)?;
        }

        if outcome.debt_redistributed > 0 || outcome.coll_redistributed > 0 {
            transfer(
                &mut self.active_pool,
                &mut self.default_pool,
                outcome.coll_redistributed,
                outcome.debt_redistributed,
            )?;
            self.rewards.distribute_loss(outcome.coll_redistributed, outcome.debt_redistributed)?;
        }

        self.active_pool.send_collateral(outcome.coll_gas_compensation)?;
        self.token.transfer(Owner::GAS_POOL, liquidator, outcome.gas_compensation)?;

        if outcome.coll_surplus > 0 {
            self.active_pool.send_collateral(outcome.coll_surplus)?;
            self.surplus.account_surplus(target, outcome.coll_surplus)?;
        }

        self.sorted.remove(target)?;
        self.positions.exit(target, Status::Liquidated)?;
        let system_coll = self.entire_system_coll()?;
        self.rewards.update_system_snapshots(system_coll);
        if outcome.debt_redistributed > 0 || outcome.coll_redistributed > 0 {
            self.reindex();
        }

        info!(
            "liquidated {} ({:?}): debt {}, coll {}, offset {}, redistributed {}, surplus {}",
            target,
            outcome.mode,
            outcome.debt,
            outcome.collateral,
            outcome.debt_offset,
            outcome.debt_redistributed,
            outcome.coll_surplus
        );
        Ok(())
    }

    /// Liquidate from the tail of the sorted index while the tail is
    /// eligible, up to `max` positions (0 means no limit).
    ///
    /// The tail is taken from [`CreditEngine::live_index`], so interest
    /// accrued since the last commit is already reflected in the order. The
    /// mode is re-evaluated after every liquidation. Fails with
    /// `NothingToLiquidate` when not even one position qualifies.
    pub fn liquidate_batch(&mut self, max: usize, liquidator: Owner) -> Result<LiquidationTotals> {
        let mut totals = LiquidationTotals::default();
        let mut was_recovery = self.is_recovery_mode()?;

        while max == 0 || totals.liquidated.len() < max {
            let Some(tail) = self.live_index()?.tail() else { break };
            let outcome = match self.preview_liquidation(tail) {
                Ok(outcome) => outcome,
                Err(LedgerError::NotLiquidatable | LedgerError::SoleRemainingPosition) => break,
                Err(e) if totals.liquidated.is_empty() => return Err(e),
                Err(_) => break,
            };
            self.commit_liquidation(&outcome, liquidator)?;
            totals.add(&outcome);

            let recovery = self.is_recovery_mode()?;
            if recovery != was_recovery {
                warn!("recovery mode {} during liquidation batch", if recovery { "entered" } else { "left" });
                was_recovery = recovery;
            }
        }

        if totals.liquidated.is_empty() {
            return Err(LedgerError::NothingToLiquidate);
        }
        info!("batch liquidated {} positions", totals.liquidated.len());
        Ok(totals)
    }

    /// Liquidate each of `targets` that is currently eligible, skipping the
    /// rest
    pub fn liquidate_many(&mut self, targets: &[Owner], liquidator: Owner) -> Result<LiquidationTotals> {
        let mut totals = LiquidationTotals::default();
        for &target in targets {
            if let Ok(outcome) = self.preview_liquidation(target) {
                self.commit_liquidation(&outcome, liquidator)?;
                totals.add(&outcome);
            }
        }
        if totals.liquidated.is_empty() {
            return Err(LedgerError::NothingToLiquidate);
        }
        Ok(totals)
    }
}

impl LiquidationOutcome {
    /// Collateral the absorption pool is asked to split against the debt
    fn coll_to_absorption_base(&self) -> Amount {
        match self.mode {
            LiquidationMode::Capped => self.coll_to_absorption,
            _ => self.collateral.saturating_sub(self.coll_gas_compensation),
        }
    }
}
