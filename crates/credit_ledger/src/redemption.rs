//! Redemption of credit for collateral at face value
//!
//! Redemptions walk the sorted index from the tail (lowest ratio) upward,
//! skipping positions below MCR and shielded positions. The redeemer pays a
//! collateral fee that grows with the redeemed share of the supply.

use log::{debug, info};

use crate::engine::CreditEngine;
use crate::error::{LedgerError, Result};
use crate::external::{AbsorptionPool, CreditToken, FeeKind, FeeSink, PriceOracle};
use crate::fees::require_fee_accepted;
use crate::math::{checked_add, checked_sub, compute_icr, compute_tcr, mul_div, Amount, DECIMAL_PRECISION};
use crate::pools::CustodyPool;
use crate::position::{Owner, Status};

/// One position's share of a redemption
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RedemptionStep {
    pub owner: Owner,
    /// Credit cancelled against the position's debt
    pub debt_redeemed: Amount,
    pub coll_drawn: Amount,
    /// Position reduced to its gas reserve and closed
    pub closes: bool,
    /// Collateral left to the owner when the position closes
    pub coll_surplus: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedemptionOutcome {
    pub steps: Vec<RedemptionStep>,
    pub credit_redeemed: Amount,
    pub coll_drawn: Amount,
    /// Collateral fee kept from `coll_drawn`
    pub fee: Amount,
    pub coll_sent: Amount,
}

impl<O, T, A, F> CreditEngine<O, T, A, F>
where
    O: PriceOracle,
    T: CreditToken,
    A: AbsorptionPool,
    F: FeeSink,
{
    fn redeemable(&self, owner: Owner, price: Amount) -> Result<bool> {
        let position = self.positions.active(owner)?;
        if position.regime.is_shielded() {
            return Ok(false);
        }
        let entire = self.entire_position(owner)?;
        Ok(compute_icr(entire.collateral, entire.debt, price) >= self.params.mcr)
    }

    /// Plan a redemption without changing anything
    fn plan_redemption(&self, amount: Amount, max_iterations: usize) -> Result<Vec<RedemptionStep>> {
        let params = &self.params;
        let price = self.price()?;
        let mut steps = Vec::new();
        let mut remaining = amount;
        let mut closures = 0usize;
        // walk the order the commit will see once interest is accrued
        let index = self.live_index()?;
        let mut cursor = index.tail();

        while let Some(owner) = cursor {
            if remaining == 0 || (max_iterations > 0 && steps.len() >= max_iterations) {
                break;
            }
            cursor = index.prev(owner);
            if !self.redeemable(owner, price)? {
                continue;
            }

            let entire = self.entire_position(owner)?;
            let net_debt = checked_sub(entire.debt, params.gas_compensation)?;
            let lot = remaining.min(net_debt);
            let coll_drawn = mul_div(lot, DECIMAL_PRECISION, price)?;
            let new_debt = checked_sub(entire.debt, lot)?;
            let new_coll = checked_sub(entire.collateral, coll_drawn)?;

            let closes = new_debt == params.gas_compensation;
            if closes {
                if self.positions.active_count().saturating_sub(closures) <= 1 {
                    break;
                }
                closures += 1;
            } else if checked_sub(new_debt, params.gas_compensation)? < params.min_net_debt {
                break;
            }

            steps.push(RedemptionStep {
                owner,
                debt_redeemed: lot,
                coll_drawn,
                closes,
                coll_surplus: if closes { new_coll } else { 0 },
            });
            remaining -= lot;
        }
        Ok(steps)
    }

    /// Exchange `amount` credit for collateral drawn from the least
    /// collateralized redeemable positions.
    ///
    /// # Arguments
    /// * `redeemer` - Pays the credit and receives collateral net of the fee
    /// * `amount` - Credit to redeem; less may be redeemed if positions run out
    /// * `max_iterations` - Positions to visit at most, 0 for no limit
    /// * `max_fee` - Highest acceptable fee as a fraction of drawn collateral
    pub fn redeem(
        &mut self,
        redeemer: Owner,
        amount: Amount,
        max_iterations: usize,
        max_fee: Amount,
    ) -> Result<RedemptionOutcome> {
        let params = &self.params;
        if amount == 0 {
            return Err(LedgerError::InvalidRequestShape);
        }
        if max_fee < params.redemption_fee_floor || max_fee > DECIMAL_PRECISION {
            return Err(LedgerError::InvalidMaxFee);
        }
        if self.token.balance_of(redeemer) < amount {
            return Err(LedgerError::InsufficientBalance);
        }
        let price = self.price()?;
        let tcr = compute_tcr(self.entire_system_coll()?, self.entire_system_debt()?, price);
        if tcr < params.mcr {
            return Err(LedgerError::RedemptionBlocked);
        }

        let steps = self.plan_redemption(amount, max_iterations)?;
        let credit_redeemed = steps.iter().try_fold(0, |acc, s| checked_add(acc, s.debt_redeemed))?;
        let coll_drawn = steps.iter().try_fold(0, |acc, s| checked_add(acc, s.coll_drawn))?;
        if credit_redeemed == 0 {
            return Err(LedgerError::UnableToRedeem);
        }

        let quote =
            self.fees.quote_redemption_fee(coll_drawn, price, self.token.total_supply(), self.current_time, params)?;
        require_fee_accepted(quote.fee, coll_drawn, max_fee)?;

        // ---- commit ----
        self.accrue_interest()?;
        self.fees.commit(&quote);
        let gas = self.params.gas_compensation;

        for step in &steps {
            self.materialize(step.owner)?;
            if step.closes {
                let position = self.positions.active_mut(step.owner)?;
                let debt = position.debt;
                self.rewards.remove_stake(position)?;
                self.sorted.remove(step.owner)?;
                self.positions.exit(step.owner, Status::ClosedByRedemption)?;

                self.active_pool.decrease_debt(debt)?;
                self.active_pool.send_collateral(checked_add(step.coll_drawn, step.coll_surplus)?)?;
                self.surplus.account_surplus(step.owner, step.coll_surplus)?;
                self.token.burn(Owner::GAS_POOL, gas)?;
                debug!("redemption closed {}, surplus {}", step.owner, step.coll_surplus);
            } else {
                let position = self.positions.active_mut(step.owner)?;
                position.debt = checked_sub(position.debt, step.debt_redeemed)?;
                position.collateral = checked_sub(position.collateral, step.coll_drawn)?;
                self.rewards.update_stake_and_total(position)?;
                self.resort(step.owner, None)?;

                self.active_pool.decrease_debt(step.debt_redeemed)?;
                self.active_pool.send_collateral(step.coll_drawn)?;
            }
        }

        self.token.burn(redeemer, credit_redeemed)?;
        self.fee_sink.receive_fee(FeeKind::Redemption, quote.fee)?;
        let coll_sent = checked_sub(coll_drawn, quote.fee)?;

        info!(
            "{} redeemed {} credit for {} coll (fee {}) across {} positions",
            redeemer,
            credit_redeemed,
            coll_sent,
            quote.fee,
            steps.len()
        );
        Ok(RedemptionOutcome { steps, credit_redeemed, coll_drawn, fee: quote.fee, coll_sent })
    }
}
