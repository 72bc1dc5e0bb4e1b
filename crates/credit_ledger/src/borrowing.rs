//! Position lifecycle: open, adjust, close, regime changes

use log::{debug, info};

use crate::engine::CreditEngine;
use crate::error::{LedgerError, Result};
use crate::external::{AbsorptionPool, CreditToken, FeeKind, FeeSink, PriceOracle};
use crate::fees::{require_fee_accepted, validate_max_fee, FeeQuote};
use crate::interest::InterestRegime;
use crate::math::{checked_add, checked_sub, compute_icr, compute_tcr, is_recovery_mode, Amount, DECIMAL_PRECISION};
use crate::pools::CustodyPool;
use crate::position::{Owner, Position, Status};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenRequest {
    pub collateral: Amount,
    /// Net debt drawn by the owner, before fee and gas reserve
    pub debt: Amount,
    pub regime: InterestRegime,
    pub max_fee: Amount,
    pub hint: Option<Owner>,
}

impl OpenRequest {
    /// Unshielded, accepting any fee, no hint
    pub fn new(collateral: Amount, debt: Amount) -> Self {
        Self { collateral, debt, regime: InterestRegime::Unshielded, max_fee: DECIMAL_PRECISION, hint: None }
    }

    pub fn shielded(mut self) -> Self {
        self.regime = InterestRegime::Shielded;
        self
    }

    pub fn max_fee(mut self, max_fee: Amount) -> Self {
        self.max_fee = max_fee;
        self
    }

    pub fn hint(mut self, hint: Owner) -> Self {
        self.hint = Some(hint);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenReceipt {
    pub fee: Amount,
    /// Debt recorded on the position: net debt + fee + gas reserve
    pub composite_debt: Amount,
    pub stake: Amount,
    pub icr: Amount,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdjustRequest {
    pub coll_deposit: Amount,
    pub coll_withdrawal: Amount,
    pub debt_change: Amount,
    /// Direction of `debt_change`
    pub debt_increase: bool,
    pub max_fee: Amount,
    pub hint: Option<Owner>,
}

impl AdjustRequest {
    pub fn deposit(amount: Amount) -> Self {
        Self { coll_deposit: amount, max_fee: DECIMAL_PRECISION, ..Self::default() }
    }

    pub fn withdraw(amount: Amount) -> Self {
        Self { coll_withdrawal: amount, max_fee: DECIMAL_PRECISION, ..Self::default() }
    }

    pub fn borrow(amount: Amount) -> Self {
        Self { debt_change: amount, debt_increase: true, max_fee: DECIMAL_PRECISION, ..Self::default() }
    }

    pub fn repay(amount: Amount) -> Self {
        Self { debt_change: amount, debt_increase: false, max_fee: DECIMAL_PRECISION, ..Self::default() }
    }

    pub fn with_deposit(mut self, amount: Amount) -> Self {
        self.coll_deposit = amount;
        self
    }

    pub fn with_withdrawal(mut self, amount: Amount) -> Self {
        self.coll_withdrawal = amount;
        self
    }

    pub fn max_fee(mut self, max_fee: Amount) -> Self {
        self.max_fee = max_fee;
        self
    }

    pub fn hint(mut self, hint: Owner) -> Self {
        self.hint = Some(hint);
        self
    }

    fn is_debt_decrease(&self) -> bool {
        !self.debt_increase && self.debt_change > 0
    }

    fn is_debt_increase(&self) -> bool {
        self.debt_increase && self.debt_change > 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdjustReceipt {
    pub fee: Amount,
    pub collateral: Amount,
    pub debt: Amount,
    pub icr: Amount,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloseReceipt {
    pub collateral_returned: Amount,
    /// Credit burned from the owner; the gas reserve is burned separately
    pub debt_repaid: Amount,
}

/// Shared TCR rule: a change may not lower TCR and leave it below CCR
fn require_tcr_not_worsened(old_tcr: Amount, new_tcr: Amount, ccr: Amount) -> Result<()> {
    if new_tcr < ccr && new_tcr < old_tcr {
        return Err(LedgerError::SystemBelowCriticalRatio);
    }
    Ok(())
}

impl<O, T, A, F> CreditEngine<O, T, A, F>
where
    O: PriceOracle,
    T: CreditToken,
    A: AbsorptionPool,
    F: FeeSink,
{
    /// System collateral and debt with `pending_interest` of one position
    /// folded in, as a TCR baseline for changes to that position
    fn system_totals_with(&self, pending_interest: Amount) -> Result<(Amount, Amount)> {
        Ok((self.entire_system_coll()?, checked_add(self.entire_system_debt()?, pending_interest)?))
    }

    /// Open a position for `owner`.
    ///
    /// # Arguments
    /// * `owner` - Must not hold an Active position
    /// * `request` - Collateral, net debt, regime, max fee and sorted-index hint
    ///
    /// # Returns
    /// The fee charged and the resulting composite debt, stake and ICR
    pub fn open_position(&mut self, owner: Owner, request: OpenRequest) -> Result<OpenReceipt> {
        let params = &self.params;
        if owner.is_reserved() || request.collateral == 0 {
            return Err(LedgerError::InvalidRequestShape);
        }
        if self.positions.is_active(owner) {
            return Err(LedgerError::PositionAlreadyActive);
        }
        if request.debt < params.min_net_debt {
            return Err(LedgerError::BelowMinimumNetDebt);
        }

        let price = self.price()?;
        let now = self.current_time;
        let (sys_coll, sys_debt) = self.system_totals_with(0)?;
        let old_tcr = compute_tcr(sys_coll, sys_debt, price);
        let recovery = is_recovery_mode(old_tcr, params.ccr);

        validate_max_fee(request.max_fee, recovery, params)?;
        let first_position = self.positions.active_count() == 0;
        let exempt = (first_position && params.first_position_fee_exempt)
            || (recovery && params.recovery_mode_fee_exempt);
        let quote = if exempt {
            FeeQuote::none(&self.fees)
        } else {
            self.fees.quote_borrowing_fee(request.debt, now, params)?
        };
        require_fee_accepted(quote.fee, request.debt, request.max_fee)?;

        let composite_debt = checked_add(checked_add(request.debt, quote.fee)?, params.gas_compensation)?;
        let icr = compute_icr(request.collateral, composite_debt, price);

        if recovery {
            if icr < params.ccr {
                return Err(LedgerError::BelowMinimumCollateralization);
            }
        } else {
            if icr < params.mcr {
                return Err(LedgerError::BelowMinimumCollateralization);
            }
            let new_tcr =
                compute_tcr(checked_add(sys_coll, request.collateral)?, checked_add(sys_debt, composite_debt)?, price);
            if new_tcr < params.ccr {
                return Err(LedgerError::SystemBelowCriticalRatio);
            }
        }
        if request.regime.is_shielded() && icr < params.hcr {
            return Err(LedgerError::BelowShieldThreshold);
        }

        // ---- commit ----
        self.accrue_interest()?;
        self.fees.commit(&quote);

        let mut position = Position::new(owner);
        position.collateral = request.collateral;
        position.debt = composite_debt;
        position.regime = request.regime;
        position.reward_snapshot = self.rewards.current_snapshot();
        position.interest_snapshot = self.interest.regime(request.regime).index;
        let stake = self.rewards.update_stake_and_total(&mut position)?;
        self.positions.insert_active(position)?;
        self.resort(owner, request.hint)?;

        self.active_pool.receive_collateral(request.collateral)?;
        self.active_pool.increase_debt(composite_debt)?;
        self.token.mint(owner, request.debt)?;
        self.token.mint(Owner::GAS_POOL, self.params.gas_compensation)?;
        if quote.fee > 0 {
            self.token.mint(Owner::FEE_VAULT, quote.fee)?;
            self.fee_sink.receive_fee(FeeKind::Borrowing, quote.fee)?;
        }

        info!(
            "opened {}: coll {}, debt {}, fee {}, regime {:?}",
            owner, request.collateral, composite_debt, quote.fee, request.regime
        );
        Ok(OpenReceipt { fee: quote.fee, composite_debt, stake, icr })
    }

    /// Change collateral and/or debt of an Active position in one step
    pub fn adjust_position(&mut self, owner: Owner, request: AdjustRequest) -> Result<AdjustReceipt> {
        let params = &self.params;
        let position = self.positions.active(owner)?;
        let regime = position.regime;

        if request.coll_deposit > 0 && request.coll_withdrawal > 0 {
            return Err(LedgerError::InvalidRequestShape);
        }
        if request.debt_increase && request.debt_change == 0 {
            return Err(LedgerError::InvalidRequestShape);
        }
        if request.coll_deposit == 0 && request.coll_withdrawal == 0 && request.debt_change == 0 {
            return Err(LedgerError::InvalidRequestShape);
        }

        let price = self.price()?;
        let now = self.current_time;
        let entire = self.entire_position(owner)?;
        let (sys_coll, sys_debt) = self.system_totals_with(entire.pending_interest)?;
        let old_tcr = compute_tcr(sys_coll, sys_debt, price);
        let recovery = is_recovery_mode(old_tcr, params.ccr);

        let quote = if request.is_debt_increase() {
            validate_max_fee(request.max_fee, recovery, params)?;
            let quote = if recovery && params.recovery_mode_fee_exempt {
                FeeQuote::none(&self.fees)
            } else {
                self.fees.quote_borrowing_fee(request.debt_change, now, params)?
            };
            require_fee_accepted(quote.fee, request.debt_change, request.max_fee)?;
            quote
        } else {
            FeeQuote::none(&self.fees)
        };

        if request.coll_withdrawal > entire.collateral {
            return Err(LedgerError::InsufficientCollateral);
        }
        if request.is_debt_decrease() {
            let repayable = checked_sub(entire.debt, params.gas_compensation)?;
            if request.debt_change > repayable {
                return Err(LedgerError::ExcessiveRepayment);
            }
            if repayable - request.debt_change < params.min_net_debt {
                return Err(LedgerError::BelowMinimumNetDebt);
            }
            if self.token.balance_of(owner) < request.debt_change {
                return Err(LedgerError::InsufficientBalance);
            }
        }

        let new_coll = checked_sub(checked_add(entire.collateral, request.coll_deposit)?, request.coll_withdrawal)?;
        let new_debt = if request.debt_increase {
            checked_add(checked_add(entire.debt, request.debt_change)?, quote.fee)?
        } else {
            checked_sub(entire.debt, request.debt_change)?
        };
        if new_coll == 0 && new_debt == 0 {
            return Err(LedgerError::InvalidRequestShape);
        }

        let old_icr = compute_icr(entire.collateral, entire.debt, price);
        let new_icr = compute_icr(new_coll, new_debt, price);
        if recovery {
            if request.coll_withdrawal > 0 && new_icr < params.ccr {
                return Err(LedgerError::BelowMinimumCollateralization);
            }
            if request.is_debt_increase() && (new_icr < params.ccr || new_icr < old_icr) {
                return Err(LedgerError::BelowMinimumCollateralization);
            }
        } else if new_icr < params.mcr {
            return Err(LedgerError::BelowMinimumCollateralization);
        }

        let new_sys_coll = checked_sub(checked_add(sys_coll, request.coll_deposit)?, request.coll_withdrawal)?;
        let new_sys_debt = checked_sub(checked_add(sys_debt, new_debt)?, entire.debt)?;
        require_tcr_not_worsened(old_tcr, compute_tcr(new_sys_coll, new_sys_debt, price), params.ccr)?;

        if regime.is_shielded() && new_icr < old_icr && new_icr < params.hcr {
            return Err(LedgerError::BelowShieldThreshold);
        }

        // ---- commit ----
        self.accrue_interest()?;
        self.materialize(owner)?;
        self.fees.commit(&quote);

        let position = self.positions.active_mut(owner)?;
        position.collateral = new_coll;
        position.debt = new_debt;
        self.rewards.update_stake_and_total(position)?;
        self.resort(owner, request.hint)?;

        if request.coll_deposit > 0 {
            self.active_pool.receive_collateral(request.coll_deposit)?;
        }
        if request.coll_withdrawal > 0 {
            self.active_pool.send_collateral(request.coll_withdrawal)?;
        }
        if request.is_debt_increase() {
            self.active_pool.increase_debt(checked_add(request.debt_change, quote.fee)?)?;
            self.token.mint(owner, request.debt_change)?;
            if quote.fee > 0 {
                self.token.mint(Owner::FEE_VAULT, quote.fee)?;
                self.fee_sink.receive_fee(FeeKind::Borrowing, quote.fee)?;
            }
        } else if request.is_debt_decrease() {
            self.active_pool.decrease_debt(request.debt_change)?;
            self.token.burn(owner, request.debt_change)?;
        }

        debug!("adjusted {}: coll {}, debt {}, icr {}", owner, new_coll, new_debt, new_icr);
        Ok(AdjustReceipt { fee: quote.fee, collateral: new_coll, debt: new_debt, icr: new_icr })
    }

    pub fn add_collateral(&mut self, owner: Owner, amount: Amount) -> Result<AdjustReceipt> {
        self.adjust_position(owner, AdjustRequest::deposit(amount))
    }

    pub fn withdraw_collateral(&mut self, owner: Owner, amount: Amount) -> Result<AdjustReceipt> {
        self.adjust_position(owner, AdjustRequest::withdraw(amount))
    }

    pub fn borrow_credit(&mut self, owner: Owner, amount: Amount, max_fee: Amount) -> Result<AdjustReceipt> {
        self.adjust_position(owner, AdjustRequest::borrow(amount).max_fee(max_fee))
    }

    pub fn repay_credit(&mut self, owner: Owner, amount: Amount) -> Result<AdjustReceipt> {
        self.adjust_position(owner, AdjustRequest::repay(amount))
    }

    /// Repay all debt above the gas reserve and release the collateral
    pub fn close_position(&mut self, owner: Owner) -> Result<CloseReceipt> {
        let params = &self.params;
        self.positions.active(owner)?;
        if self.positions.active_count() <= 1 {
            return Err(LedgerError::SoleRemainingPosition);
        }

        let price = self.price()?;
        let entire = self.entire_position(owner)?;
        let repayment = checked_sub(entire.debt, params.gas_compensation)?;
        if self.token.balance_of(owner) < repayment {
            return Err(LedgerError::InsufficientBalance);
        }

        let (sys_coll, sys_debt) = self.system_totals_with(entire.pending_interest)?;
        let old_tcr = compute_tcr(sys_coll, sys_debt, price);
        let new_tcr =
            compute_tcr(checked_sub(sys_coll, entire.collateral)?, checked_sub(sys_debt, entire.debt)?, price);
        require_tcr_not_worsened(old_tcr, new_tcr, params.ccr)?;

        // ---- commit ----
        self.accrue_interest()?;
        self.materialize(owner)?;
        let gas = self.params.gas_compensation;

        let position = self.positions.active_mut(owner)?;
        let (collateral, debt) = (position.collateral, position.debt);
        self.rewards.remove_stake(position)?;
        self.sorted.remove(owner)?;
        self.positions.exit(owner, Status::Closed)?;

        self.active_pool.send_collateral(collateral)?;
        self.active_pool.decrease_debt(debt)?;
        self.token.burn(owner, repayment)?;
        self.token.burn(Owner::GAS_POOL, gas)?;

        info!("closed {}: returned coll {}, repaid {}", owner, collateral, repayment);
        Ok(CloseReceipt { collateral_returned: collateral, debt_repaid: repayment })
    }

    /// Switch the interest regime of an Active position.
    ///
    /// Interest accrued so far is materialized under the old regime, so the
    /// entire debt is the same before and after.
    pub fn set_shielded(&mut self, owner: Owner, shielded: bool) -> Result<()> {
        let target = if shielded { InterestRegime::Shielded } else { InterestRegime::Unshielded };
        let position = self.positions.active(owner)?;
        if position.regime == target {
            return Err(LedgerError::InvalidRequestShape);
        }
        if shielded && self.icr(owner)? < self.params.hcr {
            return Err(LedgerError::BelowShieldThreshold);
        }

        // ---- commit ----
        self.accrue_interest()?;
        self.materialize(owner)?;
        let index = self.interest.regime(target).index;
        let position = self.positions.active_mut(owner)?;
        position.regime = target;
        position.interest_snapshot = index;
        self.resort(owner, None)?;

        info!("{} switched to {:?}", owner, target);
        Ok(())
    }

    /// Pay out collateral left over from a capped liquidation or a full
    /// redemption
    pub fn claim_collateral(&mut self, owner: Owner) -> Result<Amount> {
        let amount = self.surplus.claim(owner)?;
        info!("{} claimed surplus coll {}", owner, amount);
        Ok(amount)
    }
}
