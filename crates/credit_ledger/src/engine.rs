//! The credit engine
//!
//! A single owned value holding every piece of global state. Operations live
//! in `borrowing`, `liquidation` and `redemption` as further `impl` blocks.
//!
//! Every public operation follows the same shape: compute the outcome against
//! a read-only view (pending interest and rewards included, fees quoted,
//! pools projected), reject on any failed check, and only then commit. A
//! rejected operation leaves the engine exactly as it was.

use std::borrow::Cow;

use log::debug;

use crate::config::ProtocolParams;
use crate::error::{ConfigError, LedgerError, Result};
use crate::external::{
    AbsorptionPool, CreditToken, DepositPool, FeeKind, FeeSink, FeeVault, ManualPriceFeed, PriceOracle, TokenLedger,
};
use crate::fees::FeeAggregator;
use crate::interest::{pending_interest, InterestAccrual, InterestRegime};
use crate::math::{checked_add, compute_icr, compute_nicr, compute_tcr, is_recovery_mode, Amount};
use crate::pools::{transfer, BalancePool, CollSurplusPool, CustodyPool};
use crate::position::{Owner, Position, PositionLedger};
use crate::rewards::{PendingRewards, RewardAccumulator};
use crate::sorted::SortedIndex;

/// Rounding slack allowed between summed positions and pool balances
pub const CONSERVATION_TOLERANCE: Amount = 1_000_000;

/// A position's balances with everything pending folded in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntirePosition {
    pub collateral: Amount,
    pub debt: Amount,
    pub pending_coll: Amount,
    pub pending_debt: Amount,
    pub pending_interest: Amount,
}

/// What `materialize` moved into a position
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Materialized {
    pub interest: Amount,
    pub rewards: PendingRewards,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreditEngine<O, T, A, F> {
    pub params: ProtocolParams,

    // ========================================
    // Accounting state
    // ========================================

    pub positions: PositionLedger,
    pub sorted: SortedIndex,
    pub rewards: RewardAccumulator,
    pub fees: FeeAggregator,
    pub interest: InterestAccrual,

    // ========================================
    // Custody
    // ========================================

    pub active_pool: BalancePool,
    pub default_pool: BalancePool,
    pub surplus: CollSurplusPool,

    // ========================================
    // Collaborators
    // ========================================

    pub oracle: O,
    pub token: T,
    pub absorption: A,
    pub fee_sink: F,

    /// Seconds; drives fee decay and interest
    pub current_time: u64,
}

/// Engine wired to the in-memory reference collaborators
pub type DefaultEngine = CreditEngine<ManualPriceFeed, TokenLedger, DepositPool, FeeVault>;

impl DefaultEngine {
    pub fn new(params: ProtocolParams, price: Amount) -> core::result::Result<Self, ConfigError> {
        Self::with_collaborators(
            params,
            ManualPriceFeed::new(price),
            TokenLedger::new(),
            DepositPool::new(),
            FeeVault::default(),
        )
    }

    pub fn set_price(&mut self, price: Amount) {
        self.oracle.set_price(price);
    }
}

/// Entire balances of `position` at `now`: interest on the stored debt
/// first, then redistribution rewards
pub fn entire_of(
    position: &Position,
    rewards: &RewardAccumulator,
    interest: &InterestAccrual,
    now: u64,
) -> Result<EntirePosition> {
    let index = interest.index_at(position.regime, now)?;
    let accrued = pending_interest(position.debt, position.interest_snapshot, index)?;
    let pending = rewards.pending(position)?;
    Ok(EntirePosition {
        collateral: checked_add(position.collateral, pending.coll)?,
        debt: checked_add(checked_add(position.debt, accrued)?, pending.debt)?,
        pending_coll: pending.coll,
        pending_debt: pending.debt,
        pending_interest: accrued,
    })
}

/// Live NICR of `owner`, the sorted-index key
fn nicr_key(
    positions: &PositionLedger,
    rewards: &RewardAccumulator,
    interest: &InterestAccrual,
    now: u64,
    owner: Owner,
) -> Amount {
    match positions.get(owner) {
        Some(p) => match entire_of(p, rewards, interest, now) {
            Ok(e) => compute_nicr(e.collateral, e.debt),
            Err(_) => compute_nicr(p.collateral, p.debt),
        },
        None => 0,
    }
}

impl<O, T, A, F> CreditEngine<O, T, A, F>
where
    O: PriceOracle,
    T: CreditToken,
    A: AbsorptionPool,
    F: FeeSink,
{
    /// Build an empty engine; `params` must pass [`ProtocolParams::validate`]
    pub fn with_collaborators(
        params: ProtocolParams,
        oracle: O,
        token: T,
        absorption: A,
        fee_sink: F,
    ) -> core::result::Result<Self, ConfigError> {
        params.validate()?;
        let interest = InterestAccrual::new(&params, 0);
        Ok(Self {
            params,
            positions: PositionLedger::new(),
            sorted: SortedIndex::new(),
            rewards: RewardAccumulator::new(),
            fees: FeeAggregator::new(0),
            interest,
            active_pool: BalancePool::default(),
            default_pool: BalancePool::default(),
            surplus: CollSurplusPool::new(),
            oracle,
            token,
            absorption,
            fee_sink,
            current_time: 0,
        })
    }

    // ========================================
    // Clock and price
    // ========================================

    pub fn advance_time(&mut self, seconds: u64) {
        self.current_time = self.current_time.saturating_add(seconds);
    }

    /// Move the clock to `now`; the clock never runs backwards
    pub fn set_time(&mut self, now: u64) {
        self.current_time = self.current_time.max(now);
    }

    pub fn price(&self) -> Result<Amount> {
        match self.oracle.price() {
            0 => Err(LedgerError::InvalidPrice),
            price => Ok(price),
        }
    }

    // ========================================
    // Read-only views
    // ========================================

    pub fn entire_position(&self, owner: Owner) -> Result<EntirePosition> {
        let position = self.positions.active(owner)?;
        entire_of(position, &self.rewards, &self.interest, self.current_time)
    }

    /// Current ICR of an Active position, pending amounts included
    pub fn icr(&self, owner: Owner) -> Result<Amount> {
        let price = self.price()?;
        let entire = self.entire_position(owner)?;
        Ok(compute_icr(entire.collateral, entire.debt, price))
    }

    pub fn nicr(&self, owner: Owner) -> Result<Amount> {
        let entire = self.entire_position(owner)?;
        Ok(compute_nicr(entire.collateral, entire.debt))
    }

    /// Active + default collateral
    pub fn entire_system_coll(&self) -> Result<Amount> {
        checked_add(self.active_pool.collateral(), self.default_pool.collateral())
    }

    /// Active + default debt; unmaterialized interest is not included
    pub fn entire_system_debt(&self) -> Result<Amount> {
        checked_add(self.active_pool.debt(), self.default_pool.debt())
    }

    pub fn tcr(&self) -> Result<Amount> {
        let price = self.price()?;
        Ok(compute_tcr(self.entire_system_coll()?, self.entire_system_debt()?, price))
    }

    pub fn is_recovery_mode(&self) -> Result<bool> {
        Ok(is_recovery_mode(self.tcr()?, self.params.ccr))
    }

    pub fn active_count(&self) -> usize {
        self.positions.active_count()
    }

    /// Credit balance of `owner`
    pub fn balance_of(&self, owner: Owner) -> Amount {
        self.token.balance_of(owner)
    }

    // ========================================
    // Commit helpers
    // ========================================

    /// Commit both interest indices up to the engine clock.
    ///
    /// The regimes grow debt at different rates, so positions can overtake
    /// each other between commits; the index is rebuilt whenever an index
    /// moved.
    pub(crate) fn accrue_interest(&mut self) -> Result<()> {
        let before = self.interest;
        self.interest.accrue(self.current_time)?;
        if self.interest.unshielded.index != before.unshielded.index
            || self.interest.shielded.index != before.shielded.index
        {
            self.reindex();
        }
        Ok(())
    }

    /// Rebuild the sorted index from live NICRs
    pub(crate) fn reindex(&mut self) {
        let CreditEngine { positions, rewards, interest, sorted, current_time, .. } = self;
        let (positions, rewards, interest, now) = (&*positions, &*rewards, &*interest, *current_time);
        sorted.rebuild(|o| nicr_key(positions, rewards, interest, now, o));
    }

    /// The sorted index as it stands once interest is committed at the
    /// engine clock. Borrows the stored index when nothing has accrued.
    pub fn live_index(&self) -> Result<Cow<'_, SortedIndex>> {
        let now = self.current_time;
        let stale = self.interest.index_at(InterestRegime::Unshielded, now)? != self.interest.unshielded.index
            || self.interest.index_at(InterestRegime::Shielded, now)? != self.interest.shielded.index;
        if !stale {
            return Ok(Cow::Borrowed(&self.sorted));
        }
        let mut index = self.sorted.clone();
        index.rebuild(|o| nicr_key(&self.positions, &self.rewards, &self.interest, now, o));
        Ok(Cow::Owned(index))
    }

    /// Fold pending interest and rewards into the stored position and move
    /// the matching balances.
    ///
    /// Interest is new debt in the active pool, minted to the fee vault.
    /// Rewards move from the default pool to the active pool. Indices must
    /// already be accrued to the engine clock.
    pub(crate) fn materialize(&mut self, owner: Owner) -> Result<Materialized> {
        let position = self.positions.active_mut(owner)?;

        let index = self.interest.regime(position.regime).index;
        let interest = pending_interest(position.debt, position.interest_snapshot, index)?;
        position.debt = checked_add(position.debt, interest)?;
        position.interest_snapshot = index;

        let rewards = self.rewards.apply_pending(position)?;

        if interest > 0 {
            self.active_pool.increase_debt(interest)?;
            self.token.mint(Owner::FEE_VAULT, interest)?;
            self.fee_sink.receive_fee(FeeKind::Interest, interest)?;
        }
        if !rewards.is_zero() {
            transfer(&mut self.default_pool, &mut self.active_pool, rewards.coll, rewards.debt)?;
        }
        if interest > 0 || !rewards.is_zero() {
            debug!(
                "materialized {}: interest {}, reward coll {}, reward debt {}",
                owner, interest, rewards.coll, rewards.debt
            );
        }
        Ok(Materialized { interest, rewards })
    }

    /// Place `owner` in the sorted index at its live NICR
    pub(crate) fn resort(&mut self, owner: Owner, hint: Option<Owner>) -> Result<()> {
        let CreditEngine { positions, rewards, interest, sorted, current_time, .. } = self;
        let (positions, rewards, interest, now) = (&*positions, &*rewards, &*interest, *current_time);
        let key = nicr_key(positions, rewards, interest, now, owner);
        let key_of = |o: Owner| nicr_key(positions, rewards, interest, now, o);
        if sorted.contains(owner) {
            sorted.reinsert(owner, key, hint, key_of)
        } else {
            sorted.insert(owner, key, hint, key_of)
        }
    }

    /// Apply pending interest and rewards to `owner` without any other change
    pub fn touch(&mut self, owner: Owner) -> Result<Materialized> {
        self.positions.active(owner)?;
        self.accrue_interest()?;
        let applied = self.materialize(owner)?;
        self.resort(owner, None)?;
        Ok(applied)
    }

    /// Move credit from `depositor` into the absorption pool
    pub fn deposit_to_absorption(&mut self, depositor: Owner, amount: Amount) -> Result<()> {
        if amount == 0 || depositor.is_reserved() {
            return Err(LedgerError::InvalidRequestShape);
        }
        if self.token.balance_of(depositor) < amount {
            return Err(LedgerError::InsufficientBalance);
        }
        self.absorption.deposit(depositor, amount)?;
        self.token.transfer(depositor, Owner::ABSORPTION_POOL, amount)
    }

    // ========================================
    // Invariant checks
    // ========================================

    /// Positions and pools agree: summed entire collateral and debt of Active
    /// positions (interest excluded) match active + default balances within
    /// [`CONSERVATION_TOLERANCE`], and credit supply equals system debt.
    pub fn check_conservation(&self) -> bool {
        let mut coll: Amount = 0;
        let mut debt: Amount = 0;
        for position in self.positions.iter_active() {
            let pending = match self.rewards.pending(position) {
                Ok(p) => p,
                Err(_) => return false,
            };
            coll = coll.saturating_add(position.collateral).saturating_add(pending.coll);
            debt = debt.saturating_add(position.debt).saturating_add(pending.debt);
        }
        let (pool_coll, pool_debt) = match (self.entire_system_coll(), self.entire_system_debt()) {
            (Ok(c), Ok(d)) => (c, d),
            _ => return false,
        };

        coll.abs_diff(pool_coll) <= CONSERVATION_TOLERANCE
            && debt.abs_diff(pool_debt) <= CONSERVATION_TOLERANCE
            && coll <= pool_coll
            && debt <= pool_debt
            && self.token.total_supply() == pool_debt
    }

    /// Summed stakes of Active positions equal `total_stakes`
    pub fn check_stake_consistency(&self) -> bool {
        let sum = self.positions.iter_active().fold(0u128, |acc, p| acc.saturating_add(p.stake));
        sum == self.rewards.total_stakes
    }

    /// Exactly the Active positions are listed in the sorted index
    pub fn check_sorted_membership(&self) -> bool {
        self.sorted.size() == self.positions.active_count()
            && self.positions.owners().iter().all(|o| self.sorted.contains(*o))
    }

    /// The sorted index is descending by NICR as of the last interest commit
    pub fn check_sorted_order(&self) -> bool {
        let at = self.interest.last_update();
        self.sorted.is_sorted_by(|o| nicr_key(&self.positions, &self.rewards, &self.interest, at, o))
    }
}
