//! Collaborators the ledger talks to, with in-memory reference implementations
//!
//! The engine is generic over these traits so a host can plug in its own
//! oracle, token and stability mechanism.

use std::collections::BTreeMap;

use log::debug;

use crate::error::{LedgerError, Result};
use crate::math::{checked_add, checked_sub, mul_div, Amount};
use crate::position::Owner;

// ============================================================================
// Price oracle
// ============================================================================

pub trait PriceOracle {
    /// Collateral price in credit, 1e18-scaled
    fn price(&self) -> Amount;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ManualPriceFeed {
    price: Amount,
}

impl ManualPriceFeed {
    pub fn new(price: Amount) -> Self {
        Self { price }
    }

    pub fn set_price(&mut self, price: Amount) {
        debug!("price {} -> {}", self.price, price);
        self.price = price;
    }
}

impl PriceOracle for ManualPriceFeed {
    fn price(&self) -> Amount {
        self.price
    }
}

// ============================================================================
// Credit token
// ============================================================================

pub trait CreditToken {
    fn balance_of(&self, owner: Owner) -> Amount;
    fn total_supply(&self) -> Amount;
    fn mint(&mut self, to: Owner, amount: Amount) -> Result<()>;
    /// Fails with `InsufficientBalance` if `from` holds less than `amount`
    fn burn(&mut self, from: Owner, amount: Amount) -> Result<()>;
    fn transfer(&mut self, from: Owner, to: Owner, amount: Amount) -> Result<()>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenLedger {
    balances: BTreeMap<Owner, Amount>,
    supply: Amount,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn debit(&mut self, from: Owner, amount: Amount) -> Result<()> {
        let balance = self.balance_of(from);
        if balance < amount {
            return Err(LedgerError::InsufficientBalance);
        }
        self.balances.insert(from, balance - amount);
        Ok(())
    }

    fn credit(&mut self, to: Owner, amount: Amount) -> Result<()> {
        let balance = checked_add(self.balance_of(to), amount)?;
        self.balances.insert(to, balance);
        Ok(())
    }
}

impl CreditToken for TokenLedger {
    fn balance_of(&self, owner: Owner) -> Amount {
        self.balances.get(&owner).copied().unwrap_or(0)
    }

    fn total_supply(&self) -> Amount {
        self.supply
    }

    fn mint(&mut self, to: Owner, amount: Amount) -> Result<()> {
        let supply = checked_add(self.supply, amount)?;
        self.credit(to, amount)?;
        self.supply = supply;
        Ok(())
    }

    fn burn(&mut self, from: Owner, amount: Amount) -> Result<()> {
        self.debit(from, amount)?;
        self.supply = checked_sub(self.supply, amount)?;
        Ok(())
    }

    fn transfer(&mut self, from: Owner, to: Owner, amount: Amount) -> Result<()> {
        if from == to {
            return if self.balance_of(from) < amount { Err(LedgerError::InsufficientBalance) } else { Ok(()) };
        }
        self.debit(from, amount)?;
        self.credit(to, amount)
    }
}

// ============================================================================
// Absorption pool
// ============================================================================

/// How much of a liquidated debt the absorption pool takes, and the
/// collateral it receives for it
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OffsetSplit {
    pub debt_offset: Amount,
    pub coll_offset: Amount,
}

/// Pro-rata split of `(debt, coll)` against `deposits`
pub fn offset_split(deposits: Amount, debt: Amount, coll: Amount) -> Result<OffsetSplit> {
    if debt == 0 || deposits == 0 {
        return Ok(OffsetSplit::default());
    }
    let debt_offset = debt.min(deposits);
    let coll_offset = mul_div(coll, debt_offset, debt)?;
    Ok(OffsetSplit { debt_offset, coll_offset })
}

/// Credit deposits that cancel liquidated debt in exchange for its collateral
pub trait AbsorptionPool {
    fn total_deposits(&self) -> Amount;

    fn deposit(&mut self, depositor: Owner, amount: Amount) -> Result<()>;

    /// Split `offset` would apply, without changing anything
    fn preview_offset(&self, debt: Amount, coll: Amount) -> Result<OffsetSplit> {
        offset_split(self.total_deposits(), debt, coll)
    }

    /// Cancel debt against deposits and take the matching collateral. Must
    /// produce the split `preview_offset` reported for the same inputs.
    fn offset(&mut self, debt: Amount, coll: Amount) -> Result<OffsetSplit>;
}

/// No stability mechanism: every liquidation is fully redistributed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoAbsorption;

impl AbsorptionPool for NoAbsorption {
    fn total_deposits(&self) -> Amount {
        0
    }

    fn deposit(&mut self, _depositor: Owner, _amount: Amount) -> Result<()> {
        Err(LedgerError::InvalidRequestShape)
    }

    fn offset(&mut self, _debt: Amount, _coll: Amount) -> Result<OffsetSplit> {
        Ok(OffsetSplit::default())
    }
}

/// Deposits per depositor; losses and collateral gains are shared pro rata
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DepositPool {
    deposits: BTreeMap<Owner, Amount>,
    collateral_gains: BTreeMap<Owner, Amount>,
    total: Amount,
    total_collateral: Amount,
}

impl DepositPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit_of(&self, depositor: Owner) -> Amount {
        self.deposits.get(&depositor).copied().unwrap_or(0)
    }

    pub fn collateral_gain_of(&self, depositor: Owner) -> Amount {
        self.collateral_gains.get(&depositor).copied().unwrap_or(0)
    }

    pub fn total_collateral(&self) -> Amount {
        self.total_collateral
    }
}

impl AbsorptionPool for DepositPool {
    fn total_deposits(&self) -> Amount {
        self.total
    }

    fn deposit(&mut self, depositor: Owner, amount: Amount) -> Result<()> {
        if amount == 0 {
            return Err(LedgerError::InvalidRequestShape);
        }
        let balance = checked_add(self.deposit_of(depositor), amount)?;
        self.total = checked_add(self.total, amount)?;
        self.deposits.insert(depositor, balance);
        Ok(())
    }

    fn offset(&mut self, debt: Amount, coll: Amount) -> Result<OffsetSplit> {
        let split = offset_split(self.total, debt, coll)?;
        if split.debt_offset == 0 {
            return Ok(split);
        }

        // Shares are taken against what is still left, so rounding never
        // asks a depositor for more than its deposit and the last one
        // settles the remainder exactly.
        let depositors: Vec<(Owner, Amount)> =
            self.deposits.iter().filter(|(_, d)| **d > 0).map(|(o, d)| (*o, *d)).collect();
        let mut debt_left = split.debt_offset;
        let mut coll_left = split.coll_offset;
        let mut deposits_left = self.total;
        for (owner, deposit) in depositors {
            let loss = mul_div(deposit, debt_left, deposits_left)?;
            let gain = mul_div(deposit, coll_left, deposits_left)?;
            debt_left = checked_sub(debt_left, loss)?;
            coll_left = checked_sub(coll_left, gain)?;
            deposits_left = checked_sub(deposits_left, deposit)?;

            self.deposits.insert(owner, checked_sub(deposit, loss)?);
            let gained = checked_add(self.collateral_gain_of(owner), gain)?;
            self.collateral_gains.insert(owner, gained);
        }

        self.total = checked_sub(self.total, split.debt_offset)?;
        self.total_collateral = checked_add(self.total_collateral, split.coll_offset)?;
        debug!(
            "absorbed debt {} for coll {}, deposits left {}",
            split.debt_offset, split.coll_offset, self.total
        );
        Ok(split)
    }
}

// ============================================================================
// Fee sink
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeeKind {
    /// Credit, charged on debt increases
    Borrowing,
    /// Collateral, charged on redemptions
    Redemption,
    /// Credit, materialized interest
    Interest,
}

pub trait FeeSink {
    fn receive_fee(&mut self, kind: FeeKind, amount: Amount) -> Result<()>;
}

/// Running totals per fee kind
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeeVault {
    pub borrowing: Amount,
    pub redemption: Amount,
    pub interest: Amount,
}

impl FeeSink for FeeVault {
    fn receive_fee(&mut self, kind: FeeKind, amount: Amount) -> Result<()> {
        let slot = match kind {
            FeeKind::Borrowing => &mut self.borrowing,
            FeeKind::Redemption => &mut self.redemption,
            FeeKind::Interest => &mut self.interest,
        };
        *slot = checked_add(*slot, amount)?;
        Ok(())
    }
}
