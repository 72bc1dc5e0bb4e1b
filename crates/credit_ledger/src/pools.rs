//! Custody pools
//!
//! The active pool holds collateral and debt of Active positions; the default
//! pool holds redistributed amounts not yet claimed by a touch. Surplus from
//! capped liquidations and full redemptions waits in [`CollSurplusPool`]
//! until its owner claims it.

use std::collections::BTreeMap;

use crate::error::{LedgerError, Result};
use crate::math::{checked_add, checked_sub, Amount};
use crate::position::Owner;

/// Collateral and debt balance of one custody account
pub trait CustodyPool {
    fn collateral(&self) -> Amount;
    fn debt(&self) -> Amount;
    fn receive_collateral(&mut self, amount: Amount) -> Result<()>;
    fn send_collateral(&mut self, amount: Amount) -> Result<()>;
    fn increase_debt(&mut self, amount: Amount) -> Result<()>;
    fn decrease_debt(&mut self, amount: Amount) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BalancePool {
    pub collateral: Amount,
    pub debt: Amount,
}

impl CustodyPool for BalancePool {
    fn collateral(&self) -> Amount {
        self.collateral
    }

    fn debt(&self) -> Amount {
        self.debt
    }

    fn receive_collateral(&mut self, amount: Amount) -> Result<()> {
        self.collateral = checked_add(self.collateral, amount)?;
        Ok(())
    }

    fn send_collateral(&mut self, amount: Amount) -> Result<()> {
        self.collateral = checked_sub(self.collateral, amount)?;
        Ok(())
    }

    fn increase_debt(&mut self, amount: Amount) -> Result<()> {
        self.debt = checked_add(self.debt, amount)?;
        Ok(())
    }

    fn decrease_debt(&mut self, amount: Amount) -> Result<()> {
        self.debt = checked_sub(self.debt, amount)?;
        Ok(())
    }
}

/// Move collateral and debt between two pools
pub fn transfer<P: CustodyPool, Q: CustodyPool>(from: &mut P, to: &mut Q, coll: Amount, debt: Amount) -> Result<()> {
    from.send_collateral(coll)?;
    from.decrease_debt(debt)?;
    to.receive_collateral(coll)?;
    to.increase_debt(debt)
}

/// Per-owner collateral claimable after leaving the system
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollSurplusPool {
    balances: BTreeMap<Owner, Amount>,
    total: Amount,
}

impl CollSurplusPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> Amount {
        self.total
    }

    pub fn balance_of(&self, owner: Owner) -> Amount {
        self.balances.get(&owner).copied().unwrap_or(0)
    }

    pub fn account_surplus(&mut self, owner: Owner, amount: Amount) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let balance = checked_add(self.balance_of(owner), amount)?;
        self.total = checked_add(self.total, amount)?;
        self.balances.insert(owner, balance);
        Ok(())
    }

    /// Pay out and clear `owner`'s surplus
    pub fn claim(&mut self, owner: Owner) -> Result<Amount> {
        let amount = self.balance_of(owner);
        if amount == 0 {
            return Err(LedgerError::NothingToClaim);
        }
        self.total = checked_sub(self.total, amount)?;
        self.balances.remove(&owner);
        Ok(amount)
    }
}
