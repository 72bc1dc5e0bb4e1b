//! Per-regime interest accrual
//!
//! Each regime keeps a cumulative index that grows with simple interest
//! between updates and compounds whenever it is committed. A position stores
//! the index of its regime at its last touch; its pending interest is the
//! growth of its debt since then.

use crate::config::ProtocolParams;
use crate::error::Result;
use crate::math::{checked_add, checked_sub, mul_div, Amount, DECIMAL_PRECISION, SECONDS_PER_YEAR};

/// Which interest schedule a position's debt follows
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum InterestRegime {
    #[default]
    Unshielded,
    /// Opted out of redemptions in exchange for the shielded rate; must keep
    /// ICR at or above HCR
    Shielded,
}

impl InterestRegime {
    pub fn is_shielded(self) -> bool {
        matches!(self, InterestRegime::Shielded)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccrualIndex {
    /// Annual rate, 1e18 = 100%
    pub annual_rate: Amount,
    /// Cumulative growth factor, starts at 1e18
    pub index: Amount,
    pub last_update: u64,
}

impl AccrualIndex {
    pub fn new(annual_rate: Amount, now: u64) -> Self {
        Self { annual_rate, index: DECIMAL_PRECISION, last_update: now }
    }

    /// `index * (1 + annual_rate * dt / SECONDS_PER_YEAR)`
    pub fn index_at(&self, now: u64) -> Result<Amount> {
        let elapsed = now.saturating_sub(self.last_update);
        if elapsed == 0 || self.annual_rate == 0 {
            return Ok(self.index);
        }
        let growth = mul_div(self.annual_rate, u128::from(elapsed), u128::from(SECONDS_PER_YEAR))?;
        mul_div(self.index, checked_add(DECIMAL_PRECISION, growth)?, DECIMAL_PRECISION)
    }

    pub fn accrue(&mut self, now: u64) -> Result<()> {
        if now <= self.last_update {
            return Ok(());
        }
        self.index = self.index_at(now)?;
        self.last_update = now;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterestAccrual {
    pub unshielded: AccrualIndex,
    pub shielded: AccrualIndex,
}

impl InterestAccrual {
    pub fn new(params: &ProtocolParams, now: u64) -> Self {
        Self {
            unshielded: AccrualIndex::new(params.unshielded_interest_rate, now),
            shielded: AccrualIndex::new(params.shielded_interest_rate, now),
        }
    }

    pub fn regime(&self, regime: InterestRegime) -> &AccrualIndex {
        match regime {
            InterestRegime::Unshielded => &self.unshielded,
            InterestRegime::Shielded => &self.shielded,
        }
    }

    /// Index of `regime` as of `now`, without committing it
    pub fn index_at(&self, regime: InterestRegime, now: u64) -> Result<Amount> {
        self.regime(regime).index_at(now)
    }

    /// Time both indices were last committed
    pub fn last_update(&self) -> u64 {
        self.unshielded.last_update.max(self.shielded.last_update)
    }

    /// Commit both indices up to `now`
    pub fn accrue(&mut self, now: u64) -> Result<()> {
        self.unshielded.accrue(now)?;
        self.shielded.accrue(now)
    }
}

/// Interest owed on `debt` since it was last stamped with `snapshot`
pub fn pending_interest(debt: Amount, snapshot: Amount, current: Amount) -> Result<Amount> {
    if debt == 0 || snapshot == 0 || current <= snapshot {
        return Ok(0);
    }
    checked_sub(mul_div(debt, current, snapshot)?, debt)
}
