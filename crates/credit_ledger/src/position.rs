//! Position records and owner enumeration

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{LedgerError, Result};
use crate::interest::InterestRegime;
use crate::math::Amount;
use crate::rewards::RewardSnapshot;

/// Stable identifier of a position owner
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Owner(pub u64);

impl Owner {
    /// Reserved account holding every position's gas-compensation reserve
    pub const GAS_POOL: Owner = Owner(u64::MAX);
    /// Credit deposited in the absorption pool
    pub const ABSORPTION_POOL: Owner = Owner(u64::MAX - 1);
    /// Borrowing fees and interest minted as credit
    pub const FEE_VAULT: Owner = Owner(u64::MAX - 2);

    pub fn is_reserved(self) -> bool {
        self.0 >= u64::MAX - 2
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Owner::GAS_POOL => write!(f, "gas-pool"),
            Owner::ABSORPTION_POOL => write!(f, "absorption-pool"),
            Owner::FEE_VAULT => write!(f, "fee-vault"),
            Owner(id) => write!(f, "#{}", id),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Status {
    #[default]
    NonExistent,
    Active,
    Closed,
    Liquidated,
    ClosedByRedemption,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Position {
    pub owner: Owner,

    // ========================================
    // Balances
    // ========================================

    pub collateral: Amount,
    /// Principal, fees, gas reserve and everything materialized since
    pub debt: Amount,
    /// Share of future redistributions
    pub stake: Amount,

    // ========================================
    // Lifecycle
    // ========================================

    pub status: Status,
    pub regime: InterestRegime,

    // ========================================
    // Snapshots
    // ========================================

    /// `(L_Coll, L_Debt)` at the last touch
    pub reward_snapshot: RewardSnapshot,
    /// Interest index of `regime` at the last touch
    pub interest_snapshot: Amount,

    /// Slot in the owner array while Active
    pub list_index: usize,
}

impl Position {
    pub fn new(owner: Owner) -> Self {
        Self {
            owner,
            collateral: 0,
            debt: 0,
            stake: 0,
            status: Status::NonExistent,
            regime: InterestRegime::Unshielded,
            reward_snapshot: RewardSnapshot::default(),
            interest_snapshot: 0,
            list_index: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }
}

/// All position records ever created, plus the enumeration of Active owners.
///
/// Closed records are kept so their status stays observable; reopening
/// overwrites them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PositionLedger {
    positions: BTreeMap<Owner, Position>,
    owners: Vec<Owner>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, owner: Owner) -> Option<&Position> {
        self.positions.get(&owner)
    }

    pub fn status(&self, owner: Owner) -> Status {
        self.positions.get(&owner).map(|p| p.status).unwrap_or_default()
    }

    pub fn is_active(&self, owner: Owner) -> bool {
        self.status(owner) == Status::Active
    }

    pub fn active(&self, owner: Owner) -> Result<&Position> {
        match self.positions.get(&owner) {
            Some(p) if p.is_active() => Ok(p),
            _ => Err(LedgerError::PositionNotFound),
        }
    }

    pub fn active_mut(&mut self, owner: Owner) -> Result<&mut Position> {
        match self.positions.get_mut(&owner) {
            Some(p) if p.is_active() => Ok(p),
            _ => Err(LedgerError::PositionNotFound),
        }
    }

    /// Record a freshly opened position and append its owner to the array
    pub fn insert_active(&mut self, mut position: Position) -> Result<()> {
        if self.is_active(position.owner) {
            return Err(LedgerError::PositionAlreadyActive);
        }
        position.status = Status::Active;
        position.list_index = self.owners.len();
        self.owners.push(position.owner);
        self.positions.insert(position.owner, position);
        Ok(())
    }

    /// Move an Active position to a terminal status.
    ///
    /// Balances, stake and snapshots are zeroed and the owner is swap-removed
    /// from the array, patching the moved owner's `list_index`.
    pub fn exit(&mut self, owner: Owner, status: Status) -> Result<()> {
        let index = self.active(owner)?.list_index;
        if self.owners.get(index) != Some(&owner) {
            return Err(LedgerError::IndexConflict);
        }

        self.owners.swap_remove(index);
        if let Some(&moved) = self.owners.get(index) {
            if let Some(p) = self.positions.get_mut(&moved) {
                p.list_index = index;
            }
        }

        let position = self.active_mut(owner)?;
        position.collateral = 0;
        position.debt = 0;
        position.stake = 0;
        position.status = status;
        position.reward_snapshot = RewardSnapshot::default();
        position.interest_snapshot = 0;
        position.list_index = 0;
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.owners.len()
    }

    /// Active owners in array order
    pub fn owners(&self) -> &[Owner] {
        &self.owners
    }

    pub fn iter_active(&self) -> impl Iterator<Item = &Position> + '_ {
        self.owners.iter().filter_map(move |o| self.positions.get(o))
    }
}
