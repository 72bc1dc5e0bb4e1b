//! Error types for the credit ledger

use thiserror::Error;

/// Rejection kinds returned by ledger operations.
///
/// Every rejection is immediate: an operation that returns an error has not
/// changed any engine state.
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerError {
    /// Operation requires an Active position that does not exist or is not Active
    #[error("position not found or not active")]
    PositionNotFound,

    /// Opening a position for an owner that already has an Active one
    #[error("position already active")]
    PositionAlreadyActive,

    /// Resulting ICR below MCR (normal mode) or below CCR (recovery-mode rules)
    #[error("resulting collateral ratio below the minimum")]
    BelowMinimumCollateralization,

    /// Operation would lower the system TCR and leave it below CCR
    #[error("operation would leave the system below the critical ratio")]
    SystemBelowCriticalRatio,

    /// Requested or resulting net debt below the protocol floor
    #[error("net debt below the minimum")]
    BelowMinimumNetDebt,

    /// Credit-token balance cannot cover the repayment
    #[error("insufficient credit balance")]
    InsufficientBalance,

    /// Zero-change adjust, simultaneous deposit and withdrawal, zero debt increase
    #[error("invalid request shape")]
    InvalidRequestShape,

    /// Close or liquidate attempted on the last Active position
    #[error("cannot remove the sole remaining position")]
    SoleRemainingPosition,

    /// Shielded regime requires ICR >= HCR
    #[error("collateral ratio below the shield threshold")]
    BelowShieldThreshold,

    /// Position is not eligible for liquidation in the current mode
    #[error("position is not liquidatable")]
    NotLiquidatable,

    /// Batch liquidation found no eligible position
    #[error("nothing to liquidate")]
    NothingToLiquidate,

    /// Repayment larger than the repayable part of the debt
    #[error("repayment exceeds repayable debt")]
    ExcessiveRepayment,

    /// Withdrawal larger than the position's collateral
    #[error("withdrawal exceeds collateral")]
    InsufficientCollateral,

    /// Max fee percentage outside the accepted range
    #[error("max fee percentage out of range")]
    InvalidMaxFee,

    /// Fee above the caller's max fee percentage
    #[error("fee exceeds the accepted maximum")]
    FeeExceedsMaximum,

    /// Redemption fee would consume all redeemed collateral
    #[error("fee would eat up all returned collateral")]
    FeeExceedsCollateral,

    /// Redemptions are blocked while TCR < MCR
    #[error("redemptions blocked while TCR is below MCR")]
    RedemptionBlocked,

    /// No position could be redeemed against
    #[error("unable to redeem any amount")]
    UnableToRedeem,

    /// No collateral surplus for this owner
    #[error("no collateral available to claim")]
    NothingToClaim,

    /// Oracle reported a zero price
    #[error("invalid price")]
    InvalidPrice,

    /// Sorted index already holds (or is missing) the id
    #[error("sorted index conflict")]
    IndexConflict,

    /// Arithmetic overflow, underflow or division by zero
    #[error("arithmetic overflow")]
    Overflow,
}

pub type Result<T> = core::result::Result<T, LedgerError>;

/// Errors raised while loading protocol parameters.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid decimal amount `{0}`")]
    InvalidAmount(String),

    #[error("invalid parameter: {0}")]
    Invalid(&'static str),
}
