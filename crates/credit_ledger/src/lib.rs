//! Collateral-backed credit ledger
//!
//! Owners lock collateral in individually tracked positions and draw credit
//! against it. The crate provides the accounting core:
//! 1. O(1) redistribution of liquidated positions through reward-per-stake indices
//! 2. A sorted index of positions by nominal collateral ratio
//! 3. A decaying base rate for borrowing and redemption fees
//! 4. Two interest regimes (shielded and unshielded) that keep debt conserved
//! 5. Recovery-mode rules that gate every mutation
//!
//! All state lives in one [`CreditEngine`]. Price, credit token, absorption
//! pool and fee recipient are collaborators behind traits, with in-memory
//! implementations in [`external`].

#![forbid(unsafe_code)]

pub mod borrowing;
pub mod config;
pub mod engine;
pub mod error;
pub mod external;
pub mod fees;
pub mod interest;
pub mod liquidation;
pub mod math;
pub mod pools;
pub mod position;
pub mod redemption;
pub mod rewards;
pub mod sorted;

pub use borrowing::{AdjustReceipt, AdjustRequest, CloseReceipt, OpenReceipt, OpenRequest};
pub use config::{ProtocolParams, RecoveryLiquidation};
pub use engine::{CreditEngine, DefaultEngine, EntirePosition, Materialized, CONSERVATION_TOLERANCE};
pub use error::{ConfigError, LedgerError, Result};
pub use external::{
    AbsorptionPool, CreditToken, DepositPool, FeeKind, FeeSink, FeeVault, ManualPriceFeed, NoAbsorption, PriceOracle,
    TokenLedger,
};
pub use interest::InterestRegime;
pub use liquidation::{LiquidationMode, LiquidationOutcome, LiquidationTotals};
pub use math::{Amount, DECIMAL_PRECISION};
pub use position::{Owner, Position, Status};
pub use redemption::{RedemptionOutcome, RedemptionStep};
