//! Protocol parameters
//!
//! Amount-like parameters are written as decimal strings (`mcr = "1.1"`)
//! because TOML integers are 64-bit and cannot hold 1e18-scaled values.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::math::{Amount, DECIMAL_PRECISION};

/// Which positions recovery mode makes eligible for liquidation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryLiquidation {
    /// ICR < MCR, plus MCR <= ICR < TCR capped at MCR when the absorption
    /// pool can cover the whole debt
    Capped,
    /// Only ICR < MCR, as in normal mode
    BelowMcr,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocolParams {
    /// Minimum collateral ratio for an individual position
    #[serde(with = "decimal_str")]
    pub mcr: Amount,
    /// Critical system ratio; TCR below it is recovery mode
    #[serde(with = "decimal_str")]
    pub ccr: Amount,
    /// Ratio a position must hold to be (and stay) shielded
    #[serde(with = "decimal_str")]
    pub hcr: Amount,

    /// Credit reserved per position for the liquidator
    #[serde(with = "decimal_str")]
    pub gas_compensation: Amount,
    #[serde(with = "decimal_str")]
    pub min_net_debt: Amount,
    /// Liquidators receive `coll / percent_divisor` collateral
    pub percent_divisor: u64,

    #[serde(with = "decimal_str")]
    pub borrowing_fee_floor: Amount,
    #[serde(with = "decimal_str")]
    pub max_borrowing_fee: Amount,
    #[serde(with = "decimal_str")]
    pub redemption_fee_floor: Amount,
    /// Divisor applied to fee-driven base rate increments
    pub beta: u64,
    /// Base rate multiplier per elapsed minute
    #[serde(with = "decimal_str")]
    pub minute_decay_factor: Amount,

    /// Annual interest on unshielded debt
    #[serde(with = "decimal_str")]
    pub unshielded_interest_rate: Amount,
    /// Annual interest on shielded debt
    #[serde(with = "decimal_str")]
    pub shielded_interest_rate: Amount,

    pub first_position_fee_exempt: bool,
    pub recovery_mode_fee_exempt: bool,
    pub recovery_liquidation: RecoveryLiquidation,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        const ONE: Amount = DECIMAL_PRECISION;
        Self {
            mcr: ONE * 11 / 10,
            ccr: ONE * 15 / 10,
            hcr: ONE * 16 / 10,
            gas_compensation: 200 * ONE,
            min_net_debt: 1_800 * ONE,
            percent_divisor: 200,
            borrowing_fee_floor: ONE * 5 / 1_000,
            max_borrowing_fee: ONE * 5 / 100,
            redemption_fee_floor: ONE * 5 / 1_000,
            beta: 2,
            minute_decay_factor: 999_037_758_833_783_000,
            unshielded_interest_rate: 0,
            shielded_interest_rate: ONE * 3 / 100,
            first_position_fee_exempt: true,
            recovery_mode_fee_exempt: true,
            recovery_liquidation: RecoveryLiquidation::Capped,
        }
    }
}

impl ProtocolParams {
    /// Parse and validate parameters from TOML text. Missing keys keep
    /// their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let params: ProtocolParams = toml::from_str(text)?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mcr <= DECIMAL_PRECISION {
            return Err(ConfigError::Invalid("mcr must exceed 1.0"));
        }
        if self.ccr <= self.mcr {
            return Err(ConfigError::Invalid("ccr must exceed mcr"));
        }
        if self.hcr < self.ccr {
            return Err(ConfigError::Invalid("hcr must not be below ccr"));
        }
        if self.percent_divisor == 0 {
            return Err(ConfigError::Invalid("percent_divisor must be positive"));
        }
        if self.beta == 0 {
            return Err(ConfigError::Invalid("beta must be positive"));
        }
        if self.minute_decay_factor == 0 || self.minute_decay_factor >= DECIMAL_PRECISION {
            return Err(ConfigError::Invalid("minute_decay_factor must lie in (0, 1)"));
        }
        if self.borrowing_fee_floor > self.max_borrowing_fee {
            return Err(ConfigError::Invalid("borrowing_fee_floor exceeds max_borrowing_fee"));
        }
        if self.max_borrowing_fee > DECIMAL_PRECISION || self.redemption_fee_floor > DECIMAL_PRECISION {
            return Err(ConfigError::Invalid("fee rates must not exceed 1.0"));
        }
        if self.min_net_debt == 0 {
            return Err(ConfigError::Invalid("min_net_debt must be positive"));
        }
        Ok(())
    }
}

/// Serde adapter for 1e18 fixed-point amounts written as decimal strings
mod decimal_str {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use crate::math::{format_decimal, parse_decimal, Amount};

    pub fn serialize<S: Serializer>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_decimal(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_decimal(&text)
            .ok_or_else(|| de::Error::custom(format!("invalid decimal amount `{}`", text)))
    }
}

/// Parse a standalone decimal amount, reporting the offending text
pub fn parse_amount(text: &str) -> Result<Amount, ConfigError> {
    crate::math::parse_decimal(text).ok_or_else(|| ConfigError::InvalidAmount(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ONE: Amount = DECIMAL_PRECISION;

    #[test]
    fn defaults_are_valid() {
        let params = ProtocolParams::default();
        params.validate().unwrap();
        assert_eq!(params.mcr, 1_100_000_000_000_000_000);
        assert!(params.first_position_fee_exempt);
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let params = ProtocolParams::from_toml_str(include_str!("../protocol.toml")).unwrap();
        assert_eq!(params, ProtocolParams::default());
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let params = ProtocolParams::from_toml_str(
            r#"
            mcr = "1.2"
            gas_compensation = "10"
            first_position_fee_exempt = false
            recovery_liquidation = "below_mcr"
            "#,
        )
        .unwrap();
        assert_eq!(params.mcr, 12 * ONE / 10);
        assert_eq!(params.gas_compensation, 10 * ONE);
        assert!(!params.first_position_fee_exempt);
        assert_eq!(params.recovery_liquidation, RecoveryLiquidation::BelowMcr);
        assert_eq!(params.ccr, ProtocolParams::default().ccr);
    }

    #[test]
    fn rejects_inconsistent_thresholds() {
        let err = ProtocolParams::from_toml_str("ccr = \"1.05\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ProtocolParams::from_toml_str("minute_decay_factor = \"1\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_malformed_amounts_and_unknown_keys() {
        assert!(matches!(
            ProtocolParams::from_toml_str("mcr = \"1.1.1\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ProtocolParams::from_toml_str("mcr_typo = \"1.1\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(parse_amount("abc"), Err(ConfigError::InvalidAmount(_))));
    }

    #[test]
    fn serializes_back_to_decimal_strings() {
        let text = toml::to_string(&ProtocolParams::default()).unwrap();
        assert!(text.contains("mcr = \"1.1\""), "{}", text);
        assert_eq!(ProtocolParams::from_toml_str(&text).unwrap(), ProtocolParams::default());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "min_net_debt = \"2000\"").unwrap();
        writeln!(file, "percent_divisor = 100").unwrap();

        let params = ProtocolParams::from_file(file.path()).unwrap();
        assert_eq!(params.min_net_debt, 2_000 * ONE);
        assert_eq!(params.percent_divisor, 100);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProtocolParams::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
