//! Fixed-point ratio math
//!
//! All amounts, prices and ratios share one decimal scale (1e18). Products
//! are formed in 256 bits so `coll * price` cannot overflow before the
//! division brings the result back into range.

use primitive_types::U256;

use crate::error::{LedgerError, Result};

/// Collateral, debt, stake and price amounts, scaled by [`DECIMAL_PRECISION`]
pub type Amount = u128;

/// One unit (1.0) in fixed point
pub const DECIMAL_PRECISION: Amount = 1_000_000_000_000_000_000;

/// Scale of the nominal collateral ratio used as the sorted-index key
pub const NICR_PRECISION: Amount = 100_000_000_000_000_000_000;

/// Ratio reported for a zero-debt position (infinitely collateralized)
pub const MAX_RATIO: Amount = u128::MAX;

/// Largest exponent accepted by [`dec_pow`] (1000 years in minutes)
pub const MAX_DECAY_MINUTES: u64 = 525_600_000;

pub const SECONDS_IN_ONE_MINUTE: u64 = 60;

pub const SECONDS_PER_YEAR: u64 = 31_536_000;

#[inline]
pub fn checked_add(a: Amount, b: Amount) -> Result<Amount> {
    a.checked_add(b).ok_or(LedgerError::Overflow)
}

#[inline]
pub fn checked_sub(a: Amount, b: Amount) -> Result<Amount> {
    a.checked_sub(b).ok_or(LedgerError::Overflow)
}

#[inline]
pub fn checked_div(a: Amount, d: Amount) -> Result<Amount> {
    a.checked_div(d).ok_or(LedgerError::Overflow)
}

#[inline]
fn narrow(value: U256) -> Option<Amount> {
    if value > U256::from(u128::MAX) {
        None
    } else {
        Some(value.low_u128())
    }
}

/// Bring a 256-bit intermediate back to [`Amount`]
#[inline]
pub fn to_amount(value: U256) -> Result<Amount> {
    narrow(value).ok_or(LedgerError::Overflow)
}

/// `a * b / d` with a 256-bit intermediate, rounding down
pub fn mul_div(a: Amount, b: Amount, d: Amount) -> Result<Amount> {
    if d == 0 {
        return Err(LedgerError::Overflow);
    }
    narrow(U256::from(a) * U256::from(b) / U256::from(d)).ok_or(LedgerError::Overflow)
}

/// Fixed-point product, rounded half up
pub fn dec_mul(x: Amount, y: Amount) -> Result<Amount> {
    let prod = U256::from(x) * U256::from(y) + U256::from(DECIMAL_PRECISION / 2);
    narrow(prod / U256::from(DECIMAL_PRECISION)).ok_or(LedgerError::Overflow)
}

/// `base ^ minutes` in fixed point, by repeated squaring.
///
/// The exponent is capped at [`MAX_DECAY_MINUTES`]; for any decay factor
/// below one the result has long reached zero by then.
pub fn dec_pow(base: Amount, minutes: u64) -> Result<Amount> {
    let mut n = minutes.min(MAX_DECAY_MINUTES);
    if n == 0 {
        return Ok(DECIMAL_PRECISION);
    }

    let mut y = DECIMAL_PRECISION;
    let mut x = base;
    while n > 1 {
        if n % 2 == 0 {
            x = dec_mul(x, x)?;
            n /= 2;
        } else {
            y = dec_mul(x, y)?;
            x = dec_mul(x, x)?;
            n = (n - 1) / 2;
        }
    }
    dec_mul(x, y)
}

/// Individual collateralization ratio: `coll * price / debt`.
///
/// Zero debt yields [`MAX_RATIO`]; a ratio too large for `u128` saturates to
/// the same sentinel.
pub fn compute_icr(coll: Amount, debt: Amount, price: Amount) -> Amount {
    if debt == 0 {
        return MAX_RATIO;
    }
    narrow(U256::from(coll) * U256::from(price) / U256::from(debt)).unwrap_or(MAX_RATIO)
}

/// Price-independent ratio `coll * 1e20 / debt`, used to order positions
pub fn compute_nicr(coll: Amount, debt: Amount) -> Amount {
    if debt == 0 {
        return MAX_RATIO;
    }
    narrow(U256::from(coll) * U256::from(NICR_PRECISION) / U256::from(debt)).unwrap_or(MAX_RATIO)
}

/// System-wide collateralization ratio over aggregate collateral and debt
pub fn compute_tcr(total_coll: Amount, total_debt: Amount, price: Amount) -> Amount {
    compute_icr(total_coll, total_debt, price)
}

#[inline]
pub fn is_recovery_mode(tcr: Amount, ccr: Amount) -> bool {
    tcr < ccr
}

/// Parse a decimal string such as `"1.1"` or `"200"` into fixed point.
///
/// At most 18 fractional digits are accepted.
pub fn parse_decimal(text: &str) -> Option<Amount> {
    let text = text.trim();
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, f),
        None => (text, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if frac_part.len() > 18 {
        return None;
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let whole: Amount = if int_part.is_empty() { 0 } else { int_part.parse().ok()? };
    let mut frac: Amount = if frac_part.is_empty() { 0 } else { frac_part.parse().ok()? };
    for _ in frac_part.len()..18 {
        frac *= 10;
    }
    whole.checked_mul(DECIMAL_PRECISION)?.checked_add(frac)
}

/// Render a fixed-point amount as a decimal string, trimming trailing zeros
pub fn format_decimal(value: Amount) -> String {
    let whole = value / DECIMAL_PRECISION;
    let frac = value % DECIMAL_PRECISION;
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{:018}", frac);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: Amount = DECIMAL_PRECISION;

    #[test]
    fn icr_of_zero_debt_is_maximal() {
        assert_eq!(compute_icr(5 * ONE, 0, 200 * ONE), MAX_RATIO);
        assert_eq!(compute_icr(0, 0, 200 * ONE), MAX_RATIO);
        assert_eq!(compute_nicr(5 * ONE, 0), MAX_RATIO);
    }

    #[test]
    fn icr_matches_hand_computation() {
        // 2 coll at price 200 against 200 debt = 200%
        assert_eq!(compute_icr(2 * ONE, 200 * ONE, 200 * ONE), 2 * ONE);
        // 1 coll at price 110 against 100 debt = 110%
        assert_eq!(compute_icr(ONE, 100 * ONE, 110 * ONE), 11 * ONE / 10);
    }

    #[test]
    fn icr_does_not_overflow_on_large_positions() {
        let coll = 1_000_000 * ONE;
        let price = 100_000 * ONE;
        let debt = 1_000 * ONE;
        assert_eq!(compute_icr(coll, debt, price), 100_000_000 * ONE);
    }

    #[test]
    fn icr_saturates_instead_of_failing() {
        assert_eq!(compute_icr(u128::MAX, 1, u128::MAX), MAX_RATIO);
    }

    #[test]
    fn tcr_and_recovery_mode() {
        let tcr = compute_tcr(3 * ONE, 400 * ONE, 200 * ONE);
        assert_eq!(tcr, 15 * ONE / 10);
        assert!(!is_recovery_mode(tcr, 15 * ONE / 10));
        assert!(is_recovery_mode(tcr - 1, 15 * ONE / 10));
    }

    #[test]
    fn nicr_orders_like_icr() {
        let a = compute_nicr(2 * ONE, 100 * ONE);
        let b = compute_nicr(3 * ONE, 100 * ONE);
        assert!(b > a);
        assert_eq!(a, 2 * NICR_PRECISION / 100);
    }

    #[test]
    fn mul_div_rejects_zero_divisor_and_overflow() {
        assert_eq!(mul_div(1, 1, 0), Err(LedgerError::Overflow));
        assert_eq!(mul_div(u128::MAX, 2, 1), Err(LedgerError::Overflow));
        assert_eq!(mul_div(u128::MAX, 2, 2), Ok(u128::MAX));
    }

    #[test]
    fn dec_pow_edge_cases() {
        assert_eq!(dec_pow(ONE / 2, 0).unwrap(), ONE);
        assert_eq!(dec_pow(ONE / 2, 1).unwrap(), ONE / 2);
        assert_eq!(dec_pow(ONE / 2, 2).unwrap(), ONE / 4);
        assert_eq!(dec_pow(ONE / 2, 3).unwrap(), ONE / 8);
        assert_eq!(dec_pow(ONE, 1_000_000).unwrap(), ONE);
    }

    #[test]
    fn dec_pow_half_life_of_default_decay() {
        // 0.999037758833783 per minute halves in about 12 hours
        let factor = 999_037_758_833_783_000;
        let decayed = dec_pow(factor, 720).unwrap();
        assert!(decayed > 499 * ONE / 1000 && decayed < 501 * ONE / 1000, "{}", decayed);
    }

    #[test]
    fn decimal_round_trip_through_text() {
        assert_eq!(parse_decimal("1.1"), Some(11 * ONE / 10));
        assert_eq!(parse_decimal("200"), Some(200 * ONE));
        assert_eq!(parse_decimal(".5"), Some(ONE / 2));
        assert_eq!(parse_decimal("0.000000000000000001"), Some(1));
        assert_eq!(parse_decimal("0.0000000000000000001"), None);
        assert_eq!(parse_decimal("1.x"), None);
        assert_eq!(parse_decimal("-1"), None);
        assert_eq!(format_decimal(11 * ONE / 10), "1.1");
        assert_eq!(format_decimal(200 * ONE), "200");
    }
}
