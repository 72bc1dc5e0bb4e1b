//! Decaying base rate and fee quotes
//!
//! The base rate decays by `minute_decay_factor` per whole elapsed minute and
//! grows with every charged fee. Quotes are computed against a read-only
//! view; `commit` writes the resulting state.

use log::debug;

use crate::config::ProtocolParams;
use crate::error::{LedgerError, Result};
use crate::math::{
    checked_add, checked_div, dec_mul, dec_pow, mul_div, Amount, DECIMAL_PRECISION, SECONDS_IN_ONE_MINUTE,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeeAggregator {
    pub base_rate: Amount,
    pub last_fee_operation_time: u64,
}

/// A computed fee together with the fee-state it leaves behind
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeeQuote {
    pub fee: Amount,
    /// Effective rate applied to the amount
    pub rate: Amount,
    pub new_base_rate: Amount,
    pub new_last_fee_operation_time: u64,
}

impl FeeQuote {
    /// A zero fee that leaves the aggregator untouched
    pub fn none(state: &FeeAggregator) -> Self {
        Self {
            fee: 0,
            rate: 0,
            new_base_rate: state.base_rate,
            new_last_fee_operation_time: state.last_fee_operation_time,
        }
    }
}

impl FeeAggregator {
    pub fn new(now: u64) -> Self {
        Self { base_rate: 0, last_fee_operation_time: now }
    }

    fn minutes_since_last_fee_op(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_fee_operation_time) / SECONDS_IN_ONE_MINUTE
    }

    /// Base rate after time decay, without touching state
    pub fn decayed_base_rate(&self, now: u64, params: &ProtocolParams) -> Result<Amount> {
        let minutes = self.minutes_since_last_fee_op(now);
        if minutes == 0 || self.base_rate == 0 {
            return Ok(self.base_rate);
        }
        let factor = dec_pow(params.minute_decay_factor, minutes)?;
        dec_mul(self.base_rate, factor)
    }

    /// The fee clock only advances once a full minute has passed
    fn next_fee_operation_time(&self, now: u64) -> u64 {
        if now.saturating_sub(self.last_fee_operation_time) >= SECONDS_IN_ONE_MINUTE {
            now
        } else {
            self.last_fee_operation_time
        }
    }

    /// Borrowing fee currently charged per unit of debt
    pub fn borrowing_rate(&self, now: u64, params: &ProtocolParams) -> Result<Amount> {
        let decayed = self.decayed_base_rate(now, params)?;
        Ok(decayed.max(params.borrowing_fee_floor).min(params.max_borrowing_fee))
    }

    /// Quote the fee on a debt increase of `amount`.
    ///
    /// A zero amount returns [`FeeQuote::none`] so fee state is left alone.
    pub fn quote_borrowing_fee(&self, amount: Amount, now: u64, params: &ProtocolParams) -> Result<FeeQuote> {
        if amount == 0 {
            return Ok(FeeQuote::none(self));
        }

        let decayed = self.decayed_base_rate(now, params)?;
        let rate = decayed.max(params.borrowing_fee_floor).min(params.max_borrowing_fee);
        let fee = mul_div(amount, rate, DECIMAL_PRECISION)?;
        let increment = checked_div(rate, u128::from(params.beta))?;
        let new_base_rate = checked_add(decayed, increment)?.min(DECIMAL_PRECISION);

        Ok(FeeQuote {
            fee,
            rate,
            new_base_rate,
            new_last_fee_operation_time: self.next_fee_operation_time(now),
        })
    }

    /// Quote the collateral fee for redeeming `coll_drawn` collateral
    /// against a credit supply of `credit_supply`.
    pub fn quote_redemption_fee(
        &self,
        coll_drawn: Amount,
        price: Amount,
        credit_supply: Amount,
        now: u64,
        params: &ProtocolParams,
    ) -> Result<FeeQuote> {
        if coll_drawn == 0 {
            return Ok(FeeQuote::none(self));
        }

        let decayed = self.decayed_base_rate(now, params)?;
        // redeemed share of the supply, valued at the current price
        let redeemed_fraction = mul_div(coll_drawn, price, credit_supply)?;
        let increment = checked_div(redeemed_fraction, u128::from(params.beta))?;
        let new_base_rate = checked_add(decayed, increment)?.min(DECIMAL_PRECISION);
        let rate = checked_add(new_base_rate, params.redemption_fee_floor)?.min(DECIMAL_PRECISION);
        let fee = mul_div(coll_drawn, rate, DECIMAL_PRECISION)?;

        if fee >= coll_drawn {
            return Err(LedgerError::FeeExceedsCollateral);
        }

        Ok(FeeQuote {
            fee,
            rate,
            new_base_rate,
            new_last_fee_operation_time: self.next_fee_operation_time(now),
        })
    }

    pub fn commit(&mut self, quote: &FeeQuote) {
        if quote.new_base_rate != self.base_rate || quote.new_last_fee_operation_time != self.last_fee_operation_time {
            debug!(
                "fee state: base_rate {} -> {}, last_fee_operation_time {} -> {}",
                self.base_rate, quote.new_base_rate, self.last_fee_operation_time, quote.new_last_fee_operation_time
            );
        }
        self.base_rate = quote.new_base_rate;
        self.last_fee_operation_time = quote.new_last_fee_operation_time;
    }

    /// Quote and commit in one step
    pub fn charge_borrowing_fee(&mut self, amount: Amount, now: u64, params: &ProtocolParams) -> Result<Amount> {
        let quote = self.quote_borrowing_fee(amount, now, params)?;
        self.commit(&quote);
        Ok(quote.fee)
    }
}

/// Reject a max fee percentage outside the accepted range.
///
/// Recovery mode waives the lower bound since borrowing is fee-exempt there.
pub fn validate_max_fee(max_fee: Amount, recovery_mode: bool, params: &ProtocolParams) -> Result<()> {
    let floor = if recovery_mode { 0 } else { params.borrowing_fee_floor };
    if max_fee < floor || max_fee > DECIMAL_PRECISION {
        return Err(LedgerError::InvalidMaxFee);
    }
    Ok(())
}

/// Reject a fee that exceeds `max_fee` of the amount it was charged on
pub fn require_fee_accepted(fee: Amount, amount: Amount, max_fee: Amount) -> Result<()> {
    if amount == 0 {
        return Ok(());
    }
    let percentage = mul_div(fee, DECIMAL_PRECISION, amount)?;
    if percentage > max_fee {
        return Err(LedgerError::FeeExceedsMaximum);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: Amount = DECIMAL_PRECISION;

    fn params() -> ProtocolParams {
        ProtocolParams::default()
    }

    #[test]
    fn fresh_aggregator_charges_the_floor() {
        let fees = FeeAggregator::new(0);
        let quote = fees.quote_borrowing_fee(2_000 * ONE, 0, &params()).unwrap();
        assert_eq!(quote.rate, params().borrowing_fee_floor);
        assert_eq!(quote.fee, 10 * ONE);
        assert_eq!(quote.new_base_rate, params().borrowing_fee_floor / 2);
    }

    #[test]
    fn zero_beta_is_an_error() {
        let params = ProtocolParams { beta: 0, ..params() };
        let fees = FeeAggregator::new(0);
        assert_eq!(fees.quote_borrowing_fee(2_000 * ONE, 0, &params), Err(LedgerError::Overflow));
        assert_eq!(fees.quote_redemption_fee(ONE, 200 * ONE, 2_000 * ONE, 0, &params), Err(LedgerError::Overflow));
    }

    #[test]
    fn zero_amount_leaves_state_untouched() {
        let mut fees = FeeAggregator { base_rate: ONE / 100, last_fee_operation_time: 10 };
        let before = fees;
        let fee = fees.charge_borrowing_fee(0, 10_000, &params()).unwrap();
        assert_eq!(fee, 0);
        assert_eq!(fees, before);
    }

    #[test]
    fn rate_is_capped_at_max_borrowing_fee() {
        let fees = FeeAggregator { base_rate: ONE / 2, last_fee_operation_time: 0 };
        let quote = fees.quote_borrowing_fee(1_000 * ONE, 0, &params()).unwrap();
        assert_eq!(quote.rate, params().max_borrowing_fee);
        assert_eq!(quote.fee, 50 * ONE);
    }

    #[test]
    fn base_rate_never_exceeds_one() {
        let fees = FeeAggregator { base_rate: ONE, last_fee_operation_time: 0 };
        let quote = fees.quote_borrowing_fee(ONE, 0, &params()).unwrap();
        assert_eq!(quote.new_base_rate, ONE);
    }

    #[test]
    fn sub_minute_elapsed_does_not_decay() {
        let fees = FeeAggregator { base_rate: ONE / 10, last_fee_operation_time: 1_000 };
        assert_eq!(fees.decayed_base_rate(1_059, &params()).unwrap(), ONE / 10);
        assert!(fees.decayed_base_rate(1_060, &params()).unwrap() < ONE / 10);
    }

    #[test]
    fn base_rate_halves_after_twelve_hours() {
        let fees = FeeAggregator { base_rate: ONE / 10, last_fee_operation_time: 0 };
        let decayed = fees.decayed_base_rate(12 * 3_600, &params()).unwrap();
        assert!(decayed > ONE / 20 - ONE / 10_000 && decayed < ONE / 20 + ONE / 10_000);
    }

    #[test]
    fn fee_clock_needs_a_full_minute() {
        let mut fees = FeeAggregator::new(1_000);
        fees.charge_borrowing_fee(ONE, 1_030, &params()).unwrap();
        assert_eq!(fees.last_fee_operation_time, 1_000);

        fees.charge_borrowing_fee(ONE, 1_060, &params()).unwrap();
        assert_eq!(fees.last_fee_operation_time, 1_060);
    }

    #[test]
    fn each_fee_raises_the_base_rate() {
        let mut fees = FeeAggregator::new(0);
        fees.charge_borrowing_fee(ONE, 0, &params()).unwrap();
        let first = fees.base_rate;
        fees.charge_borrowing_fee(ONE, 0, &params()).unwrap();
        assert!(fees.base_rate > first);
    }

    #[test]
    fn redemption_fee_includes_redeemed_fraction() {
        let fees = FeeAggregator::new(0);
        // 1 coll at price 100 out of a 1000 supply: 10% redeemed, half of it added
        let quote = fees.quote_redemption_fee(ONE, 100 * ONE, 1_000 * ONE, 0, &params()).unwrap();
        assert_eq!(quote.new_base_rate, ONE / 20);
        assert_eq!(quote.rate, ONE / 20 + params().redemption_fee_floor);
        assert_eq!(quote.fee, ONE * 55 / 1_000);
    }

    #[test]
    fn redemption_fee_cannot_consume_everything() {
        let fees = FeeAggregator { base_rate: ONE, last_fee_operation_time: 0 };
        let err = fees.quote_redemption_fee(ONE, 100 * ONE, 1_000 * ONE, 0, &params()).unwrap_err();
        assert_eq!(err, LedgerError::FeeExceedsCollateral);
    }

    #[test]
    fn max_fee_guards() {
        let p = params();
        assert_eq!(validate_max_fee(0, false, &p), Err(LedgerError::InvalidMaxFee));
        assert_eq!(validate_max_fee(0, true, &p), Ok(()));
        assert_eq!(validate_max_fee(ONE + 1, true, &p), Err(LedgerError::InvalidMaxFee));
        assert_eq!(validate_max_fee(p.borrowing_fee_floor, false, &p), Ok(()));

        assert_eq!(require_fee_accepted(5 * ONE, 1_000 * ONE, ONE / 200), Ok(()));
        assert_eq!(
            require_fee_accepted(5 * ONE + ONE / 1_000, 1_000 * ONE, ONE / 200),
            Err(LedgerError::FeeExceedsMaximum)
        );
    }
}
