//! Fixed-point helpers shared by the calculators.
//!
//! Every monetary amount, rate and day count in the crate is a
//! [`Decimal`].  Amounts are rounded to cents at each sub-total rather
//! than only at the end, so intermediate figures line up with what a
//! payslip shows.  Midpoints round towards positive infinity, which is
//! the same behaviour as the ordinary `round` on a float for both
//! positive and negative values.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Largest single amount the calculators accept (10^15).  Inputs above
/// it are capped, which keeps every sum and product of capped amounts
/// and unit-interval rates well inside `Decimal`'s range.
pub const MAX_AMOUNT: Decimal = dec!(1000000000000000);

/// Round to `dp` decimal places with midpoints going up.
fn round_half_up(value: Decimal, dp: u32) -> Decimal {
    let strategy = if value.is_sign_negative() {
        RoundingStrategy::MidpointTowardZero
    } else {
        RoundingStrategy::MidpointAwayFromZero
    };
    value.round_dp_with_strategy(dp, strategy)
}

/// Round an amount to cents.
pub fn round2(value: Decimal) -> Decimal {
    round_half_up(value, 2)
}

/// Round a ratio to six decimal places (used for proration factors).
pub fn round6(value: Decimal) -> Decimal {
    round_half_up(value, 6)
}

/// Clamp a value to be non-negative.
pub fn non_negative(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO)
}

/// Clamp an input amount into `[0, MAX_AMOUNT]`.
pub fn capped_amount(value: Decimal) -> Decimal {
    clamp(value, Decimal::ZERO, MAX_AMOUNT)
}

/// [`capped_amount`] for an optional input, treating a missing value as
/// zero.
pub fn capped_or_zero(value: Option<Decimal>) -> Decimal {
    value.map(capped_amount).unwrap_or(Decimal::ZERO)
}

/// Whether a rate lies in `[0, 1]`.
pub fn is_unit_rate(rate: Decimal) -> bool {
    rate >= Decimal::ZERO && rate <= Decimal::ONE
}

/// Clamp a value into `[min, max]`.
pub fn clamp(value: Decimal, min: Decimal, max: Decimal) -> Decimal {
    value.max(min).min(max)
}
