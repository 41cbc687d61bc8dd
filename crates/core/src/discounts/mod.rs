//! Discount utilities
//!
//! Turns a promotion kind and value into a per-unit discount amount in minor
//! units. Shared by event-level pricing and rule-level overrides.

use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use thiserror::Error;

use crate::events::PromotionKind;

/// Errors specific to discount calculations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscountError {
    /// Discount values must not be negative.
    #[error("discount value must not be negative, got {0}")]
    NegativeValue(Decimal),

    /// Percentage calculation could not be safely converted.
    #[error("percentage conversion overflowed or was not finite")]
    PercentConversion,
}

/// The outcome of applying a discount to one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Discount {
    /// Minor units taken off the base price.
    pub amount: u64,

    /// Order ships for free; consumed by the shipping collaborator.
    pub free_shipping: bool,
}

impl Discount {
    /// No discount at all.
    pub const NONE: Self = Self {
        amount: 0,
        free_shipping: false,
    };

    /// True for a nonzero amount or a free-shipping flag.
    #[must_use]
    pub const fn has_discount(&self) -> bool {
        self.amount > 0 || self.free_shipping
    }

    /// Limit the amount to `cap`, if any.
    #[must_use]
    pub fn capped(self, cap: Option<u64>) -> Self {
        Self {
            amount: cap.map_or(self.amount, |cap| self.amount.min(cap)),
            ..self
        }
    }
}

/// Calculate the discount amount in minor units for `percent` percent of `minor`.
///
/// # Errors
///
/// Returns [`DiscountError::PercentConversion`] if the calculation overflows.
pub fn percent_of_minor(percent: Decimal, minor: u64) -> Result<u64, DiscountError> {
    Decimal::from(minor)
        .checked_mul(percent)
        .and_then(|scaled| scaled.checked_div(Decimal::ONE_HUNDRED))
        .ok_or(DiscountError::PercentConversion)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u64()
        .ok_or(DiscountError::PercentConversion)
}

/// Discount for one unit priced at `base`.
///
/// The amount never exceeds `base` and is limited by `cap` when present.
///
/// # Errors
///
/// - [`DiscountError::NegativeValue`]: `value` is below zero.
/// - [`DiscountError::PercentConversion`]: the arithmetic overflowed.
pub fn calculate_discount(
    kind: PromotionKind,
    value: Decimal,
    base: u64,
    cap: Option<u64>,
) -> Result<Discount, DiscountError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(DiscountError::NegativeValue(value));
    }

    let discount = match kind {
        PromotionKind::Percentage | PromotionKind::Bundle => Discount {
            amount: percent_of_minor(value, base)?,
            free_shipping: false,
        },
        PromotionKind::FixedAmount => {
            let amount = value
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_u64()
                .ok_or(DiscountError::PercentConversion)?;

            Discount {
                amount,
                free_shipping: false,
            }
        }
        PromotionKind::BuyOneGetOne => Discount {
            amount: percent_of_minor(Decimal::from(50), base)?,
            free_shipping: false,
        },
        PromotionKind::FreeShipping => Discount {
            amount: 0,
            free_shipping: true,
        },
    };

    let discount = discount.capped(cap);

    Ok(Discount {
        amount: discount.amount.min(base),
        ..discount
    })
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;

    #[test]
    fn percent_of_minor_calculates_correctly() -> TestResult {
        assert_eq!(percent_of_minor(Decimal::from(25), 200)?, 50, "25% of 200");

        Ok(())
    }

    #[test]
    fn percent_of_minor_rounds_half_away_from_zero() -> TestResult {
        assert_eq!(percent_of_minor(Decimal::from(50), 3)?, 2, "1.5 rounds up");
        assert_eq!(percent_of_minor(Decimal::from(10), 14)?, 1, "1.4 rounds down");

        Ok(())
    }

    #[test]
    fn percent_of_minor_overflow_returns_error() {
        let result = percent_of_minor(Decimal::MAX, u64::MAX);

        assert!(
            matches!(result, Err(DiscountError::PercentConversion)),
            "expected overflow, got {result:?}"
        );
    }

    #[test]
    fn percentage_and_bundle_agree() -> TestResult {
        let pct = calculate_discount(PromotionKind::Percentage, Decimal::from(20), 1_000, None)?;
        let bundle = calculate_discount(PromotionKind::Bundle, Decimal::from(20), 1_000, None)?;

        assert_eq!(pct.amount, 200, "20% of 1000");
        assert_eq!(pct, bundle, "bundle is treated as a percentage");

        Ok(())
    }

    #[test]
    fn fixed_amount_never_exceeds_base() -> TestResult {
        let small = calculate_discount(PromotionKind::FixedAmount, Decimal::from(300), 1_000, None)?;
        let large = calculate_discount(PromotionKind::FixedAmount, Decimal::from(5_000), 1_000, None)?;

        assert_eq!(small.amount, 300, "fixed discount applies as-is");
        assert_eq!(large.amount, 1_000, "fixed discount clamps to base");

        Ok(())
    }

    #[test]
    fn buy_one_get_one_halves_the_unit_price() -> TestResult {
        let discount = calculate_discount(PromotionKind::BuyOneGetOne, Decimal::ZERO, 999, None)?;

        assert_eq!(discount.amount, 500, "half of 999, rounded");

        Ok(())
    }

    #[test]
    fn free_shipping_sets_flag_only() -> TestResult {
        let discount = calculate_discount(PromotionKind::FreeShipping, Decimal::ZERO, 1_000, None)?;

        assert_eq!(discount.amount, 0, "no price reduction");
        assert!(discount.free_shipping, "flag should be set");
        assert!(discount.has_discount(), "free shipping counts as a discount");

        Ok(())
    }

    #[test]
    fn cap_limits_amount() -> TestResult {
        let discount =
            calculate_discount(PromotionKind::Percentage, Decimal::from(50), 1_000, Some(120))?;

        assert_eq!(discount.amount, 120, "capped at 120");

        Ok(())
    }

    #[test]
    fn negative_values_are_rejected() {
        let result = calculate_discount(PromotionKind::Percentage, Decimal::from(-5), 1_000, None);

        assert_eq!(
            result,
            Err(DiscountError::NegativeValue(Decimal::from(-5))),
            "negative discount"
        );
    }

    #[test]
    fn zero_discount_is_not_a_discount() {
        assert!(!Discount::NONE.has_discount(), "none means none");
    }
}
