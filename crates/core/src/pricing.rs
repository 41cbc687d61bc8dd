//! Price resolution
//!
//! Combines a product's own pricing with the selected event and the user's
//! usage so far. Usage is passed in as `Option<u64>`: `None` means the user is
//! unknown, in which case an event is shown but never applied.

use serde::{Deserialize, Serialize};

use crate::{
    discounts::DiscountError,
    events::{PromotionalEvent, RuleDiscount},
    ids::{EventUuid, ProductUuid},
};

/// The pricing-relevant part of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPricing {
    /// Product UUID
    pub uuid: ProductUuid,
    /// List price.
    pub market_price: u64,
    /// Product's own sale price.
    pub discount_price: Option<u64>,
}

impl ProductPricing {
    /// The product's discount price when set and lower than market, else market.
    #[must_use]
    pub fn base_price(&self) -> u64 {
        match self.discount_price {
            Some(discount) if discount < self.market_price => discount,
            _ => self.market_price,
        }
    }
}

/// Effective unit price for a product and (optional) user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceInfo {
    /// Product UUID
    pub product_uuid: ProductUuid,
    /// Price before any event.
    pub base_price: u64,
    /// Price actually charged per unit.
    pub effective_price: u64,
    /// The selected event's per-unit discount, applied only when `can_use_event`.
    pub event_discount_amount: u64,
    /// An event applies to this product right now.
    pub has_active_event: bool,
    /// The event's discount is applied.
    pub can_use_event: bool,
    /// The user has exhausted their allowance for this event and product.
    pub limit_reached: bool,
    /// Units the user already bought under the event.
    pub user_usage_count: u64,
    /// Units the user may still buy under the event.
    pub remaining_usage: u64,
    /// The selected event.
    pub event_uuid: Option<EventUuid>,
    /// The applied event grants free shipping.
    pub free_shipping: bool,
}

impl PriceInfo {
    /// Pricing with no event involvement.
    #[must_use]
    pub fn regular(product: &ProductPricing) -> Self {
        let base_price = product.base_price();

        Self {
            product_uuid: product.uuid,
            base_price,
            effective_price: base_price,
            event_discount_amount: 0,
            has_active_event: false,
            can_use_event: false,
            limit_reached: false,
            user_usage_count: 0,
            remaining_usage: 0,
            event_uuid: None,
            free_shipping: false,
        }
    }
}

/// Price for a requested quantity, split between event and regular units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartPrice {
    /// Unit-level pricing.
    pub info: PriceInfo,
    /// Units requested.
    pub quantity: u64,
    /// Units billed at `event_unit_price`.
    pub event_eligible_quantity: u64,
    /// Units billed at the base price.
    pub regular_price_quantity: u64,
    /// Unit price under the event.
    pub event_unit_price: u64,
    /// Line total.
    pub total_price: u64,
    /// Line discount.
    pub total_discount: u64,
}

impl CartPrice {
    /// The whole quantity at the regular price.
    #[must_use]
    pub fn regular(product: &ProductPricing, quantity: u64) -> Self {
        Self::from_info(PriceInfo::regular(product), quantity)
    }

    fn from_info(info: PriceInfo, quantity: u64) -> Self {
        let event_eligible_quantity = if info.can_use_event {
            quantity.min(info.remaining_usage)
        } else {
            0
        };

        let regular_price_quantity = quantity - event_eligible_quantity;

        let event_unit_price = if info.can_use_event {
            info.effective_price
        } else {
            info.base_price
        };

        let total_price = event_eligible_quantity
            .saturating_mul(event_unit_price)
            .saturating_add(regular_price_quantity.saturating_mul(info.base_price));

        let total_discount =
            event_eligible_quantity.saturating_mul(info.base_price - event_unit_price);

        Self {
            info,
            quantity,
            event_eligible_quantity,
            regular_price_quantity,
            event_unit_price,
            total_price,
            total_discount,
        }
    }
}

/// Split `quantity` into `(event, regular)` units given the per-user ceiling and usage so far.
#[must_use]
pub fn split_quantity(quantity: u64, max_usage_per_user: u64, usage: u64) -> (u64, u64) {
    let eligible = quantity.min(max_usage_per_user.saturating_sub(usage));

    (eligible, quantity - eligible)
}

/// Effective unit price of `product` under `event`.
///
/// `rule` is the override of the event's winning rule, if the cart passed
/// the event's rules with one.
///
/// # Errors
///
/// Returns a [`DiscountError`] when the event's discount cannot be computed.
/// Callers are expected to fall back to [`PriceInfo::regular`].
pub fn resolve_price(
    product: &ProductPricing,
    event: Option<&PromotionalEvent>,
    rule: Option<&RuleDiscount>,
    usage: Option<u64>,
) -> Result<PriceInfo, DiscountError> {
    let mut info = PriceInfo::regular(product);

    let Some(event) = event else {
        return Ok(info);
    };

    let discount = event.unit_discount(product.uuid, info.base_price, rule)?;

    info.has_active_event = true;
    info.event_uuid = Some(event.uuid);
    info.event_discount_amount = discount.amount;

    match usage {
        None => {
            info.remaining_usage = event.max_usage_per_user;
        }
        Some(count) => {
            info.user_usage_count = count;
            info.remaining_usage = event.max_usage_per_user.saturating_sub(count);

            if count < event.max_usage_per_user {
                info.can_use_event = true;
                info.effective_price = info.base_price.saturating_sub(discount.amount);
                info.free_shipping = discount.free_shipping;
            } else {
                info.limit_reached = true;
            }
        }
    }

    Ok(info)
}

/// Price `quantity` units of `product` under `event`, splitting at the user's allowance.
///
/// # Errors
///
/// Returns a [`DiscountError`] when the event's discount cannot be computed.
pub fn resolve_cart_price(
    product: &ProductPricing,
    event: Option<&PromotionalEvent>,
    rule: Option<&RuleDiscount>,
    usage: Option<u64>,
    quantity: u64,
) -> Result<CartPrice, DiscountError> {
    resolve_price(product, event, rule, usage).map(|info| CartPrice::from_info(info, quantity))
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use rust_decimal::Decimal;

    use crate::events::{PromotionKind, test_support::event};

    use super::*;

    fn product(market: u64, discount: Option<u64>) -> ProductPricing {
        ProductPricing {
            uuid: ProductUuid::new(),
            market_price: market,
            discount_price: discount,
        }
    }

    #[test]
    fn base_price_prefers_lower_discount_price() {
        assert_eq!(product(1_000, Some(800)).base_price(), 800, "lower sale price");
        assert_eq!(product(1_000, Some(1_200)).base_price(), 1_000, "higher sale price ignored");
        assert_eq!(product(1_000, None).base_price(), 1_000, "no sale price");
    }

    #[test]
    fn split_quantity_respects_allowance() {
        assert_eq!(split_quantity(5, 2, 1), (1, 4), "one unit left");
        assert_eq!(split_quantity(2, 5, 5), (0, 2), "allowance exhausted");
        assert_eq!(split_quantity(3, 5, 0), (3, 0), "fully covered");
        assert_eq!(split_quantity(1, 2, 9), (0, 1), "over-used never underflows");
    }

    #[test]
    fn known_user_within_allowance_gets_discount() -> TestResult {
        let p = product(1_000, None);
        let e = event(PromotionKind::Percentage, 20);

        let info = resolve_price(&p, Some(&e), None, Some(0))?;

        assert!(info.can_use_event, "within allowance");
        assert_eq!(info.effective_price, 800, "20% off");
        assert_eq!(info.remaining_usage, 5, "allowance untouched");

        Ok(())
    }

    #[test]
    fn anonymous_user_sees_but_never_gets_discount() -> TestResult {
        let p = product(1_000, None);
        let e = event(PromotionKind::Percentage, 20);

        let info = resolve_price(&p, Some(&e), None, None)?;

        assert!(info.has_active_event, "event is shown");
        assert!(!info.can_use_event, "never applied without usage check");
        assert_eq!(info.effective_price, 1_000, "base price charged");
        assert_eq!(info.event_discount_amount, 200, "potential discount shown");

        Ok(())
    }

    #[test]
    fn split_cart_price_mixes_rates() -> TestResult {
        let p = product(1_000, None);
        let mut e = event(PromotionKind::Percentage, 20);
        e.max_usage_per_user = 2;

        let price = resolve_cart_price(&p, Some(&e), None, Some(1), 5)?;

        assert_eq!(price.event_eligible_quantity, 1, "one event unit");
        assert_eq!(price.regular_price_quantity, 4, "four regular units");
        assert_eq!(price.total_price, 800 + 4 * 1_000, "mixed total");
        assert_eq!(price.total_discount, 200, "one discounted unit");

        Ok(())
    }

    #[test]
    fn first_purchase_under_twenty_percent_event() -> TestResult {
        let p = product(1_000, None);
        let e = event(PromotionKind::Percentage, 20);

        let price = resolve_cart_price(&p, Some(&e), None, Some(0), 3)?;

        assert_eq!(price.event_eligible_quantity, 3, "all units discounted");
        assert_eq!(price.total_price, 2_400, "base x 0.8 x 3");

        Ok(())
    }

    #[test]
    fn exhausted_allowance_bills_everything_at_base() -> TestResult {
        let p = product(1_000, None);
        let e = event(PromotionKind::Percentage, 20);

        let price = resolve_cart_price(&p, Some(&e), None, Some(5), 2)?;

        assert!(price.info.limit_reached, "limit reached is reported");
        assert!(price.info.has_active_event, "event is still shown");
        assert_eq!(price.event_eligible_quantity, 0, "no event units");
        assert_eq!(price.regular_price_quantity, 2, "all regular");
        assert_eq!(price.total_price, 2_000, "base price throughout");

        Ok(())
    }

    #[test]
    fn discount_applies_on_top_of_sale_price() -> TestResult {
        let p = product(1_000, Some(500));
        let e = event(PromotionKind::FixedAmount, 700);

        let info = resolve_price(&p, Some(&e), None, Some(0))?;

        assert_eq!(info.base_price, 500, "sale price is the base");
        assert_eq!(info.effective_price, 0, "floored at zero");

        Ok(())
    }

    #[test]
    fn rule_override_prices_event_units() -> TestResult {
        let p = product(1_000, None);
        let e = event(PromotionKind::Percentage, 10);

        let half = RuleDiscount {
            kind: PromotionKind::Percentage,
            value: Decimal::from(50),
            max_discount: None,
        };

        let price = resolve_cart_price(&p, Some(&e), Some(&half), Some(0), 2)?;

        assert_eq!(price.event_unit_price, 500, "override replaces the event's 10%");
        assert_eq!(price.total_price, 1_000, "both units at the override price");
        assert_eq!(price.total_discount, 1_000, "two units at 500 off");

        Ok(())
    }

    #[test]
    fn no_event_is_regular_pricing() -> TestResult {
        let p = product(1_000, None);

        let price = resolve_cart_price(&p, None, None, Some(0), 2)?;

        assert_eq!(price, CartPrice::regular(&p, 2), "regular pricing");
        assert_eq!(price.total_price, 2_000, "2 x base");

        Ok(())
    }
}
