//! Promotional Events

use std::{fmt, str::FromStr};

use jiff::Timestamp;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::{
    discounts::{Discount, DiscountError, calculate_discount},
    ids::{EventUuid, ProductUuid, RuleUuid},
};

/// Errors raised by event state changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// Status changes only move forward.
    #[error("event cannot move from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: EventStatus,
        /// Requested status.
        to: EventStatus,
    },

    /// The global usage ceiling would be exceeded.
    #[error("event usage limit reached: requested {requested}, remaining {remaining}")]
    UsageLimitReached {
        /// Units requested.
        requested: u64,
        /// Units still available.
        remaining: u64,
    },
}

/// A stored enum discriminant could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {what}: {value}")]
pub struct ParseKindError {
    what: &'static str,
    value: String,
}

/// How an event (or a rule override) discounts a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromotionKind {
    /// `value` percent off.
    Percentage,
    /// `value` minor units off, never below zero.
    FixedAmount,
    /// Modelled as 50% off the unit price.
    BuyOneGetOne,
    /// No price change; flags the order for free shipping.
    FreeShipping,
    /// Treated as a percentage discount.
    Bundle,
}

impl PromotionKind {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::FixedAmount => "fixed_amount",
            Self::BuyOneGetOne => "buy_one_get_one",
            Self::FreeShipping => "free_shipping",
            Self::Bundle => "bundle",
        }
    }
}

impl FromStr for PromotionKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentage" => Ok(Self::Percentage),
            "fixed_amount" => Ok(Self::FixedAmount),
            "buy_one_get_one" => Ok(Self::BuyOneGetOne),
            "free_shipping" => Ok(Self::FreeShipping),
            "bundle" => Ok(Self::Bundle),
            other => Err(ParseKindError {
                what: "promotion kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Event lifecycle. Moves Scheduled → Active → Expired, never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventStatus {
    /// Start time not reached yet.
    Scheduled,
    /// Running.
    Active,
    /// Finished.
    Expired,
}

impl EventStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Expired => "expired",
        }
    }

    /// Status for a freshly created event.
    #[must_use]
    pub fn initial(starts_at: Timestamp, ends_at: Timestamp, now: Timestamp) -> Self {
        if ends_at < now {
            Self::Expired
        } else if starts_at > now {
            Self::Scheduled
        } else {
            Self::Active
        }
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Scheduled => 0,
            Self::Active => 1,
            Self::Expired => 2,
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            other => Err(ParseKindError {
                what: "event status",
                value: other.to_string(),
            }),
        }
    }
}

/// What an [`EventRule`] restricts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    /// Comma-separated category ids.
    Category,
    /// Comma-separated sub-category ids.
    SubCategory,
    /// Comma-separated sub-sub-category ids.
    SubSubCategory,
    /// Comma-separated product ids.
    Product,
    /// `"min-max"` cart total range, inclusive.
    PriceRange,
    /// Comma-separated city names.
    Geography,
    /// Comma-separated payment method names.
    PaymentMethod,
    /// No restriction.
    All,
}

impl RuleKind {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::SubCategory => "sub_category",
            Self::SubSubCategory => "sub_sub_category",
            Self::Product => "product",
            Self::PriceRange => "price_range",
            Self::Geography => "geography",
            Self::PaymentMethod => "payment_method",
            Self::All => "all",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "category" => Ok(Self::Category),
            "sub_category" => Ok(Self::SubCategory),
            "sub_sub_category" => Ok(Self::SubSubCategory),
            "product" => Ok(Self::Product),
            "price_range" => Ok(Self::PriceRange),
            "geography" => Ok(Self::Geography),
            "payment_method" => Ok(Self::PaymentMethod),
            "all" => Ok(Self::All),
            other => Err(ParseKindError {
                what: "rule kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Discount carried by a rule, replacing the event's own discount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDiscount {
    /// Discount kind.
    pub kind: PromotionKind,
    /// Percentage or minor units, depending on `kind`.
    pub value: Decimal,
    /// Cap applied before the event's own cap.
    pub max_discount: Option<u64>,
}

/// Additional eligibility predicate attached to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRule {
    /// Rule UUID
    pub uuid: RuleUuid,
    /// What the rule restricts.
    pub kind: RuleKind,
    /// Serialized targets; format depends on `kind`.
    pub target: String,
    /// Cart total the rule requires regardless of kind.
    pub min_order_value: Option<u64>,
    /// Optional discount override.
    pub discount: Option<RuleDiscount>,
    /// Lower values are evaluated first.
    pub priority: i32,
    /// Soft-delete marker.
    pub deleted_at: Option<Timestamp>,
}

/// Product targeted by an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventProduct {
    /// Targeted product.
    pub product_uuid: ProductUuid,
    /// Replaces the event's discount value for this product.
    pub discount_override: Option<Decimal>,
}

/// Time-boxed discount campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionalEvent {
    /// Event UUID
    pub uuid: EventUuid,
    /// Display name.
    pub name: String,
    /// Start of the window, inclusive.
    pub starts_at: Timestamp,
    /// End of the window, inclusive.
    pub ends_at: Timestamp,
    /// Higher values win during selection.
    pub priority: i32,
    /// Discount kind.
    pub kind: PromotionKind,
    /// Percentage or minor units, depending on `kind`.
    pub discount_value: Decimal,
    /// Cap on the discount amount.
    pub max_discount: Option<u64>,
    /// Cart total required for eligibility.
    pub min_order_value: Option<u64>,
    /// Global usage ceiling.
    pub max_usage_count: u64,
    /// Units consumed so far.
    pub current_usage_count: u64,
    /// Per-user (and per-product) usage ceiling.
    pub max_usage_per_user: u64,
    /// Lifecycle status.
    pub status: EventStatus,
    /// Manual on/off switch.
    pub is_active: bool,
    /// Targeted products; empty targets every product.
    pub products: Vec<EventProduct>,
    /// Eligibility rules.
    pub rules: Vec<EventRule>,
    /// Optimistic concurrency token.
    pub version: i64,
    /// Creation instant, used as the last selection tie-break.
    pub created_at: Timestamp,
    /// Soft-delete marker.
    pub deleted_at: Option<Timestamp>,
}

impl PromotionalEvent {
    /// Switched on and not deleted.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.is_active && self.deleted_at.is_none()
    }

    /// Eligible for selection at `now`.
    #[must_use]
    pub fn is_running(&self, now: Timestamp) -> bool {
        self.is_live()
            && self.status == EventStatus::Active
            && self.starts_at <= now
            && now <= self.ends_at
            && self.current_usage_count < self.max_usage_count
    }

    /// An event with no product targets applies to every product.
    #[must_use]
    pub fn applies_to(&self, product: ProductUuid) -> bool {
        self.products.is_empty()
            || self
                .products
                .iter()
                .any(|target| target.product_uuid == product)
    }

    /// Discount value for a product, honouring per-product overrides.
    #[must_use]
    pub fn discount_value_for(&self, product: ProductUuid) -> Decimal {
        self.products
            .iter()
            .find(|target| target.product_uuid == product)
            .and_then(|target| target.discount_override)
            .unwrap_or(self.discount_value)
    }

    /// Per-unit discount for `product` at `base`.
    ///
    /// A rule override replaces the event's kind and value and is capped by
    /// its own cap before the event's cap.
    ///
    /// # Errors
    ///
    /// Returns a [`DiscountError`] when the discount cannot be computed.
    pub fn unit_discount(
        &self,
        product: ProductUuid,
        base: u64,
        rule: Option<&RuleDiscount>,
    ) -> Result<Discount, DiscountError> {
        let discount = match rule {
            Some(rule) => calculate_discount(rule.kind, rule.value, base, rule.max_discount)?,
            None => calculate_discount(self.kind, self.discount_value_for(product), base, None)?,
        };

        Ok(discount.capped(self.max_discount))
    }

    /// Units left under the global ceiling.
    #[must_use]
    pub const fn remaining_usage(&self) -> u64 {
        self.max_usage_count.saturating_sub(self.current_usage_count)
    }

    /// Non-deleted rules in evaluation order (ascending priority).
    #[must_use]
    pub fn ordered_rules(&self) -> Vec<&EventRule> {
        let mut rules: Vec<&EventRule> = self
            .rules
            .iter()
            .filter(|rule| rule.deleted_at.is_none())
            .collect();

        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.uuid.cmp(&b.uuid)));

        rules
    }

    /// The status this event should hold at `now`, if it differs from the current one.
    #[must_use]
    pub fn due_transition(&self, now: Timestamp) -> Option<EventStatus> {
        if self.deleted_at.is_some() {
            return None;
        }

        match self.status {
            EventStatus::Scheduled | EventStatus::Active if self.ends_at < now => {
                Some(EventStatus::Expired)
            }
            EventStatus::Scheduled if self.starts_at <= now => Some(EventStatus::Active),
            EventStatus::Scheduled | EventStatus::Active | EventStatus::Expired => None,
        }
    }

    /// Move to `to`. Moving to the current status is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::InvalidTransition`] for backward moves.
    pub fn transition(&mut self, to: EventStatus) -> Result<(), EventError> {
        if to.rank() < self.status.rank() {
            return Err(EventError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        self.status = to;

        Ok(())
    }

    /// Count `quantity` units against the global ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UsageLimitReached`] when the ceiling would be exceeded.
    pub fn consume_usage(&mut self, quantity: u64) -> Result<(), EventError> {
        let remaining = self.remaining_usage();

        if quantity > remaining {
            return Err(EventError::UsageLimitReached {
                requested: quantity,
                remaining,
            });
        }

        self.current_usage_count += quantity;

        Ok(())
    }

    /// Give back `quantity` units, floored at zero.
    pub fn release_usage(&mut self, quantity: u64) {
        self.current_usage_count = self.current_usage_count.saturating_sub(quantity);
    }
}
