//! Events Data

use jiff::Timestamp;
use rust_decimal::Decimal;
use storefront::{
    events::{EventProduct, PromotionKind, RuleDiscount, RuleKind},
    ids::EventUuid,
};

/// New Event Data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub uuid: EventUuid,
    pub name: String,
    pub starts_at: Timestamp,
    pub ends_at: Timestamp,
    pub priority: i32,
    pub kind: PromotionKind,
    pub discount_value: Decimal,
    pub max_discount: Option<u64>,
    pub min_order_value: Option<u64>,
    pub max_usage_count: u64,
    pub max_usage_per_user: u64,
    /// Empty means every product.
    pub products: Vec<EventProduct>,
    pub rules: Vec<NewEventRule>,
}

/// New Event Rule Data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEventRule {
    pub kind: RuleKind,
    pub target: String,
    pub min_order_value: Option<u64>,
    pub discount: Option<RuleDiscount>,
    pub priority: i32,
}

/// Outcome of one lifecycle pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleReport {
    pub activated: usize,
    pub expired: usize,
    pub failed: usize,
}

impl LifecycleReport {
    #[must_use]
    pub fn transitioned(&self) -> usize {
        self.activated + self.expired
    }
}
