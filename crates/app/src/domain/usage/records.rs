//! Event Usage Records

use jiff::Timestamp;
use storefront::ids::{EventUuid, OrderUuid, ProductUuid, UsageUuid, UserUuid};

/// A ledger entry: `user` bought `quantity` units under `event`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub uuid: UsageUuid,
    pub event_uuid: EventUuid,
    pub user_uuid: UserUuid,
    pub order_uuid: Option<OrderUuid>,
    pub product_uuid: Option<ProductUuid>,
    pub quantity: u64,
    pub discount_applied: u64,
    pub used_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl UsageRecord {
    /// Whether `other` records the same `(event, order, product)` consumption.
    #[must_use]
    pub fn same_application(&self, other: &Self) -> bool {
        self.order_uuid.is_some()
            && self.event_uuid == other.event_uuid
            && self.order_uuid == other.order_uuid
            && self.product_uuid == other.product_uuid
    }
}
