//! Event Usage Data

use storefront::ids::{EventUuid, OrderUuid, ProductUuid, UserUuid};

/// New Usage Data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUsage {
    pub event_uuid: EventUuid,
    pub user_uuid: UserUuid,
    pub order_uuid: Option<OrderUuid>,
    pub product_uuid: Option<ProductUuid>,
    pub quantity: u64,
    pub discount_applied: u64,
}
