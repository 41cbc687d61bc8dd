//! Order Records

use jiff::Timestamp;
use serde::Serialize;
use storefront::ids::{EventUuid, OrderItemUuid, OrderUuid, ProductUuid, UserUuid};

/// Order Record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRecord {
    pub uuid: OrderUuid,
    pub user_uuid: UserUuid,
    pub payment_method: String,
    pub subtotal: u64,
    pub discount_total: u64,
    pub total: u64,
    pub free_shipping: bool,
    pub items: Vec<OrderItemRecord>,
    pub created_at: Timestamp,
}

/// Order Item Record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItemRecord {
    pub uuid: OrderItemUuid,
    pub product_uuid: ProductUuid,
    pub quantity: u64,
    pub unit_price: u64,
    pub event_uuid: Option<EventUuid>,
    pub event_quantity: u64,
    pub discount_amount: u64,
    pub line_total: u64,
}
