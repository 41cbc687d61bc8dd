//! Cart Item Records

use jiff::Timestamp;
use storefront::ids::{CartItemUuid, EventUuid, ProductUuid, ReservationToken, UserUuid};

/// A user's pending selection, backed by reserved stock while live.
///
/// Prices are frozen when the item is added or its quantity changes:
/// `event_quantity` units at `event_unit_price`, the rest at `unit_price`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartItemRecord {
    pub uuid: CartItemUuid,
    pub user_uuid: UserUuid,
    pub product_uuid: ProductUuid,
    pub quantity: u64,
    pub unit_price: u64,
    pub event_unit_price: u64,
    pub event_quantity: u64,
    pub event_discount_amount: u64,
    pub applied_event_uuid: Option<EventUuid>,
    pub reservation_token: ReservationToken,
    pub is_stock_reserved: bool,
    pub expires_at: Timestamp,
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl CartItemRecord {
    /// Not deleted and not yet expired.
    #[must_use]
    pub fn is_live(&self, now: Timestamp) -> bool {
        self.deleted_at.is_none() && self.expires_at > now
    }

    /// Frozen line total.
    #[must_use]
    pub fn line_total(&self) -> u64 {
        let regular = self.quantity.saturating_sub(self.event_quantity);

        self.event_quantity
            .saturating_mul(self.event_unit_price)
            .saturating_add(regular.saturating_mul(self.unit_price))
    }

    /// Line total before any event discount.
    #[must_use]
    pub fn regular_total(&self) -> u64 {
        self.quantity.saturating_mul(self.unit_price)
    }
}
