//! Cart Data

use storefront::{ids::ProductUuid, pricing::CartPrice, rules::Address};

use crate::domain::carts::records::CartItemRecord;

/// Add To Cart Data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCartItem {
    pub product_uuid: ProductUuid,
    pub quantity: u64,
    /// Line total the caller displayed; checked against the server price.
    pub expected_total: Option<u64>,
}

/// Checkout Data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub payment_method: String,
    pub addresses: Vec<Address>,
    /// Order total the caller displayed; checked against the server price.
    pub expected_total: Option<u64>,
}

/// A cart item together with the price it was frozen at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedCartItem {
    pub item: CartItemRecord,
    pub price: CartPrice,
}
