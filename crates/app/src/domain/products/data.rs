//! Products Data

use storefront::ids::{CategoryUuid, ProductUuid};

/// New Product Data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub uuid: ProductUuid,
    pub market_price: u64,
    pub discount_price: Option<u64>,
    pub stock_quantity: u64,
    pub category_uuid: Option<CategoryUuid>,
    pub sub_category_uuid: Option<CategoryUuid>,
    pub sub_sub_category_uuid: Option<CategoryUuid>,
}

/// Product Pricing Update Data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingUpdate {
    pub market_price: u64,
    pub discount_price: Option<u64>,
}
