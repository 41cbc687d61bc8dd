//! Product Records

use jiff::Timestamp;
use storefront::{
    ids::{CategoryUuid, ProductUuid},
    pricing::ProductPricing,
    rules::CartLine,
    stock::StockLevel,
};

/// Product Record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    pub uuid: ProductUuid,
    pub market_price: u64,
    pub discount_price: Option<u64>,
    pub stock: StockLevel,
    pub category_uuid: Option<CategoryUuid>,
    pub sub_category_uuid: Option<CategoryUuid>,
    pub sub_sub_category_uuid: Option<CategoryUuid>,
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl ProductRecord {
    /// The pricing-relevant view of this product.
    #[must_use]
    pub fn pricing(&self) -> ProductPricing {
        ProductPricing {
            uuid: self.uuid,
            market_price: self.market_price,
            discount_price: self.discount_price,
        }
    }

    /// A rule-evaluation line for `quantity` units at `unit_price`.
    #[must_use]
    pub fn cart_line(&self, quantity: u64, unit_price: u64) -> CartLine {
        CartLine {
            product_uuid: self.uuid,
            category_uuid: self.category_uuid,
            sub_category_uuid: self.sub_category_uuid,
            sub_sub_category_uuid: self.sub_sub_category_uuid,
            quantity,
            unit_price,
        }
    }
}
