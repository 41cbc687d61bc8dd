//! Products service.

use std::sync::Arc;

use async_trait::async_trait;
use mockall::automock;
use storefront::{clock::Clock, ids::ProductUuid, stock::StockLevel};
use tracing::info;

use crate::{
    cache::TwoTierCache,
    database::Db,
    domain::products::{
        data::{NewProduct, PricingUpdate},
        errors::ProductsServiceError,
        records::ProductRecord,
    },
    retry::retry_on_conflict,
    settings::EngineSettings,
};

#[derive(Debug, Clone)]
pub struct DbProductsService {
    db: Db,
    cache: TwoTierCache,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl DbProductsService {
    #[must_use]
    pub fn new(
        db: Db,
        cache: TwoTierCache,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            db,
            cache,
            clock,
            settings,
        }
    }

    async fn try_update_pricing(
        &self,
        product: ProductUuid,
        update: PricingUpdate,
    ) -> Result<ProductRecord, ProductsServiceError> {
        let mut uow = self.db.begin().await?;

        let mut record = uow.get_product(product).await?;

        record.market_price = update.market_price;
        record.discount_price = update.discount_price;
        record.updated_at = self.clock.now();

        let updated = uow.update_product(&record).await?;

        uow.commit().await?;

        Ok(updated)
    }
}

#[async_trait]
impl ProductsService for DbProductsService {
    #[tracing::instrument(
        name = "products.service.create_product",
        skip(self, product),
        fields(product_uuid = %product.uuid, stock_quantity = product.stock_quantity),
        err
    )]
    async fn create_product(
        &self,
        product: NewProduct,
    ) -> Result<ProductRecord, ProductsServiceError> {
        let now = self.clock.now();

        let stock = StockLevel::new(product.stock_quantity, 0)
            .map_err(|error| ProductsServiceError::Validation(error.to_string()))?;

        let record = ProductRecord {
            uuid: product.uuid,
            market_price: product.market_price,
            discount_price: product.discount_price,
            stock,
            category_uuid: product.category_uuid,
            sub_category_uuid: product.sub_category_uuid,
            sub_sub_category_uuid: product.sub_sub_category_uuid,
            version: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let mut uow = self.db.begin().await?;

        uow.insert_product(&record).await?;
        uow.commit().await?;

        info!(product_uuid = %record.uuid, "created product");

        Ok(record)
    }

    #[tracing::instrument(
        name = "products.service.get_product",
        skip(self),
        fields(product_uuid = %product),
        err
    )]
    async fn get_product(&self, product: ProductUuid) -> Result<ProductRecord, ProductsServiceError> {
        let mut uow = self.db.begin().await?;

        let record = uow.get_product(product).await?;

        uow.commit().await?;

        Ok(record)
    }

    #[tracing::instrument(
        name = "products.service.update_pricing",
        skip(self, update),
        fields(product_uuid = %product, market_price = update.market_price),
        err
    )]
    async fn update_pricing(
        &self,
        product: ProductUuid,
        update: PricingUpdate,
    ) -> Result<ProductRecord, ProductsServiceError> {
        let updated = retry_on_conflict(&self.settings.retry, || {
            self.try_update_pricing(product, update)
        })
        .await?;

        self.cache.invalidate_product(product).await;

        info!(product_uuid = %product, version = updated.version, "updated product pricing");

        Ok(updated)
    }
}

#[automock]
#[async_trait]
pub trait ProductsService: Send + Sync {
    /// Create a product with no reserved stock.
    async fn create_product(
        &self,
        product: NewProduct,
    ) -> Result<ProductRecord, ProductsServiceError>;

    /// Retrieve a single product.
    async fn get_product(&self, product: ProductUuid) -> Result<ProductRecord, ProductsServiceError>;

    /// Change market and discount prices, dropping cached prices for the product.
    async fn update_pricing(
        &self,
        product: ProductUuid,
        update: PricingUpdate,
    ) -> Result<ProductRecord, ProductsServiceError>;
}
