//! Stock Service
//!
//! Every transition reads the product, applies the change to its
//! [`StockLevel`] and writes it back under the product's version. Concurrent
//! writers to one product conflict instead of overwriting each other, and the
//! service retries the whole unit of work.

use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;
use mockall::automock;
use storefront::{
    clock::Clock,
    ids::{ProductUuid, ReservationToken},
    stock::{StockError, StockLevel},
};
use tracing::{Span, info};

use crate::{
    database::{Db, UnitOfWork},
    domain::{
        products::records::ProductRecord,
        stock::errors::StockServiceError,
    },
    retry::retry_on_conflict,
    settings::EngineSettings,
};

async fn apply<F>(
    uow: &mut dyn UnitOfWork,
    product: ProductUuid,
    now: Timestamp,
    change: F,
) -> Result<ProductRecord, StockServiceError>
where
    F: FnOnce(&mut StockLevel) -> Result<(), StockError> + Send,
{
    let mut record = uow.get_product(product).await?;

    change(&mut record.stock)?;

    record.updated_at = now;

    Ok(uow.update_product(&record).await?)
}

/// Claim `quantity` free units of `product`.
pub(crate) async fn reserve_in(
    uow: &mut dyn UnitOfWork,
    product: ProductUuid,
    quantity: u64,
    now: Timestamp,
) -> Result<ProductRecord, StockServiceError> {
    apply(uow, product, now, |stock| stock.reserve(quantity)).await
}

/// Move a reservation from `old` to `new` units in one write.
pub(crate) async fn adjust_in(
    uow: &mut dyn UnitOfWork,
    product: ProductUuid,
    old: u64,
    new: u64,
    now: Timestamp,
) -> Result<ProductRecord, StockServiceError> {
    apply(uow, product, now, |stock| stock.adjust(old, new)).await
}

/// Give back `quantity` reserved units.
pub(crate) async fn release_in(
    uow: &mut dyn UnitOfWork,
    product: ProductUuid,
    quantity: u64,
    now: Timestamp,
) -> Result<ProductRecord, StockServiceError> {
    apply(uow, product, now, |stock| {
        stock.release(quantity);
        Ok(())
    })
    .await
}

/// Turn `quantity` reserved units into sold ones.
pub(crate) async fn confirm_in(
    uow: &mut dyn UnitOfWork,
    product: ProductUuid,
    quantity: u64,
    now: Timestamp,
) -> Result<ProductRecord, StockServiceError> {
    apply(uow, product, now, |stock| stock.confirm(quantity)).await
}

#[derive(Debug, Clone)]
pub struct DbStockService {
    db: Db,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl DbStockService {
    #[must_use]
    pub fn new(db: Db, clock: Arc<dyn Clock>, settings: EngineSettings) -> Self {
        Self {
            db,
            clock,
            settings,
        }
    }

    async fn try_reserve(
        &self,
        product: ProductUuid,
        quantity: u64,
    ) -> Result<ProductRecord, StockServiceError> {
        let mut uow = self.db.begin().await?;

        let record = reserve_in(&mut *uow, product, quantity, self.clock.now()).await?;

        uow.commit().await?;

        Ok(record)
    }

    async fn try_adjust(
        &self,
        product: ProductUuid,
        old: u64,
        new: u64,
    ) -> Result<ProductRecord, StockServiceError> {
        let mut uow = self.db.begin().await?;

        let record = adjust_in(&mut *uow, product, old, new, self.clock.now()).await?;

        uow.commit().await?;

        Ok(record)
    }

    async fn try_release(
        &self,
        product: ProductUuid,
        quantity: u64,
    ) -> Result<ProductRecord, StockServiceError> {
        let mut uow = self.db.begin().await?;

        let record = release_in(&mut *uow, product, quantity, self.clock.now()).await?;

        uow.commit().await?;

        Ok(record)
    }

    async fn try_confirm(
        &self,
        product: ProductUuid,
        quantity: u64,
    ) -> Result<ProductRecord, StockServiceError> {
        let mut uow = self.db.begin().await?;

        let record = confirm_in(&mut *uow, product, quantity, self.clock.now()).await?;

        uow.commit().await?;

        Ok(record)
    }
}

#[async_trait]
impl StockService for DbStockService {
    #[tracing::instrument(
        name = "stock.service.reserve",
        skip(self),
        fields(
            product_uuid = %product,
            reservation_token = tracing::field::Empty,
            reserved_stock = tracing::field::Empty
        ),
        err
    )]
    async fn reserve(
        &self,
        product: ProductUuid,
        quantity: u64,
    ) -> Result<ReservationToken, StockServiceError> {
        let record =
            retry_on_conflict(&self.settings.retry, || self.try_reserve(product, quantity))
                .await?;

        let token = ReservationToken::new();

        let span = Span::current();

        span.record("reservation_token", tracing::field::display(token));
        span.record("reserved_stock", record.stock.reserved_stock());

        info!(quantity, free = record.stock.free(), "reserved stock");

        Ok(token)
    }

    #[tracing::instrument(
        name = "stock.service.update_reservation",
        skip(self),
        fields(product_uuid = %product, reserved_stock = tracing::field::Empty),
        err
    )]
    async fn update_reservation(
        &self,
        product: ProductUuid,
        old_quantity: u64,
        new_quantity: u64,
    ) -> Result<StockLevel, StockServiceError> {
        let record = retry_on_conflict(&self.settings.retry, || {
            self.try_adjust(product, old_quantity, new_quantity)
        })
        .await?;

        Span::current().record("reserved_stock", record.stock.reserved_stock());

        info!(old_quantity, new_quantity, "updated stock reservation");

        Ok(record.stock)
    }

    #[tracing::instrument(
        name = "stock.service.release",
        skip(self),
        fields(product_uuid = %product, reserved_stock = tracing::field::Empty),
        err
    )]
    async fn release(
        &self,
        product: ProductUuid,
        quantity: u64,
    ) -> Result<StockLevel, StockServiceError> {
        let record =
            retry_on_conflict(&self.settings.retry, || self.try_release(product, quantity))
                .await?;

        Span::current().record("reserved_stock", record.stock.reserved_stock());

        info!(quantity, "released stock");

        Ok(record.stock)
    }

    #[tracing::instrument(
        name = "stock.service.confirm",
        skip(self),
        fields(product_uuid = %product, stock_quantity = tracing::field::Empty),
        err
    )]
    async fn confirm(
        &self,
        product: ProductUuid,
        quantity: u64,
    ) -> Result<StockLevel, StockServiceError> {
        let record =
            retry_on_conflict(&self.settings.retry, || self.try_confirm(product, quantity))
                .await?;

        Span::current().record("stock_quantity", record.stock.stock_quantity());

        info!(quantity, "confirmed stock");

        Ok(record.stock)
    }
}

#[automock]
#[async_trait]
pub trait StockService: Send + Sync {
    /// Claim `quantity` free units; fails with insufficient stock otherwise.
    async fn reserve(
        &self,
        product: ProductUuid,
        quantity: u64,
    ) -> Result<ReservationToken, StockServiceError>;

    /// Grow or shrink a reservation by the difference between the quantities.
    async fn update_reservation(
        &self,
        product: ProductUuid,
        old_quantity: u64,
        new_quantity: u64,
    ) -> Result<StockLevel, StockServiceError>;

    /// Give back reserved units, never below zero.
    async fn release(
        &self,
        product: ProductUuid,
        quantity: u64,
    ) -> Result<StockLevel, StockServiceError>;

    /// Permanently consume reserved units.
    async fn confirm(
        &self,
        product: ProductUuid,
        quantity: u64,
    ) -> Result<StockLevel, StockServiceError>;
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;
    use tokio::task::JoinSet;

    use crate::{domain::products::ProductsService, test::TestContext};

    use super::*;

    #[tokio::test]
    async fn reserve_then_release_restores_reserved_stock() -> TestResult {
        let ctx = TestContext::new();
        let product = ctx.create_product(1_000, 10).await?;

        ctx.stock.reserve(product.uuid, 4).await?;

        let stock = ctx.stock.release(product.uuid, 4).await?;

        assert_eq!(stock.reserved_stock(), 0);
        assert_eq!(ctx.products.get_product(product.uuid).await?.stock, product.stock);

        Ok(())
    }

    #[tokio::test]
    async fn reserve_beyond_free_units_fails() -> TestResult {
        let ctx = TestContext::new();
        let product = ctx.create_product(1_000, 3).await?;

        ctx.stock.reserve(product.uuid, 2).await?;

        let result = ctx.stock.reserve(product.uuid, 2).await;

        assert!(
            matches!(
                result,
                Err(StockServiceError::Stock(StockError::InsufficientStock {
                    requested: 2,
                    available: 1
                }))
            ),
            "expected InsufficientStock, got {result:?}"
        );

        Ok(())
    }

    #[tokio::test]
    async fn update_reservation_moves_by_the_difference() -> TestResult {
        let ctx = TestContext::new();
        let product = ctx.create_product(1_000, 10).await?;

        ctx.stock.reserve(product.uuid, 3).await?;

        let grown = ctx.stock.update_reservation(product.uuid, 3, 8).await?;

        assert_eq!(grown.reserved_stock(), 8);

        let shrunk = ctx.stock.update_reservation(product.uuid, 8, 2).await?;

        assert_eq!(shrunk.reserved_stock(), 2);

        let result = ctx.stock.update_reservation(product.uuid, 2, 11).await;

        assert!(
            matches!(result, Err(StockServiceError::Stock(StockError::InsufficientStock { .. }))),
            "expected InsufficientStock, got {result:?}"
        );

        Ok(())
    }

    #[tokio::test]
    async fn confirm_consumes_owned_and_reserved_units() -> TestResult {
        let ctx = TestContext::new();
        let product = ctx.create_product(1_000, 10).await?;

        ctx.stock.reserve(product.uuid, 4).await?;

        let stock = ctx.stock.confirm(product.uuid, 3).await?;

        assert_eq!(stock.stock_quantity(), 7);
        assert_eq!(stock.reserved_stock(), 1);

        let result = ctx.stock.confirm(product.uuid, 2).await;

        assert!(
            matches!(
                result,
                Err(StockServiceError::Stock(StockError::InsufficientReservation { .. }))
            ),
            "expected InsufficientReservation, got {result:?}"
        );

        Ok(())
    }

    #[tokio::test]
    async fn unknown_products_are_not_found() {
        let ctx = TestContext::new();

        let result = ctx.stock.reserve(ProductUuid::new(), 1).await;

        assert!(
            matches!(result, Err(StockServiceError::NotFound)),
            "expected NotFound, got {result:?}"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reservations_never_oversell() -> TestResult {
        let ctx = TestContext::new();
        let product = ctx.create_product(1_000, 10).await?;
        let stock: Arc<dyn StockService> = ctx.stock.clone();

        let mut tasks = JoinSet::new();

        for _ in 0..25 {
            let stock = Arc::clone(&stock);
            let product = product.uuid;

            tasks.spawn(async move { stock.reserve(product, 1).await });
        }

        let mut reserved = 0;
        let mut rejected = 0;

        while let Some(joined) = tasks.join_next().await {
            match joined? {
                Ok(_token) => reserved += 1,
                Err(StockServiceError::Stock(StockError::InsufficientStock { .. })) => {
                    rejected += 1;
                }
                Err(error) => return Err(error.into()),
            }
        }

        let stored = ctx.products.get_product(product.uuid).await?;

        assert_eq!(reserved, 10, "exactly the free units are reserved");
        assert_eq!(rejected, 15);
        assert_eq!(stored.stock.reserved_stock(), 10);
        assert!(stored.stock.reserved_stock() <= stored.stock.stock_quantity());

        Ok(())
    }
}
