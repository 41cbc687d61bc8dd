//! Usage Service

use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;
use mockall::automock;
use rustc_hash::FxHashSet;
use storefront::{
    clock::Clock,
    events::PromotionalEvent,
    ids::{EventUuid, OrderUuid, ProductUuid, UsageUuid, UserUuid},
};
use tracing::{Span, info};

use crate::{
    cache::TwoTierCache,
    database::{Db, UnitOfWork},
    domain::usage::{data::NewUsage, errors::UsageServiceError, records::UsageRecord},
    retry::retry_on_conflict,
    settings::EngineSettings,
};

/// Record `usage` of `event` inside `uow`.
///
/// Checks the per-user ceiling, consumes global usage and appends the ledger
/// row. `event` is replaced with its stored, re-versioned form so the caller
/// can keep writing to it in the same unit of work.
pub(crate) async fn record_in(
    uow: &mut dyn UnitOfWork,
    event: &mut PromotionalEvent,
    usage: &NewUsage,
    now: Timestamp,
) -> Result<UsageRecord, UsageServiceError> {
    if usage.quantity == 0 {
        return Err(UsageServiceError::InvalidQuantity);
    }

    let used = uow
        .usage_count(usage.event_uuid, usage.user_uuid, usage.product_uuid)
        .await?;

    if used.saturating_add(usage.quantity) > event.max_usage_per_user {
        return Err(UsageServiceError::UserLimitReached {
            used,
            limit: event.max_usage_per_user,
        });
    }

    event.consume_usage(usage.quantity)?;

    *event = uow.update_event(event).await?;

    let record = UsageRecord {
        uuid: UsageUuid::new(),
        event_uuid: usage.event_uuid,
        user_uuid: usage.user_uuid,
        order_uuid: usage.order_uuid,
        product_uuid: usage.product_uuid,
        quantity: usage.quantity,
        discount_applied: usage.discount_applied,
        used_at: now,
        deleted_at: None,
    };

    uow.insert_usage(&record).await?;

    Ok(record)
}

#[derive(Debug, Clone)]
pub struct DbUsageService {
    db: Db,
    cache: TwoTierCache,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl DbUsageService {
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

    async fn try_record_usage(&self, usage: &NewUsage) -> Result<UsageRecord, UsageServiceError> {
        let now = self.clock.now();
        let mut uow = self.db.begin().await?;

        let mut event = uow.get_event(usage.event_uuid).await?;

        if !event.is_running(now) {
            return Err(UsageServiceError::EventNotRunning);
        }

        let record = record_in(&mut *uow, &mut event, usage, now).await?;

        uow.commit().await?;

        Ok(record)
    }

    async fn try_reverse_usage(
        &self,
        event: EventUuid,
        order: OrderUuid,
    ) -> Result<Vec<UsageRecord>, UsageServiceError> {
        let now = self.clock.now();
        let mut uow = self.db.begin().await?;

        let usages = uow.order_usages(event, order).await?;

        if usages.is_empty() {
            return Err(UsageServiceError::NotFound);
        }

        let mut released: u64 = 0;

        for usage in &usages {
            uow.delete_usage(usage.uuid, now).await?;
            released = released.saturating_add(usage.quantity);
        }

        let mut record = uow.get_event(event).await?;

        record.release_usage(released);

        uow.update_event(&record).await?;
        uow.commit().await?;

        Ok(usages)
    }
}

#[async_trait]
impl UsageService for DbUsageService {
    #[tracing::instrument(
        name = "usage.service.can_user_use_event",
        skip(self),
        fields(event_uuid = %event, user_uuid = %user, used = tracing::field::Empty),
        err
    )]
    async fn can_user_use_event(
        &self,
        event: EventUuid,
        user: UserUuid,
    ) -> Result<bool, UsageServiceError> {
        let now = self.clock.now();
        let mut uow = self.db.begin().await?;

        let record = uow.get_event(event).await?;

        if !record.is_running(now) {
            uow.commit().await?;

            return Ok(false);
        }

        let used = uow.usage_count(event, user, None).await?;

        uow.commit().await?;

        Span::current().record("used", used);

        Ok(used < record.max_usage_per_user)
    }

    #[tracing::instrument(
        name = "usage.service.get_user_event_usage_count",
        skip(self),
        fields(event_uuid = %event, user_uuid = %user, product_uuid = ?product),
        err
    )]
    async fn get_user_event_usage_count(
        &self,
        event: EventUuid,
        user: UserUuid,
        product: Option<ProductUuid>,
    ) -> Result<u64, UsageServiceError> {
        let mut uow = self.db.begin().await?;

        let used = uow.usage_count(event, user, product).await?;

        uow.commit().await?;

        Ok(used)
    }

    #[tracing::instrument(
        name = "usage.service.record_usage",
        skip(self, usage),
        fields(
            event_uuid = %usage.event_uuid,
            user_uuid = %usage.user_uuid,
            order_uuid = ?usage.order_uuid,
            quantity = usage.quantity,
            usage_uuid = tracing::field::Empty
        ),
        err
    )]
    async fn record_usage(&self, usage: NewUsage) -> Result<UsageRecord, UsageServiceError> {
        let record =
            retry_on_conflict(&self.settings.retry, || self.try_record_usage(&usage)).await?;

        Span::current().record("usage_uuid", tracing::field::display(record.uuid));

        self.cache.invalidate_user(record.user_uuid).await;

        info!(usage_uuid = %record.uuid, "recorded event usage");

        Ok(record)
    }

    #[tracing::instrument(
        name = "usage.service.reverse_usage",
        skip(self),
        fields(event_uuid = %event, order_uuid = %order, released = tracing::field::Empty),
        err
    )]
    async fn reverse_usage(
        &self,
        event: EventUuid,
        order: OrderUuid,
    ) -> Result<u64, UsageServiceError> {
        let reversed =
            retry_on_conflict(&self.settings.retry, || self.try_reverse_usage(event, order))
                .await?;

        let released = reversed
            .iter()
            .fold(0_u64, |acc, usage| acc.saturating_add(usage.quantity));

        for user in reversed.iter().map(|usage| usage.user_uuid).collect::<FxHashSet<_>>() {
            self.cache.invalidate_user(user).await;
        }

        Span::current().record("released", released);

        info!(released, "reversed event usage");

        Ok(released)
    }
}

#[automock]
#[async_trait]
pub trait UsageService: Send + Sync {
    /// Whether `user` may still buy under `event` right now.
    async fn can_user_use_event(
        &self,
        event: EventUuid,
        user: UserUuid,
    ) -> Result<bool, UsageServiceError>;

    /// Units of `event` bought by `user`, optionally for one product.
    async fn get_user_event_usage_count(
        &self,
        event: EventUuid,
        user: UserUuid,
        product: Option<ProductUuid>,
    ) -> Result<u64, UsageServiceError>;

    /// Append a ledger entry and count it against the event's global ceiling.
    ///
    /// Recording the same `(event, order, product)` twice fails with
    /// [`UsageServiceError::AlreadyRecorded`] and counts once.
    async fn record_usage(&self, usage: NewUsage) -> Result<UsageRecord, UsageServiceError>;

    /// Undo every entry of `event` on `order`; returns the units given back.
    async fn reverse_usage(
        &self,
        event: EventUuid,
        order: OrderUuid,
    ) -> Result<u64, UsageServiceError>;
}

#[cfg(test)]
mod tests {
    use storefront::events::PromotionKind;
    use testresult::TestResult;

    use crate::{
        domain::events::EventsService,
        test::{TestContext, helpers::new_event},
    };

    use super::*;

    fn usage(event: EventUuid, user: UserUuid, order: OrderUuid) -> NewUsage {
        NewUsage {
            event_uuid: event,
            user_uuid: user,
            order_uuid: Some(order),
            product_uuid: None,
            quantity: 1,
            discount_applied: 100,
        }
    }

    #[tokio::test]
    async fn recording_usage_counts_against_both_ceilings() -> TestResult {
        let ctx = TestContext::new();
        let event = ctx.events.create_event(new_event(&ctx, PromotionKind::Percentage, 10)).await?;
        let user = UserUuid::new();

        assert!(ctx.usage.can_user_use_event(event.uuid, user).await?);

        ctx.usage.record_usage(usage(event.uuid, user, OrderUuid::new())).await?;

        let stored = ctx.events.get_event(event.uuid).await?;

        assert_eq!(stored.current_usage_count, 1);
        assert_eq!(
            ctx.usage.get_user_event_usage_count(event.uuid, user, None).await?,
            1
        );

        Ok(())
    }

    #[tokio::test]
    async fn recording_usage_twice_for_one_order_counts_once() -> TestResult {
        let ctx = TestContext::new();
        let event = ctx.events.create_event(new_event(&ctx, PromotionKind::Percentage, 10)).await?;
        let user = UserUuid::new();
        let order = OrderUuid::new();

        ctx.usage.record_usage(usage(event.uuid, user, order)).await?;

        let duplicate = ctx.usage.record_usage(usage(event.uuid, user, order)).await;

        assert!(
            matches!(duplicate, Err(UsageServiceError::AlreadyRecorded)),
            "expected AlreadyRecorded, got {duplicate:?}"
        );

        let stored = ctx.events.get_event(event.uuid).await?;

        assert_eq!(stored.current_usage_count, 1, "global counter incremented once");
        assert_eq!(
            ctx.usage.get_user_event_usage_count(event.uuid, user, None).await?,
            1,
            "one ledger row"
        );

        Ok(())
    }

    #[tokio::test]
    async fn per_user_ceiling_blocks_further_usage() -> TestResult {
        let ctx = TestContext::new();

        let mut new = new_event(&ctx, PromotionKind::Percentage, 10);
        new.max_usage_per_user = 1;

        let event = ctx.events.create_event(new).await?;
        let user = UserUuid::new();

        ctx.usage.record_usage(usage(event.uuid, user, OrderUuid::new())).await?;

        assert!(!ctx.usage.can_user_use_event(event.uuid, user).await?);

        let result = ctx.usage.record_usage(usage(event.uuid, user, OrderUuid::new())).await;

        assert!(
            matches!(result, Err(UsageServiceError::UserLimitReached { used: 1, limit: 1 })),
            "expected UserLimitReached, got {result:?}"
        );

        assert!(
            ctx.usage.can_user_use_event(event.uuid, UserUuid::new()).await?,
            "other users are unaffected"
        );

        Ok(())
    }

    #[tokio::test]
    async fn global_ceiling_stops_the_event() -> TestResult {
        let ctx = TestContext::new();

        let mut new = new_event(&ctx, PromotionKind::Percentage, 10);
        new.max_usage_count = 1;

        let event = ctx.events.create_event(new).await?;

        ctx.usage
            .record_usage(usage(event.uuid, UserUuid::new(), OrderUuid::new()))
            .await?;

        let result = ctx
            .usage
            .record_usage(usage(event.uuid, UserUuid::new(), OrderUuid::new()))
            .await;

        assert!(
            matches!(result, Err(UsageServiceError::EventNotRunning)),
            "an exhausted event stops running, got {result:?}"
        );

        Ok(())
    }

    #[tokio::test]
    async fn usage_counts_can_be_scoped_to_a_product() -> TestResult {
        let ctx = TestContext::new();
        let event = ctx.events.create_event(new_event(&ctx, PromotionKind::Percentage, 10)).await?;
        let user = UserUuid::new();
        let product = ProductUuid::new();

        let mut scoped = usage(event.uuid, user, OrderUuid::new());
        scoped.product_uuid = Some(product);
        scoped.quantity = 2;

        ctx.usage.record_usage(scoped).await?;
        ctx.usage.record_usage(usage(event.uuid, user, OrderUuid::new())).await?;

        let service = &ctx.usage;

        assert_eq!(service.get_user_event_usage_count(event.uuid, user, Some(product)).await?, 2);
        assert_eq!(service.get_user_event_usage_count(event.uuid, user, None).await?, 3);

        Ok(())
    }

    #[tokio::test]
    async fn reversing_usage_gives_units_back() -> TestResult {
        let ctx = TestContext::new();
        let event = ctx.events.create_event(new_event(&ctx, PromotionKind::Percentage, 10)).await?;
        let user = UserUuid::new();
        let order = OrderUuid::new();

        let mut first = usage(event.uuid, user, order);
        first.product_uuid = Some(ProductUuid::new());
        first.quantity = 2;

        let mut second = usage(event.uuid, user, order);
        second.product_uuid = Some(ProductUuid::new());

        ctx.usage.record_usage(first).await?;
        ctx.usage.record_usage(second).await?;

        assert_eq!(ctx.usage.reverse_usage(event.uuid, order).await?, 3);
        assert_eq!(ctx.events.get_event(event.uuid).await?.current_usage_count, 0);
        assert_eq!(ctx.usage.get_user_event_usage_count(event.uuid, user, None).await?, 0);

        let again = ctx.usage.reverse_usage(event.uuid, order).await;

        assert!(
            matches!(again, Err(UsageServiceError::NotFound)),
            "expected NotFound, got {again:?}"
        );

        Ok(())
    }

    #[tokio::test]
    async fn usage_service_is_mockable() -> TestResult {
        let mut mock = MockUsageService::new();

        mock.expect_can_user_use_event().returning(|_, _| Ok(false));

        let service: Arc<dyn UsageService> = Arc::new(mock);

        assert!(!service.can_user_use_event(EventUuid::new(), UserUuid::new()).await?);

        Ok(())
    }
}
