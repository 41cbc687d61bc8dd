//! Background Sweep
//!
//! Periodically moves events through their lifecycle and releases stock held
//! by expired cart items. Every step goes through the same services as the
//! request path and is safe to repeat, so overlapping or repeated ticks are
//! harmless. Failures are logged and retried on the next tick.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    time::{self, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::{carts::CartsService, events::EventsService};

/// What one tick accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub activated: usize,
    pub expired: usize,
    pub reaped: usize,
    /// Steps or events that failed and will be retried next tick.
    pub failures: usize,
}

#[derive(Clone)]
pub struct Sweeper {
    events: Arc<dyn EventsService>,
    carts: Arc<dyn CartsService>,
    interval: Duration,
    batch_size: usize,
}

impl Sweeper {
    #[must_use]
    pub fn new(
        events: Arc<dyn EventsService>,
        carts: Arc<dyn CartsService>,
        interval: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            events,
            carts,
            interval,
            batch_size,
        }
    }

    /// Run a single sweep.
    #[tracing::instrument(name = "sweeper.run_once", skip(self))]
    pub async fn run_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        match self.events.run_lifecycle(self.batch_size).await {
            Ok(lifecycle) => {
                report.activated = lifecycle.activated;
                report.expired = lifecycle.expired;
                report.failures += lifecycle.failed;
            }
            Err(error) => {
                error!(%error, "event lifecycle sweep failed");

                report.failures += 1;
            }
        }

        match self.carts.reap_expired(self.batch_size).await {
            Ok(reaped) => report.reaped = reaped,
            Err(error) => {
                error!(%error, "cart item sweep failed");

                report.failures += 1;
            }
        }

        if report != SweepReport::default() {
            info!(
                activated = report.activated,
                expired = report.expired,
                reaped = report.reaped,
                failures = report.failures,
                "sweep finished"
            );
        }

        report
    }

    /// Sweep every interval until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval = ?self.interval, batch_size = self.batch_size, "sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use jiff::SignedDuration;
    use storefront::{
        clock::Clock,
        events::{EventStatus, PromotionKind},
        ids::UserUuid,
    };
    use testresult::TestResult;

    use crate::{
        domain::{
            carts::{CartsServiceError, MockCartsService, data::NewCartItem},
            events::{EventsServiceError, MockEventsService, data::LifecycleReport},
            products::ProductsService,
        },
        test::{TestContext, helpers::new_event},
    };

    use super::*;

    fn sweeper(ctx: &TestContext) -> Sweeper {
        Sweeper::new(
            ctx.events.clone(),
            ctx.carts.clone(),
            Duration::from_millis(10),
            100,
        )
    }

    #[tokio::test]
    async fn run_once_drives_events_and_carts() -> TestResult {
        let ctx = TestContext::new();
        let product = ctx.create_product(1_000, 10).await?;

        let mut scheduled = new_event(&ctx, PromotionKind::Percentage, 10);
        scheduled.starts_at = ctx.clock.now().checked_add(SignedDuration::from_mins(10))?;

        let scheduled = ctx.events.create_event(scheduled).await?;

        assert_eq!(scheduled.status, EventStatus::Scheduled);

        ctx.carts
            .add_item(
                UserUuid::new(),
                NewCartItem {
                    product_uuid: product.uuid,
                    quantity: 3,
                    expected_total: None,
                },
            )
            .await?;

        ctx.clock.advance(SignedDuration::from_mins(31))?;

        let report = sweeper(&ctx).run_once().await;

        assert_eq!(report.activated, 1);
        assert_eq!(report.reaped, 1);
        assert_eq!(report.failures, 0);
        assert_eq!(ctx.events.get_event(scheduled.uuid).await?.status, EventStatus::Active);
        assert_eq!(
            ctx.products.get_product(product.uuid).await?.stock.reserved_stock(),
            0
        );

        let again = sweeper(&ctx).run_once().await;

        assert_eq!(again, SweepReport::default(), "a repeated sweep changes nothing");

        Ok(())
    }

    #[tokio::test]
    async fn failing_steps_do_not_stop_the_sweep() {
        let mut events = MockEventsService::new();
        let mut carts = MockCartsService::new();

        events
            .expect_run_lifecycle()
            .times(1)
            .returning(|_| Err(EventsServiceError::Conflict));

        carts.expect_reap_expired().times(1).returning(|_| Ok(2));

        let sweeper = Sweeper::new(Arc::new(events), Arc::new(carts), Duration::from_secs(1), 10);

        let report = sweeper.run_once().await;

        assert_eq!(report.reaped, 2);
        assert_eq!(report.failures, 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() -> TestResult {
        let mut events = MockEventsService::new();
        let mut carts = MockCartsService::new();

        events
            .expect_run_lifecycle()
            .returning(|_| Ok(LifecycleReport::default()));

        carts
            .expect_reap_expired()
            .returning(|_| Err(CartsServiceError::Conflict));

        let sweeper = Sweeper::new(
            Arc::new(events),
            Arc::new(carts),
            Duration::from_millis(5),
            10,
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { sweeper.run(rx).await });

        time::sleep(Duration::from_millis(20)).await;
        tx.send(true)?;

        time::timeout(Duration::from_secs(1), handle).await??;

        Ok(())
    }
}
