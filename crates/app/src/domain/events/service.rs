//! Events Service

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use mockall::automock;
use rust_decimal::Decimal;
use rustc_hash::FxHashSet;
use storefront::{
    clock::Clock,
    eligibility::{RuleEvaluationResult, evaluate_all},
    events::{EventRule, EventStatus, PromotionKind, PromotionalEvent},
    ids::{EventUuid, ProductUuid, RuleUuid, UserUuid},
    rules::EvaluationContext,
    selection::select_best,
};
use tracing::{Span, debug, error, info, warn};

use crate::{
    cache::TwoTierCache,
    database::Db,
    domain::events::{
        EventsServiceError,
        data::{LifecycleReport, NewEvent},
    },
    retry::retry_on_conflict,
    settings::EngineSettings,
};

const MAX_PERCENT: Decimal = Decimal::ONE_HUNDRED;

#[derive(Debug, Clone)]
pub struct DbEventsService {
    db: Db,
    cache: TwoTierCache,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl DbEventsService {
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

    /// Apply the transition `event` is due for, if it still is.
    async fn try_advance(
        &self,
        event: EventUuid,
    ) -> Result<Option<PromotionalEvent>, EventsServiceError> {
        let now = self.clock.now();
        let mut uow = self.db.begin().await?;

        let mut record = uow.get_event(event).await?;

        let Some(to) = record.due_transition(now) else {
            return Ok(None);
        };

        record.transition(to)?;

        let updated = uow.update_event(&record).await?;

        uow.commit().await?;

        Ok(Some(updated))
    }
}

fn validate_percent(kind: PromotionKind, value: Decimal, what: &str) -> Result<(), EventsServiceError> {
    if value.is_sign_negative() {
        return Err(EventsServiceError::Validation(format!(
            "{what} discount value cannot be negative"
        )));
    }

    if matches!(kind, PromotionKind::Percentage | PromotionKind::Bundle) && value > MAX_PERCENT {
        return Err(EventsServiceError::Validation(format!(
            "{what} percentage cannot exceed 100"
        )));
    }

    Ok(())
}

fn validate(event: &NewEvent) -> Result<(), EventsServiceError> {
    if event.name.trim().is_empty() {
        return Err(EventsServiceError::Validation("name is required".to_string()));
    }

    if event.ends_at <= event.starts_at {
        return Err(EventsServiceError::Validation(
            "event must end after it starts".to_string(),
        ));
    }

    if event.max_usage_count == 0 || event.max_usage_per_user == 0 {
        return Err(EventsServiceError::Validation(
            "usage ceilings must be at least 1".to_string(),
        ));
    }

    validate_percent(event.kind, event.discount_value, "event")?;

    let mut seen = FxHashSet::default();

    for target in &event.products {
        if !seen.insert(target.product_uuid) {
            return Err(EventsServiceError::Validation(format!(
                "product {} is targeted twice",
                target.product_uuid
            )));
        }

        if let Some(value) = target.discount_override {
            validate_percent(event.kind, value, "product override")?;
        }
    }

    for rule in &event.rules {
        if let Some(discount) = &rule.discount {
            validate_percent(discount.kind, discount.value, "rule")?;
        }
    }

    Ok(())
}

/// Run [`evaluate_all`] off the async workers, bounded by `timeout`.
///
/// Timeouts and panics produce an ineligible result instead of an error.
pub async fn evaluate_bounded(
    event: PromotionalEvent,
    ctx: EvaluationContext,
    timeout: Duration,
) -> RuleEvaluationResult {
    let started = Instant::now();
    let event_uuid = event.uuid;

    let task = tokio::task::spawn_blocking(move || evaluate_all(&event, &ctx));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => {
            debug!(
                event_uuid = %event_uuid,
                eligible = result.is_eligible,
                applied = result.applied_rules.len(),
                failed = result.failed_rules.len(),
                elapsed = ?result.elapsed,
                "evaluated event rules"
            );

            result
        }
        Ok(Err(join_error)) => {
            warn!(event_uuid = %event_uuid, %join_error, "rule evaluation aborted");

            RuleEvaluationResult::failed("rule evaluation failed", started.elapsed())
        }
        Err(_elapsed) => {
            warn!(event_uuid = %event_uuid, ?timeout, "rule evaluation timed out");

            RuleEvaluationResult::failed("rule evaluation timed out", started.elapsed())
        }
    }
}

#[async_trait]
impl EventsService for DbEventsService {
    #[tracing::instrument(
        name = "events.service.create_event",
        skip(self, event),
        fields(
            event_uuid = %event.uuid,
            promotion_kind = event.kind.as_str(),
            status = tracing::field::Empty,
            rule_count = event.rules.len(),
            product_count = event.products.len()
        ),
        err
    )]
    async fn create_event(&self, event: NewEvent) -> Result<PromotionalEvent, EventsServiceError> {
        validate(&event)?;

        let now = self.clock.now();
        let status = EventStatus::initial(event.starts_at, event.ends_at, now);

        Span::current().record("status", tracing::field::display(status));

        let rules = event
            .rules
            .into_iter()
            .map(|rule| EventRule {
                uuid: RuleUuid::new(),
                kind: rule.kind,
                target: rule.target,
                min_order_value: rule.min_order_value,
                discount: rule.discount,
                priority: rule.priority,
                deleted_at: None,
            })
            .collect();

        let record = PromotionalEvent {
            uuid: event.uuid,
            name: event.name,
            starts_at: event.starts_at,
            ends_at: event.ends_at,
            priority: event.priority,
            kind: event.kind,
            discount_value: event.discount_value,
            max_discount: event.max_discount,
            min_order_value: event.min_order_value,
            max_usage_count: event.max_usage_count,
            current_usage_count: 0,
            max_usage_per_user: event.max_usage_per_user,
            status,
            is_active: true,
            products: event.products,
            rules,
            version: 0,
            created_at: now,
            deleted_at: None,
        };

        let mut uow = self.db.begin().await?;

        uow.insert_event(&record).await?;
        uow.commit().await?;

        self.cache.invalidate_event(&record).await;

        info!(event_uuid = %record.uuid, status = %record.status, "created event");

        Ok(record)
    }

    #[tracing::instrument(
        name = "events.service.get_event",
        skip(self),
        fields(event_uuid = %event),
        err
    )]
    async fn get_event(&self, event: EventUuid) -> Result<PromotionalEvent, EventsServiceError> {
        let mut uow = self.db.begin().await?;

        let record = uow.get_event(event).await?;

        uow.commit().await?;

        Ok(record)
    }

    #[tracing::instrument(
        name = "events.service.select_best_event",
        skip(self),
        fields(
            product_uuid = %product,
            user_uuid = ?user,
            event_uuid = tracing::field::Empty,
            candidate_count = tracing::field::Empty
        ),
        err
    )]
    async fn select_best_event(
        &self,
        product: ProductUuid,
        user: Option<UserUuid>,
    ) -> Result<Option<PromotionalEvent>, EventsServiceError> {
        let now = self.clock.now();
        let mut uow = self.db.begin().await?;

        let running = uow.running_events(now).await?;

        uow.commit().await?;

        let span = Span::current();

        span.record("candidate_count", running.len());

        let best = select_best(&running, product, now).cloned();

        if let Some(event) = &best {
            span.record("event_uuid", tracing::field::display(event.uuid));
        }

        Ok(best)
    }

    #[tracing::instrument(
        name = "events.service.evaluate_rules",
        skip(self, ctx),
        fields(event_uuid = %event, eligible = tracing::field::Empty),
        err
    )]
    async fn evaluate_rules(
        &self,
        event: EventUuid,
        ctx: EvaluationContext,
    ) -> Result<RuleEvaluationResult, EventsServiceError> {
        let record = self.get_event(event).await?;

        let result = evaluate_bounded(record, ctx, self.settings.rule_evaluation_timeout).await;

        Span::current().record("eligible", result.is_eligible);

        Ok(result)
    }

    #[tracing::instrument(
        name = "events.service.run_lifecycle",
        skip(self),
        fields(due_count = tracing::field::Empty),
        err
    )]
    async fn run_lifecycle(&self, limit: usize) -> Result<LifecycleReport, EventsServiceError> {
        let now = self.clock.now();
        let mut uow = self.db.begin().await?;

        let due = uow.due_events(now, limit).await?;

        uow.commit().await?;

        Span::current().record("due_count", due.len());

        let mut report = LifecycleReport::default();

        for event in due {
            let advanced =
                retry_on_conflict(&self.settings.retry, || self.try_advance(event.uuid)).await;

            match advanced {
                Ok(Some(updated)) => {
                    match updated.status {
                        EventStatus::Active => report.activated += 1,
                        EventStatus::Expired => report.expired += 1,
                        EventStatus::Scheduled => {}
                    }

                    self.cache.invalidate_event(&updated).await;

                    info!(
                        event_uuid = %updated.uuid,
                        from = %event.status,
                        to = %updated.status,
                        "event status changed"
                    );
                }
                Ok(None) => {}
                Err(error) => {
                    report.failed += 1;

                    error!(event_uuid = %event.uuid, %error, "event status change failed");
                }
            }
        }

        Ok(report)
    }
}

#[automock]
#[async_trait]
pub trait EventsService: Send + Sync {
    /// Create an event. Its status is derived from its window and the current time.
    async fn create_event(&self, event: NewEvent) -> Result<PromotionalEvent, EventsServiceError>;

    /// Retrieve a single event with its products and rules.
    async fn get_event(&self, event: EventUuid) -> Result<PromotionalEvent, EventsServiceError>;

    /// The running event that should price `product`, if any.
    async fn select_best_event(
        &self,
        product: ProductUuid,
        user: Option<UserUuid>,
    ) -> Result<Option<PromotionalEvent>, EventsServiceError>;

    /// Evaluate every rule of `event` against a cart.
    async fn evaluate_rules(
        &self,
        event: EventUuid,
        ctx: EvaluationContext,
    ) -> Result<RuleEvaluationResult, EventsServiceError>;

    /// Activate scheduled events that have started and expire events that have ended.
    async fn run_lifecycle(&self, limit: usize) -> Result<LifecycleReport, EventsServiceError>;
}
