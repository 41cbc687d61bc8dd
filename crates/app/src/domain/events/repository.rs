//! Events Repository

use async_trait::async_trait;
use jiff::Timestamp;
use jiff_sqlx::Timestamp as SqlxTimestamp;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use sqlx::{Row, postgres::PgRow, query};
use storefront::{
    events::{EventProduct, EventRule, PromotionKind, PromotionalEvent, RuleDiscount},
    ids::EventUuid,
};
use uuid::Uuid;

use crate::database::{
    DbError, PgUnitOfWork,
    postgres::{
        to_db_amount, to_db_optional_amount, try_get_amount, try_get_optional_amount,
        try_get_parsed, try_get_uuid,
    },
};

const GET_EVENT_SQL: &str = include_str!("sql/get_event.sql");
const RUNNING_EVENTS_SQL: &str = include_str!("sql/running_events.sql");
const DUE_EVENTS_SQL: &str = include_str!("sql/due_events.sql");
const CREATE_EVENT_SQL: &str = include_str!("sql/create_event.sql");
const CREATE_EVENT_PRODUCT_SQL: &str = include_str!("sql/create_event_product.sql");
const CREATE_EVENT_RULE_SQL: &str = include_str!("sql/create_event_rule.sql");
const UPDATE_EVENT_SQL: &str = include_str!("sql/update_event.sql");
const GET_EVENT_PRODUCTS_SQL: &str = include_str!("sql/get_event_products.sql");
const GET_EVENT_RULES_SQL: &str = include_str!("sql/get_event_rules.sql");

#[async_trait]
pub trait EventsRepository: Send {
    /// Fetch a non-deleted event with its products and rules.
    async fn get_event(&mut self, event: EventUuid) -> Result<PromotionalEvent, DbError>;

    /// Events that are live, active, inside their window and below their usage ceiling.
    async fn running_events(&mut self, now: Timestamp) -> Result<Vec<PromotionalEvent>, DbError>;

    /// Events whose status lags behind `now`.
    async fn due_events(
        &mut self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<PromotionalEvent>, DbError>;

    async fn insert_event(&mut self, event: &PromotionalEvent) -> Result<(), DbError>;

    /// Write the mutable counters and status of `event` if its version is current.
    async fn update_event(&mut self, event: &PromotionalEvent)
    -> Result<PromotionalEvent, DbError>;
}

impl PgUnitOfWork {
    async fn with_children(
        &mut self,
        mut events: Vec<PromotionalEvent>,
    ) -> Result<Vec<PromotionalEvent>, DbError> {
        if events.is_empty() {
            return Ok(events);
        }

        let uuids: Vec<Uuid> = events.iter().map(|event| event.uuid.into_uuid()).collect();

        let product_rows = query(GET_EVENT_PRODUCTS_SQL)
            .bind(&uuids)
            .fetch_all(&mut *self.tx)
            .await?;

        let rule_rows = query(GET_EVENT_RULES_SQL)
            .bind(&uuids)
            .fetch_all(&mut *self.tx)
            .await?;

        let mut products: FxHashMap<EventUuid, Vec<EventProduct>> = FxHashMap::default();
        let mut rules: FxHashMap<EventUuid, Vec<EventRule>> = FxHashMap::default();

        for row in &product_rows {
            let event: EventUuid = try_get_uuid(row, "event_uuid")?;

            products.entry(event).or_default().push(EventProduct {
                product_uuid: try_get_uuid(row, "product_uuid")?,
                discount_override: row.try_get("discount_override")?,
            });
        }

        for row in &rule_rows {
            let event: EventUuid = try_get_uuid(row, "event_uuid")?;

            rules.entry(event).or_default().push(rule_from_row(row)?);
        }

        for event in &mut events {
            event.products = products.remove(&event.uuid).unwrap_or_default();
            event.rules = rules.remove(&event.uuid).unwrap_or_default();
        }

        Ok(events)
    }
}

#[async_trait]
impl EventsRepository for PgUnitOfWork {
    async fn get_event(&mut self, event: EventUuid) -> Result<PromotionalEvent, DbError> {
        let row = query(GET_EVENT_SQL)
            .bind(event.into_uuid())
            .fetch_one(&mut *self.tx)
            .await?;

        let event = event_from_row(&row)?;

        self.with_children(vec![event])
            .await?
            .pop()
            .ok_or(DbError::NotFound)
    }

    async fn running_events(&mut self, now: Timestamp) -> Result<Vec<PromotionalEvent>, DbError> {
        let rows = query(RUNNING_EVENTS_SQL)
            .bind(SqlxTimestamp::from(now))
            .fetch_all(&mut *self.tx)
            .await?;

        let events = rows
            .iter()
            .map(event_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        self.with_children(events).await
    }

    async fn due_events(
        &mut self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<PromotionalEvent>, DbError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = query(DUE_EVENTS_SQL)
            .bind(SqlxTimestamp::from(now))
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await?;

        let events = rows
            .iter()
            .map(event_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        self.with_children(events).await
    }

    async fn insert_event(&mut self, event: &PromotionalEvent) -> Result<(), DbError> {
        query(CREATE_EVENT_SQL)
            .bind(event.uuid.into_uuid())
            .bind(&event.name)
            .bind(SqlxTimestamp::from(event.starts_at))
            .bind(SqlxTimestamp::from(event.ends_at))
            .bind(event.priority)
            .bind(event.kind.as_str())
            .bind(event.discount_value)
            .bind(to_db_optional_amount(event.max_discount, "max_discount")?)
            .bind(to_db_optional_amount(event.min_order_value, "min_order_value")?)
            .bind(to_db_amount(event.max_usage_count, "max_usage_count")?)
            .bind(to_db_amount(event.current_usage_count, "current_usage_count")?)
            .bind(to_db_amount(event.max_usage_per_user, "max_usage_per_user")?)
            .bind(event.status.as_str())
            .bind(event.is_active)
            .bind(SqlxTimestamp::from(event.created_at))
            .execute(&mut *self.tx)
            .await?;

        for product in &event.products {
            query(CREATE_EVENT_PRODUCT_SQL)
                .bind(event.uuid.into_uuid())
                .bind(product.product_uuid.into_uuid())
                .bind(product.discount_override)
                .execute(&mut *self.tx)
                .await?;
        }

        for rule in &event.rules {
            let discount = rule.discount.as_ref();

            query(CREATE_EVENT_RULE_SQL)
                .bind(rule.uuid.into_uuid())
                .bind(event.uuid.into_uuid())
                .bind(rule.kind.as_str())
                .bind(&rule.target)
                .bind(to_db_optional_amount(rule.min_order_value, "min_order_value")?)
                .bind(discount.map(|d| d.kind.as_str()))
                .bind(discount.map(|d| d.value))
                .bind(to_db_optional_amount(
                    discount.and_then(|d| d.max_discount),
                    "max_discount",
                )?)
                .bind(rule.priority)
                .execute(&mut *self.tx)
                .await?;
        }

        Ok(())
    }

    async fn update_event(
        &mut self,
        event: &PromotionalEvent,
    ) -> Result<PromotionalEvent, DbError> {
        let row = query(UPDATE_EVENT_SQL)
            .bind(event.uuid.into_uuid())
            .bind(event.version)
            .bind(to_db_amount(event.current_usage_count, "current_usage_count")?)
            .bind(event.status.as_str())
            .bind(event.is_active)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(DbError::Conflict)?;

        let mut updated = event.clone();
        updated.version = row.try_get("version")?;

        Ok(updated)
    }
}

fn event_from_row(row: &PgRow) -> Result<PromotionalEvent, sqlx::Error> {
    Ok(PromotionalEvent {
        uuid: try_get_uuid(row, "uuid")?,
        name: row.try_get("name")?,
        starts_at: row.try_get::<SqlxTimestamp, _>("starts_at")?.to_jiff(),
        ends_at: row.try_get::<SqlxTimestamp, _>("ends_at")?.to_jiff(),
        priority: row.try_get("priority")?,
        kind: try_get_parsed(row, "kind")?,
        discount_value: row.try_get("discount_value")?,
        max_discount: try_get_optional_amount(row, "max_discount")?,
        min_order_value: try_get_optional_amount(row, "min_order_value")?,
        max_usage_count: try_get_amount(row, "max_usage_count")?,
        current_usage_count: try_get_amount(row, "current_usage_count")?,
        max_usage_per_user: try_get_amount(row, "max_usage_per_user")?,
        status: try_get_parsed(row, "status")?,
        is_active: row.try_get("is_active")?,
        products: Vec::new(),
        rules: Vec::new(),
        version: row.try_get("version")?,
        created_at: row.try_get::<SqlxTimestamp, _>("created_at")?.to_jiff(),
        deleted_at: row
            .try_get::<Option<SqlxTimestamp>, _>("deleted_at")?
            .map(SqlxTimestamp::to_jiff),
    })
}

fn rule_from_row(row: &PgRow) -> Result<EventRule, sqlx::Error> {
    let discount_kind: Option<String> = row.try_get("discount_kind")?;
    let discount_value: Option<Decimal> = row.try_get("discount_value")?;

    let discount = match (discount_kind, discount_value) {
        (Some(kind), Some(value)) => Some(RuleDiscount {
            kind: kind
                .parse::<PromotionKind>()
                .map_err(|e| sqlx::Error::ColumnDecode {
                    index: "discount_kind".to_string(),
                    source: Box::new(e),
                })?,
            value,
            max_discount: try_get_optional_amount(row, "max_discount")?,
        }),
        _ => None,
    };

    Ok(EventRule {
        uuid: try_get_uuid(row, "uuid")?,
        kind: try_get_parsed(row, "kind")?,
        target: row.try_get("target")?,
        min_order_value: try_get_optional_amount(row, "min_order_value")?,
        discount,
        priority: row.try_get("priority")?,
        deleted_at: row
            .try_get::<Option<SqlxTimestamp>, _>("deleted_at")?
            .map(SqlxTimestamp::to_jiff),
    })
}
