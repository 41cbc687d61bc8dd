//! Event Usage Repository

use async_trait::async_trait;
use jiff::Timestamp;
use jiff_sqlx::Timestamp as SqlxTimestamp;
use sqlx::{Row, postgres::PgRow, query};
use storefront::ids::{EventUuid, OrderUuid, ProductUuid, UsageUuid, UserUuid};
use uuid::Uuid;

use crate::{
    database::{
        DbError, PgUnitOfWork,
        postgres::{to_db_amount, try_get_amount, try_get_optional_uuid, try_get_uuid},
    },
    domain::usage::records::UsageRecord,
};

const CREATE_USAGE_SQL: &str = include_str!("sql/create_usage.sql");
const USAGE_COUNT_SQL: &str = include_str!("sql/usage_count.sql");
const ORDER_USAGES_SQL: &str = include_str!("sql/order_usages.sql");
const DELETE_USAGE_SQL: &str = include_str!("sql/delete_usage.sql");

#[async_trait]
pub trait UsageRepository: Send {
    /// Append a ledger entry.
    ///
    /// A live entry with the same `(event, order, product)` yields [`DbError::AlreadyExists`].
    async fn insert_usage(&mut self, usage: &UsageRecord) -> Result<(), DbError>;

    /// Units of `event` consumed by `user`, optionally for one product.
    async fn usage_count(
        &mut self,
        event: EventUuid,
        user: UserUuid,
        product: Option<ProductUuid>,
    ) -> Result<u64, DbError>;

    /// Live entries of `event` recorded against `order`.
    async fn order_usages(
        &mut self,
        event: EventUuid,
        order: OrderUuid,
    ) -> Result<Vec<UsageRecord>, DbError>;

    /// Soft-delete an entry.
    async fn delete_usage(&mut self, usage: UsageUuid, at: Timestamp) -> Result<(), DbError>;
}

#[async_trait]
impl UsageRepository for PgUnitOfWork {
    async fn insert_usage(&mut self, usage: &UsageRecord) -> Result<(), DbError> {
        query(CREATE_USAGE_SQL)
            .bind(usage.uuid.into_uuid())
            .bind(usage.event_uuid.into_uuid())
            .bind(usage.user_uuid.into_uuid())
            .bind(usage.order_uuid.map(Uuid::from))
            .bind(usage.product_uuid.map(Uuid::from))
            .bind(to_db_amount(usage.quantity, "quantity")?)
            .bind(to_db_amount(usage.discount_applied, "discount_applied")?)
            .bind(SqlxTimestamp::from(usage.used_at))
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn usage_count(
        &mut self,
        event: EventUuid,
        user: UserUuid,
        product: Option<ProductUuid>,
    ) -> Result<u64, DbError> {
        let row = query(USAGE_COUNT_SQL)
            .bind(event.into_uuid())
            .bind(user.into_uuid())
            .bind(product.map(Uuid::from))
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(try_get_amount(&row, "usage_count")?)
    }

    async fn order_usages(
        &mut self,
        event: EventUuid,
        order: OrderUuid,
    ) -> Result<Vec<UsageRecord>, DbError> {
        let rows = query(ORDER_USAGES_SQL)
            .bind(event.into_uuid())
            .bind(order.into_uuid())
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(rows
            .iter()
            .map(usage_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn delete_usage(&mut self, usage: UsageUuid, at: Timestamp) -> Result<(), DbError> {
        let rows_affected = query(DELETE_USAGE_SQL)
            .bind(usage.into_uuid())
            .bind(SqlxTimestamp::from(at))
            .execute(&mut *self.tx)
            .await?
            .rows_affected();

        if rows_affected == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }
}

fn usage_from_row(row: &PgRow) -> Result<UsageRecord, sqlx::Error> {
    Ok(UsageRecord {
        uuid: try_get_uuid(row, "uuid")?,
        event_uuid: try_get_uuid(row, "event_uuid")?,
        user_uuid: try_get_uuid(row, "user_uuid")?,
        order_uuid: try_get_optional_uuid(row, "order_uuid")?,
        product_uuid: try_get_optional_uuid(row, "product_uuid")?,
        quantity: try_get_amount(row, "quantity")?,
        discount_applied: try_get_amount(row, "discount_applied")?,
        used_at: row.try_get::<SqlxTimestamp, _>("used_at")?.to_jiff(),
        deleted_at: row
            .try_get::<Option<SqlxTimestamp>, _>("deleted_at")?
            .map(SqlxTimestamp::to_jiff),
    })
}
