//! Cart Items Repository

use async_trait::async_trait;
use jiff::Timestamp;
use jiff_sqlx::Timestamp as SqlxTimestamp;
use sqlx::{Row, postgres::PgRow, query};
use storefront::ids::{CartItemUuid, UserUuid};
use uuid::Uuid;

use crate::{
    database::{
        DbError, PgUnitOfWork,
        postgres::{to_db_amount, try_get_amount, try_get_optional_uuid, try_get_uuid},
    },
    domain::carts::records::CartItemRecord,
};

const GET_CART_ITEM_SQL: &str = include_str!("sql/get_cart_item.sql");
const USER_CART_ITEMS_SQL: &str = include_str!("sql/user_cart_items.sql");
const EXPIRED_CART_ITEMS_SQL: &str = include_str!("sql/expired_cart_items.sql");
const CREATE_CART_ITEM_SQL: &str = include_str!("sql/create_cart_item.sql");
const UPDATE_CART_ITEM_SQL: &str = include_str!("sql/update_cart_item.sql");

#[async_trait]
pub trait CartItemsRepository: Send {
    /// Fetch a non-deleted item, expired or not.
    async fn get_cart_item(&mut self, item: CartItemUuid) -> Result<CartItemRecord, DbError>;

    /// A user's non-deleted items, expired ones included.
    async fn user_cart_items(&mut self, user: UserUuid) -> Result<Vec<CartItemRecord>, DbError>;

    /// Non-deleted items whose expiry has passed.
    async fn expired_cart_items(
        &mut self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<CartItemRecord>, DbError>;

    async fn insert_cart_item(&mut self, item: &CartItemRecord) -> Result<(), DbError>;

    /// Write `item` if its version is current; returns it with the next version.
    async fn update_cart_item(&mut self, item: &CartItemRecord)
    -> Result<CartItemRecord, DbError>;
}

#[async_trait]
impl CartItemsRepository for PgUnitOfWork {
    async fn get_cart_item(&mut self, item: CartItemUuid) -> Result<CartItemRecord, DbError> {
        let row = query(GET_CART_ITEM_SQL)
            .bind(item.into_uuid())
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(cart_item_from_row(&row)?)
    }

    async fn user_cart_items(&mut self, user: UserUuid) -> Result<Vec<CartItemRecord>, DbError> {
        let rows = query(USER_CART_ITEMS_SQL)
            .bind(user.into_uuid())
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(rows
            .iter()
            .map(cart_item_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn expired_cart_items(
        &mut self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<CartItemRecord>, DbError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = query(EXPIRED_CART_ITEMS_SQL)
            .bind(SqlxTimestamp::from(now))
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(rows
            .iter()
            .map(cart_item_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn insert_cart_item(&mut self, item: &CartItemRecord) -> Result<(), DbError> {
        query(CREATE_CART_ITEM_SQL)
            .bind(item.uuid.into_uuid())
            .bind(item.user_uuid.into_uuid())
            .bind(item.product_uuid.into_uuid())
            .bind(to_db_amount(item.quantity, "quantity")?)
            .bind(to_db_amount(item.unit_price, "unit_price")?)
            .bind(to_db_amount(item.event_unit_price, "event_unit_price")?)
            .bind(to_db_amount(item.event_quantity, "event_quantity")?)
            .bind(to_db_amount(item.event_discount_amount, "event_discount_amount")?)
            .bind(item.applied_event_uuid.map(Uuid::from))
            .bind(item.reservation_token.into_uuid())
            .bind(item.is_stock_reserved)
            .bind(SqlxTimestamp::from(item.expires_at))
            .bind(SqlxTimestamp::from(item.created_at))
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn update_cart_item(
        &mut self,
        item: &CartItemRecord,
    ) -> Result<CartItemRecord, DbError> {
        let row = query(UPDATE_CART_ITEM_SQL)
            .bind(item.uuid.into_uuid())
            .bind(item.version)
            .bind(to_db_amount(item.quantity, "quantity")?)
            .bind(to_db_amount(item.unit_price, "unit_price")?)
            .bind(to_db_amount(item.event_unit_price, "event_unit_price")?)
            .bind(to_db_amount(item.event_quantity, "event_quantity")?)
            .bind(to_db_amount(item.event_discount_amount, "event_discount_amount")?)
            .bind(item.applied_event_uuid.map(Uuid::from))
            .bind(item.is_stock_reserved)
            .bind(SqlxTimestamp::from(item.expires_at))
            .bind(SqlxTimestamp::from(item.updated_at))
            .bind(item.deleted_at.map(SqlxTimestamp::from))
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(DbError::Conflict)?;

        Ok(cart_item_from_row(&row)?)
    }
}

fn cart_item_from_row(row: &PgRow) -> Result<CartItemRecord, sqlx::Error> {
    Ok(CartItemRecord {
        uuid: try_get_uuid(row, "uuid")?,
        user_uuid: try_get_uuid(row, "user_uuid")?,
        product_uuid: try_get_uuid(row, "product_uuid")?,
        quantity: try_get_amount(row, "quantity")?,
        unit_price: try_get_amount(row, "unit_price")?,
        event_unit_price: try_get_amount(row, "event_unit_price")?,
        event_quantity: try_get_amount(row, "event_quantity")?,
        event_discount_amount: try_get_amount(row, "event_discount_amount")?,
        applied_event_uuid: try_get_optional_uuid(row, "applied_event_uuid")?,
        reservation_token: try_get_uuid(row, "reservation_token")?,
        is_stock_reserved: row.try_get("is_stock_reserved")?,
        expires_at: row.try_get::<SqlxTimestamp, _>("expires_at")?.to_jiff(),
        version: row.try_get("version")?,
        created_at: row.try_get::<SqlxTimestamp, _>("created_at")?.to_jiff(),
        updated_at: row.try_get::<SqlxTimestamp, _>("updated_at")?.to_jiff(),
        deleted_at: row
            .try_get::<Option<SqlxTimestamp>, _>("deleted_at")?
            .map(SqlxTimestamp::to_jiff),
    })
}
