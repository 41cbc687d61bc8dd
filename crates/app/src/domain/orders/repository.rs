//! Orders Repository

use async_trait::async_trait;
use jiff_sqlx::Timestamp as SqlxTimestamp;
use sqlx::{Row, postgres::PgRow, query};
use storefront::ids::OrderUuid;
use uuid::Uuid;

use crate::{
    database::{
        DbError, PgUnitOfWork,
        postgres::{to_db_amount, try_get_amount, try_get_optional_uuid, try_get_uuid},
    },
    domain::orders::records::{OrderItemRecord, OrderRecord},
};

const CREATE_ORDER_SQL: &str = include_str!("sql/create_order.sql");
const CREATE_ORDER_ITEM_SQL: &str = include_str!("sql/create_order_item.sql");
const GET_ORDER_SQL: &str = include_str!("sql/get_order.sql");
const GET_ORDER_ITEMS_SQL: &str = include_str!("sql/get_order_items.sql");

#[async_trait]
pub trait OrdersRepository: Send {
    /// Insert an order and its items.
    async fn insert_order(&mut self, order: &OrderRecord) -> Result<(), DbError>;

    async fn get_order(&mut self, order: OrderUuid) -> Result<OrderRecord, DbError>;
}

#[async_trait]
impl OrdersRepository for PgUnitOfWork {
    async fn insert_order(&mut self, order: &OrderRecord) -> Result<(), DbError> {
        query(CREATE_ORDER_SQL)
            .bind(order.uuid.into_uuid())
            .bind(order.user_uuid.into_uuid())
            .bind(&order.payment_method)
            .bind(to_db_amount(order.subtotal, "subtotal")?)
            .bind(to_db_amount(order.discount_total, "discount_total")?)
            .bind(to_db_amount(order.total, "total")?)
            .bind(order.free_shipping)
            .bind(SqlxTimestamp::from(order.created_at))
            .execute(&mut *self.tx)
            .await?;

        for item in &order.items {
            query(CREATE_ORDER_ITEM_SQL)
                .bind(item.uuid.into_uuid())
                .bind(order.uuid.into_uuid())
                .bind(item.product_uuid.into_uuid())
                .bind(to_db_amount(item.quantity, "quantity")?)
                .bind(to_db_amount(item.unit_price, "unit_price")?)
                .bind(item.event_uuid.map(Uuid::from))
                .bind(to_db_amount(item.event_quantity, "event_quantity")?)
                .bind(to_db_amount(item.discount_amount, "discount_amount")?)
                .bind(to_db_amount(item.line_total, "line_total")?)
                .execute(&mut *self.tx)
                .await?;
        }

        Ok(())
    }

    async fn get_order(&mut self, order: OrderUuid) -> Result<OrderRecord, DbError> {
        let row = query(GET_ORDER_SQL)
            .bind(order.into_uuid())
            .fetch_one(&mut *self.tx)
            .await?;

        let item_rows = query(GET_ORDER_ITEMS_SQL)
            .bind(order.into_uuid())
            .fetch_all(&mut *self.tx)
            .await?;

        let items = item_rows
            .iter()
            .map(order_item_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OrderRecord {
            uuid: try_get_uuid(&row, "uuid")?,
            user_uuid: try_get_uuid(&row, "user_uuid")?,
            payment_method: row.try_get("payment_method")?,
            subtotal: try_get_amount(&row, "subtotal")?,
            discount_total: try_get_amount(&row, "discount_total")?,
            total: try_get_amount(&row, "total")?,
            free_shipping: row.try_get("free_shipping")?,
            items,
            created_at: row.try_get::<SqlxTimestamp, _>("created_at")?.to_jiff(),
        })
    }
}

fn order_item_from_row(row: &PgRow) -> Result<OrderItemRecord, sqlx::Error> {
    Ok(OrderItemRecord {
        uuid: try_get_uuid(row, "uuid")?,
        product_uuid: try_get_uuid(row, "product_uuid")?,
        quantity: try_get_amount(row, "quantity")?,
        unit_price: try_get_amount(row, "unit_price")?,
        event_uuid: try_get_optional_uuid(row, "event_uuid")?,
        event_quantity: try_get_amount(row, "event_quantity")?,
        discount_amount: try_get_amount(row, "discount_amount")?,
        line_total: try_get_amount(row, "line_total")?,
    })
}
