//! Products Repository

use async_trait::async_trait;
use jiff_sqlx::Timestamp as SqlxTimestamp;
use sqlx::{Row, postgres::PgRow, query};
use storefront::{ids::ProductUuid, stock::StockLevel};
use uuid::Uuid;

use crate::{
    database::{
        DbError, PgUnitOfWork,
        postgres::{
            to_db_amount, to_db_optional_amount, try_get_amount, try_get_optional_amount,
            try_get_optional_uuid, try_get_uuid,
        },
    },
    domain::products::records::ProductRecord,
};

const GET_PRODUCT_SQL: &str = include_str!("sql/get_product.sql");
const FIND_PRODUCTS_SQL: &str = include_str!("sql/find_products.sql");
const CREATE_PRODUCT_SQL: &str = include_str!("sql/create_product.sql");
const UPDATE_PRODUCT_SQL: &str = include_str!("sql/update_product.sql");

#[async_trait]
pub trait ProductsRepository: Send {
    /// Fetch a live product.
    async fn get_product(&mut self, product: ProductUuid) -> Result<ProductRecord, DbError>;

    /// Fetch the live products among `products`, in no particular order.
    async fn find_products(
        &mut self,
        products: &[ProductUuid],
    ) -> Result<Vec<ProductRecord>, DbError>;

    async fn insert_product(&mut self, product: &ProductRecord) -> Result<(), DbError>;

    /// Write `product` if its version is current; returns it with the next version.
    async fn update_product(&mut self, product: &ProductRecord) -> Result<ProductRecord, DbError>;
}

#[async_trait]
impl ProductsRepository for PgUnitOfWork {
    async fn get_product(&mut self, product: ProductUuid) -> Result<ProductRecord, DbError> {
        let row = query(GET_PRODUCT_SQL)
            .bind(product.into_uuid())
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(product_from_row(&row)?)
    }

    async fn find_products(
        &mut self,
        products: &[ProductUuid],
    ) -> Result<Vec<ProductRecord>, DbError> {
        let uuids: Vec<Uuid> = products.iter().map(|uuid| uuid.into_uuid()).collect();

        let rows = query(FIND_PRODUCTS_SQL)
            .bind(uuids)
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(rows
            .iter()
            .map(product_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn insert_product(&mut self, product: &ProductRecord) -> Result<(), DbError> {
        query(CREATE_PRODUCT_SQL)
            .bind(product.uuid.into_uuid())
            .bind(to_db_amount(product.market_price, "market_price")?)
            .bind(to_db_optional_amount(product.discount_price, "discount_price")?)
            .bind(to_db_amount(product.stock.stock_quantity(), "stock_quantity")?)
            .bind(to_db_amount(product.stock.reserved_stock(), "reserved_stock")?)
            .bind(product.category_uuid.map(Uuid::from))
            .bind(product.sub_category_uuid.map(Uuid::from))
            .bind(product.sub_sub_category_uuid.map(Uuid::from))
            .bind(SqlxTimestamp::from(product.created_at))
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn update_product(&mut self, product: &ProductRecord) -> Result<ProductRecord, DbError> {
        let row = query(UPDATE_PRODUCT_SQL)
            .bind(product.uuid.into_uuid())
            .bind(product.version)
            .bind(to_db_amount(product.market_price, "market_price")?)
            .bind(to_db_optional_amount(product.discount_price, "discount_price")?)
            .bind(to_db_amount(product.stock.stock_quantity(), "stock_quantity")?)
            .bind(to_db_amount(product.stock.reserved_stock(), "reserved_stock")?)
            .bind(SqlxTimestamp::from(product.updated_at))
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(DbError::Conflict)?;

        Ok(product_from_row(&row)?)
    }
}

fn product_from_row(row: &PgRow) -> Result<ProductRecord, sqlx::Error> {
    let stock = StockLevel::new(
        try_get_amount(row, "stock_quantity")?,
        try_get_amount(row, "reserved_stock")?,
    )
    .map_err(|e| sqlx::Error::ColumnDecode {
        index: "reserved_stock".to_string(),
        source: Box::new(e),
    })?;

    Ok(ProductRecord {
        uuid: try_get_uuid(row, "uuid")?,
        market_price: try_get_amount(row, "market_price")?,
        discount_price: try_get_optional_amount(row, "discount_price")?,
        stock,
        category_uuid: try_get_optional_uuid(row, "category_uuid")?,
        sub_category_uuid: try_get_optional_uuid(row, "sub_category_uuid")?,
        sub_sub_category_uuid: try_get_optional_uuid(row, "sub_sub_category_uuid")?,
        version: row.try_get("version")?,
        created_at: row.try_get::<SqlxTimestamp, _>("created_at")?.to_jiff(),
        updated_at: row.try_get::<SqlxTimestamp, _>("updated_at")?.to_jiff(),
        deleted_at: row
            .try_get::<Option<SqlxTimestamp>, _>("deleted_at")?
            .map(SqlxTimestamp::to_jiff),
    })
}
