//! PostgreSQL backend

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::database::{Database, DbError, UnitOfWork};

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_storefront.sql");

/// Connect to `PostgreSQL`.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPool::connect(database_url).await
}

/// Create the schema. Safe to run repeatedly.
///
/// # Errors
///
/// Returns an error if any statement fails.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(MIGRATION_SQL).execute(pool).await?;

    Ok(())
}

/// [`Database`] backed by a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, DbError> {
        let tx = self.pool.begin().await?;

        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

/// A unit of work spanning one `PostgreSQL` transaction.
///
/// Dropping it without committing rolls the transaction back.
#[derive(Debug)]
pub struct PgUnitOfWork {
    pub(crate) tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.tx.commit().await?;

        Ok(())
    }
}

fn decode_error(column: &str, source: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    }
}

/// Read a non-negative `BIGINT` amount.
pub(crate) fn try_get_amount(row: &PgRow, column: &str) -> Result<u64, sqlx::Error> {
    let amount: i64 = row.try_get(column)?;

    u64::try_from(amount).map_err(|e| decode_error(column, e))
}

/// Read an optional non-negative `BIGINT` amount.
pub(crate) fn try_get_optional_amount(
    row: &PgRow,
    column: &str,
) -> Result<Option<u64>, sqlx::Error> {
    row.try_get::<Option<i64>, _>(column)?
        .map(|amount| u64::try_from(amount).map_err(|e| decode_error(column, e)))
        .transpose()
}

/// Read a typed UUID column.
pub(crate) fn try_get_uuid<T: From<Uuid>>(row: &PgRow, column: &str) -> Result<T, sqlx::Error> {
    row.try_get::<Uuid, _>(column).map(T::from)
}

/// Read an optional typed UUID column.
pub(crate) fn try_get_optional_uuid<T: From<Uuid>>(
    row: &PgRow,
    column: &str,
) -> Result<Option<T>, sqlx::Error> {
    Ok(row.try_get::<Option<Uuid>, _>(column)?.map(T::from))
}

/// Read a `TEXT` column holding an enum discriminant.
pub(crate) fn try_get_parsed<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.try_get(column)?;

    raw.parse().map_err(|e| decode_error(column, e))
}

/// Convert an amount for binding.
pub(crate) fn to_db_amount(amount: u64, column: &str) -> Result<i64, DbError> {
    i64::try_from(amount)
        .map_err(|_err| DbError::InvalidData(format!("{column} exceeds the storable range")))
}

/// Convert an optional amount for binding.
pub(crate) fn to_db_optional_amount(
    amount: Option<u64>,
    column: &str,
) -> Result<Option<i64>, DbError> {
    amount.map(|amount| to_db_amount(amount, column)).transpose()
}
