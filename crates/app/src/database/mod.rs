//! Database access
//!
//! Services talk to storage through a [`UnitOfWork`]: a set of repository
//! reads and writes that commit atomically. Dropping a unit of work without
//! calling [`UnitOfWork::commit`] discards every write it staged.
//!
//! Versioned entities (products, events, cart items) are updated with an
//! optimistic concurrency check; a stale version surfaces as
//! [`DbError::Conflict`] and the whole unit of work is expected to be retried.

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use sqlx::error::ErrorKind;
use thiserror::Error;

use crate::domain::{
    carts::repository::CartItemsRepository, events::repository::EventsRepository,
    orders::repository::OrdersRepository, products::repository::ProductsRepository,
    usage::repository::UsageRepository,
};

#[cfg(test)]
pub mod memory;
pub mod postgres;

#[cfg(test)]
pub use memory::MemoryDatabase;
pub use postgres::{PgDatabase, PgUnitOfWork, connect, migrate};

/// PostgreSQL serialization failure.
const SERIALIZATION_FAILURE: &str = "40001";

/// PostgreSQL deadlock detected.
const DEADLOCK_DETECTED: &str = "40P01";

/// Storage errors shared by every backend.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("record not found")]
    NotFound,

    #[error("record already exists")]
    AlreadyExists,

    #[error("record was modified concurrently")]
    Conflict,

    #[error("related resource not found")]
    InvalidReference,

    #[error("missing required data")]
    MissingRequiredData,

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("storage error")]
    Sql(#[source] sqlx::Error),
}

impl DbError {
    /// Whether retrying the unit of work may succeed.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

impl From<sqlx::Error> for DbError {
    fn from(error: sqlx::Error) -> Self {
        if matches!(error, sqlx::Error::RowNotFound) {
            return Self::NotFound;
        }

        let Some(db_error) = error.as_database_error() else {
            return Self::Sql(error);
        };

        if matches!(
            db_error.code().as_deref(),
            Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED)
        ) {
            return Self::Conflict;
        }

        match db_error.kind() {
            ErrorKind::UniqueViolation => Self::AlreadyExists,
            ErrorKind::ForeignKeyViolation => Self::InvalidReference,
            ErrorKind::NotNullViolation => Self::MissingRequiredData,
            ErrorKind::CheckViolation => Self::InvalidData(db_error.message().to_string()),
            _ => Self::Sql(error),
        }
    }
}

/// A batch of repository operations that commits atomically.
#[async_trait]
pub trait UnitOfWork:
    ProductsRepository
    + EventsRepository
    + UsageRepository
    + CartItemsRepository
    + OrdersRepository
    + Send
{
    /// Make every staged write visible.
    async fn commit(self: Box<Self>) -> Result<(), DbError>;
}

/// A transactional store.
#[async_trait]
pub trait Database: Debug + Send + Sync {
    /// Start a unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, DbError>;
}

/// Cloneable handle to the configured [`Database`].
#[derive(Debug, Clone)]
pub struct Db {
    inner: Arc<dyn Database>,
}

impl Db {
    #[must_use]
    pub fn new(database: impl Database + 'static) -> Self {
        Self {
            inner: Arc::new(database),
        }
    }

    /// Start a unit of work.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend cannot open a transaction.
    pub async fn begin(&self) -> Result<Box<dyn UnitOfWork>, DbError> {
        self.inner.begin().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let error = DbError::from(sqlx::Error::RowNotFound);

        assert!(matches!(error, DbError::NotFound), "got {error:?}");
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(DbError::Conflict.is_conflict(), "conflict should retry");
        assert!(!DbError::NotFound.is_conflict(), "not found should not retry");
    }
}
