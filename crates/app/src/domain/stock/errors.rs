//! Stock service errors.

use storefront::stock::StockError;
use thiserror::Error;

use crate::{database::DbError, retry::Retryable};

#[derive(Debug, Error)]
pub enum StockServiceError {
    #[error("product not found")]
    NotFound,

    #[error(transparent)]
    Stock(#[from] StockError),

    #[error("stock was modified concurrently")]
    Conflict,

    #[error("storage error")]
    Storage(#[source] DbError),
}

impl From<DbError> for StockServiceError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::NotFound => Self::NotFound,
            DbError::Conflict => Self::Conflict,
            other => Self::Storage(other),
        }
    }
}

impl Retryable for StockServiceError {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}
