//! Carts service errors.

use storefront::stock::StockError;
use thiserror::Error;

use crate::{
    database::DbError,
    domain::{stock::StockServiceError, usage::UsageServiceError},
    retry::Retryable,
};

#[derive(Debug, Error)]
pub enum CartsServiceError {
    #[error("cart item or product not found")]
    NotFound,

    #[error("cart is empty")]
    EmptyCart,

    #[error("quantity must be greater than zero")]
    InvalidQuantity,

    #[error("out of stock: requested {requested}, available {available}")]
    OutOfStock { requested: u64, available: u64 },

    #[error("price changed: expected {expected}, now {actual}")]
    PriceMismatch { expected: u64, actual: u64 },

    #[error(transparent)]
    Stock(StockError),

    #[error(transparent)]
    Usage(UsageServiceError),

    #[error("invalid cart item: {0}")]
    Validation(String),

    #[error("cart was modified concurrently")]
    Conflict,

    #[error("storage error")]
    Storage(#[source] DbError),
}

impl From<DbError> for CartsServiceError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::NotFound => Self::NotFound,
            DbError::Conflict => Self::Conflict,
            DbError::InvalidData(reason) => Self::Validation(reason),
            other => Self::Storage(other),
        }
    }
}

impl From<StockServiceError> for CartsServiceError {
    fn from(error: StockServiceError) -> Self {
        match error {
            StockServiceError::NotFound => Self::NotFound,
            StockServiceError::Stock(StockError::InsufficientStock {
                requested,
                available,
            }) => Self::OutOfStock {
                requested,
                available,
            },
            StockServiceError::Stock(StockError::InvalidQuantity) => Self::InvalidQuantity,
            StockServiceError::Stock(other) => Self::Stock(other),
            StockServiceError::Conflict => Self::Conflict,
            StockServiceError::Storage(error) => Self::Storage(error),
        }
    }
}

impl From<UsageServiceError> for CartsServiceError {
    fn from(error: UsageServiceError) -> Self {
        match error {
            UsageServiceError::Conflict => Self::Conflict,
            UsageServiceError::Storage(error) => Self::Storage(error),
            other => Self::Usage(other),
        }
    }
}

impl Retryable for CartsServiceError {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}
