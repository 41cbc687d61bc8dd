//! Products service errors.

use thiserror::Error;

use crate::{database::DbError, retry::Retryable};

#[derive(Debug, Error)]
pub enum ProductsServiceError {
    #[error("product already exists")]
    AlreadyExists,

    #[error("product not found")]
    NotFound,

    #[error("product was modified concurrently")]
    Conflict,

    #[error("invalid product: {0}")]
    Validation(String),

    #[error("storage error")]
    Storage(#[source] DbError),
}

impl From<DbError> for ProductsServiceError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::NotFound => Self::NotFound,
            DbError::AlreadyExists => Self::AlreadyExists,
            DbError::Conflict => Self::Conflict,
            DbError::InvalidData(reason) => Self::Validation(reason),
            other => Self::Storage(other),
        }
    }
}

impl Retryable for ProductsServiceError {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}
