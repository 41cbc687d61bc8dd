//! Pricing service errors.

use thiserror::Error;

use crate::database::DbError;

#[derive(Debug, Error)]
pub enum PricingServiceError {
    #[error("product not found")]
    NotFound,

    #[error("quantity must be greater than zero")]
    InvalidQuantity,

    #[error("storage error")]
    Storage(#[source] DbError),
}

impl From<DbError> for PricingServiceError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::NotFound => Self::NotFound,
            other => Self::Storage(other),
        }
    }
}
