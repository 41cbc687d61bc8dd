//! Events service errors.

use storefront::events::EventError;
use thiserror::Error;

use crate::{database::DbError, retry::Retryable};

#[derive(Debug, Error)]
pub enum EventsServiceError {
    #[error("event already exists")]
    AlreadyExists,

    #[error("event not found")]
    NotFound,

    #[error("event references an unknown product")]
    InvalidReference,

    #[error("event was modified concurrently")]
    Conflict,

    #[error("invalid event: {0}")]
    Validation(String),

    #[error(transparent)]
    State(#[from] EventError),

    #[error("storage error")]
    Storage(#[source] DbError),
}

impl From<DbError> for EventsServiceError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::NotFound => Self::NotFound,
            DbError::AlreadyExists => Self::AlreadyExists,
            DbError::InvalidReference => Self::InvalidReference,
            DbError::Conflict => Self::Conflict,
            DbError::InvalidData(reason) => Self::Validation(reason),
            other => Self::Storage(other),
        }
    }
}

impl Retryable for EventsServiceError {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}
