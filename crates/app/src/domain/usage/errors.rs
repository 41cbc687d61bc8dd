//! Usage service errors.

use storefront::events::EventError;
use thiserror::Error;

use crate::{database::DbError, retry::Retryable};

#[derive(Debug, Error)]
pub enum UsageServiceError {
    #[error("event or usage not found")]
    NotFound,

    #[error("usage already recorded for this order")]
    AlreadyRecorded,

    #[error("event usage limit reached: requested {requested}, remaining {remaining}")]
    LimitReached { requested: u64, remaining: u64 },

    #[error("user usage limit reached: used {used} of {limit}")]
    UserLimitReached { used: u64, limit: u64 },

    #[error("event is not running")]
    EventNotRunning,

    #[error("quantity must be greater than zero")]
    InvalidQuantity,

    #[error("usage was modified concurrently")]
    Conflict,

    #[error("storage error")]
    Storage(#[source] DbError),
}

impl From<DbError> for UsageServiceError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::NotFound => Self::NotFound,
            DbError::AlreadyExists => Self::AlreadyRecorded,
            DbError::Conflict => Self::Conflict,
            other => Self::Storage(other),
        }
    }
}

impl From<EventError> for UsageServiceError {
    fn from(error: EventError) -> Self {
        match error {
            EventError::UsageLimitReached {
                requested,
                remaining,
            } => Self::LimitReached {
                requested,
                remaining,
            },
            EventError::InvalidTransition { .. } => Self::EventNotRunning,
        }
    }
}

impl Retryable for UsageServiceError {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}
