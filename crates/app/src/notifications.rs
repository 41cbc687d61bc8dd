//! Notifications
//!
//! Fire-and-forget publication of facts to a downstream event log. Delivery
//! guarantees belong to the transport; callers only log failures.

use async_trait::async_trait;
use mockall::automock;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Topic for completed checkouts.
pub const ORDERS_CONFIRMED: &str = "orders.confirmed";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish to {topic} failed: {reason}")]
    Transport { topic: String, reason: String },
}

#[automock]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload` on `topic`.
    async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
        correlation_id: Uuid,
    ) -> Result<(), PublishError>;
}

/// Publisher that writes each message to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
        correlation_id: Uuid,
    ) -> Result<(), PublishError> {
        info!(topic, %correlation_id, %payload, "published notification");

        Ok(())
    }
}
