//! Engine settings

use std::time::Duration;

use jiff::SignedDuration;

use crate::retry::RetryPolicy;

/// Runtime knobs shared by the services.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    /// How long a cart item holds its reservation.
    pub cart_item_ttl: SignedDuration,
    /// Largest accepted gap between a client's expected total and the computed one.
    pub price_tolerance: u64,
    pub retry: RetryPolicy,
    /// Upper bound on a single rule aggregation.
    pub rule_evaluation_timeout: Duration,
    pub price_cache_ttl: Duration,
    pub local_cache_capacity: usize,
    pub sweep_interval: Duration,
    /// Rows handled per sweep step.
    pub sweep_batch_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cart_item_ttl: SignedDuration::from_mins(30),
            price_tolerance: 1,
            retry: RetryPolicy::default(),
            rule_evaluation_timeout: Duration::from_millis(250),
            price_cache_ttl: Duration::from_secs(300),
            local_cache_capacity: 10_000,
            sweep_interval: Duration::from_secs(120),
            sweep_batch_size: 500,
        }
    }
}
