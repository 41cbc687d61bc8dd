//! Engine Config

use std::time::Duration;

use clap::Args;
use jiff::SignedDuration;
use storefront_app::{retry::RetryPolicy, settings::EngineSettings};

use crate::config::cache::CacheConfig;

/// Engine tuning.
#[derive(Debug, Args)]
pub(crate) struct EngineConfig {
    /// How long a cart item holds its stock reservation
    #[arg(long, env = "CART_ITEM_TTL_MINUTES", default_value_t = 30_i64)]
    pub cart_item_ttl_minutes: i64,

    /// Accepted gap between a client's expected total and the computed one, in minor units
    #[arg(long, env = "PRICE_TOLERANCE", default_value_t = 1_u64)]
    pub price_tolerance: u64,

    /// Attempts per unit of work that loses a concurrency race
    #[arg(long, env = "CONFLICT_RETRY_ATTEMPTS", default_value_t = 3_u32)]
    pub conflict_retry_attempts: u32,

    /// Delay before the first conflict retry
    #[arg(long, env = "CONFLICT_RETRY_DELAY_MS", default_value_t = 25_u64)]
    pub conflict_retry_delay_ms: u64,

    /// Upper bound on evaluating one event's rules
    #[arg(long, env = "RULE_EVALUATION_TIMEOUT_MS", default_value_t = 250_u64)]
    pub rule_evaluation_timeout_ms: u64,

    /// Time between background sweeps
    #[arg(long, env = "SWEEP_INTERVAL_SECONDS", default_value_t = 120_u64)]
    pub sweep_interval_seconds: u64,

    /// Rows handled per sweep step
    #[arg(long, env = "SWEEP_BATCH_SIZE", default_value_t = 500_usize)]
    pub sweep_batch_size: usize,
}

impl EngineConfig {
    /// Runtime settings for the services.
    pub(crate) fn settings(&self, cache: &CacheConfig) -> EngineSettings {
        EngineSettings {
            cart_item_ttl: SignedDuration::from_mins(self.cart_item_ttl_minutes),
            price_tolerance: self.price_tolerance,
            retry: RetryPolicy {
                max_attempts: self.conflict_retry_attempts.max(1),
                initial_delay: Duration::from_millis(self.conflict_retry_delay_ms),
                ..RetryPolicy::default()
            },
            rule_evaluation_timeout: Duration::from_millis(self.rule_evaluation_timeout_ms),
            price_cache_ttl: Duration::from_secs(cache.price_cache_ttl_seconds),
            local_cache_capacity: cache.local_cache_capacity,
            sweep_interval: Duration::from_secs(self.sweep_interval_seconds),
            sweep_batch_size: self.sweep_batch_size,
        }
    }
}
