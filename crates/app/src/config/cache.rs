//! Cache Config

use clap::Args;

/// Price cache settings.
#[derive(Debug, Args)]
pub(crate) struct CacheConfig {
    /// Redis connection string; omit to cache in-process only
    #[arg(long, env = "REDIS_URL", hide_env_values = true)]
    pub redis_url: Option<String>,

    /// Lifetime of a cached price
    #[arg(long, env = "PRICE_CACHE_TTL_SECONDS", default_value_t = 300_u64)]
    pub price_cache_ttl_seconds: u64,

    /// Entries kept by the in-process tier
    #[arg(long, env = "LOCAL_CACHE_CAPACITY", default_value_t = 10_000_usize)]
    pub local_cache_capacity: usize,
}
