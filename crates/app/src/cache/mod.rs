//! Price cache
//!
//! Two tiers sit in front of price computations: a bounded in-process map and
//! an optional shared Redis tier. The cache never holds stock or usage
//! counters as the source of truth, only derived prices, so a stale or
//! missing entry is always safe to recompute. Shared-tier failures are logged
//! and treated as misses.

use std::{fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use storefront::{
    events::PromotionalEvent,
    ids::{ProductUuid, UserUuid},
};
use thiserror::Error;
use tracing::{debug, warn};

pub mod local;
pub mod redis;

pub use local::LocalCache;
pub use self::redis::RedisCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error")]
    Redis(#[from] ::redis::RedisError),
}

/// A string key/value store with expiry and pattern removal.
#[async_trait]
pub trait CacheBackend: Debug + Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Values for `keys`, position for position.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn set_many(&self, entries: &[(String, String)], ttl: Duration) -> Result<(), CacheError>;

    /// Remove every key matching a glob; returns the number removed.
    async fn remove_by_pattern(&self, pattern: &str) -> Result<u64, CacheError>;
}

/// Cache keys for price lookups.
pub mod keys {
    use super::{ProductUuid, UserUuid};

    /// Every price entry.
    pub const ALL_PRICES: &str = "pricing:*";

    fn user_segment(user: Option<UserUuid>) -> String {
        user.map_or_else(|| "0".to_string(), |user| user.to_string())
    }

    /// `pricing:product:{id}:user:{user|0}`
    #[must_use]
    pub fn price(product: ProductUuid, user: Option<UserUuid>) -> String {
        format!("pricing:product:{product}:user:{}", user_segment(user))
    }

    /// `pricing:product:{id}:user:{user|0}:qty:{quantity}`
    #[must_use]
    pub fn cart_price(product: ProductUuid, user: Option<UserUuid>, quantity: u64) -> String {
        format!("{}:qty:{quantity}", price(product, user))
    }

    /// Every entry for one product.
    #[must_use]
    pub fn product_pattern(product: ProductUuid) -> String {
        format!("pricing:product:{product}:*")
    }

    /// Every entry computed for one user.
    #[must_use]
    pub fn user_pattern(user: UserUuid) -> String {
        format!("pricing:product:*:user:{user}*")
    }
}

/// Typed JSON cache over a local tier and an optional shared tier.
#[derive(Debug, Clone)]
pub struct TwoTierCache {
    local: LocalCache,
    remote: Option<Arc<dyn CacheBackend>>,
    ttl: Duration,
}

impl TwoTierCache {
    #[must_use]
    pub fn new(local: LocalCache, remote: Option<Arc<dyn CacheBackend>>, ttl: Duration) -> Self {
        Self { local, remote, ttl }
    }

    /// Local tier only.
    #[must_use]
    pub fn local_only(capacity: usize, ttl: Duration) -> Self {
        Self::new(LocalCache::new(capacity), None, ttl)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Some(raw) = self.local.get_value(key) {
            return decode(key, &raw);
        }

        let remote = self.remote.as_ref()?;

        let raw = match remote.get(key).await {
            Ok(raw) => raw?,
            Err(error) => {
                warn!(key, %error, "shared cache read failed");
                return None;
            }
        };

        self.local.set_value(key, raw.clone(), self.ttl);

        decode(key, &raw)
    }

    /// Values for `keys`, position for position.
    pub async fn get_many<T: DeserializeOwned>(&self, keys: &[String]) -> Vec<Option<T>> {
        let mut raw: Vec<Option<String>> = keys.iter().map(|key| self.local.get_value(key)).collect();

        let missing: Vec<usize> = raw
            .iter()
            .enumerate()
            .filter_map(|(index, value)| value.is_none().then_some(index))
            .collect();

        if let Some(remote) = &self.remote
            && !missing.is_empty()
        {
            let missing_keys: Vec<String> = missing
                .iter()
                .filter_map(|&index| keys.get(index).cloned())
                .collect();

            match remote.get_many(&missing_keys).await {
                Ok(values) => {
                    for ((index, key), value) in missing.iter().zip(&missing_keys).zip(values) {
                        if let Some(value) = value {
                            self.local.set_value(key, value.clone(), self.ttl);

                            if let Some(slot) = raw.get_mut(*index) {
                                *slot = Some(value);
                            }
                        }
                    }
                }
                Err(error) => warn!(%error, count = missing_keys.len(), "shared cache bulk read failed"),
            }
        }

        keys.iter()
            .zip(raw)
            .map(|(key, value)| value.and_then(|value| decode(key, &value)))
            .collect()
    }

    pub async fn set<T: Serialize + Sync>(&self, key: &str, value: &T) {
        let Some(raw) = encode(key, value) else {
            return;
        };

        self.local.set_value(key, raw.clone(), self.ttl);

        if let Some(remote) = &self.remote
            && let Err(error) = remote.set(key, &raw, self.ttl).await
        {
            warn!(key, %error, "shared cache write failed");
        }
    }

    pub async fn set_many<T: Serialize + Sync>(&self, entries: &[(String, T)]) {
        let encoded: Vec<(String, String)> = entries
            .iter()
            .filter_map(|(key, value)| encode(key, value).map(|raw| (key.clone(), raw)))
            .collect();

        for (key, raw) in &encoded {
            self.local.set_value(key, raw.clone(), self.ttl);
        }

        if let Some(remote) = &self.remote
            && let Err(error) = remote.set_many(&encoded, self.ttl).await
        {
            warn!(%error, count = encoded.len(), "shared cache bulk write failed");
        }
    }

    /// Remove every key matching `pattern` from both tiers.
    pub async fn remove_by_pattern(&self, pattern: &str) {
        let removed = self.local.remove_matching(pattern);

        debug!(pattern, removed, "removed local cache keys");

        if let Some(remote) = &self.remote
            && let Err(error) = remote.remove_by_pattern(pattern).await
        {
            warn!(pattern, %error, "shared cache invalidation failed");
        }
    }

    pub async fn invalidate_product(&self, product: ProductUuid) {
        self.remove_by_pattern(&keys::product_pattern(product)).await;
    }

    pub async fn invalidate_user(&self, user: UserUuid) {
        self.remove_by_pattern(&keys::user_pattern(user)).await;
    }

    /// Drop entries the event may have influenced.
    ///
    /// An event without product targets applies everywhere, so every price goes.
    pub async fn invalidate_event(&self, event: &PromotionalEvent) {
        if event.products.is_empty() {
            self.remove_by_pattern(keys::ALL_PRICES).await;
            return;
        }

        for target in &event.products {
            self.invalidate_product(target.product_uuid).await;
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    serde_json::from_str(raw)
        .inspect_err(|error| warn!(key, %error, "discarding undecodable cache entry"))
        .ok()
}

fn encode<T: Serialize>(key: &str, value: &T) -> Option<String> {
    serde_json::to_string(value)
        .inspect_err(|error| warn!(key, %error, "cannot encode cache entry"))
        .ok()
}
