//! Redis cache tier

use std::{fmt, time::Duration};

use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use tracing::debug;

use crate::cache::{CacheBackend, CacheError};

/// Keys fetched per `SCAN` round trip.
const SCAN_COUNT: usize = 500;

/// Shared cache tier backed by Redis.
#[derive(Clone)]
pub struct RedisCache {
    conn_manager: ConnectionManager,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache").finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Connect to the Redis server at `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;

        Ok(Self { conn_manager })
    }
}

fn ttl_seconds(ttl: Duration) -> u64 {
    // `SET EX 0` is rejected by the server.
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn_manager.clone();

        Ok(conn.get(key).await?)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn_manager.clone();

        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await?;

        Ok(values)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();

        let _: () = conn.set_ex(key, value, ttl_seconds(ttl)).await?;

        Ok(())
    }

    async fn set_many(&self, entries: &[(String, String)], ttl: Duration) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn_manager.clone();
        let seconds = ttl_seconds(ttl);

        let mut pipe = redis::pipe();
        pipe.atomic();

        for (key, value) in entries {
            pipe.set_ex(key, value, seconds).ignore();
        }

        let _: () = pipe.query_async(&mut conn).await?;

        Ok(())
    }

    async fn remove_by_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn_manager.clone();
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }

            cursor = next;
        }

        debug!(pattern, removed, "removed redis keys");

        Ok(removed)
    }
}
