//! App Context

use std::{sync::Arc, time::Duration};

use storefront::clock::{Clock, SystemClock};
use thiserror::Error;
use tracing::info;

use crate::{
    cache::{CacheBackend, CacheError, LocalCache, RedisCache, TwoTierCache},
    database::{self, Db, PgDatabase},
    domain::{
        carts::{CartsService, DbCartsService},
        events::{DbEventsService, EventsService},
        pricing::{DbPricingService, PricingService},
        products::{DbProductsService, ProductsService},
        stock::{DbStockService, StockService},
        usage::{DbUsageService, UsageService},
    },
    notifications::Publisher,
    settings::EngineSettings,
    sweeper::Sweeper,
};

#[derive(Debug, Error)]
pub enum AppInitError {
    #[error("failed to connect to database")]
    Database(#[source] sqlx::Error),

    #[error("failed to connect to cache")]
    Cache(#[source] CacheError),
}

#[derive(Clone)]
pub struct AppContext {
    pub products: Arc<dyn ProductsService>,
    pub events: Arc<dyn EventsService>,
    pub usage: Arc<dyn UsageService>,
    pub pricing: Arc<dyn PricingService>,
    pub stock: Arc<dyn StockService>,
    pub carts: Arc<dyn CartsService>,
    pub settings: EngineSettings,
}

impl AppContext {
    /// Wire every service over one store, cache and clock.
    #[must_use]
    pub fn new(
        db: Db,
        cache: TwoTierCache,
        clock: Arc<dyn Clock>,
        publisher: Arc<dyn Publisher>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            products: Arc::new(DbProductsService::new(
                db.clone(),
                cache.clone(),
                Arc::clone(&clock),
                settings,
            )),
            events: Arc::new(DbEventsService::new(
                db.clone(),
                cache.clone(),
                Arc::clone(&clock),
                settings,
            )),
            usage: Arc::new(DbUsageService::new(
                db.clone(),
                cache.clone(),
                Arc::clone(&clock),
                settings,
            )),
            pricing: Arc::new(DbPricingService::new(
                db.clone(),
                cache.clone(),
                Arc::clone(&clock),
            )),
            stock: Arc::new(DbStockService::new(db.clone(), Arc::clone(&clock), settings)),
            carts: Arc::new(DbCartsService::new(db, cache, clock, publisher, settings)),
            settings,
        }
    }

    /// Build application context from a database URL and an optional Redis URL.
    ///
    /// # Errors
    ///
    /// Returns an error when establishing the database or Redis connection fails.
    pub async fn connect(
        database_url: &str,
        redis_url: Option<&str>,
        publisher: Arc<dyn Publisher>,
        settings: EngineSettings,
    ) -> Result<Self, AppInitError> {
        let pool = database::connect(database_url)
            .await
            .map_err(AppInitError::Database)?;

        let remote = match redis_url {
            Some(url) => {
                let redis = RedisCache::connect(url).await.map_err(AppInitError::Cache)?;

                Some(Arc::new(redis) as Arc<dyn CacheBackend>)
            }
            None => {
                info!("no redis configured; using the in-process cache only");

                None
            }
        };

        let cache = TwoTierCache::new(
            LocalCache::new(settings.local_cache_capacity),
            remote,
            settings.price_cache_ttl,
        );

        Ok(Self::new(
            Db::new(PgDatabase::new(pool)),
            cache,
            Arc::new(SystemClock),
            publisher,
            settings,
        ))
    }

    #[must_use]
    pub fn sweeper(&self, interval: Duration) -> Sweeper {
        Sweeper::new(
            Arc::clone(&self.events),
            Arc::clone(&self.carts),
            interval,
            self.settings.sweep_batch_size,
        )
    }
}
