//! Pricing Service
//!
//! Prices are always derived from stored products, running events and the
//! user's usage so far. Results are cached per product, user and quantity;
//! any change that can move a price drops the affected keys.

use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;
use mockall::automock;
use rustc_hash::FxHashMap;
use storefront::{
    clock::Clock,
    eligibility::evaluate_all,
    events::{PromotionalEvent, RuleDiscount},
    ids::{ProductUuid, UserUuid},
    pricing::{CartPrice, PriceInfo, resolve_cart_price},
    rules::{CartLine, Customer, EvaluationContext},
    selection::select_best,
};
use tracing::{Span, debug, warn};

use crate::{
    cache::{TwoTierCache, keys},
    database::{Db, DbError, UnitOfWork},
    domain::{pricing::errors::PricingServiceError, products::records::ProductRecord},
};

/// Override carried by `event`'s winning rule for a cart made of `lines`.
///
/// Only rules that can be judged before checkout pass here; the payment
/// method and addresses are unknown until then.
fn rule_override(
    event: &PromotionalEvent,
    lines: Vec<CartLine>,
    user: Option<UserUuid>,
) -> Option<RuleDiscount> {
    let overrides = event
        .rules
        .iter()
        .any(|rule| rule.deleted_at.is_none() && rule.discount.is_some());

    if !overrides {
        return None;
    }

    let mut ctx = EvaluationContext::from_lines(lines);

    if let Some(user) = user {
        ctx = ctx.with_customer(Customer {
            uuid: user,
            addresses: Vec::new(),
        });
    }

    evaluate_all(event, &ctx).discount_rule
}

/// Price `quantity` units of `product` against `events`.
///
/// `others` are the rest of the user's cart, used to judge event rules.
/// Discount failures fall back to the regular price.
async fn quote_against(
    uow: &mut dyn UnitOfWork,
    events: &[PromotionalEvent],
    product: &ProductRecord,
    user: Option<UserUuid>,
    quantity: u64,
    others: &[CartLine],
    now: Timestamp,
) -> Result<CartPrice, DbError> {
    let pricing = product.pricing();
    let event = select_best(events, product.uuid, now);

    let usage = match (event, user) {
        (Some(event), Some(user)) => {
            Some(uow.usage_count(event.uuid, user, Some(product.uuid)).await?)
        }
        _ => None,
    };

    let rule = event.and_then(|event| {
        let mut lines = others.to_vec();
        lines.push(product.cart_line(quantity, pricing.base_price()));

        rule_override(event, lines, user)
    });

    let price = resolve_cart_price(&pricing, event, rule.as_ref(), usage, quantity)
        .unwrap_or_else(|error| {
            warn!(
                product_uuid = %product.uuid,
                event_uuid = ?event.map(|event| event.uuid),
                %error,
                "discount calculation failed; charging the regular price"
            );

            CartPrice::regular(&pricing, quantity)
        });

    Ok(price)
}

/// Price `quantity` units of `product` for `user` inside `uow`.
pub(crate) async fn quote_in(
    uow: &mut dyn UnitOfWork,
    product: &ProductRecord,
    user: Option<UserUuid>,
    quantity: u64,
    others: &[CartLine],
    now: Timestamp,
) -> Result<CartPrice, DbError> {
    let events = uow.running_events(now).await?;

    quote_against(uow, &events, product, user, quantity, others, now).await
}

#[derive(Debug, Clone)]
pub struct DbPricingService {
    db: Db,
    cache: TwoTierCache,
    clock: Arc<dyn Clock>,
}

impl DbPricingService {
    #[must_use]
    pub fn new(db: Db, cache: TwoTierCache, clock: Arc<dyn Clock>) -> Self {
        Self { db, cache, clock }
    }

    async fn compute(
        &self,
        product: ProductUuid,
        user: Option<UserUuid>,
        quantity: u64,
    ) -> Result<CartPrice, PricingServiceError> {
        let now = self.clock.now();
        let mut uow = self.db.begin().await?;

        let record = uow.get_product(product).await?;
        let price = quote_in(&mut *uow, &record, user, quantity, &[], now).await?;

        uow.commit().await?;

        Ok(price)
    }
}

#[async_trait]
impl PricingService for DbPricingService {
    #[tracing::instrument(
        name = "pricing.service.get_effective_price",
        skip(self),
        fields(
            product_uuid = %product,
            user_uuid = ?user,
            cache_hit = tracing::field::Empty,
            effective_price = tracing::field::Empty
        ),
        err
    )]
    async fn get_effective_price(
        &self,
        product: ProductUuid,
        user: Option<UserUuid>,
    ) -> Result<PriceInfo, PricingServiceError> {
        let span = Span::current();
        let key = keys::price(product, user);

        if let Some(info) = self.cache.get::<PriceInfo>(&key).await {
            span.record("cache_hit", true);
            span.record("effective_price", info.effective_price);

            return Ok(info);
        }

        let info = self.compute(product, user, 1).await?.info;

        self.cache.set(&key, &info).await;

        span.record("cache_hit", false);
        span.record("effective_price", info.effective_price);

        Ok(info)
    }

    #[tracing::instrument(
        name = "pricing.service.get_cart_price",
        skip(self),
        fields(
            product_uuid = %product,
            user_uuid = ?user,
            cache_hit = tracing::field::Empty,
            event_eligible_quantity = tracing::field::Empty
        ),
        err
    )]
    async fn get_cart_price(
        &self,
        product: ProductUuid,
        quantity: u64,
        user: Option<UserUuid>,
    ) -> Result<CartPrice, PricingServiceError> {
        if quantity == 0 {
            return Err(PricingServiceError::InvalidQuantity);
        }

        let span = Span::current();
        let key = keys::cart_price(product, user, quantity);

        if let Some(price) = self.cache.get::<CartPrice>(&key).await {
            span.record("cache_hit", true);
            span.record("event_eligible_quantity", price.event_eligible_quantity);

            return Ok(price);
        }

        let price = self.compute(product, user, quantity).await?;

        self.cache.set(&key, &price).await;

        span.record("cache_hit", false);
        span.record("event_eligible_quantity", price.event_eligible_quantity);

        Ok(price)
    }

    #[tracing::instrument(
        name = "pricing.service.get_effective_prices",
        skip(self, products),
        fields(user_uuid = ?user, requested = products.len(), cached = tracing::field::Empty),
        err
    )]
    async fn get_effective_prices(
        &self,
        products: Vec<ProductUuid>,
        user: Option<UserUuid>,
    ) -> Result<Vec<PriceInfo>, PricingServiceError> {
        let cache_keys: Vec<String> = products
            .iter()
            .map(|product| keys::price(*product, user))
            .collect();

        let cached = self.cache.get_many::<PriceInfo>(&cache_keys).await;

        let missing: Vec<ProductUuid> = products
            .iter()
            .zip(&cached)
            .filter_map(|(product, hit)| hit.is_none().then_some(*product))
            .collect();

        Span::current().record("cached", products.len() - missing.len());

        let mut computed: FxHashMap<ProductUuid, PriceInfo> = FxHashMap::default();

        if !missing.is_empty() {
            let now = self.clock.now();
            let mut uow = self.db.begin().await?;

            let records = uow.find_products(&missing).await?;
            let events = uow.running_events(now).await?;

            for record in &records {
                let price = quote_against(&mut *uow, &events, record, user, 1, &[], now).await?;

                computed.insert(record.uuid, price.info);
            }

            uow.commit().await?;

            let entries: Vec<(String, PriceInfo)> = computed
                .values()
                .map(|info| (keys::price(info.product_uuid, user), *info))
                .collect();

            self.cache.set_many(&entries).await;

            debug!(computed = entries.len(), "priced uncached products");
        }

        let prices = products
            .iter()
            .zip(cached)
            .filter_map(|(product, hit)| hit.or_else(|| computed.get(product).copied()))
            .collect();

        Ok(prices)
    }
}

#[automock]
#[async_trait]
pub trait PricingService: Send + Sync {
    /// Unit price of `product` for `user`.
    ///
    /// Without a user an applicable event is reported but not applied.
    async fn get_effective_price(
        &self,
        product: ProductUuid,
        user: Option<UserUuid>,
    ) -> Result<PriceInfo, PricingServiceError>;

    /// Price of `quantity` units, split between event and regular units.
    async fn get_cart_price(
        &self,
        product: ProductUuid,
        quantity: u64,
        user: Option<UserUuid>,
    ) -> Result<CartPrice, PricingServiceError>;

    /// Unit prices for many products in request order; unknown products are skipped.
    async fn get_effective_prices(
        &self,
        products: Vec<ProductUuid>,
        user: Option<UserUuid>,
    ) -> Result<Vec<PriceInfo>, PricingServiceError>;
}
