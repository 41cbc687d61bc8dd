//! Carts Service
//!
//! Each operation runs as one unit of work: the price check, the stock
//! mutation and the cart write commit together or not at all. Expired items
//! are treated as absent by every read and have their stock released as soon
//! as a request touches them.

use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;
use mockall::automock;
use rustc_hash::{FxHashMap, FxHashSet};
use storefront::{
    clock::Clock,
    discounts::Discount,
    events::{PromotionalEvent, RuleDiscount},
    ids::{CartItemUuid, EventUuid, OrderItemUuid, OrderUuid, ReservationToken, UserUuid},
    pricing::CartPrice,
    rules::{CartLine, Customer, EvaluationContext},
};
use tracing::{Span, debug, info, warn};

use crate::{
    cache::TwoTierCache,
    database::{Db, DbError, UnitOfWork},
    domain::{
        carts::{
            data::{Checkout, NewCartItem, PricedCartItem},
            errors::CartsServiceError,
            records::CartItemRecord,
        },
        events::evaluate_bounded,
        orders::records::{OrderItemRecord, OrderRecord},
        pricing::quote_in,
        stock::{adjust_in, confirm_in, release_in, reserve_in},
        usage::{data::NewUsage, record_in},
    },
    notifications::{ORDERS_CONFIRMED, Publisher},
    retry::retry_on_conflict,
    settings::EngineSettings,
};

/// An event that still applies when the order is placed.
struct Applicable {
    event: PromotionalEvent,
    rule: Option<RuleDiscount>,
}

impl Applicable {
    /// Per-unit discount for `item` under the re-evaluated rules.
    fn discount_for(&self, item: &CartItemRecord) -> Option<Discount> {
        self.event
            .unit_discount(item.product_uuid, item.unit_price, self.rule.as_ref())
            .inspect_err(|error| {
                warn!(
                    event_uuid = %self.event.uuid,
                    cart_item_uuid = %item.uuid,
                    %error,
                    "discount calculation failed at checkout; charging the regular price"
                );
            })
            .ok()
    }
}

fn check_expected(
    expected: Option<u64>,
    actual: u64,
    tolerance: u64,
) -> Result<(), CartsServiceError> {
    if let Some(expected) = expected
        && expected.abs_diff(actual) > tolerance
    {
        return Err(CartsServiceError::PriceMismatch { expected, actual });
    }

    Ok(())
}

/// Copy the resolved price onto `item`.
fn freeze(item: &mut CartItemRecord, price: &CartPrice) {
    item.unit_price = price.info.base_price;
    item.event_unit_price = price.event_unit_price;
    item.event_quantity = price.event_eligible_quantity;
    item.event_discount_amount = price.total_discount;
    item.applied_event_uuid = if price.event_eligible_quantity > 0 {
        price.info.event_uuid
    } else {
        None
    };
}

/// Soft-delete `item` without touching stock.
async fn close_in(
    uow: &mut dyn UnitOfWork,
    mut item: CartItemRecord,
    now: Timestamp,
) -> Result<CartItemRecord, CartsServiceError> {
    item.is_stock_reserved = false;
    item.deleted_at = Some(now);
    item.updated_at = now;

    Ok(uow.update_cart_item(&item).await?)
}

/// Release `item`'s reservation and soft-delete it.
async fn discard_in(
    uow: &mut dyn UnitOfWork,
    item: CartItemRecord,
    now: Timestamp,
) -> Result<CartItemRecord, CartsServiceError> {
    if item.is_stock_reserved {
        release_in(uow, item.product_uuid, item.quantity, now).await?;
    }

    close_in(uow, item, now).await
}

/// Rule-evaluation lines for `items`.
async fn cart_lines_in(
    uow: &mut dyn UnitOfWork,
    items: &[CartItemRecord],
) -> Result<Vec<CartLine>, CartsServiceError> {
    let mut lines = Vec::with_capacity(items.len());

    for item in items {
        let product = uow.get_product(item.product_uuid).await?;

        lines.push(product.cart_line(item.quantity, item.unit_price));
    }

    Ok(lines)
}

/// A user's live items; expired ones are discarded on the way.
async fn live_items_in(
    uow: &mut dyn UnitOfWork,
    user: UserUuid,
    now: Timestamp,
) -> Result<Vec<CartItemRecord>, CartsServiceError> {
    let mut live = Vec::new();

    for item in uow.user_cart_items(user).await? {
        if item.is_live(now) {
            live.push(item);
        } else {
            debug!(cart_item_uuid = %item.uuid, "discarding expired cart item");

            discard_in(uow, item, now).await?;
        }
    }

    Ok(live)
}

#[derive(Clone)]
pub struct DbCartsService {
    db: Db,
    cache: TwoTierCache,
    clock: Arc<dyn Clock>,
    publisher: Arc<dyn Publisher>,
    settings: EngineSettings,
}

impl std::fmt::Debug for DbCartsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbCartsService")
            .field("db", &self.db)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DbCartsService {
    #[must_use]
    pub fn new(
        db: Db,
        cache: TwoTierCache,
        clock: Arc<dyn Clock>,
        publisher: Arc<dyn Publisher>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            db,
            cache,
            clock,
            publisher,
            settings,
        }
    }

    fn expiry(&self, now: Timestamp) -> Result<Timestamp, CartsServiceError> {
        now.checked_add(self.settings.cart_item_ttl)
            .map_err(|error| CartsServiceError::Validation(error.to_string()))
    }

    /// Fetch `item` if it belongs to `user`.
    async fn owned_item(
        uow: &mut dyn UnitOfWork,
        user: UserUuid,
        item: CartItemUuid,
    ) -> Result<CartItemRecord, CartsServiceError> {
        let record = uow.get_cart_item(item).await?;

        if record.user_uuid != user {
            return Err(CartsServiceError::NotFound);
        }

        Ok(record)
    }

    async fn try_add_item(
        &self,
        user: UserUuid,
        item: &NewCartItem,
    ) -> Result<PricedCartItem, CartsServiceError> {
        let now = self.clock.now();
        let mut uow = self.db.begin().await?;

        let (same, others): (Vec<_>, Vec<_>) = live_items_in(&mut *uow, user, now)
            .await?
            .into_iter()
            .partition(|live| live.product_uuid == item.product_uuid);

        let existing = same.into_iter().next();
        let others = cart_lines_in(&mut *uow, &others).await?;
        let product = uow.get_product(item.product_uuid).await?;

        let quantity = existing
            .as_ref()
            .map_or(0, |current| current.quantity)
            .saturating_add(item.quantity);

        let price = quote_in(&mut *uow, &product, Some(user), quantity, &others, now).await?;

        check_expected(item.expected_total, price.total_price, self.settings.price_tolerance)?;

        let expires_at = self.expiry(now)?;

        let record = match existing {
            Some(mut current) => {
                adjust_in(&mut *uow, product.uuid, current.quantity, quantity, now).await?;

                current.quantity = quantity;
                current.expires_at = expires_at;
                current.updated_at = now;
                freeze(&mut current, &price);

                uow.update_cart_item(&current).await?
            }
            None => {
                reserve_in(&mut *uow, product.uuid, quantity, now).await?;

                let mut record = CartItemRecord {
                    uuid: CartItemUuid::new(),
                    user_uuid: user,
                    product_uuid: product.uuid,
                    quantity,
                    unit_price: 0,
                    event_unit_price: 0,
                    event_quantity: 0,
                    event_discount_amount: 0,
                    applied_event_uuid: None,
                    reservation_token: ReservationToken::new(),
                    is_stock_reserved: true,
                    expires_at,
                    version: 0,
                    created_at: now,
                    updated_at: now,
                    deleted_at: None,
                };

                freeze(&mut record, &price);

                uow.insert_cart_item(&record).await?;

                record
            }
        };

        uow.commit().await?;

        Ok(PricedCartItem {
            item: record,
            price,
        })
    }

    async fn try_update_quantity(
        &self,
        user: UserUuid,
        item: CartItemUuid,
        quantity: u64,
        expected_total: Option<u64>,
    ) -> Result<PricedCartItem, CartsServiceError> {
        let now = self.clock.now();
        let mut uow = self.db.begin().await?;

        let mut record = Self::owned_item(&mut *uow, user, item).await?;

        if !record.is_live(now) {
            discard_in(&mut *uow, record, now).await?;
            uow.commit().await?;

            return Err(CartsServiceError::NotFound);
        }

        let others: Vec<CartItemRecord> = live_items_in(&mut *uow, user, now)
            .await?
            .into_iter()
            .filter(|live| live.uuid != record.uuid)
            .collect();

        let others = cart_lines_in(&mut *uow, &others).await?;
        let product = uow.get_product(record.product_uuid).await?;
        let price = quote_in(&mut *uow, &product, Some(user), quantity, &others, now).await?;

        check_expected(expected_total, price.total_price, self.settings.price_tolerance)?;

        adjust_in(&mut *uow, product.uuid, record.quantity, quantity, now).await?;

        record.quantity = quantity;
        record.expires_at = self.expiry(now)?;
        record.updated_at = now;
        freeze(&mut record, &price);

        let updated = uow.update_cart_item(&record).await?;

        uow.commit().await?;

        Ok(PricedCartItem {
            item: updated,
            price,
        })
    }

    async fn try_remove_item(
        &self,
        user: UserUuid,
        item: CartItemUuid,
    ) -> Result<CartItemRecord, CartsServiceError> {
        let now = self.clock.now();
        let mut uow = self.db.begin().await?;

        let record = Self::owned_item(&mut *uow, user, item).await?;
        let removed = discard_in(&mut *uow, record, now).await?;

        uow.commit().await?;

        Ok(removed)
    }

    async fn try_list_items(&self, user: UserUuid) -> Result<Vec<CartItemRecord>, CartsServiceError> {
        let now = self.clock.now();
        let mut uow = self.db.begin().await?;

        let live = live_items_in(&mut *uow, user, now).await?;

        uow.commit().await?;

        Ok(live)
    }

    /// Discard one item if it is still expired; `false` when someone else got there first.
    async fn try_reap_item(&self, item: CartItemUuid) -> Result<bool, CartsServiceError> {
        let now = self.clock.now();
        let mut uow = self.db.begin().await?;

        let record = match uow.get_cart_item(item).await {
            Ok(record) => record,
            Err(DbError::NotFound) => return Ok(false),
            Err(error) => return Err(error.into()),
        };

        if record.is_live(now) {
            return Ok(false);
        }

        discard_in(&mut *uow, record, now).await?;
        uow.commit().await?;

        Ok(true)
    }

    /// Events of `items` that still run and whose rules accept the final cart.
    async fn applicable_events(
        &self,
        uow: &mut dyn UnitOfWork,
        items: &[CartItemRecord],
        ctx: &EvaluationContext,
        now: Timestamp,
    ) -> Result<FxHashMap<EventUuid, Applicable>, CartsServiceError> {
        let events: FxHashSet<EventUuid> = items
            .iter()
            .filter_map(|item| item.applied_event_uuid)
            .collect();

        let mut applicable = FxHashMap::default();

        for event_uuid in events {
            let event = match uow.get_event(event_uuid).await {
                Ok(event) => event,
                Err(DbError::NotFound) => continue,
                Err(error) => return Err(error.into()),
            };

            if !event.is_running(now) {
                info!(event_uuid = %event_uuid, "event ended before checkout");

                continue;
            }

            let result = evaluate_bounded(
                event.clone(),
                ctx.clone(),
                self.settings.rule_evaluation_timeout,
            )
            .await;

            if !result.is_eligible {
                info!(
                    event_uuid = %event_uuid,
                    failed_rules = result.failed_rules.len(),
                    error = ?result.error,
                    "event rules reject the cart at checkout"
                );

                continue;
            }

            applicable.insert(
                event_uuid,
                Applicable {
                    event,
                    rule: result.discount_rule,
                },
            );
        }

        Ok(applicable)
    }

    async fn try_checkout(
        &self,
        user: UserUuid,
        checkout: &Checkout,
        order_uuid: OrderUuid,
    ) -> Result<OrderRecord, CartsServiceError> {
        let now = self.clock.now();
        let mut uow = self.db.begin().await?;

        let items = live_items_in(&mut *uow, user, now).await?;

        if items.is_empty() {
            uow.commit().await?;

            return Err(CartsServiceError::EmptyCart);
        }

        let lines = cart_lines_in(&mut *uow, &items).await?;

        let ctx = EvaluationContext::from_lines(lines)
            .with_customer(Customer {
                uuid: user,
                addresses: checkout.addresses.clone(),
            })
            .with_payment_method(checkout.payment_method.clone());

        let mut applicable = self.applicable_events(&mut *uow, &items, &ctx, now).await?;

        let mut order_items = Vec::with_capacity(items.len());
        let mut free_shipping = false;

        for item in items {
            let mut unit_discount = 0;
            let mut event_quantity = 0;
            let mut event_uuid = None;

            if let Some(applied_uuid) = item.applied_event_uuid
                && let Some(applied) = applicable.get_mut(&applied_uuid)
                && let Some(discount) = applied.discount_for(&item)
            {
                let used = uow
                    .usage_count(applied_uuid, user, Some(item.product_uuid))
                    .await?;

                let allowed = item
                    .event_quantity
                    .min(applied.event.max_usage_per_user.saturating_sub(used))
                    .min(applied.event.remaining_usage());

                if allowed > 0 {
                    let usage = NewUsage {
                        event_uuid: applied_uuid,
                        user_uuid: user,
                        order_uuid: Some(order_uuid),
                        product_uuid: Some(item.product_uuid),
                        quantity: allowed,
                        discount_applied: discount.amount.saturating_mul(allowed),
                    };

                    record_in(&mut *uow, &mut applied.event, &usage, now).await?;

                    unit_discount = discount.amount;
                    event_quantity = allowed;
                    event_uuid = Some(applied_uuid);
                    free_shipping |= discount.free_shipping;
                }

                if allowed < item.event_quantity {
                    debug!(
                        cart_item_uuid = %item.uuid,
                        frozen = item.event_quantity,
                        allowed,
                        "event units capped at checkout"
                    );
                }
            }

            let regular_quantity = item.quantity.saturating_sub(event_quantity);
            let discount_amount = unit_discount.saturating_mul(event_quantity);

            let line_total = event_quantity
                .saturating_mul(item.unit_price.saturating_sub(unit_discount))
                .saturating_add(regular_quantity.saturating_mul(item.unit_price));

            confirm_in(&mut *uow, item.product_uuid, item.quantity, now).await?;

            order_items.push(OrderItemRecord {
                uuid: OrderItemUuid::new(),
                product_uuid: item.product_uuid,
                quantity: item.quantity,
                unit_price: item.unit_price,
                event_uuid,
                event_quantity,
                discount_amount,
                line_total,
            });

            close_in(&mut *uow, item, now).await?;
        }

        let subtotal = order_items.iter().fold(0_u64, |acc, line| {
            acc.saturating_add(line.quantity.saturating_mul(line.unit_price))
        });

        let discount_total = order_items
            .iter()
            .fold(0_u64, |acc, line| acc.saturating_add(line.discount_amount));

        let total = subtotal.saturating_sub(discount_total);

        check_expected(checkout.expected_total, total, self.settings.price_tolerance)?;

        let order = OrderRecord {
            uuid: order_uuid,
            user_uuid: user,
            payment_method: checkout.payment_method.clone(),
            subtotal,
            discount_total,
            total,
            free_shipping,
            items: order_items,
            created_at: now,
        };

        uow.insert_order(&order).await?;
        uow.commit().await?;

        Ok(order)
    }

    async fn publish_confirmation(&self, order: &OrderRecord) {
        let payload = match serde_json::to_value(order) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(order_uuid = %order.uuid, %error, "cannot encode order confirmation");

                return;
            }
        };

        if let Err(error) = self
            .publisher
            .publish(ORDERS_CONFIRMED, payload, order.uuid.into_uuid())
            .await
        {
            warn!(order_uuid = %order.uuid, %error, "order confirmation was not published");
        }
    }
}

#[async_trait]
impl CartsService for DbCartsService {
    #[tracing::instrument(
        name = "carts.service.add_item",
        skip(self, item),
        fields(
            user_uuid = %user,
            product_uuid = %item.product_uuid,
            quantity = item.quantity,
            cart_item_uuid = tracing::field::Empty,
            event_eligible_quantity = tracing::field::Empty
        ),
        err
    )]
    async fn add_item(
        &self,
        user: UserUuid,
        item: NewCartItem,
    ) -> Result<PricedCartItem, CartsServiceError> {
        if item.quantity == 0 {
            return Err(CartsServiceError::InvalidQuantity);
        }

        let priced =
            retry_on_conflict(&self.settings.retry, || self.try_add_item(user, &item)).await?;

        let span = Span::current();

        span.record("cart_item_uuid", tracing::field::display(priced.item.uuid));
        span.record("event_eligible_quantity", priced.price.event_eligible_quantity);

        info!(
            total_quantity = priced.item.quantity,
            line_total = priced.price.total_price,
            "added cart item"
        );

        Ok(priced)
    }

    #[tracing::instrument(
        name = "carts.service.update_quantity",
        skip(self),
        fields(user_uuid = %user, cart_item_uuid = %item),
        err
    )]
    async fn update_quantity(
        &self,
        user: UserUuid,
        item: CartItemUuid,
        quantity: u64,
        expected_total: Option<u64>,
    ) -> Result<PricedCartItem, CartsServiceError> {
        if quantity == 0 {
            return Err(CartsServiceError::InvalidQuantity);
        }

        let priced = retry_on_conflict(&self.settings.retry, || {
            self.try_update_quantity(user, item, quantity, expected_total)
        })
        .await?;

        info!(line_total = priced.price.total_price, "updated cart item quantity");

        Ok(priced)
    }

    #[tracing::instrument(
        name = "carts.service.remove_item",
        skip(self),
        fields(user_uuid = %user, cart_item_uuid = %item),
        err
    )]
    async fn remove_item(&self, user: UserUuid, item: CartItemUuid) -> Result<(), CartsServiceError> {
        let removed =
            retry_on_conflict(&self.settings.retry, || self.try_remove_item(user, item)).await?;

        info!(released = removed.quantity, "removed cart item");

        Ok(())
    }

    #[tracing::instrument(
        name = "carts.service.list_items",
        skip(self),
        fields(user_uuid = %user, items = tracing::field::Empty),
        err
    )]
    async fn list_items(&self, user: UserUuid) -> Result<Vec<CartItemRecord>, CartsServiceError> {
        let items = retry_on_conflict(&self.settings.retry, || self.try_list_items(user)).await?;

        Span::current().record("items", items.len());

        Ok(items)
    }

    #[tracing::instrument(
        name = "carts.service.reap_expired",
        skip(self),
        fields(expired = tracing::field::Empty, reaped = tracing::field::Empty),
        err
    )]
    async fn reap_expired(&self, limit: usize) -> Result<usize, CartsServiceError> {
        let now = self.clock.now();
        let mut uow = self.db.begin().await?;

        let expired = uow.expired_cart_items(now, limit).await?;

        uow.commit().await?;

        let mut reaped = 0;

        for item in &expired {
            match retry_on_conflict(&self.settings.retry, || self.try_reap_item(item.uuid)).await {
                Ok(true) => reaped += 1,
                Ok(false) => {}
                Err(error) => {
                    warn!(cart_item_uuid = %item.uuid, %error, "cannot release expired cart item");
                }
            }
        }

        let span = Span::current();

        span.record("expired", expired.len());
        span.record("reaped", reaped);

        if reaped > 0 {
            info!(reaped, "released expired cart items");
        }

        Ok(reaped)
    }

    #[tracing::instrument(
        name = "carts.service.checkout",
        skip(self, checkout),
        fields(
            user_uuid = %user,
            order_uuid = tracing::field::Empty,
            total = tracing::field::Empty
        ),
        err
    )]
    async fn checkout(
        &self,
        user: UserUuid,
        checkout: Checkout,
    ) -> Result<OrderRecord, CartsServiceError> {
        if checkout.payment_method.trim().is_empty() {
            return Err(CartsServiceError::Validation(
                "payment method is required".to_string(),
            ));
        }

        let order_uuid = OrderUuid::new();

        let order = retry_on_conflict(&self.settings.retry, || {
            self.try_checkout(user, &checkout, order_uuid)
        })
        .await?;

        let span = Span::current();

        span.record("order_uuid", tracing::field::display(order.uuid));
        span.record("total", order.total);

        info!(
            items = order.items.len(),
            discount_total = order.discount_total,
            "order confirmed"
        );

        self.cache.invalidate_user(user).await;
        self.publish_confirmation(&order).await;

        Ok(order)
    }
}

#[automock]
#[async_trait]
pub trait CartsService: Send + Sync {
    /// Reserve stock and add `item`, merging into a live item for the same product.
    async fn add_item(
        &self,
        user: UserUuid,
        item: NewCartItem,
    ) -> Result<PricedCartItem, CartsServiceError>;

    /// Change an item's quantity, adjusting its reservation by the difference.
    async fn update_quantity(
        &self,
        user: UserUuid,
        item: CartItemUuid,
        quantity: u64,
        expected_total: Option<u64>,
    ) -> Result<PricedCartItem, CartsServiceError>;

    /// Remove an item and release its reservation.
    async fn remove_item(&self, user: UserUuid, item: CartItemUuid) -> Result<(), CartsServiceError>;

    /// A user's live items.
    async fn list_items(&self, user: UserUuid) -> Result<Vec<CartItemRecord>, CartsServiceError>;

    /// Release up to `limit` expired items; returns how many were released.
    async fn reap_expired(&self, limit: usize) -> Result<usize, CartsServiceError>;

    /// Turn the user's cart into an order.
    async fn checkout(
        &self,
        user: UserUuid,
        checkout: Checkout,
    ) -> Result<OrderRecord, CartsServiceError>;
}
