//! In-memory backend
//!
//! Writes are staged inside the unit of work and applied at commit under a
//! single lock. Every staged update remembers the version it was based on;
//! commit fails with [`DbError::Conflict`] if another unit of work committed a
//! newer version in the meantime, mirroring the `WHERE version = $n` checks of
//! the PostgreSQL backend.

use std::{
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use jiff::Timestamp;
use rustc_hash::FxHashMap;
use storefront::{
    events::PromotionalEvent,
    ids::{CartItemUuid, EventUuid, OrderUuid, ProductUuid, UsageUuid, UserUuid},
};

use crate::{
    database::{Database, DbError, UnitOfWork},
    domain::{
        carts::{records::CartItemRecord, repository::CartItemsRepository},
        events::repository::EventsRepository,
        orders::{records::OrderRecord, repository::OrdersRepository},
        products::{records::ProductRecord, repository::ProductsRepository},
        usage::{records::UsageRecord, repository::UsageRepository},
    },
};

trait Versioned: Clone {
    fn version(&self) -> i64;

    fn set_version(&mut self, version: i64);
}

impl Versioned for ProductRecord {
    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

impl Versioned for PromotionalEvent {
    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

impl Versioned for CartItemRecord {
    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    products: FxHashMap<ProductUuid, ProductRecord>,
    events: FxHashMap<EventUuid, PromotionalEvent>,
    usages: FxHashMap<UsageUuid, UsageRecord>,
    cart_items: FxHashMap<CartItemUuid, CartItemRecord>,
    orders: FxHashMap<OrderUuid, OrderRecord>,
}

/// [`Database`] kept entirely in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, DbError> {
        Ok(Box::new(MemoryUnitOfWork {
            state: Arc::clone(&self.state),
            products: FxHashMap::default(),
            events: FxHashMap::default(),
            cart_items: FxHashMap::default(),
            usage_inserts: Vec::new(),
            usage_deletes: FxHashMap::default(),
            orders: Vec::new(),
        }))
    }
}

/// A staged write. `base` is the committed version it replaces; `None` for inserts.
#[derive(Debug)]
struct Pending<T> {
    base: Option<i64>,
    record: T,
}

/// Staged writes against a [`MemoryDatabase`].
#[derive(Debug)]
pub struct MemoryUnitOfWork {
    state: Arc<Mutex<MemoryState>>,
    products: FxHashMap<ProductUuid, Pending<ProductRecord>>,
    events: FxHashMap<EventUuid, Pending<PromotionalEvent>>,
    cart_items: FxHashMap<CartItemUuid, Pending<CartItemRecord>>,
    usage_inserts: Vec<UsageRecord>,
    usage_deletes: FxHashMap<UsageUuid, Timestamp>,
    orders: Vec<OrderRecord>,
}

impl MemoryUnitOfWork {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Committed usages overlaid with the staged inserts and deletes.
    fn usage_view(&self) -> Vec<UsageRecord> {
        let state = self.state();

        state
            .usages
            .values()
            .chain(self.usage_inserts.iter())
            .cloned()
            .map(|mut usage| {
                if let Some(at) = self.usage_deletes.get(&usage.uuid) {
                    usage.deleted_at = Some(*at);
                }

                usage
            })
            .collect()
    }
}

fn overlay<K, T>(pending: &FxHashMap<K, Pending<T>>, committed: &FxHashMap<K, T>, key: &K) -> Option<T>
where
    K: Hash + Eq,
    T: Clone,
{
    pending
        .get(key)
        .map(|staged| staged.record.clone())
        .or_else(|| committed.get(key).cloned())
}

fn overlay_all<K, T>(pending: &FxHashMap<K, Pending<T>>, committed: &FxHashMap<K, T>) -> Vec<T>
where
    K: Hash + Eq,
    T: Clone,
{
    committed
        .iter()
        .filter(|(key, _)| !pending.contains_key(*key))
        .map(|(_, record)| record.clone())
        .chain(pending.values().map(|staged| staged.record.clone()))
        .collect()
}

fn stage_insert<K, T>(
    pending: &mut FxHashMap<K, Pending<T>>,
    committed: &FxHashMap<K, T>,
    key: K,
    record: &T,
) -> Result<(), DbError>
where
    K: Hash + Eq,
    T: Versioned,
{
    if pending.contains_key(&key) || committed.contains_key(&key) {
        return Err(DbError::AlreadyExists);
    }

    let mut record = record.clone();
    record.set_version(0);

    pending.insert(key, Pending { base: None, record });

    Ok(())
}

fn stage_update<K, T>(
    pending: &mut FxHashMap<K, Pending<T>>,
    committed: &FxHashMap<K, T>,
    key: K,
    record: &T,
) -> Result<T, DbError>
where
    K: Hash + Eq,
    T: Versioned,
{
    let (base, current) = match pending.get(&key) {
        Some(staged) => (staged.base, staged.record.version()),
        None => {
            let existing = committed.get(&key).ok_or(DbError::Conflict)?;

            (Some(existing.version()), existing.version())
        }
    };

    if current != record.version() {
        return Err(DbError::Conflict);
    }

    let mut updated = record.clone();
    updated.set_version(current + 1);

    pending.insert(
        key,
        Pending {
            base,
            record: updated.clone(),
        },
    );

    Ok(updated)
}

fn validate<K, T>(pending: &FxHashMap<K, Pending<T>>, committed: &FxHashMap<K, T>) -> Result<(), DbError>
where
    K: Hash + Eq,
    T: Versioned,
{
    for (key, staged) in pending {
        match (staged.base, committed.get(key)) {
            (None, None) => {}
            (None, Some(_)) => return Err(DbError::AlreadyExists),
            (Some(base), Some(existing)) if existing.version() == base => {}
            (Some(_), _) => return Err(DbError::Conflict),
        }
    }

    Ok(())
}

fn apply<K, T>(pending: FxHashMap<K, Pending<T>>, committed: &mut FxHashMap<K, T>)
where
    K: Hash + Eq,
{
    for (key, staged) in pending {
        committed.insert(key, staged.record);
    }
}

#[async_trait]
impl ProductsRepository for MemoryUnitOfWork {
    async fn get_product(&mut self, product: ProductUuid) -> Result<ProductRecord, DbError> {
        let state = self.state();

        overlay(&self.products, &state.products, &product)
            .filter(|record| record.deleted_at.is_none())
            .ok_or(DbError::NotFound)
    }

    async fn find_products(
        &mut self,
        products: &[ProductUuid],
    ) -> Result<Vec<ProductRecord>, DbError> {
        let state = self.state();

        Ok(products
            .iter()
            .filter_map(|uuid| overlay(&self.products, &state.products, uuid))
            .filter(|record| record.deleted_at.is_none())
            .collect())
    }

    async fn insert_product(&mut self, product: &ProductRecord) -> Result<(), DbError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        stage_insert(&mut self.products, &state.products, product.uuid, product)
    }

    async fn update_product(&mut self, product: &ProductRecord) -> Result<ProductRecord, DbError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        stage_update(&mut self.products, &state.products, product.uuid, product)
    }
}

#[async_trait]
impl EventsRepository for MemoryUnitOfWork {
    async fn get_event(&mut self, event: EventUuid) -> Result<PromotionalEvent, DbError> {
        let state = self.state();

        overlay(&self.events, &state.events, &event)
            .filter(|record| record.deleted_at.is_none())
            .ok_or(DbError::NotFound)
    }

    async fn running_events(&mut self, now: Timestamp) -> Result<Vec<PromotionalEvent>, DbError> {
        let state = self.state();

        Ok(overlay_all(&self.events, &state.events)
            .into_iter()
            .filter(|event| event.is_running(now))
            .collect())
    }

    async fn due_events(
        &mut self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<PromotionalEvent>, DbError> {
        let state = self.state();

        let mut due: Vec<PromotionalEvent> = overlay_all(&self.events, &state.events)
            .into_iter()
            .filter(|event| event.due_transition(now).is_some())
            .collect();

        due.sort_by(|a, b| a.ends_at.cmp(&b.ends_at).then(a.uuid.cmp(&b.uuid)));
        due.truncate(limit);

        Ok(due)
    }

    async fn insert_event(&mut self, event: &PromotionalEvent) -> Result<(), DbError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        stage_insert(&mut self.events, &state.events, event.uuid, event)
    }

    async fn update_event(
        &mut self,
        event: &PromotionalEvent,
    ) -> Result<PromotionalEvent, DbError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        stage_update(&mut self.events, &state.events, event.uuid, event)
    }
}

#[async_trait]
impl UsageRepository for MemoryUnitOfWork {
    async fn insert_usage(&mut self, usage: &UsageRecord) -> Result<(), DbError> {
        let duplicate = self.usage_view().iter().any(|existing| {
            existing.uuid == usage.uuid
                || (existing.deleted_at.is_none() && existing.same_application(usage))
        });

        if duplicate {
            return Err(DbError::AlreadyExists);
        }

        self.usage_inserts.push(usage.clone());

        Ok(())
    }

    async fn usage_count(
        &mut self,
        event: EventUuid,
        user: UserUuid,
        product: Option<ProductUuid>,
    ) -> Result<u64, DbError> {
        Ok(self
            .usage_view()
            .iter()
            .filter(|usage| {
                usage.deleted_at.is_none()
                    && usage.event_uuid == event
                    && usage.user_uuid == user
                    && product.is_none_or(|product| usage.product_uuid == Some(product))
            })
            .map(|usage| usage.quantity)
            .sum())
    }

    async fn order_usages(
        &mut self,
        event: EventUuid,
        order: OrderUuid,
    ) -> Result<Vec<UsageRecord>, DbError> {
        let mut usages: Vec<UsageRecord> = self
            .usage_view()
            .into_iter()
            .filter(|usage| {
                usage.deleted_at.is_none()
                    && usage.event_uuid == event
                    && usage.order_uuid == Some(order)
            })
            .collect();

        usages.sort_by_key(|usage| usage.uuid);

        Ok(usages)
    }

    async fn delete_usage(&mut self, usage: UsageUuid, at: Timestamp) -> Result<(), DbError> {
        let live = self
            .usage_view()
            .iter()
            .any(|existing| existing.uuid == usage && existing.deleted_at.is_none());

        if !live {
            return Err(DbError::NotFound);
        }

        self.usage_deletes.insert(usage, at);

        Ok(())
    }
}

#[async_trait]
impl CartItemsRepository for MemoryUnitOfWork {
    async fn get_cart_item(&mut self, item: CartItemUuid) -> Result<CartItemRecord, DbError> {
        let state = self.state();

        overlay(&self.cart_items, &state.cart_items, &item)
            .filter(|record| record.deleted_at.is_none())
            .ok_or(DbError::NotFound)
    }

    async fn user_cart_items(&mut self, user: UserUuid) -> Result<Vec<CartItemRecord>, DbError> {
        let state = self.state();

        let mut items: Vec<CartItemRecord> = overlay_all(&self.cart_items, &state.cart_items)
            .into_iter()
            .filter(|item| item.user_uuid == user && item.deleted_at.is_none())
            .collect();

        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.uuid.cmp(&b.uuid)));

        Ok(items)
    }

    async fn expired_cart_items(
        &mut self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<CartItemRecord>, DbError> {
        let state = self.state();

        let mut items: Vec<CartItemRecord> = overlay_all(&self.cart_items, &state.cart_items)
            .into_iter()
            .filter(|item| item.deleted_at.is_none() && item.expires_at <= now)
            .collect();

        items.sort_by(|a, b| a.expires_at.cmp(&b.expires_at).then(a.uuid.cmp(&b.uuid)));
        items.truncate(limit);

        Ok(items)
    }

    async fn insert_cart_item(&mut self, item: &CartItemRecord) -> Result<(), DbError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        stage_insert(&mut self.cart_items, &state.cart_items, item.uuid, item)
    }

    async fn update_cart_item(
        &mut self,
        item: &CartItemRecord,
    ) -> Result<CartItemRecord, DbError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let deleted = overlay(&self.cart_items, &state.cart_items, &item.uuid)
            .is_none_or(|current| current.deleted_at.is_some());

        if deleted {
            return Err(DbError::Conflict);
        }

        stage_update(&mut self.cart_items, &state.cart_items, item.uuid, item)
    }
}

#[async_trait]
impl OrdersRepository for MemoryUnitOfWork {
    async fn insert_order(&mut self, order: &OrderRecord) -> Result<(), DbError> {
        let exists = self.orders.iter().any(|staged| staged.uuid == order.uuid)
            || self.state().orders.contains_key(&order.uuid);

        if exists {
            return Err(DbError::AlreadyExists);
        }

        self.orders.push(order.clone());

        Ok(())
    }

    async fn get_order(&mut self, order: OrderUuid) -> Result<OrderRecord, DbError> {
        if let Some(staged) = self.orders.iter().find(|staged| staged.uuid == order) {
            return Ok(staged.clone());
        }

        self.state()
            .orders
            .get(&order)
            .cloned()
            .ok_or(DbError::NotFound)
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let Self {
            state,
            products,
            events,
            cart_items,
            usage_inserts,
            usage_deletes,
            orders,
        } = *self;

        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);

        validate(&products, &state.products)?;
        validate(&events, &state.events)?;
        validate(&cart_items, &state.cart_items)?;

        for usage in &usage_inserts {
            let duplicate = state.usages.values().any(|existing| {
                existing.uuid == usage.uuid
                    || (existing.deleted_at.is_none() && existing.same_application(usage))
            });

            if duplicate {
                return Err(DbError::AlreadyExists);
            }
        }

        for uuid in usage_deletes.keys() {
            let live = state
                .usages
                .get(uuid)
                .is_some_and(|usage| usage.deleted_at.is_none());

            // Committed rows must still be live; rows inserted by this unit are checked above.
            if !live && !usage_inserts.iter().any(|usage| usage.uuid == *uuid) {
                return Err(DbError::Conflict);
            }
        }

        if orders.iter().any(|order| state.orders.contains_key(&order.uuid)) {
            return Err(DbError::AlreadyExists);
        }

        apply(products, &mut state.products);
        apply(events, &mut state.events);
        apply(cart_items, &mut state.cart_items);

        for usage in usage_inserts {
            state.usages.insert(usage.uuid, usage);
        }

        for (uuid, at) in usage_deletes {
            if let Some(usage) = state.usages.get_mut(&uuid) {
                usage.deleted_at = Some(at);
            }
        }

        for order in orders {
            state.orders.insert(order.uuid, order);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use storefront::stock::StockLevel;
    use testresult::TestResult;

    use super::*;

    fn product(stock: u64) -> TestResult<ProductRecord> {
        let now = Timestamp::UNIX_EPOCH;

        Ok(ProductRecord {
            uuid: ProductUuid::new(),
            market_price: 1_000,
            discount_price: None,
            stock: StockLevel::new(stock, 0)?,
            category_uuid: None,
            sub_category_uuid: None,
            sub_sub_category_uuid: None,
            version: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() -> TestResult {
        let db = MemoryDatabase::new();
        let record = product(10)?;

        let mut uow = db.begin().await?;
        uow.insert_product(&record).await?;
        drop(uow);

        let mut uow = db.begin().await?;
        let result = uow.get_product(record.uuid).await;

        assert!(matches!(result, Err(DbError::NotFound)), "got {result:?}");

        Ok(())
    }

    #[tokio::test]
    async fn reads_see_staged_writes() -> TestResult {
        let db = MemoryDatabase::new();
        let record = product(10)?;

        let mut uow = db.begin().await?;
        uow.insert_product(&record).await?;

        let mut staged = uow.get_product(record.uuid).await?;
        staged.stock.reserve(4)?;

        let updated = uow.update_product(&staged).await?;

        assert_eq!(updated.version, 1, "version bumps on update");
        assert_eq!(uow.get_product(record.uuid).await?.stock.reserved_stock(), 4);

        uow.commit().await?;

        Ok(())
    }

    #[tokio::test]
    async fn stale_version_conflicts_at_commit() -> TestResult {
        let db = MemoryDatabase::new();
        let record = product(10)?;

        let mut setup = db.begin().await?;
        setup.insert_product(&record).await?;
        setup.commit().await?;

        let mut first = db.begin().await?;
        let mut second = db.begin().await?;

        let mut a = first.get_product(record.uuid).await?;
        let mut b = second.get_product(record.uuid).await?;

        a.stock.reserve(6)?;
        b.stock.reserve(6)?;

        first.update_product(&a).await?;
        second.update_product(&b).await?;

        first.commit().await?;
        let result = second.commit().await;

        assert!(matches!(result, Err(DbError::Conflict)), "got {result:?}");

        let mut check = db.begin().await?;

        assert_eq!(check.get_product(record.uuid).await?.stock.reserved_stock(), 6);

        Ok(())
    }

    #[tokio::test]
    async fn update_with_stale_version_conflicts_immediately() -> TestResult {
        let db = MemoryDatabase::new();
        let record = product(10)?;

        let mut uow = db.begin().await?;
        uow.insert_product(&record).await?;

        let mut stale = record.clone();
        stale.version = 7;

        let result = uow.update_product(&stale).await;

        assert!(matches!(result, Err(DbError::Conflict)), "got {result:?}");

        Ok(())
    }

    #[tokio::test]
    async fn duplicate_order_usage_is_rejected() -> TestResult {
        let db = MemoryDatabase::new();
        let usage = UsageRecord {
            uuid: UsageUuid::new(),
            event_uuid: EventUuid::new(),
            user_uuid: UserUuid::new(),
            order_uuid: Some(OrderUuid::new()),
            product_uuid: None,
            quantity: 1,
            discount_applied: 100,
            used_at: Timestamp::UNIX_EPOCH,
            deleted_at: None,
        };

        let mut first = db.begin().await?;
        let mut second = db.begin().await?;

        first.insert_usage(&usage).await?;
        second
            .insert_usage(&UsageRecord {
                uuid: UsageUuid::new(),
                ..usage.clone()
            })
            .await?;

        first.commit().await?;
        let result = second.commit().await;

        assert!(matches!(result, Err(DbError::AlreadyExists)), "got {result:?}");

        let mut check = db.begin().await?;
        let count = check
            .usage_count(usage.event_uuid, usage.user_uuid, None)
            .await?;

        assert_eq!(count, 1, "one ledger row");

        Ok(())
    }
}
