//! Typed Uuids

use std::{
    cmp::Ordering,
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    hash::{Hash, Hasher},
    marker::PhantomData,
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// A [`Uuid`] tagged with the kind of entity it identifies.
///
/// The marker type only exists at compile time, so a `ProductUuid` cannot be
/// passed where an `EventUuid` is expected.
pub struct TypedUuid<T>(Uuid, PhantomData<fn() -> T>);

impl<T> TypedUuid<T> {
    /// Generate a new time-ordered (v7) identifier.
    #[must_use]
    pub fn new() -> Self {
        Self::from_uuid(Uuid::now_v7())
    }

    /// Wrap an existing [`Uuid`].
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid, PhantomData)
    }

    /// Unwrap into the raw [`Uuid`].
    #[must_use]
    pub const fn into_uuid(self) -> Uuid {
        self.0
    }
}

impl<T> Default for TypedUuid<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for TypedUuid<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TypedUuid<T> {}

impl<T> Debug for TypedUuid<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Debug::fmt(&self.0, f)
    }
}

impl<T> Display for TypedUuid<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.0, f)
    }
}

impl<T> PartialEq for TypedUuid<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T> Eq for TypedUuid<T> {}

impl<T> Hash for TypedUuid<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T> PartialOrd for TypedUuid<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for TypedUuid<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl<T> From<Uuid> for TypedUuid<T> {
    fn from(value: Uuid) -> Self {
        Self::from_uuid(value)
    }
}

impl<T> From<TypedUuid<T>> for Uuid {
    fn from(value: TypedUuid<T>) -> Self {
        value.into_uuid()
    }
}

impl<T> FromStr for TypedUuid<T> {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self::from_uuid)
    }
}

impl<T> Serialize for TypedUuid<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for TypedUuid<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Uuid::deserialize(deserializer).map(Self::from_uuid)
    }
}

/// Marker types for [`TypedUuid`].
pub mod markers {
    /// Sellable product.
    #[derive(Debug)]
    pub enum Product {}

    /// Catalog category at any depth.
    #[derive(Debug)]
    pub enum Category {}

    /// Shopper.
    #[derive(Debug)]
    pub enum User {}

    /// Promotional event.
    #[derive(Debug)]
    pub enum Event {}

    /// Eligibility rule attached to an event.
    #[derive(Debug)]
    pub enum Rule {}

    /// Usage ledger entry.
    #[derive(Debug)]
    pub enum Usage {}

    /// Cart line.
    #[derive(Debug)]
    pub enum CartItem {}

    /// Order.
    #[derive(Debug)]
    pub enum Order {}

    /// Order line.
    #[derive(Debug)]
    pub enum OrderItem {}

    /// Stock reservation handle.
    #[derive(Debug)]
    pub enum Reservation {}
}

/// Product UUID
pub type ProductUuid = TypedUuid<markers::Product>;

/// Category UUID
pub type CategoryUuid = TypedUuid<markers::Category>;

/// User UUID
pub type UserUuid = TypedUuid<markers::User>;

/// Promotional Event UUID
pub type EventUuid = TypedUuid<markers::Event>;

/// Event Rule UUID
pub type RuleUuid = TypedUuid<markers::Rule>;

/// Event Usage UUID
pub type UsageUuid = TypedUuid<markers::Usage>;

/// Cart Item UUID
pub type CartItemUuid = TypedUuid<markers::CartItem>;

/// Order UUID
pub type OrderUuid = TypedUuid<markers::Order>;

/// Order Item UUID
pub type OrderItemUuid = TypedUuid<markers::OrderItem>;

/// Reservation token
pub type ReservationToken = TypedUuid<markers::Reservation>;
