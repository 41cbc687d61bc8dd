//! Storefront
//!
//! The promotional pricing and stock reservation engine of an online store.
//!
//! Everything here is synchronous and free of I/O: events, rules, discounts,
//! price resolution and stock transitions are pure functions over values the
//! caller loads from its store. Time is always read through a [`clock::Clock`].

pub mod clock;
pub mod discounts;
pub mod eligibility;
pub mod events;
pub mod ids;
pub mod prelude;
pub mod pricing;
pub mod rules;
pub mod selection;
pub mod stock;
