//! Pricing, promotion and stock reservation services over a transactional store.

pub mod cache;
pub mod context;
pub mod database;
pub mod domain;
pub mod notifications;
pub mod retry;
pub mod settings;
pub mod sweeper;

#[cfg(test)]
mod test;
