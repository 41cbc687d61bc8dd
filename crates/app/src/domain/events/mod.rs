//! Promotional Events

pub mod data;
pub mod errors;
pub mod repository;
pub mod service;

pub use errors::EventsServiceError;
pub use service::*;
