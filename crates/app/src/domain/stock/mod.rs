//! Stock Reservations

pub mod errors;
pub mod service;

pub use errors::StockServiceError;
pub use service::*;
