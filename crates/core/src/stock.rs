//! Stock levels
//!
//! Units of a product are Free (`stock_quantity - reserved_stock`), Reserved
//! (claimed by live cart items) or Sold (removed from both counters on
//! confirmation). [`StockLevel`] keeps `reserved_stock <= stock_quantity`
//! through every transition.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from stock transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StockError {
    /// Quantities must be positive.
    #[error("quantity must be greater than zero")]
    InvalidQuantity,

    /// Not enough free units.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        /// Units requested.
        requested: u64,
        /// Free units.
        available: u64,
    },

    /// Confirmation needs the units to be both reserved and owned.
    #[error("cannot confirm {requested} units: {reserved} reserved, {stock} in stock")]
    InsufficientReservation {
        /// Units requested.
        requested: u64,
        /// Reserved units.
        reserved: u64,
        /// Owned units.
        stock: u64,
    },

    /// Reserved stock exceeds owned stock.
    #[error("reserved stock {reserved} exceeds stock quantity {stock}")]
    InvalidLevel {
        /// Owned units.
        stock: u64,
        /// Reserved units.
        reserved: u64,
    },
}

/// A product's stock counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredLevel")]
pub struct StockLevel {
    stock_quantity: u64,
    reserved_stock: u64,
}

/// Unchecked counters as they arrive from a payload.
#[derive(Deserialize)]
struct StoredLevel {
    stock_quantity: u64,
    reserved_stock: u64,
}

impl TryFrom<StoredLevel> for StockLevel {
    type Error = StockError;

    fn try_from(stored: StoredLevel) -> Result<Self, Self::Error> {
        Self::new(stored.stock_quantity, stored.reserved_stock)
    }
}

impl StockLevel {
    /// Validate and wrap stored counters.
    ///
    /// # Errors
    ///
    /// Returns [`StockError::InvalidLevel`] when `reserved_stock > stock_quantity`.
    pub const fn new(stock_quantity: u64, reserved_stock: u64) -> Result<Self, StockError> {
        if reserved_stock > stock_quantity {
            return Err(StockError::InvalidLevel {
                stock: stock_quantity,
                reserved: reserved_stock,
            });
        }

        Ok(Self {
            stock_quantity,
            reserved_stock,
        })
    }

    /// Owned units.
    #[must_use]
    pub const fn stock_quantity(&self) -> u64 {
        self.stock_quantity
    }

    /// Units claimed by unconfirmed carts.
    #[must_use]
    pub const fn reserved_stock(&self) -> u64 {
        self.reserved_stock
    }

    /// Units available to reserve.
    #[must_use]
    pub const fn free(&self) -> u64 {
        self.stock_quantity - self.reserved_stock
    }

    /// Claim `quantity` free units.
    ///
    /// # Errors
    ///
    /// - [`StockError::InvalidQuantity`]: `quantity` is zero.
    /// - [`StockError::InsufficientStock`]: fewer than `quantity` units are free.
    pub fn reserve(&mut self, quantity: u64) -> Result<(), StockError> {
        if quantity == 0 {
            return Err(StockError::InvalidQuantity);
        }

        let available = self.free();

        if quantity > available {
            return Err(StockError::InsufficientStock {
                requested: quantity,
                available,
            });
        }

        self.reserved_stock += quantity;

        Ok(())
    }

    /// Move a reservation from `old` to `new` units in one step.
    ///
    /// # Errors
    ///
    /// - [`StockError::InvalidQuantity`]: `new` is zero; release instead.
    /// - [`StockError::InsufficientStock`]: the increase exceeds free units.
    pub fn adjust(&mut self, old: u64, new: u64) -> Result<(), StockError> {
        if new == 0 {
            return Err(StockError::InvalidQuantity);
        }

        if new > old {
            let delta = new - old;
            let available = self.free();

            if delta > available {
                return Err(StockError::InsufficientStock {
                    requested: delta,
                    available,
                });
            }

            self.reserved_stock += delta;
        } else {
            self.release(old - new);
        }

        Ok(())
    }

    /// Give back `quantity` reserved units, floored at zero.
    pub fn release(&mut self, quantity: u64) {
        self.reserved_stock = self.reserved_stock.saturating_sub(quantity);
    }

    /// Turn `quantity` reserved units into sold ones.
    ///
    /// # Errors
    ///
    /// - [`StockError::InvalidQuantity`]: `quantity` is zero.
    /// - [`StockError::InsufficientReservation`]: not enough reserved or owned units.
    pub fn confirm(&mut self, quantity: u64) -> Result<(), StockError> {
        if quantity == 0 {
            return Err(StockError::InvalidQuantity);
        }

        if self.reserved_stock < quantity || self.stock_quantity < quantity {
            return Err(StockError::InsufficientReservation {
                requested: quantity,
                reserved: self.reserved_stock,
                stock: self.stock_quantity,
            });
        }

        self.reserved_stock -= quantity;
        self.stock_quantity -= quantity;

        Ok(())
    }
}
