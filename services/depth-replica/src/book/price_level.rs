//! Price level
//!
//! A `(price, quantity)` pair as it rests in a book. Identity is the price:
//! two levels with the same price are the same level at different times.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::errors::LevelError;
use types::numeric::{Price, Quantity};

/// A single price level in the order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// The price of this level.
    pub price: Price,
    /// Total resting quantity at this price.
    pub quantity: Quantity,
}

impl PriceLevel {
    pub fn new(price: Price, quantity: Quantity) -> Self {
        Self { price, quantity }
    }

    /// Validate a raw `(price, quantity)` pair.
    ///
    /// Rejects pairs whose notional value does not fit in a `Decimal`, so
    /// [`PriceLevel::value`] never overflows on a level built here.
    pub fn try_new(price: Decimal, quantity: Decimal) -> Result<Self, LevelError> {
        let level = Self {
            price: Price::try_from(price)?,
            quantity: Quantity::try_from(quantity)?,
        };
        level.checked_value()?;
        Ok(level)
    }

    /// Notional value (price * quantity) at this level.
    ///
    /// Saturates at `Decimal::MAX` for a level assembled through
    /// [`PriceLevel::new`] from out-of-range parts.
    pub fn value(&self) -> Decimal {
        self.checked_value().unwrap_or(Decimal::MAX)
    }

    /// Notional value, or `ValueOverflow` if it is not representable.
    pub fn checked_value(&self) -> Result<Decimal, LevelError> {
        self.price
            .as_decimal()
            .checked_mul(self.quantity.as_decimal())
            .ok_or_else(|| LevelError::ValueOverflow(format!("{} x {}", self.price, self.quantity)))
    }
}
