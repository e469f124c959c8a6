//! Error types shared by book replicas
//!
//! Validation failures for raw level data coming off the wire.

use thiserror::Error;

/// A single malformed `(price, quantity)` pair.
///
/// Only the offending pair is rejected; callers applying a batch of changes
/// skip it and keep going.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LevelError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    /// The pair is valid on its own, but its notional value or the side
    /// totals it feeds would leave the representable range.
    #[error("Value overflow: {0}")]
    ValueOverflow(String),
}
