//! Order book infrastructure module
//!
//! Contains price levels, the per-side level container, and the two-sided
//! book that composes them.

pub mod price_level;
pub mod side;
pub mod order_book;

pub use order_book::{OrderBook, SyncStatus};
pub use price_level::PriceLevel;
pub use side::{Side, SideKind};
