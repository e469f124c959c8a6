//! Types library for order book replicas
//!
//! Value types shared between the depth replica service and the venue
//! adapters that feed it. Everything here is plain data with validation at
//! construction; no I/O and no async.
//!
//! # Modules
//! - `ids`: Market identifier (MarketId)
//! - `numeric`: Fixed-point decimal types (Price, Quantity)
//! - `errors`: Error taxonomy for malformed levels

// Public modules
pub mod ids;
pub mod numeric;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::errors::*;
}
