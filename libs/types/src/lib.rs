//! Types library for the order book reconciliation workspace
//!
//! Shared vocabulary used by the book-sync core and its tooling. Prices and
//! quantities are exact decimals so they can be used as map keys without
//! floating-point equality surprises.
//!
//! # Modules
//! - `ids`: Market identifiers
//! - `numeric`: Exact decimal types (Price, Quantity)
//! - `order`: Book side (bid/ask)
//! - `errors`: Value parsing errors

// Public modules
pub mod ids;
pub mod numeric;
pub mod order;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::order::*;
    pub use crate::errors::*;
}
