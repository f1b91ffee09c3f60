//! Error types for shared value parsing
//!
//! Raised when a price, quantity, side label or market identifier taken from
//! a decoded record cannot be represented exactly.

use thiserror::Error;

/// Value-level parse and validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("Invalid decimal {input:?}: {reason}")]
    InvalidDecimal { input: String, reason: String },

    #[error("Price must be positive: {0}")]
    NonPositivePrice(String),

    #[error("Quantity must not be negative: {0}")]
    NegativeQuantity(String),

    #[error("Unknown side label: {0}")]
    UnknownSide(String),

    #[error("Market identifier must not be empty")]
    EmptyMarket,
}
