//! Market identifier type
//!
//! Markets are opaque exchange symbols (e.g. "BTC-ETH", "USDT-BTC"). They are
//! the key of every per-market structure, so the type is cheap to hash and
//! can be looked up by `&str`.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use crate::errors::ValueError;

/// Market identifier (trading pair)
///
/// No particular format is enforced; exchanges disagree on separators.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketId(String);

impl MarketId {
    /// Create a new MarketId from a string
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    /// Try to create a MarketId, rejecting empty or blank symbols
    pub fn try_new(symbol: impl Into<String>) -> Result<Self, ValueError> {
        let s = symbol.into();
        if s.trim().is_empty() {
            Err(ValueError::EmptyMarket)
        } else {
            Ok(Self(s))
        }
    }

    /// Get the symbol string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MarketId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for MarketId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for MarketId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_market_id_creation() {
        let market = MarketId::new("BTC-ETH");
        assert_eq!(market.as_str(), "BTC-ETH");
        assert_eq!(market.to_string(), "BTC-ETH");
    }

    #[test]
    fn test_market_id_try_new() {
        assert!(MarketId::try_new("USDT-BTC").is_ok());
        assert_eq!(MarketId::try_new("  "), Err(ValueError::EmptyMarket));
    }

    #[test]
    fn test_market_id_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(MarketId::new("BTC-XRP"), 1u32);
        assert_eq!(map.get("BTC-XRP"), Some(&1));
    }

    #[test]
    fn test_market_id_serialization() {
        let market = MarketId::new("BTC-LTC");
        let json = serde_json::to_string(&market).unwrap();
        assert_eq!(json, "\"BTC-LTC\"");

        let deserialized: MarketId = serde_json::from_str(&json).unwrap();
        assert_eq!(market, deserialized);
    }
}
