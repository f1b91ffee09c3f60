//! Book side type
//!
//! Feeds label sides differently ("Z"/"S" arrays in one variant, "BID"/"ASK"
//! strings in the other); everything downstream of the classifier uses this
//! enum.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ValueError;

/// Order book side
///
/// Ordering is `Bid < Ask`, which fixes the order of diff reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy side
    Bid,
    /// Sell side
    Ask,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    /// Wire label ("BID" / "ASK")
    pub fn label(&self) -> &'static str {
        match self {
            Side::Bid => "BID",
            Side::Ask => "ASK",
        }
    }
}

impl FromStr for Side {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BID" | "BUY" => Ok(Side::Bid),
            "ASK" | "SELL" => Ok(Side::Ask),
            _ => Err(ValueError::UnknownSide(s.to_string())),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
