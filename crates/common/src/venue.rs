//! Venue identity and symbol representation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of exchange identities the core knows how to route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Venue {
    /// Binance spot/futures.
    Binance,
    /// OKX.
    Okx,
    /// Bybit.
    Bybit,
    /// Coinbase Advanced Trade.
    Coinbase,
    /// Any venue not in the closed set above.
    Unknown,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Binance => "binance",
            Self::Okx => "okx",
            Self::Bybit => "bybit",
            Self::Coinbase => "coinbase",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Canonical, venue-agnostic symbol identifier (e.g. `"BTCUSDT"`).
///
/// Comparison is byte-exact. Each adapter is responsible for converting the
/// canonical form to its own wire format (`spec.md` §3, §4.A).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SymbolId(String);

impl SymbolId {
    /// Build a canonical symbol id from its string form.
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    /// Borrow the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SymbolId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SymbolId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_ordering_is_total() {
        let mut venues = vec![Venue::Unknown, Venue::Binance, Venue::Okx];
        venues.sort();
        assert_eq!(venues, vec![Venue::Binance, Venue::Okx, Venue::Unknown]);
    }

    #[test]
    fn symbol_comparison_is_byte_exact() {
        assert_ne!(SymbolId::new("BTCUSDT"), SymbolId::new("BTC-USDT"));
        assert_eq!(SymbolId::new("BTCUSDT"), SymbolId::new("BTCUSDT".to_string()));
    }
}
