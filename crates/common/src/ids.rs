//! [I] Client-order-id generator.
//!
//! IDs look like `STRATEGY-<unix-seconds>-<sequence>-<random>`, are unique
//! for the lifetime of the process, and are cheaply parseable back into
//! their components (`spec.md` §4.I).

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Error returned by [`ClientOrderIdGenerator::parse`] on a malformed id.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The id did not have the `STRATEGY-TS-SEQ-RAND` shape.
    #[error("malformed client order id: {0}")]
    Malformed(String),
}

/// The parsed components of a generated client order id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedClientOrderId {
    /// Strategy prefix.
    pub strategy: String,
    /// Unix-seconds timestamp embedded at generation time.
    pub timestamp: u64,
    /// The `<sequence>-<random>` tail, unique within the generator.
    pub unique_tail: String,
}

/// Per-strategy generator of unique client order ids.
pub struct ClientOrderIdGenerator {
    strategy: String,
    sequence: AtomicU64,
}

impl ClientOrderIdGenerator {
    /// Create a generator for the given strategy id.
    #[must_use]
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Generate the next unique id.
    pub fn generate(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let rand_tail: u32 = rand::thread_rng().gen();
        format!("{}-{}-{}-{:08x}", self.strategy, ts, seq, rand_tail)
    }

    /// Parse a client order id back into its components.
    ///
    /// # Errors
    /// Returns [`ParseError::Malformed`] if the id does not have the
    /// `STRATEGY-TS-SEQ-RAND` shape generated by [`Self::generate`].
    pub fn parse(id: &str) -> Result<ParsedClientOrderId, ParseError> {
        let parts: Vec<&str> = id.rsplitn(3, '-').collect();
        if parts.len() != 3 {
            return Err(ParseError::Malformed(id.to_string()));
        }
        // rsplitn yields [rand, seq, rest] where rest may still contain '-'
        // if the strategy name itself has dashes, so split the timestamp off
        // rest's tail instead of assuming a dash-free strategy.
        let rand_tail = parts[0];
        let seq = parts[1];
        let rest = parts[2];
        let (strategy, ts_str) = rest
            .rsplit_once('-')
            .ok_or_else(|| ParseError::Malformed(id.to_string()))?;
        let timestamp: u64 = ts_str
            .parse()
            .map_err(|_| ParseError::Malformed(id.to_string()))?;
        if strategy.is_empty() || seq.is_empty() || rand_tail.is_empty() {
            return Err(ParseError::Malformed(id.to_string()));
        }
        Ok(ParsedClientOrderId {
            strategy: strategy.to_string(),
            timestamp,
            unique_tail: format!("{seq}-{rand_tail}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_parse_back() {
        let gen = ClientOrderIdGenerator::new("STRAT");
        let id = gen.generate();
        let parsed = ClientOrderIdGenerator::parse(&id).unwrap();
        assert_eq!(parsed.strategy, "STRAT");
    }

    #[test]
    fn ten_thousand_ids_are_unique_and_monotonic_timestamp() {
        let gen = ClientOrderIdGenerator::new("STRAT");
        let mut seen = HashSet::new();
        let mut last_ts = 0u64;
        for _ in 0..10_000 {
            let id = gen.generate();
            assert!(seen.insert(id.clone()), "duplicate id generated: {id}");
            let parsed = ClientOrderIdGenerator::parse(&id).unwrap();
            assert_eq!(parsed.strategy, "STRAT");
            assert!(parsed.timestamp >= last_ts);
            last_ts = parsed.timestamp;
        }
        assert_eq!(seen.len(), 10_000);
    }

    #[test]
    fn malformed_id_rejected() {
        assert!(ClientOrderIdGenerator::parse("not-an-id").is_err());
        assert!(ClientOrderIdGenerator::parse("").is_err());
    }

    #[test]
    fn strategy_names_with_dashes_round_trip() {
        let gen = ClientOrderIdGenerator::new("MY-STRAT");
        let id = gen.generate();
        let parsed = ClientOrderIdGenerator::parse(&id).unwrap();
        assert_eq!(parsed.strategy, "MY-STRAT");
    }
}
