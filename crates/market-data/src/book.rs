//! [C] Aggregated order book: per-symbol, per-venue top-of-book plus optional
//! full depth, merged into a single cross-venue view (`spec.md` §4.C).

use common::{SymbolId, Venue};
use exchange_adapters::Level;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

/// One venue's record within an [`AggregatedOrderBook`].
#[derive(Debug, Clone)]
struct VenueRecord {
    bids: Vec<Level>,
    asks: Vec<Level>,
    last_update_ns: u64,
    stale: bool,
}

/// Status of one venue within the aggregated view, for [`AggregatedOrderBook::get_venues`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VenueStatus {
    /// The venue.
    pub venue: Venue,
    /// Whether the venue is currently excluded from aggregation for staleness.
    pub is_stale: bool,
    /// Timestamp of the venue's last update, nanoseconds.
    pub last_update_ns: u64,
}

/// A price level in the aggregated view: the total quantity available at
/// `price` across all contributing (non-stale) venues.
#[derive(Debug, Clone)]
pub struct AggregatedLevel {
    /// Price.
    pub price: f64,
    /// Quantity summed across every venue quoting this price.
    pub total_qty: f64,
    /// Per-venue contribution, in venue registration order.
    pub venues: Vec<(Venue, f64)>,
}

/// Best bid/ask across all non-stale venues for a symbol.
#[derive(Debug, Clone)]
pub struct AggregatedBbo {
    /// Best bid, if any venue is quoting one.
    pub best_bid: Option<AggregatedLevel>,
    /// Best ask, if any venue is quoting one.
    pub best_ask: Option<AggregatedLevel>,
}

struct Inner {
    venues: HashMap<Venue, VenueRecord>,
    registration_order: Vec<Venue>,
}

/// Cross-venue order book for a single symbol (`spec.md` §4.C).
///
/// Each venue's record carries a `warning_age`/`max_age` staleness budget;
/// once `now - last_update_ns` exceeds `max_age` the record is excluded from
/// every aggregation method until it receives a fresh update.
pub struct AggregatedOrderBook {
    symbol: SymbolId,
    warning_age: Duration,
    max_age: Duration,
    inner: RwLock<Inner>,
}

impl AggregatedOrderBook {
    /// Create an empty book for `symbol` with the given staleness budget.
    #[must_use]
    pub fn new(symbol: SymbolId, warning_age: Duration, max_age: Duration) -> Self {
        Self {
            symbol,
            warning_age,
            max_age,
            inner: RwLock::new(Inner {
                venues: HashMap::new(),
                registration_order: Vec::new(),
            }),
        }
    }

    /// The symbol this book aggregates.
    #[must_use]
    pub fn symbol(&self) -> &SymbolId {
        &self.symbol
    }

    fn note_registration(inner: &mut Inner, venue: Venue) {
        if !inner.registration_order.contains(&venue) {
            inner.registration_order.push(venue);
        }
    }

    /// Replace a venue's full depth snapshot.
    pub fn update_venue(&self, venue: Venue, bids: Vec<Level>, asks: Vec<Level>, ts_ns: u64) {
        let mut inner = self.inner.write();
        Self::note_registration(&mut inner, venue);
        inner.venues.insert(
            venue,
            VenueRecord {
                bids,
                asks,
                last_update_ns: ts_ns,
                stale: false,
            },
        );
    }

    /// Replace a venue's top-of-book only (single bid/ask level each).
    pub fn update_venue_bbo(&self, venue: Venue, bid: Level, ask: Level, ts_ns: u64) {
        self.update_venue(venue, vec![bid], vec![ask], ts_ns);
    }

    /// Force a venue stale regardless of its age (e.g. on disconnect).
    pub fn mark_stale(&self, venue: Venue) {
        if let Some(record) = self.inner.write().venues.get_mut(&venue) {
            record.stale = true;
        }
    }

    /// Drop a venue entirely (e.g. on adapter unregistration).
    pub fn remove_venue(&self, venue: Venue) {
        let mut inner = self.inner.write();
        inner.venues.remove(&venue);
        inner.registration_order.retain(|v| *v != venue);
    }

    /// Re-evaluate every venue's staleness against `now_ns`. A venue becomes
    /// fresh again only via [`Self::update_venue`]/[`Self::update_venue_bbo`],
    /// never merely by this check.
    pub fn check_staleness(&self, now_ns: u64) {
        let max_age_ns = self.max_age.as_nanos() as u64;
        let mut inner = self.inner.write();
        for record in inner.venues.values_mut() {
            if now_ns.saturating_sub(record.last_update_ns) > max_age_ns {
                record.stale = true;
            }
        }
    }

    /// Whether `venue`'s last update is within the warning window (informational;
    /// does not affect aggregation).
    #[must_use]
    pub fn is_within_warning_age(&self, venue: Venue, now_ns: u64) -> bool {
        let warning_age_ns = self.warning_age.as_nanos() as u64;
        self.inner
            .read()
            .venues
            .get(&venue)
            .is_some_and(|r| now_ns.saturating_sub(r.last_update_ns) <= warning_age_ns)
    }

    fn aggregate_side<'a>(
        inner: &'a Inner,
        side: impl Fn(&'a VenueRecord) -> &'a [Level],
        ascending: bool,
        depth: usize,
    ) -> Vec<AggregatedLevel> {
        let mut by_price: Vec<(f64, Vec<(Venue, f64)>)> = Vec::new();
        for venue in &inner.registration_order {
            let Some(record) = inner.venues.get(venue) else { continue };
            if record.stale {
                continue;
            }
            for level in side(record) {
                if let Some(entry) = by_price.iter_mut().find(|(p, _)| (*p - level.price).abs() < f64::EPSILON) {
                    entry.1.push((*venue, level.qty));
                } else {
                    by_price.push((level.price, vec![(*venue, level.qty)]));
                }
            }
        }
        if ascending {
            by_price.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        } else {
            by_price.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        }
        by_price
            .into_iter()
            .take(if depth == 0 { usize::MAX } else { depth })
            .map(|(price, venues)| AggregatedLevel {
                price,
                total_qty: venues.iter().map(|(_, q)| q).sum(),
                venues,
            })
            .collect()
    }

    /// Aggregated bids, best (highest) first, across non-stale venues.
    #[must_use]
    pub fn get_aggregated_bids(&self, depth: usize) -> Vec<AggregatedLevel> {
        let inner = self.inner.read();
        Self::aggregate_side(&inner, |r| &r.bids, false, depth)
    }

    /// Aggregated asks, best (lowest) first, across non-stale venues.
    #[must_use]
    pub fn get_aggregated_asks(&self, depth: usize) -> Vec<AggregatedLevel> {
        let inner = self.inner.read();
        Self::aggregate_side(&inner, |r| &r.asks, true, depth)
    }

    /// Best bid/ask across non-stale venues.
    #[must_use]
    pub fn get_aggregated_bbo(&self) -> AggregatedBbo {
        AggregatedBbo {
            best_bid: self.get_aggregated_bids(1).into_iter().next(),
            best_ask: self.get_aggregated_asks(1).into_iter().next(),
        }
    }

    /// Raw top-of-book for one venue, regardless of staleness.
    #[must_use]
    pub fn get_venue_bbo(&self, venue: Venue) -> Option<(Level, Level)> {
        let inner = self.inner.read();
        let record = inner.venues.get(&venue)?;
        Some((*record.bids.first()?, *record.asks.first()?))
    }

    /// Raw full depth for one venue, regardless of staleness. Used by
    /// liquidity-aware routing, which needs more than the top level.
    #[must_use]
    pub fn get_venue_depth(&self, venue: Venue) -> Option<(Vec<Level>, Vec<Level>)> {
        let inner = self.inner.read();
        let record = inner.venues.get(&venue)?;
        Some((record.bids.clone(), record.asks.clone()))
    }

    /// Every registered venue with its staleness and last-update time, in
    /// registration order.
    #[must_use]
    pub fn get_venues(&self) -> Vec<VenueStatus> {
        let inner = self.inner.read();
        inner
            .registration_order
            .iter()
            .filter_map(|v| {
                inner.venues.get(v).map(|r| VenueStatus {
                    venue: *v,
                    is_stale: r.stale,
                    last_update_ns: r.last_update_ns,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lvl(price: f64, qty: f64) -> Level {
        Level { price, qty }
    }

    #[test]
    fn s1_best_price_routing_inputs_produce_expected_aggregated_bbo() {
        let book = AggregatedOrderBook::new(
            SymbolId::new("BTCUSDT"),
            Duration::from_secs(1),
            Duration::from_secs(5),
        );
        book.update_venue_bbo(Venue::Binance, lvl(50000.0, 1.0), lvl(50100.0, 1.0), 1_000);
        book.update_venue_bbo(Venue::Okx, lvl(50050.0, 1.0), lvl(50080.0, 1.0), 1_000);

        let bbo = book.get_aggregated_bbo();
        assert_eq!(bbo.best_bid.unwrap().price, 50050.0);
        assert_eq!(bbo.best_ask.unwrap().price, 50080.0);
    }

    #[test]
    fn s5_stale_venue_excluded_from_bbo_but_listed() {
        let book = AggregatedOrderBook::new(
            SymbolId::new("BTCUSDT"),
            Duration::from_millis(100),
            Duration::from_millis(500),
        );
        book.update_venue_bbo(Venue::Binance, lvl(100.0, 1.0), lvl(101.0, 1.0), 0);
        book.update_venue_bbo(Venue::Okx, lvl(99.0, 1.0), lvl(102.0, 1.0), 0);

        // Binance ages past max_age (500ms = 500_000_000ns); OKX refreshes.
        book.update_venue_bbo(Venue::Okx, lvl(99.5, 1.0), lvl(101.5, 1.0), 600_000_000);
        book.check_staleness(600_000_000);

        let bbo = book.get_aggregated_bbo();
        assert_eq!(bbo.best_bid.unwrap().price, 99.5);
        assert_eq!(bbo.best_ask.unwrap().price, 101.5);

        let venues = book.get_venues();
        let binance_status = venues.iter().find(|v| v.venue == Venue::Binance).unwrap();
        assert!(binance_status.is_stale);
    }

    #[test]
    fn stale_venue_reappears_on_fresh_update() {
        let book = AggregatedOrderBook::new(
            SymbolId::new("BTCUSDT"),
            Duration::from_millis(10),
            Duration::from_millis(50),
        );
        book.update_venue_bbo(Venue::Binance, lvl(100.0, 1.0), lvl(101.0, 1.0), 0);
        book.check_staleness(100_000_000);
        assert!(book.get_venues()[0].is_stale);

        book.update_venue_bbo(Venue::Binance, lvl(100.0, 1.0), lvl(101.0, 1.0), 100_000_000);
        assert!(!book.get_venues()[0].is_stale);
    }

    #[test]
    fn invariant_best_bid_never_exceeds_best_ask() {
        let book = AggregatedOrderBook::new(
            SymbolId::new("BTCUSDT"),
            Duration::from_secs(1),
            Duration::from_secs(5),
        );
        book.update_venue_bbo(Venue::Binance, lvl(50000.0, 1.0), lvl(50100.0, 1.0), 0);
        let bbo = book.get_aggregated_bbo();
        assert!(bbo.best_bid.unwrap().price <= bbo.best_ask.unwrap().price);
    }

    #[test]
    fn tie_break_within_price_follows_registration_order() {
        let book = AggregatedOrderBook::new(
            SymbolId::new("BTCUSDT"),
            Duration::from_secs(1),
            Duration::from_secs(5),
        );
        book.update_venue_bbo(Venue::Okx, lvl(100.0, 1.0), lvl(101.0, 2.0), 0);
        book.update_venue_bbo(Venue::Binance, lvl(100.0, 3.0), lvl(101.0, 4.0), 0);
        let bids = book.get_aggregated_bids(1);
        assert_eq!(bids[0].venues[0].0, Venue::Okx);
        assert_eq!(bids[0].total_qty, 4.0);
    }
}
