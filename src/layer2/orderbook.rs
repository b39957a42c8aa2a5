// Order Book Replica
// Single-writer: only the DepthSynchronizer mutates it, readers get `&OrderBook`

use ordered_float::OrderedFloat;
use std::collections::BTreeMap;
use std::ops::Bound::Included;
use tracing::debug;

use crate::core::types::Side;
use crate::layer2::parser::{ParsedDepthSnapshot, PriceLevel};

type Price = OrderedFloat<f64>;
type Quantity = f64;

/// Local replica of one instrument's limit order book.
///
/// Bids and asks are kept in `BTreeMap`s keyed by price; bids are read in
/// descending order, asks ascending. A level is never stored at zero quantity.
#[derive(Clone, Debug)]
pub struct OrderBook {
    pub symbol: String,
    bids: BTreeMap<Price, Quantity>,
    asks: BTreeMap<Price, Quantity>,
    last_update_id: u64,
    update_count: u64,
}

fn apply_level(side: &mut BTreeMap<Price, Quantity>, level: &PriceLevel) {
    let key = OrderedFloat(level.price);
    if level.quantity <= 0.0 {
        side.remove(&key);
    } else {
        side.insert(key, level.quantity);
    }
}

impl OrderBook {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
            update_count: 0,
        }
    }

    /// Replace the whole book with a snapshot
    pub fn load_snapshot(&mut self, snapshot: &ParsedDepthSnapshot) {
        self.bids.clear();
        self.asks.clear();
        for level in &snapshot.bids {
            apply_level(&mut self.bids, level);
        }
        for level in &snapshot.asks {
            apply_level(&mut self.asks, level);
        }
        self.last_update_id = snapshot.last_update_id;
        self.update_count = 0;

        debug!(
            last_update_id = self.last_update_id,
            bid_levels = self.bids.len(),
            ask_levels = self.asks.len(),
            "Order book seeded from snapshot"
        );
    }

    /// Merge a diff: quantity 0 removes the level, anything else overwrites it
    pub fn apply_diff(&mut self, bids: &[PriceLevel], asks: &[PriceLevel], final_update_id: u64) {
        for level in bids {
            apply_level(&mut self.bids, level);
        }
        for level in asks {
            apply_level(&mut self.asks, level);
        }
        self.last_update_id = final_update_id;
        self.update_count += 1;
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_update_id = 0;
        self.update_count = 0;
    }

    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(p, &q)| PriceLevel::new(p.0, q))
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.iter().next().map(|(p, &q)| PriceLevel::new(p.0, q))
    }

    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b.price + a.price) / 2.0),
            _ => None,
        }
    }

    pub fn spread_bps(&self) -> Option<f64> {
        let (bid, ask) = (self.best_bid()?, self.best_ask()?);
        let mid = (bid.price + ask.price) / 2.0;
        if mid <= 0.0 {
            return None;
        }
        Some((ask.price - bid.price) / mid * 10_000.0)
    }

    /// Quantity resting at an exact price on one side (0.0 if absent)
    pub fn qty_at(&self, side: Side, price: f64) -> f64 {
        let book = match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        };
        book.get(&OrderedFloat(price)).copied().unwrap_or(0.0)
    }

    /// Top N bid levels, best first
    pub fn top_bids(&self, n: usize) -> Vec<PriceLevel> {
        self.bids
            .iter()
            .rev()
            .take(n)
            .map(|(price, &qty)| PriceLevel::new(price.0, qty))
            .collect()
    }

    /// Top N ask levels, best first
    pub fn top_asks(&self, n: usize) -> Vec<PriceLevel> {
        self.asks
            .iter()
            .take(n)
            .map(|(price, &qty)| PriceLevel::new(price.0, qty))
            .collect()
    }

    /// Total quantity on one side with price in `[low, high]`
    pub fn qty_between(&self, side: Side, low: f64, high: f64) -> f64 {
        if !(low <= high) {
            return 0.0;
        }
        let book = match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        };
        book.range((Included(OrderedFloat(low)), Included(OrderedFloat(high))))
            .map(|(_, &q)| q)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> OrderBook {
        let mut ob = OrderBook::new("btcusdt");
        ob.load_snapshot(&ParsedDepthSnapshot {
            last_update_id: 100,
            event_time: None,
            bids: vec![
                PriceLevel::new(50000.0, 1.0),
                PriceLevel::new(49999.0, 2.0),
                PriceLevel::new(49998.0, 3.0),
            ],
            asks: vec![
                PriceLevel::new(50001.0, 1.5),
                PriceLevel::new(50002.0, 2.5),
                PriceLevel::new(50003.0, 3.5),
            ],
        });
        ob
    }

    #[test]
    fn test_snapshot_processing() {
        let ob = seeded();
        assert_eq!(ob.symbol, "BTCUSDT");
        assert_eq!(ob.best_bid().unwrap().price, 50000.0);
        assert_eq!(ob.best_ask().unwrap().price, 50001.0);
        assert_eq!(ob.last_update_id(), 100);
        assert_eq!(ob.mid_price(), Some(50000.5));
    }

    #[test]
    fn test_snapshot_skips_zero_levels() {
        let mut ob = OrderBook::new("BTCUSDT");
        ob.load_snapshot(&ParsedDepthSnapshot {
            last_update_id: 1,
            event_time: None,
            bids: vec![PriceLevel::new(10.0, 0.0), PriceLevel::new(9.0, 1.0)],
            asks: vec![PriceLevel::new(11.0, 1.0)],
        });
        assert_eq!(ob.bid_levels(), 1);
        assert_eq!(ob.qty_at(Side::Bid, 10.0), 0.0);
    }

    #[test]
    fn test_differential_update() {
        let mut ob = seeded();
        ob.apply_diff(
            &[PriceLevel::new(50000.0, 2.0), PriceLevel::new(49997.0, 0.5)],
            &[PriceLevel::new(50001.0, 0.0), PriceLevel::new(50004.0, 3.0)],
            101,
        );

        assert_eq!(ob.best_bid().unwrap().quantity, 2.0);
        assert_eq!(ob.best_ask().unwrap().price, 50002.0);
        assert_eq!(ob.bid_levels(), 4);
        assert_eq!(ob.ask_levels(), 3);
        assert_eq!(ob.last_update_id(), 101);
        assert_eq!(ob.update_count(), 1);
    }

    #[test]
    fn test_zero_quantity_removes_level_entirely() {
        let mut ob = seeded();
        ob.apply_diff(&[PriceLevel::new(49999.0, 0.0)], &[], 101);
        assert_eq!(ob.qty_at(Side::Bid, 49999.0), 0.0);
        assert!(ob.top_bids(10).iter().all(|l| l.price != 49999.0));
        assert!(ob.top_bids(10).iter().all(|l| l.quantity > 0.0));
        // Removing an absent level is a no-op
        ob.apply_diff(&[PriceLevel::new(1.0, 0.0)], &[], 102);
        assert_eq!(ob.bid_levels(), 2);
    }

    #[test]
    fn test_top_levels_ordering() {
        let ob = seeded();
        let bids = ob.top_bids(2);
        assert_eq!(bids.len(), 2);
        assert_eq!(bids[0].price, 50000.0);
        assert_eq!(bids[1].price, 49999.0);

        let asks = ob.top_asks(2);
        assert_eq!(asks[0].price, 50001.0);
        assert_eq!(asks[1].price, 50002.0);
    }

    #[test]
    fn test_qty_between() {
        let ob = seeded();
        assert_eq!(ob.qty_between(Side::Bid, 49999.0, 50000.0), 3.0);
        assert_eq!(ob.qty_between(Side::Ask, 50001.0, 50002.5), 4.0);
        assert_eq!(ob.qty_between(Side::Ask, 10.0, 5.0), 0.0);
    }

    #[test]
    fn test_spread_and_clear() {
        let mut ob = seeded();
        let spread = ob.spread_bps().unwrap();
        assert!((spread - 1.0 / 50000.5 * 10_000.0).abs() < 1e-9);

        ob.clear();
        assert!(ob.is_empty());
        assert!(ob.mid_price().is_none());
        assert!(ob.best_bid().is_none());
        assert!(ob.spread_bps().is_none());
    }
}
