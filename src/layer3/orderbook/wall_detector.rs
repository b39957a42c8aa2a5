// Wall Detector - tracks large resting orders and reports when they are pulled
// Raw events feed the round scorer; imbalance-confirmed (gated) events feed signals

use ordered_float::OrderedFloat;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

use crate::core::config::{secs_to_ms, DetectorConfig};
use crate::core::events::{WallEvent, WallEventKind};
use crate::core::types::{distance_bps, Side};
use crate::layer2::orderbook::OrderBook;
use crate::layer2::parser::PriceLevel;
use crate::layer3::common::{calc_imbalance, median_quantity};

type PriceKey = OrderedFloat<f64>;

/// A resting order judged large at detection time
#[derive(Debug, Clone, PartialEq)]
pub struct Wall {
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
}

impl Wall {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.first_seen_ms
    }
}

/// Everything one book update produced
#[derive(Debug, Clone, Default)]
pub struct DetectorOutput {
    /// Every emitted drop, for the scorer
    pub raw_events: Vec<WallEvent>,
    /// Drops confirmed by imbalance, for the signal generator
    pub gated_events: Vec<WallEvent>,
    pub imbalance: f64,
    pub spread_bps: f64,
    pub mid: f64,
    /// Walls tracked after this update
    pub wall_candidates: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WallDetectorStats {
    pub updates_processed: u64,
    pub walls_created: u64,
    pub walls_expired: u64,
    pub walls_evicted: u64,
    pub raw_events: u64,
    pub gated_events: u64,
    pub touch_filtered: u64,
    pub cooldown_suppressed: u64,
}

impl fmt::Display for WallDetectorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WallDetectorStats(updates={}, created={}, expired={}, evicted={}, raw={}, gated={})",
            self.updates_processed,
            self.walls_created,
            self.walls_expired,
            self.walls_evicted,
            self.raw_events,
            self.gated_events
        )
    }
}

/// Wall lifecycle engine
///
/// Per book update, in order:
/// 1. drop check of every tracked wall against the full book,
/// 2. expiry (`now - first_seen > ttl`) and distance eviction,
/// 3. tracking/refresh of qualifying top-N levels.
///
/// A wall is consumed as soon as it produces a drop; a later wall at the same
/// price starts a fresh lifecycle (after `price_cooldown_sec`, if set).
pub struct WallDetector {
    n_levels: usize,
    wall_multiplier: f64,
    min_wall_qty: f64,
    max_wall_distance_bps: f64,
    ttl_ms: i64,
    wall_drop_pct: f64,
    major_drop_pct: f64,
    full_remove_eps: f64,
    max_touch_bps: f64,
    price_cooldown_ms: i64,
    only_full_remove: bool,
    imbalance_threshold: f64,

    bid_walls: BTreeMap<PriceKey, Wall>,
    ask_walls: BTreeMap<PriceKey, Wall>,
    // (side, price) -> time the last wall there was consumed
    consumed_at: BTreeMap<(bool, PriceKey), i64>,

    stats: WallDetectorStats,
}

impl WallDetector {
    pub fn new(config: &DetectorConfig, imbalance_threshold: f64) -> Self {
        Self {
            n_levels: config.n_levels,
            wall_multiplier: config.wall_multiplier,
            min_wall_qty: config.min_wall_qty,
            max_wall_distance_bps: config.max_wall_distance_bps,
            ttl_ms: secs_to_ms(config.event_ttl_sec),
            wall_drop_pct: config.wall_drop_pct,
            major_drop_pct: config.major_drop_pct,
            full_remove_eps: config.full_remove_eps,
            max_touch_bps: config.max_touch_bps,
            price_cooldown_ms: secs_to_ms(config.price_cooldown_sec),
            only_full_remove: config.only_full_remove,
            imbalance_threshold,
            bid_walls: BTreeMap::new(),
            ask_walls: BTreeMap::new(),
            consumed_at: BTreeMap::new(),
            stats: WallDetectorStats::default(),
        }
    }

    pub fn stats(&self) -> &WallDetectorStats {
        &self.stats
    }

    pub fn wall_count(&self) -> usize {
        self.bid_walls.len() + self.ask_walls.len()
    }

    pub fn wall(&self, side: Side, price: f64) -> Option<&Wall> {
        self.walls(side).get(&OrderedFloat(price))
    }

    /// Forget every wall; called when the book is resynced
    pub fn reset(&mut self) {
        let dropped = self.wall_count();
        self.bid_walls.clear();
        self.ask_walls.clear();
        self.consumed_at.clear();
        if dropped > 0 {
            debug!(walls = dropped, "Wall detector reset");
        }
    }

    fn walls(&self, side: Side) -> &BTreeMap<PriceKey, Wall> {
        match side {
            Side::Bid => &self.bid_walls,
            Side::Ask => &self.ask_walls,
        }
    }

    fn walls_mut(&mut self, side: Side) -> &mut BTreeMap<PriceKey, Wall> {
        match side {
            Side::Bid => &mut self.bid_walls,
            Side::Ask => &mut self.ask_walls,
        }
    }

    /// Process one consistent book state
    pub fn on_book_update(&mut self, book: &OrderBook, now_ms: i64) -> DetectorOutput {
        self.stats.updates_processed += 1;

        let (best_bid, best_ask) = match (book.best_bid(), book.best_ask()) {
            (Some(b), Some(a)) => (b.price, a.price),
            _ => {
                for side in [Side::Bid, Side::Ask] {
                    self.expire_and_evict(side, None, now_ms);
                }
                return DetectorOutput {
                    wall_candidates: self.wall_count(),
                    ..DetectorOutput::default()
                };
            }
        };

        let mid = (best_bid + best_ask) / 2.0;
        let spread_bps = book.spread_bps().unwrap_or(0.0);

        let top_bids = book.top_bids(self.n_levels);
        let top_asks = book.top_asks(self.n_levels);
        let imbalance = calc_imbalance(&top_bids, &top_asks);

        let mut output = DetectorOutput {
            imbalance,
            spread_bps,
            mid,
            ..DetectorOutput::default()
        };

        for side in [Side::Bid, Side::Ask] {
            self.check_drops(side, book, mid, best_bid, best_ask, imbalance, now_ms, &mut output);
        }
        for side in [Side::Bid, Side::Ask] {
            self.expire_and_evict(side, Some(mid), now_ms);
        }

        self.track(Side::Bid, &top_bids, mid, now_ms);
        self.track(Side::Ask, &top_asks, mid, now_ms);

        output.wall_candidates = self.wall_count();
        output
    }

    #[allow(clippy::too_many_arguments)]
    fn check_drops(
        &mut self,
        side: Side,
        book: &OrderBook,
        mid: f64,
        best_bid: f64,
        best_ask: f64,
        imbalance: f64,
        now_ms: i64,
        output: &mut DetectorOutput,
    ) {
        let touch = match side {
            Side::Bid => best_bid,
            Side::Ask => best_ask,
        };

        let mut consumed: Vec<(PriceKey, WallEventKind, f64, f64)> = Vec::new();
        for (key, wall) in self.walls(side) {
            if wall.age_ms(now_ms) > self.ttl_ms || wall.quantity <= 0.0 {
                continue;
            }
            let current = book.qty_at(side, wall.price);
            let drop_pct = (wall.quantity - current) / wall.quantity;
            if let Some(kind) = WallEventKind::classify(
                current,
                drop_pct,
                self.wall_drop_pct,
                self.major_drop_pct,
                self.full_remove_eps,
            ) {
                consumed.push((*key, kind, current, drop_pct));
            }
        }

        for (key, kind, current, drop_pct) in consumed {
            let wall = match self.walls_mut(side).remove(&key) {
                Some(wall) => wall,
                None => continue,
            };
            if self.price_cooldown_ms > 0 {
                self.consumed_at.insert((side == Side::Bid, key), now_ms);
            }

            let touch_bps = distance_bps(wall.price, touch);
            if touch_bps > self.max_touch_bps {
                self.stats.touch_filtered += 1;
                debug!(
                    side = %side,
                    price = wall.price,
                    touch_bps = touch_bps,
                    "Wall drop away from touch, consumed silently"
                );
                continue;
            }

            let event = WallEvent {
                kind,
                side,
                price: wall.price,
                quantity_before: wall.quantity,
                quantity_after: current,
                drop_pct,
                timestamp_ms: now_ms,
                wall_age_ms: wall.age_ms(now_ms),
                gated: false,
                imbalance,
                dist_bps: distance_bps(wall.price, mid),
                touch_bps,
                best_bid,
                best_ask,
            };

            self.stats.raw_events += 1;
            debug!(event = %event, "Wall drop detected");

            if self.confirms(&event) {
                self.stats.gated_events += 1;
                info!(
                    kind = %event.kind,
                    side = %event.side,
                    price = event.price,
                    drop_pct = event.drop_pct,
                    imbalance = imbalance,
                    "Gated wall event"
                );
                output.gated_events.push(event.clone().into_gated());
            }
            output.raw_events.push(event);
        }
    }

    /// Imbalance points the same way as the pulled wall
    fn confirms(&self, event: &WallEvent) -> bool {
        if self.only_full_remove && event.kind != WallEventKind::FullRemove {
            return false;
        }
        match event.side {
            Side::Ask => event.imbalance >= self.imbalance_threshold,
            Side::Bid => event.imbalance <= -self.imbalance_threshold,
        }
    }

    /// Age out walls past the TTL; without a mid only expiry applies
    fn expire_and_evict(&mut self, side: Side, mid: Option<f64>, now_ms: i64) {
        let ttl_ms = self.ttl_ms;
        let max_dist = self.max_wall_distance_bps;
        let mut expired = 0u64;
        let mut evicted = 0u64;

        self.walls_mut(side).retain(|_, wall| {
            if wall.age_ms(now_ms) > ttl_ms {
                expired += 1;
                false
            } else if mid.is_some_and(|m| distance_bps(wall.price, m) > max_dist) {
                evicted += 1;
                false
            } else {
                true
            }
        });

        self.stats.walls_expired += expired;
        self.stats.walls_evicted += evicted;
        if expired + evicted > 0 {
            debug!(side = %side, expired = expired, evicted = evicted, "Walls retired");
        }
    }

    fn track(&mut self, side: Side, levels: &[PriceLevel], mid: f64, now_ms: i64) {
        let median = median_quantity(levels);
        if median <= 0.0 {
            return;
        }
        let threshold = self.min_wall_qty.max(self.wall_multiplier * median);

        if self.price_cooldown_ms > 0 {
            let cooldown = self.price_cooldown_ms;
            self.consumed_at.retain(|_, at| now_ms - *at < cooldown);
        }

        for level in levels {
            if level.quantity < threshold || distance_bps(level.price, mid) > self.max_wall_distance_bps {
                continue;
            }
            let key = OrderedFloat(level.price);

            if let Some(wall) = self.walls_mut(side).get_mut(&key) {
                wall.quantity = level.quantity;
                wall.last_seen_ms = now_ms;
                continue;
            }

            if self.consumed_at.contains_key(&(side == Side::Bid, key)) {
                self.stats.cooldown_suppressed += 1;
                continue;
            }

            self.walls_mut(side).insert(
                key,
                Wall {
                    side,
                    price: level.price,
                    quantity: level.quantity,
                    first_seen_ms: now_ms,
                    last_seen_ms: now_ms,
                },
            );
            self.stats.walls_created += 1;
            debug!(
                side = %side,
                price = level.price,
                quantity = level.quantity,
                threshold = threshold,
                "Wall tracked"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer2::parser::ParsedDepthSnapshot;

    fn config() -> DetectorConfig {
        DetectorConfig {
            n_levels: 20,
            wall_multiplier: 5.0,
            min_wall_qty: 0.0,
            max_wall_distance_bps: 50.0,
            event_ttl_sec: 2.0,
            wall_drop_pct: 0.70,
            major_drop_pct: 0.90,
            full_remove_eps: 1e-9,
            max_touch_bps: 25.0,
            price_cooldown_sec: 0.0,
            only_full_remove: false,
        }
    }

    /// Ask wall of 10 at 50000 over 1-lot levels; bid depth sets imbalance
    fn book_with_ask_wall(wall_qty: f64, bid_qty: f64) -> OrderBook {
        let mut bids = Vec::new();
        let mut asks = vec![PriceLevel::new(50000.0, wall_qty)];
        for i in 0..5 {
            bids.push(PriceLevel::new(49999.0 - i as f64, bid_qty));
            asks.push(PriceLevel::new(50001.0 + i as f64, 1.0));
        }
        let mut book = OrderBook::new("BTCUSDT");
        book.load_snapshot(&ParsedDepthSnapshot {
            last_update_id: 1,
            event_time: None,
            bids,
            asks,
        });
        book
    }

    #[test]
    fn test_wall_qualifies_and_is_tracked() {
        let mut detector = WallDetector::new(&config(), 0.12);
        let out = detector.on_book_update(&book_with_ask_wall(10.0, 1.0), 0);
        assert!(out.raw_events.is_empty());
        assert_eq!(out.wall_candidates, 1);
        let wall = detector.wall(Side::Ask, 50000.0).unwrap();
        assert_eq!(wall.quantity, 10.0);
        assert_eq!(wall.first_seen_ms, 0);
    }

    #[test]
    fn test_min_wall_qty_raises_threshold() {
        let cfg = DetectorConfig {
            min_wall_qty: 50.0,
            ..config()
        };
        let mut detector = WallDetector::new(&cfg, 0.12);
        let out = detector.on_book_update(&book_with_ask_wall(10.0, 1.0), 0);
        assert_eq!(out.wall_candidates, 0);
    }

    #[test]
    fn test_gated_long_on_ask_drop_with_positive_imbalance() {
        let mut detector = WallDetector::new(&config(), 0.12);
        detector.on_book_update(&book_with_ask_wall(10.0, 1.5), 0);

        // 10 -> 2 is an 80% drop; bids 10 vs asks 7 gives imbalance 3/17
        let mut book = book_with_ask_wall(10.0, 1.5);
        book.apply_diff(&[PriceLevel::new(49999.0, 4.0)], &[PriceLevel::new(50000.0, 2.0)], 2);
        let out = detector.on_book_update(&book, 1000);

        assert_eq!(out.raw_events.len(), 1);
        assert_eq!(out.gated_events.len(), 1);
        let event = &out.gated_events[0];
        assert_eq!(event.kind, WallEventKind::Drop);
        assert_eq!(event.side, Side::Ask);
        assert!(event.gated);
        assert!(!out.raw_events[0].gated);
        assert!((event.drop_pct - 0.8).abs() < 1e-12);
        assert_eq!(event.wall_age_ms, 1000);
        assert!(out.imbalance >= 0.12);
        // consumed
        assert!(detector.wall(Side::Ask, 50000.0).is_none());
    }

    #[test]
    fn test_drop_without_confirmation_is_raw_only() {
        let mut detector = WallDetector::new(&config(), 0.12);
        detector.on_book_update(&book_with_ask_wall(10.0, 1.0), 0);

        let mut book = book_with_ask_wall(10.0, 1.0);
        book.apply_diff(&[], &[PriceLevel::new(50000.0, 0.0)], 2);
        let out = detector.on_book_update(&book, 500);

        assert_eq!(out.raw_events.len(), 1);
        assert_eq!(out.raw_events[0].kind, WallEventKind::FullRemove);
        assert!(out.gated_events.is_empty());
    }

    #[test]
    fn test_ttl_boundary() {
        let mut detector = WallDetector::new(&config(), 0.0);
        detector.on_book_update(&book_with_ask_wall(10.0, 1.0), 0);
        let mut dropped = book_with_ask_wall(10.0, 1.0);
        dropped.apply_diff(&[], &[PriceLevel::new(50000.0, 3.0)], 2);
        let out = detector.on_book_update(&dropped, 1999);
        assert_eq!(out.raw_events.len(), 1);
        assert_eq!(out.raw_events[0].kind, WallEventKind::Drop);

        let mut late = WallDetector::new(&config(), 0.0);
        late.on_book_update(&book_with_ask_wall(10.0, 1.0), 0);
        let out = late.on_book_update(&dropped, 2001);
        assert!(out.raw_events.is_empty());
        assert_eq!(late.stats().walls_expired, 1);
    }

    #[test]
    fn test_one_sided_book_still_expires_walls() {
        let mut detector = WallDetector::new(&config(), 0.0);
        let mut book = book_with_ask_wall(10.0, 1.0);
        assert_eq!(detector.on_book_update(&book, 0).wall_candidates, 1);

        let cleared: Vec<PriceLevel> = (0..5).map(|i| PriceLevel::new(49999.0 - i as f64, 0.0)).collect();
        book.apply_diff(&cleared, &[], 2);
        assert!(book.best_bid().is_none());

        // Within the TTL the wall survives; there is no mid to evict against
        assert_eq!(detector.on_book_update(&book, 1_000).wall_candidates, 1);

        let out = detector.on_book_update(&book, 2_001);
        assert_eq!(out.wall_candidates, 0);
        assert!(out.raw_events.is_empty());
        assert_eq!(detector.stats().walls_expired, 1);
    }

    #[test]
    fn test_touch_filter_consumes_silently() {
        let cfg = DetectorConfig {
            max_touch_bps: 0.1,
            ..config()
        };
        let mut detector = WallDetector::new(&cfg, 0.0);
        // Wall sits two levels behind the best ask
        let mut book = book_with_ask_wall(1.0, 1.0);
        book.apply_diff(&[], &[PriceLevel::new(50002.0, 10.0)], 2);
        detector.on_book_update(&book, 0);
        assert!(detector.wall(Side::Ask, 50002.0).is_some());

        book.apply_diff(&[], &[PriceLevel::new(50002.0, 0.0)], 3);
        let out = detector.on_book_update(&book, 100);
        assert!(out.raw_events.is_empty());
        assert!(detector.wall(Side::Ask, 50002.0).is_none());
        assert_eq!(detector.stats().touch_filtered, 1);
    }

    #[test]
    fn test_only_full_remove_gate() {
        let cfg = DetectorConfig {
            only_full_remove: true,
            ..config()
        };
        let mut detector = WallDetector::new(&cfg, 0.0);
        detector.on_book_update(&book_with_ask_wall(10.0, 2.0), 0);
        let mut book = book_with_ask_wall(10.0, 2.0);
        book.apply_diff(&[], &[PriceLevel::new(50000.0, 2.0)], 2);
        let out = detector.on_book_update(&book, 100);
        assert_eq!(out.raw_events.len(), 1);
        assert!(out.gated_events.is_empty());
    }

    #[test]
    fn test_price_cooldown_blocks_rearm() {
        let cfg = DetectorConfig {
            price_cooldown_sec: 5.0,
            ..config()
        };
        let mut detector = WallDetector::new(&cfg, 0.0);
        detector.on_book_update(&book_with_ask_wall(10.0, 1.0), 0);
        let mut book = book_with_ask_wall(10.0, 1.0);
        book.apply_diff(&[], &[PriceLevel::new(50000.0, 0.0)], 2);
        assert_eq!(detector.on_book_update(&book, 100).raw_events.len(), 1);

        // Wall comes back inside the cooldown: not tracked
        let restored = book_with_ask_wall(10.0, 1.0);
        detector.on_book_update(&restored, 1000);
        assert!(detector.wall(Side::Ask, 50000.0).is_none());

        // After the cooldown a fresh lifecycle starts
        detector.on_book_update(&restored, 6000);
        assert_eq!(detector.wall(Side::Ask, 50000.0).unwrap().first_seen_ms, 6000);
    }

    #[test]
    fn test_rearm_without_cooldown_is_fresh_lifecycle() {
        let mut detector = WallDetector::new(&config(), 0.0);
        detector.on_book_update(&book_with_ask_wall(10.0, 1.0), 0);
        let mut book = book_with_ask_wall(10.0, 1.0);
        book.apply_diff(&[], &[PriceLevel::new(50000.0, 0.0)], 2);
        detector.on_book_update(&book, 100);

        detector.on_book_update(&book_with_ask_wall(12.0, 1.0), 200);
        let wall = detector.wall(Side::Ask, 50000.0).unwrap();
        assert_eq!(wall.first_seen_ms, 200);
        assert_eq!(wall.quantity, 12.0);
    }

    #[test]
    fn test_refresh_updates_quantity_and_last_seen() {
        let mut detector = WallDetector::new(&config(), 0.0);
        detector.on_book_update(&book_with_ask_wall(10.0, 1.0), 0);
        detector.on_book_update(&book_with_ask_wall(11.0, 1.0), 300);
        let wall = detector.wall(Side::Ask, 50000.0).unwrap();
        assert_eq!(wall.quantity, 11.0);
        assert_eq!(wall.first_seen_ms, 0);
        assert_eq!(wall.last_seen_ms, 300);
    }

    #[test]
    fn test_reset_and_empty_book() {
        let mut detector = WallDetector::new(&config(), 0.0);
        detector.on_book_update(&book_with_ask_wall(10.0, 1.0), 0);
        detector.reset();
        assert_eq!(detector.wall_count(), 0);

        let out = detector.on_book_update(&OrderBook::new("BTCUSDT"), 10);
        assert!(out.raw_events.is_empty());
        assert_eq!(out.mid, 0.0);
    }
}
