// Round Scorer - bounded up/down probability for the active round
// Steady-state band pressure plus exponentially decaying wall-event shocks

use serde::Serialize;
use std::fmt;
use tracing::debug;

use crate::core::config::{secs_to_ms, BaseCenterMode, ScorerConfig};
use crate::core::events::{WallEvent, WallEventKind};
use crate::core::types::{clamp, distance_bps, Side};
use crate::layer2::orderbook::OrderBook;
use crate::layer3::scoring::round_clock::{Round, RoundClock, RoundTransition};

const SHOCK_PRUNE_EPS: f64 = 1e-6;
const AGE_MULT_FLOOR: f64 = 0.3;
const DISTANCE_MULT_FLOOR: f64 = 0.1;

/// Depth inside one band around the center
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandPressure {
    pub bps: f64,
    pub weight: f64,
    pub bid_qty: f64,
    pub ask_qty: f64,
}

/// Externally visible score; `p_down == 100 - p_up`, both in [0, 100]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreSnapshot {
    pub round_id: i64,
    pub p_up: f64,
    pub p_down: f64,
    pub base_raw: f64,
    pub base_p_up: f64,
    pub shock: f64,
    pub timestamp_ms: i64,
    pub reference_price: f64,
    pub center_price: f64,
    pub mid: f64,
    /// False when weighted depth did not exceed `min_depth_sum`
    pub depth_ok: bool,
    pub weighted_depth: f64,
    pub t_left_sec: f64,
    pub bands: Vec<BandPressure>,
}

impl fmt::Display for ScoreSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Score(round={}, p_up={:.2}, p_down={:.2}, base={:.2}, shock={:+.2}, depth_ok={})",
            self.round_id, self.p_up, self.p_down, self.base_p_up, self.shock, self.depth_ok
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct Shock {
    magnitude: f64,
    at_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundScorerStats {
    pub recomputes: u64,
    pub shocks_applied: u64,
    pub shocks_ignored: u64,
    pub rounds_started: u64,
    pub thin_book_updates: u64,
}

pub struct RoundScorer {
    config: ScorerConfig,
    half_life_ms: f64,
    clock: RoundClock,
    shocks: Vec<Shock>,
    last: Option<ScoreSnapshot>,
    stats: RoundScorerStats,
}

impl RoundScorer {
    pub fn new(config: &ScorerConfig) -> Self {
        Self {
            config: config.clone(),
            half_life_ms: secs_to_ms(config.shock_half_life_sec.max(0.1)) as f64,
            clock: RoundClock::new(config.round_interval_sec),
            shocks: Vec::new(),
            last: None,
            stats: RoundScorerStats::default(),
        }
    }

    pub fn stats(&self) -> &RoundScorerStats {
        &self.stats
    }

    pub fn current_round(&self) -> Option<&Round> {
        self.clock.current()
    }

    /// Latest snapshot; held unchanged while the book is resyncing
    pub fn current_snapshot(&self) -> Option<&ScoreSnapshot> {
        self.last.as_ref()
    }

    pub fn active_shocks(&self) -> usize {
        self.shocks.len()
    }

    /// Advance the round clock; a rollover clears all shocks
    pub fn roll_round(&mut self, now_ms: i64, mid: f64) -> RoundTransition {
        let transition = self.clock.observe(now_ms, mid);
        match transition {
            RoundTransition::Started(_) => self.stats.rounds_started += 1,
            RoundTransition::RolledOver { previous, .. } => {
                self.stats.rounds_started += 1;
                if !self.shocks.is_empty() {
                    debug!(
                        previous_round = previous.round_id,
                        cleared = self.shocks.len(),
                        "Shocks cleared at round rollover"
                    );
                }
                self.shocks.clear();
            }
            RoundTransition::Unchanged => {}
        }
        transition
    }

    /// Aggregate decayed shock at `now_ms`, clamped to `±max_shock`
    pub fn shock_value(&self, now_ms: i64) -> f64 {
        let total: f64 = self
            .shocks
            .iter()
            .map(|s| self.decayed(s, now_ms))
            .sum();
        clamp(total, -self.config.max_shock, self.config.max_shock)
    }

    fn decayed(&self, shock: &Shock, now_ms: i64) -> f64 {
        let dt = (now_ms - shock.at_ms).max(0) as f64;
        shock.magnitude * 0.5f64.powf(dt / self.half_life_ms)
    }

    fn prune(&mut self, now_ms: i64) {
        let before = self.shocks.len();
        let half_life_ms = self.half_life_ms;
        self.shocks.retain(|s| {
            let dt = (now_ms - s.at_ms).max(0) as f64;
            (s.magnitude * 0.5f64.powf(dt / half_life_ms)).abs() >= SHOCK_PRUNE_EPS
        });
        if self.shocks.len() < before {
            debug!(pruned = before - self.shocks.len(), "Decayed shocks pruned");
        }
    }

    fn kind_magnitude(&self, kind: WallEventKind) -> f64 {
        match kind {
            WallEventKind::Drop => self.config.shock_drop,
            WallEventKind::MajorDrop => self.config.shock_major_drop,
            WallEventKind::FullRemove => self.config.shock_full_remove,
        }
    }

    /// 0.3 for very young walls, ramping to 1.0 at full age, back down to 0.3 at stale age
    pub fn age_multiplier(&self, age_sec: f64) -> f64 {
        let min_age = self.config.shock_min_age_sec;
        let full_age = self.config.shock_age_full_sec.max(min_age);
        let stale_age = self.config.shock_stale_age_sec.max(full_age);

        if age_sec <= min_age {
            AGE_MULT_FLOOR
        } else if age_sec < full_age {
            AGE_MULT_FLOOR + (1.0 - AGE_MULT_FLOOR) * (age_sec - min_age) / (full_age - min_age)
        } else if age_sec < stale_age {
            1.0 - (1.0 - AGE_MULT_FLOOR) * (age_sec - full_age) / (stale_age - full_age)
        } else {
            AGE_MULT_FLOOR
        }
    }

    /// `clamp(1 - dist / cap, 0.1, 1)`
    pub fn distance_multiplier(&self, dist_bps: f64) -> f64 {
        let cap = self.config.shock_distance_bps_cap.max(1e-6);
        clamp(1.0 - dist_bps / cap, DISTANCE_MULT_FLOOR, 1.0)
    }

    /// Register a raw wall event; returns the signed shock added, if any
    pub fn on_wall_event(&mut self, event: &WallEvent, now_ms: i64) -> Option<f64> {
        let reference = match self.clock.current() {
            Some(round) if round.reference_price > 0.0 => round.reference_price,
            _ => {
                self.stats.shocks_ignored += 1;
                return None;
            }
        };

        self.prune(now_ms);

        let dist_bps = distance_bps(event.price, reference);
        let magnitude = event.side.drop_sign()
            * self.kind_magnitude(event.kind)
            * self.distance_multiplier(dist_bps)
            * self.age_multiplier(event.age_sec());

        if magnitude == 0.0 {
            self.stats.shocks_ignored += 1;
            return None;
        }

        self.shocks.push(Shock {
            magnitude,
            at_ms: now_ms,
        });
        self.stats.shocks_applied += 1;

        debug!(
            kind = %event.kind,
            side = %event.side,
            dist_bps = dist_bps,
            age_sec = event.age_sec(),
            shock = magnitude,
            total = self.shock_value(now_ms),
            "Shock applied"
        );

        Some(magnitude)
    }

    fn center(&self, reference: f64, mid: f64) -> f64 {
        match self.config.base_center_mode {
            BaseCenterMode::Reference => reference,
            BaseCenterMode::Mid => mid,
            BaseCenterMode::Blend => {
                let w = clamp(self.config.base_ref_weight, 0.0, 1.0);
                w * reference + (1.0 - w) * mid
            }
        }
    }

    fn band_pressure(&self, book: &OrderBook, center: f64) -> Vec<BandPressure> {
        self.config
            .band_bps
            .iter()
            .zip(self.config.band_weights.iter())
            .map(|(&bps, &weight)| {
                let delta = center * bps / 10_000.0;
                BandPressure {
                    bps,
                    weight,
                    bid_qty: book.qty_between(Side::Bid, center - delta, center),
                    ask_qty: book.qty_between(Side::Ask, center, center + delta),
                }
            })
            .collect()
    }

    /// Recompute the score from a consistent book. `None` if the book has no mid.
    pub fn recompute(&mut self, book: &OrderBook, now_ms: i64) -> Option<ScoreSnapshot> {
        let mid = book.mid_price()?;
        self.roll_round(now_ms, mid);
        self.prune(now_ms);

        let round = *self.clock.current()?;
        let center = self.center(round.reference_price, mid);
        let bands = self.band_pressure(book, center);

        let weighted_bid: f64 = bands.iter().map(|b| b.weight * b.bid_qty).sum();
        let weighted_ask: f64 = bands.iter().map(|b| b.weight * b.ask_qty).sum();
        let weighted_depth = weighted_bid + weighted_ask;

        let depth_ok = weighted_depth > self.config.min_depth_sum && weighted_depth > 0.0;
        let base_raw = if depth_ok {
            clamp((weighted_bid - weighted_ask) / weighted_depth, -1.0, 1.0)
        } else {
            self.stats.thin_book_updates += 1;
            0.0
        };

        let base_p_up = clamp(50.0 + base_raw * self.config.base_scale, 0.0, 100.0);
        let shock = self.shock_value(now_ms);
        let p_up = clamp(base_p_up + shock, 0.0, 100.0);

        let snapshot = ScoreSnapshot {
            round_id: round.round_id,
            p_up,
            p_down: 100.0 - p_up,
            base_raw,
            base_p_up,
            shock,
            timestamp_ms: now_ms,
            reference_price: round.reference_price,
            center_price: center,
            mid,
            depth_ok,
            weighted_depth,
            t_left_sec: round.time_left_sec(now_ms),
            bands,
        };

        self.stats.recomputes += 1;
        self.last = Some(snapshot.clone());
        Some(snapshot)
    }
}
