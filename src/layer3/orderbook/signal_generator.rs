// Signal Generator - turns gated wall events into directional signals
// Per-direction cooldown plus at most one signal per direction per book tick

use std::fmt;
use tracing::{debug, info};

use crate::core::config::{secs_to_ms, SignalConfig};
use crate::core::events::{Signal, WallEvent};
use crate::core::types::{Direction, Side};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalGeneratorStats {
    pub events_received: u64,
    pub signals_emitted: u64,
    pub rejected_imbalance: u64,
    pub rejected_cooldown: u64,
    pub rejected_same_tick: u64,
}

impl fmt::Display for SignalGeneratorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SignalGeneratorStats(events={}, signals={}, imbalance_rej={}, cooldown_rej={}, tick_rej={})",
            self.events_received,
            self.signals_emitted,
            self.rejected_imbalance,
            self.rejected_cooldown,
            self.rejected_same_tick
        )
    }
}

pub struct SignalGenerator {
    imbalance_threshold: f64,
    cooldown_ms: i64,
    // Indexed by Direction::index()
    last_signal_ms: [Option<i64>; 2],
    last_signal_tick: [Option<u64>; 2],
    stats: SignalGeneratorStats,
}

impl SignalGenerator {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            imbalance_threshold: config.imbalance_threshold,
            cooldown_ms: secs_to_ms(config.signal_cooldown_sec),
            last_signal_ms: [None; 2],
            last_signal_tick: [None; 2],
            stats: SignalGeneratorStats::default(),
        }
    }

    pub fn stats(&self) -> &SignalGeneratorStats {
        &self.stats
    }

    /// Does the imbalance back the direction implied by the pulled wall?
    pub fn confirms(&self, side: Side, imbalance: f64) -> bool {
        match side {
            Side::Ask => imbalance >= self.imbalance_threshold,
            Side::Bid => imbalance <= -self.imbalance_threshold,
        }
    }

    /// Milliseconds until `direction` may fire again (0 when ready)
    pub fn cooldown_remaining_ms(&self, direction: Direction, now_ms: i64) -> i64 {
        match self.last_signal_ms[direction.index()] {
            Some(last) => (last + self.cooldown_ms - now_ms).max(0),
            None => 0,
        }
    }

    /// Evaluate one gated event seen on book update number `tick`
    pub fn on_gated_event(&mut self, event: &WallEvent, imbalance: f64, tick: u64) -> Option<Signal> {
        self.stats.events_received += 1;

        if !self.confirms(event.side, imbalance) {
            self.stats.rejected_imbalance += 1;
            return None;
        }

        let direction = event.direction();
        let idx = direction.index();
        let now_ms = event.timestamp_ms;

        if self.last_signal_tick[idx] == Some(tick) {
            self.stats.rejected_same_tick += 1;
            return None;
        }

        if let Some(last) = self.last_signal_ms[idx] {
            if now_ms - last < self.cooldown_ms {
                self.stats.rejected_cooldown += 1;
                debug!(
                    direction = %direction,
                    remaining_ms = last + self.cooldown_ms - now_ms,
                    "Signal suppressed by cooldown"
                );
                return None;
            }
        }

        self.last_signal_ms[idx] = Some(now_ms);
        self.last_signal_tick[idx] = Some(tick);
        self.stats.signals_emitted += 1;

        let signal = Signal {
            direction,
            score: Signal::score_for(imbalance),
            timestamp_ms: now_ms,
            imbalance,
            event: event.clone(),
        };

        info!(
            direction = %signal.direction,
            event = %event.kind,
            score = signal.score,
            side = %event.side,
            price = event.price,
            old_qty = event.quantity_before,
            current_qty = event.quantity_after,
            drop_pct = event.drop_pct,
            imbalance = imbalance,
            dist_bps = event.dist_bps,
            touch_bps = event.touch_bps,
            best_bid = event.best_bid,
            best_ask = event.best_ask,
            "SIGNAL"
        );

        Some(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::WallEventKind;

    fn event(side: Side, ts: i64) -> WallEvent {
        WallEvent {
            kind: WallEventKind::Drop,
            side,
            price: 50000.0,
            quantity_before: 10.0,
            quantity_after: 2.0,
            drop_pct: 0.8,
            timestamp_ms: ts,
            wall_age_ms: 1000,
            gated: true,
            imbalance: 0.2,
            dist_bps: 0.1,
            touch_bps: 0.0,
            best_bid: 49999.0,
            best_ask: 50000.0,
        }
    }

    fn generator() -> SignalGenerator {
        SignalGenerator::new(&SignalConfig {
            imbalance_threshold: 0.12,
            signal_cooldown_sec: 5.0,
        })
    }

    #[test]
    fn test_long_on_ask_drop() {
        let mut sg = generator();
        let signal = sg.on_gated_event(&event(Side::Ask, 1000), 0.2, 1).unwrap();
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.score, 90);
        assert_eq!(signal.timestamp_ms, 1000);
    }

    #[test]
    fn test_imbalance_must_confirm_direction() {
        let mut sg = generator();
        assert!(sg.on_gated_event(&event(Side::Ask, 0), -0.2, 1).is_none());
        assert!(sg.on_gated_event(&event(Side::Bid, 0), 0.2, 1).is_none());
        assert!(sg.on_gated_event(&event(Side::Ask, 0), 0.11, 1).is_none());
        assert_eq!(sg.stats().rejected_imbalance, 3);

        let short = sg.on_gated_event(&event(Side::Bid, 0), -0.12, 1).unwrap();
        assert_eq!(short.direction, Direction::Short);
    }

    #[test]
    fn test_cooldown_exclusivity() {
        let mut sg = generator();
        assert!(sg.on_gated_event(&event(Side::Ask, 1000), 0.2, 1).is_some());
        assert!(sg.on_gated_event(&event(Side::Ask, 5999), 0.3, 2).is_none());
        assert_eq!(sg.cooldown_remaining_ms(Direction::Long, 5999), 1);
        assert!(sg.on_gated_event(&event(Side::Ask, 6000), 0.3, 3).is_some());
        assert_eq!(sg.stats().rejected_cooldown, 1);
    }

    #[test]
    fn test_directions_are_independent() {
        let mut sg = generator();
        assert!(sg.on_gated_event(&event(Side::Ask, 1000), 0.2, 1).is_some());
        assert!(sg.on_gated_event(&event(Side::Bid, 1000), -0.2, 1).is_some());
        assert_eq!(sg.cooldown_remaining_ms(Direction::Short, 2000), 4000);
    }

    #[test]
    fn test_one_signal_per_direction_per_tick() {
        let mut sg = SignalGenerator::new(&SignalConfig {
            imbalance_threshold: 0.12,
            signal_cooldown_sec: 0.0,
        });
        assert!(sg.on_gated_event(&event(Side::Ask, 1000), 0.2, 7).is_some());
        assert!(sg.on_gated_event(&event(Side::Ask, 1000), 0.2, 7).is_none());
        assert_eq!(sg.stats().rejected_same_tick, 1);
        assert!(sg.on_gated_event(&event(Side::Ask, 1000), 0.2, 8).is_some());
    }
}
