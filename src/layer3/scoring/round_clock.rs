// Round Clock - fixed-interval scoring windows anchored to a reference price

use serde::Serialize;
use std::fmt;
use tracing::info;

/// One scoring window
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Round {
    /// Start of the window in unix seconds, aligned to the interval
    pub round_id: i64,
    /// Mid price at the first book observation of the round
    pub reference_price: f64,
    pub start_ms: i64,
    pub end_ms: i64,
}

impl Round {
    pub fn time_left_sec(&self, now_ms: i64) -> f64 {
        ((self.end_ms - now_ms).max(0)) as f64 / 1000.0
    }

    pub fn contains(&self, now_ms: i64) -> bool {
        now_ms >= self.start_ms && now_ms < self.end_ms
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Round(id={}, ref={:.2})", self.round_id, self.reference_price)
    }
}

/// What observing the clock did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoundTransition {
    Unchanged,
    /// First round since start
    Started(Round),
    /// A boundary passed; the previous round is closed
    RolledOver { previous: Round, current: Round },
}

pub struct RoundClock {
    interval_sec: u64,
    current: Option<Round>,
}

impl RoundClock {
    pub fn new(interval_sec: u64) -> Self {
        Self {
            interval_sec: interval_sec.max(1),
            current: None,
        }
    }

    pub fn interval_sec(&self) -> u64 {
        self.interval_sec
    }

    pub fn current(&self) -> Option<&Round> {
        self.current.as_ref()
    }

    /// `floor(ts / interval) * interval`, in unix seconds
    pub fn round_id_for(&self, now_ms: i64) -> i64 {
        let interval = self.interval_sec as i64;
        now_ms.div_euclid(1000).div_euclid(interval) * interval
    }

    /// Observe the book at `now_ms`; the reference is captured from `mid` only
    /// when a new round starts
    pub fn observe(&mut self, now_ms: i64, mid: f64) -> RoundTransition {
        let round_id = self.round_id_for(now_ms);
        if let Some(current) = self.current {
            if current.round_id == round_id {
                return RoundTransition::Unchanged;
            }
        }

        let start_ms = round_id * 1000;
        let round = Round {
            round_id,
            reference_price: mid,
            start_ms,
            end_ms: start_ms + self.interval_sec as i64 * 1000,
        };

        let transition = match self.current.replace(round) {
            Some(previous) => RoundTransition::RolledOver {
                previous,
                current: round,
            },
            None => RoundTransition::Started(round),
        };

        info!(
            round_id = round.round_id,
            reference_price = round.reference_price,
            interval_sec = self.interval_sec,
            "Round started"
        );

        transition
    }
}
