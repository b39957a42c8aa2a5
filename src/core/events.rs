// Domain events for Wall Signal
// Wall events are a closed set of kinds; signals are the tradeable output.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::types::{Direction, Side};

// ============================================================================
// Wall Event
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WallEventKind {
    Drop,
    MajorDrop,
    FullRemove,
}

impl WallEventKind {
    /// Classify a drop. `None` when the drop is below `drop_pct`.
    pub fn classify(
        current_qty: f64,
        drop_pct: f64,
        wall_drop_pct: f64,
        major_drop_pct: f64,
        full_remove_eps: f64,
    ) -> Option<Self> {
        if drop_pct < wall_drop_pct {
            None
        } else if current_qty <= full_remove_eps {
            Some(WallEventKind::FullRemove)
        } else if drop_pct >= major_drop_pct {
            Some(WallEventKind::MajorDrop)
        } else {
            Some(WallEventKind::Drop)
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WallEventKind::Drop => "DROP",
            WallEventKind::MajorDrop => "MAJOR_DROP",
            WallEventKind::FullRemove => "FULL_REMOVE",
        }
    }
}

impl fmt::Display for WallEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected wall drop. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WallEvent {
    pub kind: WallEventKind,
    pub side: Side,
    pub price: f64,
    pub quantity_before: f64,
    pub quantity_after: f64,
    pub drop_pct: f64,
    pub timestamp_ms: i64,
    /// Time between the wall's first sighting and the drop
    pub wall_age_ms: i64,
    /// Passed imbalance confirmation (eligible for a signal)
    pub gated: bool,

    // Book context at detection time
    pub imbalance: f64,
    pub dist_bps: f64,
    pub touch_bps: f64,
    pub best_bid: f64,
    pub best_ask: f64,
}

impl WallEvent {
    pub fn direction(&self) -> Direction {
        self.side.drop_direction()
    }

    pub fn age_sec(&self) -> f64 {
        self.wall_age_ms as f64 / 1000.0
    }

    /// Copy of this event marked as gated
    pub fn into_gated(mut self) -> Self {
        self.gated = true;
        self
    }
}

impl fmt::Display for WallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WallEvent(kind={}, side={}, price={:.2}, qty={:.4}->{:.4}, drop={:.2}, gated={})",
            self.kind,
            self.side,
            self.price,
            self.quantity_before,
            self.quantity_after,
            self.drop_pct,
            self.gated
        )
    }
}

// ============================================================================
// Signal
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub direction: Direction,
    pub score: u32,
    pub timestamp_ms: i64,
    pub imbalance: f64,
    pub event: WallEvent,
}

impl Signal {
    /// `min(100, 50 + |imbalance| * 200)`, truncated to an integer score
    pub fn score_for(imbalance: f64) -> u32 {
        (50.0 + imbalance.abs() * 200.0).min(100.0) as u32
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SIGNAL {} | event={} score={} side={} price={:.2} imbalance={:.4}",
            self.direction,
            self.event.kind,
            self.score,
            self.event.side,
            self.event.price,
            self.imbalance
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        // below threshold
        assert_eq!(WallEventKind::classify(5.0, 0.5, 0.7, 0.9, 1e-9), None);
        // exactly at threshold
        assert_eq!(
            WallEventKind::classify(3.0, 0.7, 0.7, 0.9, 1e-9),
            Some(WallEventKind::Drop)
        );
        assert_eq!(
            WallEventKind::classify(0.5, 0.95, 0.7, 0.9, 1e-9),
            Some(WallEventKind::MajorDrop)
        );
        assert_eq!(
            WallEventKind::classify(0.0, 1.0, 0.7, 0.9, 1e-9),
            Some(WallEventKind::FullRemove)
        );
    }

    #[test]
    fn test_score_for() {
        assert_eq!(Signal::score_for(0.2), 90);
        assert_eq!(Signal::score_for(-0.2), 90);
        assert_eq!(Signal::score_for(0.0), 50);
        assert_eq!(Signal::score_for(0.9), 100);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(WallEventKind::MajorDrop.to_string(), "MAJOR_DROP");
        assert_eq!(WallEventKind::FullRemove.as_str(), "FULL_REMOVE");
    }
}
