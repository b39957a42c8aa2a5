// Core Type Definitions for Wall Signal
// Shared enums used across all layers

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Enums
// ============================================================================

/// Side of the order book a level or wall rests on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Direction implied by a wall on this side being pulled.
    ///
    /// A vanishing ask wall removes resistance (bullish), a vanishing bid wall
    /// removes support (bearish).
    pub fn drop_direction(&self) -> Direction {
        match self {
            Side::Ask => Direction::Long,
            Side::Bid => Direction::Short,
        }
    }

    /// +1.0 for ask-side drops, -1.0 for bid-side drops
    pub fn drop_sign(&self) -> f64 {
        match self {
            Side::Ask => 1.0,
            Side::Bid => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Bid => write!(f, "bid"),
            Side::Ask => write!(f, "ask"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn index(&self) -> usize {
        match self {
            Direction::Long => 0,
            Direction::Short => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Clamp without panicking on inverted bounds
pub fn clamp(value: f64, low: f64, high: f64) -> f64 {
    low.max(high.min(value))
}

/// Absolute distance between two prices in basis points of `reference`
pub fn distance_bps(price: f64, reference: f64) -> f64 {
    if reference <= 0.0 {
        return f64::INFINITY;
    }
    (price - reference).abs() / reference * 10_000.0
}
