// Layer 3 - Analytics
// Wall detection, signal generation and round scoring on top of the synced book

// Common utilities
pub mod common;

// Wall detector + signal generator
pub mod orderbook;

// Round clock, scorer and paper agent
pub mod scoring;

// OrderBook re-exports
pub use orderbook::{DetectorOutput, SignalGenerator, SignalGeneratorStats, Wall, WallDetector, WallDetectorStats};

// Scoring re-exports
pub use scoring::{
    AgentAction, PaperAgent, Position, Round, RoundClock, RoundScorer, RoundScorerStats,
    RoundTransition, ScoreSnapshot, StepResult,
};
