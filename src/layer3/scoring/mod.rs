// Round scoring - P(up) per fixed-interval round plus the paper agent that trades it

pub mod round_clock;
pub mod round_scorer;
pub mod paper_agent;

pub use round_clock::{Round, RoundClock, RoundTransition};
pub use round_scorer::{BandPressure, RoundScorer, RoundScorerStats, ScoreSnapshot};
pub use paper_agent::{AgentAction, PaperAgent, Position, StepResult, Thresholds, TradeClose};
