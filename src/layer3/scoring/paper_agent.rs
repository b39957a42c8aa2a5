// Paper Agent - round-based paper trading driven by the score
// Thresholds tighten with distance from the reference price and with time left

use serde::Serialize;
use std::fmt;
use tracing::info;

use crate::core::config::{secs_to_ms, AgentConfig};
use crate::core::types::clamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Position {
    Flat,
    Long,
    Short,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Flat => write!(f, "FLAT"),
            Position::Long => write!(f, "LONG"),
            Position::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AgentAction {
    Hold,
    EnterLong,
    EnterShort,
    ExitLong,
    ExitShort,
    ReverseToShort,
    ReverseToLong,
}

impl AgentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentAction::Hold => "HOLD",
            AgentAction::EnterLong => "ENTER_LONG",
            AgentAction::EnterShort => "ENTER_SHORT",
            AgentAction::ExitLong => "EXIT_LONG",
            AgentAction::ExitShort => "EXIT_SHORT",
            AgentAction::ReverseToShort => "REVERSE_TO_SHORT",
            AgentAction::ReverseToLong => "REVERSE_TO_LONG",
        }
    }
}

impl fmt::Display for AgentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision thresholds for one step, all in [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub enter_long: f64,
    pub enter_short: f64,
    pub exit: f64,
    pub reverse: f64,
    pub bias: f64,
    pub d_bps: f64,
    pub d_signed_bps: f64,
    pub t_frac: f64,
}

/// A closed paper trade; `pnl` is fractional (0.01 == 1%)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeClose {
    pub side: Position,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_ms: i64,
    pub exit_ms: i64,
    pub pnl: f64,
    pub kind: AgentAction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub action: AgentAction,
    pub reason: &'static str,
    pub thresholds: Thresholds,
    pub trade_close: Option<TradeClose>,
}

pub struct PaperAgent {
    config: AgentConfig,
    interval_sec: f64,
    cooldown_ms: i64,

    position: Position,
    entry_price: f64,
    entry_ms: i64,
    cooldown_until_ms: i64,

    round_pnl: f64,
    total_pnl: f64,
    trades_count: u64,
    reversals_count: u64,
}

impl PaperAgent {
    pub fn new(config: &AgentConfig, interval_sec: u64) -> Self {
        Self {
            config: config.clone(),
            interval_sec: interval_sec.max(1) as f64,
            cooldown_ms: secs_to_ms(config.cooldown_sec),
            position: Position::Flat,
            entry_price: 0.0,
            entry_ms: 0,
            cooldown_until_ms: 0,
            round_pnl: 0.0,
            total_pnl: 0.0,
            trades_count: 0,
            reversals_count: 0,
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn round_pnl(&self) -> f64 {
        self.round_pnl
    }

    pub fn total_pnl(&self) -> f64 {
        self.total_pnl
    }

    pub fn trades_count(&self) -> u64 {
        self.trades_count
    }

    pub fn reversals_count(&self) -> u64 {
        self.reversals_count
    }

    fn force_flat(&mut self) {
        self.position = Position::Flat;
        self.entry_price = 0.0;
        self.entry_ms = 0;
    }

    /// New round: drop any open position and zero the round PnL
    pub fn reset_round(&mut self) {
        if self.position != Position::Flat {
            info!(position = %self.position, entry_price = self.entry_price, "Position dropped at round rollover");
        }
        self.round_pnl = 0.0;
        self.force_flat();
    }

    pub fn compute_thresholds(&self, mid: f64, reference: f64, t_left_sec: f64) -> Thresholds {
        let c = &self.config;
        let d_signed_bps = if reference > 0.0 {
            (mid - reference) / reference * 10_000.0
        } else {
            0.0
        };
        let d_bps = d_signed_bps.abs();
        let d_norm = d_bps / c.d0_bps.max(1e-6);
        let t_frac = clamp(t_left_sec / self.interval_sec, 0.0, 1.0);

        let bias = clamp(c.bias_k * d_norm + c.bias_m * (1.0 - t_frac), 0.0, c.bias_max);

        let (enter_long, enter_short) = if mid >= reference {
            (c.base_enter - bias, c.base_enter + bias)
        } else {
            (c.base_enter + bias, c.base_enter - bias)
        };
        let exit = c.base_exit + c.exit_a * d_norm - c.exit_b * t_frac;
        let reverse = c.base_rev + c.rev_a * d_norm + c.rev_b * (1.0 - t_frac);

        Thresholds {
            enter_long: clamp(enter_long, 0.0, 100.0),
            enter_short: clamp(enter_short, 0.0, 100.0),
            exit: clamp(exit, 0.0, 100.0),
            reverse: clamp(reverse, 0.0, 100.0),
            bias,
            d_bps,
            d_signed_bps,
            t_frac,
        }
    }

    /// Advance the state machine with the latest score
    pub fn step(&mut self, now_ms: i64, mid: f64, reference: f64, t_left_sec: f64, p_up: f64) -> StepResult {
        let thresholds = self.compute_thresholds(mid, reference, t_left_sec);
        let p_down = 100.0 - p_up;

        let result = |action, reason, trade_close| StepResult {
            action,
            reason,
            thresholds,
            trade_close,
        };

        let outcome = match self.position {
            Position::Flat => {
                if now_ms < self.cooldown_until_ms {
                    result(AgentAction::Hold, "cooldown", None)
                } else if p_up >= thresholds.enter_long {
                    self.open(Position::Long, mid, now_ms);
                    result(AgentAction::EnterLong, "p_up>=enter_long", None)
                } else if p_down >= thresholds.enter_short {
                    self.open(Position::Short, mid, now_ms);
                    result(AgentAction::EnterShort, "p_down>=enter_short", None)
                } else {
                    result(AgentAction::Hold, "flat_wait", None)
                }
            }
            Position::Long => {
                if p_down >= thresholds.reverse {
                    let trade = self.close(mid, now_ms, AgentAction::ReverseToShort);
                    self.open(Position::Short, mid, now_ms);
                    self.reversals_count += 1;
                    result(AgentAction::ReverseToShort, "p_down>=reverse", Some(trade))
                } else if p_down >= thresholds.exit {
                    let trade = self.close(mid, now_ms, AgentAction::ExitLong);
                    self.cooldown_until_ms = now_ms + self.cooldown_ms;
                    result(AgentAction::ExitLong, "p_down>=exit", Some(trade))
                } else {
                    result(AgentAction::Hold, "hold_long", None)
                }
            }
            Position::Short => {
                if p_up >= thresholds.reverse {
                    let trade = self.close(mid, now_ms, AgentAction::ReverseToLong);
                    self.open(Position::Long, mid, now_ms);
                    self.reversals_count += 1;
                    result(AgentAction::ReverseToLong, "p_up>=reverse", Some(trade))
                } else if p_up >= thresholds.exit {
                    let trade = self.close(mid, now_ms, AgentAction::ExitShort);
                    self.cooldown_until_ms = now_ms + self.cooldown_ms;
                    result(AgentAction::ExitShort, "p_up>=exit", Some(trade))
                } else {
                    result(AgentAction::Hold, "hold_short", None)
                }
            }
        };

        if outcome.action != AgentAction::Hold {
            info!(
                action = %outcome.action,
                reason = outcome.reason,
                position = %self.position,
                mid = mid,
                p_up = p_up,
                enter_long = thresholds.enter_long,
                enter_short = thresholds.enter_short,
                exit = thresholds.exit,
                reverse = thresholds.reverse,
                pnl = outcome.trade_close.as_ref().map(|t| t.pnl),
                round_pnl = self.round_pnl,
                total_pnl = self.total_pnl,
                "Paper agent action"
            );
        }

        outcome
    }

    fn open(&mut self, side: Position, price: f64, now_ms: i64) {
        self.position = side;
        self.entry_price = price;
        self.entry_ms = now_ms;
    }

    fn close(&mut self, price: f64, now_ms: i64, kind: AgentAction) -> TradeClose {
        let entry = self.entry_price.max(1e-9);
        let pnl = match self.position {
            Position::Long => (price - self.entry_price) / entry,
            Position::Short => (self.entry_price - price) / entry,
            Position::Flat => 0.0,
        };

        let trade = TradeClose {
            side: self.position,
            entry_price: self.entry_price,
            exit_price: price,
            entry_ms: self.entry_ms,
            exit_ms: now_ms,
            pnl,
            kind,
        };
        self.round_pnl += pnl;
        self.total_pnl += pnl;
        self.trades_count += 1;
        self.force_flat();
        trade
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> PaperAgent {
        PaperAgent::new(&AgentConfig::default(), 900)
    }

    #[test]
    fn test_bias_direction() {
        let a = agent();
        let up = a.compute_thresholds(101.0, 100.0, 600.0);
        let down = a.compute_thresholds(99.0, 100.0, 600.0);
        assert!(up.enter_long < up.enter_short);
        assert!(down.enter_short < down.enter_long);
    }

    #[test]
    fn test_reverse_threshold_strict_near_end() {
        let a = agent();
        let mid = 100.0 * (1.0 + 150.0 / 10_000.0);
        let thr = a.compute_thresholds(mid, 100.0, 120.0);
        assert!(thr.reverse >= 90.0);
    }

    #[test]
    fn test_exit_easier_with_more_time() {
        let a = agent();
        let more = a.compute_thresholds(101.5, 100.0, 600.0);
        let less = a.compute_thresholds(101.5, 100.0, 60.0);
        assert!(more.exit < less.exit);
    }

    #[test]
    fn test_state_machine() {
        let mut a = agent();

        let enter = a.step(10_000, 100.0, 100.0, 700.0, 70.0);
        assert_eq!(enter.action, AgentAction::EnterLong);
        assert_eq!(a.position(), Position::Long);

        let exit = a.step(20_000, 100.2, 100.0, 700.0, 40.0);
        assert_eq!(exit.action, AgentAction::ExitLong);
        let trade = exit.trade_close.unwrap();
        assert!((trade.pnl - 0.002).abs() < 1e-9);
        assert_eq!(a.position(), Position::Flat);

        // still cooling down
        let held = a.step(25_000, 100.0, 100.0, 700.0, 70.0);
        assert_eq!(held.action, AgentAction::Hold);
        assert_eq!(held.reason, "cooldown");

        a.step(40_000, 100.0, 100.0, 700.0, 70.0);
        assert_eq!(a.position(), Position::Long);

        let rev = a.step(50_000, 99.7, 100.0, 700.0, 5.0);
        assert_eq!(rev.action, AgentAction::ReverseToShort);
        assert!(rev.trade_close.is_some());
        assert_eq!(a.position(), Position::Short);
        assert_eq!(a.trades_count(), 2);
        assert_eq!(a.reversals_count(), 1);
    }

    #[test]
    fn test_reset_round_forces_flat() {
        let mut a = agent();
        a.step(10_000, 100.0, 100.0, 700.0, 70.0);
        a.step(20_000, 100.2, 100.0, 700.0, 40.0);
        assert!(a.round_pnl() > 0.0);

        a.step(40_000, 100.0, 100.0, 700.0, 70.0);
        a.reset_round();
        assert_eq!(a.position(), Position::Flat);
        assert_eq!(a.round_pnl(), 0.0);
        assert!(a.total_pnl() > 0.0);
    }

    #[test]
    fn test_interval_scales_time_fraction() {
        let a = PaperAgent::new(&AgentConfig::default(), 300);
        let thr = a.compute_thresholds(100.0, 100.0, 150.0);
        assert!((thr.t_frac - 0.5).abs() < 1e-12);
    }
}
