// Heartbeat - periodic snapshot of the outbound observables

use serde::Serialize;
use std::fmt;
use tracing::info;

use crate::layer3::scoring::{Position, ScoreSnapshot};

#[derive(Debug, Clone, Default, Serialize)]
pub struct Heartbeat {
    pub synced: bool,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub imbalance: f64,
    pub spread_bps: f64,
    pub wall_candidates: usize,
    pub buffer_len: usize,
    pub score: Option<ScoreSnapshot>,
    pub signals: u64,
    pub resyncs: u64,
    pub position: Option<Position>,
    pub total_pnl: Option<f64>,
}

impl Heartbeat {
    pub fn log(&self) {
        if !self.synced {
            info!(
                buffer_len = self.buffer_len,
                resyncs = self.resyncs,
                "HEARTBEAT syncing"
            );
            return;
        }

        info!(
            best_bid = ?self.best_bid,
            best_ask = ?self.best_ask,
            imbalance = self.imbalance,
            spread_bps = self.spread_bps,
            wall_candidates = self.wall_candidates,
            p_up = ?self.score.as_ref().map(|s| s.p_up),
            p_down = ?self.score.as_ref().map(|s| s.p_down),
            shock = ?self.score.as_ref().map(|s| s.shock),
            round_id = ?self.score.as_ref().map(|s| s.round_id),
            signals = self.signals,
            resyncs = self.resyncs,
            position = ?self.position,
            total_pnl = ?self.total_pnl,
            "HEARTBEAT"
        );
    }
}

impl fmt::Display for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_px = |p: Option<f64>| p.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v));
        write!(
            f,
            "bid={} ask={} imb={:+.3} spread={:.2}bps walls={} ",
            fmt_px(self.best_bid),
            fmt_px(self.best_ask),
            self.imbalance,
            self.spread_bps,
            self.wall_candidates
        )?;
        match &self.score {
            Some(s) => write!(f, "pUp={:.1} pDown={:.1} shock={:+.2}", s.p_up, s.p_down, s.shock)?,
            None => write!(f, "pUp=- pDown=-")?,
        }
        write!(f, " signals={} resyncs={}", self.signals, self.resyncs)
    }
}
