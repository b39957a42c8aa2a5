// Signal Engine - synchronous composition of sync, detection, signals and scoring
// Each input maps (state, input) -> (state, outputs); no I/O and no timers here

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::config::AppConfig;
use crate::core::events::{Signal, WallEvent};
use crate::layer2::parser::{MessageParser, ParsedDepthSnapshot, ParsedMessage};
use crate::layer2::synchronizer::{DepthSynchronizer, SnapshotOutcome, SyncOutcome};
use crate::layer3::orderbook::{SignalGenerator, WallDetector};
use crate::layer3::scoring::{PaperAgent, RoundScorer, ScoreSnapshot, StepResult};
use crate::layer4::heartbeat::Heartbeat;

/// Everything one engine step produced
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    pub signals: Vec<Signal>,
    pub raw_events: Vec<WallEvent>,
    /// New score, when one was computed this step
    pub score: Option<ScoreSnapshot>,
    pub agent: Option<StepResult>,
    /// The book was discarded; a fresh snapshot is needed
    pub resync_requested: bool,
    /// Outcome of an offered snapshot, if this step handled one
    pub snapshot: Option<SnapshotOutcome>,
}

impl StepOutput {
    fn resync() -> Self {
        Self {
            resync_requested: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineStats {
    pub messages_received: u64,
    pub messages_malformed: u64,
    pub book_updates: u64,
    pub signals_emitted: u64,
    pub raw_events: u64,
    pub resyncs: u64,
    pub decay_ticks: u64,
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EngineStats(messages={}, malformed={}, updates={}, signals={}, raw_events={}, resyncs={})",
            self.messages_received,
            self.messages_malformed,
            self.book_updates,
            self.signals_emitted,
            self.raw_events,
            self.resyncs
        )
    }
}

pub struct SignalEngine {
    config: Arc<AppConfig>,
    parser: MessageParser,
    synchronizer: DepthSynchronizer,
    detector: WallDetector,
    signal_gen: SignalGenerator,
    scorer: RoundScorer,
    agent: Option<PaperAgent>,

    tick: u64,
    agent_round_id: Option<i64>,
    last_imbalance: f64,
    last_spread_bps: f64,
    last_wall_candidates: usize,
    stats: EngineStats,
}

impl SignalEngine {
    pub fn new(config: Arc<AppConfig>) -> Self {
        let symbol = config.feed.symbol.clone();
        let agent = config
            .agent
            .enabled
            .then(|| PaperAgent::new(&config.agent, config.scorer.round_interval_sec));

        info!(
            symbol = %symbol,
            agent_enabled = agent.is_some(),
            "SignalEngine created"
        );

        Self {
            parser: MessageParser::new(&symbol),
            synchronizer: DepthSynchronizer::new(&symbol, &config.sync),
            detector: WallDetector::new(&config.detector, config.signal.imbalance_threshold),
            signal_gen: SignalGenerator::new(&config.signal),
            scorer: RoundScorer::new(&config.scorer),
            agent,
            tick: 0,
            agent_round_id: None,
            last_imbalance: 0.0,
            last_spread_bps: 0.0,
            last_wall_candidates: 0,
            stats: EngineStats::default(),
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn synchronizer(&self) -> &DepthSynchronizer {
        &self.synchronizer
    }

    pub fn detector(&self) -> &WallDetector {
        &self.detector
    }

    pub fn signal_generator(&self) -> &SignalGenerator {
        &self.signal_gen
    }

    pub fn scorer(&self) -> &RoundScorer {
        &self.scorer
    }

    pub fn agent(&self) -> Option<&PaperAgent> {
        self.agent.as_ref()
    }

    pub fn parser(&self) -> &MessageParser {
        &self.parser
    }

    /// A (re)connect broke sequence continuity
    pub fn on_feed_connected(&mut self) -> StepOutput {
        self.synchronizer.on_connected();
        self.detector.reset();
        self.stats.resyncs += 1;
        StepOutput::resync()
    }

    /// The stream dropped; the book is stale until the next connect resyncs it
    pub fn on_feed_disconnected(&mut self, reason: &str) {
        warn!(reason = reason, "Feed disconnected, book is stale until resync");
        self.synchronizer.on_disconnected();
        self.detector.reset();
    }

    /// Feed one raw stream frame
    pub fn on_depth_message(&mut self, raw: &str, now_ms: i64) -> StepOutput {
        self.stats.messages_received += 1;

        let update = match self.parser.parse(raw) {
            Ok(ParsedMessage::DepthUpdate(update)) => update,
            Ok(ParsedMessage::DepthSnapshot(_)) => {
                debug!("Ignoring snapshot payload on the diff stream");
                return StepOutput::default();
            }
            Err(e) => {
                self.stats.messages_malformed += 1;
                warn!(error = %e, "Discarding malformed feed message");
                return StepOutput::default();
            }
        };

        match self.synchronizer.process_update(update) {
            SyncOutcome::Applied => self.on_book_update(now_ms),
            SyncOutcome::Buffered | SyncOutcome::Stale => StepOutput::default(),
            SyncOutcome::GapDetected { .. } => {
                self.detector.reset();
                self.stats.resyncs += 1;
                StepOutput::resync()
            }
        }
    }

    /// Offer a snapshot fetched for sync attempt `generation`
    pub fn on_snapshot(
        &mut self,
        generation: u64,
        snapshot: &ParsedDepthSnapshot,
        now_ms: i64,
    ) -> StepOutput {
        let outcome = self.synchronizer.apply_snapshot(generation, snapshot);
        let mut output = match outcome {
            SnapshotOutcome::Synchronized { .. } => {
                self.detector.reset();
                self.on_book_update(now_ms)
            }
            _ => StepOutput::default(),
        };
        output.snapshot = Some(outcome);
        output
    }

    /// Time-based recompute: shock decay and round boundaries between book updates
    pub fn on_decay_tick(&mut self, now_ms: i64) -> StepOutput {
        self.stats.decay_ticks += 1;
        let Some(book) = self.synchronizer.book() else {
            return StepOutput::default();
        };

        let mut output = StepOutput::default();
        if let Some(score) = self.scorer.recompute(book, now_ms) {
            output.agent = self.step_agent(&score, now_ms);
            output.score = Some(score);
        }
        output
    }

    fn on_book_update(&mut self, now_ms: i64) -> StepOutput {
        let Some(book) = self.synchronizer.book() else {
            return StepOutput::default();
        };

        self.tick += 1;
        self.stats.book_updates += 1;

        let detected = self.detector.on_book_update(book, now_ms);
        self.last_imbalance = detected.imbalance;
        self.last_spread_bps = detected.spread_bps;
        self.last_wall_candidates = detected.wall_candidates;

        // Round boundary first so a shock lands in the round it belongs to
        if let Some(mid) = book.mid_price() {
            self.scorer.roll_round(now_ms, mid);
        }
        for event in &detected.raw_events {
            self.scorer.on_wall_event(event, now_ms);
        }

        let mut output = StepOutput::default();
        for event in &detected.gated_events {
            if let Some(signal) = self
                .signal_gen
                .on_gated_event(event, detected.imbalance, self.tick)
            {
                output.signals.push(signal);
            }
        }

        if let Some(score) = self.scorer.recompute(book, now_ms) {
            output.agent = self.step_agent(&score, now_ms);
            output.score = Some(score);
        }

        self.stats.raw_events += detected.raw_events.len() as u64;
        self.stats.signals_emitted += output.signals.len() as u64;
        output.raw_events = detected.raw_events;
        output
    }

    fn step_agent(&mut self, score: &ScoreSnapshot, now_ms: i64) -> Option<StepResult> {
        let agent = self.agent.as_mut()?;

        if self.agent_round_id != Some(score.round_id) {
            if self.agent_round_id.is_some() {
                agent.reset_round();
            }
            self.agent_round_id = Some(score.round_id);
        }

        Some(agent.step(
            now_ms,
            score.mid,
            score.reference_price,
            score.t_left_sec,
            score.p_up,
        ))
    }

    /// Observables for the periodic heartbeat line
    pub fn heartbeat(&self) -> Heartbeat {
        let book = self.synchronizer.book();
        Heartbeat {
            synced: self.synchronizer.is_synchronized(),
            best_bid: book.and_then(|b| b.best_bid()).map(|l| l.price),
            best_ask: book.and_then(|b| b.best_ask()).map(|l| l.price),
            imbalance: self.last_imbalance,
            spread_bps: self.last_spread_bps,
            wall_candidates: self.last_wall_candidates,
            buffer_len: self.synchronizer.buffer_len(),
            score: self.scorer.current_snapshot().cloned(),
            signals: self.stats.signals_emitted,
            resyncs: self.synchronizer.stats().resync_count,
            position: self.agent.as_ref().map(|a| a.position()),
            total_pnl: self.agent.as_ref().map(|a| a.total_pnl()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Direction;
    use crate::layer2::parser::PriceLevel;

    fn config() -> Arc<AppConfig> {
        let mut config = AppConfig::default();
        config.detector.n_levels = 5;
        config.detector.wall_multiplier = 5.0;
        config.detector.event_ttl_sec = 2.0;
        config.detector.wall_drop_pct = 0.7;
        config.signal.imbalance_threshold = 0.12;
        config.signal.signal_cooldown_sec = 5.0;
        Arc::new(config)
    }

    fn diff(first: u64, last: u64, prev: u64, bids: &str, asks: &str) -> String {
        format!(
            r#"{{"stream":"btcusdt@depth@100ms","data":{{"e":"depthUpdate","E":1,"T":1,"s":"BTCUSDT","U":{},"u":{},"pu":{},"b":{},"a":{}}}}}"#,
            first, last, prev, bids, asks
        )
    }

    fn snapshot(id: u64) -> ParsedDepthSnapshot {
        ParsedDepthSnapshot {
            last_update_id: id,
            event_time: None,
            bids: vec![
                PriceLevel::new(49999.0, 3.0),
                PriceLevel::new(49998.0, 2.0),
                PriceLevel::new(49997.0, 2.0),
                PriceLevel::new(49996.0, 2.0),
                PriceLevel::new(49995.0, 2.0),
            ],
            asks: vec![
                PriceLevel::new(50000.0, 10.0),
                PriceLevel::new(50001.0, 1.0),
                PriceLevel::new(50002.0, 1.0),
                PriceLevel::new(50003.0, 1.0),
                PriceLevel::new(50004.0, 1.0),
            ],
        }
    }

    fn synced_engine(now_ms: i64) -> SignalEngine {
        let mut engine = SignalEngine::new(config());
        let resync = engine.on_feed_connected();
        assert!(resync.resync_requested);
        engine.on_depth_message(&diff(100, 101, 99, "[]", "[]"), now_ms);
        let out = engine.on_snapshot(engine.synchronizer().generation(), &snapshot(100), now_ms);
        assert!(matches!(out.snapshot, Some(SnapshotOutcome::Synchronized { .. })));
        engine
    }

    #[test]
    fn test_buffering_emits_nothing() {
        let mut engine = SignalEngine::new(config());
        engine.on_feed_connected();
        let out = engine.on_depth_message(&diff(100, 101, 99, "[]", "[]"), 1000);
        assert!(out.signals.is_empty());
        assert!(out.score.is_none());
        assert_eq!(engine.synchronizer().buffer_len(), 1);
    }

    #[test]
    fn test_snapshot_produces_first_score() {
        let mut engine = SignalEngine::new(config());
        engine.on_feed_connected();
        engine.on_depth_message(&diff(100, 101, 99, "[]", "[]"), 1000);
        let out = engine.on_snapshot(engine.synchronizer().generation(), &snapshot(100), 1000);
        let score = out.score.unwrap();
        assert!((score.p_up + score.p_down - 100.0).abs() < 1e-9);
        assert!(engine.heartbeat().synced);
    }

    #[test]
    fn test_ask_wall_pull_emits_long_signal() {
        let mut engine = synced_engine(1_000);
        assert!(engine.detector().wall_count() >= 1);

        let out = engine.on_depth_message(&diff(102, 102, 101, "[]", r#"[["50000.0","2.0"]]"#), 1_500);
        assert_eq!(out.signals.len(), 1);
        assert_eq!(out.signals[0].direction, Direction::Long);
        assert_eq!(out.raw_events.len(), 1);
        assert!(engine.scorer().active_shocks() >= 1);
    }

    #[test]
    fn test_gap_requests_resync_and_suspends_scoring() {
        let mut engine = synced_engine(1_000);
        let out = engine.on_depth_message(&diff(110, 111, 109, "[]", "[]"), 1_100);
        assert!(out.resync_requested);
        assert!(!engine.synchronizer().is_synchronized());
        assert_eq!(engine.detector().wall_count(), 0);

        let held = engine.scorer().current_snapshot().cloned();
        let tick = engine.on_decay_tick(2_000);
        assert!(tick.score.is_none());
        assert_eq!(engine.scorer().current_snapshot().cloned(), held);
    }

    #[test]
    fn test_disconnect_marks_book_stale() {
        let mut engine = synced_engine(1_000);
        let generation = engine.synchronizer().generation();
        engine.on_feed_disconnected("connection reset");

        assert!(!engine.synchronizer().is_synchronized());
        assert!(engine.synchronizer().book().is_none());
        assert_eq!(engine.synchronizer().generation(), generation + 1);

        let tick = engine.on_decay_tick(5_000);
        assert!(tick.score.is_none());
        assert!(tick.agent.is_none());

        let hb = engine.heartbeat();
        assert!(!hb.synced);
        assert_eq!(hb.best_bid, None);

        // A snapshot fetched before the drop cannot revive the dead book
        let late = engine.on_snapshot(generation, &snapshot(100), 5_000);
        assert_eq!(late.snapshot, Some(SnapshotOutcome::Outdated));
    }

    #[test]
    fn test_malformed_message_is_counted_and_ignored() {
        let mut engine = synced_engine(1_000);
        let out = engine.on_depth_message("{not json", 1_100);
        assert!(!out.resync_requested);
        assert_eq!(engine.stats().messages_malformed, 1);
        assert!(engine.synchronizer().is_synchronized());
    }

    #[test]
    fn test_outdated_snapshot_is_discarded() {
        let mut engine = SignalEngine::new(config());
        engine.on_feed_connected();
        let stale_generation = engine.synchronizer().generation();
        engine.on_feed_connected();
        engine.on_depth_message(&diff(100, 101, 99, "[]", "[]"), 1000);
        let out = engine.on_snapshot(stale_generation, &snapshot(100), 1000);
        assert_eq!(out.snapshot, Some(SnapshotOutcome::Outdated));
        assert!(!engine.synchronizer().is_synchronized());
    }

    #[test]
    fn test_agent_steps_on_each_score() {
        let mut engine = synced_engine(1_000);
        assert!(engine.agent().is_some());
        let out = engine.on_decay_tick(2_000);
        assert!(out.score.is_some());
        assert!(out.agent.is_some());
    }
}
