// Pipeline Runner - async driving loop around the SignalEngine
// One select loop: shutdown, feed events, in-flight snapshot, snapshot schedule,
// decay tick and heartbeat. Book mutation only ever happens on this task.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::clock::{Clock, SystemClock};
use crate::core::config::{secs_to_duration, AppConfig};
use crate::core::events::Signal;
use crate::core::shutdown::Shutdown;
use crate::layer1::rest_client::{RestClientError, SnapshotClient, SnapshotSource};
use crate::layer1::websocket::{ExponentialBackoff, FeedEvent, WebSocketClient};
use crate::layer2::parser::ParsedDepthSnapshot;
use crate::layer2::synchronizer::SnapshotOutcome;
use crate::layer3::scoring::ScoreSnapshot;
use crate::layer4::engine::{SignalEngine, StepOutput};

/// Totals reported when the loop exits
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub feed_events: u64,
    pub signals: u64,
    pub scores: u64,
    pub resyncs: u64,
    pub snapshots_requested: u64,
    pub snapshots_applied: u64,
    pub snapshot_failures: u64,
    pub last_score: Option<ScoreSnapshot>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RunSummary(events={}, signals={}, scores={}, resyncs={}, snapshots={}/{}, snapshot_failures={})",
            self.feed_events,
            self.signals,
            self.scores,
            self.resyncs,
            self.snapshots_applied,
            self.snapshots_requested,
            self.snapshot_failures
        )
    }
}

type SnapshotResult = Result<ParsedDepthSnapshot, String>;

struct InFlight {
    generation: u64,
    handle: JoinHandle<Result<ParsedDepthSnapshot, RestClientError>>,
}

/// Snapshot fetch bookkeeping: at most one request in flight, tagged with the
/// sync generation it was issued for
struct SnapshotTask {
    inflight: Option<InFlight>,
    due: Option<Instant>,
    backoff: ExponentialBackoff,
}

impl SnapshotTask {
    fn cancel(&mut self) {
        if let Some(task) = self.inflight.take() {
            debug!(generation = task.generation, "Abandoning in-flight snapshot");
            task.handle.abort();
        }
        self.due = None;
    }

    fn schedule_in(&mut self, delay: Duration) {
        self.due = Some(Instant::now() + delay);
    }
}

async fn wait_snapshot(inflight: &mut Option<InFlight>) -> (u64, SnapshotResult) {
    let Some(task) = inflight.as_mut() else {
        return std::future::pending().await;
    };
    let joined = (&mut task.handle).await;
    let generation = task.generation;
    *inflight = None;

    let result = match joined {
        Ok(Ok(snapshot)) => Ok(snapshot),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("snapshot task failed: {}", e)),
    };
    (generation, result)
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

pub struct PipelineRunner {
    engine: SignalEngine,
    snapshots: Arc<dyn SnapshotSource>,
    clock: Arc<dyn Clock>,
    shutdown: Shutdown,

    signal_tx: mpsc::UnboundedSender<Signal>,
    signal_rx: Option<mpsc::UnboundedReceiver<Signal>>,
    score_tx: watch::Sender<Option<ScoreSnapshot>>,

    min_buffer: usize,
    buffer_wait: Duration,
    retry_delay: Duration,
    decay_tick: Duration,
    heartbeat_interval: Duration,
    summary: RunSummary,
}

impl PipelineRunner {
    pub fn new(
        config: Arc<AppConfig>,
        snapshots: Arc<dyn SnapshotSource>,
        clock: Arc<dyn Clock>,
        shutdown: Shutdown,
    ) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (score_tx, _) = watch::channel(None);

        info!(
            symbol = %config.feed.symbol,
            clock = clock.name(),
            "PipelineRunner created"
        );

        Self {
            min_buffer: config.sync.min_buffer_before_snapshot,
            buffer_wait: secs_to_duration(config.sync.snapshot_buffer_wait_sec),
            retry_delay: secs_to_duration(config.sync.snapshot_retry_delay_sec),
            decay_tick: secs_to_duration(config.scorer.decay_tick_sec).max(Duration::from_millis(10)),
            heartbeat_interval: secs_to_duration(config.monitoring.heartbeat_interval_sec)
                .max(Duration::from_millis(100)),
            engine: SignalEngine::new(config),
            snapshots,
            clock,
            shutdown,
            signal_tx,
            signal_rx: Some(signal_rx),
            score_tx,
            summary: RunSummary::default(),
        }
    }

    /// Receiver for emitted signals; only the first call gets it
    pub fn take_signals(&mut self) -> Option<mpsc::UnboundedReceiver<Signal>> {
        self.signal_rx.take()
    }

    /// Watch of the latest externally visible score
    pub fn scores(&self) -> watch::Receiver<Option<ScoreSnapshot>> {
        self.score_tx.subscribe()
    }

    pub fn engine(&self) -> &SignalEngine {
        &self.engine
    }

    /// Drive the engine until shutdown or until the feed channel closes
    pub async fn run(mut self, mut feed_rx: mpsc::UnboundedReceiver<FeedEvent>) -> RunSummary {
        let config = self.engine.config();
        let mut task = SnapshotTask {
            inflight: None,
            due: None,
            backoff: ExponentialBackoff::new(
                secs_to_duration(config.feed.reconnect_base_delay_sec),
                secs_to_duration(config.feed.reconnect_max_delay_sec),
            ),
        };

        let mut decay = tokio::time::interval(self.decay_tick);
        decay.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown = self.shutdown.clone();
        info!("Pipeline running");

        loop {
            let due = task.due;
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Pipeline stopping on shutdown request");
                    break;
                }
                event = feed_rx.recv() => match event {
                    Some(event) => self.on_feed_event(event, &mut task),
                    None => {
                        info!("Feed channel closed, pipeline stopping");
                        break;
                    }
                },
                (generation, result) = wait_snapshot(&mut task.inflight) => {
                    self.on_snapshot_result(generation, result, &mut task);
                }
                _ = sleep_until_due(due) => {
                    task.due = None;
                    self.start_fetch(&mut task);
                }
                _ = decay.tick() => {
                    let output = self.engine.on_decay_tick(self.clock.now_ms());
                    self.publish(output);
                }
                _ = heartbeat.tick() => {
                    self.engine.heartbeat().log();
                }
            }
        }

        task.cancel();
        self.summary.resyncs = self.engine.synchronizer().stats().resync_count;
        info!(summary = %self.summary, engine = %self.engine.stats(), "Pipeline stopped");
        self.summary
    }

    fn on_feed_event(&mut self, event: FeedEvent, task: &mut SnapshotTask) {
        self.summary.feed_events += 1;

        match event {
            FeedEvent::Connected => {
                task.cancel();
                let output = self.engine.on_feed_connected();
                self.publish(output);
                task.schedule_in(self.buffer_wait);
            }
            FeedEvent::Message(raw) => {
                let output = self.engine.on_depth_message(&raw, self.clock.now_ms());
                if output.resync_requested {
                    task.cancel();
                    task.schedule_in(self.buffer_wait);
                }
                self.publish(output);
            }
            FeedEvent::Disconnected { reason } => {
                task.cancel();
                self.engine.on_feed_disconnected(&reason);
                return;
            }
        }

        let sync = self.engine.synchronizer();
        if sync.needs_snapshot() && task.inflight.is_none() && sync.buffer_len() >= self.min_buffer {
            self.start_fetch(task);
        }
    }

    fn start_fetch(&mut self, task: &mut SnapshotTask) {
        let sync = self.engine.synchronizer();
        if !sync.needs_snapshot() || task.inflight.is_some() {
            return;
        }

        let generation = sync.generation();
        info!(
            generation = generation,
            buffer_len = sync.buffer_len(),
            "Fetching depth snapshot"
        );

        let source = Arc::clone(&self.snapshots);
        let handle = tokio::spawn(async move { source.fetch_snapshot().await });
        task.inflight = Some(InFlight { generation, handle });
        task.due = None;
        self.summary.snapshots_requested += 1;
    }

    fn on_snapshot_result(&mut self, generation: u64, result: SnapshotResult, task: &mut SnapshotTask) {
        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.summary.snapshot_failures += 1;
                let delay = task.backoff.next_delay();
                warn!(error = %e, delay_ms = delay.as_millis() as u64, "Snapshot fetch failed, retrying");
                task.schedule_in(delay);
                return;
            }
        };
        task.backoff.reset();

        let output = self.engine.on_snapshot(generation, &snapshot, self.clock.now_ms());
        match output.snapshot {
            Some(SnapshotOutcome::Synchronized { .. }) => self.summary.snapshots_applied += 1,
            Some(SnapshotOutcome::NoCoveringUpdate) | Some(SnapshotOutcome::ChainBroken) => {
                self.summary.snapshot_failures += 1;
                task.schedule_in(self.retry_delay);
            }
            Some(SnapshotOutcome::Outdated) => {
                if self.engine.synchronizer().needs_snapshot() {
                    task.schedule_in(self.retry_delay);
                }
            }
            Some(SnapshotOutcome::NotNeeded) | None => {}
        }
        self.publish(output);
    }

    fn publish(&mut self, output: StepOutput) {
        for signal in output.signals {
            self.summary.signals += 1;
            // A dropped receiver only means nobody is listening
            let _ = self.signal_tx.send(signal);
        }
        if let Some(score) = output.score {
            self.summary.scores += 1;
            self.summary.last_score = Some(score.clone());
            self.score_tx.send_replace(Some(score));
        }
    }
}

/// Run against the live exchange until `shutdown` fires
pub async fn run_live(config: Arc<AppConfig>, shutdown: Shutdown) -> Result<RunSummary, RestClientError> {
    let snapshots: Arc<dyn SnapshotSource> = Arc::new(SnapshotClient::from_config(&config.feed)?);
    let client = Arc::new(WebSocketClient::from_config(&config.feed, shutdown.clone()));

    let (feed_tx, feed_rx) = mpsc::unbounded_channel();
    let ws = Arc::clone(&client);
    let feed_task = tokio::spawn(async move { ws.run(feed_tx).await });

    let runner = PipelineRunner::new(config, snapshots, Arc::new(SystemClock), shutdown);
    let summary = runner.run(feed_rx).await;

    client.stop();
    if let Err(e) = feed_task.await {
        warn!(error = %e, "Feed task ended abnormally");
    }

    let stats = client.get_stats();
    info!(feed = %stats, "Feed stopped");
    Ok(summary)
}
