// Depth Synchronizer - snapshot + diff reconciliation for Binance Futures
// Owns the OrderBook; the visible book is either consistent or explicitly stale

use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, info, warn};

use crate::core::config::SyncConfig;
use crate::layer2::orderbook::OrderBook;
use crate::layer2::parser::{ParsedDepthSnapshot, ParsedDepthUpdate};

/// Stream synchronization state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Collecting diffs while a snapshot is outstanding
    Buffering,
    /// Book is consistent and live diffs are applied in order
    Synchronized,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Result of feeding one diff to the synchronizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Held until the next snapshot
    Buffered,
    /// Merged into the live book
    Applied,
    /// Already covered by the book (`u` below lastUpdateId); ignored
    Stale,
    /// `pu` did not chain to the previous `u`; the book was discarded
    GapDetected { expected: u64, received: Option<u64> },
}

/// Result of offering a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Synchronized { applied: usize, dropped: usize },
    /// No buffered diff covers `lastUpdateId + 1`; retry with a newer snapshot
    NoCoveringUpdate,
    /// The buffered tail after the sync point does not chain
    ChainBroken,
    /// Snapshot was requested before the latest reset
    Outdated,
    /// Already synchronized; snapshot ignored
    NotNeeded,
}

/// Synchronizer statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynchronizerStats {
    pub total_messages: u64,
    pub messages_buffered: u64,
    pub messages_applied: u64,
    pub messages_stale: u64,
    pub gap_count: u64,
    pub resync_count: u64,
    pub buffer_trims: u64,
    pub snapshots_applied: u64,
    pub snapshots_rejected: u64,
}

impl fmt::Display for SynchronizerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SynchronizerStats(total={}, applied={}, buffered={}, stale={}, gaps={}, resyncs={}, trims={})",
            self.total_messages,
            self.messages_applied,
            self.messages_buffered,
            self.messages_stale,
            self.gap_count,
            self.resync_count,
            self.buffer_trims
        )
    }
}

/// Does `update` chain onto a book whose last applied id is `last_id`?
///
/// Futures diffs carry `pu`, which must equal the previous `u`. Without `pu`
/// fall back to spot-style sequential ids.
fn chains_onto(update: &ParsedDepthUpdate, last_id: u64) -> bool {
    match update.prev_final_update_id {
        Some(pu) => pu == last_id,
        None => update.first_update_id <= last_id + 1,
    }
}

/// Snapshot + diff reconciliation
///
/// 1. Buffer diffs while no consistent book exists.
/// 2. Seed from a snapshot with `lastUpdateId = S`.
/// 3. Drop buffered diffs with `u < S + 1`.
/// 4. The first diff with `U <= S + 1 <= u` is the sync point.
/// 5. Every later diff must chain (`pu == previous u`); a break discards the
///    book and returns to step 1.
pub struct DepthSynchronizer {
    pub symbol: String,
    state: SyncState,
    book: OrderBook,
    buffer: VecDeque<ParsedDepthUpdate>,
    generation: u64,
    buffer_max: usize,
    buffer_keep: usize,
    stats: SynchronizerStats,
}

impl DepthSynchronizer {
    pub fn new(symbol: &str, config: &SyncConfig) -> Self {
        info!(symbol = symbol, "DepthSynchronizer created");

        Self {
            symbol: symbol.to_uppercase(),
            state: SyncState::Buffering,
            book: OrderBook::new(symbol),
            buffer: VecDeque::with_capacity(config.buffer_max.min(10_000)),
            generation: 0,
            buffer_max: config.buffer_max.max(1),
            buffer_keep: config.buffer_keep.min(config.buffer_max),
            stats: SynchronizerStats::default(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_synchronized(&self) -> bool {
        self.state == SyncState::Synchronized
    }

    /// Whether a snapshot fetch is needed to make progress
    pub fn needs_snapshot(&self) -> bool {
        self.state == SyncState::Buffering
    }

    /// Incremented on every reset; snapshots tagged with an older value are discarded
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> &SynchronizerStats {
        &self.stats
    }

    /// The consistent book, or `None` while resyncing
    pub fn book(&self) -> Option<&OrderBook> {
        match self.state {
            SyncState::Synchronized => Some(&self.book),
            SyncState::Buffering => None,
        }
    }

    /// Full reset after (re)connect: any connectivity gap breaks continuity
    pub fn on_connected(&mut self) {
        info!(generation = self.generation + 1, "Initializing local orderbook sync");
        self.buffer.clear();
        self.begin_resync();
    }

    /// The stream dropped: continuity is lost, so the book is discarded
    pub fn on_disconnected(&mut self) {
        info!(generation = self.generation + 1, "Feed lost, discarding local orderbook");
        self.buffer.clear();
        self.begin_resync();
    }

    /// Feed one diff
    pub fn process_update(&mut self, update: ParsedDepthUpdate) -> SyncOutcome {
        self.stats.total_messages += 1;

        match self.state {
            SyncState::Buffering => {
                self.push_buffer(update);
                SyncOutcome::Buffered
            }
            SyncState::Synchronized => {
                let last_id = self.book.last_update_id();

                if update.final_update_id < last_id {
                    self.stats.messages_stale += 1;
                    return SyncOutcome::Stale;
                }

                if !chains_onto(&update, last_id) {
                    warn!(
                        last_update_id = last_id,
                        first_update_id = update.first_update_id,
                        final_update_id = update.final_update_id,
                        prev_final_update_id = ?update.prev_final_update_id,
                        "Depth gap detected, forcing resync"
                    );
                    let received = update.prev_final_update_id;
                    self.stats.gap_count += 1;
                    self.buffer.clear();
                    self.begin_resync();
                    self.push_buffer(update);
                    return SyncOutcome::GapDetected {
                        expected: last_id,
                        received,
                    };
                }

                if update.first_update_id > last_id + 1 || update.final_update_id < last_id + 1 {
                    debug!(
                        last_update_id = last_id,
                        first_update_id = update.first_update_id,
                        final_update_id = update.final_update_id,
                        "Depth event coverage mismatch (chained by pu, applied)"
                    );
                }

                self.book
                    .apply_diff(&update.bids, &update.asks, update.final_update_id);
                self.stats.messages_applied += 1;
                SyncOutcome::Applied
            }
        }
    }

    /// Offer a snapshot fetched for `generation`
    pub fn apply_snapshot(
        &mut self,
        generation: u64,
        snapshot: &ParsedDepthSnapshot,
    ) -> SnapshotOutcome {
        if generation != self.generation {
            debug!(
                snapshot_generation = generation,
                current_generation = self.generation,
                "Discarding snapshot from an earlier sync attempt"
            );
            self.stats.snapshots_rejected += 1;
            return SnapshotOutcome::Outdated;
        }
        if self.state == SyncState::Synchronized {
            return SnapshotOutcome::NotNeeded;
        }

        let snapshot_id = snapshot.last_update_id;
        let target = snapshot_id + 1;

        // Everything ending before the target is already in the snapshot
        let before = self.buffer.len();
        self.buffer.retain(|u| u.final_update_id >= target);
        let mut dropped = before - self.buffer.len();

        let sync_idx = self
            .buffer
            .iter()
            .position(|u| u.first_update_id <= target && target <= u.final_update_id);

        let sync_idx = match sync_idx {
            Some(idx) => idx,
            None => {
                let (min_first, max_final) = self.buffer_bounds();
                warn!(
                    target = target,
                    buffer_len = self.buffer.len(),
                    min_first_update_id = ?min_first,
                    max_final_update_id = ?max_final,
                    "Snapshot sync failed: no covering event"
                );
                self.stats.snapshots_rejected += 1;
                return SnapshotOutcome::NoCoveringUpdate;
            }
        };

        // Build the replica off to the side; the live book is only replaced on success
        let mut book = OrderBook::new(&self.symbol);
        book.load_snapshot(snapshot);

        let mut applied = 0usize;
        for (idx, update) in self.buffer.iter().enumerate() {
            if idx < sync_idx {
                dropped += 1;
                continue;
            }
            if idx > sync_idx && !chains_onto(update, book.last_update_id()) {
                warn!(
                    last_update_id = book.last_update_id(),
                    first_update_id = update.first_update_id,
                    final_update_id = update.final_update_id,
                    prev_final_update_id = ?update.prev_final_update_id,
                    "Buffered depth chain broken after sync point"
                );
                self.stats.snapshots_rejected += 1;
                return SnapshotOutcome::ChainBroken;
            }
            book.apply_diff(&update.bids, &update.asks, update.final_update_id);
            applied += 1;
        }

        self.book = book;
        self.buffer.clear();
        self.state = SyncState::Synchronized;
        self.stats.snapshots_applied += 1;
        self.stats.messages_applied += applied as u64;

        info!(
            snapshot_id = snapshot_id,
            last_update_id = self.book.last_update_id(),
            applied = applied,
            dropped = dropped,
            "Orderbook synchronized"
        );

        SnapshotOutcome::Synchronized { applied, dropped }
    }

    fn begin_resync(&mut self) {
        self.state = SyncState::Buffering;
        self.book.clear();
        self.generation += 1;
        self.stats.resync_count += 1;
    }

    fn push_buffer(&mut self, update: ParsedDepthUpdate) {
        self.buffer.push_back(update);
        self.stats.messages_buffered += 1;

        if self.buffer.len() > self.buffer_max {
            let excess = self.buffer.len() - self.buffer_keep;
            self.buffer.drain(..excess);
            self.stats.buffer_trims += 1;
            warn!(
                dropped = excess,
                kept = self.buffer.len(),
                "Depth buffer overflow, oldest entries dropped"
            );
        }
    }

    fn buffer_bounds(&self) -> (Option<u64>, Option<u64>) {
        let min_first = self.buffer.iter().map(|u| u.first_update_id).min();
        let max_final = self.buffer.iter().map(|u| u.final_update_id).max();
        (min_first, max_final)
    }
}
