// Layer 2 - Data Processing & Synchronization
// Parses depth messages and keeps a consistent local order book

pub mod orderbook;
pub mod parser;
pub mod synchronizer;

// Re-export commonly used items
pub use orderbook::OrderBook;
pub use parser::{
    MessageParser, ParsedMessage, ParseError, ParserStats, PriceLevel,
    ParsedDepthUpdate, ParsedDepthSnapshot,
    parse_depth_snapshot, parse_depth_update_raw,
};
pub use synchronizer::{
    DepthSynchronizer, SyncOutcome, SnapshotOutcome, SyncState, SynchronizerStats,
};
