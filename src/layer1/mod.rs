// Layer 1 - Data Connectors for Binance Futures
// Depth stream over WebSocket, depth snapshots over REST

pub mod websocket;
pub mod rest_client;

// Re-export commonly used items for convenience
pub use websocket::{ExponentialBackoff, FeedError, FeedEvent, WebSocketClient, WebSocketStats};
pub use rest_client::{RestClientError, RestClientStats, SnapshotClient, SnapshotSource};
