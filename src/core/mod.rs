// Core Module - Foundational types, config, logging, clock, shutdown, events

pub mod types;
pub mod config;
pub mod logger;
pub mod events;
pub mod clock;
pub mod shutdown;

// Re-export commonly used items for convenience
pub use types::*;
pub use config::{
    AppConfig, FeedConfig, SyncConfig, DetectorConfig, SignalConfig, ScorerConfig,
    AgentConfig, MonitoringConfig, BaseCenterMode, ConfigError, ConfigSummary,
    secs_to_ms, secs_to_duration,
};
pub use logger::{setup_logging, setup_logging_from_config};
pub use events::{WallEvent, WallEventKind, Signal};
pub use clock::{Clock, SystemClock, ManualClock};
pub use shutdown::Shutdown;
