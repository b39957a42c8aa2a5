// Configuration Management for Wall Signal
// Immutable, validated once at startup and shared as Arc<AppConfig>

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

// ============================================================================
// Configuration Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub symbol: String,
    pub ws_base_url: String,
    pub depth_stream: String,
    pub rest_depth_url: String,
    pub snapshot_limit: u32,

    // Reconnect / timeouts
    pub reconnect_base_delay_sec: f64,
    pub reconnect_max_delay_sec: f64,
    pub connect_timeout_sec: f64,
    pub snapshot_timeout_sec: f64,

    // Keepalive
    pub ping_interval_sec: u64,
    pub stale_timeout_sec: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            symbol: "btcusdt".to_string(),
            ws_base_url: "wss://fstream.binance.com/stream?streams=".to_string(),
            depth_stream: "depth@100ms".to_string(),
            rest_depth_url: "https://fapi.binance.com/fapi/v1/depth".to_string(),
            snapshot_limit: 1000,
            reconnect_base_delay_sec: 1.0,
            reconnect_max_delay_sec: 30.0,
            connect_timeout_sec: 10.0,
            snapshot_timeout_sec: 10.0,
            ping_interval_sec: 20,
            stale_timeout_sec: 60,
        }
    }
}

impl FeedConfig {
    /// Stream name as used by the combined-stream endpoint, e.g. `btcusdt@depth@100ms`
    pub fn stream_name(&self) -> String {
        format!("{}@{}", self.symbol.to_lowercase(), self.depth_stream)
    }

    pub fn stream_url(&self) -> String {
        format!("{}{}", self.ws_base_url, self.stream_name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub snapshot_retry_delay_sec: f64,
    pub min_buffer_before_snapshot: usize,
    pub snapshot_buffer_wait_sec: f64,
    pub buffer_max: usize,
    pub buffer_keep: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            snapshot_retry_delay_sec: 0.7,
            min_buffer_before_snapshot: 50,
            snapshot_buffer_wait_sec: 2.0,
            buffer_max: 5000,
            buffer_keep: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub n_levels: usize,
    pub wall_multiplier: f64,
    pub min_wall_qty: f64,
    pub max_wall_distance_bps: f64,
    pub event_ttl_sec: f64,
    pub wall_drop_pct: f64,
    pub major_drop_pct: f64,
    pub full_remove_eps: f64,
    pub max_touch_bps: f64,
    pub price_cooldown_sec: f64,
    pub only_full_remove: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            n_levels: 20,
            wall_multiplier: 5.0,
            min_wall_qty: 0.0,
            max_wall_distance_bps: 50.0,
            event_ttl_sec: 2.0,
            wall_drop_pct: 0.70,
            major_drop_pct: 0.90,
            full_remove_eps: 1e-9,
            max_touch_bps: 25.0,
            price_cooldown_sec: 0.0,
            only_full_remove: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub imbalance_threshold: f64,
    pub signal_cooldown_sec: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            imbalance_threshold: 0.12,
            signal_cooldown_sec: 5.0,
        }
    }
}

/// Where the scorer measures band distances from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseCenterMode {
    Reference,
    Mid,
    Blend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub round_interval_sec: u64,

    // Base pressure
    pub band_bps: Vec<f64>,
    pub band_weights: Vec<f64>,
    pub base_scale: f64,
    pub base_center_mode: BaseCenterMode,
    pub base_ref_weight: f64,
    pub min_depth_sum: f64,

    // Shock magnitudes per event kind
    pub shock_drop: f64,
    pub shock_major_drop: f64,
    pub shock_full_remove: f64,
    pub max_shock: f64,
    pub shock_distance_bps_cap: f64,
    pub shock_min_age_sec: f64,
    pub shock_age_full_sec: f64,
    pub shock_stale_age_sec: f64,
    pub shock_half_life_sec: f64,

    pub decay_tick_sec: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            round_interval_sec: 900,
            band_bps: vec![5.0, 10.0, 20.0],
            band_weights: vec![1.0, 0.6, 0.3],
            base_scale: 30.0,
            base_center_mode: BaseCenterMode::Reference,
            base_ref_weight: 0.5,
            min_depth_sum: 0.0,
            shock_drop: 4.0,
            shock_major_drop: 7.0,
            shock_full_remove: 12.0,
            max_shock: 35.0,
            shock_distance_bps_cap: 20.0,
            shock_min_age_sec: 0.2,
            shock_age_full_sec: 1.0,
            shock_stale_age_sec: 2.0,
            shock_half_life_sec: 15.0,
            decay_tick_sec: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub enabled: bool,
    pub base_enter: f64,
    pub base_exit: f64,
    pub base_rev: f64,
    pub d0_bps: f64,
    pub bias_k: f64,
    pub bias_m: f64,
    pub bias_max: f64,
    pub exit_a: f64,
    pub exit_b: f64,
    pub rev_a: f64,
    pub rev_b: f64,
    pub cooldown_sec: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_enter: 62.0,
            base_exit: 55.0,
            base_rev: 80.0,
            d0_bps: 20.0,
            bias_k: 4.0,
            bias_m: 6.0,
            bias_max: 12.0,
            exit_a: 3.0,
            exit_b: 6.0,
            rev_a: 4.0,
            rev_b: 10.0,
            cooldown_sec: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub log_file: Option<String>,
    pub json_logs: bool,
    pub heartbeat_interval_sec: f64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            log_file: Some("logs/signals.log".to_string()),
            json_logs: false,
            heartbeat_interval_sec: 2.0,
        }
    }
}

// ============================================================================
// Configuration Summary
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub symbol: String,
    pub stream: String,
    pub n_levels: usize,
    pub imbalance_threshold: f64,
    pub round_interval_sec: u64,
    pub center_mode: BaseCenterMode,
    pub agent_enabled: bool,
    pub log_level: String,
}

// ============================================================================
// Application Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub sync: SyncConfig,
    pub detector: DetectorConfig,
    pub signal: SignalConfig,
    pub scorer: ScorerConfig,
    pub agent: AgentConfig,
    pub monitoring: MonitoringConfig,
}

impl AppConfig {
    /// Load defaults, overlay the JSON file (if given) and the environment,
    /// then validate. The result is frozen behind an `Arc`.
    pub fn load(config_path: Option<&str>) -> Result<Arc<Self>, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        info!(summary = ?config.summary(), "Configuration initialized");
        Ok(Arc::new(config))
    }

    /// Load configuration from JSON file; missing sections/fields keep defaults
    pub fn from_file(config_path: &str) -> Result<Self, ConfigError> {
        let path = Path::new(config_path);
        if !path.exists() {
            warn!(path = config_path, "Config file not found");
            return Err(ConfigError::Validation(format!(
                "config file not found: {}",
                config_path
            )));
        }

        let content = fs::read_to_string(path)?;
        let config = Self::from_json_str(&content)?;
        info!(path = config_path, "Configuration loaded");
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Apply `WALL_SIGNAL_*` overrides through a lookup function
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(symbol) = lookup("WALL_SIGNAL_SYMBOL") {
            self.feed.symbol = symbol.to_lowercase();
        }
        if let Some(url) = lookup("WALL_SIGNAL_WS_URL") {
            self.feed.ws_base_url = url;
        }
        if let Some(url) = lookup("WALL_SIGNAL_REST_URL") {
            self.feed.rest_depth_url = url;
        }
        if let Some(level) = lookup("WALL_SIGNAL_LOG_LEVEL") {
            self.monitoring.log_level = level;
        }
    }

    /// Validate configuration, reporting every problem at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        let feed = &self.feed;
        if feed.symbol.trim().is_empty() {
            errors.push("feed.symbol must not be empty".to_string());
        }
        if feed.snapshot_limit == 0 {
            errors.push("feed.snapshot_limit must be positive".to_string());
        }
        if feed.reconnect_base_delay_sec <= 0.0 {
            errors.push("feed.reconnect_base_delay_sec must be positive".to_string());
        }
        if feed.reconnect_max_delay_sec < feed.reconnect_base_delay_sec {
            errors.push("feed.reconnect_max_delay_sec must be >= reconnect_base_delay_sec".to_string());
        }
        if feed.connect_timeout_sec <= 0.0 || feed.snapshot_timeout_sec <= 0.0 {
            errors.push("feed timeouts must be positive".to_string());
        }
        if feed.ping_interval_sec == 0 || feed.stale_timeout_sec == 0 {
            errors.push("feed.ping_interval_sec and stale_timeout_sec must be positive".to_string());
        }

        let sync = &self.sync;
        if sync.buffer_max == 0 {
            errors.push("sync.buffer_max must be positive".to_string());
        }
        if sync.buffer_keep > sync.buffer_max {
            errors.push("sync.buffer_keep must be <= buffer_max".to_string());
        }
        if sync.snapshot_retry_delay_sec < 0.0 || sync.snapshot_buffer_wait_sec < 0.0 {
            errors.push("sync delays must not be negative".to_string());
        }

        let det = &self.detector;
        if det.n_levels == 0 {
            errors.push("detector.n_levels must be positive".to_string());
        }
        if det.wall_multiplier <= 0.0 {
            errors.push("detector.wall_multiplier must be positive".to_string());
        }
        if det.min_wall_qty < 0.0 {
            errors.push("detector.min_wall_qty must not be negative".to_string());
        }
        if det.max_wall_distance_bps <= 0.0 || det.max_touch_bps <= 0.0 {
            errors.push("detector distance limits must be positive".to_string());
        }
        if det.event_ttl_sec <= 0.0 {
            errors.push("detector.event_ttl_sec must be positive".to_string());
        }
        if !(det.wall_drop_pct > 0.0 && det.wall_drop_pct <= 1.0) {
            errors.push("detector.wall_drop_pct must be in (0, 1]".to_string());
        }
        if !(det.major_drop_pct >= det.wall_drop_pct && det.major_drop_pct <= 1.0) {
            errors.push("detector.major_drop_pct must be in [wall_drop_pct, 1]".to_string());
        }
        if det.price_cooldown_sec < 0.0 {
            errors.push("detector.price_cooldown_sec must not be negative".to_string());
        }

        let sig = &self.signal;
        if !(0.0..=1.0).contains(&sig.imbalance_threshold) {
            errors.push("signal.imbalance_threshold must be in [0, 1]".to_string());
        }
        if sig.signal_cooldown_sec < 0.0 {
            errors.push("signal.signal_cooldown_sec must not be negative".to_string());
        }

        let sc = &self.scorer;
        if sc.round_interval_sec == 0 {
            errors.push("scorer.round_interval_sec must be positive".to_string());
        }
        if sc.band_bps.is_empty() {
            errors.push("scorer.band_bps must not be empty".to_string());
        }
        if sc.band_bps.len() != sc.band_weights.len() {
            errors.push(format!(
                "scorer.band_bps ({}) and band_weights ({}) must have the same length",
                sc.band_bps.len(),
                sc.band_weights.len()
            ));
        }
        if sc.band_bps.iter().any(|b| *b <= 0.0) || sc.band_weights.iter().any(|w| *w < 0.0) {
            errors.push("scorer bands must be positive and weights non-negative".to_string());
        }
        if sc.base_scale <= 0.0 {
            errors.push("scorer.base_scale must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&sc.base_ref_weight) {
            errors.push("scorer.base_ref_weight must be in [0, 1]".to_string());
        }
        if sc.min_depth_sum < 0.0 {
            errors.push("scorer.min_depth_sum must not be negative".to_string());
        }
        if sc.shock_drop < 0.0 || sc.shock_major_drop < 0.0 || sc.shock_full_remove < 0.0 {
            errors.push("scorer shock magnitudes must not be negative".to_string());
        }
        if sc.max_shock <= 0.0 || sc.shock_distance_bps_cap <= 0.0 {
            errors.push("scorer.max_shock and shock_distance_bps_cap must be positive".to_string());
        }
        if !(sc.shock_min_age_sec >= 0.0
            && sc.shock_age_full_sec > sc.shock_min_age_sec
            && sc.shock_stale_age_sec >= sc.shock_age_full_sec)
        {
            errors.push("scorer shock ages must satisfy 0 <= min < full <= stale".to_string());
        }
        if sc.shock_half_life_sec <= 0.0 || sc.decay_tick_sec <= 0.0 {
            errors.push("scorer.shock_half_life_sec and decay_tick_sec must be positive".to_string());
        }

        let agent = &self.agent;
        if agent.d0_bps <= 0.0 {
            errors.push("agent.d0_bps must be positive".to_string());
        }
        if agent.cooldown_sec < 0.0 || agent.bias_max < 0.0 {
            errors.push("agent.cooldown_sec and bias_max must not be negative".to_string());
        }

        if self.monitoring.heartbeat_interval_sec <= 0.0 {
            errors.push("monitoring.heartbeat_interval_sec must be positive".to_string());
        }

        if !errors.is_empty() {
            for error in &errors {
                warn!(error = %error, "Config validation error");
            }
            return Err(ConfigError::Validation(errors.join("; ")));
        }

        Ok(())
    }

    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            symbol: self.feed.symbol.clone(),
            stream: self.feed.stream_name(),
            n_levels: self.detector.n_levels,
            imbalance_threshold: self.signal.imbalance_threshold,
            round_interval_sec: self.scorer.round_interval_sec,
            center_mode: self.scorer.base_center_mode,
            agent_enabled: self.agent.enabled,
            log_level: self.monitoring.log_level.clone(),
        }
    }
}

/// Seconds (possibly fractional) to whole milliseconds
pub fn secs_to_ms(secs: f64) -> i64 {
    (secs * 1000.0).round() as i64
}

/// Seconds to a `Duration`, clamping negatives to zero
pub fn secs_to_duration(secs: f64) -> Duration {
    Duration::from_secs_f64(secs.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs() {
        let config = AppConfig::default();
        assert_eq!(config.feed.symbol, "btcusdt");
        assert_eq!(config.feed.snapshot_limit, 1000);
        assert_eq!(config.detector.n_levels, 20);
        assert_eq!(config.signal.imbalance_threshold, 0.12);
        assert_eq!(config.scorer.round_interval_sec, 900);
        assert_eq!(config.scorer.band_bps, vec![5.0, 10.0, 20.0]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stream_url() {
        let feed = FeedConfig::default();
        assert_eq!(feed.stream_name(), "btcusdt@depth@100ms");
        assert_eq!(
            feed.stream_url(),
            "wss://fstream.binance.com/stream?streams=btcusdt@depth@100ms"
        );
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{"detector": {"n_levels": 10}, "scorer": {"base_center_mode": "blend"}}"#;
        let config = AppConfig::from_json_str(json).unwrap();
        assert_eq!(config.detector.n_levels, 10);
        assert_eq!(config.detector.wall_multiplier, 5.0);
        assert_eq!(config.scorer.base_center_mode, BaseCenterMode::Blend);
        assert_eq!(config.feed.symbol, "btcusdt");
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = AppConfig::default();
        config.scorer.band_weights = vec![1.0];
        config.signal.imbalance_threshold = 1.5;
        config.sync.buffer_keep = config.sync.buffer_max + 1;

        match config.validate() {
            Err(ConfigError::Validation(msg)) => {
                assert!(msg.contains("band_weights"));
                assert!(msg.contains("imbalance_threshold"));
                assert!(msg.contains("buffer_keep"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config.apply_overrides(|key| match key {
            "WALL_SIGNAL_SYMBOL" => Some("ETHUSDT".to_string()),
            "WALL_SIGNAL_LOG_LEVEL" => Some("DEBUG".to_string()),
            _ => None,
        });
        assert_eq!(config.feed.symbol, "ethusdt");
        assert_eq!(config.monitoring.log_level, "DEBUG");
        assert_eq!(config.feed.rest_depth_url, "https://fapi.binance.com/fapi/v1/depth");
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = AppConfig::from_file("/definitely/not/here.json");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_time_helpers() {
        assert_eq!(secs_to_ms(0.7), 700);
        assert_eq!(secs_to_ms(2.0), 2000);
        assert_eq!(secs_to_duration(-1.0), Duration::ZERO);
    }
}
