//! upwatch-core: configuration shared by the upwatch crates.
//!
//! Parses `upwatch.toml` into [`UpwatchConfig`] and exposes the defaults the
//! monitor falls back to when a setting is absent.

pub mod config;
pub mod duration;

pub use config::{
    ConfigError, MonitorConfig, NotificationsConfig, TargetConfig, UpwatchConfig,
    DEFAULT_DATA_DIR, DEFAULT_INTERVAL, DEFAULT_MIN_DOWNTIME, DEFAULT_PROBE_TIMEOUT,
    DEFAULT_STORE_TIMEOUT, DEFAULT_WEBHOOK_TIMEOUT,
};
pub use duration::parse_duration;
