//! Runtime configuration parsed from environment variables.
//!
//! Every knob has a `DEFAULT_*` constant; missing or unparsable values fall
//! back to the default. Only values that parse but make no sense (a zero
//! sweep interval, an overlay size outside `(0, 1]`) are rejected.

use std::time::Duration;

use crate::frame::ErrorCode;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_OVERLAY_STALE_MS: u64 = 500;
pub const DEFAULT_OVERLAY_SWEEP_MS: u64 = 100;
pub const DEFAULT_OVERLAY_MAX_SIZE: f64 = 0.6;
pub const DEFAULT_SCAN_DEDUP_MS: u64 = 3000;
pub const DEFAULT_SCAN_FRAME_INTERVAL_MS: u64 = 100;
pub const DEFAULT_REALTIME_LIVENESS_SECS: u64 = 120;
pub const DEFAULT_REALTIME_HEARTBEAT_DEBOUNCE_SECS: u64 = 5;
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },
    #[error("{key} must be within (0, 1], got {value}")]
    OutOfRange { key: &'static str, value: f64 },
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Zero { .. } => "E_CONFIG_ZERO",
            Self::OutOfRange { .. } => "E_CONFIG_RANGE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayConfig {
    pub stale_after: Duration,
    pub sweep_every: Duration,
    /// Largest rendered code size, as a fraction of the scan region.
    pub max_size: f64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_millis(DEFAULT_OVERLAY_STALE_MS),
            sweep_every: Duration::from_millis(DEFAULT_OVERLAY_SWEEP_MS),
            max_size: DEFAULT_OVERLAY_MAX_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealtimeConfig {
    pub liveness: Duration,
    pub heartbeat_debounce: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            liveness: Duration::from_secs(DEFAULT_REALTIME_LIVENESS_SECS),
            heartbeat_debounce: Duration::from_secs(DEFAULT_REALTIME_HEARTBEAT_DEBOUNCE_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: Option<String>,
    pub port: u16,
    pub db_max_connections: u32,
    pub operator_id: Option<String>,
    pub overlay: OverlayConfig,
    pub realtime: RealtimeConfig,
    pub scan_dedup: Duration,
    pub scan_frame_interval: Duration,
    pub scan_replay_path: Option<String>,
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            port: DEFAULT_PORT,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            operator_id: None,
            overlay: OverlayConfig::default(),
            realtime: RealtimeConfig::default(),
            scan_dedup: Duration::from_millis(DEFAULT_SCAN_DEDUP_MS),
            scan_frame_interval: Duration::from_millis(DEFAULT_SCAN_FRAME_INTERVAL_MS),
            scan_replay_path: None,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    /// Build config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a value parses but is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a value parses but is out of range.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let parse = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            database_url: parse("DATABASE_URL"),
            port: env_parse(&lookup, "PORT", DEFAULT_PORT),
            db_max_connections: env_parse(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            operator_id: parse("ROLLCALL_OPERATOR_ID"),
            overlay: OverlayConfig {
                stale_after: Duration::from_millis(env_parse(&lookup, "OVERLAY_STALE_MS", DEFAULT_OVERLAY_STALE_MS)),
                sweep_every: Duration::from_millis(env_parse(&lookup, "OVERLAY_SWEEP_MS", DEFAULT_OVERLAY_SWEEP_MS)),
                max_size: env_parse(&lookup, "OVERLAY_MAX_SIZE", DEFAULT_OVERLAY_MAX_SIZE),
            },
            realtime: RealtimeConfig {
                liveness: Duration::from_secs(env_parse(
                    &lookup,
                    "REALTIME_LIVENESS_SECS",
                    DEFAULT_REALTIME_LIVENESS_SECS,
                )),
                heartbeat_debounce: Duration::from_secs(env_parse(
                    &lookup,
                    "REALTIME_HEARTBEAT_DEBOUNCE_SECS",
                    DEFAULT_REALTIME_HEARTBEAT_DEBOUNCE_SECS,
                )),
            },
            scan_dedup: Duration::from_millis(env_parse(&lookup, "SCAN_DEDUP_MS", DEFAULT_SCAN_DEDUP_MS)),
            scan_frame_interval: Duration::from_millis(env_parse(
                &lookup,
                "SCAN_FRAME_INTERVAL_MS",
                DEFAULT_SCAN_FRAME_INTERVAL_MS,
            )),
            scan_replay_path: parse("SCAN_REPLAY_PATH"),
            event_channel_capacity: env_parse(&lookup, "EVENT_CHANNEL_CAPACITY", DEFAULT_EVENT_CHANNEL_CAPACITY),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("OVERLAY_STALE_MS", self.overlay.stale_after.is_zero()),
            ("OVERLAY_SWEEP_MS", self.overlay.sweep_every.is_zero()),
            ("SCAN_FRAME_INTERVAL_MS", self.scan_frame_interval.is_zero()),
            ("REALTIME_LIVENESS_SECS", self.realtime.liveness.is_zero()),
            ("EVENT_CHANNEL_CAPACITY", self.event_channel_capacity == 0),
        ];
        if let Some((key, _)) = nonzero.into_iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::Zero { key });
        }
        let size = self.overlay.max_size;
        if !(size > 0.0 && size <= 1.0) {
            return Err(ConfigError::OutOfRange { key: "OVERLAY_MAX_SIZE", value: size });
        }
        Ok(())
    }
}

fn env_parse<T>(lookup: impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
