// ============================
// crates/backend-lib/src/config.rs
// ============================
//! Configuration management.
use crate::error::AppError;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Directory the flat-file record store writes into
    pub records_dir: PathBuf,
    /// Log level
    pub log_level: String,
    /// Room lifecycle timers
    pub timeouts: RoomTimeouts,
    /// Bounded queue sizes
    pub buffers: BufferLimits,
}

/// Room lifecycle timers, all in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomTimeouts {
    /// Liveness window; pings go out at twice this cadence and a session
    /// silent for a full window is pruned
    pub heartbeat_secs: u64,
    /// How long a room may sit at zero participants before closing
    pub idle_secs: u64,
    /// How long a lone joiner waits for a counterpart before the room closes
    pub forming_secs: u64,
    /// Upper bound on the record-store handoff during teardown
    pub record_handoff_secs: u64,
}

/// Bounded queue sizes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferLimits {
    /// Per-session outbound event queue; overflow drops oldest
    pub session_queue: usize,
    /// Per-pair ICE candidate hold-back buffer; overflow drops oldest
    pub candidate_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".parse().unwrap(),
            records_dir: PathBuf::from("data"),
            log_level: "info".to_string(),
            timeouts: RoomTimeouts::default(),
            buffers: BufferLimits::default(),
        }
    }
}

impl Default for RoomTimeouts {
    fn default() -> Self {
        Self {
            heartbeat_secs: 15,
            idle_secs: 120,
            forming_secs: 120,
            record_handoff_secs: 2,
        }
    }
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            session_queue: 256,
            candidate_buffer: 32,
        }
    }
}

impl Settings {
    /// Load settings from `teleconsult.toml` (if present) and
    /// `TELECONSULT_`-prefixed environment variables.
    pub fn load() -> Result<Self, AppError> {
        Self::load_from("teleconsult.toml")
    }

    /// Load settings from an explicit config file path plus the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let settings: Settings = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TELECONSULT_").split("__"))
            .extract()
            .map_err(|e| AppError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.log_level.as_str()) {
            return Err(AppError::Config(format!(
                "log_level must be one of {LEVELS:?}, got '{}'",
                self.log_level
            )));
        }

        let t = &self.timeouts;
        if t.heartbeat_secs == 0 || t.idle_secs == 0 || t.forming_secs == 0 {
            return Err(AppError::Config(
                "timeouts must all be greater than zero".to_string(),
            ));
        }

        let b = &self.buffers;
        if b.session_queue == 0 || b.candidate_buffer == 0 {
            return Err(AppError::Config(
                "buffer limits must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// The subset of settings each room actor carries.
    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            heartbeat: Duration::from_secs(self.timeouts.heartbeat_secs),
            idle_timeout: Duration::from_secs(self.timeouts.idle_secs),
            forming_timeout: Duration::from_secs(self.timeouts.forming_secs),
            record_handoff: Duration::from_secs(self.timeouts.record_handoff_secs),
            session_queue: self.buffers.session_queue,
            candidate_buffer: self.buffers.candidate_buffer,
        }
    }
}

/// Per-room runtime knobs, resolved from [`Settings`] at startup
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub heartbeat: Duration,
    pub idle_timeout: Duration,
    pub forming_timeout: Duration,
    pub record_handoff: Duration,
    pub session_queue: usize,
    pub candidate_buffer: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Settings::default().room_config()
    }
}
