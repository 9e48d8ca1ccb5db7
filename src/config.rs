//! Configuration for the sync engine.
//!
//! Configuration is passed to [`SyncOrchestrator::new()`](crate::SyncOrchestrator::new)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//! Connection settings (URIs, credentials, TLS) belong to whoever builds the
//! source and destination handles and are not modeled here.
//!
//! # Quick Start
//!
//! ```rust
//! use oplog_sync::config::SyncConfig;
//!
//! let config = SyncConfig {
//!     sync_id: "orders-mirror".into(),
//!     namespaces: vec!["shop.orders".into()],
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! SyncConfig
//! ├── sync_id: String                 # Names this mirror (cursor key, logs, metrics)
//! ├── namespaces: Vec<String>         # Inclusion patterns ("*", "app", "app.users")
//! ├── start_from: Option<String>      # Explicit watermark "time:ordinal"
//! ├── ignore_apply_errors: bool       # Skip rejected applies instead of failing
//! ├── stop_on_idle: bool              # End with Success once the log goes idle
//! ├── read_timeout: String            # Cursor idle timeout ("1s")
//! ├── apply_rate_limit: Option<RateLimitConfig>
//! ├── cursor: Option<CursorConfig>    # SQLite resume point persistence
//! └── retry: RetrySettings            # Supervisor restart backoff
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! sync_id: "prod-to-replica"
//! namespaces: ["app", "billing.invoices"]
//! start_from: "1700000000:3"
//! ignore_apply_errors: true
//! read_timeout: "1s"
//! apply_rate_limit:
//!   burst_size: 100
//!   refill_rate: 2000
//! cursor:
//!   sqlite_path: "/var/lib/oplog-sync/cursors.db"
//!   flush_interval: "5s"
//! retry:
//!   max_attempts: 20
//!   initial_delay: "1s"
//! ```

use crate::error::{Result, SyncError};
use crate::resilience::{RateLimitConfig, RetryConfig};
use crate::watermark::Watermark;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `SyncOrchestrator::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Identity of this mirror. Keys the persisted cursor and labels logs
    /// and metrics.
    #[serde(default = "default_sync_id")]
    pub sync_id: String,

    /// Namespace inclusion patterns.
    #[serde(default = "default_namespaces")]
    pub namespaces: Vec<String>,

    /// Explicit starting watermark (`time:ordinal`, `time-ordinal` or packed).
    ///
    /// When set, the session first catches up from this point before
    /// tailing. When unset, a persisted cursor is used if there is one;
    /// otherwise only changes newer than the current tail head are synced.
    #[serde(default)]
    pub start_from: Option<String>,

    /// Skip and log destination rejections instead of failing the session.
    /// Transport errors are fatal regardless.
    #[serde(default = "default_false")]
    pub ignore_apply_errors: bool,

    /// End the session with `Success` the first time the live tail goes
    /// idle for `read_timeout`.
    #[serde(default = "default_false")]
    pub stop_on_idle: bool,

    /// How long a cursor may wait for a new record before it is reopened,
    /// as a duration string (e.g., "1s"). Parsed to Duration internally.
    #[serde(default = "default_read_timeout")]
    pub read_timeout: String,

    /// Throttle destination applies. `None` disables throttling.
    #[serde(default)]
    pub apply_rate_limit: Option<RateLimitConfig>,

    /// Cursor persistence. `None` disables persistence.
    #[serde(default)]
    pub cursor: Option<CursorConfig>,

    /// Restart policy used by the supervisor.
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_sync_id() -> String {
    "default".to_string()
}

fn default_namespaces() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_read_timeout() -> String {
    "1s".to_string()
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_id: default_sync_id(),
            namespaces: default_namespaces(),
            start_from: None,
            ignore_apply_errors: false,
            stop_on_idle: false,
            read_timeout: default_read_timeout(),
            apply_rate_limit: None,
            cursor: None,
            retry: RetrySettings::default(),
        }
    }
}

impl SyncConfig {
    /// Create a minimal config for testing.
    ///
    /// Short read timeout, no persistence, fast restarts.
    pub fn for_testing(sync_id: &str, namespaces: &[&str]) -> Self {
        Self {
            sync_id: sync_id.to_string(),
            namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
            read_timeout: "10ms".to_string(),
            retry: RetrySettings::testing(),
            ..Self::default()
        }
    }

    /// Parse the read_timeout string to a Duration.
    pub fn read_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.read_timeout).unwrap_or(Duration::from_secs(1))
    }

    /// Parse the explicit starting watermark.
    pub fn start_watermark(&self) -> Result<Option<Watermark>> {
        self.start_from
            .as_deref()
            .map(|s| {
                s.parse::<Watermark>()
                    .map_err(|e| SyncError::Config(e.to_string()))
            })
            .transpose()
    }

    /// Check the config before a session starts.
    pub fn validate(&self) -> Result<()> {
        if self.sync_id.trim().is_empty() {
            return Err(SyncError::Config("sync_id must not be empty".to_string()));
        }
        if self.namespaces.is_empty() {
            return Err(SyncError::Config(
                "at least one namespace pattern is required".to_string(),
            ));
        }
        self.start_watermark()?;
        self.retry.validate()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CursorConfig: resume point persistence
// ═══════════════════════════════════════════════════════════════════════════════

/// Cursor persistence configuration.
///
/// The cursor is the last advanced watermark for this `sync_id`. It lets a
/// restarted process resume where the previous one stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorConfig {
    /// Path to SQLite database for cursor storage.
    pub sqlite_path: String,

    /// Whether to use WAL mode for SQLite (recommended).
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// How often dirty cursors are written to disk (e.g., "5s").
    #[serde(default = "default_flush_interval")]
    pub flush_interval: String,
}

fn default_flush_interval() -> String {
    "5s".to_string()
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "oplog_sync_cursors.db".to_string(),
            wal_mode: true,
            flush_interval: default_flush_interval(),
        }
    }
}

impl CursorConfig {
    /// Persist to the given file.
    pub fn at(sqlite_path: impl Into<String>) -> Self {
        Self {
            sqlite_path: sqlite_path.into(),
            ..Self::default()
        }
    }

    /// Parse the flush_interval string to a Duration.
    pub fn flush_interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.flush_interval).unwrap_or(Duration::from_secs(5))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RetrySettings: supervisor restart policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Supervisor restart settings, converted to a [`RetryConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Restarts allowed after the first session fails.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Delay before the first restart (e.g., "500ms").
    #[serde(default = "default_initial_delay")]
    pub initial_delay: String,

    /// Ceiling for the backoff (e.g., "30s").
    #[serde(default = "default_max_delay")]
    pub max_delay: String,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_max_attempts() -> usize {
    10
}

fn default_initial_delay() -> String {
    "500ms".to_string()
}

fn default_max_delay() -> String {
    "30s".to_string()
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetrySettings {
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: "10ms".to_string(),
            max_delay: "100ms".to_string(),
            backoff_factor: 2.0,
        }
    }

    /// A backoff must not shrink between restarts.
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(SyncError::Config(format!(
                "retry.backoff_factor must be a finite number >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }

    /// Build the backoff schedule. Unparseable durations fall back to the
    /// defaults.
    pub fn retry_config(&self) -> RetryConfig {
        let defaults = RetryConfig::default();
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: humantime::parse_duration(&self.initial_delay)
                .unwrap_or(defaults.initial_delay),
            max_delay: humantime::parse_duration(&self.max_delay).unwrap_or(defaults.max_delay),
            backoff_factor: self.backoff_factor,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
