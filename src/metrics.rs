//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Records read, applied and skipped
//! - Apply and read latency
//! - Replication lag against the tail head
//! - Session lifecycle and supervisor restarts
//! - Cursor persistence
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `oplog_sync_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use oplog_sync::metrics;
//! use oplog_sync::oplog::OpKind;
//! use std::time::Duration;
//!
//! metrics::record_record_read("nightly-mirror", OpKind::Insert);
//! metrics::record_apply_latency(OpKind::Insert, Duration::from_millis(3));
//! ```

use crate::oplog::OpKind;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a change record pulled from the reader.
pub fn record_record_read(sync_id: &str, op: OpKind) {
    counter!("oplog_sync_records_read_total", "sync_id" => sync_id.to_string(), "op" => op.to_string()).increment(1);
}

/// Record a mutation accepted by the destination.
pub fn record_record_applied(sync_id: &str, op: OpKind) {
    counter!("oplog_sync_records_applied_total", "sync_id" => sync_id.to_string(), "op" => op.to_string()).increment(1);
}

/// Record a record that advanced the watermark without being applied.
///
/// `reason` is one of `noop`, `out_of_scope`, `observed`, `rejected`.
pub fn record_record_skipped(sync_id: &str, reason: &'static str) {
    counter!("oplog_sync_records_skipped_total", "sync_id" => sync_id.to_string(), "reason" => reason).increment(1);
}

/// Record destination apply latency by operation type.
pub fn record_apply_latency(op: OpKind, duration: Duration) {
    histogram!("oplog_sync_apply_duration_seconds", "op" => op.to_string())
        .record(duration.as_secs_f64());
}

/// Record how long the reader waited for the next item.
pub fn record_read_latency(sync_id: &str, duration: Duration) {
    histogram!("oplog_sync_read_duration_seconds", "sync_id" => sync_id.to_string())
        .record(duration.as_secs_f64());
}

/// Record a cursor reopen after an idle timeout.
pub fn record_cursor_reopen(sync_id: &str) {
    counter!("oplog_sync_cursor_reopens_total", "sync_id" => sync_id.to_string()).increment(1);
}

/// Record a record at or below the reader position that was dropped.
pub fn record_stale_record(sync_id: &str) {
    counter!("oplog_sync_stale_records_total", "sync_id" => sync_id.to_string()).increment(1);
}

/// Record the last advanced watermark (packed oplog layout).
pub fn set_watermark(sync_id: &str, packed: u64) {
    gauge!("oplog_sync_watermark", "sync_id" => sync_id.to_string()).set(packed as f64);
}

/// Record replication lag: seconds between now (wall clock) and the time
/// component of the last advanced watermark.
pub fn record_replication_lag(sync_id: &str, lag_seconds: u64) {
    gauge!("oplog_sync_lag_seconds", "sync_id" => sync_id.to_string()).set(lag_seconds as f64);
}

/// Record cursor persistence.
pub fn record_cursor_persist(sync_id: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("oplog_sync_cursor_persists_total", "sync_id" => sync_id.to_string(), "status" => status).increment(1);
}

/// Record cursor flush batch (debounced writes).
pub fn record_cursor_flush(flushed: usize, errors: usize) {
    counter!("oplog_sync_cursor_flushes_total").increment(1);
    counter!("oplog_sync_cursor_flushed_count").increment(flushed as u64);
    if errors > 0 {
        counter!("oplog_sync_cursor_flush_errors_total").increment(errors as u64);
    }
}

/// Record cursor SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn cursor_retries_total(operation: &str) {
    counter!("oplog_sync_cursor_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Record errors by type.
pub fn record_error(sync_id: &str, error_type: &'static str) {
    counter!("oplog_sync_errors_total", "sync_id" => sync_id.to_string(), "error_type" => error_type).increment(1);
}

/// Gauge for session state.
pub fn set_sync_state(sync_id: &str, state: &str) {
    // Encode state as numeric for alerting
    let value = match state {
        "Created" => 0.0,
        "Resolving" => 1.0,
        "Restoring" => 2.0,
        "Tailing" => 3.0,
        "Success" => 4.0,
        "Stopped" => 5.0,
        "Failed" => 6.0,
        _ => -1.0,
    };
    gauge!("oplog_sync_state", "sync_id" => sync_id.to_string()).set(value);
}

/// Record a finished session.
pub fn record_session_end(sync_id: &str, termination: &str, duration: Duration) {
    counter!(
        "oplog_sync_sessions_total",
        "sync_id" => sync_id.to_string(),
        "termination" => termination.to_string()
    )
    .increment(1);
    histogram!("oplog_sync_session_duration_seconds", "sync_id" => sync_id.to_string())
        .record(duration.as_secs_f64());
}

/// Record a supervisor restart after a retryable failure.
pub fn record_session_restart(sync_id: &str, error_type: &'static str) {
    counter!(
        "oplog_sync_session_restarts_total",
        "sync_id" => sync_id.to_string(),
        "error_type" => error_type
    )
    .increment(1);
}

/// Record time spent waiting on the apply rate limiter.
pub fn record_throttle_wait(sync_id: &str, duration: Duration) {
    histogram!("oplog_sync_throttle_wait_seconds", "sync_id" => sync_id.to_string())
        .record(duration.as_secs_f64());
}
