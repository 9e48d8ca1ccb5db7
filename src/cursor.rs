// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cursor persistence for change-log positions.
//!
//! Stores the last advanced watermark for each sync id in SQLite so a
//! restarted process resumes where the previous one stopped instead of
//! jumping to the tail head.
//!
//! # Debounced Writes
//!
//! - `set()` updates the in-memory map and marks the sync id dirty
//! - `flush_dirty()` upserts every dirty cursor in one transaction
//! - The orchestrator flushes on an interval and when a session ends
//!
//! A crash between `set()` and the next flush loses at most one flush
//! interval of progress. Those records are read and applied again on
//! restart, which at-least-once delivery allows.
//!
//! # SQLite Busy Handling
//!
//! SQLITE_BUSY / SQLITE_LOCKED is retried on the [`BUSY_RETRY`] schedule.
//! Any other database error is returned immediately.
//!
//! ## Cursor Semantics
//!
//! The cursor is the **last advanced** watermark: the record was applied,
//! skipped by policy, or filtered out. A resumed session catches up
//! strictly after it.
//!
//! ```text
//! read 1700000000:3 → apply → advance → set cursor 1700000000:3
//!                      (crash here = re-apply 1700000000:3)
//! ```

use crate::config::CursorConfig;
use crate::error::{Result, SyncError};
use crate::metrics;
use crate::resilience::RetryConfig;
use crate::watermark::Watermark;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Backoff for SQLITE_BUSY / SQLITE_LOCKED: 10ms, 20ms, 40ms, 80ms.
pub const BUSY_RETRY: RetryConfig = RetryConfig {
    max_attempts: 4,
    initial_delay: Duration::from_millis(10),
    max_delay: Duration::from_millis(500),
    backoff_factor: 2.0,
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS sync_cursors (
        sync_id TEXT PRIMARY KEY,
        ts_time INTEGER NOT NULL,
        ts_ordinal INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
"#;

const UPSERT: &str = r#"
    INSERT INTO sync_cursors (sync_id, ts_time, ts_ordinal, updated_at)
    VALUES (?, ?, ?, ?)
    ON CONFLICT(sync_id) DO UPDATE SET
        ts_time = excluded.ts_time,
        ts_ordinal = excluded.ts_ordinal,
        updated_at = excluded.updated_at
"#;

/// SQLITE_BUSY (5) or SQLITE_LOCKED (6).
fn is_busy(e: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db) = e else {
        return false;
    };
    match db.code().as_deref() {
        Some("5") | Some("6") => true,
        Some(_) => false,
        None => {
            let message = db.message().to_ascii_lowercase();
            message.contains("database is locked") || message.contains("database is busy")
        }
    }
}

/// Run `op`, retrying while SQLite reports busy.
async fn with_busy_retry<F, Fut, T>(operation: &'static str, mut op: F) -> sqlx::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = sqlx::Result<T>>,
{
    let mut retries = 0;
    loop {
        match op().await {
            Err(e) if is_busy(&e) && BUSY_RETRY.allows_retry(retries) => {
                retries += 1;
                let delay = BUSY_RETRY.delay_for_attempt(retries);
                warn!(operation, retries, delay_ms = delay.as_millis() as u64, "SQLite busy, retrying");
                metrics::cursor_retries_total(operation);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if is_busy(&e) {
                    warn!(operation, retries, "SQLite still busy, giving up");
                }
                return Err(e);
            }
            Ok(value) => {
                if retries > 0 {
                    debug!(operation, retries, "SQLite operation succeeded after retry");
                }
                return Ok(value);
            }
        }
    }
}

/// In-memory view of the table plus the ids not yet written back.
#[derive(Default)]
struct CursorState {
    cursors: HashMap<String, Watermark>,
    dirty: BTreeSet<String>,
}

/// Persistent cursor storage backed by SQLite.
pub struct CursorStore {
    pool: SqlitePool,
    state: Mutex<CursorState>,
    path: String,
}

impl CursorStore {
    /// Open (or create) a store at `path` with WAL enabled.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path.as_ref(), true).await
    }

    pub async fn from_config(config: &CursorConfig) -> Result<Self> {
        Self::open(Path::new(&config.sqlite_path), config.wal_mode).await
    }

    async fn open(path: &Path, wal_mode: bool) -> Result<Self> {
        let path_str = path.to_string_lossy().to_string();
        if path_str.is_empty() {
            return Err(SyncError::Config("cursor sqlite_path is empty".to_string()));
        }
        info!(path = %path_str, wal_mode, "Initializing cursor store");

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(if wal_mode {
                SqliteJournalMode::Wal
            } else {
                SqliteJournalMode::Delete
            })
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;

        let rows: Vec<(String, i64, i64)> =
            sqlx::query_as("SELECT sync_id, ts_time, ts_ordinal FROM sync_cursors")
                .fetch_all(&pool)
                .await?;

        let mut cursors = HashMap::with_capacity(rows.len());
        for (sync_id, time, ordinal) in rows {
            let (Ok(time), Ok(ordinal)) = (u32::try_from(time), u32::try_from(ordinal)) else {
                warn!(sync_id = %sync_id, time, ordinal, "Ignoring out-of-range cursor row");
                continue;
            };
            cursors.insert(sync_id, Watermark::new(time, ordinal));
        }
        if !cursors.is_empty() {
            info!(count = cursors.len(), "Restored cursors from previous run");
        }

        Ok(Self {
            pool,
            state: Mutex::new(CursorState {
                cursors,
                dirty: BTreeSet::new(),
            }),
            path: path_str,
        })
    }

    /// Last advanced watermark for `sync_id`, if it ever advanced.
    pub async fn get(&self, sync_id: &str) -> Option<Watermark> {
        self.state.lock().await.cursors.get(sync_id).copied()
    }

    /// Record a new watermark. Written to disk on the next flush.
    pub async fn set(&self, sync_id: &str, watermark: Watermark) {
        let mut state = self.state.lock().await;
        state.cursors.insert(sync_id.to_string(), watermark);
        state.dirty.insert(sync_id.to_string());
    }

    /// Write every dirty cursor in one transaction.
    ///
    /// Returns how many were written. On failure the cursors stay dirty
    /// and the next flush tries again.
    pub async fn flush_dirty(&self) -> Result<usize> {
        let pending: Vec<(String, Watermark)> = {
            let mut state = self.state.lock().await;
            let ids = std::mem::take(&mut state.dirty);
            ids.into_iter()
                .filter_map(|id| state.cursors.get(&id).copied().map(|w| (id, w)))
                .collect()
        };
        if pending.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let result = with_busy_retry("cursor_flush", || self.write_all(&pending, now)).await;

        match result {
            Ok(()) => {
                for (sync_id, _) in &pending {
                    metrics::record_cursor_persist(sync_id, true);
                }
                metrics::record_cursor_flush(pending.len(), 0);
                debug!(count = pending.len(), "Flushed cursors");
                Ok(pending.len())
            }
            Err(e) => {
                warn!(count = pending.len(), error = %e, "Failed to flush cursors");
                let mut state = self.state.lock().await;
                for (sync_id, _) in &pending {
                    metrics::record_cursor_persist(sync_id, false);
                    state.dirty.insert(sync_id.clone());
                }
                metrics::record_cursor_flush(0, pending.len());
                Err(e.into())
            }
        }
    }

    async fn write_all(&self, pending: &[(String, Watermark)], now: i64) -> sqlx::Result<()> {
        let mut tx = self.pool.begin().await?;
        for (sync_id, watermark) in pending {
            sqlx::query(UPSERT)
                .bind(sync_id)
                .bind(i64::from(watermark.time))
                .bind(i64::from(watermark.ordinal))
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await
    }

    pub async fn has_dirty(&self) -> bool {
        !self.state.lock().await.dirty.is_empty()
    }

    pub async fn dirty_count(&self) -> usize {
        self.state.lock().await.dirty.len()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Fold the WAL back into the main database file.
    pub async fn checkpoint(&self) -> Result<()> {
        with_busy_retry("cursor_checkpoint", || {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(&self.pool)
        })
        .await?;
        debug!("WAL checkpoint complete");
        Ok(())
    }

    /// Flush, checkpoint and close the pool. Errors are logged.
    pub async fn close(&self) {
        match self.flush_dirty().await {
            Ok(0) => {}
            Ok(count) => info!(count, "Flushed cursors on close"),
            Err(e) => warn!(error = %e, "Failed to flush cursors on close"),
        }
        if let Err(e) = self.checkpoint().await {
            warn!(error = %e, "Failed to checkpoint WAL on close");
        }
        self.pool.close().await;
        info!(path = %self.path, "Cursor store closed");
    }
}
