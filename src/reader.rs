// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change-log reader.
//!
//! Presents the source's tailable cursors as one ordered, restartable
//! sequence of [`ReadItem`]s.
//!
//! # Cursor Lifecycle
//!
//! ```text
//!   open(after = position) ──► Record ──► position = record.watermark ──► yield
//!          ▲                     │
//!          │                  Exhausted (idle for read_timeout)
//!          │                     │
//!          │         Bounded ────┼──► None (caught up)
//!          │         stop / stop_on_idle ──► None
//!          └──────── otherwise reopen strictly after position
//! ```
//!
//! Every cursor is opened with the filter's in-scope databases so the source
//! can drop out-of-scope records before they are sent. Records that still
//! arrive are checked against the full filter.
//!
//! Exhaustion is a timeout, not the end of data. A cursor error is returned
//! as [`SyncError::Read`] and is not retried here; restarting belongs to
//! the caller.
//!
//! # Stale Records
//!
//! A record at or below the current position means the source replayed
//! something we already consumed. It is dropped with a warning and does
//! not move the position.

use crate::error::{Result, SyncError};
use crate::metrics;
use crate::namespace::NamespaceFilter;
use crate::oplog::{ChangeRecord, OpKind};
use crate::source::{CursorEvent, CursorQuery, OplogCursor, OplogSource};
use crate::watermark::Watermark;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Why a record was consumed without reaching the applier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Noop,
    OutOfScope,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::OutOfScope => "out_of_scope",
        }
    }
}

/// One step of the reader.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadItem {
    /// In-scope record for the applier.
    Change(ChangeRecord),
    /// Consumed and filtered; the watermark still advances.
    Skipped {
        watermark: Watermark,
        reason: SkipReason,
    },
}

impl ReadItem {
    pub fn watermark(&self) -> Watermark {
        match self {
            Self::Change(record) => record.watermark,
            Self::Skipped { watermark, .. } => *watermark,
        }
    }
}

/// Whether exhaustion ends the read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Catch-up read: the first idle timeout means caught up.
    Bounded,
    /// Live tail: reopen on idle timeouts until stopped.
    Continuous,
}

/// Ordered, restartable view of the change log.
pub struct ChangeLogReader<S: ?Sized> {
    sync_id: String,
    source: Arc<S>,
    filter: Arc<NamespaceFilter>,
    databases: Vec<String>,
    position: Watermark,
    cursor: Option<Box<dyn OplogCursor>>,
    mode: ReadMode,
    read_timeout: Duration,
    stop_on_idle: bool,
    stop: watch::Receiver<bool>,
    finished: bool,
}

impl<S: OplogSource + ?Sized> ChangeLogReader<S> {
    /// Create a reader yielding records strictly after `after`.
    ///
    /// The cursor is opened lazily on the first `next()`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sync_id: impl Into<String>,
        source: Arc<S>,
        filter: Arc<NamespaceFilter>,
        after: Watermark,
        mode: ReadMode,
        read_timeout: Duration,
        stop_on_idle: bool,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let databases = filter.databases().map(String::from).collect();
        Self {
            sync_id: sync_id.into(),
            source,
            filter,
            databases,
            position: after,
            cursor: None,
            mode,
            read_timeout,
            stop_on_idle,
            stop,
            finished: false,
        }
    }

    /// Watermark of the last record consumed (or the starting point).
    pub fn position(&self) -> Watermark {
        self.position
    }

    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    /// Next item, or `None` once the read is over.
    ///
    /// After `None` every further call returns `None`.
    pub async fn next(&mut self) -> Result<Option<ReadItem>> {
        let start = Instant::now();
        let result = self.next_inner().await;
        metrics::record_read_latency(&self.sync_id, start.elapsed());
        result
    }

    async fn next_inner(&mut self) -> Result<Option<ReadItem>> {
        loop {
            if self.finished {
                return Ok(None);
            }

            let position = self.position;
            let mut cursor = match self.cursor.take() {
                Some(cursor) => cursor,
                None => {
                    let query = CursorQuery {
                        after: position,
                        databases: self.databases.clone(),
                        max_await: self.read_timeout,
                    };
                    trace!(sync_id = %self.sync_id, after = %position, "Opening oplog cursor");
                    self.source
                        .open_cursor(query)
                        .await
                        .map_err(|e| SyncError::read(position, format!("open cursor: {}", e)))?
                }
            };

            let event = cursor
                .next()
                .await
                .map_err(|e| SyncError::read(position, e.0))?;

            match event {
                CursorEvent::Record(record) => {
                    self.cursor = Some(cursor);
                    if record.watermark <= position {
                        warn!(
                            sync_id = %self.sync_id,
                            watermark = %record.watermark,
                            position = %position,
                            "Dropping record at or below reader position"
                        );
                        metrics::record_stale_record(&self.sync_id);
                        continue;
                    }
                    self.position = record.watermark;
                    metrics::record_record_read(&self.sync_id, record.op);
                    return Ok(Some(self.classify(record)));
                }
                CursorEvent::Exhausted => {
                    if self.idle_ends_read() {
                        debug!(
                            sync_id = %self.sync_id,
                            position = %self.position,
                            mode = ?self.mode,
                            "Change log idle, ending read"
                        );
                        self.finished = true;
                        return Ok(None);
                    }
                    trace!(sync_id = %self.sync_id, position = %self.position, "Cursor idle, reopening");
                    metrics::record_cursor_reopen(&self.sync_id);
                }
            }
        }
    }

    fn idle_ends_read(&self) -> bool {
        match self.mode {
            ReadMode::Bounded => true,
            ReadMode::Continuous => self.stop_on_idle || *self.stop.borrow(),
        }
    }

    fn classify(&self, record: ChangeRecord) -> ReadItem {
        if record.op == OpKind::Noop {
            return ReadItem::Skipped {
                watermark: record.watermark,
                reason: SkipReason::Noop,
            };
        }
        if !self.filter.matches(&record.namespace) {
            trace!(
                sync_id = %self.sync_id,
                watermark = %record.watermark,
                ns = %record.namespace,
                "Record out of scope"
            );
            return ReadItem::Skipped {
                watermark: record.watermark,
                reason: SkipReason::OutOfScope,
            };
        }
        ReadItem::Change(record)
    }
}
