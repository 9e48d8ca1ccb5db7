// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change-log source integration traits.
//!
//! The engine never talks to the source store directly. The caller provides
//! an [`OplogSource`] that can enumerate namespaces, report the tail head,
//! and open tailable cursors positioned strictly after a watermark.
//!
//! # Example
//!
//! ```rust,no_run
//! use oplog_sync::source::{BoxFuture, CursorEvent, CursorQuery, OplogCursor, OplogSource};
//! use oplog_sync::{Namespace, Watermark};
//!
//! struct EmptyLog;
//! struct NothingYet;
//!
//! impl OplogCursor for NothingYet {
//!     fn next(&mut self) -> BoxFuture<'_, CursorEvent> {
//!         Box::pin(async { Ok(CursorEvent::Exhausted) })
//!     }
//! }
//!
//! impl OplogSource for EmptyLog {
//!     fn namespaces(&self) -> BoxFuture<'_, Vec<Namespace>> {
//!         Box::pin(async { Ok(vec![Namespace::new("app", "users")]) })
//!     }
//!
//!     fn tail_head(&self) -> BoxFuture<'_, Option<Watermark>> {
//!         Box::pin(async { Ok(None) })
//!     }
//!
//!     fn open_cursor(&self, _query: CursorQuery) -> BoxFuture<'_, Box<dyn OplogCursor>> {
//!         Box::pin(async { Ok(Box::new(NothingYet) as Box<dyn OplogCursor>) })
//!     }
//! }
//! ```

use crate::namespace::Namespace;
use crate::oplog::ChangeRecord;
use crate::watermark::Watermark;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Result type for source operations.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = SourceResult<T>> + Send + 'a>>;

/// Simplified error for source operations.
#[derive(Debug, Clone)]
pub struct SourceError(pub String);

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SourceError {}

impl From<crate::error::SyncError> for SourceError {
    /// Lets sources built on [`ChangeRecord::from_oplog_json`] use `?`.
    fn from(e: crate::error::SyncError) -> Self {
        SourceError(e.to_string())
    }
}

/// Where a new cursor starts, what it selects, and how long it blocks when
/// idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorQuery {
    /// Yield only records strictly after this watermark.
    pub after: Watermark,
    /// Databases in scope. Sources should push this down into the log
    /// query (`ns` in these databases) so out-of-scope records stay on the
    /// server. Records outside it are still filtered on arrival, and no-op
    /// entries may be delivered regardless.
    pub databases: Vec<String>,
    /// How long `next()` may wait for a new record before reporting
    /// [`CursorEvent::Exhausted`].
    pub max_await: Duration,
}

/// What a cursor produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CursorEvent {
    Record(ChangeRecord),
    /// No record arrived within `max_await`. This is a timeout, not the
    /// end of the log; the cursor is finished and must be reopened.
    Exhausted,
}

/// A tailable cursor over the change log.
pub trait OplogCursor: Send {
    /// Next record in log order, or `Exhausted` after an idle timeout.
    fn next(&mut self) -> BoxFuture<'_, CursorEvent>;
}

/// Trait defining what we need from the source store.
pub trait OplogSource: Send + Sync + 'static {
    /// Namespaces that currently exist on the source.
    ///
    /// Called once per session to compile the namespace filter.
    fn namespaces(&self) -> BoxFuture<'_, Vec<Namespace>>;

    /// Watermark of the most recently written record, `None` if the log is
    /// empty.
    fn tail_head(&self) -> BoxFuture<'_, Option<Watermark>>;

    /// Open a cursor positioned strictly after `query.after`, limited to
    /// `query.databases`.
    fn open_cursor(&self, query: CursorQuery) -> BoxFuture<'_, Box<dyn OplogCursor>>;
}
