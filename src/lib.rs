//! # Oplog Sync
//!
//! Mirrors a document database by tailing its replication change log (the
//! oplog) and replaying each change, in order, onto a destination store.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                               oplog-sync                                  │
//! │                                                                           │
//! │  ┌──────────────┐    ┌─────────────────┐    ┌──────────────────────────┐  │
//! │  │ OplogSource  │───►│ ChangeLogReader │───►│ OperationApplier         │  │
//! │  │ (cursor)     │    │ (filter, order) │    │ (insert/update/delete)   │  │
//! │  └──────────────┘    └─────────────────┘    └──────────────────────────┘  │
//! │         ▲                     │                          │                │
//! │         │                     ▼                          ▼                │
//! │  ┌────────────────────┐  ┌──────────────┐        ┌──────────────┐         │
//! │  │ CheckpointResolver │  │ CursorStore  │        │ Destination  │         │
//! │  │ (restore / tail)   │  │ (SQLite)     │        │              │         │
//! │  └────────────────────┘  └──────────────┘        └──────────────┘         │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two-Phase Sessions
//!
//! 1. **Restore**: With an explicit starting watermark, a bounded read
//!    catches up from that point until the change log goes idle
//! 2. **Tail**: A continuous read follows the live change log, reopening
//!    its cursor whenever it times out, until stopped
//!
//! ## Usage
//!
//! ```rust,ignore
//! use oplog_sync::{SyncConfig, SyncOrchestrator, Termination};
//! use std::sync::Arc;
//!
//! let config = SyncConfig {
//!     namespaces: vec!["app.*".to_string()],
//!     ..SyncConfig::default()
//! };
//!
//! let mut session = SyncOrchestrator::new(config, Arc::new(source), destination);
//! let stop = session.stop_handle();
//! // elsewhere: stop.stop();
//!
//! let report = session.run().await;
//! assert_eq!(report.termination, Termination::Stopped);
//! ```

pub mod applier;
pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod cursor;
pub mod error;
pub mod metrics;
pub mod namespace;
pub mod oplog;
pub mod reader;
pub mod resilience;
pub mod session;
pub mod source;
pub mod watermark;

// Re-exports for convenience
pub use applier::{ApplyOp, ApplyOutcome, Destination, DestinationError, NoOpDestination, OperationApplier};
pub use checkpoint::{Checkpoint, CheckpointResolver};
pub use config::{CursorConfig, RetrySettings, SyncConfig};
pub use coordinator::{StopHandle, Supervisor, SyncOrchestrator, SyncReport, SyncState, Termination};
pub use cursor::CursorStore;
pub use error::{Result, SyncError};
pub use namespace::{Namespace, NamespaceFilter, NamespacePattern};
pub use oplog::{ChangeRecord, OpKind};
pub use reader::{ChangeLogReader, ReadItem, ReadMode, SkipReason};
pub use resilience::{RateLimitConfig, RateLimiter, RetryConfig};
pub use session::{SessionCounters, SessionStats};
pub use source::{CursorEvent, CursorQuery, OplogCursor, OplogSource, SourceError};
pub use watermark::Watermark;
