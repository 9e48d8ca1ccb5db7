//! Session state types.
//!
//! Defines the state machine for one sync session.
//!
//! # State Transitions
//!
//! ```text
//!             run()
//! Created ──────────→ Resolving ──(explicit watermark)──→ Restoring
//!                         │                                   │
//!                         │ (no explicit watermark)           │ (caught up)
//!                         ↓                                   ↓
//!                      Tailing ←──────────────────────────────┘
//!                         │
//!        ┌────────────────┼─────────────────────┐
//!        ↓                ↓                     ↓
//!  Terminated(Success)  Terminated(Stopped)  Terminated(Failed)
//!  (idle + stop_on_idle) (stop signal)        (fatal error, from any phase)
//! ```
//!
//! # State Descriptions
//!
//! - **Created**: Initial state after `SyncOrchestrator::new()`. Nothing read.
//! - **Resolving**: Loading the resume point, compiling the namespace
//!   filter, resolving the checkpoint.
//! - **Restoring**: Catching up from an explicit watermark with a bounded read.
//! - **Tailing**: Following the live change log.
//! - **Terminated**: Final. See [`Termination`].

use crate::error::SyncError;
use crate::session::SessionStats;
use crate::watermark::Watermark;
use std::time::Duration;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The live tail went idle with `stop_on_idle` set.
    Success,
    /// A fatal error; see [`SyncReport::error`].
    Failed,
    /// The stop signal was raised.
    Stopped,
}

impl Termination {
    pub fn label(&self) -> &'static str {
        match self {
            Termination::Success => "Success",
            Termination::Failed => "Failed",
            Termination::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// State of a sync session.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Created,
    Resolving,
    Restoring,
    Tailing,
    Terminated(Termination),
}

impl SyncState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, SyncState::Terminated(_))
    }

    /// Flat label for metrics (`Stopped` rather than `Terminated(Stopped)`).
    pub fn label(&self) -> &'static str {
        match self {
            SyncState::Created => "Created",
            SyncState::Resolving => "Resolving",
            SyncState::Restoring => "Restoring",
            SyncState::Tailing => "Tailing",
            SyncState::Terminated(t) => t.label(),
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Terminated(t) => write!(f, "Terminated({})", t),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// What a finished session hands back.
#[derive(Debug)]
pub struct SyncReport {
    pub sync_id: String,
    pub termination: Termination,
    /// Set when `termination` is `Failed`.
    pub error: Option<SyncError>,
    /// Last advanced watermark, `None` if nothing advanced.
    pub last_watermark: Option<Watermark>,
    /// Where a follow-up session should start (exclusive) to neither skip
    /// nor re-apply more than one record: the last advanced watermark, or
    /// the session's own starting point if nothing advanced.
    pub resume_from: Option<Watermark>,
    pub stats: SessionStats,
    pub duration: Duration,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.termination == Termination::Success
    }

    /// Whether a fresh session from `resume_from` may succeed.
    pub fn is_retryable(&self) -> bool {
        self.termination == Termination::Failed
            && self.error.as_ref().is_some_and(SyncError::is_retryable)
    }
}
