// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync session coordinator.
//!
//! The orchestrator that ties together:
//! - Namespace selection via [`crate::namespace::NamespaceFilter`]
//! - Starting position via [`crate::checkpoint::CheckpointResolver`]
//! - Ordered reading via [`crate::reader::ChangeLogReader`]
//! - Replay via [`crate::applier::OperationApplier`]
//! - Cursor persistence via [`crate::cursor::CursorStore`]
//!
//! # Architecture
//!
//! One [`SyncOrchestrator`] runs one session:
//! 1. Resolves the resume point, the namespace filter and the checkpoint
//! 2. Catches up from an explicit watermark with a bounded read (restore)
//! 3. Follows the live change log with a continuous read (tail)
//! 4. Terminates as `Success`, `Stopped` or `Failed` and hands back a [`SyncReport`]
//!
//! Records are applied strictly one at a time in watermark order. The
//! watermark advances only after a record is applied, skipped by policy or
//! filtered out, so a failed session's report names the last record that
//! was fully handled. [`Supervisor`] uses that to restart sessions after
//! transient failures.

mod phase;
mod supervisor;
mod types;

pub use supervisor::Supervisor;
pub use types::{SyncReport, SyncState, Termination};

use crate::applier::{Destination, NoOpDestination, OperationApplier};
use crate::checkpoint::CheckpointResolver;
use crate::config::SyncConfig;
use crate::cursor::CursorStore;
use crate::error::{Result, SyncError};
use crate::metrics;
use crate::namespace::NamespaceFilter;
use crate::reader::{ChangeLogReader, ReadMode};
use crate::resilience::RateLimiter;
use crate::session::SessionCounters;
use crate::source::OplogSource;
use crate::watermark::Watermark;
use phase::PhaseEnd;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Cooperative stop signal for one or more sessions.
///
/// Cloning shares the signal. Once raised it stays raised.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Ask every session using this handle to stop.
    ///
    /// Sessions check between records and whenever the change log goes idle.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// One sync session from a source change log to a destination.
///
/// # Example
///
/// ```rust,ignore
/// let config = SyncConfig {
///     namespaces: vec!["app.*".to_string()],
///     stop_on_idle: true,
///     ..SyncConfig::default()
/// };
/// let mut session = SyncOrchestrator::new(config, Arc::new(source), destination);
/// let report = session.run().await;
/// println!("{} at {:?}", report.termination, report.last_watermark);
/// ```
pub struct SyncOrchestrator<S: OplogSource, D: Destination = NoOpDestination> {
    /// Session configuration
    config: SyncConfig,

    /// Change-log source
    source: Arc<S>,

    /// Replays records onto the destination
    applier: OperationApplier<D>,

    /// Session state (broadcast to watchers)
    state_tx: watch::Sender<SyncState>,

    /// Session state receiver (for internal use)
    state_rx: watch::Receiver<SyncState>,

    /// Stop signal
    stop: StopHandle,

    /// Progress counters, shared with observers
    counters: Arc<SessionCounters>,

    /// Apply throttle
    rate_limiter: Option<RateLimiter>,

    /// Cursor persistence store
    cursor_store: Option<Arc<CursorStore>>,

    /// Whether this session opened the store itself (and so closes it)
    owns_cursor_store: bool,

    /// Where this session started reading, once resolved
    start_point: Option<Watermark>,
}

impl<S: OplogSource> SyncOrchestrator<S, NoOpDestination> {
    /// Create a session that reads and filters but writes nothing.
    pub fn dry_run(config: SyncConfig, source: Arc<S>) -> Self {
        Self::new(config, source, NoOpDestination)
    }
}

impl<S: OplogSource, D: Destination> SyncOrchestrator<S, D> {
    /// Create a new session.
    ///
    /// The session starts in `Created` state. Call [`run()`](Self::run) to
    /// drive it to termination.
    pub fn new(config: SyncConfig, source: Arc<S>, destination: D) -> Self {
        let (state_tx, state_rx) = watch::channel(SyncState::Created);

        let rate_limiter = config.apply_rate_limit.clone().map(|cfg| {
            info!(
                sync_id = %config.sync_id,
                rate_per_sec = cfg.refill_rate,
                burst = cfg.burst_size,
                "Rate limiting enabled for applies"
            );
            RateLimiter::new(cfg)
        });

        Self {
            config,
            source,
            applier: OperationApplier::new(destination),
            state_tx,
            state_rx,
            stop: StopHandle::new(),
            counters: Arc::new(SessionCounters::new()),
            rate_limiter,
            cursor_store: None,
            owns_cursor_store: false,
            start_point: None,
        }
    }

    /// Share a stop signal with other sessions or a supervisor.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Use an already-open cursor store instead of opening one from config.
    ///
    /// The session flushes the store when it ends but does not close it.
    pub fn with_cursor_store(mut self, store: Arc<CursorStore>) -> Self {
        self.cursor_store = Some(store);
        self.owns_cursor_store = false;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn sync_id(&self) -> &str {
        &self.config.sync_id
    }

    /// Get a reference to the destination.
    pub fn destination(&self) -> &D {
        self.applier.destination()
    }

    /// Get current session state.
    pub fn state(&self) -> SyncState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<SyncState> {
        self.state_rx.clone()
    }

    /// Live progress counters.
    pub fn counters(&self) -> Arc<SessionCounters> {
        Arc::clone(&self.counters)
    }

    /// Handle for stopping this session from another task.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Raise the stop signal.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Drive the session to termination.
    ///
    /// Never panics and never returns early with an error: every outcome,
    /// including failures, is in the report. Calling `run()` on a session
    /// that has already left `Created` reports `Failed` with
    /// [`SyncError::InvalidState`] and leaves the session untouched.
    pub async fn run(&mut self) -> SyncReport {
        let started = Instant::now();

        if self.state() != SyncState::Created {
            let actual = self.state();
            warn!(sync_id = %self.config.sync_id, state = %actual, "Session already run");
            return SyncReport {
                sync_id: self.config.sync_id.clone(),
                termination: Termination::Failed,
                error: Some(SyncError::InvalidState {
                    expected: SyncState::Created.to_string(),
                    actual: actual.to_string(),
                }),
                last_watermark: self.counters.watermark(),
                resume_from: self.counters.watermark().or(self.start_point),
                stats: self.counters.snapshot(),
                duration: started.elapsed(),
            };
        }

        let span = info_span!("oplog_sync", sync_id = %self.config.sync_id);
        async {
            info!(
                namespaces = ?self.config.namespaces,
                start_from = ?self.config.start_from,
                "Starting sync session"
            );
            let outcome = self.run_phases().await;
            self.finish(outcome, started).await
        }
        .instrument(span)
        .await
    }

    async fn run_phases(&mut self) -> Result<Termination> {
        self.set_state(SyncState::Resolving);
        self.config.validate()?;

        let explicit = self.resume_point().await?;
        let filter = Arc::new(self.compile_filter().await?);
        let mut checkpoint = CheckpointResolver::new(&*self.source)
            .resolve(explicit)
            .await?;

        let tail_from = match checkpoint.restore_from {
            Some(restore_from) => {
                self.start_point = Some(restore_from);
                if self.stop.is_stopped() {
                    return Ok(Termination::Stopped);
                }
                self.set_state(SyncState::Restoring);

                let reader = self.reader(Arc::clone(&filter), restore_from, ReadMode::Bounded);
                let (end, position) = self.drive(reader).await?;
                if end == PhaseEnd::Stopped {
                    return Ok(Termination::Stopped);
                }

                let last_observed = (position > restore_from).then_some(position);
                let tail_from = checkpoint.finish_restore(last_observed);
                info!(tail_from = %tail_from, "Restore complete, switching to tail");
                tail_from
            }
            None => {
                let tail_from = checkpoint.finish_restore(None);
                self.start_point = Some(tail_from);
                tail_from
            }
        };

        if self.stop.is_stopped() {
            return Ok(Termination::Stopped);
        }
        self.set_state(SyncState::Tailing);

        let reader = self.reader(filter, tail_from, ReadMode::Continuous);
        let (end, _) = self.drive(reader).await?;
        if end == PhaseEnd::Stopped || self.stop.is_stopped() {
            return Ok(Termination::Stopped);
        }
        Ok(Termination::Success)
    }

    /// Load the explicit starting watermark: config first, then the
    /// persisted cursor.
    ///
    /// Opens the cursor store from config if one wasn't injected.
    async fn resume_point(&mut self) -> Result<Option<Watermark>> {
        if self.cursor_store.is_none() {
            if let Some(cursor_config) = &self.config.cursor {
                let store = CursorStore::from_config(cursor_config).await?;
                info!(path = %cursor_config.sqlite_path, "Cursor store initialized");
                self.cursor_store = Some(Arc::new(store));
                self.owns_cursor_store = true;
            }
        }

        if let Some(w) = self.config.start_watermark()? {
            debug!(start_from = %w, "Using configured start watermark");
            return Ok(Some(w));
        }

        if let Some(store) = &self.cursor_store {
            if let Some(w) = store.get(&self.config.sync_id).await {
                info!(cursor = %w, "Resuming from persisted cursor");
                return Ok(Some(w));
            }
        }

        Ok(None)
    }

    async fn compile_filter(&self) -> Result<NamespaceFilter> {
        let known = self.source.namespaces().await.map_err(|e| {
            SyncError::Resolution(format!("cannot enumerate namespaces: {}", e))
        })?;

        let filter = NamespaceFilter::compile(&known, &self.config.namespaces)?;
        info!(
            known = known.len(),
            databases = ?filter.databases().collect::<Vec<_>>(),
            "Namespace filter compiled"
        );
        Ok(filter)
    }

    fn reader(
        &self,
        filter: Arc<NamespaceFilter>,
        after: Watermark,
        mode: ReadMode,
    ) -> ChangeLogReader<S> {
        ChangeLogReader::new(
            self.config.sync_id.clone(),
            Arc::clone(&self.source),
            filter,
            after,
            mode,
            self.config.read_timeout_duration(),
            self.config.stop_on_idle,
            self.stop.subscribe(),
        )
    }

    fn set_state(&self, state: SyncState) {
        let _ = self.state_tx.send(state);
        metrics::set_sync_state(&self.config.sync_id, state.label());
        debug!(state = %state, "Session state changed");
    }

    async fn finish(&mut self, outcome: Result<Termination>, started: Instant) -> SyncReport {
        let (termination, error) = match outcome {
            Ok(termination) => (termination, None),
            Err(e) => {
                error!(
                    error = %e,
                    last_watermark = ?self.counters.watermark(),
                    "Sync session failed"
                );
                metrics::record_error(&self.config.sync_id, e.kind());
                (Termination::Failed, Some(e))
            }
        };

        if let Some(store) = self.cursor_store.take() {
            if self.owns_cursor_store {
                store.close().await;
            } else if let Err(e) = store.flush_dirty().await {
                let pending = store.dirty_count().await;
                warn!(error = %e, pending, "Failed to flush cursor at session end");
            }
        }

        self.set_state(SyncState::Terminated(termination));

        let duration = started.elapsed();
        metrics::record_session_end(&self.config.sync_id, termination.label(), duration);

        let stats = self.counters.snapshot();
        info!(
            termination = %termination,
            seen = stats.seen,
            applied = stats.applied,
            skipped = stats.skipped,
            watermark = ?stats.watermark,
            duration_ms = duration.as_millis() as u64,
            "Sync session ended"
        );

        SyncReport {
            sync_id: self.config.sync_id.clone(),
            termination,
            error,
            last_watermark: stats.watermark,
            resume_from: stats.watermark.or(self.start_point),
            stats,
            duration,
        }
    }
}
