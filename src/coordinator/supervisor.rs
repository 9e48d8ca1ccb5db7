// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Session restarts after transient failures.
//!
//! A session never retries internally. When one fails with a retryable
//! error (read failure, destination transport failure) the supervisor
//! starts a fresh session from the failed session's `resume_from`
//! watermark, after an exponential backoff.
//!
//! The record that failed is read again by the new session, so at most one
//! record is re-applied per restart.

use super::{StopHandle, SyncOrchestrator, SyncReport};
use crate::applier::Destination;
use crate::config::SyncConfig;
use crate::cursor::CursorStore;
use crate::metrics;
use crate::resilience::RetryConfig;
use crate::session::SessionStats;
use crate::source::OplogSource;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};

/// Runs sessions back to back until one ends for good.
pub struct Supervisor<S: OplogSource, D: Destination> {
    config: SyncConfig,
    source: Arc<S>,
    destination: Arc<D>,
    retry: RetryConfig,
    stop: StopHandle,
    cursor_store: Option<Arc<CursorStore>>,
    restarts: usize,
}

impl<S: OplogSource, D: Destination> Supervisor<S, D> {
    /// Create a supervisor using the restart policy from `config.retry`.
    pub fn new(config: SyncConfig, source: Arc<S>, destination: Arc<D>) -> Self {
        let retry = config.retry.retry_config();
        Self {
            config,
            source,
            destination,
            retry,
            stop: StopHandle::new(),
            cursor_store: None,
            restarts: 0,
        }
    }

    /// Override the restart policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Share one cursor store across all sessions.
    pub fn with_cursor_store(mut self, store: Arc<CursorStore>) -> Self {
        self.cursor_store = Some(store);
        self
    }

    /// Handle that stops the running session and any pending restart.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Sessions started after the first.
    pub fn restarts(&self) -> usize {
        self.restarts
    }

    /// Run sessions until one succeeds, stops, fails permanently, or the
    /// restart budget is spent.
    ///
    /// The returned report is the last session's, with `stats` summed over
    /// every session and `duration` covering the whole run.
    pub async fn run(&mut self) -> SyncReport {
        let span = info_span!("supervisor", sync_id = %self.config.sync_id);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&mut self) -> SyncReport {
        let started = Instant::now();
        let mut config = self.config.clone();
        let mut totals = SessionStats::default();
        let mut attempt = 0usize;

        loop {
            let mut session = SyncOrchestrator::new(
                config.clone(),
                Arc::clone(&self.source),
                Arc::clone(&self.destination),
            )
            .with_stop_handle(self.stop.clone());
            if let Some(store) = &self.cursor_store {
                session = session.with_cursor_store(Arc::clone(store));
            }

            let mut report = session.run().await;
            totals.seen += report.stats.seen;
            totals.applied += report.stats.applied;
            totals.skipped += report.stats.skipped;
            totals.watermark = report.stats.watermark.or(totals.watermark);

            let give_up = !report.is_retryable()
                || !self.retry.allows_retry(attempt)
                || self.stop.is_stopped();
            if give_up {
                if report.is_retryable() && !self.stop.is_stopped() {
                    warn!(attempts = attempt + 1, "Restart budget exhausted");
                }
                report.stats = totals;
                report.last_watermark = totals.watermark;
                report.duration = started.elapsed();
                return report;
            }

            attempt += 1;
            self.restarts += 1;
            let delay = self.retry.delay_for_attempt(attempt);
            let error_kind = report.error.as_ref().map(|e| e.kind()).unwrap_or("unknown");
            metrics::record_session_restart(&self.config.sync_id, error_kind);
            warn!(
                attempt,
                error = ?report.error,
                resume_from = ?report.resume_from,
                delay_ms = delay.as_millis() as u64,
                "Session failed, restarting"
            );

            if let Some(resume_from) = report.resume_from {
                config.start_from = Some(resume_from.to_string());
            }

            let mut stop_rx = self.stop.subscribe();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop_rx.wait_for(|stopped| *stopped) => {
                    info!("Stop requested during restart backoff");
                    report.stats = totals;
                    report.last_watermark = totals.watermark;
                    report.duration = started.elapsed();
                    return report;
                }
            }
        }
    }
}
