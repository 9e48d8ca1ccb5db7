//! Read → apply → advance loop shared by the restore and tail phases.
//!
//! For each item the reader yields:
//! 1. Filtered and no-op records advance the watermark directly
//! 2. Change records are throttled (if configured) and applied
//! 3. Rejections are skipped when `ignore_apply_errors` is set; any other
//!    apply error ends the phase without advancing
//! 4. The watermark advances, the cursor is updated (debounced) and
//!    flushed on an interval
//!
//! The stop signal is checked before every read.

use super::SyncOrchestrator;
use crate::applier::{ApplyOutcome, Destination};
use crate::error::{Result, SyncError};
use crate::metrics;
use crate::oplog::ChangeRecord;
use crate::reader::{ChangeLogReader, ReadItem};
use crate::source::OplogSource;
use crate::watermark::Watermark;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Default cursor flush interval when no cursor config is present.
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Why a phase's read loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PhaseEnd {
    /// The reader ran out (caught up, or idle with `stop_on_idle`).
    Exhausted,
    /// The stop signal was raised.
    Stopped,
}

impl<S: OplogSource, D: Destination> SyncOrchestrator<S, D> {
    /// Consume `reader` until it ends, the session is stopped, or an error
    /// occurs.
    ///
    /// Returns how the phase ended and the reader's final position.
    pub(super) async fn drive(
        &self,
        mut reader: ChangeLogReader<S>,
    ) -> Result<(PhaseEnd, Watermark)> {
        let flush_interval = self
            .config
            .cursor
            .as_ref()
            .map(|c| c.flush_interval_duration())
            .unwrap_or(DEFAULT_FLUSH_INTERVAL);
        let mut last_flush = Instant::now();

        debug!(mode = ?reader.mode(), after = %reader.position(), "Phase started");

        loop {
            if self.stop.is_stopped() {
                debug!(position = %reader.position(), "Stop requested");
                return Ok((PhaseEnd::Stopped, reader.position()));
            }

            let item = match reader.next().await? {
                Some(item) => item,
                None => return Ok((PhaseEnd::Exhausted, reader.position())),
            };
            self.counters.record_seen();

            match item {
                ReadItem::Skipped { watermark, reason } => {
                    trace!(watermark = %watermark, reason = reason.as_str(), "Record skipped");
                    self.counters.record_skipped();
                    metrics::record_record_skipped(&self.config.sync_id, reason.as_str());
                    self.advance(watermark).await;
                }
                ReadItem::Change(record) => {
                    self.apply_record(&record).await?;
                    self.advance(record.watermark).await;
                }
            }

            if last_flush.elapsed() >= flush_interval {
                self.flush_cursor().await;
                last_flush = Instant::now();
            }
        }
    }

    /// Apply one record under the session's error policy.
    async fn apply_record(&self, record: &ChangeRecord) -> Result<()> {
        if let Some(limiter) = &self.rate_limiter {
            let waited = limiter.throttle().await;
            if !waited.is_zero() {
                metrics::record_throttle_wait(&self.config.sync_id, waited);
            }
        }

        match self.applier.apply(record).await {
            Ok(ApplyOutcome::Applied) => {
                self.counters.record_applied();
                metrics::record_record_applied(&self.config.sync_id, record.op);
                Ok(())
            }
            Ok(ApplyOutcome::Observed) => {
                self.counters.record_skipped();
                metrics::record_record_skipped(&self.config.sync_id, "observed");
                Ok(())
            }
            Err(e @ SyncError::ApplyRejected { .. }) if self.config.ignore_apply_errors => {
                warn!(error = %e, "Ignoring rejected record");
                self.counters.record_skipped();
                metrics::record_record_skipped(&self.config.sync_id, "rejected");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Move the session watermark forward.
    async fn advance(&self, watermark: Watermark) {
        if let Some(current) = self.counters.watermark() {
            if watermark <= current {
                warn!(
                    watermark = %watermark,
                    current = %current,
                    "Refusing to move watermark backwards"
                );
                return;
            }
        }

        self.counters.advance(watermark);
        metrics::set_watermark(&self.config.sync_id, watermark.as_u64());

        let now = chrono::Utc::now().timestamp().max(0) as u64;
        metrics::record_replication_lag(
            &self.config.sync_id,
            now.saturating_sub(u64::from(watermark.time)),
        );

        if let Some(store) = &self.cursor_store {
            store.set(&self.config.sync_id, watermark).await;
        }
    }

    async fn flush_cursor(&self) {
        let Some(store) = &self.cursor_store else {
            return;
        };
        if !store.has_dirty().await {
            return;
        }
        match store.flush_dirty().await {
            Ok(count) => {
                if count > 0 {
                    trace!(count, "Flushed cursor");
                }
            }
            Err(e) => warn!(error = %e, "Failed to flush cursor"),
        }
    }
}
