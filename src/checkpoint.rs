// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Starting position resolution.
//!
//! ```text
//! explicit watermark w?
//!   no  → restore: none      tail from: tail head (now)
//!   yes → restore: after w   tail from: last record seen while restoring (or w)
//! ```
//!
//! With an explicit watermark, the tail boundary is only known once the
//! catch-up read is exhausted. Using a tail head measured before the
//! catch-up would drop every record written while catching up.

use crate::error::{Result, SyncError};
use crate::source::OplogSource;
use crate::watermark::Watermark;
use tracing::{debug, info};

/// Where a session starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Catch-up read starts strictly after this watermark.
    pub restore_from: Option<Watermark>,
    /// Live tail starts strictly after this watermark. `None` until the
    /// catch-up read has finished.
    pub tail_from: Option<Watermark>,
}

impl Checkpoint {
    /// Whether a catch-up read is needed before tailing.
    pub fn needs_restore(&self) -> bool {
        self.restore_from.is_some()
    }

    /// Close out the catch-up read.
    ///
    /// `last_observed` is the watermark of the last record consumed during
    /// catch-up, if any. Returns the resolved tail boundary.
    pub fn finish_restore(&mut self, last_observed: Option<Watermark>) -> Watermark {
        let tail_from = match (last_observed, self.restore_from) {
            (Some(last), _) => last,
            (None, Some(restore_from)) => restore_from,
            (None, None) => self.tail_from.unwrap_or(Watermark::ZERO),
        };
        self.tail_from = Some(tail_from);
        tail_from
    }
}

/// Computes a session's [`Checkpoint`].
pub struct CheckpointResolver<'a, S: ?Sized> {
    source: &'a S,
}

impl<'a, S: OplogSource + ?Sized> CheckpointResolver<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Resolve the starting position.
    ///
    /// Without an explicit watermark the tail head is read now; an empty or
    /// unreadable change log is a resolution error.
    pub async fn resolve(&self, explicit: Option<Watermark>) -> Result<Checkpoint> {
        if let Some(w) = explicit {
            info!(restore_from = %w, "Resolved checkpoint: catch-up from explicit watermark");
            return Ok(Checkpoint {
                restore_from: Some(w),
                tail_from: None,
            });
        }

        let head = self
            .source
            .tail_head()
            .await
            .map_err(|e| SyncError::Resolution(format!("cannot read tail head: {}", e)))?
            .ok_or_else(|| SyncError::Resolution("change log is empty".to_string()))?;

        debug!(tail_head = %head, "Read tail head");
        info!(tail_from = %head, "Resolved checkpoint: tailing from current head");
        Ok(Checkpoint {
            restore_from: None,
            tail_from: Some(head),
        })
    }
}
