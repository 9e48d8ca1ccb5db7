// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Session counters.
//!
//! Written only by the orchestrator's control loop, read lock-free from
//! anywhere through the shared `Arc<SessionCounters>`.

use crate::watermark::Watermark;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Packed value meaning "nothing advanced yet".
const UNSET: u64 = u64::MAX;

/// Live counters for one session.
#[derive(Debug)]
pub struct SessionCounters {
    seen: AtomicU64,
    applied: AtomicU64,
    skipped: AtomicU64,
    watermark: AtomicU64,
}

impl Default for SessionCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCounters {
    pub fn new() -> Self {
        Self {
            seen: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            watermark: AtomicU64::new(UNSET),
        }
    }

    /// A record was consumed from the reader.
    pub fn record_seen(&self) {
        self.seen.fetch_add(1, Ordering::Relaxed);
    }

    /// The destination accepted a mutation.
    pub fn record_applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    /// A record advanced the watermark without being applied.
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish the last advanced watermark.
    ///
    /// `Watermark::new(u32::MAX, u32::MAX)` is indistinguishable from unset;
    /// a real oplog never gets there.
    pub fn advance(&self, watermark: Watermark) {
        self.watermark.store(watermark.as_u64(), Ordering::Release);
    }

    pub fn watermark(&self) -> Option<Watermark> {
        match self.watermark.load(Ordering::Acquire) {
            UNSET => None,
            packed => Some(Watermark::from_u64(packed)),
        }
    }

    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            seen: self.seen.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            watermark: self.watermark(),
        }
    }
}

/// Point-in-time copy of [`SessionCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Records consumed, including filtered and no-op records.
    pub seen: u64,
    /// Mutations accepted by the destination.
    pub applied: u64,
    /// Records that advanced the watermark without being applied.
    pub skipped: u64,
    /// Last advanced watermark.
    pub watermark: Option<Watermark>,
}
