// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Destination integration and the operation applier.
//!
//! The [`Destination`] trait is the seam to the destination store: one call
//! per mutation, no batching. The [`OperationApplier`] turns a
//! [`ChangeRecord`] into exactly one [`ApplyOp`] (or none, for records that
//! are only observed) and maps destination failures into [`SyncError`].
//!
//! # Example
//!
//! ```rust,no_run
//! use oplog_sync::applier::{ApplyOp, BoxFuture, Destination};
//! use oplog_sync::Namespace;
//!
//! struct Printer;
//!
//! impl Destination for Printer {
//!     fn apply(&self, namespace: &Namespace, op: ApplyOp) -> BoxFuture<'_, ()> {
//!         println!("{} {:?}", namespace, op);
//!         Box::pin(async { Ok(()) })
//!     }
//! }
//! ```

use crate::error::{Result, SyncError};
use crate::metrics;
use crate::namespace::Namespace;
use crate::oplog::{ChangeRecord, OpKind};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// Result type for destination operations.
pub type DestinationResult<T> = std::result::Result<T, DestinationError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = DestinationResult<T>> + Send + 'a>>;

/// Failure reported by a destination.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DestinationError {
    /// The destination processed the request and refused it
    /// (duplicate key, validation failure, no matching document...).
    #[error("rejected: {0}")]
    Rejected(String),

    /// The request did not complete (connection reset, timeout...).
    /// Whether the mutation took effect is unknown.
    #[error("transport: {0}")]
    Transport(String),
}

/// One mutation request.
///
/// Every request names its target by `selector` so that applying the same
/// record twice leaves the destination as applying it once would. An insert
/// is an upsert by `_id`: replace the matching document, or create it.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOp {
    Insert { selector: Value, document: Value },
    Update { selector: Value, update: Value },
    Delete { selector: Value },
}

impl ApplyOp {
    pub fn kind(&self) -> OpKind {
        match self {
            Self::Insert { .. } => OpKind::Insert,
            Self::Update { .. } => OpKind::Update,
            Self::Delete { .. } => OpKind::Delete,
        }
    }
}

/// Trait defining what we need from the destination store.
pub trait Destination: Send + Sync + 'static {
    /// Apply one mutation to `namespace`.
    fn apply(&self, namespace: &Namespace, op: ApplyOp) -> BoxFuture<'_, ()>;
}

impl<D: Destination + ?Sized> Destination for Arc<D> {
    fn apply(&self, namespace: &Namespace, op: ApplyOp) -> BoxFuture<'_, ()> {
        (**self).apply(namespace, op)
    }
}

/// A no-op destination for dry runs.
///
/// Logs operations but doesn't actually apply anything.
#[derive(Clone, Default)]
pub struct NoOpDestination;

impl Destination for NoOpDestination {
    fn apply(&self, namespace: &Namespace, op: ApplyOp) -> BoxFuture<'_, ()> {
        debug!(ns = %namespace, op = %op.kind(), "NoOp: would apply");
        Box::pin(async { Ok(()) })
    }
}

/// What applying a record amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Sent to the destination and accepted.
    Applied,
    /// Command or no-op; logged, nothing sent.
    Observed,
}

/// Converts change records into destination requests.
pub struct OperationApplier<D> {
    destination: D,
}

impl<D: Destination> OperationApplier<D> {
    pub fn new(destination: D) -> Self {
        Self { destination }
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    /// Apply one record.
    ///
    /// Mutations without a usable selector (inserts lacking `_id`, updates
    /// lacking `o2`) are rejected locally without contacting the
    /// destination.
    pub async fn apply(&self, record: &ChangeRecord) -> Result<ApplyOutcome> {
        let op = match self.build_op(record)? {
            Some(op) => op,
            None => {
                trace!(
                    watermark = %record.watermark,
                    ns = %record.namespace,
                    op = %record.op,
                    "Observed non-mutating record"
                );
                return Ok(ApplyOutcome::Observed);
            }
        };

        let start = Instant::now();
        let result = self.destination.apply(&record.namespace, op).await;
        metrics::record_apply_latency(record.op, start.elapsed());

        match result {
            Ok(()) => {
                trace!(watermark = %record.watermark, ns = %record.namespace, op = %record.op, "Applied");
                Ok(ApplyOutcome::Applied)
            }
            Err(DestinationError::Rejected(message)) => Err(SyncError::ApplyRejected {
                watermark: record.watermark,
                namespace: record.namespace.clone(),
                message,
            }),
            Err(DestinationError::Transport(message)) => Err(SyncError::ApplyTransport {
                watermark: record.watermark,
                namespace: record.namespace.clone(),
                message,
            }),
        }
    }

    fn build_op(&self, record: &ChangeRecord) -> Result<Option<ApplyOp>> {
        let rejected = |message: &str| SyncError::ApplyRejected {
            watermark: record.watermark,
            namespace: record.namespace.clone(),
            message: message.to_string(),
        };

        let op = match record.op {
            OpKind::Insert => {
                let selector = record
                    .selector
                    .clone()
                    .ok_or_else(|| rejected("malformed insert: document has no _id"))?;
                ApplyOp::Insert {
                    selector,
                    document: record.payload.clone(),
                }
            }
            OpKind::Update => {
                let selector = record
                    .selector
                    .clone()
                    .ok_or_else(|| rejected("malformed update: no selector"))?;
                ApplyOp::Update {
                    selector,
                    update: record.payload.clone(),
                }
            }
            OpKind::Delete => {
                let selector = record
                    .selector
                    .clone()
                    .ok_or_else(|| rejected("malformed delete: no selector"))?;
                ApplyOp::Delete { selector }
            }
            OpKind::Command | OpKind::Noop => return Ok(None),
        };
        Ok(Some(op))
    }
}
