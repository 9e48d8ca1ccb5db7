// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the oplog sync engine.
//!
//! Errors are categorized by the phase that produced them so the
//! orchestrator can apply its error policy and the supervisor can decide
//! whether a fresh session is worth starting.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Config` | No | Bad configuration, e.g. empty namespace inclusion set |
//! | `Resolution` | No | Cannot determine the change-log tail head |
//! | `Read` | Yes | Change-log read failed (not a timeout) |
//! | `RecordParse` | No | Malformed raw oplog entry |
//! | `ApplyRejected` | No | Destination refused the mutation |
//! | `ApplyTransport` | Yes | Destination connection failed mid-request |
//! | `CursorStore` | No | Local SQLite errors (needs operator attention) |
//! | `InvalidState` | No | Session lifecycle misuse |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! Nothing inside a session retries. [`SyncError::is_retryable()`] tells a
//! caller (see [`crate::coordinator::Supervisor`]) whether restarting a new
//! session from the last reported watermark may succeed.

use crate::namespace::Namespace;
use crate::watermark::Watermark;
use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while synchronizing.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Invalid configuration.
    ///
    /// Raised while resolving a session, before anything is read.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The starting position could not be determined.
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// The change-log read failed.
    ///
    /// A cursor timeout is not an error; this is a genuine read failure.
    /// `position` is the last watermark the reader consumed.
    #[error("Read error after {position}: {message}")]
    Read { position: Watermark, message: String },

    /// A raw oplog entry could not be converted into a change record.
    #[error("Record parse error: {0}")]
    RecordParse(String),

    /// The destination did not accept the mutation.
    ///
    /// Skipped and logged when `ignore_apply_errors` is set, fatal otherwise.
    #[error("Apply rejected at {watermark} on {namespace}: {message}")]
    ApplyRejected {
        watermark: Watermark,
        namespace: Namespace,
        message: String,
    },

    /// The destination connection failed mid-request.
    ///
    /// Always fatal to the session: there is no partial-application
    /// guarantee once the connection itself is unreliable.
    #[error("Apply transport error at {watermark} on {namespace}: {message}")]
    ApplyTransport {
        watermark: Watermark,
        namespace: Namespace,
        message: String,
    },

    /// SQLite error during cursor persistence.
    #[error("Cursor store error: {0}")]
    CursorStore(#[from] sqlx::Error),

    /// Session state machine violation.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Create a read error at the given reader position.
    pub fn read(position: Watermark, message: impl Into<String>) -> Self {
        Self::Read {
            position,
            message: message.into(),
        }
    }

    /// Check whether a new session started from the last reported
    /// watermark might succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Read { .. } => true,
            Self::ApplyTransport { .. } => true,
            Self::Config(_) => false,
            Self::Resolution(_) => false,
            Self::RecordParse(_) => false,
            Self::ApplyRejected { .. } => false, // Same record, same answer
            Self::CursorStore(_) => false,
            Self::InvalidState { .. } => false,
            Self::Internal(_) => false,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Resolution(_) => "resolution",
            Self::Read { .. } => "read",
            Self::RecordParse(_) => "record_parse",
            Self::ApplyRejected { .. } => "apply_rejected",
            Self::ApplyTransport { .. } => "apply_transport",
            Self::CursorStore(_) => "cursor_store",
            Self::InvalidState { .. } => "invalid_state",
            Self::Internal(_) => "internal",
        }
    }
}
