// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change-log records.
//!
//! A [`ChangeRecord`] is the typed form of one oplog entry. Sources that
//! hand out raw JSON documents convert them with
//! [`ChangeRecord::from_oplog_json`]:
//!
//! ```text
//! {
//!   "ts": {"$timestamp": {"t": 1700000000, "i": 3}},   // or {"t","i"} or packed u64
//!   "op": "u",                                         // i | u | d | c | n
//!   "ns": "app.users",
//!   "o":  {"$set": {"name": "ada"}},                   // payload
//!   "o2": {"_id": 1}                                   // update selector
//! }
//! ```

use crate::error::{Result, SyncError};
use crate::namespace::Namespace;
use crate::watermark::Watermark;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Operation kind of a change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Insert,
    Update,
    Delete,
    /// Schema or administrative command. Observed, never replayed.
    Command,
    /// Heartbeat written by the store to keep the log moving.
    Noop,
}

impl OpKind {
    /// Parse a single-letter oplog op code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "i" => Some(Self::Insert),
            "u" => Some(Self::Update),
            "d" => Some(Self::Delete),
            "c" => Some(Self::Command),
            "n" => Some(Self::Noop),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Insert => "i",
            Self::Update => "u",
            Self::Delete => "d",
            Self::Command => "c",
            Self::Noop => "n",
        }
    }

    /// Whether this kind mutates documents on the destination.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Command => write!(f, "command"),
            Self::Noop => write!(f, "noop"),
        }
    }
}

/// One entry of the change log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub watermark: Watermark,
    pub op: OpKind,
    pub namespace: Namespace,
    /// Identity of the target document.
    ///
    /// For inserts this is `{"_id": ...}` taken from the payload; for updates
    /// the `o2` query; for deletes the `o` query. `None` when the source
    /// entry carried nothing usable.
    pub selector: Option<Value>,
    /// Document (insert), update modifier (update), or command body.
    pub payload: Value,
}

impl ChangeRecord {
    pub fn insert(watermark: Watermark, namespace: Namespace, document: Value) -> Self {
        let selector = id_selector(&document);
        Self {
            watermark,
            op: OpKind::Insert,
            namespace,
            selector,
            payload: document,
        }
    }

    pub fn update(
        watermark: Watermark,
        namespace: Namespace,
        selector: Value,
        update: Value,
    ) -> Self {
        Self {
            watermark,
            op: OpKind::Update,
            namespace,
            selector: Some(selector),
            payload: update,
        }
    }

    pub fn delete(watermark: Watermark, namespace: Namespace, selector: Value) -> Self {
        Self {
            watermark,
            op: OpKind::Delete,
            namespace,
            selector: Some(selector.clone()),
            payload: selector,
        }
    }

    pub fn command(watermark: Watermark, namespace: Namespace, body: Value) -> Self {
        Self {
            watermark,
            op: OpKind::Command,
            namespace,
            selector: None,
            payload: body,
        }
    }

    pub fn noop(watermark: Watermark) -> Self {
        Self {
            watermark,
            op: OpKind::Noop,
            namespace: Namespace::default(),
            selector: None,
            payload: json!({}),
        }
    }

    /// Convert a raw oplog document.
    ///
    /// Only `ts` and `op` are required on every entry. `ns` is required for
    /// everything but no-ops; `o` for mutations and commands.
    pub fn from_oplog_json(raw: &Value) -> Result<Self> {
        let doc = raw
            .as_object()
            .ok_or_else(|| SyncError::RecordParse("oplog entry is not an object".to_string()))?;

        let watermark = parse_ts(doc)?;

        let code = doc
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::RecordParse(format!("missing 'op' at {}", watermark)))?;
        let op = OpKind::from_code(code).ok_or_else(|| {
            SyncError::RecordParse(format!("unknown op code '{}' at {}", code, watermark))
        })?;

        if op == OpKind::Noop {
            let mut record = Self::noop(watermark);
            if let Some(ns) = doc.get("ns").and_then(Value::as_str).and_then(Namespace::parse) {
                record.namespace = ns;
            }
            if let Some(o) = doc.get("o") {
                record.payload = o.clone();
            }
            return Ok(record);
        }

        let namespace = doc
            .get("ns")
            .and_then(Value::as_str)
            .and_then(Namespace::parse)
            .ok_or_else(|| {
                SyncError::RecordParse(format!("missing or invalid 'ns' at {}", watermark))
            })?;

        let payload = doc
            .get("o")
            .cloned()
            .ok_or_else(|| SyncError::RecordParse(format!("missing 'o' at {}", watermark)))?;

        let record = match op {
            OpKind::Insert => Self::insert(watermark, namespace, payload),
            OpKind::Update => Self {
                watermark,
                op,
                namespace,
                selector: doc.get("o2").cloned(),
                payload,
            },
            OpKind::Delete => Self::delete(watermark, namespace, payload),
            OpKind::Command => Self::command(watermark, namespace, payload),
            OpKind::Noop => Self::noop(watermark),
        };
        Ok(record)
    }
}

fn id_selector(document: &Value) -> Option<Value> {
    document.get("_id").map(|id| json!({ "_id": id }))
}

fn parse_ts(doc: &Map<String, Value>) -> Result<Watermark> {
    let ts = doc
        .get("ts")
        .ok_or_else(|| SyncError::RecordParse("missing 'ts'".to_string()))?;

    if let Some(packed) = ts.as_u64() {
        return Ok(Watermark::from_u64(packed));
    }

    let parts = ts.get("$timestamp").unwrap_or(ts);
    let time = parts.get("t").and_then(Value::as_u64);
    let ordinal = parts.get("i").and_then(Value::as_u64);
    match (time, ordinal) {
        (Some(t), Some(i)) => {
            let time = u32::try_from(t)
                .map_err(|_| SyncError::RecordParse(format!("'ts.t' out of range: {}", t)))?;
            let ordinal = u32::try_from(i)
                .map_err(|_| SyncError::RecordParse(format!("'ts.i' out of range: {}", i)))?;
            Ok(Watermark::new(time, ordinal))
        }
        _ => Err(SyncError::RecordParse(format!("unrecognized 'ts': {}", ts))),
    }
}
