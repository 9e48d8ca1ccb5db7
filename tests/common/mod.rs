//! Shared test utilities for integration tests.
//!
//! This module provides:
//! - In-memory change log and destination mocks
//! - Change record helpers

#![allow(dead_code)]

pub mod mock_store;

pub use mock_store::*;

use oplog_sync::{ChangeRecord, Namespace, Watermark};
use serde_json::{json, Value};

pub fn ns(s: &str) -> Namespace {
    Namespace::parse(s).unwrap()
}

pub fn w(time: u32) -> Watermark {
    Watermark::new(time, 0)
}

pub fn insert(time: u32, namespace: &str, doc: Value) -> ChangeRecord {
    ChangeRecord::insert(w(time), ns(namespace), doc)
}

pub fn update(time: u32, namespace: &str, id: Value, set: Value) -> ChangeRecord {
    ChangeRecord::update(w(time), ns(namespace), json!({ "_id": id }), json!({ "$set": set }))
}

pub fn delete(time: u32, namespace: &str, id: Value) -> ChangeRecord {
    ChangeRecord::delete(w(time), ns(namespace), json!({ "_id": id }))
}

pub fn noop(time: u32) -> ChangeRecord {
    ChangeRecord::noop(w(time))
}

/// `count` inserts into `namespace` at watermarks `first..first + count`.
pub fn inserts(first: u32, count: u32, namespace: &str) -> Vec<ChangeRecord> {
    (0..count)
        .map(|i| insert(first + i, namespace, json!({ "_id": first + i, "n": i })))
        .collect()
}
