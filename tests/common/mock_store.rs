//! In-memory source and destination for session tests.
//!
//! `MockOplog` serves a growable change log through cursors that yield a
//! bounded chunk of records, then idle for `max_await`. Like a real oplog
//! query it only returns records in the requested databases (plus no-ops).
//! Cursor opens can be made to fail.
//!
//! `MockDestination` keeps documents by `_id` per namespace, upserts on
//! insert, records every call, and can fail specific calls with a rejection
//! or transport error.

use oplog_sync::applier::{ApplyOp, BoxFuture as DestFuture, Destination, DestinationError};
use oplog_sync::source::{BoxFuture, CursorEvent, CursorQuery, OplogCursor, OplogSource, SourceError};
use oplog_sync::{ChangeRecord, Namespace, OpKind, StopHandle, Watermark};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// =============================================================================
// Source
// =============================================================================

/// Change log held in memory.
pub struct MockOplog {
    log: Arc<Mutex<Vec<ChangeRecord>>>,
    namespaces: Vec<Namespace>,
    /// Max records per cursor before it reports idle
    chunk: usize,
    /// Number of upcoming `open_cursor` calls that fail
    failing_opens: AtomicUsize,
    /// Total `open_cursor` calls
    opens: AtomicUsize,
    /// Every cursor query received
    queries: Mutex<Vec<CursorQuery>>,
}

impl MockOplog {
    pub fn new(namespaces: &[&str], log: Vec<ChangeRecord>) -> Self {
        Self {
            log: Arc::new(Mutex::new(log)),
            namespaces: namespaces
                .iter()
                .filter_map(|s| Namespace::parse(s))
                .collect(),
            chunk: usize::MAX,
            failing_opens: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Limit how many records one cursor returns.
    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    /// Append a record to the live log.
    pub fn push(&self, record: ChangeRecord) {
        self.log.lock().unwrap().push(record);
    }

    /// Make the next `n` cursor opens fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.failing_opens.store(n, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// `after` watermarks of the cursors opened so far.
    pub fn queries(&self) -> Vec<Watermark> {
        self.queries.lock().unwrap().iter().map(|q| q.after).collect()
    }

    /// Database sets of the cursors opened so far.
    pub fn queried_databases(&self) -> Vec<Vec<String>> {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .map(|q| q.databases.clone())
            .collect()
    }
}

impl OplogSource for MockOplog {
    fn namespaces(&self) -> BoxFuture<'_, Vec<Namespace>> {
        let namespaces = self.namespaces.clone();
        Box::pin(async move { Ok(namespaces) })
    }

    fn tail_head(&self) -> BoxFuture<'_, Option<Watermark>> {
        let head = self.log.lock().unwrap().iter().map(|r| r.watermark).max();
        Box::pin(async move { Ok(head) })
    }

    fn open_cursor(&self, query: CursorQuery) -> BoxFuture<'_, Box<dyn OplogCursor>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.clone());

        let failing = self
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Box::pin(async { Err(SourceError("connection reset".to_string())) });
        }

        let pending: VecDeque<ChangeRecord> = self
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.watermark > query.after)
            .filter(|r| r.op == OpKind::Noop || query.databases.contains(&r.namespace.database))
            .take(self.chunk)
            .cloned()
            .collect();

        let cursor = MockCursor {
            pending,
            max_await: query.max_await,
        };
        Box::pin(async move { Ok(Box::new(cursor) as Box<dyn OplogCursor>) })
    }
}

struct MockCursor {
    pending: VecDeque<ChangeRecord>,
    max_await: std::time::Duration,
}

impl OplogCursor for MockCursor {
    fn next(&mut self) -> BoxFuture<'_, CursorEvent> {
        let next = self.pending.pop_front();
        let max_await = self.max_await;
        Box::pin(async move {
            match next {
                Some(record) => Ok(CursorEvent::Record(record)),
                None => {
                    tokio::time::sleep(max_await).await;
                    Ok(CursorEvent::Exhausted)
                }
            }
        })
    }
}

// =============================================================================
// Destination
// =============================================================================

/// Document store keyed by namespace and `_id`.
#[derive(Default)]
pub struct MockDestination {
    docs: Mutex<HashMap<Namespace, BTreeMap<String, Value>>>,
    calls: Mutex<Vec<(Namespace, ApplyOp)>>,
    /// Call index (0-based) -> injected failure
    failures: Mutex<HashMap<usize, DestinationError>>,
    /// Call index (0-based) -> failure reported after the write took effect
    lost_replies: Mutex<HashMap<usize, DestinationError>>,
    /// Raise this stop once the given number of calls has been made
    stop_after: Mutex<Option<(usize, StopHandle)>>,
}

impl MockDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `call`-th apply (0-based) with `error`.
    pub fn fail_call(&self, call: usize, error: DestinationError) {
        self.failures.lock().unwrap().insert(call, error);
    }

    /// Perform the `call`-th apply, then report `error` anyway.
    pub fn lose_reply(&self, call: usize, error: DestinationError) {
        self.lost_replies.lock().unwrap().insert(call, error);
    }

    /// Request a stop through `handle` once `calls` applies have been made.
    pub fn stop_after(&self, calls: usize, handle: StopHandle) {
        *self.stop_after.lock().unwrap() = Some((calls, handle));
    }

    /// Every request received, including failed ones.
    pub fn calls(&self) -> Vec<(Namespace, ApplyOp)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn document(&self, ns: &str, id: &Value) -> Option<Value> {
        let ns = Namespace::parse(ns)?;
        self.docs.lock().unwrap().get(&ns)?.get(&id.to_string()).cloned()
    }

    pub fn count(&self, ns: &str) -> usize {
        let Some(ns) = Namespace::parse(ns) else {
            return 0;
        };
        self.docs.lock().unwrap().get(&ns).map_or(0, BTreeMap::len)
    }

    pub fn total(&self) -> usize {
        self.docs.lock().unwrap().values().map(BTreeMap::len).sum()
    }

    fn execute(&self, ns: &Namespace, op: &ApplyOp) -> Result<(), DestinationError> {
        let mut docs = self.docs.lock().unwrap();
        let collection = docs.entry(ns.clone()).or_default();
        match op {
            ApplyOp::Insert { selector, document } => {
                let id = id_key(selector)?;
                collection.insert(id, document.clone());
            }
            ApplyOp::Update { selector, update } => {
                let id = id_key(selector)?;
                if let Some(doc) = collection.get_mut(&id) {
                    apply_update(doc, update);
                }
            }
            ApplyOp::Delete { selector } => {
                let id = id_key(selector)?;
                collection.remove(&id);
            }
        }
        Ok(())
    }
}

fn id_key(value: &Value) -> Result<String, DestinationError> {
    value
        .get("_id")
        .map(Value::to_string)
        .ok_or_else(|| DestinationError::Rejected("no _id".to_string()))
}

/// `$set` / `$unset` modifiers, otherwise full replacement keeping `_id`.
fn apply_update(doc: &mut Value, update: &Value) {
    let Some(target) = doc.as_object_mut() else {
        return;
    };
    let set = update.get("$set").and_then(Value::as_object);
    let unset = update.get("$unset").and_then(Value::as_object);

    if set.is_none() && unset.is_none() {
        let id = target.get("_id").cloned();
        target.clear();
        if let Some(fields) = update.as_object() {
            target.extend(fields.clone());
        }
        if let Some(id) = id {
            target.insert("_id".to_string(), id);
        }
        return;
    }

    if let Some(set) = set {
        for (k, v) in set {
            target.insert(k.clone(), v.clone());
        }
    }
    if let Some(unset) = unset {
        for k in unset.keys() {
            target.remove(k);
        }
    }
}

impl Destination for MockDestination {
    fn apply(&self, namespace: &Namespace, op: ApplyOp) -> DestFuture<'_, ()> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((namespace.clone(), op.clone()));
            calls.len() - 1
        };
        if let Some((after, handle)) = &*self.stop_after.lock().unwrap() {
            if call + 1 >= *after {
                handle.stop();
            }
        }

        let result = match self.failures.lock().unwrap().remove(&call) {
            Some(error) => Err(error),
            None => self.execute(namespace, &op).and_then(|()| {
                match self.lost_replies.lock().unwrap().remove(&call) {
                    Some(error) => Err(error),
                    None => Ok(()),
                }
            }),
        };
        Box::pin(async move { result })
    }
}
