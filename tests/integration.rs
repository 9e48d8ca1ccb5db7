// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration Tests for Oplog Sync
//!
//! Sessions run end to end against the in-memory change log and
//! destination in `common`. No external services are needed.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//! - `session_*` - Single sessions: filtering, ordering, error policy
//! - `tail_*` - Live tailing and the stop signal
//! - `resume_*` - Resuming from reports and persisted cursors
//! - `supervisor_*` - Restarts after transient failures

mod common;

use common::*;
use oplog_sync::{
    CursorConfig, CursorStore, DestinationError, RateLimitConfig, Supervisor, SyncConfig,
    SyncError, SyncOrchestrator, SyncState, Termination,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// The three-record log used by most tests:
/// insert `A.users`, update `A.users`, delete in `A.orders`.
///
/// Most tests select `A.users` only, so the delete reaches the session
/// (its database is in scope) and is skipped there.
fn basic_log() -> Vec<oplog_sync::ChangeRecord> {
    vec![
        insert(100, "A.users", json!({"_id": 1, "name": "ada"})),
        update(101, "A.users", json!(1), json!({"name": "grace"})),
        delete(102, "A.orders", json!(7)),
    ]
}

fn basic_source() -> Arc<MockOplog> {
    Arc::new(MockOplog::new(&["A.users", "A.orders", "B.orders"], basic_log()))
}

/// Catch up from just before the first record and stop once idle.
fn catch_up_config(sync_id: &str, patterns: &[&str]) -> SyncConfig {
    SyncConfig {
        start_from: Some("99:0".to_string()),
        stop_on_idle: true,
        ..SyncConfig::for_testing(sync_id, patterns)
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 5s");
}

// =============================================================================
// Single Session Tests
// =============================================================================

#[tokio::test]
async fn session_applies_in_scope_records_and_skips_the_rest() {
    let source = basic_source();
    let dest = Arc::new(MockDestination::new());

    let mut session =
        SyncOrchestrator::new(catch_up_config("scope", &["A.users"]), source, Arc::clone(&dest));
    let report = session.run().await;

    assert_eq!(report.termination, Termination::Success);
    assert!(report.error.is_none());
    assert_eq!(report.last_watermark, Some(w(102)));
    assert_eq!(report.stats.seen, 3);
    assert_eq!(report.stats.applied, 2);
    assert_eq!(report.stats.skipped, 1);

    assert_eq!(dest.calls().len(), 2);
    assert_eq!(
        dest.document("A.users", &json!(1)),
        Some(json!({"_id": 1, "name": "grace"}))
    );
    assert_eq!(dest.count("A.orders"), 0);
    assert_eq!(session.state(), SyncState::Terminated(Termination::Success));
}

#[tokio::test]
async fn session_transport_error_fails_at_last_applied_watermark() {
    let source = basic_source();
    let dest = Arc::new(MockDestination::new());
    dest.fail_call(1, DestinationError::Transport("connection reset".to_string()));

    let mut session =
        SyncOrchestrator::new(catch_up_config("transport", &["A.users"]), source, Arc::clone(&dest));
    let report = session.run().await;

    assert_eq!(report.termination, Termination::Failed);
    assert!(matches!(
        report.error,
        Some(SyncError::ApplyTransport { watermark, .. }) if watermark == w(101)
    ));
    assert!(report.is_retryable());
    assert_eq!(report.last_watermark, Some(w(100)));
    assert_eq!(report.resume_from, Some(w(100)));
    assert_eq!(
        dest.document("A.users", &json!(1)),
        Some(json!({"_id": 1, "name": "ada"}))
    );
    assert_eq!(dest.total(), 1);
}

#[tokio::test]
async fn session_rejection_is_fatal_by_default() {
    let source = basic_source();
    let dest = Arc::new(MockDestination::new());
    dest.fail_call(1, DestinationError::Rejected("validation failed".to_string()));

    let mut session =
        SyncOrchestrator::new(catch_up_config("reject", &["A.users"]), source, Arc::clone(&dest));
    let report = session.run().await;

    assert_eq!(report.termination, Termination::Failed);
    assert!(matches!(report.error, Some(SyncError::ApplyRejected { .. })));
    assert!(!report.is_retryable());
    assert_eq!(report.last_watermark, Some(w(100)));
}

#[tokio::test]
async fn session_ignores_rejections_when_configured() {
    let source = basic_source();
    let dest = Arc::new(MockDestination::new());
    dest.fail_call(1, DestinationError::Rejected("validation failed".to_string()));

    let config = SyncConfig {
        ignore_apply_errors: true,
        ..catch_up_config("ignore", &["A.users"])
    };
    let mut session = SyncOrchestrator::new(config, source, Arc::clone(&dest));
    let report = session.run().await;

    assert_eq!(report.termination, Termination::Success);
    assert_eq!(report.last_watermark, Some(w(102)));
    assert_eq!(report.stats.seen, 3);
    assert_eq!(report.stats.applied, 1);
    assert_eq!(report.stats.skipped, 2);
    // The update never landed
    assert_eq!(
        dest.document("A.users", &json!(1)),
        Some(json!({"_id": 1, "name": "ada"}))
    );
}

#[tokio::test]
async fn session_transport_error_is_fatal_even_when_ignoring_rejections() {
    let source = basic_source();
    let dest = Arc::new(MockDestination::new());
    dest.fail_call(1, DestinationError::Transport("timeout".to_string()));

    let config = SyncConfig {
        ignore_apply_errors: true,
        ..catch_up_config("ignore-transport", &["A.users"])
    };
    let report = SyncOrchestrator::new(config, source, dest).run().await;

    assert_eq!(report.termination, Termination::Failed);
    assert_eq!(report.last_watermark, Some(w(100)));
}

#[tokio::test]
async fn session_empty_inclusion_set_fails_before_reading() {
    let source = basic_source();
    let dest = Arc::new(MockDestination::new());

    let mut session = SyncOrchestrator::new(
        catch_up_config("empty", &["Z.*"]),
        Arc::clone(&source),
        Arc::clone(&dest),
    );
    let report = session.run().await;

    assert_eq!(report.termination, Termination::Failed);
    assert!(matches!(report.error, Some(SyncError::Config(_))));
    assert_eq!(report.last_watermark, None);
    assert_eq!(source.opens(), 0);
    assert!(dest.calls().is_empty());
}

#[tokio::test]
async fn session_reserved_namespaces_never_selected() {
    let source = Arc::new(MockOplog::new(
        &["admin.users", "local.oplog", "A.system.views", "A.users"],
        vec![
            insert(100, "admin.users", json!({"_id": 1})),
            insert(101, "A.system.views", json!({"_id": 2})),
            insert(102, "A.users", json!({"_id": 3})),
        ],
    ));
    let dest = Arc::new(MockDestination::new());

    let report = SyncOrchestrator::new(catch_up_config("reserved", &["*"]), source, Arc::clone(&dest))
        .run()
        .await;

    assert_eq!(report.termination, Termination::Success);
    assert_eq!(report.stats.applied, 1);
    assert_eq!(dest.total(), 1);
    assert!(dest.document("A.users", &json!(3)).is_some());
}

#[tokio::test]
async fn session_reads_only_in_scope_databases() {
    let source = Arc::new(MockOplog::new(
        &["A.users", "A.orders", "B.orders"],
        vec![
            insert(100, "B.orders", json!({"_id": 1})),
            insert(101, "A.users", json!({"_id": 2})),
            insert(102, "B.orders", json!({"_id": 3})),
            insert(103, "A.orders", json!({"_id": 4})),
        ],
    ));
    let dest = Arc::new(MockDestination::new());

    let report = SyncOrchestrator::new(
        catch_up_config("pushdown", &["A.users"]),
        Arc::clone(&source),
        Arc::clone(&dest),
    )
    .run()
    .await;

    assert_eq!(report.termination, Termination::Success);
    // B never left the source; A.orders arrived and was filtered here
    assert_eq!(report.stats.seen, 2);
    assert_eq!(report.stats.applied, 1);
    assert_eq!(report.stats.skipped, 1);
    assert_eq!(report.last_watermark, Some(w(103)));
    assert_eq!(dest.total(), 1);

    let databases = source.queried_databases();
    assert!(!databases.is_empty());
    assert!(databases.iter().all(|set| set == &vec!["A".to_string()]));
}

#[tokio::test]
async fn session_noops_and_commands_advance_without_writes() {
    let source = Arc::new(MockOplog::new(
        &["A.users"],
        vec![
            noop(100),
            insert(101, "A.users", json!({"_id": 1})),
            oplog_sync::ChangeRecord::command(w(102), ns("A.$cmd"), json!({"create": "logs"})),
            noop(103),
        ],
    ));
    let dest = Arc::new(MockDestination::new());

    let report = SyncOrchestrator::new(catch_up_config("noops", &["A.*"]), source, Arc::clone(&dest))
        .run()
        .await;

    assert_eq!(report.termination, Termination::Success);
    assert_eq!(report.last_watermark, Some(w(103)));
    assert_eq!(report.stats.seen, 4);
    assert_eq!(report.stats.applied, 1);
    assert_eq!(report.stats.skipped, 3);
    assert_eq!(dest.calls().len(), 1);
}

#[tokio::test]
async fn session_malformed_insert_rejected_without_destination_call() {
    let source = Arc::new(MockOplog::new(
        &["A.users"],
        vec![
            insert(100, "A.users", json!({"name": "no id"})),
            insert(101, "A.users", json!({"_id": 2})),
        ],
    ));
    let dest = Arc::new(MockDestination::new());

    let config = SyncConfig {
        ignore_apply_errors: true,
        ..catch_up_config("malformed", &["A.users"])
    };
    let report = SyncOrchestrator::new(config, source, Arc::clone(&dest)).run().await;

    assert_eq!(report.termination, Termination::Success);
    assert_eq!(report.last_watermark, Some(w(101)));
    assert_eq!(dest.calls().len(), 1);
}

#[tokio::test]
async fn session_explicit_watermark_restores_strictly_after_it() {
    let source = basic_source();
    let dest = Arc::new(MockDestination::new());

    let config = SyncConfig {
        start_from: Some("100:0".to_string()),
        ..catch_up_config("explicit", &["A.*", "B.*"])
    };
    let report = SyncOrchestrator::new(config, Arc::clone(&source), Arc::clone(&dest))
        .run()
        .await;

    assert_eq!(report.termination, Termination::Success);
    assert_eq!(report.stats.seen, 2);
    // Restore opened after 100, the tail opened after 102
    let queries = source.queries();
    assert_eq!(queries.first(), Some(&w(100)));
    assert_eq!(queries.last(), Some(&w(102)));
}

#[tokio::test]
async fn session_without_start_point_or_log_fails_resolution() {
    let source = Arc::new(MockOplog::new(&["A.users"], vec![]));
    let config = SyncConfig::for_testing("empty-log", &["A.users"]);

    let report = SyncOrchestrator::dry_run(config, source).run().await;

    assert_eq!(report.termination, Termination::Failed);
    assert!(matches!(report.error, Some(SyncError::Resolution(_))));
    assert!(!report.is_retryable());
}

#[tokio::test]
async fn session_bad_start_watermark_is_config_error() {
    let config = SyncConfig {
        start_from: Some("not-a-watermark".to_string()),
        ..SyncConfig::for_testing("bad-start", &["A.users"])
    };
    let report = SyncOrchestrator::dry_run(config, basic_source()).run().await;

    assert_eq!(report.termination, Termination::Failed);
    assert!(matches!(report.error, Some(SyncError::Config(_))));
}

#[tokio::test]
async fn session_runs_only_once() {
    let mut session = SyncOrchestrator::dry_run(catch_up_config("once", &["A.users"]), basic_source());

    let first = session.run().await;
    assert_eq!(first.termination, Termination::Success);
    assert_eq!(first.stats.applied, 2);

    let second = session.run().await;
    assert_eq!(second.termination, Termination::Failed);
    assert!(matches!(second.error, Some(SyncError::InvalidState { .. })));
    assert_eq!(session.state(), SyncState::Terminated(Termination::Success));
}

#[tokio::test]
async fn session_preserves_order_across_cursor_reopens() {
    let source = Arc::new(MockOplog::new(&["A.users"], inserts(100, 20, "A.users")).with_chunk(3));
    let dest = Arc::new(MockDestination::new());

    let config = SyncConfig {
        start_from: Some("99:0".to_string()),
        ..SyncConfig::for_testing("order", &["A.users"])
    };
    let mut session = SyncOrchestrator::new(config, Arc::clone(&source), Arc::clone(&dest));
    let counters = session.counters();
    let stop = session.stop_handle();
    let handle = tokio::spawn(async move { session.run().await });

    wait_until(|| counters.snapshot().applied == 20).await;
    stop.stop();
    let report = handle.await.unwrap();

    assert_eq!(report.termination, Termination::Stopped);
    assert_eq!(report.last_watermark, Some(w(119)));

    let ids: Vec<_> = dest
        .calls()
        .into_iter()
        .map(|(_, op)| match op {
            oplog_sync::ApplyOp::Insert { document, .. } => document["_id"].as_u64().unwrap(),
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(ids, (100..120).collect::<Vec<u64>>());

    let queries = source.queries();
    assert!(queries.len() >= 7);
    assert!(queries.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[tokio::test]
async fn session_rate_limited_applies_complete() {
    let source = Arc::new(MockOplog::new(&["A.users"], inserts(100, 10, "A.users")));
    let dest = Arc::new(MockDestination::new());

    let config = SyncConfig {
        apply_rate_limit: Some(RateLimitConfig {
            burst_size: 5,
            refill_rate: 1000,
        }),
        ..catch_up_config("throttled", &["A.users"])
    };
    let report = SyncOrchestrator::new(config, source, Arc::clone(&dest)).run().await;

    assert_eq!(report.termination, Termination::Success);
    assert_eq!(dest.total(), 10);
}

#[tokio::test]
async fn session_stop_during_restore_never_tails() {
    let source = Arc::new(MockOplog::new(&["A.users"], inserts(100, 20, "A.users")));
    let dest = Arc::new(MockDestination::new());

    let mut session = SyncOrchestrator::new(
        catch_up_config("restore-stop", &["A.users"]),
        Arc::clone(&source),
        Arc::clone(&dest),
    );
    dest.stop_after(5, session.stop_handle());
    let report = session.run().await;

    assert_eq!(report.termination, Termination::Stopped);
    assert!(report.error.is_none());
    // The fifth apply finished and advanced before the stop was seen
    assert_eq!(report.last_watermark, Some(w(104)));
    assert_eq!(report.resume_from, Some(w(104)));
    assert_eq!(report.stats.applied, 5);
    assert_eq!(dest.total(), 5);
    // Only the catch-up cursor was opened
    assert_eq!(source.opens(), 1);
    assert_eq!(source.queries(), vec![w(99)]);
    assert_eq!(session.state(), SyncState::Terminated(Termination::Stopped));
}

// =============================================================================
// Live Tail Tests
// =============================================================================

#[tokio::test]
async fn tail_without_start_point_only_syncs_new_records() {
    let source = basic_source();
    let dest = Arc::new(MockDestination::new());

    let mut session = SyncOrchestrator::new(
        SyncConfig::for_testing("live", &["A.users"]),
        Arc::clone(&source),
        Arc::clone(&dest),
    );
    let mut state = session.state_receiver();
    let counters = session.counters();
    let stop = session.stop_handle();
    let handle = tokio::spawn(async move { session.run().await });

    state.wait_for(|s| *s == SyncState::Tailing).await.unwrap();
    source.push(insert(103, "A.users", json!({"_id": 2})));
    source.push(insert(104, "A.users", json!({"_id": 3})));

    wait_until(|| counters.snapshot().applied == 2).await;
    stop.stop();
    let report = handle.await.unwrap();

    assert_eq!(report.termination, Termination::Stopped);
    assert_eq!(report.last_watermark, Some(w(104)));
    assert_eq!(dest.total(), 2);
    // The pre-existing insert at 100 was never replayed
    assert!(dest.document("A.users", &json!(1)).is_none());
}

#[tokio::test]
async fn tail_stop_before_any_record() {
    let mut session = SyncOrchestrator::dry_run(SyncConfig::for_testing("idle", &["A.users"]), basic_source());
    let mut state = session.state_receiver();
    let stop = session.stop_handle();
    let handle = tokio::spawn(async move { session.run().await });

    state.wait_for(|s| *s == SyncState::Tailing).await.unwrap();
    stop.stop();
    let report = handle.await.unwrap();

    assert_eq!(report.termination, Termination::Stopped);
    assert_eq!(report.last_watermark, None);
    assert_eq!(report.resume_from, Some(w(102)));
}

// =============================================================================
// Resume Tests
// =============================================================================

#[tokio::test]
async fn resume_from_failed_report_reaches_same_state() {
    let source = basic_source();
    let dest = Arc::new(MockDestination::new());
    dest.fail_call(1, DestinationError::Transport("connection reset".to_string()));

    let failed = SyncOrchestrator::new(
        catch_up_config("resume", &["A.users"]),
        Arc::clone(&source),
        Arc::clone(&dest),
    )
    .run()
    .await;
    assert_eq!(failed.termination, Termination::Failed);

    let config = SyncConfig {
        start_from: failed.resume_from.map(|w| w.to_string()),
        ..catch_up_config("resume", &["A.users"])
    };
    let resumed = SyncOrchestrator::new(config, source, Arc::clone(&dest)).run().await;

    assert_eq!(resumed.termination, Termination::Success);
    assert_eq!(resumed.last_watermark, Some(w(102)));
    assert_eq!(
        dest.document("A.users", &json!(1)),
        Some(json!({"_id": 1, "name": "grace"}))
    );
}

#[tokio::test]
async fn resume_from_persisted_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cursors.db");
    let cursor = CursorConfig::at(path.to_string_lossy().to_string());

    let source = basic_source();
    let dest = Arc::new(MockDestination::new());

    let first = SyncConfig {
        cursor: Some(cursor.clone()),
        ..catch_up_config("persisted", &["A.users"])
    };
    let report = SyncOrchestrator::new(first, Arc::clone(&source), Arc::clone(&dest))
        .run()
        .await;
    assert_eq!(report.last_watermark, Some(w(102)));

    source.push(insert(103, "A.users", json!({"_id": 9})));

    // No start_from: the persisted cursor decides
    let second = SyncConfig {
        start_from: None,
        cursor: Some(cursor),
        ..catch_up_config("persisted", &["A.users"])
    };
    let report = SyncOrchestrator::new(second, Arc::clone(&source), Arc::clone(&dest))
        .run()
        .await;

    assert_eq!(report.termination, Termination::Success);
    assert_eq!(report.stats.seen, 1);
    assert_eq!(report.stats.applied, 1);
    assert_eq!(dest.calls().len(), 3);

    let store = CursorStore::new(&path).await.unwrap();
    assert_eq!(store.get("persisted").await, Some(w(103)));
    store.close().await;
}

#[tokio::test]
async fn resume_shared_cursor_store_left_open() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CursorStore::new(dir.path().join("shared.db")).await.unwrap());

    let report = SyncOrchestrator::dry_run(catch_up_config("shared", &["A.users"]), basic_source())
        .with_cursor_store(Arc::clone(&store))
        .run()
        .await;

    assert_eq!(report.termination, Termination::Success);
    assert_eq!(store.get("shared").await, Some(w(102)));
    assert!(!store.has_dirty().await);
    store.close().await;
}

// =============================================================================
// Supervisor Tests
// =============================================================================

#[tokio::test]
async fn supervisor_restarts_after_read_failure() {
    let source = basic_source();
    source.fail_next_opens(1);
    let dest = Arc::new(MockDestination::new());

    let mut supervisor = Supervisor::new(
        catch_up_config("sup-read", &["A.users"]),
        Arc::clone(&source),
        Arc::clone(&dest),
    );
    let report = supervisor.run().await;

    assert_eq!(report.termination, Termination::Success);
    assert_eq!(supervisor.restarts(), 1);
    assert_eq!(report.last_watermark, Some(w(102)));
    assert_eq!(report.stats.applied, 2);
    // Second session restarted from the original starting point
    assert_eq!(source.queries()[1], w(99));
}

#[tokio::test]
async fn supervisor_restarts_after_transport_failure() {
    let source = basic_source();
    let dest = Arc::new(MockDestination::new());
    dest.fail_call(1, DestinationError::Transport("broken pipe".to_string()));

    let mut supervisor = Supervisor::new(
        catch_up_config("sup-transport", &["A.users"]),
        Arc::clone(&source),
        Arc::clone(&dest),
    );
    let report = supervisor.run().await;

    assert_eq!(report.termination, Termination::Success);
    assert_eq!(supervisor.restarts(), 1);
    assert_eq!(report.stats.applied, 2);
    // insert, failed update, retried update
    assert_eq!(dest.calls().len(), 3);
    assert_eq!(
        dest.document("A.users", &json!(1)),
        Some(json!({"_id": 1, "name": "grace"}))
    );
}

#[tokio::test]
async fn supervisor_replays_insert_whose_reply_was_lost() {
    let source = basic_source();
    let dest = Arc::new(MockDestination::new());
    // The insert at 100 lands, but the session only sees a broken connection
    dest.lose_reply(0, DestinationError::Transport("connection reset".to_string()));

    let mut supervisor = Supervisor::new(
        catch_up_config("sup-replay", &["A.users"]),
        Arc::clone(&source),
        Arc::clone(&dest),
    )
    .with_retry(oplog_sync::RetryConfig::testing());
    let report = supervisor.run().await;

    assert_eq!(report.termination, Termination::Success, "error: {:?}", report.error);
    assert_eq!(supervisor.restarts(), 1);
    assert_eq!(report.last_watermark, Some(w(102)));
    // insert, replayed insert, update
    assert_eq!(dest.calls().len(), 3);
    assert_eq!(dest.count("A.users"), 1);
    assert_eq!(
        dest.document("A.users", &json!(1)),
        Some(json!({"_id": 1, "name": "grace"}))
    );
}

#[tokio::test]
async fn supervisor_does_not_restart_permanent_failures() {
    let dest = Arc::new(MockDestination::new());
    dest.fail_call(0, DestinationError::Rejected("duplicate key".to_string()));

    let mut supervisor = Supervisor::new(catch_up_config("sup-reject", &["A.users"]), basic_source(), dest);
    let report = supervisor.run().await;

    assert_eq!(report.termination, Termination::Failed);
    assert!(matches!(report.error, Some(SyncError::ApplyRejected { .. })));
    assert_eq!(supervisor.restarts(), 0);
}

#[tokio::test]
async fn supervisor_rejects_shrinking_backoff() {
    let source = basic_source();
    let mut config = catch_up_config("sup-backoff", &["A.users"]);
    config.retry.backoff_factor = -2.0;

    let mut supervisor = Supervisor::new(config, Arc::clone(&source), Arc::new(MockDestination::new()));
    let report = supervisor.run().await;

    assert_eq!(report.termination, Termination::Failed);
    assert!(matches!(report.error, Some(SyncError::Config(_))));
    assert_eq!(supervisor.restarts(), 0);
    assert_eq!(source.opens(), 0);
}

#[tokio::test]
async fn supervisor_gives_up_after_max_attempts() {
    let source = basic_source();
    source.fail_next_opens(100);

    let mut supervisor = Supervisor::new(
        catch_up_config("sup-exhausted", &["A.users"]),
        Arc::clone(&source),
        Arc::new(MockDestination::new()),
    )
    .with_retry(oplog_sync::RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_factor: 2.0,
    });
    let report = supervisor.run().await;

    assert_eq!(report.termination, Termination::Failed);
    assert!(matches!(report.error, Some(SyncError::Read { .. })));
    assert_eq!(supervisor.restarts(), 2);
    assert_eq!(source.opens(), 3);
}
