//! Integration tests for the admission-controlled worker
//!
//! These tests verify:
//! - Admission order, parallel limit and start spacing
//! - Session failure, expiry and stale terminal events
//! - Bounded, unconditional stop
//! - Drop routing and credential-list accounts

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::Ordering;
use std::time::Duration;
use uuid::Uuid;

use common::*;
use dropler::account::{AccountState, ACTION_NONE};
use dropler::session::{DisconnectBehavior, DryRunSessions, SessionOutcome, SessionResult};
use dropler::storage::{AccountStore, MemoryStore};
use std::sync::Arc;

// ============================================================================
// Admission
// ============================================================================

#[tokio::test]
async fn test_start_admits_oldest_account_immediately() {
    let now = Utc::now();
    let h = Harness::new(
        vec![
            ready_account("recent").with_last_start_time(now - ChronoDuration::hours(2)),
            ready_account("fresh"),
            ready_account("oldest").with_last_start_time(now - ChronoDuration::hours(5)),
        ],
        DryRunSessions::new(),
        test_settings(10),
    )
    .await;

    h.worker.start().await.unwrap();

    let fresh = h.worker.account("fresh").await.unwrap();
    assert!(fresh.is_running);
    assert!(fresh.current_session_id.is_some());
    assert_eq!(h.worker.in_flight().await, 1);

    assert!(wait_until_active(&h.worker, 1).await);
    assert!(h.stats.get("fresh").await.unwrap().is_active);

    h.worker.stop().await;
}

#[tokio::test]
async fn test_parallel_limit_blocks_admission() {
    let h = Harness::new(
        vec![ready_account("a"), ready_account("b")],
        DryRunSessions::new(),
        test_settings(1),
    )
    .await;

    h.worker.start().await.unwrap();
    assert!(wait_until_active(&h.worker, 1).await);

    assert_eq!(h.worker.admission_tick().await, None);
    assert_eq!(h.worker.in_flight().await, 1);
    assert!(!h.worker.account("b").await.unwrap().is_running);

    h.worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_start_spacing_enforced() {
    let h = Harness::new(
        vec![ready_account("a"), ready_account("b")],
        DryRunSessions::new(),
        test_settings(5),
    )
    .await;

    h.worker.start().await.unwrap();
    assert!(wait_until_active(&h.worker, 1).await);

    // spacing has not elapsed yet
    assert_eq!(h.worker.admission_tick().await, None);
    assert_eq!(h.worker.in_flight().await, 1);

    // the admission timer fires once the spacing has passed
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(wait_until_in_flight(&h.worker, 2).await);
    assert!(h.worker.account("b").await.unwrap().is_running);

    h.worker.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_second_start_follows_after_one_spacing_on_multi_thread_runtime() {
    let h = Harness::new(
        vec![ready_account("a"), ready_account("b")],
        DryRunSessions::new(),
        test_settings(5),
    )
    .await;

    let started = std::time::Instant::now();
    h.worker.start().await.unwrap();
    assert_eq!(h.worker.in_flight().await, 1);

    let mut admitted_after = None;
    for _ in 0..300 {
        if h.worker.in_flight().await == 2 {
            admitted_after = Some(started.elapsed());
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let elapsed = admitted_after.expect("second account never admitted");
    assert!(elapsed >= Duration::from_secs(9), "admitted too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(15), "admission tick skipped: {elapsed:?}");

    h.worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_parallel_limit_frees_slot_when_session_ends() {
    let h = Harness::new(
        vec![ready_account("a"), ready_account("b")],
        DryRunSessions::new(),
        test_settings(1),
    )
    .await;

    h.worker.start().await.unwrap();
    assert!(wait_until_active(&h.worker, 1).await);

    // spacing elapses but the only slot is taken
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(!h.worker.account("b").await.unwrap().is_running);
    assert_eq!(h.worker.in_flight().await, 1);

    let session_id = h
        .worker
        .account("a")
        .await
        .unwrap()
        .current_session_id
        .unwrap();
    assert!(
        h.worker
            .on_session_terminal("a", session_id, SessionOutcome::Expired)
            .await
    );
    assert_eq!(h.worker.in_flight().await, 0);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(wait_until_account(&h.worker, "b", |b| b.is_running).await);
    assert_eq!(
        h.worker.account("a").await.unwrap().state(Utc::now(), ChronoDuration::minutes(90)),
        AccountState::CoolingDown
    );

    h.worker.stop().await;
}

#[tokio::test]
async fn test_out_of_range_pause_corrected_on_start() {
    let mut settings = test_settings(10);
    settings.pause_between_runs_minutes = u64::MAX / 2;
    let h = Harness::new(vec![ready_account("a")], DryRunSessions::new(), settings).await;

    h.worker.start().await.unwrap();
    assert!(wait_until_active(&h.worker, 1).await);
    assert_eq!(
        h.worker.settings().await.pause_between_runs_minutes,
        dropler::config::MAX_MINUTES
    );

    h.worker.stop().await;
}

#[tokio::test]
async fn test_accounts_without_auth_or_disabled_never_admitted() {
    let h = Harness::new(
        vec![
            dropler::AccountRecord::new("nosecret"),
            ready_account("off").with_enabled(false),
        ],
        DryRunSessions::new(),
        test_settings(10),
    )
    .await;

    h.worker.start().await.unwrap();
    assert_eq!(h.worker.admission_tick().await, None);
    assert_eq!(h.worker.in_flight().await, 0);
    assert_eq!(h.counters.connects.load(Ordering::SeqCst), 0);

    h.worker.stop().await;
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let h = Harness::new(
        vec![ready_account("a"), ready_account("b")],
        DryRunSessions::new(),
        test_settings(10),
    )
    .await;

    h.worker.start().await.unwrap();
    h.worker.start().await.unwrap();

    assert!(h.worker.is_running());
    assert!(wait_until_active(&h.worker, 1).await);
    assert_eq!(h.counters.connects.load(Ordering::SeqCst), 1);

    h.worker.stop().await;
}

// ============================================================================
// Session Outcomes
// ============================================================================

#[tokio::test]
async fn test_failed_connect_returns_account_to_pool() {
    let sessions = DryRunSessions::new().with_result("a", SessionResult::InvalidCredentials);
    let h = Harness::new(vec![ready_account("a")], sessions, test_settings(10)).await;

    h.worker.start().await.unwrap();
    assert!(wait_until_account(&h.worker, "a", |a| !a.is_running).await);

    let account = h.worker.account("a").await.unwrap();
    assert_eq!(account.action, ACTION_NONE);
    assert!(account.last_start_time.is_none());
    assert!(account.current_session_id.is_none());
    assert_eq!(h.worker.in_flight().await, 0);
    assert_eq!(h.worker.active_count().await, 0);

    let states: Vec<_> = h.worker.account_states().await;
    assert_eq!(states, vec![("a".to_string(), AccountState::Ready)]);

    h.worker.stop().await;
}

#[tokio::test]
async fn test_expired_session_starts_cooldown() {
    let h = Harness::new(vec![ready_account("a")], DryRunSessions::new(), test_settings(10)).await;

    h.worker.start().await.unwrap();
    assert!(wait_until_active(&h.worker, 1).await);

    let session_id = h
        .worker
        .account("a")
        .await
        .unwrap()
        .current_session_id
        .unwrap();
    assert!(
        h.worker
            .on_session_terminal("A", session_id, SessionOutcome::Expired)
            .await
    );

    let account = h.worker.account("a").await.unwrap();
    assert!(!account.idle_now);
    assert!(!account.is_running);
    assert!(account.last_start_time.is_some());
    assert_eq!(h.worker.active_count().await, 0);
    assert!(!h.stats.get("a").await.unwrap().is_active);

    let remaining = h.worker.next_start_in().await.unwrap();
    assert!(remaining > ChronoDuration::minutes(89));

    let persisted = h.store.account(TASK, "a").await.unwrap();
    assert!(persisted.last_start_time.is_some());
    assert!(!persisted.idle_now);

    h.worker.stop().await;
}

#[tokio::test]
async fn test_stale_terminal_event_ignored() {
    let h = Harness::new(vec![ready_account("a")], DryRunSessions::new(), test_settings(10)).await;

    h.worker.start().await.unwrap();
    assert!(wait_until_active(&h.worker, 1).await);

    assert!(
        !h.worker
            .on_session_terminal("a", Uuid::new_v4(), SessionOutcome::Expired)
            .await
    );
    assert_eq!(h.worker.active_count().await, 1);
    assert!(h.worker.account("a").await.unwrap().idle_now);

    h.worker.stop().await;
}

#[tokio::test]
async fn test_persistence_failure_does_not_block_sessions() {
    let store = Arc::new(MemoryStore::new());
    store.insert_account(TASK, ready_account("a")).await;
    store.set_fail_saves(true);

    let h = Harness::with_store(store, DryRunSessions::new(), test_settings(10));
    h.worker.start().await.unwrap();
    assert!(wait_until_active(&h.worker, 1).await);

    h.worker.stop().await;
}

// ============================================================================
// Stop
// ============================================================================

#[tokio::test]
async fn test_stop_resets_everything_and_is_idempotent() {
    let h = Harness::new(
        vec![ready_account("a"), ready_account("b")],
        DryRunSessions::new(),
        test_settings(10),
    )
    .await;

    h.worker.start().await.unwrap();
    assert!(wait_until_active(&h.worker, 1).await);

    let report = h.worker.stop().await;
    assert_eq!(report.accounts_reset, 1);
    assert_eq!(report.disconnect_failures, 0);
    assert!(!report.timed_out);

    assert!(!h.worker.is_running());
    assert_eq!(h.worker.in_flight().await, 0);
    assert_eq!(h.worker.active_count().await, 0);
    for account in h.worker.snapshot().await {
        assert!(!account.idle_now);
        assert!(!account.is_running);
        assert!(account.current_session_id.is_none());
    }
    assert!(h.worker.queue_snapshot().await.is_empty());

    // the active account entered its cool-down
    assert!(h.worker.account("a").await.unwrap().last_start_time.is_some());
    assert!(!h.stats.get("a").await.unwrap().is_active);

    assert_eq!(h.worker.stop().await, Default::default());
}

#[tokio::test(start_paused = true)]
async fn test_stop_bounded_when_disconnect_hangs() {
    let sessions = DryRunSessions::new().with_disconnect("a", DisconnectBehavior::Hang);
    let h = Harness::new(vec![ready_account("a")], sessions, test_settings(10)).await;

    h.worker.start().await.unwrap();
    assert!(wait_until_active(&h.worker, 1).await);

    let started = tokio::time::Instant::now();
    let report = h.worker.stop().await;

    assert!(report.timed_out);
    assert!(started.elapsed() < Duration::from_secs(2));
    let account = h.worker.account("a").await.unwrap();
    assert!(!account.is_running);
    assert!(!account.idle_now);
    assert_eq!(h.worker.active_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_hung_disconnects_released_after_stop() {
    let sessions = DryRunSessions::new().with_disconnect("a", DisconnectBehavior::Hang);
    let h = Harness::new(vec![ready_account("a")], sessions, test_settings(10)).await;

    h.worker.start().await.unwrap();
    assert!(wait_until_active(&h.worker, 1).await);

    let report = h.worker.stop().await;
    assert!(report.timed_out);

    let mut released = false;
    for _ in 0..200 {
        if h.counters.hung_disconnects.load(Ordering::SeqCst) == 0 {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(released);
    assert!(h.counters.disconnects.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_disconnect_failure_counted_and_reset_anyway() {
    let sessions = DryRunSessions::new().with_disconnect("a", DisconnectBehavior::Fail);
    let h = Harness::new(vec![ready_account("a")], sessions, test_settings(10)).await;

    h.worker.start().await.unwrap();
    assert!(wait_until_active(&h.worker, 1).await);

    let report = h.worker.stop().await;
    assert_eq!(report.disconnect_failures, 1);
    assert!(!report.timed_out);
    assert!(!h.worker.account("a").await.unwrap().is_running);
}

#[tokio::test]
async fn test_restart_after_stop_skips_cooling_account() {
    let h = Harness::new(
        vec![ready_account("a"), ready_account("b")],
        DryRunSessions::new(),
        test_settings(10),
    )
    .await;

    h.worker.start().await.unwrap();
    assert!(wait_until_active(&h.worker, 1).await);
    h.worker.stop().await;

    h.worker.start().await.unwrap();
    assert!(h.worker.is_running());
    assert!(h.worker.account("b").await.unwrap().is_running);
    assert!(!h.worker.account("a").await.unwrap().is_running);

    h.worker.stop().await;
}

#[tokio::test]
async fn test_late_terminal_after_stop_is_ignored() {
    let h = Harness::new(vec![ready_account("a")], DryRunSessions::new(), test_settings(10)).await;

    h.worker.start().await.unwrap();
    assert!(wait_until_active(&h.worker, 1).await);
    let session_id = h
        .worker
        .account("a")
        .await
        .unwrap()
        .current_session_id
        .unwrap();

    h.worker.stop().await;
    assert!(
        !h.worker
            .on_session_terminal("a", session_id, SessionOutcome::Cancelled)
            .await
    );
    assert_eq!(h.worker.active_count().await, 0);
}

// ============================================================================
// Accounts and Drops
// ============================================================================

#[tokio::test]
async fn test_drop_reported_by_session_reaches_stats() {
    let sessions = DryRunSessions::new().with_simulated_drop(730, "42");
    let h = Harness::new(vec![ready_account("a")], sessions, test_settings(10)).await;

    h.worker.start().await.unwrap();
    assert!(wait_until_drops(&h.stats, "a", 1).await);

    let stats = h.stats.get("a").await.unwrap();
    assert_eq!(stats.drops.get("730_42"), Some(&1));
    assert_eq!(h.store.drops().await.len(), 1);
    assert_eq!(h.registry.owner_of("a").await, Some(TASK));

    h.worker.stop().await;
}

#[tokio::test]
async fn test_credential_list_creates_accounts_with_auth_material() {
    let store = Arc::new(MemoryStore::new());
    store
        .set_credentials(TASK, "# logins\nnewbie:secretpw\nghost:pw\n")
        .await;
    store.set_auth_material(TASK, "newbie", "c2VjcmV0").await;

    let h = Harness::with_store(store.clone(), DryRunSessions::new(), test_settings(10));
    let summary = h.worker.refresh_accounts().await;

    assert_eq!(summary.created_from_credentials, 1);
    assert_eq!(summary.total, 1);
    let record = store.account(TASK, "newbie").await.unwrap();
    assert_eq!(record.password, "secretpw");
    assert!(record.has_auth_material());
    assert!(h.worker.account("ghost").await.is_none());
    assert_eq!(store.load_all(TASK).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_set_enabled_persists() {
    let h = Harness::new(vec![ready_account("a")], DryRunSessions::new(), test_settings(10)).await;
    h.worker.refresh_accounts().await;

    assert!(h.worker.set_enabled("A", false).await);
    assert!(!h.store.account(TASK, "a").await.unwrap().enabled);
    assert!(!h.worker.set_enabled("missing", false).await);
}
