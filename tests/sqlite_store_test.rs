//! Integration tests for the SQLite claim adapter.

mod common;

use std::time::{Duration, Instant};

use bd_claim::model::{AgentName, ClaimFilters, IssueStatus, Priority, parse_timestamp};
use bd_claim::store::{ClaimStore, RetryPolicy};
use bd_claim::{
    ClaimEngine, ClaimOutcome, ClaimRequest, Error, ErrorKind, SqliteClaimStore,
    SqliteStoreOptions,
};
use chrono::{DateTime, TimeZone, Utc};
use common::Fixture;
use sqlx::Connection;

fn agent(name: &str) -> AgentName {
    AgentName::new(name).unwrap()
}

async fn claim_id(store: &SqliteClaimStore, filters: &ClaimFilters) -> Option<String> {
    store
        .claim_one_ready(&agent("tester"), filters)
        .await
        .unwrap()
        .map(|issue| issue.id.to_string())
}

// ---------------------------------------------------------------------------
// Selection and ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn claims_in_priority_order_until_empty() {
    let fx = Fixture::new().await;
    fx.seed("A", 0).await;
    fx.seed("B", 2).await;
    fx.seed("C", 1).await;
    let store = fx.store().await;
    let filters = ClaimFilters::new();

    assert_eq!(claim_id(&store, &filters).await.as_deref(), Some("B"));
    assert_eq!(claim_id(&store, &filters).await.as_deref(), Some("C"));
    assert_eq!(claim_id(&store, &filters).await.as_deref(), Some("A"));
    assert_eq!(claim_id(&store, &filters).await, None);

    assert_eq!(fx.count_with_status("in_progress").await, 3);
}

#[tokio::test]
async fn equal_priority_prefers_oldest_then_lowest_id() {
    let fx = Fixture::new().await;
    fx.seed_at("bd-c", 1, "2025-01-01T00:00:00Z").await;
    fx.seed_at("bd-b", 1, "2025-01-02T00:00:00Z").await;
    fx.seed_at("bd-a", 1, "2025-01-02T00:00:00Z").await;
    let store = fx.store().await;
    let filters = ClaimFilters::new();

    assert_eq!(claim_id(&store, &filters).await.as_deref(), Some("bd-c"));
    assert_eq!(claim_id(&store, &filters).await.as_deref(), Some("bd-a"));
    assert_eq!(claim_id(&store, &filters).await.as_deref(), Some("bd-b"));
}

#[tokio::test]
async fn creation_time_order_holds_across_stored_layouts() {
    let fx = Fixture::new().await;
    fx.seed_at("newer", 1, "2025-03-04T05:00:00Z").await;
    fx.seed_at("older", 1, "2025-03-04T06:00:00.000000+02:00").await;
    fx.seed_at("middle", 1, "2025-03-04 04:30:00").await;
    let store = fx.store().await;
    let filters = ClaimFilters::new();

    assert_eq!(claim_id(&store, &filters).await.as_deref(), Some("older"));
    assert_eq!(claim_id(&store, &filters).await.as_deref(), Some("middle"));
    assert_eq!(claim_id(&store, &filters).await.as_deref(), Some("newer"));
}

#[tokio::test]
async fn only_open_unblocked_issues_are_claimed() {
    let fx = Fixture::new().await;
    fx.seed("closed", 2).await;
    fx.set_status("closed", "closed").await;
    fx.seed("busy", 2).await;
    fx.set_status("busy", "in_progress").await;
    fx.seed("blocked", 2).await;
    fx.block("blocked").await;
    fx.seed("ready", 0).await;
    let store = fx.store().await;

    assert_eq!(
        claim_id(&store, &ClaimFilters::new()).await.as_deref(),
        Some("ready")
    );
    assert_eq!(claim_id(&store, &ClaimFilters::new()).await, None);
}

#[tokio::test]
async fn label_filters() {
    let fx = Fixture::new().await;
    fx.seed("X", 1).await;
    fx.label("X", &["backend", "api"]).await;
    fx.seed("Y", 2).await;
    fx.label("Y", &["frontend"]).await;
    let store = fx.store().await;

    let include = ClaimFilters::new().include_label("backend");
    let found = store.find_one_ready(&include).await.unwrap().unwrap();
    assert_eq!(found.id.as_str(), "X");

    let exclude = ClaimFilters::new().exclude_label("frontend");
    let found = store.find_one_ready(&exclude).await.unwrap().unwrap();
    assert_eq!(found.id.as_str(), "X");

    let both = ClaimFilters::new().include_label("backend").include_label("ui");
    assert!(store.find_one_ready(&both).await.unwrap().is_none());

    // Unfiltered, Y wins on priority.
    assert_eq!(
        claim_id(&store, &ClaimFilters::new()).await.as_deref(),
        Some("Y")
    );
}

#[tokio::test]
async fn only_unassigned_treats_empty_assignee_as_unassigned() {
    let fx = Fixture::new().await;
    fx.seed("taken", 2).await;
    fx.set_assignee("taken", "someone-else").await;
    fx.seed("blank", 1).await;
    fx.set_assignee("blank", "").await;
    fx.seed("free", 0).await;
    let store = fx.store().await;
    let filters = ClaimFilters::new().only_unassigned();

    let first = store
        .claim_one_ready(&agent("me"), &filters)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.id.as_str(), "blank");
    assert_eq!(first.assignee, Some(agent("me")));

    assert_eq!(claim_id(&store, &filters).await.as_deref(), Some("free"));
    assert_eq!(claim_id(&store, &filters).await, None);

    // Without the restriction the pre-assigned open issue is still claimable.
    assert_eq!(
        claim_id(&store, &ClaimFilters::new()).await.as_deref(),
        Some("taken")
    );
}

#[tokio::test]
async fn min_priority_is_inclusive() {
    let fx = Fixture::new().await;
    fx.seed("low", 0).await;
    fx.seed("medium", 1).await;
    let store = fx.store().await;
    let filters = ClaimFilters::new().min_priority(Priority::MEDIUM);

    assert_eq!(claim_id(&store, &filters).await.as_deref(), Some("medium"));
    assert_eq!(claim_id(&store, &filters).await, None);
}

// ---------------------------------------------------------------------------
// Claim effects and hydration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn claim_persists_transition_and_hydrates_labels() {
    let fx = Fixture::new().await;
    fx.seed("bd-1", 2).await;
    fx.label("bd-1", &["zeta", "alpha"]).await;
    let store = fx.store().await;
    assert_eq!(store.path(), fx.path.as_path());
    let now = Utc.with_ymd_and_hms(2025, 7, 4, 8, 0, 0).unwrap();
    fx.clock.set(now);

    let issue = store
        .claim_one_ready(&agent("agent-7"), &ClaimFilters::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(issue.status, IssueStatus::InProgress);
    assert_eq!(issue.assignee, Some(agent("agent-7")));
    assert_eq!(issue.updated_at, now);
    assert_eq!(
        issue.created_at,
        parse_timestamp(common::CREATED_AT).unwrap()
    );
    assert_eq!(issue.labels.iter().collect::<Vec<_>>(), ["alpha", "zeta"]);
    assert_eq!(issue.title, "Issue bd-1");
    assert_eq!(issue.issue_type, "task");
    assert!(!issue.blocked);

    let (status, assignee, updated_at) = fx.row("bd-1").await;
    assert_eq!(status, "in_progress");
    assert_eq!(assignee.as_deref(), Some("agent-7"));
    assert_eq!(updated_at, "2025-07-04T08:00:00.000000000Z");
}

#[tokio::test]
async fn dry_run_find_never_mutates() {
    let fx = Fixture::new().await;
    fx.seed("bd-1", 1).await;
    let store = fx.store().await;
    let before = fx.row("bd-1").await;

    let first = store.find_one_ready(&ClaimFilters::new()).await.unwrap();
    let second = store.find_one_ready(&ClaimFilters::new()).await.unwrap();

    assert_eq!(first, second);
    let issue = first.unwrap();
    assert_eq!(issue.status, IssueStatus::Open);
    assert_eq!(issue.assignee, None);
    assert_eq!(fx.row("bd-1").await, before);
}

#[tokio::test]
async fn legacy_timestamps_are_read() {
    let fx = Fixture::new().await;
    fx.seed("micro", 2).await;
    fx.set_created_at("micro", "2025-03-03T21:06:07.123456-08:00").await;
    fx.seed("naive", 1).await;
    fx.set_created_at("naive", "2025-03-04 05:06:07").await;
    fx.seed("junk", 0).await;
    fx.set_created_at("junk", "last tuesday").await;
    let store = fx.store().await;

    let micro = store.find_one_ready(&ClaimFilters::new()).await.unwrap().unwrap();
    assert_eq!(
        micro.created_at,
        Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap() + chrono::Duration::microseconds(123_456)
    );
    claim_id(&store, &ClaimFilters::new()).await;

    let naive = store.find_one_ready(&ClaimFilters::new()).await.unwrap().unwrap();
    assert_eq!(naive.created_at, Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap());
    claim_id(&store, &ClaimFilters::new()).await;

    let junk = store.find_one_ready(&ClaimFilters::new()).await.unwrap().unwrap();
    assert_eq!(junk.created_at, DateTime::<Utc>::UNIX_EPOCH);
}

#[tokio::test]
async fn out_of_range_priority_does_not_wedge_the_queue() {
    let fx = Fixture::new().await;
    fx.seed("huge", 0).await;
    fx.set_priority("huge", 1 << 40).await;
    fx.seed("tiny", 0).await;
    fx.set_priority("tiny", -(1 << 40)).await;
    fx.seed("plain", 1).await;
    let store = fx.store().await;
    let filters = ClaimFilters::new();

    let huge = store
        .claim_one_ready(&agent("a"), &filters)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(huge.id.as_str(), "huge");
    assert_eq!(huge.priority, Priority::new(i32::MAX));
    assert_eq!(fx.row("huge").await.0, "in_progress");

    assert_eq!(claim_id(&store, &filters).await.as_deref(), Some("plain"));

    let tiny = store
        .claim_one_ready(&agent("a"), &filters)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tiny.priority, Priority::new(i32::MIN));
}

// ---------------------------------------------------------------------------
// Opening and the version gate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn open_missing_or_invalid_file_is_store_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let clock = std::sync::Arc::new(bd_claim::clock::SystemClock);

    let missing = dir.path().join("nope.db");
    let err = SqliteClaimStore::open(&missing, SqliteStoreOptions::default(), clock.clone())
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::StoreNotFound);
    assert!(!missing.exists(), "open must never create a database");

    let garbage = dir.path().join("garbage.db");
    std::fs::write(&garbage, vec![0x42u8; 4096]).unwrap();
    let err = SqliteClaimStore::open(&garbage, SqliteStoreOptions::default(), clock)
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::StoreNotFound);
}

#[tokio::test]
async fn version_gate() {
    let fx = Fixture::new().await;

    // Table present, no marker.
    let store = fx.store().await;
    assert_eq!(store.stored_version().await.unwrap(), None);
    store.close().await;

    fx.set_version("0.27.2").await;
    let store = fx.store().await;
    assert_eq!(store.stored_version().await.unwrap().as_deref(), Some("0.27.2"));
    store.close().await;

    fx.set_version("0.19.9").await;
    let err = SqliteClaimStore::open(&fx.path, SqliteStoreOptions::default(), fx.clock())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::SchemaIncompatible { .. }), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::SchemaIncompatible);

    // Explicit bypass.
    let store = fx
        .store_with(SqliteStoreOptions::default().skip_version_check())
        .await;
    assert!(store.check_version_compatibility().await.is_err());
    store.close().await;

    fx.drop_metadata().await;
    let store = fx.store().await;
    assert_eq!(store.stored_version().await.unwrap(), None);
    assert!(store.check_version_compatibility().await.is_ok());
}

// ---------------------------------------------------------------------------
// Contention
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn busy_store_exhausts_retries_then_recovers() {
    let fx = Fixture::new().await;
    fx.seed("bd-1", 1).await;
    let store = fx
        .store_with(SqliteStoreOptions::default().busy_timeout_ms(50))
        .await;

    let mut blocker = fx.hold_write_lock().await;

    let started = Instant::now();
    let err = store
        .claim_one_ready(&agent("a"), &ClaimFilters::new())
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, Error::Busy(_)), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::StoreBusy);
    assert!(err.to_string().contains("3 attempts"), "{err}");
    // Three lock waits plus 20ms and 40ms of backoff.
    assert!(elapsed >= Duration::from_millis(60), "{elapsed:?}");

    sqlx::query("ROLLBACK").execute(&mut blocker).await.unwrap();
    blocker.close().await.unwrap();

    let (status, _, _) = fx.row("bd-1").await;
    assert_eq!(status, "open", "failed attempts must leave no trace");

    assert_eq!(
        claim_id(&store, &ClaimFilters::new()).await.as_deref(),
        Some("bd-1")
    );
}

#[tokio::test]
async fn retry_policy_bound_is_configurable() {
    let fx = Fixture::new().await;
    fx.seed("bd-1", 1).await;
    let store = fx
        .store_with(
            SqliteStoreOptions::default()
                .busy_timeout_ms(10)
                .retry(RetryPolicy {
                    max_attempts: 1,
                    base_delay: Duration::from_millis(1),
                }),
        )
        .await;
    let _blocker = fx.hold_write_lock().await;

    let err = store
        .claim_one_ready(&agent("a"), &ClaimFilters::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("1 attempts"), "{err}");
    assert!(err.kind().is_retryable());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deadline_while_locked_rolls_back() {
    let fx = Fixture::new().await;
    fx.seed("bd-1", 1).await;
    let store = fx
        .store_with(SqliteStoreOptions::default().busy_timeout_ms(500))
        .await;
    let engine = ClaimEngine::new(store, fx.clock());

    let mut blocker = fx.hold_write_lock().await;

    let request = ClaimRequest::new(agent("a")).deadline(Duration::from_millis(50));
    match engine.execute(&request).await {
        ClaimOutcome::Failed { kind, message } => {
            assert_eq!(kind, ErrorKind::StoreBusy);
            assert!(message.contains("deadline"), "{message}");
        }
        other => panic!("expected Failed, got {other:?}"),
    }

    sqlx::query("ROLLBACK").execute(&mut blocker).await.unwrap();
    blocker.close().await.unwrap();

    let (status, assignee, _) = fx.row("bd-1").await;
    assert_eq!(status, "open");
    assert_eq!(assignee, None);

    let outcome = engine.execute(&ClaimRequest::new(agent("a"))).await;
    assert!(matches!(outcome, ClaimOutcome::Claimed(_)), "{outcome:?}");
    assert_eq!(fx.row("bd-1").await.0, "in_progress");
    engine.store().close().await;
}
