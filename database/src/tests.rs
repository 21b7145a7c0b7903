use crate::{Database, MemoryStore};
use agent_core::{
    ActivityRecord, ActivityStore, AgentConfig, ConfigUpdate, CoreError, DatabaseError, Decision,
    Draft, Evaluation, Outcome, Receipt, RunState, Stage, TriggerKind,
};
use chrono::{Duration, Utc};
use serde_json::json;
use std::env;

async fn setup_test_db() -> Database {
    let db_path = env::temp_dir().join(format!("test_moltbook_agent_{}.db", uuid::Uuid::new_v4()));
    let db_url = format!("sqlite://{}", db_path.display());

    let mut db = Database::new(db_url);
    db.connect()
        .await
        .expect("Failed to connect to test database");
    db.run_migrations().await.expect("Failed to run migrations");

    db
}

fn record(run_id: &str, minutes_ago: i64, decision: Decision, outcome: Outcome) -> ActivityRecord {
    let completed_at = Utc::now() - Duration::minutes(minutes_ago);
    ActivityRecord {
        run_id: run_id.to_string(),
        started_at: completed_at - Duration::seconds(20),
        completed_at,
        trigger: TriggerKind::Scheduled,
        trigger_context: None,
        decision: Some(decision),
        decision_reason: Some("test".to_string()),
        target_item_id: None,
        draft: None,
        evaluation: None,
        outcome,
        error: None,
        failed_stage: None,
        receipt: None,
        feed_items_seen: 12,
    }
}

#[tokio::test]
async fn test_database_connection_and_migrations() {
    let db = setup_test_db().await;

    // Fresh databases have an idle run state and no activity
    let state = db.get_run_state().await.unwrap();
    assert_eq!(state, RunState::default());
    assert!(db.list_activity(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_append_round_trips_all_fields() {
    let db = setup_test_db().await;

    let mut full = record("run-full", 1, Decision::Post, Outcome::Success);
    full.trigger = TriggerKind::DirectPost;
    full.trigger_context = Some("share the release".to_string());
    full.draft = Some(Draft::post("Release notes", "v0.1 is out", Some("coding".to_string())));
    full.evaluation = Some(Evaluation {
        accepted: true,
        reason: "approved".to_string(),
        score: Some(0.9),
    });
    full.receipt = Some(Receipt {
        id: Some("post-1".to_string()),
        raw: json!({"success": true, "post": {"id": "post-1"}}),
    });

    let mut failed = record("run-failed", 0, Decision::Comment, Outcome::Failed);
    failed.decision = None;
    failed.error = Some("feed unavailable".to_string());
    failed.failed_stage = Some(Stage::Observe);

    db.append(&full).await.unwrap();
    db.append(&failed).await.unwrap();

    let records = db.list_activity(10).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].run_id, "run-failed");
    assert_eq!(records[0].failed_stage, Some(Stage::Observe));
    assert_eq!(records[0].decision, None);

    // Millisecond precision is what the store keeps
    let stored = &records[1];
    assert_eq!(stored.draft, full.draft);
    assert_eq!(stored.evaluation, full.evaluation);
    assert_eq!(stored.receipt, full.receipt);
    assert_eq!(stored.trigger, TriggerKind::DirectPost);
    assert_eq!(stored.feed_items_seen, 12);
    assert_eq!(
        stored.completed_at.timestamp_millis(),
        full.completed_at.timestamp_millis()
    );
}

#[tokio::test]
async fn test_duplicate_run_id_is_rejected() {
    let db = setup_test_db().await;
    let entry = record("run-1", 0, Decision::Nothing, Outcome::Skipped);

    db.append(&entry).await.unwrap();
    let result = db.append(&entry).await;
    assert!(matches!(
        result,
        Err(CoreError::Database(DatabaseError::ConstraintViolation { .. }))
    ));
    assert_eq!(db.list_activity(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_read_recent_window_newest_first() {
    let db = setup_test_db().await;

    db.append(&record("old", 60 * 25, Decision::Post, Outcome::Success))
        .await
        .unwrap();
    db.append(&record("mid", 60 * 5, Decision::Post, Outcome::Success))
        .await
        .unwrap();
    db.append(&record("new", 10, Decision::Comment, Outcome::Success))
        .await
        .unwrap();

    let recent = db.read_recent(Duration::hours(24)).await.unwrap();
    let ids: Vec<_> = recent.iter().map(|r| r.run_id.as_str()).collect();
    assert_eq!(ids, vec!["new", "mid"]);

    let limited = db.list_activity(1).await.unwrap();
    assert_eq!(limited[0].run_id, "new");
}

#[tokio::test]
async fn test_run_state_and_stale_recovery() {
    let db = setup_test_db().await;
    let now = Utc::now();

    db.set_run_state(&RunState {
        last_run_at: Some(now),
        last_error: None,
        is_running: true,
    })
    .await
    .unwrap();
    assert!(db.get_run_state().await.unwrap().is_running);

    assert!(db.recover_stale_state().await.unwrap());
    let state = db.get_run_state().await.unwrap();
    assert!(!state.is_running);
    assert!(state.last_error.is_some());
    assert_eq!(
        state.last_run_at.map(|t| t.timestamp_millis()),
        Some(now.timestamp_millis())
    );

    // Nothing left to recover
    assert!(!db.recover_stale_state().await.unwrap());
}

#[tokio::test]
async fn test_begin_run_is_exclusive_across_connections() {
    let db = setup_test_db().await;
    let now = Utc::now();
    db.set_run_state(&RunState {
        last_run_at: Some(now),
        last_error: Some("feed unavailable".to_string()),
        is_running: false,
    })
    .await
    .unwrap();

    assert!(db.try_begin_run().await.unwrap());
    assert!(!db.try_begin_run().await.unwrap());

    let state = db.get_run_state().await.unwrap();
    assert!(state.is_running);
    // Only the flag changes
    assert_eq!(state.last_error.as_deref(), Some("feed unavailable"));
    assert!(state.last_run_at.is_some());

    db.set_run_state(&RunState {
        is_running: false,
        ..state
    })
    .await
    .unwrap();
    assert!(db.try_begin_run().await.unwrap());
}

#[tokio::test]
async fn test_config_seed_and_partial_update() {
    let db = setup_test_db().await;
    let defaults = AgentConfig {
        autonomous_mode: true,
        max_posts_per_day: 4,
        ..AgentConfig::default()
    };

    db.initialize(&defaults).await.unwrap();
    assert_eq!(db.get_config().await.unwrap(), defaults);

    let updated = db
        .set_config(&ConfigUpdate {
            post_cooldown_seconds: Some(600),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(updated.post_cooldown_seconds, 600);
    assert_eq!(updated.max_posts_per_day, 4);

    // Seeding again must not overwrite the stored config
    db.initialize(&AgentConfig::default()).await.unwrap();
    assert_eq!(db.get_config().await.unwrap(), updated);
}

#[tokio::test]
async fn test_invalid_config_update_leaves_config_unchanged() {
    let db = setup_test_db().await;
    db.initialize(&AgentConfig::default()).await.unwrap();

    let result = db
        .set_config(&ConfigUpdate {
            heartbeat_interval_seconds: Some(0),
            autonomous_mode: Some(true),
            ..Default::default()
        })
        .await;
    assert!(matches!(result, Err(CoreError::Config(_))));
    assert_eq!(db.get_config().await.unwrap(), AgentConfig::default());
}

#[tokio::test]
async fn test_unconnected_database_reports_connection_error() {
    let db = Database::new("sqlite::memory:".to_string());
    let result = db.get_run_state().await;
    assert!(matches!(
        result,
        Err(CoreError::Database(DatabaseError::ConnectionFailed { .. }))
    ));
}

#[tokio::test]
async fn test_memory_store_matches_database_semantics() {
    let store = MemoryStore::new();
    let entry = record("run-1", 30, Decision::Post, Outcome::Success);

    store.append(&entry).await.unwrap();
    assert!(store.append(&entry).await.is_err());

    store
        .seed(record("run-0", 60 * 30, Decision::Post, Outcome::Success))
        .await;
    store
        .append(&record("run-2", 1, Decision::Upvote, Outcome::Success))
        .await
        .unwrap();

    let recent = store.read_recent(Duration::hours(24)).await.unwrap();
    let ids: Vec<_> = recent.iter().map(|r| r.run_id.as_str()).collect();
    assert_eq!(ids, vec!["run-2", "run-1"]);
    assert_eq!(store.list_activity(10).await.unwrap().len(), 3);

    let config = store
        .set_config(&ConfigUpdate {
            autonomous_mode: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(config.autonomous_mode);
    assert!(store.get_config().await.unwrap().autonomous_mode);

    assert!(store.try_begin_run().await.unwrap());
    assert!(!store.try_begin_run().await.unwrap());
    assert!(store.get_run_state().await.unwrap().is_running);
}

#[tokio::test]
async fn test_read_recent_with_unbounded_window() {
    let db = setup_test_db().await;
    db.append(&record("ancient", 60 * 24 * 400, Decision::Post, Outcome::Success))
        .await
        .unwrap();

    let all = db.read_recent(Duration::MAX).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(
        MemoryStore::new().read_recent(Duration::MAX).await.unwrap().len(),
        0
    );
}
