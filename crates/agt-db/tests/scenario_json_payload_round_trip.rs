//! Opaque JSON columns (`metrics_json`, `context_json`) survive storage as
//! structured values.

use agt_db::{DbOptions, NewRun, RunPatch};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

async fn test_pool() -> (tempfile::TempDir, sqlx::SqlitePool) {
    let dir = tempfile::tempdir().expect("tempdir");
    let opts = DbOptions::new(dir.path().join("telemetry.sqlite"));
    let pool = agt_db::open_write_pool(&opts).await.expect("open pool");
    agt_db::migrate(&pool).await.expect("migrate");
    (dir, pool)
}

#[tokio::test]
async fn metrics_and_context_round_trip_as_values() {
    let (_dir, pool) = test_pool().await;

    let event_id = Uuid::new_v4();
    let mut run = NewRun::new(event_id, "r1", "crawler", "scrape", Utc::now());
    run.metrics_json = Some(json!({"pages": 12, "bytes": 34567}));
    run.context_json = Some(json!({"trigger": {"kind": "cron", "schedule": "hourly"}}));
    agt_db::insert_run(&pool, &run).await.unwrap();

    let row = agt_db::fetch_run(&pool, &event_id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.metrics_json, Some(json!({"pages": 12, "bytes": 34567})));
    assert_eq!(
        row.context_json.as_ref().unwrap()["trigger"]["kind"],
        "cron"
    );
}

#[tokio::test]
async fn patch_replaces_metrics_wholesale() {
    let (_dir, pool) = test_pool().await;

    let event_id = Uuid::new_v4();
    let mut run = NewRun::new(event_id, "r1", "crawler", "scrape", Utc::now());
    run.metrics_json = Some(json!({"pages": 1}));
    agt_db::insert_run(&pool, &run).await.unwrap();

    let patch = RunPatch {
        metrics_json: Some(json!({"pages": 99, "errors": 2})),
        ..Default::default()
    };
    agt_db::update_run(&pool, &event_id.to_string(), &patch)
        .await
        .unwrap()
        .unwrap();

    let row = agt_db::fetch_run(&pool, &event_id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.metrics_json, Some(json!({"pages": 99, "errors": 2})));
}

#[tokio::test]
async fn absent_json_columns_stay_null() {
    let (_dir, pool) = test_pool().await;

    let event_id = Uuid::new_v4();
    let run = NewRun::new(event_id, "r1", "crawler", "scrape", Utc::now());
    agt_db::insert_run(&pool, &run).await.unwrap();

    let row = agt_db::fetch_run(&pool, &event_id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert!(row.metrics_json.is_none());
    assert!(row.context_json.is_none());
}

#[tokio::test]
async fn commit_history_accumulates_per_hash() {
    let (_dir, pool) = test_pool().await;

    let event_id = Uuid::new_v4();
    let run = NewRun::new(event_id, "r1", "crawler", "scrape", Utc::now());
    agt_db::insert_run(&pool, &run).await.unwrap();
    let key = event_id.to_string();

    assert!(agt_db::list_commits_for_run(&pool, &key)
        .await
        .unwrap()
        .is_empty());

    for hash in ["abc1234", "abc1234", "def5678"] {
        let assoc = agt_db::CommitAssociation {
            commit_hash: hash.to_string(),
            commit_source: agt_schemas::CommitSource::Ci,
            commit_author: None,
            commit_timestamp: None,
        };
        agt_db::associate_commit(&pool, &key, &assoc).await.unwrap();
    }

    let history = agt_db::list_commits_for_run(&pool, &key).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].commit_hash, "abc1234");
    assert_eq!(history[1].commit_hash, "def5678");
}
