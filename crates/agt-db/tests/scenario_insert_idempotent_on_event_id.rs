//! A duplicate `event_id` insert is an idempotent no-op, not an error.

use agt_db::{DbOptions, InsertOutcome, NewRun};
use chrono::Utc;
use uuid::Uuid;

async fn test_pool() -> (tempfile::TempDir, sqlx::SqlitePool) {
    let dir = tempfile::tempdir().expect("tempdir");
    let opts = DbOptions::new(dir.path().join("telemetry.sqlite"));
    let pool = agt_db::open_write_pool(&opts).await.expect("open pool");
    agt_db::migrate(&pool).await.expect("migrate");
    (dir, pool)
}

#[tokio::test]
async fn second_insert_with_same_event_id_reports_duplicate() {
    let (_dir, pool) = test_pool().await;

    let run = NewRun::new(Uuid::new_v4(), "r1", "crawler", "scrape", Utc::now());

    let first = agt_db::insert_run(&pool, &run).await.expect("first insert");
    assert_eq!(first, InsertOutcome::Created);

    let second = agt_db::insert_run(&pool, &run).await.expect("second insert");
    assert_eq!(second, InsertOutcome::Duplicate);

    assert_eq!(agt_db::count_runs(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn duplicate_insert_does_not_overwrite_first_row() {
    let (_dir, pool) = test_pool().await;

    let event_id = Uuid::new_v4();
    let first = NewRun::new(event_id, "r1", "crawler", "scrape", Utc::now());
    agt_db::insert_run(&pool, &first).await.unwrap();

    // Same event_id, different everything else: the original row wins.
    let mut second = NewRun::new(event_id, "r2", "other-agent", "other-job", Utc::now());
    second.items_succeeded = 99;
    let outcome = agt_db::insert_run(&pool, &second).await.unwrap();
    assert_eq!(outcome, InsertOutcome::Duplicate);

    let stored = agt_db::fetch_run(&pool, &event_id.to_string())
        .await
        .unwrap()
        .expect("row exists");
    assert_eq!(stored.run_id, "r1");
    assert_eq!(stored.agent_name, "crawler");
    assert_eq!(stored.items_succeeded, 0);
}

#[tokio::test]
async fn distinct_event_ids_all_insert() {
    let (_dir, pool) = test_pool().await;

    for i in 0..10 {
        let run = NewRun::new(
            Uuid::new_v4(),
            format!("r{i}"),
            "crawler",
            "scrape",
            Utc::now(),
        );
        let outcome = agt_db::insert_run(&pool, &run).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Created);
    }

    assert_eq!(agt_db::count_runs(&pool).await.unwrap(), 10);
}
