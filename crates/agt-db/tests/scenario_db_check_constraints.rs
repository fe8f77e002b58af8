//! CHECK constraints on status, commit source and counters hold at the
//! engine level, independent of application validation.

use agt_db::DbOptions;
use chrono::Utc;

async fn test_pool() -> (tempfile::TempDir, sqlx::SqlitePool) {
    let dir = tempfile::tempdir().expect("tempdir");
    let opts = DbOptions::new(dir.path().join("telemetry.sqlite"));
    let pool = agt_db::open_write_pool(&opts).await.expect("open pool");
    agt_db::migrate(&pool).await.expect("migrate");
    (dir, pool)
}

fn is_check_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db) = err {
        db.message().contains("CHECK constraint failed")
    } else {
        false
    }
}

async fn raw_insert(
    pool: &sqlx::SqlitePool,
    status: &str,
    items_failed: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO agent_runs
            (event_id, run_id, agent_name, job_type, status, start_time,
             items_failed, created_at, updated_at)
        VALUES (?, 'r1', 'a', 'j', ?, ?, ?, ?, ?)
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(status)
    .bind(Utc::now())
    .bind(items_failed)
    .bind(Utc::now())
    .bind(Utc::now())
    .execute(pool)
    .await
    .map(|_| ())
}

#[tokio::test]
async fn non_canonical_status_rejected_by_check() {
    let (_dir, pool) = test_pool().await;

    let err = raw_insert(&pool, "failed", 0)
        .await
        .expect_err("alias must not reach the store");
    assert!(is_check_violation(&err), "expected CHECK violation: {err:?}");

    raw_insert(&pool, "failure", 0)
        .await
        .expect("canonical value accepted");
}

#[tokio::test]
async fn negative_counter_rejected_by_check() {
    let (_dir, pool) = test_pool().await;

    let err = raw_insert(&pool, "running", -1)
        .await
        .expect_err("negative counter must be rejected");
    assert!(is_check_violation(&err), "expected CHECK violation: {err:?}");
}

#[tokio::test]
async fn invalid_commit_source_rejected_by_check() {
    let (_dir, pool) = test_pool().await;

    let err = sqlx::query(
        r#"
        INSERT INTO agent_runs
            (event_id, run_id, agent_name, job_type, status, start_time,
             git_commit_source, created_at, updated_at)
        VALUES (?, 'r1', 'a', 'j', 'running', ?, 'robot', ?, ?)
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(Utc::now())
    .bind(Utc::now())
    .bind(Utc::now())
    .execute(&pool)
    .await
    .expect_err("invalid commit source must be rejected");

    assert!(is_check_violation(&err), "expected CHECK violation: {err:?}");
}
