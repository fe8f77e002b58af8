//! Running the migrator twice on the same store is a no-op the second time,
//! and the recorded versions survive reopening the file.

use agt_db::DbOptions;

#[tokio::test]
async fn migrate_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let opts = DbOptions::new(dir.path().join("telemetry.sqlite"));
    let pool = agt_db::open_write_pool(&opts).await.unwrap();

    agt_db::migrate(&pool).await.expect("first migrate");
    agt_db::migrate(&pool).await.expect("second migrate is a no-op");

    let versions = agt_db::migrations::applied_versions(&pool).await.unwrap();
    assert_eq!(versions, vec![agt_db::migrations::latest_version()]);
}

#[tokio::test]
async fn schema_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("telemetry.sqlite");

    {
        let opts = DbOptions::new(&path);
        let pool = agt_db::open_write_pool(&opts).await.unwrap();
        agt_db::migrate(&pool).await.unwrap();
        pool.close().await;
    }

    let opts = DbOptions::new(&path);
    let pool = agt_db::open_write_pool(&opts).await.unwrap();
    let st = agt_db::status(&pool).await.unwrap();
    assert!(st.ok);
    assert!(st.has_runs_table);

    let verdict = agt_db::integrity_check(&pool).await.unwrap();
    assert_eq!(verdict, "ok");
}

#[tokio::test]
async fn newer_store_version_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let opts = DbOptions::new(dir.path().join("telemetry.sqlite"));
    let pool = agt_db::open_write_pool(&opts).await.unwrap();
    agt_db::migrate(&pool).await.unwrap();

    // Simulate a store touched by a future binary.
    sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (9999, '2099-01-01T00:00:00Z')")
        .execute(&pool)
        .await
        .unwrap();

    let err = agt_db::migrate(&pool).await.expect_err("must refuse downgrade");
    assert!(err.to_string().contains("forward-only"), "{err}");
}
