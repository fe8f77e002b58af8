//! The pragma contract (journal_mode=DELETE, synchronous=FULL,
//! busy_timeout=30000) is observable on every connection.

use agt_db::DbOptions;

#[tokio::test]
async fn default_options_yield_contract_pragmas() {
    let dir = tempfile::tempdir().unwrap();
    let opts = DbOptions::new(dir.path().join("telemetry.sqlite"));
    let pool = agt_db::open_write_pool(&opts).await.unwrap();

    let report = agt_db::verify_pragmas(&pool, &opts).await.expect("verify");
    assert_eq!(report.journal_mode, "DELETE");
    assert_eq!(report.synchronous, "FULL");
    assert_eq!(report.busy_timeout_ms, 30_000);
}

#[tokio::test]
async fn read_pool_applies_same_pragmas() {
    let dir = tempfile::tempdir().unwrap();
    let opts = DbOptions::new(dir.path().join("telemetry.sqlite"));

    // Writer creates the file; the read pool opens read-only afterwards.
    let write = agt_db::open_write_pool(&opts).await.unwrap();
    agt_db::migrate(&write).await.unwrap();

    let read = agt_db::open_read_pool(&opts, 4).await.unwrap();
    let report = agt_db::read_pragmas(&read).await.unwrap();
    assert_eq!(report.journal_mode, "DELETE");
    assert_eq!(report.synchronous, "FULL");
    assert_eq!(report.busy_timeout_ms, 30_000);
}

#[tokio::test]
async fn verify_rejects_mismatched_expectation() {
    let dir = tempfile::tempdir().unwrap();
    let opts = DbOptions::new(dir.path().join("telemetry.sqlite"));
    let pool = agt_db::open_write_pool(&opts).await.unwrap();

    let mut wal_opts = opts.clone();
    wal_opts.journal_mode = "WAL".to_string();
    let err = agt_db::verify_pragmas(&pool, &wal_opts)
        .await
        .expect_err("mismatch must fail verification");
    assert!(err.to_string().contains("journal_mode mismatch"), "{err}");
}

#[tokio::test]
async fn no_sidecar_journal_files_at_rest() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("telemetry.sqlite");
    let opts = DbOptions::new(&db_path);

    let pool = agt_db::open_write_pool(&opts).await.unwrap();
    agt_db::migrate(&pool).await.unwrap();
    pool.close().await;

    // DELETE journaling leaves only the store file once connections close.
    assert!(db_path.exists());
    assert!(!db_path.with_extension("sqlite-wal").exists());
    assert!(!db_path.with_extension("sqlite-shm").exists());
}
