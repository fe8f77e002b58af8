//! Client lifecycle against a live ingestion service: start/end, scoped
//! tracking, and commit association.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use agt_buffer::BufferWriter;
use agt_client::{EndOptions, HttpTransport, StartOptions, TelemetryClient};
use agt_config::TelemetryConfig;
use agt_schemas::RunStatus;
use agt_server::{routes, state::AppState};

const FAST_RETRIES: [Duration; 3] = [
    Duration::from_millis(5),
    Duration::from_millis(10),
    Duration::from_millis(20),
];

async fn spawn_server(dir: &std::path::Path) -> (String, sqlx::SqlitePool) {
    let base = dir.to_string_lossy().into_owned();
    let cfg = TelemetryConfig::from_lookup(|k| match k {
        "TELEMETRY_BASE_DIR" => Some(base.clone()),
        _ => None,
    })
    .expect("config");

    let opts = agt_db::DbOptions::new(&cfg.db_path);
    let write = agt_db::open_write_pool(&opts).await.expect("write pool");
    agt_db::migrate(&write).await.expect("migrate");
    let read = agt_db::open_read_pool(&opts, 4).await.expect("read pool");
    let verify = read.clone();

    let app = routes::build_router(Arc::new(AppState::new(cfg, write, read)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server crashed");
    });

    (format!("http://{addr}"), verify)
}

fn make_client(url: &str, spool: &std::path::Path) -> TelemetryClient {
    let transport = HttpTransport::new(url).unwrap().with_retry_delays(FAST_RETRIES);
    let buffer = BufferWriter::new(spool).unwrap();
    TelemetryClient::from_parts(transport, buffer, None)
}

#[tokio::test]
async fn start_then_end_records_success_with_duration() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let (url, pool) = spawn_server(server_dir.path()).await;
    let client = make_client(&url, &client_dir.path().join("raw"));

    let handle = client
        .start_run("crawler", "scrape", StartOptions::default())
        .await
        .unwrap();

    let row = agt_db::fetch_run(&pool, &handle.event_id.to_string())
        .await
        .unwrap()
        .expect("row created");
    assert_eq!(row.status, RunStatus::Running);
    assert_eq!(row.agent_name, "crawler");

    client
        .end_run(
            &handle.run_id,
            "completed", // alias; normalizes to success
            EndOptions {
                items_succeeded: Some(7),
                output_summary: Some("done".to_string()),
                ..Default::default()
            },
        )
        .await;

    let row = agt_db::fetch_run(&pool, &handle.event_id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, RunStatus::Success);
    assert_eq!(row.items_succeeded, 7);
    assert!(row.end_time.is_some());
    assert!(row.duration_ms >= 0, "duration computed when omitted");
}

#[tokio::test]
async fn auto_generated_run_id_is_used_when_absent() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let (url, pool) = spawn_server(server_dir.path()).await;
    let client = make_client(&url, &client_dir.path().join("raw"));

    let handle = client
        .start_run("my-agent", "job", StartOptions::default())
        .await
        .unwrap();
    assert!(handle.run_id.contains("my-agent"));

    let row = agt_db::fetch_run(&pool, &handle.event_id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.run_id, handle.run_id);
}

#[tokio::test]
async fn invalid_caller_run_id_is_the_one_visible_error() {
    let client_dir = tempfile::tempdir().unwrap();
    let client = make_client("http://127.0.0.1:9", &client_dir.path().join("raw"));

    let err = client
        .start_run(
            "crawler",
            "scrape",
            StartOptions {
                run_id: Some("bad/run/id".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect_err("path separators are rejected");
    assert!(err.to_string().contains("invalid run_id"), "{err}");
}

#[tokio::test]
async fn track_run_success_path() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let (url, pool) = spawn_server(server_dir.path()).await;
    let client = make_client(&url, &client_dir.path().join("raw"));

    let value = client
        .track_run("crawler", "scrape", StartOptions::default(), |_handle| async {
            Ok(42)
        })
        .await
        .unwrap();
    assert_eq!(value, 42);

    let rows = agt_db::query_runs(&pool, &agt_db::RunFilter::new()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, RunStatus::Success);
}

#[tokio::test]
async fn track_run_failure_stamps_failure_and_reraises() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let (url, pool) = spawn_server(server_dir.path()).await;
    let client = make_client(&url, &client_dir.path().join("raw"));

    let err = client
        .track_run(
            "crawler",
            "scrape",
            StartOptions::default(),
            |_handle| async { Err::<(), _>(anyhow!("upstream exploded")) },
        )
        .await
        .expect_err("original error propagates unchanged");
    assert_eq!(err.to_string(), "upstream exploded");

    let rows = agt_db::query_runs(&pool, &agt_db::RunFilter::new()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, RunStatus::Failure);
    assert_eq!(rows[0].error_summary.as_deref(), Some("upstream exploded"));
}

#[tokio::test]
async fn associate_commit_round_trips() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let (url, pool) = spawn_server(server_dir.path()).await;
    let client = make_client(&url, &client_dir.path().join("raw"));

    let handle = client
        .start_run("crawler", "scrape", StartOptions::default())
        .await
        .unwrap();
    client
        .associate_commit(&handle.run_id, "abc1234", "llm", None, None)
        .await;

    let row = agt_db::fetch_run(&pool, &handle.event_id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.git_commit_hash.as_deref(), Some("abc1234"));
    assert_eq!(
        row.git_commit_source,
        Some(agt_schemas::CommitSource::Llm)
    );
}

#[tokio::test]
async fn flush_drains_the_spool_inline() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let spool = client_dir.path().join("raw");
    let (url, pool) = spawn_server(server_dir.path()).await;
    let client = make_client(&url, &spool);

    let handle = client
        .start_run("crawler", "scrape", StartOptions::default())
        .await
        .unwrap();
    client.end_run(&handle.run_id, "success", EndOptions::default()).await;

    // start + end each left a backup entry.
    assert_eq!(agt_buffer::pending_entries(&spool).unwrap(), 2);

    let report = client.flush().await.unwrap();
    assert_eq!(report.replayed, 2);
    assert_eq!(agt_buffer::pending_entries(&spool).unwrap(), 0);
    assert_eq!(agt_db::count_runs(&pool).await.unwrap(), 1, "replay deduped");
}

#[tokio::test]
async fn end_run_for_unknown_run_is_a_silent_noop() {
    let client_dir = tempfile::tempdir().unwrap();
    let client = make_client("http://127.0.0.1:9", &client_dir.path().join("raw"));

    // No panic, no error surface; just a warn in the logs.
    client.end_run("never-started", "success", EndOptions::default()).await;
}
