//! Query filters, bounds semantics and `created_at DESC` ordering.

use agt_db::{DbOptions, NewRun, RunFilter};
use agt_schemas::RunStatus;
use chrono::{Duration, Utc};
use uuid::Uuid;

async fn test_pool() -> (tempfile::TempDir, sqlx::SqlitePool) {
    let dir = tempfile::tempdir().expect("tempdir");
    let opts = DbOptions::new(dir.path().join("telemetry.sqlite"));
    let pool = agt_db::open_write_pool(&opts).await.expect("open pool");
    agt_db::migrate(&pool).await.expect("migrate");
    (dir, pool)
}

async fn seed(pool: &sqlx::SqlitePool, agent: &str, job: &str, status: RunStatus, offset_min: i64) {
    let mut run = NewRun::new(
        Uuid::new_v4(),
        format!("r-{agent}-{offset_min}"),
        agent,
        job,
        Utc::now() + Duration::minutes(offset_min),
    );
    run.status = status;
    agt_db::insert_run(pool, &run).await.expect("seed");
}

#[tokio::test]
async fn filter_by_agent_and_status() {
    let (_dir, pool) = test_pool().await;

    seed(&pool, "crawler", "scrape", RunStatus::Success, 0).await;
    seed(&pool, "crawler", "scrape", RunStatus::Failure, 1).await;
    seed(&pool, "indexer", "index", RunStatus::Failure, 2).await;

    let mut filter = RunFilter::new();
    filter.agent_name = Some("crawler".to_string());
    filter.status = Some(RunStatus::Failure);

    let rows = agt_db::query_runs(&pool, &filter).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].agent_name, "crawler");
    assert_eq!(rows[0].status, RunStatus::Failure);
}

#[tokio::test]
async fn results_ordered_created_at_desc() {
    let (_dir, pool) = test_pool().await;

    for i in 0..5 {
        seed(&pool, "crawler", "scrape", RunStatus::Running, i).await;
    }

    let rows = agt_db::query_runs(&pool, &RunFilter::new()).await.unwrap();
    assert_eq!(rows.len(), 5);
    for pair in rows.windows(2) {
        assert!(
            pair[0].created_at >= pair[1].created_at,
            "rows must be newest-first"
        );
    }
}

#[tokio::test]
async fn limit_and_offset_paginate() {
    let (_dir, pool) = test_pool().await;

    for i in 0..10 {
        seed(&pool, "crawler", "scrape", RunStatus::Running, i).await;
    }

    let mut filter = RunFilter::new();
    filter.limit = 4;
    let page1 = agt_db::query_runs(&pool, &filter).await.unwrap();
    assert_eq!(page1.len(), 4);

    filter.offset = 4;
    let page2 = agt_db::query_runs(&pool, &filter).await.unwrap();
    assert_eq!(page2.len(), 4);

    let ids1: Vec<_> = page1.iter().map(|r| r.id).collect();
    let ids2: Vec<_> = page2.iter().map(|r| r.id).collect();
    assert!(ids1.iter().all(|id| !ids2.contains(id)), "pages are disjoint");
}

#[tokio::test]
async fn start_time_bounds_are_inclusive() {
    let (_dir, pool) = test_pool().await;

    let base = Utc::now();
    for i in 0..3 {
        let run = NewRun::new(
            Uuid::new_v4(),
            format!("r{i}"),
            "crawler",
            "scrape",
            base + Duration::minutes(i * 10),
        );
        agt_db::insert_run(&pool, &run).await.unwrap();
    }

    let mut filter = RunFilter::new();
    filter.start_time_from = Some(base + Duration::minutes(10));
    filter.start_time_to = Some(base + Duration::minutes(20));

    let rows = agt_db::query_runs(&pool, &filter).await.unwrap();
    // The rows at exactly +10 and +20 minutes; boundary rows are included.
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn job_type_filter_matches_exactly() {
    let (_dir, pool) = test_pool().await;

    seed(&pool, "crawler", "scrape", RunStatus::Running, 0).await;
    seed(&pool, "crawler", "scrape-deep", RunStatus::Running, 1).await;

    let mut filter = RunFilter::new();
    filter.job_type = Some("scrape".to_string());
    let rows = agt_db::query_runs(&pool, &filter).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].job_type, "scrape");
}

#[tokio::test]
async fn distinct_enumeration_is_sorted() {
    let (_dir, pool) = test_pool().await;

    seed(&pool, "zeta", "index", RunStatus::Running, 0).await;
    seed(&pool, "alpha", "scrape", RunStatus::Running, 1).await;
    seed(&pool, "alpha", "scrape", RunStatus::Running, 2).await;

    let agents = agt_db::list_distinct_agents(&pool).await.unwrap();
    assert_eq!(agents, vec!["alpha".to_string(), "zeta".to_string()]);

    let jobs = agt_db::list_distinct_job_types(&pool).await.unwrap();
    assert_eq!(jobs, vec!["index".to_string(), "scrape".to_string()]);
}
