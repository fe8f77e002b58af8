//! agt-server entry point.
//!
//! Startup is fail-fast: invalid configuration (workers != 1), a held
//! writer lock, migration failure, pragma mismatch, and bind failure all
//! exit nonzero before the socket binds.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

use agt_config::TelemetryConfig;
use agt_db::SingleWriterGuard;
use agt_server::{routes, state};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    let cfg = TelemetryConfig::from_env().context("invalid configuration")?;
    init_tracing(&cfg.log_level);

    // Single-writer invariant, part 1: exactly one ingestion process. The
    // guard must be held before the pool opens and is released on exit.
    let _writer_guard = SingleWriterGuard::acquire(cfg.lock_path())
        .context("failed to acquire the writer lock")?;
    info!(lock = ?cfg.lock_path(), "writer lock acquired");

    let db_opts = agt_db::DbOptions {
        path: cfg.db_path.clone(),
        journal_mode: cfg.journal_mode.clone(),
        synchronous: cfg.synchronous.clone(),
        busy_timeout_ms: cfg.busy_timeout_ms,
    };

    let write_pool = agt_db::open_write_pool(&db_opts).await?;
    agt_db::migrate(&write_pool)
        .await
        .context("schema migration failed")?;

    let read_pool = agt_db::open_read_pool(&db_opts, 4).await?;

    // Single-writer invariant, part 2: the pragma contract must hold on
    // both pools before the first request is accepted.
    let pragmas = agt_db::verify_pragmas(&write_pool, &db_opts).await?;
    agt_db::verify_pragmas(&read_pool, &db_opts).await?;
    info!(
        journal_mode = %pragmas.journal_mode,
        synchronous = %pragmas.synchronous,
        busy_timeout_ms = pragmas.busy_timeout_ms,
        "store pragmas verified"
    );

    let addr = cfg.bind_addr()?;
    let shared = Arc::new(state::AppState::new(cfg, write_pool, read_pool));

    let app = routes::build_router(Arc::clone(&shared)).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("agt-server listening on http://{addr}");

    // Graceful shutdown: stop accepting, drain in-flight handlers up to
    // 30 s, then terminate. The writer lock releases when main returns.
    let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!("shutdown signal received; draining");
        let _ = drain_tx.send(());
    });

    let mut server_task = tokio::spawn(async move { server.await });
    let drain_deadline = async {
        let _ = drain_rx.await;
        tokio::time::sleep(Duration::from_secs(30)).await;
    };

    tokio::select! {
        res = &mut server_task => {
            res.context("server task panicked")?
                .context("server crashed")?;
        }
        _ = drain_deadline => {
            warn!("drain deadline reached; terminating in-flight requests");
            server_task.abort();
        }
    }

    info!("agt-server stopped");
    Ok(())
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
