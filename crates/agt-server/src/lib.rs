//! AgentTrack ingestion service.
//!
//! Axum HTTP surface over the embedded store. `routes::build_router` is the
//! single entry point; `main.rs` performs the startup sequence (config,
//! writer lock, migrations, pragma verification) and attaches tracing
//! middleware. Handlers are `pub(crate)` so the scenario tests in `tests/`
//! can compose the router directly.

pub mod api_types;
pub mod cache;
pub mod error;
pub mod giturl;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod validate;
