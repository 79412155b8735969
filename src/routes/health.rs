// src/routes/health.rs
//! Liveness endpoint for the health-score service.
//!
//! Used by container orchestrators and CI to check that the service responds
//! and can still reach its database. Follows the Explicit Module Boundary
//! Pattern (EMBP): the handler stays private, the gateway (`mod.rs`) merges
//! the subrouter.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::pipeline::Pipeline;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
}

/// Handle `GET /health`.
///
/// Always answers `200`; `database` reports whether a trivial query
/// succeeds, so a degraded database is visible without failing liveness.
async fn health(State(pipeline): State<Pipeline>) -> Json<HealthResponse> {
    let database = match sqlx::query("SELECT 1").execute(pipeline.pool()).await {
        Ok(_) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach the database");
            "unavailable"
        }
    };
    Json(HealthResponse {
        status: "ok",
        database,
    })
}

pub fn router() -> Router<Pipeline> {
    Router::new().route("/health", get(health))
}
