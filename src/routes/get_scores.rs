use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{debug, error};

use crate::pipeline::Pipeline;
use crate::{HealthScoreRecord, HealthStatus};

// ---

const DEFAULT_LIMIT: u32 = 1000;

pub fn router() -> Router<Pipeline> {
    // ---
    Router::new().route("/scores", get(handler))
}

/// Query parameters for filtering stored scores
#[derive(Debug, Deserialize)]
pub struct ScoresQuery {
    entity_id: Option<String>,
    date: Option<NaiveDate>,
    status: Option<HealthStatus>,
    limit: Option<u32>,
}

async fn handler(
    Query(params): Query<ScoresQuery>,
    State(pipeline): State<Pipeline>,
) -> impl IntoResponse {
    // ---
    debug!("GET /scores - {:?}", params);

    match fetch_scores(pipeline.pool(), &params).await {
        Ok(scores) => (StatusCode::OK, Json(scores)).into_response(),
        Err(e) => {
            error!("Failed to query scores: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json("Failed to query scores"),
            )
                .into_response()
        }
    }
}

async fn fetch_scores(
    pool: &PgPool,
    params: &ScoresQuery,
) -> Result<Vec<HealthScoreRecord>, sqlx::Error> {
    // ---
    sqlx::query_as(
        r#"
        SELECT *
        FROM health_scores
        WHERE ($1::text IS NULL OR entity_id = $1)
          AND ($2::date IS NULL OR date = $2)
          AND ($3::text IS NULL OR health_status = $3)
        ORDER BY date DESC, entity_id
        LIMIT $4
        "#,
    )
    .bind(params.entity_id.as_deref())
    .bind(params.date)
    .bind(params.status.map(|s| s.as_str()))
    .bind(i64::from(params.limit.unwrap_or(DEFAULT_LIMIT)))
    .fetch_all(pool)
    .await
}
