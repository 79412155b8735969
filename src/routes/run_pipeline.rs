use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::post, Json,
    Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::PipelineError;
use crate::pipeline::Pipeline;
use crate::PartitionKey;

// ---

pub fn router() -> Router<Pipeline> {
    // ---
    Router::new().route("/pipeline/run", post(handler))
}

/// Query parameters for a pipeline run
#[derive(Debug, Deserialize)]
pub struct RunQuery {
    /// Last day of the window (`YYYY-MM-DD`), defaults to today (UTC)
    as_of: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
struct RunFailure {
    error: String,
    unwritten: Vec<PartitionKey>,
}

async fn handler(
    Query(params): Query<RunQuery>,
    State(pipeline): State<Pipeline>,
) -> impl IntoResponse {
    // ---
    let as_of = params.as_of.unwrap_or_else(|| Utc::now().date_naive());
    info!(%as_of, "POST /pipeline/run");

    match pipeline.run(as_of).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => {
            let status = match e {
                PipelineError::RunInProgress => StatusCode::CONFLICT,
                PipelineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error!(%as_of, error = %e, unwritten = e.unwritten_keys().len(), "Pipeline run failed");
            let body = RunFailure {
                error: e.to_string(),
                unwritten: e.unwritten_keys().to_vec(),
            };
            (status, Json(body)).into_response()
        }
    }
}
