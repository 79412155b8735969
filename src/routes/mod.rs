use axum::Router;

use crate::pipeline::Pipeline;

mod get_scores;
mod health;
mod run_pipeline;

// ---

pub fn router(pipeline: Pipeline) -> Router {
    // ---
    Router::new()
        .merge(run_pipeline::router())
        .merge(get_scores::router())
        .merge(health::router())
        .with_state(pipeline)
}
