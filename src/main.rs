//! Application entry point for the `herdwatch-health` service.
//!
//! This binary turns livestock sensor telemetry into daily per-animal health
//! scores. The startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Loading and validating the scoring policy
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool
//! - Creating the database schema if it does not exist
//! - Optionally recomputing the scoring window once
//! - Mounting the operational API routes via the `routes` gateway (EMBP pattern)
//! - Binding the Axum HTTP server and serving requests
//!
//! The nightly recompute is triggered externally through `POST /pipeline/run`.
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string
//! - `LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `LOG_SPAN_EVENTS` (optional) – span event mode for tracing
//! - see [`config::load_from_env`] for the pipeline settings
//!
//! This module follows the Explicit Module Boundary Pattern (EMBP) by
//! delegating schema setup to `schema`, configuration parsing to `config`,
//! run orchestration to `pipeline` and route registration to `routes`.
use std::env;

use anyhow::{Context, Result};
use axum::Router;
use chrono::Utc;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

mod aggregator;
mod catalog;
mod config;
mod error;
mod models;
mod pipeline;
mod routes;
mod schema;
mod scoring;
mod sink;
mod telemetry;
mod thresholds;

pub use config::Config;
pub use thresholds::ScoringConfig;

// Shared data types are re-exported here so sibling modules depend on their
// parent (main.rs) rather than on each other's files.
pub use models::{
    DailyAggregate, Entity, HealthScoreRecord, HealthStatus, PartitionKey, RawReading, Reading,
    Window,
};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let scoring = ScoringConfig::load(cfg.scoring_config_path.as_deref())
        .context("Failed to load scoring policy")?;
    tracing::info!(
        species = scoring.species.len(),
        "Scoring policy loaded and validated"
    );

    tracing::info!("Attempting to connect to database");

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let addr = cfg.listen_addr;
    let run_on_startup = cfg.run_on_startup;
    let pipeline = pipeline::Pipeline::new(pool, cfg, scoring);

    if run_on_startup {
        let as_of = Utc::now().date_naive();
        match pipeline.run(as_of).await {
            Ok(summary) => tracing::info!(
                run_id = %summary.run_id,
                records = summary.records_written,
                "Startup run complete"
            ),
            Err(e) => tracing::error!(
                error = %e,
                unwritten = e.unwritten_keys().len(),
                "Startup run failed"
            ),
        }
    }

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(pipeline);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `LOG_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, falling back to `LOG_LEVEL`
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("LOG_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
