//! Configuration loader for the `herdwatch-health` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
//!
//! The scoring policy itself (bands, weights, ladders) is data loaded by
//! [`crate::thresholds::ScoringConfig::load`] from the file named by
//! `SCORING_CONFIG`.
use std::{env, net::SocketAddr, time::Duration};

use anyhow::{anyhow, Result};

use crate::sink::RetryPolicy;

/// Upper bound on `WINDOW_DAYS`, roughly a century of history.
const MAX_WINDOW_DAYS: u32 = 36_500;

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional boolean environment variable with a default value.
macro_rules! parse_env_bool {
    ($var_name:expr, $default:expr) => {
        match env::var($var_name).ok().as_deref() {
            None => $default,
            Some("1") | Some("true") | Some("yes") => true,
            Some("0") | Some("false") | Some("no") => false,
            Some(other) => return Err(anyhow!("Invalid {}: '{}'", $var_name, other)),
        }
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Address the HTTP server binds to.
    pub listen_addr: SocketAddr,

    /// Length of the trailing scoring window in days.
    pub window_days: u32,

    /// Number of scoring workers.
    pub worker_count: u32,

    /// Whole-run timeout in seconds.
    pub run_timeout_secs: u32,

    /// Sink write attempts per run before the run fails.
    pub sink_max_attempts: u32,

    /// Base backoff between sink write attempts, in milliseconds.
    pub sink_retry_backoff_ms: u32,

    /// Optional path to a JSON scoring policy.
    pub scoring_config_path: Option<String>,

    /// Recompute the window once at startup.
    pub run_on_startup: bool,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `LISTEN_ADDR` – HTTP bind address (default: 0.0.0.0:8080)
/// - `WINDOW_DAYS` – trailing window length, 1 to 36500 (default: 90)
/// - `WORKER_COUNT` – scoring workers (default: available parallelism)
/// - `RUN_TIMEOUT_SECS` – whole-run timeout (default: 600)
/// - `SINK_MAX_ATTEMPTS` – sink write attempts (default: 3)
/// - `SINK_RETRY_BACKOFF_MS` – base retry backoff (default: 500)
/// - `SCORING_CONFIG` – JSON scoring policy path (default: built-in policy)
/// - `RUN_ON_STARTUP` – run once at boot (default: false)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let listen_addr = env::var("LISTEN_ADDR")
        .ok()
        .map(|v| v.parse::<SocketAddr>())
        .transpose()
        .map_err(|e| anyhow!("Invalid LISTEN_ADDR: {}", e))?
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));
    let window_days = check_window_days(parse_env_u32!("WINDOW_DAYS", 90))?;
    let worker_count = parse_env_u32!("WORKER_COUNT", default_worker_count());
    let run_timeout_secs = parse_env_u32!("RUN_TIMEOUT_SECS", 600);
    let sink_max_attempts = parse_env_u32!("SINK_MAX_ATTEMPTS", 3);
    let sink_retry_backoff_ms = parse_env_u32!("SINK_RETRY_BACKOFF_MS", 500);
    let scoring_config_path = env::var("SCORING_CONFIG").ok().filter(|p| !p.is_empty());
    let run_on_startup = parse_env_bool!("RUN_ON_STARTUP", false);

    if worker_count == 0 {
        return Err(anyhow!("WORKER_COUNT must be at least 1"));
    }

    Ok(Config {
        db_url,
        db_pool_max,
        listen_addr,
        window_days,
        worker_count,
        run_timeout_secs,
        sink_max_attempts,
        sink_retry_backoff_ms,
        scoring_config_path,
        run_on_startup,
    })
}

fn check_window_days(days: u32) -> Result<u32> {
    if !(1..=MAX_WINDOW_DAYS).contains(&days) {
        return Err(anyhow!(
            "WINDOW_DAYS must be between 1 and {}, got {}",
            MAX_WINDOW_DAYS,
            days
        ));
    }
    Ok(days)
}

fn default_worker_count() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(4)
}

impl Config {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.run_timeout_secs))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.sink_max_attempts,
            backoff: Duration::from_millis(u64::from(self.sink_retry_backoff_ms)),
        }
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL          : {}", mask_db_url(&self.db_url));
        tracing::info!("  DB_POOL_MAX           : {}", self.db_pool_max);
        tracing::info!("  LISTEN_ADDR           : {}", self.listen_addr);
        tracing::info!("  WINDOW_DAYS           : {}", self.window_days);
        tracing::info!("  WORKER_COUNT          : {}", self.worker_count);
        tracing::info!("  RUN_TIMEOUT_SECS      : {}", self.run_timeout_secs);
        tracing::info!("  SINK_MAX_ATTEMPTS     : {}", self.sink_max_attempts);
        tracing::info!("  SINK_RETRY_BACKOFF_MS : {}", self.sink_retry_backoff_ms);
        tracing::info!(
            "  SCORING_CONFIG        : {}",
            self.scoring_config_path.as_deref().unwrap_or("<built-in>")
        );
        tracing::info!("  RUN_ON_STARTUP        : {}", self.run_on_startup);
    }
}

/// Mask the password in a database URL.
fn mask_db_url(db_url: &str) -> String {
    // ---
    let Some(at_pos) = db_url.rfind('@') else {
        return db_url.to_string();
    };
    match db_url[..at_pos].rfind(':') {
        // The scheme separator is not a password separator
        Some(colon_pos) if !db_url[colon_pos..].starts_with("://") => {
            format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..])
        }
        _ => db_url.to_string(),
    }
}
