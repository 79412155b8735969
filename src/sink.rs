//! Score sink: persists a run's scores for its window.
//!
//! A run hands over the complete set of records for its window. The sink
//! replaces the window as a unit and upserts by (entity_id, date), so reruns
//! overwrite earlier scores and a failed write leaves the previous scores in
//! place. Failed writes are retried with the same records; after the last
//! attempt the caller gets every key that was not written.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::{HealthScoreRecord, Window};

// ---

pub trait ScoreSink: Send + Sync {
    /// Atomically replace every score inside `window` with `records`.
    fn replace_window(
        &self,
        window: &Window,
        records: &[HealthScoreRecord],
    ) -> impl Future<Output = Result<()>> + Send;
}

/// How often and how patiently a run retries its sink write.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
}

/// Write a run's records, retrying the whole batch on failure.
pub async fn write_with_retry<S: ScoreSink>(
    sink: &S,
    window: &Window,
    records: &[HealthScoreRecord],
    policy: RetryPolicy,
) -> Result<usize, PipelineError> {
    // ---
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match sink.replace_window(window, records).await {
            Ok(()) => {
                info!(records = records.len(), attempt, "Score window replaced");
                return Ok(records.len());
            }
            Err(e) if attempt < max_attempts => {
                warn!(attempt, max_attempts, error = %e, "Score sink write failed, retrying");
                tokio::time::sleep(policy.backoff * attempt).await;
            }
            Err(e) => {
                return Err(PipelineError::SinkWrite {
                    attempts: attempt,
                    keys: records.iter().map(HealthScoreRecord::key).collect(),
                    last_error: format!("{:#}", e),
                });
            }
        }
    }
}

// ---

/// Postgres-backed sink writing to `health_scores`.
#[derive(Debug, Clone)]
pub struct PgScoreSink {
    pool: PgPool,
}

impl PgScoreSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ScoreSink for PgScoreSink {
    async fn replace_window(&self, window: &Window, records: &[HealthScoreRecord]) -> Result<()> {
        // ---
        let mut tx = self.pool.begin().await?;

        // Days in the window that produced no record this run lose their
        // stale score.
        sqlx::query("DELETE FROM health_scores WHERE date >= $1 AND date <= $2")
            .bind(window.start)
            .bind(window.end)
            .execute(&mut *tx)
            .await?;

        for record in records {
            upsert_record(&mut tx, record).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

async fn upsert_record(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    record: &HealthScoreRecord,
) -> Result<(), sqlx::Error> {
    // ---
    let a = &record.aggregate;
    sqlx::query(
        r#"
        INSERT INTO health_scores (
            entity_id, date,
            avg_heart_rate, min_heart_rate, max_heart_rate, stddev_heart_rate,
            avg_temperature, min_temperature, max_temperature, stddev_temperature,
            avg_activity_level, total_step_count, total_lying_time,
            total_eating_time, total_rumination_time,
            avg_data_quality, total_readings, anomaly_count,
            avg_battery_level, min_battery_level, avg_signal_strength,
            first_reading_at, last_reading_at,
            heart_rate_score, temperature_score, activity_score, rumination_score,
            data_quality_factor, anomaly_factor,
            health_score, health_status, anomaly_percentage, calculated_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
            $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33
        )
        ON CONFLICT (entity_id, date) DO UPDATE SET
            avg_heart_rate        = EXCLUDED.avg_heart_rate,
            min_heart_rate        = EXCLUDED.min_heart_rate,
            max_heart_rate        = EXCLUDED.max_heart_rate,
            stddev_heart_rate     = EXCLUDED.stddev_heart_rate,
            avg_temperature       = EXCLUDED.avg_temperature,
            min_temperature       = EXCLUDED.min_temperature,
            max_temperature       = EXCLUDED.max_temperature,
            stddev_temperature    = EXCLUDED.stddev_temperature,
            avg_activity_level    = EXCLUDED.avg_activity_level,
            total_step_count      = EXCLUDED.total_step_count,
            total_lying_time      = EXCLUDED.total_lying_time,
            total_eating_time     = EXCLUDED.total_eating_time,
            total_rumination_time = EXCLUDED.total_rumination_time,
            avg_data_quality      = EXCLUDED.avg_data_quality,
            total_readings        = EXCLUDED.total_readings,
            anomaly_count         = EXCLUDED.anomaly_count,
            avg_battery_level     = EXCLUDED.avg_battery_level,
            min_battery_level     = EXCLUDED.min_battery_level,
            avg_signal_strength   = EXCLUDED.avg_signal_strength,
            first_reading_at      = EXCLUDED.first_reading_at,
            last_reading_at       = EXCLUDED.last_reading_at,
            heart_rate_score      = EXCLUDED.heart_rate_score,
            temperature_score     = EXCLUDED.temperature_score,
            activity_score        = EXCLUDED.activity_score,
            rumination_score      = EXCLUDED.rumination_score,
            data_quality_factor   = EXCLUDED.data_quality_factor,
            anomaly_factor        = EXCLUDED.anomaly_factor,
            health_score          = EXCLUDED.health_score,
            health_status         = EXCLUDED.health_status,
            anomaly_percentage    = EXCLUDED.anomaly_percentage,
            calculated_at         = EXCLUDED.calculated_at
        "#,
    )
    .bind(&a.entity_id)
    .bind(a.date)
    .bind(a.avg_heart_rate)
    .bind(a.min_heart_rate)
    .bind(a.max_heart_rate)
    .bind(a.stddev_heart_rate)
    .bind(a.avg_temperature)
    .bind(a.min_temperature)
    .bind(a.max_temperature)
    .bind(a.stddev_temperature)
    .bind(a.avg_activity_level)
    .bind(a.total_step_count)
    .bind(a.total_lying_time)
    .bind(a.total_eating_time)
    .bind(a.total_rumination_time)
    .bind(a.avg_data_quality)
    .bind(a.total_readings)
    .bind(a.anomaly_count)
    .bind(a.avg_battery_level)
    .bind(a.min_battery_level)
    .bind(a.avg_signal_strength)
    .bind(a.first_reading_at)
    .bind(a.last_reading_at)
    .bind(record.heart_rate_score)
    .bind(record.temperature_score)
    .bind(record.activity_score)
    .bind(record.rumination_score)
    .bind(record.data_quality_factor)
    .bind(record.anomaly_factor)
    .bind(record.health_score)
    .bind(record.health_status.as_str())
    .bind(record.anomaly_percentage)
    .bind(record.calculated_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
