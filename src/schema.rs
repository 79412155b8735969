//! Database schema management for `herdwatch-health`.
//!
//! Ensures the tables the pipeline reads and writes exist before serving
//! requests. Applied once on startup from `main.rs` (EMBP: single gateway call).
//! `entities` and `sensor_readings` are owned by upstream systems; they are
//! created here only so a fresh database is usable.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Safe to call on every startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Entity catalog, maintained by the entity-management system
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            entity_id   TEXT PRIMARY KEY,
            external_id TEXT UNIQUE,
            species     TEXT,
            breed       TEXT,
            age_months  DOUBLE PRECISION
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Raw per-reading telemetry as ingested
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_readings (
            id                 BIGSERIAL PRIMARY KEY,
            entity_ref         TEXT        NOT NULL,
            timestamp          TIMESTAMPTZ NOT NULL,
            metrics            JSONB,
            battery_level      DOUBLE PRECISION,
            signal_strength    DOUBLE PRECISION,
            latitude           DOUBLE PRECISION,
            longitude          DOUBLE PRECISION,
            data_quality_score DOUBLE PRECISION,
            is_anomaly         BOOLEAN
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Daily scores, one row per (entity, day)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS health_scores (
            entity_id             TEXT        NOT NULL,
            date                  DATE        NOT NULL,
            avg_heart_rate        DOUBLE PRECISION,
            min_heart_rate        DOUBLE PRECISION,
            max_heart_rate        DOUBLE PRECISION,
            stddev_heart_rate     DOUBLE PRECISION,
            avg_temperature       DOUBLE PRECISION,
            min_temperature       DOUBLE PRECISION,
            max_temperature       DOUBLE PRECISION,
            stddev_temperature    DOUBLE PRECISION,
            avg_activity_level    DOUBLE PRECISION,
            total_step_count      DOUBLE PRECISION,
            total_lying_time      DOUBLE PRECISION,
            total_eating_time     DOUBLE PRECISION,
            total_rumination_time DOUBLE PRECISION,
            avg_data_quality      DOUBLE PRECISION,
            total_readings        BIGINT      NOT NULL,
            anomaly_count         BIGINT      NOT NULL,
            avg_battery_level     DOUBLE PRECISION,
            min_battery_level     DOUBLE PRECISION,
            avg_signal_strength   DOUBLE PRECISION,
            first_reading_at      TIMESTAMPTZ NOT NULL,
            last_reading_at       TIMESTAMPTZ NOT NULL,
            heart_rate_score      DOUBLE PRECISION NOT NULL,
            temperature_score     DOUBLE PRECISION NOT NULL,
            activity_score        DOUBLE PRECISION NOT NULL,
            rumination_score      DOUBLE PRECISION NOT NULL,
            data_quality_factor   DOUBLE PRECISION NOT NULL,
            anomaly_factor        DOUBLE PRECISION NOT NULL,
            health_score          DOUBLE PRECISION NOT NULL,
            health_status         TEXT        NOT NULL,
            anomaly_percentage    DOUBLE PRECISION,
            calculated_at         TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (entity_id, date)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Basic indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sensor_readings_timestamp
            ON sensor_readings (timestamp);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_health_scores_date_status
            ON health_scores (date, health_status);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
