//! Run orchestration for the telemetry-to-score pipeline.
//!
//! A run recomputes every score in the trailing window ending on an explicit
//! `as_of` date:
//! - Load the entity catalog and the raw readings for the window
//! - Normalize, then partition by (entity, day)
//! - Fold and score each partition on a bounded pool of blocking workers
//!   pulling from a shared queue
//! - Hand the full record set to the score sink as one window replacement
//!
//! The whole run is bounded by a timeout and runs are serialized. A run that
//! fails or times out writes nothing.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::aggregator::{self, Partition};
use crate::catalog::EntityCatalog;
use crate::error::PipelineError;
use crate::scoring::score_aggregate;
use crate::sink::{write_with_retry, PgScoreSink};
use crate::telemetry::{fetch_raw_readings, normalize_all, NormalizeStats};
use crate::{Config, HealthScoreRecord, ScoringConfig, Window};

// ---

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub as_of: NaiveDate,
    pub window: Window,
    pub entities: usize,
    pub readings_fetched: usize,
    pub normalization: NormalizeStats,
    pub partitions: usize,
    pub records_written: usize,
    pub status_counts: BTreeMap<&'static str, usize>,
    pub duration_ms: u64,
}

/// Shared handle to the pipeline and its collaborators.
#[derive(Clone)]
pub struct Pipeline {
    pool: PgPool,
    sink: PgScoreSink,
    config: Config,
    scoring: Arc<ScoringConfig>,
    run_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Pipeline {
    pub fn new(pool: PgPool, config: Config, scoring: ScoringConfig) -> Self {
        Self {
            sink: PgScoreSink::new(pool.clone()),
            pool,
            config,
            scoring: Arc::new(scoring),
            run_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Recompute the window ending on `as_of`.
    ///
    /// Fails with [`PipelineError::RunInProgress`] instead of queueing when
    /// another run holds the lock.
    pub async fn run(&self, as_of: NaiveDate) -> Result<RunSummary, PipelineError> {
        // ---
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| PipelineError::RunInProgress)?;

        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id, %as_of);
        let timeout = self.config.run_timeout();

        match tokio::time::timeout(timeout, self.run_window(run_id, as_of))
            .instrument(span)
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(%run_id, %as_of, "Pipeline run timed out");
                Err(PipelineError::Timeout {
                    secs: timeout.as_secs(),
                })
            }
        }
    }

    async fn run_window(&self, run_id: Uuid, as_of: NaiveDate) -> Result<RunSummary, PipelineError> {
        // ---
        let started = Instant::now();
        let window = Window::trailing(as_of, self.config.window_days);
        info!(start = %window.start, end = %window.end, "Starting pipeline run");

        // Step 1: inputs
        let catalog = EntityCatalog::load(&self.pool).await?;
        if catalog.is_empty() {
            warn!("Entity catalog is empty, every reading will be rejected");
        }
        for entity in catalog.unrecognized_species(&self.scoring) {
            warn!(
                entity_id = %entity.entity_id,
                species = ?entity.species,
                "Species not in scoring table, using neutral policy"
            );
        }
        let raw = fetch_raw_readings(&self.pool, &window).await?;

        // Step 2: normalize and partition
        let (readings, normalization) = normalize_all(&raw, &catalog);
        let partitions = aggregator::partition(readings, &window);
        let partition_count = partitions.len();
        debug!(partitions = partition_count, "Partitioned readings");

        // Step 3: aggregate and score
        let entities = catalog.len();
        let records = score_partitions(
            partitions,
            Arc::new(catalog),
            Arc::clone(&self.scoring),
            self.config.worker_count as usize,
            Utc::now(),
        )
        .await?;

        // Step 4: replace the window in the sink
        let records_written =
            write_with_retry(&self.sink, &window, &records, self.config.retry_policy()).await?;

        let summary = RunSummary {
            run_id,
            as_of,
            window,
            entities,
            readings_fetched: raw.len(),
            normalization,
            partitions: partition_count,
            records_written,
            status_counts: status_counts(&records),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            records = summary.records_written,
            duration_ms = summary.duration_ms,
            "Pipeline run complete"
        );
        Ok(summary)
    }
}

/// Fold and score partitions on `workers` blocking workers.
///
/// Each worker takes the next partition from a shared queue, aggregates it
/// and scores the aggregate before taking another. Records come back sorted
/// by (entity_id, date) regardless of worker scheduling.
pub async fn score_partitions(
    partitions: Vec<Partition>,
    catalog: Arc<EntityCatalog>,
    scoring: Arc<ScoringConfig>,
    workers: usize,
    calculated_at: DateTime<Utc>,
) -> Result<Vec<HealthScoreRecord>, PipelineError> {
    // ---
    let worker_count = workers.clamp(1, partitions.len().max(1));
    let queue = Arc::new(Mutex::new(partitions.into_iter()));

    let mut handles = Vec::with_capacity(worker_count);
    for worker in 0..worker_count {
        let queue = Arc::clone(&queue);
        let catalog = Arc::clone(&catalog);
        let scoring = Arc::clone(&scoring);
        let span = tracing::Span::current();

        handles.push(tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            let mut scored = Vec::new();
            loop {
                let next = queue.lock().unwrap_or_else(PoisonError::into_inner).next();
                let Some(partition) = next else {
                    break;
                };
                // Empty partitions have no aggregate and are never scored
                if let Some(aggregate) = aggregator::aggregate(&partition) {
                    let entity = catalog.get(&aggregate.entity_id);
                    scored.push(score_aggregate(aggregate, entity, &scoring, calculated_at));
                }
            }
            debug!(worker, scored = scored.len(), "Scoring worker finished");
            scored
        }));
    }

    let mut records = Vec::new();
    for handle in handles {
        records.extend(handle.await?);
    }
    records.sort_by(|a, b| {
        (&a.aggregate.entity_id, a.aggregate.date).cmp(&(&b.aggregate.entity_id, b.aggregate.date))
    });
    Ok(records)
}

fn status_counts(records: &[HealthScoreRecord]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.health_status.as_str()).or_insert(0) += 1;
    }
    counts
}
