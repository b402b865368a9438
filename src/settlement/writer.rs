// Settlement Writer - bulk-persists a day's aggregate
//
// Write Flow:
// 1. Turn the aggregate into rows (partner order)
// 2. One bulk insert per batch (or per chunk in parallel mode)
// 3. Map per-row failures back to partner ids
// 4. Any failed row turns the whole call into a BatchWrite error carrying the WriteResult

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::{SettlementError, StoreError};
use crate::settlement::models::{RowOutcome, SettlementAggregate, SettlementRecord, WriteResult};

/// Bulk persistence for settlement rows
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Insert all rows as one batch.
    ///
    /// `Ok` holds one outcome per input row. `StoreError::Batch` carries per-row
    /// outcomes when the backend could attribute failures to rows; a shorter
    /// outcome list means the trailing rows never committed.
    async fn insert_batch(&self, rows: &[SettlementRecord]) -> Result<Vec<RowOutcome>, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Single batch for the whole aggregate
    Bulk,
    /// Disjoint chunks written by a bounded pool of workers
    Parallel { workers: usize },
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub mode: WriteMode,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self { mode: WriteMode::Bulk }
    }
}

pub struct SettlementWriter {
    store: Arc<dyn SettlementStore>,
    config: WriterConfig,
}

impl SettlementWriter {
    pub fn new(store: Arc<dyn SettlementStore>, config: WriterConfig) -> Self {
        Self { store, config }
    }

    pub async fn write(
        &self,
        aggregate: &SettlementAggregate,
        settlement_date: NaiveDate,
    ) -> Result<WriteResult, SettlementError> {
        let rows = SettlementRecord::from_aggregate(aggregate, settlement_date);

        if rows.is_empty() {
            info!("✓ No settlement rows to write for {}", settlement_date);
            return Ok(WriteResult::default());
        }

        let mut failed_partner_ids = match self.config.mode {
            WriteMode::Bulk => self.write_chunk(&rows).await,
            WriteMode::Parallel { workers } => self.write_parallel(&rows, workers).await,
        };
        failed_partner_ids.sort_unstable();

        let result = WriteResult {
            total_rows: rows.len(),
            failed_partner_ids,
        };

        if result.is_success() {
            info!(
                "✓ Wrote {} settlement rows for {}",
                result.total_rows, settlement_date
            );
            Ok(result)
        } else {
            error!(
                "❌ Settlement batch for {} failed on {}/{} rows: {:?}",
                settlement_date,
                result.failed_partner_ids.len(),
                result.total_rows,
                result.failed_partner_ids
            );
            Err(SettlementError::BatchWrite { result })
        }
    }

    async fn write_parallel(&self, rows: &[SettlementRecord], workers: usize) -> Vec<i64> {
        let workers = workers.max(1);
        let chunk_size = rows.len().div_ceil(workers);

        debug!(
            "Writing {} settlement rows with {} workers ({} rows per chunk)",
            rows.len(),
            workers,
            chunk_size
        );

        // each worker owns its chunk so the fan-out future stays Send
        let per_chunk: Vec<Vec<i64>> = stream::iter(rows.chunks(chunk_size).map(<[_]>::to_vec))
            .map(|chunk| async move { self.write_chunk(&chunk).await })
            .buffer_unordered(workers)
            .collect()
            .await;

        per_chunk.into_iter().flatten().collect()
    }

    /// Failed partner ids of one batch
    async fn write_chunk(&self, rows: &[SettlementRecord]) -> Vec<i64> {
        match self.store.insert_batch(rows).await {
            Ok(outcomes) => failed_rows(rows, &outcomes),
            Err(StoreError::Batch { outcomes }) => failed_rows(rows, &outcomes),
            Err(StoreError::Unavailable(reason)) => {
                error!(
                    "❌ Settlement store unavailable, treating all {} rows as failed: {}",
                    rows.len(),
                    reason
                );
                rows.iter().map(|row| row.partner_id).collect()
            }
        }
    }
}

fn failed_rows(rows: &[SettlementRecord], outcomes: &[RowOutcome]) -> Vec<i64> {
    rows.iter()
        .enumerate()
        .filter_map(|(index, row)| match outcomes.get(index) {
            Some(RowOutcome::Written) => None,
            Some(RowOutcome::Failed(reason)) => {
                debug!("Settlement row for partner {} failed: {}", row.partner_id, reason);
                Some(row.partner_id)
            }
            None => Some(row.partner_id),
        })
        .collect()
}
