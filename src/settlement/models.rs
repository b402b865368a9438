use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{AppError, AppResult};

/// partner_id -> exact total for one settlement day
pub type SettlementAggregate = BTreeMap<i64, Decimal>;

/// One calendar day, `[start, end)`, in the configured business timezone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementWindow {
    pub settlement_date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SettlementWindow {
    /// The full day before `now`, as seen from `utc_offset_hours`
    pub fn previous_day(now: DateTime<Utc>, utc_offset_hours: i32) -> AppResult<Self> {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600).ok_or_else(|| {
            AppError::Config(format!("Invalid UTC offset: {} hours", utc_offset_hours))
        })?;

        let today = now.with_timezone(&offset).date_naive();
        let settlement_date = today
            .pred_opt()
            .ok_or_else(|| AppError::Internal(format!("No day before {}", today)))?;

        Self::for_date(settlement_date, offset)
    }

    pub fn for_date(settlement_date: NaiveDate, offset: FixedOffset) -> AppResult<Self> {
        let midnight = settlement_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AppError::Internal(format!("No midnight on {}", settlement_date)))?;
        let start = offset
            .from_local_datetime(&midnight)
            .single()
            .ok_or_else(|| AppError::Internal(format!("Ambiguous start of {}", settlement_date)))?
            .with_timezone(&Utc);

        Ok(Self {
            settlement_date,
            start,
            end: start + Duration::days(1),
        })
    }

    /// Last whole second of the window (23:59:59 local)
    pub fn end_inclusive(&self) -> DateTime<Utc> {
        self.end - Duration::seconds(1)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Persisted settlement row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub partner_id: i64,
    pub total_amount: Decimal,
    pub settlement_date: NaiveDate,
}

impl SettlementRecord {
    pub fn from_aggregate(aggregate: &SettlementAggregate, settlement_date: NaiveDate) -> Vec<Self> {
        aggregate
            .iter()
            .map(|(partner_id, total_amount)| SettlementRecord {
                partner_id: *partner_id,
                total_amount: *total_amount,
                settlement_date,
            })
            .collect()
    }
}

/// Per-row result reported by the settlement store, index-aligned with the input batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Written,
    Failed(String),
}

impl RowOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, RowOutcome::Failed(_))
    }
}

/// Outcome of one SettlementWriter call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    pub total_rows: usize,
    /// Sorted ascending, empty on full success
    pub failed_partner_ids: Vec<i64>,
}

impl WriteResult {
    pub fn is_success(&self) -> bool {
        self.failed_partner_ids.is_empty()
    }

    pub fn written_rows(&self) -> usize {
        self.total_rows - self.failed_partner_ids.len()
    }
}

/// Summary of a completed settlement run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub settlement_date: NaiveDate,
    pub window: SettlementWindow,
    pub payment_count: usize,
    pub partner_count: usize,
    pub rows_written: usize,
    pub elapsed_ms: u64,
}

/// What a scheduler tick did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Another instance holds the lock
    Skipped,
    Completed(RunReport),
}
