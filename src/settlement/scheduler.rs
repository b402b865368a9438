// Settlement Scheduler - computes yesterday's per-partner settlement
//
// Run Flow (one run per lock acquisition):
// 1. Acquire the cluster-wide lock, skip the tick if another instance has it
// 2. Compute the window for the previous calendar day
// 3. Load paid payments, aggregate by partner, bulk write
// 4. Notify failed partners, if any
// 5. Release the lock on every exit path
//
// Cadence is independent of the business window: daily at a fixed UTC hour
// (recommended, off-peak) or a fixed interval.

use chrono::{DateTime, TimeZone, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{AppResult, SettlementError};
use crate::lock::LockService;
use crate::payment::{PaymentQuery, PaymentStatus};
use crate::settlement::aggregator::aggregate;
use crate::settlement::models::{RunOutcome, RunReport, SettlementWindow};
use crate::settlement::notifier::FailureNotifier;
use crate::settlement::writer::SettlementWriter;

/// Settlement schedule configuration
#[derive(Debug, Clone)]
pub struct SettlementScheduleConfig {
    pub frequency: SettlementFrequency,
    /// Cluster-wide lock name shared by every instance
    pub lock_name: String,
    /// Lock lease, also the upper bound of one run
    pub lock_lease: Duration,
    /// Business timezone used to cut calendar days
    pub utc_offset_hours: i32,
    pub notify_timeout: Duration,
}

impl Default for SettlementScheduleConfig {
    fn default() -> Self {
        Self {
            frequency: SettlementFrequency::Daily { execution_hour: 2 },
            lock_name: "ScheduledTask_run".to_string(),
            lock_lease: Duration::from_secs(600),
            utc_offset_hours: 0,
            notify_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementFrequency {
    /// Once per day at `execution_hour`:00 UTC
    Daily { execution_hour: u32 },
    Interval { every: Duration },
}

/// Settlement scheduler - coordinates the daily settlement run across instances
pub struct SettlementScheduler {
    config: SettlementScheduleConfig,
    locks: Arc<dyn LockService>,
    payments: Arc<dyn PaymentQuery>,
    writer: Arc<SettlementWriter>,
    notifier: Arc<dyn FailureNotifier>,
}

impl SettlementScheduler {
    pub fn new(
        config: SettlementScheduleConfig,
        locks: Arc<dyn LockService>,
        payments: Arc<dyn PaymentQuery>,
        writer: Arc<SettlementWriter>,
        notifier: Arc<dyn FailureNotifier>,
    ) -> Self {
        Self {
            config,
            locks,
            payments,
            writer,
            notifier,
        }
    }

    /// Start the settlement scheduler (runs in background)
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = self.clone();

        tokio::spawn(async move {
            match scheduler.config.frequency {
                SettlementFrequency::Daily { execution_hour } => {
                    scheduler.run_daily_scheduler(execution_hour).await
                }
                SettlementFrequency::Interval { every } => {
                    scheduler.run_interval_scheduler(every).await
                }
            }
        })
    }

    /// Entry point for one tick. Safe to call while another instance holds the lock.
    pub async fn run_once(&self) -> AppResult<RunOutcome> {
        self.run_once_at(Utc::now()).await
    }

    pub async fn run_once_at(&self, now: DateTime<Utc>) -> AppResult<RunOutcome> {
        let lease = self.config.lock_lease;

        let token = match self.locks.acquire(&self.config.lock_name, lease).await? {
            Some(token) => token,
            None => {
                info!(
                    "⏭️ Settlement lock {} held elsewhere, skipping tick",
                    self.config.lock_name
                );
                return Ok(RunOutcome::Skipped);
            }
        };

        debug!("🔒 Acquired {} until {}", token.name, token.locked_until);

        let critical = AssertUnwindSafe(self.settle(now)).catch_unwind();
        let result = match tokio::time::timeout(lease, critical).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(SettlementError::Panicked(panic_message(panic.as_ref())).into()),
            Err(_) => Err(SettlementError::LeaseExceeded {
                lease_secs: lease.as_secs(),
            }
            .into()),
        };

        if let Err(e) = self.locks.release(&token).await {
            error!("❌ Failed to release settlement lock {}: {:?}", token.name, e);
        } else {
            debug!("🔓 Released {}", token.name);
        }

        result
    }

    /// Query, aggregate and write one settlement day. Runs under the lock.
    async fn settle(&self, now: DateTime<Utc>) -> AppResult<RunOutcome> {
        let started = Instant::now();
        let window = SettlementWindow::previous_day(now, self.config.utc_offset_hours)?;

        info!(
            "🔄 Starting settlement for {} ({} .. {})",
            window.settlement_date,
            window.start,
            window.end_inclusive()
        );

        let payments = self
            .payments
            .find(PaymentStatus::Paid, window.start, window.end)
            .await
            .map_err(|e| SettlementError::Query(e.to_string()))?;

        let settlements = aggregate(&payments);
        info!(
            "📊 Aggregated {} payments into {} partner settlements",
            payments.len(),
            settlements.len()
        );

        let written = self.writer.write(&settlements, window.settlement_date).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match written {
            Ok(result) => {
                info!(
                    "✓ Settlement for {} completed in {} ms",
                    window.settlement_date, elapsed_ms
                );
                Ok(RunOutcome::Completed(RunReport {
                    settlement_date: window.settlement_date,
                    window,
                    payment_count: payments.len(),
                    partner_count: settlements.len(),
                    rows_written: result.written_rows(),
                    elapsed_ms,
                }))
            }
            Err(e) => {
                error!(
                    "❌ Settlement for {} failed after {} ms: {}",
                    window.settlement_date, elapsed_ms, e
                );
                let failed = e.failed_partner_ids();
                if !failed.is_empty() {
                    self.notify_failure(window.settlement_date, failed).await;
                }
                Err(e.into())
            }
        }
    }

    async fn notify_failure(&self, settlement_date: chrono::NaiveDate, failed: &[i64]) {
        let notified = tokio::time::timeout(
            self.config.notify_timeout,
            self.notifier.notify(settlement_date, failed),
        )
        .await;

        match notified {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("⚠️ Settlement failure notification failed: {}", e),
            Err(_) => warn!(
                "⚠️ Settlement failure notification timed out after {:?}",
                self.config.notify_timeout
            ),
        }
    }

    async fn run_tick(&self) {
        match self.run_once().await {
            Ok(RunOutcome::Skipped) => {}
            Ok(RunOutcome::Completed(report)) => info!(
                "✓ Settlement cycle completed: {} rows for {}",
                report.rows_written, report.settlement_date
            ),
            Err(e) => error!("❌ Settlement cycle failed: {}", e),
        }
    }

    /// Daily scheduler - runs once per day at configured hour
    async fn run_daily_scheduler(&self, execution_hour: u32) {
        let mut last_slot: Option<DateTime<Utc>> = None;

        loop {
            let now = Utc::now();
            let Some(next_execution) = Self::next_daily_slot(now, execution_hour, last_slot) else {
                error!("❌ Invalid settlement execution hour {}, scheduler stopped", execution_hour);
                return;
            };

            info!(
                "⏰ Next settlement scheduled for: {} UTC",
                next_execution.format("%Y-%m-%d %H:%M:%S")
            );

            // negative once the slot is reached
            if let Ok(wait) = next_execution.signed_duration_since(now).to_std() {
                tokio::time::sleep(wait).await;
            }

            self.run_tick().await;
            last_slot = Some(next_execution);
        }
    }

    /// Next daily slot, strictly after the slot that last ran
    fn next_daily_slot(
        now: DateTime<Utc>,
        execution_hour: u32,
        last_slot: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let next = Self::calculate_next_daily_execution(now, execution_hour)?;
        match last_slot {
            Some(last) if next <= last => Self::calculate_next_daily_execution(last, execution_hour),
            _ => Some(next),
        }
    }

    /// Interval scheduler - ticks never overlap, late ticks are dropped
    async fn run_interval_scheduler(&self, every: Duration) {
        let mut interval = interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            self.run_tick().await;
        }
    }

    /// Calculate next daily execution time
    fn calculate_next_daily_execution(now: DateTime<Utc>, execution_hour: u32) -> Option<DateTime<Utc>> {
        let today = Utc.from_utc_datetime(&now.date_naive().and_hms_opt(execution_hour, 0, 0)?);

        // If execution time has passed today, schedule for tomorrow
        if today <= now {
            let tomorrow = now.date_naive().succ_opt()?;
            Some(Utc.from_utc_datetime(&tomorrow.and_hms_opt(execution_hour, 0, 0)?))
        } else {
            Some(today)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{Datelike, NaiveDate, Timelike};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::error::{AppError, StoreError};
    use crate::lock::InMemoryLockService;
    use crate::payment::PaymentRecord;
    use crate::settlement::aggregator::tests::payment;
    use crate::settlement::models::{RowOutcome, SettlementRecord};
    use crate::settlement::notifier::tests::RecordingNotifier;
    use crate::settlement::writer::tests::MemoryStore;
    use crate::settlement::writer::{SettlementStore, WriterConfig};

    /// Filters by status and window like the SQL query does
    #[derive(Default)]
    struct MemoryPayments {
        records: Vec<PaymentRecord>,
        calls: Mutex<usize>,
        fail: bool,
    }

    #[async_trait]
    impl PaymentQuery for MemoryPayments {
        async fn find(
            &self,
            status: PaymentStatus,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> AppResult<Vec<PaymentRecord>> {
            *self.calls.lock() += 1;
            if self.fail {
                return Err(AppError::Internal("replica lag".into()));
            }
            Ok(self
                .records
                .iter()
                .filter(|r| r.status == status && start <= r.payment_date && r.payment_date < end)
                .cloned()
                .collect())
        }

        async fn find_by_imp_uid(&self, imp_uid: &str) -> AppResult<Option<PaymentRecord>> {
            Ok(self.records.iter().find(|r| r.imp_uid == imp_uid).cloned())
        }
    }

    struct PanickingStore;

    #[async_trait]
    impl SettlementStore for PanickingStore {
        async fn insert_batch(&self, _rows: &[SettlementRecord]) -> Result<Vec<RowOutcome>, StoreError> {
            panic!("driver bug after partial write");
        }
    }

    struct Harness {
        scheduler: SettlementScheduler,
        locks: Arc<InMemoryLockService>,
        payments: Arc<MemoryPayments>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness(payments: MemoryPayments, store: Arc<dyn SettlementStore>) -> Harness {
        let locks = Arc::new(InMemoryLockService::new());
        let payments = Arc::new(payments);
        let notifier = Arc::new(RecordingNotifier::default());
        let writer = Arc::new(SettlementWriter::new(store, WriterConfig::default()));
        let scheduler = SettlementScheduler::new(
            SettlementScheduleConfig {
                notify_timeout: Duration::from_millis(200),
                ..Default::default()
            },
            locks.clone(),
            payments.clone(),
            writer,
            notifier.clone(),
        );
        Harness {
            scheduler,
            locks,
            payments,
            notifier,
        }
    }

    fn run_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 27, 0, 1, 0).unwrap()
    }

    fn settlement_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 26).unwrap()
    }

    fn paid(id: i64, partner_id: i64) -> PaymentRecord {
        payment(id, partner_id, dec!(10), PaymentStatus::Paid)
    }

    #[tokio::test]
    async fn test_end_to_end_settlement() {
        let mut out_of_window = payment(5, 1, dec!(1000), PaymentStatus::Paid);
        out_of_window.payment_date = Utc.with_ymd_and_hms(2024, 10, 27, 0, 0, 0).unwrap();

        let payments = MemoryPayments {
            records: vec![
                payment(1, 1, dec!(10.00), PaymentStatus::Paid),
                payment(2, 1, dec!(5.50), PaymentStatus::Paid),
                payment(3, 2, dec!(20.00), PaymentStatus::Paid),
                payment(4, 3, dec!(99.00), PaymentStatus::Refunded),
                out_of_window,
            ],
            ..Default::default()
        };
        let store = Arc::new(MemoryStore::default());
        let h = harness(payments, store.clone());

        let outcome = h.scheduler.run_once_at(run_time()).await.unwrap();

        let report = match outcome {
            RunOutcome::Completed(report) => report,
            other => panic!("expected a completed run, got {:?}", other),
        };
        assert_eq!(report.settlement_date, settlement_date());
        assert_eq!(report.payment_count, 3);
        assert_eq!(report.partner_count, 2);
        assert_eq!(report.rows_written, 2);

        assert_eq!(
            store.rows.lock().as_slice(),
            &[
                SettlementRecord {
                    partner_id: 1,
                    total_amount: dec!(15.50),
                    settlement_date: settlement_date(),
                },
                SettlementRecord {
                    partner_id: 2,
                    total_amount: dec!(20.00),
                    settlement_date: settlement_date(),
                },
            ]
        );
        assert!(h.notifier.calls.lock().is_empty());
        assert!(!h.locks.is_held("ScheduledTask_run"));
    }

    #[tokio::test]
    async fn test_skips_when_lock_is_held_elsewhere() {
        let store = Arc::new(MemoryStore::default());
        let h = harness(
            MemoryPayments {
                records: vec![paid(1, 1)],
                ..Default::default()
            },
            store.clone(),
        );
        let other_instance = h
            .locks
            .acquire("ScheduledTask_run", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let outcome = h.scheduler.run_once_at(run_time()).await.unwrap();

        assert_eq!(outcome, RunOutcome::Skipped);
        assert_eq!(*h.payments.calls.lock(), 0);
        assert_eq!(*store.calls.lock(), 0);
        assert!(h.notifier.calls.lock().is_empty());

        // the other instance's lease is untouched
        assert!(h.locks.is_held("ScheduledTask_run"));
        h.locks.release(&other_instance).await.unwrap();
    }

    #[tokio::test]
    async fn test_partial_failure_notifies_once_and_fails_run() {
        let payments = MemoryPayments {
            records: (1..=5).map(|p| paid(p, p)).collect(),
            ..Default::default()
        };
        // partners at indices 1 and 3
        let store = Arc::new(MemoryStore::rejecting(&[2, 4]));
        let h = harness(payments, store.clone());

        let err = h.scheduler.run_once_at(run_time()).await.unwrap_err();

        match err {
            AppError::Settlement(SettlementError::BatchWrite { result }) => {
                assert_eq!(result.failed_partner_ids, vec![2, 4]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(
            h.notifier.calls.lock().as_slice(),
            &[(settlement_date(), vec![2, 4])]
        );
        assert_eq!(store.rows.lock().len(), 3);
        assert!(!h.locks.is_held("ScheduledTask_run"));
    }

    #[tokio::test]
    async fn test_notifier_errors_do_not_change_the_outcome() {
        let locks = Arc::new(InMemoryLockService::new());
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let scheduler = SettlementScheduler::new(
            SettlementScheduleConfig::default(),
            locks.clone(),
            Arc::new(MemoryPayments {
                records: vec![paid(1, 1)],
                ..Default::default()
            }),
            Arc::new(SettlementWriter::new(
                Arc::new(MemoryStore::rejecting(&[1])),
                WriterConfig::default(),
            )),
            notifier.clone(),
        );

        let err = scheduler.run_once_at(run_time()).await.unwrap_err();

        assert!(matches!(
            err,
            AppError::Settlement(SettlementError::BatchWrite { .. })
        ));
        assert_eq!(notifier.calls.lock().len(), 1);
        assert!(!locks.is_held("ScheduledTask_run"));
    }

    #[tokio::test]
    async fn test_query_failure_aborts_before_write_and_releases_lock() {
        let store = Arc::new(MemoryStore::default());
        let h = harness(
            MemoryPayments {
                fail: true,
                ..Default::default()
            },
            store.clone(),
        );

        let err = h.scheduler.run_once_at(run_time()).await.unwrap_err();

        assert!(matches!(err, AppError::Settlement(SettlementError::Query(_))));
        assert_eq!(*store.calls.lock(), 0);
        assert!(h.notifier.calls.lock().is_empty());
        assert!(!h.locks.is_held("ScheduledTask_run"));
    }

    #[tokio::test]
    async fn test_lock_released_after_panic_in_write() {
        let h = harness(
            MemoryPayments {
                records: vec![paid(1, 1)],
                ..Default::default()
            },
            Arc::new(PanickingStore),
        );

        let err = h.scheduler.run_once_at(run_time()).await.unwrap_err();

        assert!(matches!(
            err,
            AppError::Settlement(SettlementError::Panicked(ref msg)) if msg.contains("partial write")
        ));
        assert!(!h.locks.is_held("ScheduledTask_run"));

        // the next tick is free to run
        let store = Arc::new(MemoryStore::default());
        let h2 = SettlementScheduler::new(
            SettlementScheduleConfig::default(),
            h.locks.clone(),
            h.payments.clone(),
            Arc::new(SettlementWriter::new(store.clone(), WriterConfig::default())),
            h.notifier.clone(),
        );
        assert!(matches!(
            h2.run_once_at(run_time()).await.unwrap(),
            RunOutcome::Completed(_)
        ));
    }

    #[tokio::test]
    async fn test_empty_day_completes_without_rows() {
        let store = Arc::new(MemoryStore::default());
        let h = harness(MemoryPayments::default(), store.clone());

        let outcome = h.scheduler.run_once_at(run_time()).await.unwrap();

        let RunOutcome::Completed(report) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(report.rows_written, 0);
        assert_eq!(*store.calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_interval_scheduler_runs_ticks() {
        let locks = Arc::new(InMemoryLockService::new());
        let payments = Arc::new(MemoryPayments::default());
        let scheduler = Arc::new(SettlementScheduler::new(
            SettlementScheduleConfig {
                frequency: SettlementFrequency::Interval {
                    every: Duration::from_millis(20),
                },
                ..Default::default()
            },
            locks,
            payments.clone(),
            Arc::new(SettlementWriter::new(
                Arc::new(MemoryStore::default()),
                WriterConfig::default(),
            )),
            Arc::new(RecordingNotifier::default()),
        ));

        let handle = scheduler.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(*payments.calls.lock() >= 2);
    }

    #[test]
    fn test_calculate_next_daily_execution() {
        // Current time: 2024-01-01 10:00:00 UTC
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();

        // Execution hour: 14:00 (today)
        let next = SettlementScheduler::calculate_next_daily_execution(now, 14).unwrap();
        assert_eq!(next.hour(), 14);
        assert_eq!(next.day(), 1);

        // Execution hour: 09:00 (already passed, so tomorrow)
        let next = SettlementScheduler::calculate_next_daily_execution(now, 9).unwrap();
        assert_eq!(next.hour(), 9);
        assert_eq!(next.day(), 2);

        assert!(SettlementScheduler::calculate_next_daily_execution(now, 24).is_none());
    }

    #[test]
    fn test_daily_slot_runs_once_when_tick_ends_before_the_hour() {
        let woke = Utc.with_ymd_and_hms(2024, 1, 1, 1, 59, 59).unwrap() + chrono::Duration::milliseconds(600);
        let slot = Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap();

        let first = SettlementScheduler::next_daily_slot(woke, 2, None).unwrap();
        assert_eq!(first, slot);
        assert_eq!(
            first.signed_duration_since(woke).to_std().unwrap(),
            std::time::Duration::from_millis(400)
        );

        // a fast tick finishes before the wall clock reaches 02:00
        let after_tick = woke + chrono::Duration::milliseconds(20);
        let second = SettlementScheduler::next_daily_slot(after_tick, 2, Some(first)).unwrap();
        assert_eq!(second, Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap());

        // normal case: the tick ends after the slot
        let later = Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 5).unwrap();
        assert_eq!(SettlementScheduler::next_daily_slot(later, 2, Some(slot)), Some(second));
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
