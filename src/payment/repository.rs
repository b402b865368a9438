use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use super::models::{PaymentRecord, PaymentRow, PaymentStatus};
use crate::error::AppResult;

/// Read side of the payment subsystem consumed by the settlement job
#[async_trait]
pub trait PaymentQuery: Send + Sync {
    /// Payments with `status` whose `payment_date` lies in `[start, end)`.
    /// Always a fresh read.
    async fn find(
        &self,
        status: PaymentStatus,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<PaymentRecord>>;

    async fn find_by_imp_uid(&self, imp_uid: &str) -> AppResult<Option<PaymentRecord>>;
}

pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentQuery for PaymentRepository {
    async fn find(
        &self,
        status: PaymentStatus,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<PaymentRecord>> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT id, imp_uid, partner_id, amount, payment_date, status
            FROM payments
            WHERE status = $1 AND payment_date >= $2 AND payment_date < $3
            ORDER BY id
            "#,
        )
        .bind(status.as_str())
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        debug!("📥 Loaded {} {} payments in [{}, {})", rows.len(), status, start, end);

        rows.into_iter().map(PaymentRecord::try_from).collect()
    }

    async fn find_by_imp_uid(&self, imp_uid: &str) -> AppResult<Option<PaymentRecord>> {
        let row = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT id, imp_uid, partner_id, amount, payment_date, status
            FROM payments
            WHERE imp_uid = $1
            "#,
        )
        .bind(imp_uid)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PaymentRecord::try_from).transpose()
    }
}
