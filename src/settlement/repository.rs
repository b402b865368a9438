use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{types::BigDecimal, PgPool, Postgres, Transaction};
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::settlement::models::{RowOutcome, SettlementRecord};
use crate::settlement::writer::SettlementStore;

/// Postgres-backed settlement storage
pub struct SettlementRepository {
    pool: PgPool,
    /// Upsert on (partner_id, settlement_date) instead of strict insert-once
    upsert: bool,
}

impl SettlementRepository {
    pub fn new(pool: PgPool, upsert: bool) -> Self {
        Self { pool, upsert }
    }

    fn bulk_sql(&self) -> &'static str {
        if self.upsert {
            r#"
            INSERT INTO settlements (partner_id, total_amount, settlement_date)
            SELECT * FROM UNNEST($1::bigint[], $2::numeric[], $3::date[])
            ON CONFLICT (partner_id, settlement_date)
            DO UPDATE SET total_amount = EXCLUDED.total_amount, updated_at = NOW()
            "#
        } else {
            r#"
            INSERT INTO settlements (partner_id, total_amount, settlement_date)
            SELECT * FROM UNNEST($1::bigint[], $2::numeric[], $3::date[])
            "#
        }
    }

    fn row_sql(&self) -> &'static str {
        if self.upsert {
            r#"
            INSERT INTO settlements (partner_id, total_amount, settlement_date)
            VALUES ($1, $2, $3)
            ON CONFLICT (partner_id, settlement_date)
            DO UPDATE SET total_amount = EXCLUDED.total_amount, updated_at = NOW()
            "#
        } else {
            r#"
            INSERT INTO settlements (partner_id, total_amount, settlement_date)
            VALUES ($1, $2, $3)
            "#
        }
    }

    /// Replay the batch one row at a time, each under its own savepoint,
    /// so rows the database accepts still commit.
    async fn insert_rows_isolated(
        &self,
        rows: &[SettlementRecord],
    ) -> Result<Vec<RowOutcome>, StoreError> {
        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;
        let mut outcomes = Vec::with_capacity(rows.len());

        for row in rows {
            sqlx::query("SAVEPOINT settlement_row").execute(&mut *tx).await?;

            let inserted = sqlx::query(self.row_sql())
                .bind(row.partner_id)
                .bind(to_big_decimal(row.total_amount)?)
                .bind(row.settlement_date)
                .execute(&mut *tx)
                .await;

            match inserted {
                Ok(_) => {
                    sqlx::query("RELEASE SAVEPOINT settlement_row")
                        .execute(&mut *tx)
                        .await?;
                    outcomes.push(RowOutcome::Written);
                }
                Err(sqlx::Error::Database(db_err)) => {
                    sqlx::query("ROLLBACK TO SAVEPOINT settlement_row")
                        .execute(&mut *tx)
                        .await?;
                    warn!(
                        "⚠️ Settlement row rejected for partner {}: {}",
                        row.partner_id,
                        db_err.message()
                    );
                    outcomes.push(RowOutcome::Failed(db_err.message().to_string()));
                }
                // anything else leaves the transaction unusable; dropping it rolls back
                Err(e) => return Err(e.into()),
            }
        }

        tx.commit().await?;
        Ok(outcomes)
    }
}

#[async_trait]
impl SettlementStore for SettlementRepository {
    async fn insert_batch(&self, rows: &[SettlementRecord]) -> Result<Vec<RowOutcome>, StoreError> {
        let partner_ids: Vec<i64> = rows.iter().map(|r| r.partner_id).collect();
        let amounts = rows
            .iter()
            .map(|r| to_big_decimal(r.total_amount))
            .collect::<Result<Vec<_>, _>>()?;
        let dates: Vec<NaiveDate> = rows.iter().map(|r| r.settlement_date).collect();

        let bulk = sqlx::query(self.bulk_sql())
            .bind(&partner_ids)
            .bind(&amounts)
            .bind(&dates)
            .execute(&self.pool)
            .await;

        match bulk {
            Ok(result) => {
                info!("💾 Bulk inserted {} settlement rows", result.rows_affected());
                Ok(vec![RowOutcome::Written; rows.len()])
            }
            Err(sqlx::Error::Database(db_err)) => {
                warn!(
                    "⚠️ Bulk settlement insert rejected ({}), isolating failing rows",
                    db_err.message()
                );
                let outcomes = self.insert_rows_isolated(rows).await?;
                if outcomes.iter().any(RowOutcome::is_failed) {
                    Err(StoreError::Batch { outcomes })
                } else {
                    Ok(outcomes)
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn to_big_decimal(amount: Decimal) -> Result<BigDecimal, StoreError> {
    BigDecimal::from_str(&amount.to_string())
        .map_err(|e| StoreError::Unavailable(format!("Amount {} not representable: {}", amount, e)))
}
