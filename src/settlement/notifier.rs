// Failure notification for settlement rows that did not commit
//
// Delivery is at-least-once and best effort: the scheduler bounds every call
// with a timeout and only logs notifier errors.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Client;
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};

#[async_trait]
pub trait FailureNotifier: Send + Sync {
    async fn notify(&self, settlement_date: NaiveDate, failed_partner_ids: &[i64]) -> AppResult<()>;
}

/// Error summary plus one debug line per partner
pub struct LoggingNotifier;

#[async_trait]
impl FailureNotifier for LoggingNotifier {
    async fn notify(&self, settlement_date: NaiveDate, failed_partner_ids: &[i64]) -> AppResult<()> {
        error!(
            "🚨 Failed to settle {} for the following partner IDs: {:?}",
            settlement_date, failed_partner_ids
        );
        for partner_id in failed_partner_ids {
            debug!("Failed partner ID: {}", partner_id);
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SettlementAlert<'a> {
    text: String,
    settlement_date: NaiveDate,
    failed_partner_ids: &'a [i64],
    raised_at: chrono::DateTime<Utc>,
}

/// Posts an alert to an operator webhook (team messenger, paging bridge)
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Webhook client: {}", e)))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl FailureNotifier for WebhookNotifier {
    async fn notify(&self, settlement_date: NaiveDate, failed_partner_ids: &[i64]) -> AppResult<()> {
        let alert = SettlementAlert {
            text: format!(
                "Settlement for {} failed for {} partner(s)",
                settlement_date,
                failed_partner_ids.len()
            ),
            settlement_date,
            failed_partner_ids,
            raised_at: Utc::now(),
        };

        self.client
            .post(&self.url)
            .json(&alert)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| AppError::ExternalError(format!("Alert webhook failed: {}", e)))?;

        info!("📣 Settlement failure alert sent for {}", settlement_date);
        Ok(())
    }
}

/// Keeps failed settlement cases in `settlement_failures` for later remediation
pub struct SettlementFailureLog {
    pool: PgPool,
}

impl SettlementFailureLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FailureNotifier for SettlementFailureLog {
    async fn notify(&self, settlement_date: NaiveDate, failed_partner_ids: &[i64]) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settlement_failures (partner_id, settlement_date)
            SELECT UNNEST($1::bigint[]), $2
            "#,
        )
        .bind(failed_partner_ids)
        .bind(settlement_date)
        .execute(&self.pool)
        .await?;

        info!(
            "🗂️ Recorded {} settlement failures for {}",
            failed_partner_ids.len(),
            settlement_date
        );
        Ok(())
    }
}

/// Delivers to every sink, even when an earlier one fails
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn FailureNotifier>>,
}

impl FanoutNotifier {
    pub fn new(sinks: Vec<Arc<dyn FailureNotifier>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl FailureNotifier for FanoutNotifier {
    async fn notify(&self, settlement_date: NaiveDate, failed_partner_ids: &[i64]) -> AppResult<()> {
        let mut first_error = None;

        for sink in &self.sinks {
            if let Err(e) = sink.notify(settlement_date, failed_partner_ids).await {
                warn!("⚠️ Failure notifier sink errored: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
