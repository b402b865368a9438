use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use super::models::*;
use crate::{
    error::{AppError, AppResult},
    gateway::PortOneClient,
    payment::PaymentQuery,
    settlement::{RunOutcome, SettlementScheduler},
};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<SettlementScheduler>,
    pub payments: Arc<dyn PaymentQuery>,
    pub gateway: Arc<PortOneClient>,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
    })
}

/// Trigger one settlement tick now; skipped if another instance holds the lock
/// POST /settlements/run
pub async fn run_settlement(State(state): State<AppState>) -> AppResult<Json<RunOutcome>> {
    info!("🛠️ Manual settlement run requested");
    let outcome = state.scheduler.run_once().await?;
    Ok(Json(outcome))
}

/// Cancel a payment at the gateway
/// POST /payments/:imp_uid/cancel
pub async fn cancel_payment(
    State(state): State<AppState>,
    Path(imp_uid): Path<String>,
) -> AppResult<Json<CancelPaymentResponse>> {
    let payment = state
        .payments
        .find_by_imp_uid(&imp_uid)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Payment {}", imp_uid)))?;

    info!("🧾 Cancelling payment {} of partner {}", imp_uid, payment.partner_id);

    let result = state.gateway.cancel_payment(&imp_uid).await?;

    Ok(Json(CancelPaymentResponse {
        imp_uid,
        partner_id: payment.partner_id,
        result,
    }))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use chrono::DateTime;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tower::ServiceExt;

    use super::*;
    use crate::gateway::{GatewayRetryClient, PortOneConfig, RetryPolicy};
    use crate::lock::{InMemoryLockService, LockService};
    use crate::payment::{PaymentRecord, PaymentStatus};
    use crate::server::create_app;
    use crate::settlement::aggregator::tests::payment;
    use crate::settlement::notifier::tests::RecordingNotifier;
    use crate::settlement::scheduler::SettlementScheduleConfig;
    use crate::settlement::writer::tests::MemoryStore;
    use crate::settlement::writer::WriterConfig;
    use crate::settlement::SettlementWriter;

    struct FixedPayments(Vec<PaymentRecord>);

    #[async_trait]
    impl PaymentQuery for FixedPayments {
        async fn find(
            &self,
            status: PaymentStatus,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> AppResult<Vec<PaymentRecord>> {
            Ok(self
                .0
                .iter()
                .filter(|r| r.status == status && start <= r.payment_date && r.payment_date < end)
                .cloned()
                .collect())
        }

        async fn find_by_imp_uid(&self, imp_uid: &str) -> AppResult<Option<PaymentRecord>> {
            Ok(self.0.iter().find(|r| r.imp_uid == imp_uid).cloned())
        }
    }

    fn state(locks: Arc<InMemoryLockService>) -> AppState {
        let payments: Arc<dyn PaymentQuery> = Arc::new(FixedPayments(vec![payment(
            1,
            7,
            dec!(12.50),
            PaymentStatus::Paid,
        )]));
        let writer = Arc::new(SettlementWriter::new(
            Arc::new(MemoryStore::default()),
            WriterConfig::default(),
        ));
        let scheduler = Arc::new(SettlementScheduler::new(
            SettlementScheduleConfig::default(),
            locks,
            payments.clone(),
            writer,
            Arc::new(RecordingNotifier::default()),
        ));
        // nothing listens on the discard port
        let gateway = PortOneClient::new(
            PortOneConfig {
                base_url: "http://127.0.0.1:9".into(),
                imp_key: "key".into(),
                imp_secret: "secret".into(),
                timeout: Duration::from_secs(1),
            },
            GatewayRetryClient::new(RetryPolicy {
                max_attempts: 1,
                backoff: Duration::from_millis(1),
                jitter: Duration::ZERO,
            }),
        )
        .unwrap();

        AppState {
            scheduler,
            payments,
            gateway: Arc::new(gateway),
        }
    }

    async fn send(state: AppState, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = create_app(state)
            .await
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_check() {
        let (status, body) = send(state(Arc::new(InMemoryLockService::new())), "GET", "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_manual_run_completes() {
        let locks = Arc::new(InMemoryLockService::new());
        let (status, body) = send(state(locks.clone()), "POST", "/api/v1/settlements/run").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "completed");
        assert!(!locks.is_held("ScheduledTask_run"));
    }

    #[tokio::test]
    async fn test_manual_run_skips_when_locked() {
        let locks = Arc::new(InMemoryLockService::new());
        locks
            .acquire("ScheduledTask_run", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let (status, body) = send(state(locks), "POST", "/api/v1/settlements/run").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "skipped");
    }

    #[tokio::test]
    async fn test_cancel_unknown_payment_is_not_found() {
        let (status, _) = send(
            state(Arc::new(InMemoryLockService::new())),
            "POST",
            "/api/v1/payments/imp_missing/cancel",
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_unreachable_gateway_returns_sentinel() {
        let (status, body) = send(
            state(Arc::new(InMemoryLockService::new())),
            "POST",
            "/api/v1/payments/imp_1/cancel",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["partner_id"], 7);
        assert_eq!(body["result"]["outcome"], "recovered");
        assert_eq!(body["result"]["value"]["status"], "500 INTERNAL_SERVER_ERROR");
    }
}
