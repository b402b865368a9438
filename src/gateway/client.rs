// PortOne (iamport) REST client
//
// Every call builds its own bearer token. Cancellation goes through the
// retry client and falls back to the injected recovery hook.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::retry::{GatewayOutcome, GatewayRetryClient, RecoverySentinel};
use crate::error::{AppError, AppResult, GatewayError};

pub const CANCEL_PAYMENT: &str = "cancel_payment";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortOneEndpoint {
    AccessToken,
    CancelPayment,
    CreatePayment,
}

impl PortOneEndpoint {
    pub fn path(&self) -> &'static str {
        match self {
            PortOneEndpoint::AccessToken => "/users/getToken",
            PortOneEndpoint::CancelPayment => "/payments/cancel",
            PortOneEndpoint::CreatePayment => "/payments/prepare",
        }
    }
}

/// Envelope shared by every PortOne response
#[derive(Debug, Deserialize)]
pub struct PortOneResponse<T> {
    pub code: i32,
    pub message: Option<String>,
    pub response: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub now: i64,
    pub expired_at: i64,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    imp_key: &'a str,
    imp_secret: &'a str,
}

#[derive(Serialize)]
struct CancelRequest<'a> {
    imp_uid: &'a str,
}

/// Compensating hook run once when cancellation exhausts its attempts
pub type RecoveryHook = Arc<dyn Fn(&GatewayError, &str) -> RecoverySentinel + Send + Sync>;

/// Default cancellation recovery.
///
/// Rolling back local state changed before the cancellation and paging the
/// responsible operator both hang off this hook; the default only logs.
pub fn handle_payment_cancellation_failure(error: &GatewayError, imp_uid: &str) -> RecoverySentinel {
    error!(
        "🚨 Payment cancellation failed for good: {} imp_uid: {}",
        error, imp_uid
    );
    RecoverySentinel::internal_error(CANCEL_PAYMENT, imp_uid)
}

#[derive(Debug, Clone)]
pub struct PortOneConfig {
    pub base_url: String,
    pub imp_key: String,
    pub imp_secret: String,
    pub timeout: Duration,
}

pub struct PortOneClient {
    http: Client,
    config: PortOneConfig,
    retry: GatewayRetryClient,
    recover: RecoveryHook,
}

impl PortOneClient {
    pub fn new(config: PortOneConfig, retry: GatewayRetryClient) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Config(format!("PortOne HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            retry,
            recover: Arc::new(handle_payment_cancellation_failure),
        })
    }

    pub fn with_recovery(mut self, recover: RecoveryHook) -> Self {
        self.recover = recover;
        self
    }

    fn url(&self, endpoint: PortOneEndpoint) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint.path())
    }

    pub async fn get_access_token(&self) -> Result<AccessToken, GatewayError> {
        let body: PortOneResponse<AccessToken> = self
            .http
            .post(self.url(PortOneEndpoint::AccessToken))
            .json(&TokenRequest {
                imp_key: &self.config.imp_key,
                imp_secret: &self.config.imp_secret,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        unwrap_response(body)
    }

    /// Cancel a payment, retrying transport failures.
    ///
    /// `Recovered` means the payment may still be live at the gateway.
    pub async fn cancel_payment(&self, imp_uid: &str) -> Result<GatewayOutcome<String>, GatewayError> {
        let outcome = self
            .retry
            .invoke(
                CANCEL_PAYMENT,
                imp_uid,
                move || self.cancel_once(imp_uid),
                |e, key| (self.recover)(e, key),
            )
            .await?;

        if outcome.is_completed() {
            info!("✓ Payment {} cancelled", imp_uid);
        }
        Ok(outcome)
    }

    async fn cancel_once(&self, imp_uid: &str) -> Result<String, GatewayError> {
        let token = self.get_access_token().await?;

        let body = self
            .http
            .post(self.url(PortOneEndpoint::CancelPayment))
            .bearer_auth(&token.access_token)
            .json(&CancelRequest { imp_uid })
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(body)
    }

    pub async fn create_payment(
        &self,
        payment_request: &serde_json::Value,
        token: &str,
    ) -> Result<String, GatewayError> {
        let body = self
            .http
            .post(self.url(PortOneEndpoint::CreatePayment))
            .bearer_auth(token)
            .json(payment_request)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(body)
    }
}

fn unwrap_response<T>(body: PortOneResponse<T>) -> Result<T, GatewayError> {
    match (body.code, body.response) {
        (0, Some(response)) => Ok(response),
        (code, _) => Err(GatewayError::Rejected {
            status: 200,
            message: format!(
                "code {}: {}",
                code,
                body.message.unwrap_or_else(|| "empty response".to_string())
            ),
        }),
    }
}
