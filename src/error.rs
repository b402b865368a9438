use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;

use crate::settlement::models::WriteResult;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("External error: {0}")]
    ExternalError(String),
}

/// Settlement job errors
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Payment query failed: {0}")]
    Query(String),

    #[error(
        "Batch write failed: {} of {} rows failed (partners {:?})",
        result.failed_partner_ids.len(),
        result.total_rows,
        result.failed_partner_ids
    )]
    BatchWrite { result: WriteResult },

    #[error("Settlement run exceeded its lock lease of {lease_secs}s")]
    LeaseExceeded { lease_secs: u64 },

    #[error("Settlement run panicked: {0}")]
    Panicked(String),
}

impl SettlementError {
    /// Partner ids that need remediation, if this is a batch failure
    pub fn failed_partner_ids(&self) -> &[i64] {
        match self {
            SettlementError::BatchWrite { result } => &result.failed_partner_ids,
            _ => &[],
        }
    }
}

/// Payment gateway errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Connectivity, timeout or request-send failure; worth retrying
    #[error("Gateway transport failure: {0}")]
    Transport(String),

    /// The gateway answered and refused the request
    #[error("Gateway rejected request with {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Gateway response could not be decoded: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transport(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            GatewayError::Rejected {
                status: status.as_u16(),
                message: error.to_string(),
            }
        } else if error.is_decode() {
            GatewayError::Decode(error.to_string())
        } else {
            // connect, timeout, request and body errors
            GatewayError::Transport(error.to_string())
        }
    }
}

/// Settlement storage errors, split by whether per-row information survived
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Batch insert partially failed")]
    Batch {
        outcomes: Vec<crate::settlement::models::RowOutcome>,
    },

    #[error("Settlement storage unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        StoreError::Unavailable(error.to_string())
    }
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Settlement(SettlementError::BatchWrite { result }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SETTLEMENT_BATCH_FAILED",
                format!(
                    "{} of {} settlement rows failed",
                    result.failed_partner_ids.len(),
                    result.total_rows
                ),
                Some(serde_json::json!({
                    "failed_partner_ids": result.failed_partner_ids,
                })),
            ),
            AppError::Settlement(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SETTLEMENT_FAILED",
                e.to_string(),
                None,
            ),
            AppError::Gateway(GatewayError::Rejected { status, message }) => (
                StatusCode::BAD_GATEWAY,
                "GATEWAY_REJECTED",
                format!("Payment gateway rejected the request: {}", message),
                Some(serde_json::json!({ "gateway_status": status })),
            ),
            AppError::Gateway(_) => (
                StatusCode::BAD_GATEWAY,
                "GATEWAY_ERROR",
                "Payment gateway unavailable".to_string(),
                None,
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
                None,
            ),
            AppError::InvalidInput(message) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                message,
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::InvalidInput(format!("Decimal conversion error: {:?}", error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
