use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::gateway::GatewayOutcome;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Result of an admin-triggered cancellation
#[derive(Debug, Serialize)]
pub struct CancelPaymentResponse {
    pub imp_uid: String,
    pub partner_id: i64,
    pub result: GatewayOutcome<String>,
}
