use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::BigDecimal};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, AppResult};

/// Payment lifecycle as stored in `payments.status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Ready,
    Paid,
    Cancelled,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Ready => "ready",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(PaymentStatus::Ready),
            "paid" => Ok(PaymentStatus::Paid),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(AppError::InvalidInput(format!("Unknown payment status: {}", other))),
        }
    }
}

/// A completed or in-flight payment, read-only for the settlement job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: i64,
    /// Gateway-side payment id
    pub imp_uid: String,
    pub partner_id: i64,
    pub amount: Decimal,
    pub payment_date: DateTime<Utc>,
    pub status: PaymentStatus,
}

/// Raw `payments` row
#[derive(Debug, FromRow)]
pub(crate) struct PaymentRow {
    pub id: i64,
    pub imp_uid: String,
    pub partner_id: i64,
    pub amount: BigDecimal,
    pub payment_date: DateTime<Utc>,
    pub status: String,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = AppError;

    fn try_from(row: PaymentRow) -> AppResult<Self> {
        Ok(PaymentRecord {
            id: row.id,
            imp_uid: row.imp_uid,
            partner_id: row.partner_id,
            amount: Decimal::from_str(&row.amount.to_string())?,
            payment_date: row.payment_date,
            status: row.status.parse()?,
        })
    }
}
