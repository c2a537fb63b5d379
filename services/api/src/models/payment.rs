//! Payment models and the payment status state machine

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failure,
    Challenge,
}

#[derive(Debug, Error)]
#[error("Unknown payment status: {0}")]
pub struct UnknownPaymentStatus(String);

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failure => "failure",
            PaymentStatus::Challenge => "challenge",
        }
    }

    /// Success and failure absorb every later notification
    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Success | PaymentStatus::Failure)
    }

    /// pending → {success, failure, challenge}; challenge → {success, failure}
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;

        matches!(
            (self, next),
            (Pending, Success | Failure | Challenge) | (Challenge, Success | Failure)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for PaymentStatus {
    type Error = UnknownPaymentStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "success" => Ok(PaymentStatus::Success),
            "failure" => Ok(PaymentStatus::Failure),
            "challenge" => Ok(PaymentStatus::Challenge),
            _ => Err(UnknownPaymentStatus(value)),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub amount: i64,
    pub title: String,
    pub detail: String,
    #[sqlx(try_from = "String")]
    pub status: PaymentStatus,
    pub method: Option<String>,
    pub expired_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub amount: i64,
    pub title: String,
    pub detail: String,
    pub expired_at: DateTime<Utc>,
}
