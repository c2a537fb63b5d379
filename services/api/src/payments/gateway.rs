//! Payment gateway client (Midtrans Snap + Core status API)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::{config::MidtransEnvironment, models::PaymentStatus};

const SANDBOX_SNAP_URL: &str = "https://app.sandbox.midtrans.com/snap/v1/transactions";
const PRODUCTION_SNAP_URL: &str = "https://app.midtrans.com/snap/v1/transactions";
const SANDBOX_API_URL: &str = "https://api.sandbox.midtrans.com/v2";
const PRODUCTION_API_URL: &str = "https://api.midtrans.com/v2";
const ITEM_NAME_MAX: usize = 50;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Payment gateway request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Payment gateway returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Payment gateway does not know the transaction: {0}")]
    UnknownTransaction(String),
}

/// A hosted checkout session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkout {
    pub token: String,
    pub redirect_url: String,
}

/// The gateway's view of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionState {
    pub transaction_status: String,
    pub fraud_status: Option<String>,
    pub payment_type: Option<String>,
}

impl TransactionState {
    pub fn payment_status(&self) -> Option<PaymentStatus> {
        map_transaction_status(&self.transaction_status, self.fraud_status.as_deref())
    }
}

/// Gateway transaction state to internal status. `None` means the
/// notification carries nothing to act on.
pub fn map_transaction_status(
    transaction_status: &str,
    fraud_status: Option<&str>,
) -> Option<PaymentStatus> {
    match (transaction_status, fraud_status) {
        ("capture", None | Some("accept")) | ("settlement", _) => Some(PaymentStatus::Success),
        ("capture", Some("challenge")) => Some(PaymentStatus::Challenge),
        ("cancel" | "expire", _) => Some(PaymentStatus::Failure),
        ("pending", _) => Some(PaymentStatus::Pending),
        _ => None,
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a checkout for `amount` under our `order_id`
    async fn create_transaction(
        &self,
        order_id: Uuid,
        amount: i64,
        title: &str,
    ) -> Result<Checkout, GatewayError>;

    /// Ask the gateway for the authoritative state of an order
    async fn check_transaction(&self, order_id: &str) -> Result<TransactionState, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status_code: String,
    status_message: Option<String>,
    transaction_status: Option<String>,
    fraud_status: Option<String>,
    payment_type: Option<String>,
}

#[derive(Clone)]
pub struct MidtransGateway {
    http: Client,
    server_key: String,
    snap_url: &'static str,
    api_url: &'static str,
    notification_url: String,
}

impl MidtransGateway {
    pub fn new(
        server_key: String,
        environment: MidtransEnvironment,
        app_url: &str,
    ) -> Result<Self, GatewayError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let (snap_url, api_url) = match environment {
            MidtransEnvironment::Sandbox => (SANDBOX_SNAP_URL, SANDBOX_API_URL),
            MidtransEnvironment::Production => (PRODUCTION_SNAP_URL, PRODUCTION_API_URL),
        };

        info!("Midtrans gateway configured for {:?}", environment);
        Ok(Self {
            http,
            server_key,
            snap_url,
            api_url,
            notification_url: format!(
                "{}/payments/midtrans/notification",
                app_url.trim_end_matches('/')
            ),
        })
    }

    async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl PaymentGateway for MidtransGateway {
    async fn create_transaction(
        &self,
        order_id: Uuid,
        amount: i64,
        title: &str,
    ) -> Result<Checkout, GatewayError> {
        let name: String = title.chars().take(ITEM_NAME_MAX).collect();
        let body = json!({
            "transaction_details": {
                "order_id": order_id,
                "gross_amount": amount
            },
            "item_details": [{
                "id": order_id,
                "price": amount,
                "quantity": 1,
                "name": name
            }]
        });

        let response = self
            .http
            .post(self.snap_url)
            .basic_auth(&self.server_key, Some(""))
            .header("X-Override-Notification", &self.notification_url)
            .json(&body)
            .send()
            .await?;

        let checkout = Self::error_for_status(response).await?.json::<Checkout>().await?;
        info!(%order_id, amount, "Opened gateway checkout");
        Ok(checkout)
    }

    async fn check_transaction(&self, order_id: &str) -> Result<TransactionState, GatewayError> {
        let response = self
            .http
            .get(format!("{}/{}/status", self.api_url, order_id))
            .basic_auth(&self.server_key, Some(""))
            .send()
            .await?;

        let status = Self::error_for_status(response)
            .await?
            .json::<StatusResponse>()
            .await?;

        match status.transaction_status {
            Some(transaction_status) if status.status_code != "404" => Ok(TransactionState {
                transaction_status,
                fraud_status: status.fraud_status,
                payment_type: status.payment_type,
            }),
            _ => Err(GatewayError::UnknownTransaction(
                status
                    .status_message
                    .unwrap_or_else(|| format!("status code {}", status.status_code)),
            )),
        }
    }
}

/// Scripted gateway for tests
#[cfg(test)]
#[derive(Default)]
pub struct FakeGateway {
    pub state: std::sync::Mutex<Option<TransactionState>>,
    pub created: std::sync::Mutex<Vec<(Uuid, i64)>>,
}

#[cfg(test)]
impl FakeGateway {
    pub fn settle(&self, transaction_status: &str, fraud_status: Option<&str>) {
        *self.state.lock().unwrap() = Some(TransactionState {
            transaction_status: transaction_status.to_string(),
            fraud_status: fraud_status.map(str::to_string),
            payment_type: Some("bank_transfer".to_string()),
        });
    }
}

#[cfg(test)]
#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_transaction(
        &self,
        order_id: Uuid,
        amount: i64,
        _title: &str,
    ) -> Result<Checkout, GatewayError> {
        self.created.lock().unwrap().push((order_id, amount));
        Ok(Checkout {
            token: format!("snap-{order_id}"),
            redirect_url: format!("https://pay.test/{order_id}"),
        })
    }

    async fn check_transaction(&self, order_id: &str) -> Result<TransactionState, GatewayError> {
        self.state
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| GatewayError::UnknownTransaction(order_id.to_string()))
    }
}
