//! Payment orchestration
//!
//! A checkout inserts a pending payment and parks its effects in the cache.
//! Gateway notifications are verified, re-checked against the gateway and
//! fed through the status state machine; the first transition to success
//! applies the parked effects inside the same transaction.

pub mod gateway;
pub mod payload;
pub mod signature;

use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use common::{
    cache::KeyValueStore,
    error::{AppError, AppResult, FieldError},
};
use serde::Deserialize;
use sqlx::{PgConnection, PgPool};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    chat,
    models::{NewPayment, Payment, PaymentStatus},
    repositories::{AccountRepository, PaymentRepository, account::Subscription},
};
use gateway::{Checkout, PaymentGateway};
use payload::{PAYLOAD_TTL, PaymentPayload, payload_key};
use signature::verify_signature;

/// Days added to a subscription per successful payment
pub const SUBSCRIPTION_DAYS: i32 = 30;
/// Platform share of a guidance payment, in percent
pub const PLATFORM_FEE_PERCENT: i64 = 10;

/// Mentor share of a guidance payment
pub fn mentor_share(amount: i64) -> i64 {
    amount - amount * PLATFORM_FEE_PERCENT / 100
}

#[derive(Debug, Clone, Copy)]
pub struct Prices {
    pub boost: i64,
    pub challenge: i64,
}

/// Result of feeding a status into the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Applied,
    Ignored,
    UnknownPayment,
}

/// Fields of a gateway notification used for verification
#[derive(Debug, Default, Deserialize)]
struct Notification {
    order_id: Option<String>,
    status_code: Option<String>,
    gross_amount: Option<String>,
    signature_key: Option<String>,
}

#[derive(Clone)]
pub struct PaymentOrchestrator {
    pool: PgPool,
    cache: Arc<dyn KeyValueStore>,
    gateway: Arc<dyn PaymentGateway>,
    server_key: String,
    prices: Prices,
}

impl PaymentOrchestrator {
    pub fn new(
        pool: PgPool,
        cache: Arc<dyn KeyValueStore>,
        gateway: Arc<dyn PaymentGateway>,
        server_key: String,
        prices: Prices,
    ) -> Self {
        Self {
            pool,
            cache,
            gateway,
            server_key,
            prices,
        }
    }

    /// Open a gateway checkout and record the pending payment
    pub async fn create_payment(
        &self,
        user_id: Uuid,
        amount: i64,
        title: &str,
        detail: &str,
        payload: &PaymentPayload,
    ) -> AppResult<Checkout> {
        if amount <= 0 {
            return Err(AppError::validation("amount", "amount must be positive"));
        }

        let mut tx = self.pool.begin().await?;
        let id = Uuid::now_v7();

        let checkout = self
            .gateway
            .create_transaction(id, amount, title)
            .await
            .context("Failed to open gateway checkout")?;

        PaymentRepository::insert(
            &mut tx,
            &NewPayment {
                id,
                user_id,
                token: checkout.token.clone(),
                amount,
                title: title.to_string(),
                detail: detail.to_string(),
                expired_at: Utc::now() + Duration::hours(1),
            },
        )
        .await?;

        let payload = serde_json::to_string(payload).context("Failed to encode payment payload")?;
        self.cache
            .set(&payload_key(id), &payload, Some(PAYLOAD_TTL))
            .await?;

        tx.commit().await?;

        info!(payment_id = %id, %user_id, amount, "Payment created");
        Ok(checkout)
    }

    pub async fn checkout_boost(&self, student_id: Uuid) -> AppResult<Checkout> {
        self.create_payment(
            student_id,
            self.prices.boost,
            "Boost subscription",
            "30 days of full course access",
            &PaymentPayload::Boost { student_id },
        )
        .await
    }

    pub async fn checkout_challenge(&self, student_id: Uuid) -> AppResult<Checkout> {
        self.create_payment(
            student_id,
            self.prices.challenge,
            "Challenge subscription",
            "30 days of challenge access",
            &PaymentPayload::Challenge { student_id },
        )
        .await
    }

    /// Pay a mentor's price for a 24 hour guidance chat
    pub async fn checkout_guidance(&self, student_id: Uuid, mentor_id: Uuid) -> AppResult<Checkout> {
        let mut conn = self.pool.acquire().await?;
        let price = AccountRepository::mentor_price(&mut conn, mentor_id)
            .await?
            .ok_or(AppError::NotFound("Mentor"))?;
        drop(conn);

        if price <= 0 {
            return Err(AppError::validation(
                "mentor_id",
                "Mentor does not offer paid guidance",
            ));
        }

        self.create_payment(
            student_id,
            price,
            "Mentor guidance",
            &format!("24 hour guidance chat with mentor {mentor_id}"),
            &PaymentPayload::Guidance {
                student_id,
                mentor_id,
            },
        )
        .await
    }

    /// Handle an asynchronous gateway notification.
    ///
    /// Only malformed or forged notifications are errors; anything the
    /// gateway should not retry is acknowledged.
    pub async fn process_notification(&self, raw: serde_json::Value) -> AppResult<()> {
        let notification: Notification = serde_json::from_value(raw)
            .map_err(|e| AppError::BadRequest(format!("Malformed notification: {e}")))?;

        let fields = [
            ("order_id", &notification.order_id),
            ("status_code", &notification.status_code),
            ("gross_amount", &notification.gross_amount),
            ("signature_key", &notification.signature_key),
        ];
        let missing: Vec<FieldError> = fields
            .iter()
            .filter(|(_, value)| value.as_deref().is_none_or(str::is_empty))
            .map(|(field, _)| FieldError::new(*field, format!("{field} is required")))
            .collect();
        if !missing.is_empty() {
            return Err(AppError::Validation(missing));
        }

        let order_id = notification.order_id.as_deref().unwrap_or_default();
        let status_code = notification.status_code.as_deref().unwrap_or_default();
        let gross_amount = notification.gross_amount.as_deref().unwrap_or_default();
        let signature_key = notification.signature_key.as_deref().unwrap_or_default();

        if !verify_signature(
            signature_key,
            order_id,
            status_code,
            gross_amount,
            &self.server_key,
        ) {
            warn!(order_id, "Rejected notification with a bad signature");
            return Err(AppError::validation(
                "signature_key",
                "Signature does not match",
            ));
        }

        let Ok(payment_id) = Uuid::parse_str(order_id) else {
            warn!(order_id, "Notification for an order id we never issued");
            return Ok(());
        };

        let state = match self.gateway.check_transaction(order_id).await {
            Ok(state) => state,
            Err(e) => {
                warn!(%payment_id, "Could not confirm notification with the gateway: {}", e);
                return Ok(());
            }
        };

        let Some(status) = state.payment_status() else {
            info!(
                %payment_id,
                transaction_status = state.transaction_status,
                "Notification carries no actionable status"
            );
            return Ok(());
        };

        // past the signature check only a retriable failure may reach the gateway
        self.update_payment_status(payment_id, status, state.payment_type.as_deref())
            .await
            .map_err(|e| match e {
                AppError::Internal(_) => e,
                other => AppError::Internal(
                    anyhow::Error::new(other).context("Failed to apply verified notification"),
                ),
            })?;
        Ok(())
    }

    /// Move a payment to `status` if the state machine allows it, applying
    /// the parked effects on the first success
    pub async fn update_payment_status(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
        method: Option<&str>,
    ) -> AppResult<StatusChange> {
        let mut tx = self.pool.begin().await?;

        let Some(payment) = PaymentRepository::lock(&mut tx, payment_id).await? else {
            warn!(%payment_id, "Status update for an unknown payment");
            return Ok(StatusChange::UnknownPayment);
        };

        if !payment.status.can_transition_to(status) {
            info!(
                %payment_id,
                from = %payment.status,
                to = %status,
                "Ignoring payment status transition"
            );
            return Ok(StatusChange::Ignored);
        }

        PaymentRepository::set_status(&mut tx, payment_id, status, method).await?;

        let key = payload_key(payment_id);
        if status == PaymentStatus::Success {
            match self.cache.get(&key).await? {
                Some(raw) => {
                    let payload: PaymentPayload =
                        serde_json::from_str(&raw).context("Corrupt payment payload")?;
                    apply_payload(&mut tx, &payment, payload).await?;
                }
                None => warn!(%payment_id, "No parked payload, effects already applied"),
            }
        }

        tx.commit().await?;
        info!(%payment_id, from = %payment.status, to = %status, "Payment status updated");

        if status.is_terminal() {
            if let Err(e) = self.cache.delete(&key).await {
                warn!(%payment_id, "Failed to drop payment payload: {}", e);
            }
        }

        Ok(StatusChange::Applied)
    }
}

async fn apply_payload(
    conn: &mut PgConnection,
    payment: &Payment,
    payload: PaymentPayload,
) -> AppResult<()> {
    match payload {
        PaymentPayload::Boost { student_id } => {
            AccountRepository::extend_subscription(
                conn,
                student_id,
                Subscription::Boost,
                SUBSCRIPTION_DAYS,
            )
            .await?;
        }
        PaymentPayload::Challenge { student_id } => {
            AccountRepository::extend_subscription(
                conn,
                student_id,
                Subscription::Challenge,
                SUBSCRIPTION_DAYS,
            )
            .await?;
        }
        PaymentPayload::Guidance {
            student_id,
            mentor_id,
        } => {
            AccountRepository::credit_mentor(conn, mentor_id, payment.id, mentor_share(payment.amount))
                .await?;
            // the money has moved; a chat we cannot open is logged, not refused
            match chat::service::create_chat(conn, mentor_id, student_id, false).await {
                Ok(_) => {}
                Err(e @ AppError::Internal(_)) => return Err(e),
                Err(e) => error!(
                    payment_id = %payment.id,
                    %mentor_id,
                    %student_id,
                    "Paid guidance could not open a chat: {}",
                    e
                ),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::gateway::FakeGateway;
    use super::signature::notification_signature;
    use super::*;
    use crate::test_support::{lazy_pool, seed_user};
    use common::{cache::MemoryStore, role::Role};
    use serde_json::json;

    const SERVER_KEY: &str = "SB-Mid-server-test";
    const PRICES: Prices = Prices {
        boost: 120_000,
        challenge: 100_000,
    };

    fn orchestrator(
        pool: PgPool,
        cache: Arc<MemoryStore>,
        gateway: Arc<FakeGateway>,
    ) -> PaymentOrchestrator {
        PaymentOrchestrator::new(pool, cache, gateway, SERVER_KEY.to_string(), PRICES)
    }

    fn signed(order_id: &str, gross_amount: &str) -> serde_json::Value {
        json!({
            "order_id": order_id,
            "status_code": "200",
            "gross_amount": gross_amount,
            "transaction_status": "settlement",
            "signature_key": notification_signature(order_id, "200", gross_amount, SERVER_KEY),
        })
    }

    #[test]
    fn mentor_keeps_ninety_percent() {
        assert_eq!(mentor_share(50_000), 45_000);
        assert_eq!(mentor_share(99), 90);
        assert_eq!(mentor_share(0), 0);
    }

    #[tokio::test]
    async fn notification_with_missing_fields_is_rejected() {
        let payments = orchestrator(
            lazy_pool(),
            Arc::new(MemoryStore::new()),
            Arc::new(FakeGateway::default()),
        );

        let err = payments
            .process_notification(json!({ "order_id": "x", "status_code": "" }))
            .await
            .unwrap_err();
        let AppError::Validation(fields) = err else {
            panic!("expected validation error");
        };
        let names: Vec<&str> = fields.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(names, ["status_code", "gross_amount", "signature_key"]);
    }

    #[tokio::test]
    async fn forged_notification_is_rejected() {
        let payments = orchestrator(
            lazy_pool(),
            Arc::new(MemoryStore::new()),
            Arc::new(FakeGateway::default()),
        );

        let mut body = signed(&Uuid::now_v7().to_string(), "120000.00");
        body["gross_amount"] = json!("1.00");

        let err = payments.process_notification(body).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(ref fields) if fields[0].field == "signature_key"));
    }

    #[tokio::test]
    async fn unverifiable_notifications_are_acknowledged() {
        let gateway = Arc::new(FakeGateway::default());
        let payments = orchestrator(lazy_pool(), Arc::new(MemoryStore::new()), gateway.clone());

        // not one of our ids
        payments
            .process_notification(signed("ORDER-101", "120000.00"))
            .await
            .unwrap();

        // gateway cannot confirm
        payments
            .process_notification(signed(&Uuid::now_v7().to_string(), "120000.00"))
            .await
            .unwrap();

        // gateway reports a state with no internal meaning
        gateway.settle("deny", None);
        payments
            .process_notification(signed(&Uuid::now_v7().to_string(), "120000.00"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_positive_amount_is_rejected() {
        let payments = orchestrator(
            lazy_pool(),
            Arc::new(MemoryStore::new()),
            Arc::new(FakeGateway::default()),
        );
        let err = payments
            .create_payment(
                Uuid::now_v7(),
                0,
                "Nothing",
                "",
                &PaymentPayload::Boost {
                    student_id: Uuid::now_v7(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
    async fn success_effects_apply_exactly_once(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let student = seed_user(&mut conn, Role::Student).await;
        drop(conn);

        let cache = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let payments = orchestrator(pool.clone(), cache.clone(), gateway.clone());

        payments.checkout_boost(student).await.unwrap();
        let (payment_id, amount) = gateway.created.lock().unwrap()[0];
        assert_eq!(amount, PRICES.boost);
        assert!(cache.get(&payload_key(payment_id)).await.unwrap().is_some());

        gateway.settle("settlement", None);
        let notification = signed(&payment_id.to_string(), "120000.00");
        payments.process_notification(notification.clone()).await.unwrap();

        let boost_until = |pool: PgPool| async move {
            sqlx::query_scalar::<_, chrono::DateTime<Utc>>(
                "SELECT subscribed_boost_until FROM students WHERE user_id = $1",
            )
            .bind(student)
            .fetch_one(&pool)
            .await
            .unwrap()
        };
        let first = boost_until(pool.clone()).await;
        assert!(first > Utc::now() + Duration::days(29));
        assert!(cache.get(&payload_key(payment_id)).await.unwrap().is_none());

        // duplicate delivery and a late failure are both absorbed
        payments.process_notification(notification).await.unwrap();
        assert_eq!(
            payments
                .update_payment_status(payment_id, PaymentStatus::Failure, None)
                .await
                .unwrap(),
            StatusChange::Ignored
        );
        assert_eq!(boost_until(pool.clone()).await, first);

        let (status, method): (String, Option<String>) =
            sqlx::query_as("SELECT status, method FROM payments WHERE id = $1")
                .bind(payment_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "success");
        assert_eq!(method.as_deref(), Some("bank_transfer"));
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
    async fn guidance_credits_mentor_and_opens_chat(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let student = seed_user(&mut conn, Role::Student).await;
        let mentor = seed_user(&mut conn, Role::Mentor).await;
        drop(conn);

        let cache = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let payments = orchestrator(pool.clone(), cache, gateway.clone());

        payments.checkout_guidance(student, mentor).await.unwrap();
        let (payment_id, amount) = gateway.created.lock().unwrap()[0];
        assert_eq!(amount, 50_000);

        // challenge first, then success
        assert_eq!(
            payments
                .update_payment_status(payment_id, PaymentStatus::Challenge, None)
                .await
                .unwrap(),
            StatusChange::Applied
        );
        assert_eq!(
            payments
                .update_payment_status(payment_id, PaymentStatus::Success, Some("credit_card"))
                .await
                .unwrap(),
            StatusChange::Applied
        );

        let balance: i64 = sqlx::query_scalar("SELECT balance FROM mentors WHERE user_id = $1")
            .bind(mentor)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(balance, 45_000);

        let (is_trial, expires_at): (bool, chrono::DateTime<Utc>) = sqlx::query_as(
            "SELECT is_trial, expires_at FROM mentoring_chats WHERE mentor_id = $1 AND student_id = $2",
        )
        .bind(mentor)
        .bind(student)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(!is_trial);
        assert!(expires_at > Utc::now() + Duration::hours(23));

        assert_eq!(
            payments
                .update_payment_status(Uuid::now_v7(), PaymentStatus::Success, None)
                .await
                .unwrap(),
            StatusChange::UnknownPayment
        );
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
    async fn settled_guidance_survives_a_deleted_mentor(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let student = seed_user(&mut conn, Role::Student).await;
        let mentor = seed_user(&mut conn, Role::Mentor).await;
        drop(conn);

        let cache = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let payments = orchestrator(pool.clone(), cache.clone(), gateway.clone());

        payments.checkout_guidance(student, mentor).await.unwrap();
        let (payment_id, _) = gateway.created.lock().unwrap()[0];

        sqlx::query("UPDATE users SET deleted_at = now() WHERE id = $1")
            .bind(mentor)
            .execute(&pool)
            .await
            .unwrap();

        gateway.settle("settlement", None);
        payments
            .process_notification(signed(&payment_id.to_string(), "50000.00"))
            .await
            .unwrap();

        let status: String = sqlx::query_scalar("SELECT status FROM payments WHERE id = $1")
            .bind(payment_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(status, "success");
        assert!(cache.get(&payload_key(payment_id)).await.unwrap().is_none());

        let balance: i64 = sqlx::query_scalar("SELECT balance FROM mentors WHERE user_id = $1")
            .bind(mentor)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(balance, 45_000);

        let chats: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM mentoring_chats WHERE mentor_id = $1 AND student_id = $2",
        )
        .bind(mentor)
        .bind(student)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(chats, 0);
    }
}
