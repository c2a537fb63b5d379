//! Payment queries

use sqlx::PgConnection;
use tracing::info;
use uuid::Uuid;

use crate::models::{NewPayment, Payment, PaymentStatus};

const PAYMENT_COLUMNS: &str =
    "id, user_id, token, amount, title, detail, status, method, expired_at, created_at";

pub struct PaymentRepository;

impl PaymentRepository {
    pub async fn insert(conn: &mut PgConnection, payment: &NewPayment) -> sqlx::Result<Payment> {
        info!("Creating payment {} for user {}", payment.id, payment.user_id);

        sqlx::query_as::<_, Payment>(&format!(
            r#"
            INSERT INTO payments (id, user_id, token, amount, title, detail, status, expired_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7)
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment.id)
        .bind(payment.user_id)
        .bind(&payment.token)
        .bind(payment.amount)
        .bind(&payment.title)
        .bind(&payment.detail)
        .bind(payment.expired_at)
        .fetch_one(conn)
        .await
    }

    /// Fetch and row-lock a payment for the rest of the transaction
    pub async fn lock(conn: &mut PgConnection, id: Uuid) -> sqlx::Result<Option<Payment>> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    /// Persist a new status. A `None` method keeps the stored one.
    pub async fn set_status(
        conn: &mut PgConnection,
        id: Uuid,
        status: PaymentStatus,
        method: Option<&str>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, method = COALESCE($3, method), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(method)
        .execute(conn)
        .await?;
        Ok(())
    }
}
