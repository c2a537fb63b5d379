//! Student and mentor account queries

use chrono::{DateTime, Utc};
use common::role::Role;
use sqlx::PgConnection;
use tracing::info;
use uuid::Uuid;

/// Subscription extended by a successful payment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    Boost,
    Challenge,
}

impl Subscription {
    fn column(self) -> &'static str {
        match self {
            Subscription::Boost => "subscribed_boost_until",
            Subscription::Challenge => "subscribed_challenge_until",
        }
    }
}

pub struct AccountRepository;

impl AccountRepository {
    /// Role of a live user
    pub async fn role_of(conn: &mut PgConnection, user_id: Uuid) -> sqlx::Result<Option<Role>> {
        let role: Option<String> =
            sqlx::query_scalar("SELECT role FROM users WHERE id = $1 AND deleted_at IS NULL")
                .bind(user_id)
                .fetch_optional(conn)
                .await?;

        role.map(Role::try_from)
            .transpose()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))
    }

    pub async fn boost_until(
        conn: &mut PgConnection,
        student_id: Uuid,
    ) -> sqlx::Result<Option<DateTime<Utc>>> {
        sqlx::query_scalar("SELECT subscribed_boost_until FROM students WHERE user_id = $1")
            .bind(student_id)
            .fetch_optional(conn)
            .await
    }

    /// Push the subscription end `days` past `max(now, current end)`
    pub async fn extend_subscription(
        conn: &mut PgConnection,
        student_id: Uuid,
        subscription: Subscription,
        days: i32,
    ) -> sqlx::Result<Option<DateTime<Utc>>> {
        let column = subscription.column();
        let until = sqlx::query_scalar(&format!(
            r#"
            UPDATE students
            SET {column} = GREATEST(now(), {column}) + make_interval(days => $2)
            WHERE user_id = $1
            RETURNING {column}
            "#
        ))
        .bind(student_id)
        .bind(days)
        .fetch_optional(conn)
        .await?;

        info!(%student_id, ?subscription, ?until, "Extended subscription");
        Ok(until)
    }

    /// Guidance price of a live mentor
    pub async fn mentor_price(conn: &mut PgConnection, mentor_id: Uuid) -> sqlx::Result<Option<i64>> {
        sqlx::query_scalar(
            r#"
            SELECT mentor.price
            FROM mentors AS mentor
            JOIN users AS u ON u.id = mentor.user_id
            WHERE mentor.user_id = $1 AND u.deleted_at IS NULL
            "#,
        )
        .bind(mentor_id)
        .fetch_optional(conn)
        .await
    }

    /// Add `amount` to the mentor balance and record where it came from
    pub async fn credit_mentor(
        conn: &mut PgConnection,
        mentor_id: Uuid,
        payment_id: Uuid,
        amount: i64,
    ) -> sqlx::Result<()> {
        sqlx::query("UPDATE mentors SET balance = balance + $2 WHERE user_id = $1")
            .bind(mentor_id)
            .bind(amount)
            .execute(&mut *conn)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO mentor_transaction_histories (id, mentor_id, payment_id, amount)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(mentor_id)
        .bind(payment_id)
        .bind(amount)
        .execute(&mut *conn)
        .await?;

        info!(%mentor_id, %payment_id, amount, "Credited mentor balance");
        Ok(())
    }
}
