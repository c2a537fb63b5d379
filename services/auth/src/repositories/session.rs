//! Refresh session repository

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

pub struct SessionRepository;

impl SessionRepository {
    /// Store a new refresh token for the user, replacing any previous one
    pub async fn upsert(
        conn: &mut PgConnection,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO auth_sessions (token, user_id, created_at, expires_at)
            VALUES ($1, $2, now(), $3)
            ON CONFLICT (user_id) DO UPDATE
            SET token = EXCLUDED.token,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Swap a live refresh token for a new one in a single statement.
    ///
    /// Returns the owning user, or `None` when the token is unknown or
    /// expired. Two concurrent rotations of the same token cannot both win.
    pub async fn rotate(
        conn: &mut PgConnection,
        current: &str,
        replacement: &str,
        expires_at: DateTime<Utc>,
    ) -> sqlx::Result<Option<Uuid>> {
        sqlx::query_scalar(
            r#"
            UPDATE auth_sessions
            SET token = $2, created_at = now(), expires_at = $3
            WHERE token = $1 AND expires_at > now()
            RETURNING user_id
            "#,
        )
        .bind(current)
        .bind(replacement)
        .bind(expires_at)
        .fetch_optional(conn)
        .await
    }

    /// Remove the user's session, returning whether one existed
    pub async fn delete_by_user(conn: &mut PgConnection, user_id: Uuid) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM auth_sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
