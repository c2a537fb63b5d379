//! User repository for database operations

use sqlx::PgConnection;
use tracing::info;
use uuid::Uuid;

use crate::models::{NewUser, User};

const USER_COLUMNS: &str = "id, email, password_hash, name, role, has_avatar, created_at";

/// User repository. Functions take a connection so they can run inside a
/// caller's transaction.
pub struct UserRepository;

impl UserRepository {
    /// Create a student account: the user row plus its student profile.
    /// Run inside a transaction.
    pub async fn create_student(conn: &mut PgConnection, new_user: &NewUser) -> sqlx::Result<User> {
        info!("Creating new student: {}", new_user.email);

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, email, password_hash, name, role)
            VALUES ($1, $2, $3, $4, 'student')
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .bind(&new_user.name)
        .fetch_one(&mut *conn)
        .await?;

        sqlx::query("INSERT INTO students (user_id) VALUES ($1)")
            .bind(user.id)
            .execute(&mut *conn)
            .await?;

        Ok(user)
    }

    /// Find a live (not soft-deleted) user by email
    pub async fn find_by_email(conn: &mut PgConnection, email: &str) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted_at IS NULL"
        ))
        .bind(email)
        .fetch_optional(conn)
        .await
    }

    /// Find a live user by ID
    pub async fn find_by_id(conn: &mut PgConnection, id: Uuid) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    pub async fn email_exists(conn: &mut PgConnection, email: &str) -> sqlx::Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users WHERE email = $1 AND deleted_at IS NULL)",
        )
        .bind(email)
        .fetch_one(conn)
        .await
    }

    /// Replace the password hash, returning the updated user
    pub async fn update_password(
        conn: &mut PgConnection,
        email: &str,
        password_hash: &str,
    ) -> sqlx::Result<Option<User>> {
        info!("Updating password for: {}", email);

        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET password_hash = $2, updated_at = now()
            WHERE email = $1 AND deleted_at IS NULL
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(email)
        .bind(password_hash)
        .fetch_optional(conn)
        .await
    }
}
