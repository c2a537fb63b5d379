//! Mentoring chat, trial and message queries

use std::time::Duration;

use common::pagination::PageRequest;
use sqlx::{PgConnection, QueryBuilder};
use uuid::Uuid;

use crate::models::{MentoringChat, MentoringMessage};

const CHAT_COLUMNS: &str = "id, mentor_id, student_id, expires_at, is_trial";
const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, body, created_at";

pub struct MentoringRepository;

impl MentoringRepository {
    /// Record the student's one trial. Returns `false` if it was used before.
    pub async fn claim_trial(conn: &mut PgConnection, student_id: Uuid) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "INSERT INTO mentoring_trials (student_id) VALUES ($1) ON CONFLICT (student_id) DO NOTHING",
        )
        .bind(student_id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Create the pair's chat, or extend it from `max(now, expires_at)`.
    /// An existing chat keeps its id.
    pub async fn upsert_chat(
        conn: &mut PgConnection,
        mentor_id: Uuid,
        student_id: Uuid,
        extension: Duration,
        is_trial: bool,
    ) -> sqlx::Result<MentoringChat> {
        sqlx::query_as::<_, MentoringChat>(&format!(
            r#"
            INSERT INTO mentoring_chats (id, mentor_id, student_id, expires_at, is_trial)
            VALUES ($1, $2, $3, now() + make_interval(secs => $4), $5)
            ON CONFLICT (mentor_id, student_id) DO UPDATE
            SET expires_at = GREATEST(now(), mentoring_chats.expires_at) + make_interval(secs => $4),
                is_trial = EXCLUDED.is_trial,
                updated_at = now()
            RETURNING {CHAT_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(mentor_id)
        .bind(student_id)
        .bind(extension.as_secs_f64())
        .bind(is_trial)
        .fetch_one(conn)
        .await
    }

    pub async fn find_chat(conn: &mut PgConnection, id: Uuid) -> sqlx::Result<Option<MentoringChat>> {
        sqlx::query_as::<_, MentoringChat>(&format!(
            "SELECT {CHAT_COLUMNS} FROM mentoring_chats WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    /// Insert a message while the chat is still open. Returns `None` when
    /// the chat expired in the meantime, so no stored message postdates
    /// its chat's expiry.
    pub async fn insert_message(
        conn: &mut PgConnection,
        chat_id: Uuid,
        sender_id: Uuid,
        body: &str,
    ) -> sqlx::Result<Option<MentoringMessage>> {
        sqlx::query_as::<_, MentoringMessage>(&format!(
            r#"
            INSERT INTO mentoring_messages (id, chat_id, sender_id, body)
            SELECT $1, chat.id, $3, $4
            FROM mentoring_chats AS chat
            WHERE chat.id = $2 AND chat.expires_at >= now()
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(chat_id)
        .bind(sender_id)
        .bind(body)
        .fetch_optional(conn)
        .await
    }

    /// One keyset page of a chat's messages, `limit + 1` rows
    pub async fn messages(
        conn: &mut PgConnection,
        chat_id: Uuid,
        page: &PageRequest,
    ) -> sqlx::Result<Vec<MentoringMessage>> {
        let mut builder = QueryBuilder::new(format!(
            "SELECT {MESSAGE_COLUMNS} FROM mentoring_messages WHERE chat_id = "
        ));
        builder.push_bind(chat_id);
        page.push_keyset(&mut builder, "id");

        builder
            .build_query_as::<MentoringMessage>()
            .fetch_all(conn)
            .await
    }
}
