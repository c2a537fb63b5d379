//! Chat persistence, access checks and expiry

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use common::{
    error::{AppError, AppResult, FieldError},
    pagination::{Page, PageRequest},
    role::Role,
    validation::{Validator, validate_length},
};
use sqlx::{PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use super::hub::ChatHub;
use crate::{
    models::{MentoringChat, MentoringMessage},
    repositories::{AccountRepository, MentoringRepository},
};

pub const TRIAL_DURATION: Duration = Duration::from_secs(15 * 60);
pub const GUIDANCE_DURATION: Duration = Duration::from_secs(24 * 60 * 60);
pub const BODY_MAX: usize = 2000;

/// Open or extend the chat between a mentor and a student.
///
/// Trials are once per student. Runs on the caller's connection so payment
/// effects can open chats inside their own transaction.
pub async fn create_chat(
    conn: &mut PgConnection,
    mentor_id: Uuid,
    student_id: Uuid,
    is_trial: bool,
) -> AppResult<MentoringChat> {
    let mut validator = Validator::new();
    if AccountRepository::role_of(conn, mentor_id).await? != Some(Role::Mentor) {
        validator.check(Err(FieldError::new(
            "mentor_id",
            "User is not a mentor",
        )));
    }
    if AccountRepository::role_of(conn, student_id).await? != Some(Role::Student) {
        validator.check(Err(FieldError::new(
            "student_id",
            "User is not a student",
        )));
    }
    validator.finish()?;

    if is_trial && !MentoringRepository::claim_trial(conn, student_id).await? {
        return Err(AppError::TrialUsed);
    }

    let extension = if is_trial {
        TRIAL_DURATION
    } else {
        GUIDANCE_DURATION
    };
    let chat =
        MentoringRepository::upsert_chat(conn, mentor_id, student_id, extension, is_trial).await?;

    info!(
        chat_id = %chat.id,
        %mentor_id,
        %student_id,
        is_trial,
        expires_at = %chat.expires_at,
        "Mentoring chat opened"
    );
    Ok(chat)
}

/// Senders must take part in the chat, and the chat must still be open
pub fn ensure_can_send(chat: &MentoringChat, sender_id: Uuid, now: DateTime<Utc>) -> AppResult<()> {
    if !chat.is_participant(sender_id) {
        return Err(AppError::ForbiddenUser);
    }
    if chat.is_expired(now) {
        return Err(AppError::ChatExpired);
    }
    Ok(())
}

#[derive(Clone)]
pub struct ChatService {
    pool: PgPool,
    hub: ChatHub,
}

impl ChatService {
    pub fn new(pool: PgPool, hub: ChatHub) -> Self {
        Self { pool, hub }
    }

    pub fn hub(&self) -> &ChatHub {
        &self.hub
    }

    /// Claim the student's one free 15 minute chat with a mentor
    pub async fn start_trial(&self, student_id: Uuid, mentor_id: Uuid) -> AppResult<MentoringChat> {
        let mut tx = self.pool.begin().await?;
        let chat = create_chat(&mut tx, mentor_id, student_id, true).await?;
        tx.commit().await?;
        Ok(chat)
    }

    /// The chat, if `user_id` takes part in it
    pub async fn participant_chat(&self, user_id: Uuid, chat_id: Uuid) -> AppResult<MentoringChat> {
        let mut conn = self.pool.acquire().await?;
        let chat = MentoringRepository::find_chat(&mut conn, chat_id)
            .await?
            .ok_or(AppError::NotFound("Chat"))?;

        if !chat.is_participant(user_id) {
            return Err(AppError::ForbiddenUser);
        }
        Ok(chat)
    }

    /// Store a message and push it to the other participant's connections
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        chat_id: Uuid,
        body: &str,
    ) -> AppResult<MentoringMessage> {
        let mut conn = self.pool.acquire().await?;
        let chat = MentoringRepository::find_chat(&mut conn, chat_id)
            .await?
            .ok_or(AppError::NotFound("Chat"))?;
        ensure_can_send(&chat, sender_id, Utc::now())?;

        Validator::new()
            .check(validate_length("body", body.trim(), 1, BODY_MAX))
            .finish()?;

        let message = MentoringRepository::insert_message(&mut conn, chat_id, sender_id, body)
            .await?
            .ok_or(AppError::ChatExpired)?;
        drop(conn);

        let frame = serde_json::to_string(&message).context("Failed to encode chat frame")?;
        self.hub.broadcast(chat_id, sender_id, &frame).await;

        Ok(message)
    }

    /// A page of messages, newest first. Expired chats stay readable.
    pub async fn get_messages(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        page: PageRequest,
    ) -> AppResult<Page<MentoringMessage>> {
        self.participant_chat(user_id, chat_id).await?;

        let mut conn = self.pool.acquire().await?;
        let rows = MentoringRepository::messages(&mut conn, chat_id, &page).await?;
        Ok(Page::from_rows(rows, &page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::seed_user;
    use chrono::Duration as ChronoDuration;
    use common::pagination::Direction;
    use tokio::sync::mpsc::unbounded_channel;

    fn chat(expires_at: DateTime<Utc>) -> MentoringChat {
        MentoringChat {
            id: Uuid::now_v7(),
            mentor_id: Uuid::now_v7(),
            student_id: Uuid::now_v7(),
            expires_at,
            is_trial: false,
        }
    }

    #[test]
    fn participation_is_checked_before_expiry() {
        let now = Utc::now();
        let expired = chat(now - ChronoDuration::minutes(1));

        assert!(matches!(
            ensure_can_send(&expired, Uuid::now_v7(), now),
            Err(AppError::ForbiddenUser)
        ));
        assert!(matches!(
            ensure_can_send(&expired, expired.student_id, now),
            Err(AppError::ChatExpired)
        ));

        let open = chat(now + ChronoDuration::minutes(1));
        assert!(ensure_can_send(&open, open.mentor_id, now).is_ok());
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
    async fn trial_chat_expires_and_cannot_be_reused(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let student = seed_user(&mut conn, Role::Student).await;
        let mentor = seed_user(&mut conn, Role::Mentor).await;
        drop(conn);

        let chats = ChatService::new(pool.clone(), ChatHub::new());
        let trial = chats.start_trial(student, mentor).await.unwrap();
        assert!(trial.is_trial);
        assert!(trial.expires_at <= Utc::now() + ChronoDuration::minutes(15));

        assert!(matches!(
            chats.start_trial(student, mentor).await.unwrap_err(),
            AppError::TrialUsed
        ));

        // roles are checked
        assert!(matches!(
            chats.start_trial(mentor, student).await.unwrap_err(),
            AppError::Validation(ref fields) if fields.len() == 2
        ));

        let (mentor_tx, mut mentor_rx) = unbounded_channel();
        chats.hub().register(trial.id, mentor, mentor_tx).await;

        let message = chats.send_message(student, trial.id, "Hello!").await.unwrap();
        let frame: serde_json::Value =
            serde_json::from_str(&mentor_rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["id"], message.id.to_string());
        assert_eq!(frame["body"], "Hello!");

        assert!(matches!(
            chats.send_message(Uuid::now_v7(), trial.id, "intruder").await.unwrap_err(),
            AppError::ForbiddenUser
        ));
        assert!(matches!(
            chats.send_message(student, trial.id, "   ").await.unwrap_err(),
            AppError::Validation(_)
        ));

        sqlx::query("UPDATE mentoring_chats SET expires_at = now() - interval '1 second' WHERE id = $1")
            .bind(trial.id)
            .execute(&pool)
            .await
            .unwrap();
        assert!(matches!(
            chats.send_message(mentor, trial.id, "too late").await.unwrap_err(),
            AppError::ChatExpired
        ));

        // history stays readable
        let page = chats
            .get_messages(
                mentor,
                trial.id,
                PageRequest {
                    cursor: None,
                    direction: Direction::Next,
                    limit: 10,
                },
            )
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(!page.pagination.has_more);
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
    async fn reopening_extends_from_current_expiry(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let student = seed_user(&mut conn, Role::Student).await;
        let mentor = seed_user(&mut conn, Role::Mentor).await;

        let first = create_chat(&mut conn, mentor, student, false).await.unwrap();
        let second = create_chat(&mut conn, mentor, student, false).await.unwrap();

        assert_eq!(first.id, second.id);
        let extended = second.expires_at - first.expires_at;
        assert!(extended >= ChronoDuration::hours(24));
        assert!(extended < ChronoDuration::hours(25));
    }
}
