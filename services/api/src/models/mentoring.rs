//! Mentoring chat models

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MentoringChat {
    pub id: Uuid,
    pub mentor_id: Uuid,
    pub student_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub is_trial: bool,
}

impl MentoringChat {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.mentor_id == user_id || self.student_id == user_id
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// A chat message. This is also the WebSocket frame payload.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MentoringMessage {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}
