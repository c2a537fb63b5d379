//! User model and related functionality

use chrono::{DateTime, Utc};
use common::role::Role;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// User entity
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub has_avatar: bool,
    pub created_at: DateTime<Utc>,
}

/// New student account payload
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
}

/// Public view of a user returned alongside tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSnapshot {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub has_avatar: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserSnapshot {
    fn from(user: &User) -> Self {
        UserSnapshot {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
            has_avatar: user.has_avatar,
            created_at: user.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_never_carries_the_hash() {
        let user = User {
            id: Uuid::now_v7(),
            email: "ada@example.com".to_string(),
            password_hash: "$2b$10$abcdefghijklmnopqrstuv".to_string(),
            name: "Ada".to_string(),
            role: Role::Student,
            has_avatar: false,
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(UserSnapshot::from(&user)).unwrap();
        assert_eq!(json["role"], "student");
        assert!(json.get("password_hash").is_none());
    }
}
