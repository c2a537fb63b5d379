//! Course catalog models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Video,
    Material,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Course {
    pub id: Uuid,
    pub category_id: Uuid,
    pub title: String,
    pub rating: f32,
    pub rating_count: i32,
    pub rating_total: i32,
    pub enrollment_count: i32,
    pub content_count: i32,
    pub total_duration: i32,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CourseVideo {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub order: i32,
    pub is_free: bool,
    /// Seconds
    pub duration: i32,
    #[serde(skip_serializing)]
    pub object_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CourseMaterial {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub order: i32,
    pub is_free: bool,
    #[serde(skip_serializing)]
    pub object_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Enrollment {
    pub course_id: Uuid,
    pub student_id: Uuid,
    pub content_completed: i32,
    pub is_completed: bool,
    pub last_accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CourseFeedback {
    pub course_id: Uuid,
    pub student_id: Uuid,
    pub rating: i16,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewVideo {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub order: i32,
    pub is_free: bool,
    pub duration: i32,
    pub object_key: String,
}

#[derive(Debug, Clone)]
pub struct NewMaterial {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub order: i32,
    pub is_free: bool,
    pub object_key: String,
}

/// Partial metadata update shared by videos and materials
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentPatch {
    pub title: Option<String>,
    pub order: Option<i32>,
    pub is_free: Option<bool>,
}

/// A course content row of either kind
#[derive(Debug, Clone)]
pub enum Content {
    Video(CourseVideo),
    Material(CourseMaterial),
}

impl Content {
    pub fn kind(&self) -> ContentKind {
        match self {
            Content::Video(_) => ContentKind::Video,
            Content::Material(_) => ContentKind::Material,
        }
    }

    pub fn is_free(&self) -> bool {
        match self {
            Content::Video(video) => video.is_free,
            Content::Material(material) => material.is_free,
        }
    }

    pub fn object_key(&self) -> &str {
        match self {
            Content::Video(video) => &video.object_key,
            Content::Material(material) => &material.object_key,
        }
    }
}

/// Listing entry. `url` is a presigned download link, or `null` when the
/// caller may not open the item.
#[derive(Debug, Clone, Serialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub kind: ContentKind,
    pub title: String,
    pub order: i32,
    pub is_free: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i32>,
    pub url: Option<String>,
}

impl ContentItem {
    pub fn new(content: Content, url: Option<String>) -> Self {
        let kind = content.kind();
        match content {
            Content::Video(video) => ContentItem {
                id: video.id,
                kind,
                title: video.title,
                order: video.order,
                is_free: video.is_free,
                duration: Some(video.duration),
                url,
            },
            Content::Material(material) => ContentItem {
                id: material.id,
                kind,
                title: material.title,
                order: material.order,
                is_free: material.is_free,
                duration: None,
                url,
            },
        }
    }
}

/// Merge two lists already sorted by `(order, id)` into listing order.
/// Videos come first when both kinds share an `order`.
pub fn merge_contents(videos: Vec<CourseVideo>, materials: Vec<CourseMaterial>) -> Vec<Content> {
    let mut merged = Vec::with_capacity(videos.len() + materials.len());
    let mut videos = videos.into_iter().peekable();
    let mut materials = materials.into_iter().peekable();

    loop {
        let take_video = match (videos.peek(), materials.peek()) {
            (Some(video), Some(material)) => video.order <= material.order,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };

        let next = if take_video {
            videos.next().map(Content::Video)
        } else {
            materials.next().map(Content::Material)
        };
        merged.extend(next);
    }

    merged
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn video(order: i32, is_free: bool) -> CourseVideo {
        CourseVideo {
            id: Uuid::now_v7(),
            course_id: Uuid::nil(),
            title: format!("Video {order}"),
            order,
            is_free,
            duration: 120,
            object_key: format!("courses/nil/videos/{order}"),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn material(order: i32, is_free: bool) -> CourseMaterial {
        CourseMaterial {
            id: Uuid::now_v7(),
            course_id: Uuid::nil(),
            title: format!("Material {order}"),
            order,
            is_free,
            object_key: format!("courses/nil/materials/{order}"),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
