//! Course catalog: content listing with access control, enrollment, content
//! authoring and course feedback

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{
    auth::AuthUser,
    error::{AppError, AppResult, FieldError},
    role::Role,
    validation::{Validator, validate_length},
};
use futures::future::try_join_all;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    models::{
        ContentItem, ContentPatch, CourseFeedback, CourseMaterial, CourseVideo, Enrollment,
        NewMaterial, NewVideo, merge_contents,
    },
    progress::{DeletedContent, ProgressEngine},
    repositories::{AccountRepository, CourseRepository, is_unique_violation},
    storage::{ObjectStore, material_key, video_key},
};

const TITLE_MAX: usize = 200;
const COMMENT_MAX: usize = 1000;

/// How much of a course's content a caller may open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentAccess {
    Full,
    FreeOnly,
}

/// Admins open everything; students need an enrollment and a running
/// boost subscription; everyone else only gets free items.
pub fn content_access(
    viewer: Option<Role>,
    enrolled: bool,
    boost_until: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> ContentAccess {
    match viewer {
        Some(Role::Admin) => ContentAccess::Full,
        Some(Role::Student) if enrolled && boost_until.is_some_and(|until| until > now) => {
            ContentAccess::Full
        }
        _ => ContentAccess::FreeOnly,
    }
}

/// A newly created content item and where to upload its bytes
#[derive(Debug, Serialize)]
pub struct CreatedContent<T> {
    pub item: T,
    pub upload_url: String,
}

#[derive(Debug, Clone)]
pub struct VideoInput {
    pub title: String,
    pub order: i32,
    pub is_free: bool,
    pub duration: i32,
}

#[derive(Debug, Clone)]
pub struct MaterialInput {
    pub title: String,
    pub order: i32,
    pub is_free: bool,
}

fn validate_title(title: &str) -> Result<(), FieldError> {
    validate_length("title", title.trim(), 1, TITLE_MAX)
}

fn validate_patch(patch: &ContentPatch) -> AppResult<()> {
    if patch.title.is_none() && patch.order.is_none() && patch.is_free.is_none() {
        return Err(AppError::validation(
            "body",
            "At least one of title, order or is_free must be provided",
        ));
    }

    let mut validator = Validator::new();
    if let Some(title) = &patch.title {
        validator.check(validate_title(title));
    }
    validator.finish()
}

#[derive(Clone)]
pub struct CatalogService {
    pool: PgPool,
    storage: Arc<dyn ObjectStore>,
    progress: ProgressEngine,
}

impl CatalogService {
    pub fn new(pool: PgPool, storage: Arc<dyn ObjectStore>, progress: ProgressEngine) -> Self {
        Self {
            pool,
            storage,
            progress,
        }
    }

    /// Course content in display order. Items the caller may not open carry
    /// no URL.
    pub async fn list_contents(
        &self,
        viewer: Option<AuthUser>,
        course_id: Uuid,
    ) -> AppResult<Vec<ContentItem>> {
        let mut conn = self.pool.acquire().await?;
        CourseRepository::find(&mut conn, course_id)
            .await?
            .ok_or(AppError::NotFound("Course"))?;

        let access = match viewer {
            Some(user) if user.role == Role::Student => {
                let enrolled = CourseRepository::enrollment(&mut conn, course_id, user.id)
                    .await?
                    .is_some();
                let boost_until = AccountRepository::boost_until(&mut conn, user.id).await?;
                content_access(Some(user.role), enrolled, boost_until, Utc::now())
            }
            other => content_access(other.map(|user| user.role), false, None, Utc::now()),
        };

        let videos = CourseRepository::videos(&mut conn, course_id).await?;
        let materials = CourseRepository::materials(&mut conn, course_id).await?;
        drop(conn);

        let contents = merge_contents(videos, materials);
        let urls = try_join_all(contents.iter().map(|content| async move {
            if access == ContentAccess::Full || content.is_free() {
                self.storage.signed_get_url(content.object_key()).await.map(Some)
            } else {
                Ok(None)
            }
        }))
        .await
        .map_err(anyhow::Error::from)?;

        Ok(contents
            .into_iter()
            .zip(urls)
            .map(|(content, url)| ContentItem::new(content, url))
            .collect())
    }

    pub async fn enroll(&self, student_id: Uuid, course_id: Uuid) -> AppResult<Enrollment> {
        let mut tx = self.pool.begin().await?;
        CourseRepository::find(&mut tx, course_id)
            .await?
            .ok_or(AppError::NotFound("Course"))?;

        let enrollment = match CourseRepository::enroll(&mut tx, course_id, student_id).await {
            Ok(enrollment) => enrollment,
            Err(e) if is_unique_violation(&e) => return Err(AppError::StudentAlreadyEnrolled),
            Err(e) => return Err(e.into()),
        };
        tx.commit().await?;

        info!(%course_id, %student_id, "Student enrolled");
        Ok(enrollment)
    }

    pub async fn create_video(
        &self,
        course_id: Uuid,
        input: VideoInput,
    ) -> AppResult<CreatedContent<CourseVideo>> {
        let mut validator = Validator::new();
        validator.check(validate_title(&input.title));
        if input.duration < 1 {
            validator.check(Err(FieldError::new(
                "duration",
                "duration must be at least 1 second",
            )));
        }
        validator.finish()?;

        let mut tx = self.pool.begin().await?;
        CourseRepository::find(&mut tx, course_id)
            .await?
            .ok_or(AppError::NotFound("Course"))?;

        let id = Uuid::now_v7();
        let video = CourseRepository::insert_video(
            &mut tx,
            &NewVideo {
                id,
                course_id,
                title: input.title.trim().to_string(),
                order: input.order,
                is_free: input.is_free,
                duration: input.duration,
                object_key: video_key(course_id, id),
            },
        )
        .await?;
        CourseRepository::add_content(&mut tx, course_id, video.duration).await?;

        let upload_url = self
            .storage
            .signed_put_url(&video.object_key)
            .await
            .map_err(anyhow::Error::from)?;
        tx.commit().await?;

        Ok(CreatedContent {
            item: video,
            upload_url,
        })
    }

    pub async fn create_material(
        &self,
        course_id: Uuid,
        input: MaterialInput,
    ) -> AppResult<CreatedContent<CourseMaterial>> {
        Validator::new().check(validate_title(&input.title)).finish()?;

        let mut tx = self.pool.begin().await?;
        CourseRepository::find(&mut tx, course_id)
            .await?
            .ok_or(AppError::NotFound("Course"))?;

        let id = Uuid::now_v7();
        let material = CourseRepository::insert_material(
            &mut tx,
            &NewMaterial {
                id,
                course_id,
                title: input.title.trim().to_string(),
                order: input.order,
                is_free: input.is_free,
                object_key: material_key(course_id, id),
            },
        )
        .await?;
        CourseRepository::add_content(&mut tx, course_id, 0).await?;

        let upload_url = self
            .storage
            .signed_put_url(&material.object_key)
            .await
            .map_err(anyhow::Error::from)?;
        tx.commit().await?;

        Ok(CreatedContent {
            item: material,
            upload_url,
        })
    }

    pub async fn patch_video(&self, id: Uuid, mut patch: ContentPatch) -> AppResult<CourseVideo> {
        validate_patch(&patch)?;
        patch.title = patch.title.map(|title| title.trim().to_string());

        let mut conn = self.pool.acquire().await?;
        CourseRepository::patch_video(&mut conn, id, patch)
            .await?
            .ok_or(AppError::NotFound("Video"))
    }

    pub async fn patch_material(
        &self,
        id: Uuid,
        mut patch: ContentPatch,
    ) -> AppResult<CourseMaterial> {
        validate_patch(&patch)?;
        patch.title = patch.title.map(|title| title.trim().to_string());

        let mut conn = self.pool.acquire().await?;
        CourseRepository::patch_material(&mut conn, id, patch)
            .await?
            .ok_or(AppError::NotFound("Material"))
    }

    pub async fn delete_video(&self, id: Uuid) -> AppResult<()> {
        let deleted = self.progress.delete_video(id).await?;
        self.delete_object(deleted).await;
        Ok(())
    }

    pub async fn delete_material(&self, id: Uuid) -> AppResult<()> {
        let deleted = self.progress.delete_material(id).await?;
        self.delete_object(deleted).await;
        Ok(())
    }

    /// The rows are gone at this point; a stray object is only logged
    async fn delete_object(&self, deleted: DeletedContent) {
        if let Err(e) = self.storage.delete(&deleted.object_key).await {
            warn!(
                course_id = %deleted.course_id,
                "Failed to delete content object: {}",
                e
            );
        }
    }

    pub async fn submit_feedback(
        &self,
        student_id: Uuid,
        course_id: Uuid,
        rating: i16,
        comment: &str,
    ) -> AppResult<CourseFeedback> {
        let mut validator = Validator::new();
        if !(1..=5).contains(&rating) {
            validator.check(Err(FieldError::new(
                "rating",
                "rating must be between 1 and 5",
            )));
        }
        validator.check(validate_length("comment", comment, 0, COMMENT_MAX));
        validator.finish()?;

        let mut tx = self.pool.begin().await?;
        CourseRepository::find(&mut tx, course_id)
            .await?
            .ok_or(AppError::NotFound("Course"))?;

        let enrollment = CourseRepository::enrollment(&mut tx, course_id, student_id)
            .await?
            .ok_or(AppError::CannotFeedbackUnenrolledCourse)?;
        if !enrollment.is_completed {
            return Err(AppError::CannotFeedbackUncompletedCourse);
        }

        let feedback = match CourseRepository::insert_feedback(
            &mut tx, course_id, student_id, rating, comment,
        )
        .await
        {
            Ok(feedback) => feedback,
            Err(e) if is_unique_violation(&e) => {
                return Err(AppError::StudentAlreadySubmittedFeedback);
            }
            Err(e) => return Err(e.into()),
        };
        tx.commit().await?;

        info!(%course_id, %student_id, rating, "Course feedback submitted");
        Ok(feedback)
    }
}
