//! Enrollment progress engine
//!
//! Tracks which content items a student has finished, flips the enrollment
//! to completed once every item is done (crediting the completion bonus
//! exactly once), and keeps the per-enrollment counters consistent when
//! content is deleted.

use common::error::{AppError, AppResult};
use sqlx::{PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::repositories::{CourseRepository, ProgressRepository};

/// Points credited when a student completes a course
pub const COMPLETION_BONUS: i32 = 50;

/// Submitted progress for one content item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUpdate {
    Video { last_position: i32, completed: bool },
    Material,
}

/// What a progress update changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressOutcome {
    /// The item went from not completed to completed
    pub newly_completed: bool,
    /// This update flipped the enrollment to completed
    pub course_completed: bool,
}

/// A content row removed from a course
#[derive(Debug, Clone)]
pub struct DeletedContent {
    pub course_id: Uuid,
    pub object_key: String,
    /// Enrollments whose completed count was decremented
    pub enrollments_adjusted: u64,
}

#[derive(Clone)]
pub struct ProgressEngine {
    pool: PgPool,
}

impl ProgressEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply a student's progress on a content item
    pub async fn update(
        &self,
        student_id: Uuid,
        content_id: Uuid,
        update: ProgressUpdate,
    ) -> AppResult<ProgressOutcome> {
        if let ProgressUpdate::Video { last_position, .. } = update {
            if last_position < 0 {
                return Err(AppError::validation(
                    "last_position",
                    "last_position must not be negative",
                ));
            }
        }

        let mut conn = self.pool.acquire().await?;
        let course_id = match update {
            ProgressUpdate::Video { .. } => {
                ProgressRepository::video_course(&mut conn, content_id).await?
            }
            ProgressUpdate::Material => {
                ProgressRepository::material_course(&mut conn, content_id).await?
            }
        }
        .ok_or_else(|| AppError::validation("id", "No content with this id"))?;
        drop(conn);

        let mut tx = self.pool.begin().await?;
        if !ProgressRepository::is_enrolled(&mut tx, course_id, student_id).await? {
            return Err(AppError::ForbiddenUser);
        }

        let newly_completed = match update {
            ProgressUpdate::Video {
                last_position,
                completed,
            } => {
                ProgressRepository::ensure_video_progress(&mut tx, student_id, content_id).await?;
                let completion = ProgressRepository::update_video_progress(
                    &mut tx,
                    student_id,
                    content_id,
                    last_position,
                    completed,
                )
                .await?;
                completion.newly_completed()
            }
            ProgressUpdate::Material => {
                ProgressRepository::complete_material(&mut tx, student_id, content_id).await?
            }
        };

        let course_completed = if newly_completed {
            record_completed_item(&mut tx, course_id, student_id).await?
        } else {
            ProgressRepository::touch_enrollment(&mut tx, course_id, student_id).await?;
            false
        };

        tx.commit().await?;

        Ok(ProgressOutcome {
            newly_completed,
            course_completed,
        })
    }

    /// Delete a video and take it off every enrollment that had completed it.
    /// `is_completed` on enrollments is left as is.
    pub async fn delete_video(&self, video_id: Uuid) -> AppResult<DeletedContent> {
        let mut tx = self.pool.begin().await?;

        let video = ProgressRepository::lock_video(&mut tx, video_id)
            .await?
            .ok_or(AppError::NotFound("Video"))?;
        let enrollments_adjusted =
            ProgressRepository::uncount_video(&mut tx, video.course_id, video.id).await?;
        ProgressRepository::delete_video(&mut tx, video.id).await?;
        CourseRepository::remove_content(&mut tx, video.course_id, video.duration).await?;

        tx.commit().await?;

        info!(
            video_id = %video.id,
            course_id = %video.course_id,
            enrollments_adjusted,
            "Deleted course video"
        );
        Ok(DeletedContent {
            course_id: video.course_id,
            object_key: video.object_key,
            enrollments_adjusted,
        })
    }

    /// Material counterpart of [`ProgressEngine::delete_video`]
    pub async fn delete_material(&self, material_id: Uuid) -> AppResult<DeletedContent> {
        let mut tx = self.pool.begin().await?;

        let material = ProgressRepository::lock_material(&mut tx, material_id)
            .await?
            .ok_or(AppError::NotFound("Material"))?;
        let enrollments_adjusted =
            ProgressRepository::uncount_material(&mut tx, material.course_id, material.id).await?;
        ProgressRepository::delete_material(&mut tx, material.id).await?;
        CourseRepository::remove_content(&mut tx, material.course_id, 0).await?;

        tx.commit().await?;

        info!(
            material_id = %material.id,
            course_id = %material.course_id,
            enrollments_adjusted,
            "Deleted course material"
        );
        Ok(DeletedContent {
            course_id: material.course_id,
            object_key: material.object_key,
            enrollments_adjusted,
        })
    }
}

/// Count a newly completed item and complete the enrollment once the count
/// reaches the course inventory. Returns whether this call completed it.
async fn record_completed_item(
    conn: &mut PgConnection,
    course_id: Uuid,
    student_id: Uuid,
) -> AppResult<bool> {
    let counters = ProgressRepository::count_completed_item(conn, course_id, student_id).await?;
    if counters.is_completed || counters.content_completed < counters.content_count {
        return Ok(false);
    }

    if !ProgressRepository::mark_completed(conn, course_id, student_id).await? {
        return Ok(false);
    }

    ProgressRepository::credit_points(conn, student_id, COMPLETION_BONUS).await?;
    info!(%course_id, %student_id, "Course completed, bonus credited");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{lazy_pool, seed_course, seed_user};
    use common::role::Role;

    #[tokio::test]
    async fn negative_position_is_rejected_before_any_query() {
        let engine = ProgressEngine::new(lazy_pool());

        let err = engine
            .update(
                Uuid::now_v7(),
                Uuid::now_v7(),
                ProgressUpdate::Video {
                    last_position: -1,
                    completed: false,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref fields) if fields[0].field == "last_position"));
    }

    async fn seed_video(conn: &mut PgConnection, course_id: Uuid, duration: i32) -> Uuid {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"INSERT INTO course_videos (id, course_id, title, "order", duration, object_key) VALUES ($1, $2, 'v', 1, $3, 'k')"#,
        )
        .bind(id)
        .bind(course_id)
        .bind(duration)
        .execute(&mut *conn)
        .await
        .unwrap();
        CourseRepository::add_content(conn, course_id, duration).await.unwrap();
        id
    }

    async fn seed_material(conn: &mut PgConnection, course_id: Uuid) -> Uuid {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"INSERT INTO course_materials (id, course_id, title, "order", object_key) VALUES ($1, $2, 'm', 2, 'k')"#,
        )
        .bind(id)
        .bind(course_id)
        .execute(&mut *conn)
        .await
        .unwrap();
        CourseRepository::add_content(conn, course_id, 0).await.unwrap();
        id
    }

    async fn points(pool: &PgPool, student: Uuid) -> i32 {
        sqlx::query_scalar("SELECT point FROM students WHERE user_id = $1")
            .bind(student)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn enrollment(pool: &PgPool, course: Uuid, student: Uuid) -> (i32, bool) {
        sqlx::query_as(
            "SELECT content_completed, is_completed FROM course_enrollments WHERE course_id = $1 AND student_id = $2",
        )
        .bind(course)
        .bind(student)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
    async fn completing_every_item_credits_bonus_once(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let student = seed_user(&mut conn, Role::Student).await;
        let course = seed_course(&mut conn).await;
        let video = seed_video(&mut conn, course, 300).await;
        let material = seed_material(&mut conn, course).await;
        CourseRepository::enroll(&mut conn, course, student).await.unwrap();
        drop(conn);

        let engine = ProgressEngine::new(pool.clone());
        let watch = |completed| ProgressUpdate::Video {
            last_position: 120,
            completed,
        };

        let outcome = engine.update(student, video, watch(false)).await.unwrap();
        assert_eq!(outcome, ProgressOutcome::default());

        let outcome = engine.update(student, video, watch(true)).await.unwrap();
        assert!(outcome.newly_completed);
        assert!(!outcome.course_completed);

        // resubmitting a completed video does not count twice
        let outcome = engine.update(student, video, watch(true)).await.unwrap();
        assert!(!outcome.newly_completed);
        let outcome = engine.update(student, video, watch(false)).await.unwrap();
        assert!(!outcome.newly_completed);

        let outcome = engine.update(student, material, ProgressUpdate::Material).await.unwrap();
        assert!(outcome.course_completed);
        assert_eq!(enrollment(&pool, course, student).await, (2, true));
        assert_eq!(points(&pool, student).await, COMPLETION_BONUS);

        let outcome = engine.update(student, material, ProgressUpdate::Material).await.unwrap();
        assert_eq!(outcome, ProgressOutcome::default());
        assert_eq!(points(&pool, student).await, COMPLETION_BONUS);
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
    async fn progress_requires_enrollment_and_known_content(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let student = seed_user(&mut conn, Role::Student).await;
        let course = seed_course(&mut conn).await;
        let material = seed_material(&mut conn, course).await;
        drop(conn);

        let engine = ProgressEngine::new(pool);
        let err = engine
            .update(student, material, ProgressUpdate::Material)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ForbiddenUser));

        let err = engine
            .update(student, Uuid::now_v7(), ProgressUpdate::Material)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
    async fn deleting_completed_content_rolls_back_counters(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let finished = seed_user(&mut conn, Role::Student).await;
        let started = seed_user(&mut conn, Role::Student).await;
        let idle = seed_user(&mut conn, Role::Student).await;
        let course = seed_course(&mut conn).await;
        let video = seed_video(&mut conn, course, 300).await;
        let material = seed_material(&mut conn, course).await;
        CourseRepository::enroll(&mut conn, course, finished).await.unwrap();
        CourseRepository::enroll(&mut conn, course, started).await.unwrap();
        CourseRepository::enroll(&mut conn, course, idle).await.unwrap();
        drop(conn);

        let engine = ProgressEngine::new(pool.clone());
        let done = ProgressUpdate::Video {
            last_position: 300,
            completed: true,
        };
        engine.update(finished, video, done).await.unwrap();
        engine.update(finished, material, ProgressUpdate::Material).await.unwrap();
        engine.update(started, material, ProgressUpdate::Material).await.unwrap();
        let watching = ProgressUpdate::Video {
            last_position: 30,
            completed: false,
        };
        engine.update(started, video, watching).await.unwrap();

        let deleted = engine.delete_video(video).await.unwrap();
        assert_eq!(deleted.course_id, course);
        assert_eq!(deleted.object_key, "k");
        assert_eq!(deleted.enrollments_adjusted, 1);

        assert_eq!(enrollment(&pool, course, finished).await, (1, true));
        assert_eq!(enrollment(&pool, course, started).await, (1, false));
        assert_eq!(enrollment(&pool, course, idle).await, (0, false));

        let progress_rows: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM course_video_progresses WHERE video_id = $1")
                .bind(video)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(progress_rows, 0);

        let (content_count, total_duration): (i32, i32) =
            sqlx::query_as("SELECT content_count, total_duration FROM courses WHERE id = $1")
                .bind(course)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!((content_count, total_duration), (1, 0));

        let err = engine.delete_video(video).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("Video")));
    }
}
