//! Content progress and completion counters

use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use super::course::{MATERIAL_COLUMNS, VIDEO_COLUMNS};
use crate::models::{CourseMaterial, CourseVideo};

/// Completion flag of a video progress row before and after an update
#[derive(Debug, Clone, Copy, FromRow)]
pub struct VideoCompletion {
    pub was_completed: bool,
    pub is_completed: bool,
}

impl VideoCompletion {
    /// Whether this update is the one that completed the video
    pub fn newly_completed(&self) -> bool {
        self.is_completed && !self.was_completed
    }
}

/// Enrollment counters after a completed item was counted
#[derive(Debug, Clone, Copy, FromRow)]
pub struct EnrollmentCounters {
    pub content_completed: i32,
    pub is_completed: bool,
    pub content_count: i32,
}

pub struct ProgressRepository;

impl ProgressRepository {
    pub async fn video_course(conn: &mut PgConnection, video_id: Uuid) -> sqlx::Result<Option<Uuid>> {
        sqlx::query_scalar("SELECT course_id FROM course_videos WHERE id = $1")
            .bind(video_id)
            .fetch_optional(conn)
            .await
    }

    pub async fn material_course(
        conn: &mut PgConnection,
        material_id: Uuid,
    ) -> sqlx::Result<Option<Uuid>> {
        sqlx::query_scalar("SELECT course_id FROM course_materials WHERE id = $1")
            .bind(material_id)
            .fetch_optional(conn)
            .await
    }

    pub async fn is_enrolled(
        conn: &mut PgConnection,
        course_id: Uuid,
        student_id: Uuid,
    ) -> sqlx::Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM course_enrollments WHERE course_id = $1 AND student_id = $2)",
        )
        .bind(course_id)
        .bind(student_id)
        .fetch_one(conn)
        .await
    }

    pub async fn ensure_video_progress(
        conn: &mut PgConnection,
        student_id: Uuid,
        video_id: Uuid,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO course_video_progresses (student_id, video_id)
            VALUES ($1, $2)
            ON CONFLICT (student_id, video_id) DO NOTHING
            "#,
        )
        .bind(student_id)
        .bind(video_id)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Record the playback position. `is_completed` only ever turns on.
    pub async fn update_video_progress(
        conn: &mut PgConnection,
        student_id: Uuid,
        video_id: Uuid,
        last_position: i32,
        completed: bool,
    ) -> sqlx::Result<VideoCompletion> {
        sqlx::query_as::<_, VideoCompletion>(
            r#"
            WITH prior AS (
                SELECT is_completed
                FROM course_video_progresses
                WHERE student_id = $1 AND video_id = $2
                FOR UPDATE
            )
            UPDATE course_video_progresses AS progress
            SET last_position = $3,
                is_completed = progress.is_completed OR $4,
                updated_at = now()
            FROM prior
            WHERE progress.student_id = $1 AND progress.video_id = $2
            RETURNING prior.is_completed AS was_completed, progress.is_completed
            "#,
        )
        .bind(student_id)
        .bind(video_id)
        .bind(last_position)
        .bind(completed)
        .fetch_one(conn)
        .await
    }

    /// Returns `true` when the material was not completed before
    pub async fn complete_material(
        conn: &mut PgConnection,
        student_id: Uuid,
        material_id: Uuid,
    ) -> sqlx::Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO course_material_progresses (student_id, material_id)
            VALUES ($1, $2)
            ON CONFLICT (student_id, material_id) DO NOTHING
            "#,
        )
        .bind(student_id)
        .bind(material_id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count_completed_item(
        conn: &mut PgConnection,
        course_id: Uuid,
        student_id: Uuid,
    ) -> sqlx::Result<EnrollmentCounters> {
        sqlx::query_as::<_, EnrollmentCounters>(
            r#"
            UPDATE course_enrollments AS enrollment
            SET content_completed = enrollment.content_completed + 1,
                last_accessed_at = now()
            FROM courses AS course
            WHERE enrollment.course_id = $1
              AND enrollment.student_id = $2
              AND course.id = enrollment.course_id
            RETURNING enrollment.content_completed, enrollment.is_completed, course.content_count
            "#,
        )
        .bind(course_id)
        .bind(student_id)
        .fetch_one(conn)
        .await
    }

    pub async fn touch_enrollment(
        conn: &mut PgConnection,
        course_id: Uuid,
        student_id: Uuid,
    ) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE course_enrollments SET last_accessed_at = now() WHERE course_id = $1 AND student_id = $2",
        )
        .bind(course_id)
        .bind(student_id)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Flip the enrollment to completed. Returns `true` only for the call
    /// that actually flipped it.
    pub async fn mark_completed(
        conn: &mut PgConnection,
        course_id: Uuid,
        student_id: Uuid,
    ) -> sqlx::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE course_enrollments
            SET is_completed = TRUE
            WHERE course_id = $1 AND student_id = $2 AND is_completed = FALSE
            "#,
        )
        .bind(course_id)
        .bind(student_id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn credit_points(
        conn: &mut PgConnection,
        student_id: Uuid,
        points: i32,
    ) -> sqlx::Result<()> {
        sqlx::query("UPDATE students SET point = point + $2 WHERE user_id = $1")
            .bind(student_id)
            .bind(points)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn lock_video(conn: &mut PgConnection, id: Uuid) -> sqlx::Result<Option<CourseVideo>> {
        sqlx::query_as::<_, CourseVideo>(&format!(
            "SELECT {VIDEO_COLUMNS} FROM course_videos WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    pub async fn lock_material(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> sqlx::Result<Option<CourseMaterial>> {
        sqlx::query_as::<_, CourseMaterial>(&format!(
            "SELECT {MATERIAL_COLUMNS} FROM course_materials WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    /// Take one completed item off every enrollment whose student finished
    /// this video. Returns the number of enrollments touched.
    pub async fn uncount_video(
        conn: &mut PgConnection,
        course_id: Uuid,
        video_id: Uuid,
    ) -> sqlx::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE course_enrollments AS enrollment
            SET content_completed = GREATEST(enrollment.content_completed - 1, 0)
            FROM course_video_progresses AS progress
            WHERE progress.video_id = $2
              AND progress.is_completed
              AND enrollment.course_id = $1
              AND enrollment.student_id = progress.student_id
            "#,
        )
        .bind(course_id)
        .bind(video_id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Material counterpart of [`ProgressRepository::uncount_video`]
    pub async fn uncount_material(
        conn: &mut PgConnection,
        course_id: Uuid,
        material_id: Uuid,
    ) -> sqlx::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE course_enrollments AS enrollment
            SET content_completed = GREATEST(enrollment.content_completed - 1, 0)
            FROM course_material_progresses AS progress
            WHERE progress.material_id = $2
              AND enrollment.course_id = $1
              AND enrollment.student_id = progress.student_id
            "#,
        )
        .bind(course_id)
        .bind(material_id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn delete_video(conn: &mut PgConnection, id: Uuid) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM course_videos WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn delete_material(conn: &mut PgConnection, id: Uuid) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM course_materials WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }
}
