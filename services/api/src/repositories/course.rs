//! Course, content, enrollment and feedback queries

use common::sql::UpdateBuilder;
use sqlx::PgConnection;
use tracing::info;
use uuid::Uuid;

use crate::models::{
    ContentPatch, Course, CourseFeedback, CourseMaterial, CourseVideo, Enrollment, NewMaterial,
    NewVideo,
};

const COURSE_COLUMNS: &str = "id, category_id, title, rating, rating_count, rating_total, \
     enrollment_count, content_count, total_duration";
pub(crate) const VIDEO_COLUMNS: &str =
    r#"id, course_id, title, "order", is_free, duration, object_key, created_at, updated_at"#;
pub(crate) const MATERIAL_COLUMNS: &str =
    r#"id, course_id, title, "order", is_free, object_key, created_at, updated_at"#;
const ENROLLMENT_COLUMNS: &str =
    "course_id, student_id, content_completed, is_completed, last_accessed_at";

pub struct CourseRepository;

impl CourseRepository {
    pub async fn find(conn: &mut PgConnection, id: Uuid) -> sqlx::Result<Option<Course>> {
        sqlx::query_as::<_, Course>(&format!("SELECT {COURSE_COLUMNS} FROM courses WHERE id = $1"))
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Videos of a course sorted by `(order, id)`
    pub async fn videos(conn: &mut PgConnection, course_id: Uuid) -> sqlx::Result<Vec<CourseVideo>> {
        sqlx::query_as::<_, CourseVideo>(&format!(
            r#"SELECT {VIDEO_COLUMNS} FROM course_videos WHERE course_id = $1 ORDER BY "order", id"#
        ))
        .bind(course_id)
        .fetch_all(conn)
        .await
    }

    /// Materials of a course sorted by `(order, id)`
    pub async fn materials(
        conn: &mut PgConnection,
        course_id: Uuid,
    ) -> sqlx::Result<Vec<CourseMaterial>> {
        sqlx::query_as::<_, CourseMaterial>(&format!(
            r#"SELECT {MATERIAL_COLUMNS} FROM course_materials WHERE course_id = $1 ORDER BY "order", id"#
        ))
        .bind(course_id)
        .fetch_all(conn)
        .await
    }

    pub async fn insert_video(conn: &mut PgConnection, video: &NewVideo) -> sqlx::Result<CourseVideo> {
        info!("Creating video {} in course {}", video.id, video.course_id);

        sqlx::query_as::<_, CourseVideo>(&format!(
            r#"
            INSERT INTO course_videos (id, course_id, title, "order", is_free, duration, object_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {VIDEO_COLUMNS}
            "#
        ))
        .bind(video.id)
        .bind(video.course_id)
        .bind(&video.title)
        .bind(video.order)
        .bind(video.is_free)
        .bind(video.duration)
        .bind(&video.object_key)
        .fetch_one(conn)
        .await
    }

    pub async fn insert_material(
        conn: &mut PgConnection,
        material: &NewMaterial,
    ) -> sqlx::Result<CourseMaterial> {
        info!("Creating material {} in course {}", material.id, material.course_id);

        sqlx::query_as::<_, CourseMaterial>(&format!(
            r#"
            INSERT INTO course_materials (id, course_id, title, "order", is_free, object_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {MATERIAL_COLUMNS}
            "#
        ))
        .bind(material.id)
        .bind(material.course_id)
        .bind(&material.title)
        .bind(material.order)
        .bind(material.is_free)
        .bind(&material.object_key)
        .fetch_one(conn)
        .await
    }

    /// Account for one new content item (and its duration, for videos)
    pub async fn add_content(
        conn: &mut PgConnection,
        course_id: Uuid,
        duration: i32,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            UPDATE courses
            SET content_count = content_count + 1,
                total_duration = total_duration + $2,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(course_id)
        .bind(duration)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Inverse of [`CourseRepository::add_content`]
    pub async fn remove_content(
        conn: &mut PgConnection,
        course_id: Uuid,
        duration: i32,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            UPDATE courses
            SET content_count = GREATEST(content_count - 1, 0),
                total_duration = GREATEST(total_duration - $2, 0),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(course_id)
        .bind(duration)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn patch_video(
        conn: &mut PgConnection,
        id: Uuid,
        patch: ContentPatch,
    ) -> sqlx::Result<Option<CourseVideo>> {
        let mut update = UpdateBuilder::new("course_videos");
        update
            .set("title", patch.title)
            .set("order", patch.order)
            .set("is_free", patch.is_free);

        match update.finish(id, VIDEO_COLUMNS) {
            Some(mut query) => query.build_query_as::<CourseVideo>().fetch_optional(conn).await,
            None => {
                sqlx::query_as::<_, CourseVideo>(&format!(
                    "SELECT {VIDEO_COLUMNS} FROM course_videos WHERE id = $1"
                ))
                .bind(id)
                .fetch_optional(conn)
                .await
            }
        }
    }

    pub async fn patch_material(
        conn: &mut PgConnection,
        id: Uuid,
        patch: ContentPatch,
    ) -> sqlx::Result<Option<CourseMaterial>> {
        let mut update = UpdateBuilder::new("course_materials");
        update
            .set("title", patch.title)
            .set("order", patch.order)
            .set("is_free", patch.is_free);

        match update.finish(id, MATERIAL_COLUMNS) {
            Some(mut query) => query.build_query_as::<CourseMaterial>().fetch_optional(conn).await,
            None => {
                sqlx::query_as::<_, CourseMaterial>(&format!(
                    "SELECT {MATERIAL_COLUMNS} FROM course_materials WHERE id = $1"
                ))
                .bind(id)
                .fetch_optional(conn)
                .await
            }
        }
    }

    pub async fn enrollment(
        conn: &mut PgConnection,
        course_id: Uuid,
        student_id: Uuid,
    ) -> sqlx::Result<Option<Enrollment>> {
        sqlx::query_as::<_, Enrollment>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM course_enrollments WHERE course_id = $1 AND student_id = $2"
        ))
        .bind(course_id)
        .bind(student_id)
        .fetch_optional(conn)
        .await
    }

    /// Insert the enrollment and bump the course's enrollment counter.
    /// Run inside a transaction; a duplicate surfaces as a unique violation.
    pub async fn enroll(
        conn: &mut PgConnection,
        course_id: Uuid,
        student_id: Uuid,
    ) -> sqlx::Result<Enrollment> {
        let enrollment = sqlx::query_as::<_, Enrollment>(&format!(
            r#"
            INSERT INTO course_enrollments (course_id, student_id)
            VALUES ($1, $2)
            RETURNING {ENROLLMENT_COLUMNS}
            "#
        ))
        .bind(course_id)
        .bind(student_id)
        .fetch_one(&mut *conn)
        .await?;

        sqlx::query(
            "UPDATE courses SET enrollment_count = enrollment_count + 1, updated_at = now() WHERE id = $1",
        )
        .bind(course_id)
        .execute(&mut *conn)
        .await?;

        Ok(enrollment)
    }

    /// Store a rating and fold it into the course aggregates.
    /// Run inside a transaction; a second rating surfaces as a unique violation.
    pub async fn insert_feedback(
        conn: &mut PgConnection,
        course_id: Uuid,
        student_id: Uuid,
        rating: i16,
        comment: &str,
    ) -> sqlx::Result<CourseFeedback> {
        let feedback = sqlx::query_as::<_, CourseFeedback>(
            r#"
            INSERT INTO course_feedbacks (course_id, student_id, rating, comment)
            VALUES ($1, $2, $3, $4)
            RETURNING course_id, student_id, rating, comment, created_at
            "#,
        )
        .bind(course_id)
        .bind(student_id)
        .bind(rating)
        .bind(comment)
        .fetch_one(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            UPDATE courses
            SET rating_total = rating_total + $2,
                rating_count = rating_count + 1,
                rating = (rating_total + $2)::REAL / (rating_count + 1),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(course_id)
        .bind(i32::from(rating))
        .execute(&mut *conn)
        .await?;

        Ok(feedback)
    }
}
