//! API service routes

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
};
use common::{
    auth::{AuthUser, MaybeAuthUser},
    error::{AppResult, problem_instance},
    extract::{AppJson, AppPath, AppQuery},
    pagination::{Page, PageQuery, PageRequest},
    role::Role,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

use crate::{
    AppState,
    catalog::{CreatedContent, MaterialInput, VideoInput},
    chat::ws::chat_socket,
    models::{
        ContentItem, ContentPatch, CourseFeedback, CourseMaterial, CourseVideo, Enrollment,
        MentoringChat, MentoringMessage,
    },
    payments::gateway::Checkout,
    progress::ProgressUpdate,
};

#[derive(Deserialize)]
pub struct CreateVideoRequest {
    pub title: String,
    pub order: i32,
    #[serde(default)]
    pub is_free: bool,
    pub duration: i32,
}

#[derive(Deserialize)]
pub struct CreateMaterialRequest {
    pub title: String,
    pub order: i32,
    #[serde(default)]
    pub is_free: bool,
}

#[derive(Deserialize)]
pub struct VideoProgressRequest {
    pub last_position: i32,
    #[serde(default)]
    pub is_completed: bool,
}

#[derive(Deserialize)]
pub struct FeedbackRequest {
    pub rating: i16,
    #[serde(default)]
    pub comment: String,
}

#[derive(Deserialize)]
pub struct TrialRequest {
    pub mentor_id: Uuid,
}

#[derive(Deserialize)]
pub struct MessageRequest {
    pub body: String,
}

/// Create the router for the API service
pub fn create_router(state: AppState) -> Router {
    let courses = Router::new()
        .route("/courses/:id/enrollments", post(enroll))
        .route("/courses/:id/contents", get(list_contents))
        .route("/courses/:id/videos", post(create_video))
        .route("/courses/:id/materials", post(create_material))
        .route("/courses/:id/feedbacks", post(submit_feedback))
        .route(
            "/courses/contents/videos/:id",
            patch(patch_video).delete(delete_video),
        )
        .route(
            "/courses/contents/materials/:id",
            patch(patch_material).delete(delete_material),
        )
        .route(
            "/courses/contents/videos/:id/progresses",
            post(update_video_progress),
        )
        .route(
            "/courses/contents/materials/:id/progresses",
            post(complete_material),
        );

    let payments = Router::new()
        .route("/payments/boost", post(checkout_boost))
        .route("/payments/challenge", post(checkout_challenge))
        .route("/payments/midtrans/notification", post(payment_notification));

    let mentorings = Router::new()
        .route("/mentorings/trial", post(start_trial))
        .route("/mentorings/:id/guidances", post(checkout_guidance))
        .route(
            "/mentorings/chats/:id/messages",
            post(send_message).get(get_messages),
        )
        .route("/mentorings/chats/:id/ws", get(chat_socket));

    Router::new()
        .route("/health", get(health_check))
        .merge(courses)
        .merge(payments)
        .merge(mentorings)
        .layer(middleware::from_fn(problem_instance))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint; pings Postgres and Redis
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = common::database::health_check(&state.db_pool).await;
    let cache = match state.cache.ping().await {
        Ok(up) => up,
        Err(e) => {
            warn!("Cache health check failed: {}", e);
            false
        }
    };

    let healthy = database && cache;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        AppJson(serde_json::json!({
            "status": if healthy { "ok" } else { "degraded" },
            "service": "api-service"
        })),
    )
}

pub async fn enroll(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(course_id): AppPath<Uuid>,
) -> AppResult<(StatusCode, AppJson<Enrollment>)> {
    user.require(Role::Student)?;
    let enrollment = state.catalog.enroll(user.id, course_id).await?;
    Ok((StatusCode::CREATED, AppJson(enrollment)))
}

/// Ordered course content; anonymous callers see free items only
pub async fn list_contents(
    State(state): State<AppState>,
    MaybeAuthUser(user): MaybeAuthUser,
    AppPath(course_id): AppPath<Uuid>,
) -> AppResult<AppJson<Vec<ContentItem>>> {
    let contents = state.catalog.list_contents(user, course_id).await?;
    Ok(AppJson(contents))
}

pub async fn create_video(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(course_id): AppPath<Uuid>,
    AppJson(payload): AppJson<CreateVideoRequest>,
) -> AppResult<(StatusCode, AppJson<CreatedContent<CourseVideo>>)> {
    user.require(Role::Admin)?;
    let created = state
        .catalog
        .create_video(
            course_id,
            VideoInput {
                title: payload.title,
                order: payload.order,
                is_free: payload.is_free,
                duration: payload.duration,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, AppJson(created)))
}

pub async fn create_material(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(course_id): AppPath<Uuid>,
    AppJson(payload): AppJson<CreateMaterialRequest>,
) -> AppResult<(StatusCode, AppJson<CreatedContent<CourseMaterial>>)> {
    user.require(Role::Admin)?;
    let created = state
        .catalog
        .create_material(
            course_id,
            MaterialInput {
                title: payload.title,
                order: payload.order,
                is_free: payload.is_free,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, AppJson(created)))
}

pub async fn patch_video(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(patch): AppJson<ContentPatch>,
) -> AppResult<AppJson<CourseVideo>> {
    user.require(Role::Admin)?;
    Ok(AppJson(state.catalog.patch_video(id, patch).await?))
}

pub async fn patch_material(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(patch): AppJson<ContentPatch>,
) -> AppResult<AppJson<CourseMaterial>> {
    user.require(Role::Admin)?;
    Ok(AppJson(state.catalog.patch_material(id, patch).await?))
}

pub async fn delete_video(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<StatusCode> {
    user.require(Role::Admin)?;
    state.catalog.delete_video(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_material(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<StatusCode> {
    user.require(Role::Admin)?;
    state.catalog.delete_material(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_video_progress(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(video_id): AppPath<Uuid>,
    AppJson(payload): AppJson<VideoProgressRequest>,
) -> AppResult<StatusCode> {
    user.require(Role::Student)?;
    state
        .progress
        .update(
            user.id,
            video_id,
            ProgressUpdate::Video {
                last_position: payload.last_position,
                completed: payload.is_completed,
            },
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn complete_material(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(material_id): AppPath<Uuid>,
) -> AppResult<StatusCode> {
    user.require(Role::Student)?;
    state
        .progress
        .update(user.id, material_id, ProgressUpdate::Material)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn submit_feedback(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(course_id): AppPath<Uuid>,
    AppJson(payload): AppJson<FeedbackRequest>,
) -> AppResult<(StatusCode, AppJson<CourseFeedback>)> {
    user.require(Role::Student)?;
    let feedback = state
        .catalog
        .submit_feedback(user.id, course_id, payload.rating, &payload.comment)
        .await?;
    Ok((StatusCode::CREATED, AppJson(feedback)))
}

pub async fn checkout_boost(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<(StatusCode, AppJson<Checkout>)> {
    user.require(Role::Student)?;
    let checkout = state.payments.checkout_boost(user.id).await?;
    Ok((StatusCode::CREATED, AppJson(checkout)))
}

pub async fn checkout_challenge(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<(StatusCode, AppJson<Checkout>)> {
    user.require(Role::Student)?;
    let checkout = state.payments.checkout_challenge(user.id).await?;
    Ok((StatusCode::CREATED, AppJson(checkout)))
}

/// Gateway callback; authenticated by its signature, not a bearer token
pub async fn payment_notification(
    State(state): State<AppState>,
    AppJson(payload): AppJson<serde_json::Value>,
) -> AppResult<StatusCode> {
    state.payments.process_notification(payload).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn checkout_guidance(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(mentor_id): AppPath<Uuid>,
) -> AppResult<(StatusCode, AppJson<Checkout>)> {
    user.require(Role::Student)?;
    let checkout = state.payments.checkout_guidance(user.id, mentor_id).await?;
    Ok((StatusCode::CREATED, AppJson(checkout)))
}

pub async fn start_trial(
    State(state): State<AppState>,
    user: AuthUser,
    AppJson(payload): AppJson<TrialRequest>,
) -> AppResult<(StatusCode, AppJson<MentoringChat>)> {
    user.require(Role::Student)?;
    let chat = state.chat.start_trial(user.id, payload.mentor_id).await?;
    Ok((StatusCode::CREATED, AppJson(chat)))
}

pub async fn send_message(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(chat_id): AppPath<Uuid>,
    AppJson(payload): AppJson<MessageRequest>,
) -> AppResult<(StatusCode, AppJson<MentoringMessage>)> {
    let message = state
        .chat
        .send_message(user.id, chat_id, &payload.body)
        .await?;
    Ok((StatusCode::CREATED, AppJson(message)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(chat_id): AppPath<Uuid>,
    AppQuery(query): AppQuery<PageQuery>,
) -> AppResult<AppJson<Page<MentoringMessage>>> {
    let page = PageRequest::try_from(query)?;
    let messages = state.chat.get_messages(user.id, chat_id, page).await?;
    Ok(AppJson(messages))
}
