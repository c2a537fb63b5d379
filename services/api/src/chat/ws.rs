//! WebSocket endpoint for a mentoring chat
//!
//! Browsers cannot set headers on the upgrade request, so the access token
//! travels in the query string. Every connection gets a writer task fed by
//! an unbounded channel; the hub and the reader loop both write through it.

use anyhow::Context;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use common::{
    error::{AppError, AppResult},
    extract::{AppPath, AppQuery},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::ChatService;
use crate::{AppState, models::MentoringMessage};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// `GET /mentorings/chats/:chat_id/ws?token=…`
///
/// Authentication and participation are checked before the upgrade so a
/// rejected caller gets a plain problem response.
pub async fn chat_socket(
    State(state): State<AppState>,
    AppPath(chat_id): AppPath<Uuid>,
    AppQuery(query): AppQuery<WsQuery>,
    upgrade: Option<WebSocketUpgrade>,
) -> AppResult<Response> {
    let token = query
        .token
        .filter(|token| !token.is_empty())
        .ok_or(AppError::NoBearerToken)?;
    let user = state.jwt_service.validate(&token)?;
    state.chat.participant_chat(user.user_id, chat_id).await?;

    let upgrade = upgrade
        .ok_or_else(|| AppError::BadRequest("Expected a WebSocket upgrade request".to_string()))?;

    let chats = state.chat.clone();
    let shutdown = state.shutdown.clone();
    Ok(upgrade.on_upgrade(move |socket| {
        run_connection(socket, chats, chat_id, user.user_id, shutdown)
    }))
}

async fn run_connection(
    socket: WebSocket,
    chats: ChatService,
    chat_id: Uuid,
    user_id: Uuid,
    shutdown: CancellationToken,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let connection_id = chats.hub().register(chat_id, user_id, tx.clone()).await;
    info!(%chat_id, %user_id, %connection_id, "Chat connection opened");

    loop {
        let incoming = tokio::select! {
            _ = shutdown.cancelled() => break,
            incoming = stream.next() => incoming,
        };

        match incoming {
            Some(Ok(Message::Text(body))) => {
                let frame = message_frame(chats.send_message(user_id, chat_id, &body).await);
                if tx.send(frame).is_err() {
                    break;
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(%chat_id, %user_id, "Chat connection failed: {}", e);
                break;
            }
        }
    }

    chats.hub().unregister(chat_id, user_id, connection_id).await;
    drop(tx);
    let _ = writer.await;
    info!(%chat_id, %user_id, %connection_id, "Chat connection closed");
}

/// Frame sent back to the sender: its stored message, or what went wrong
fn message_frame(result: AppResult<MentoringMessage>) -> String {
    let encoded = result.and_then(|message| {
        serde_json::to_string(&message)
            .context("Failed to encode chat frame")
            .map_err(AppError::from)
    });

    match encoded {
        Ok(frame) => frame,
        Err(e) => error_frame(&e),
    }
}

pub fn error_frame(error: &AppError) -> String {
    let problem = error.to_problem();
    json!({
        "error": {
            "title": problem.title,
            "detail": problem.detail,
        }
    })
    .to_string()
}
