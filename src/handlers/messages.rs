use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::entities::message;
use crate::error::AppResult;
use crate::handlers::users::{load_public_profiles, PublicProfile};
use crate::services::messaging::{self, Conversation, OutgoingMessage};
use crate::utils::jwt::Claims;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub user: Option<PublicProfile>,
    /// Counterpart has a live WebSocket session.
    pub online: bool,
    #[serde(flatten)]
    pub conversation: Conversation,
}

/// One entry per counterpart, most recent conversation first
pub async fn conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<ConversationResponse>>> {
    let conversations = messaging::conversations(&*state.db, claims.sub).await?;
    let users = load_public_profiles(&*state.db, conversations.iter().map(|c| c.counterpart_id)).await?;

    let mut responses = Vec::with_capacity(conversations.len());
    for conversation in conversations {
        responses.push(ConversationResponse {
            user: users.get(&conversation.counterpart_id).cloned(),
            online: state.hub.is_online(conversation.counterpart_id).await,
            conversation,
        });
    }

    Ok(Json(responses))
}

pub async fn history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(other_id): Path<Uuid>,
) -> AppResult<Json<Vec<message::Model>>> {
    let messages = messaging::history(&*state.db, claims.sub, other_id).await?;
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<OutgoingMessage>,
) -> AppResult<(StatusCode, Json<message::Model>)> {
    let message = messaging::send(&state, claims.sub, payload).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<message::Model>> {
    let message = messaging::mark_read(&state, claims.sub, message_id).await?;
    Ok(Json(message))
}
