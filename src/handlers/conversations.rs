use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;
use tracing::info;

use crate::error::AppError;
use crate::models::{ConversationTitle, OkResponse};
use crate::state::AppState;
use crate::store::{Conversation, Message};

const DEFAULT_TITLE: &str = "New conversation";

// Missing and foreign conversations look the same to the caller
async fn ensure_owned(state: &AppState, user_id: i64, conv_id: i64) -> Result<(), AppError> {
    if state.store.owns_conversation(user_id, conv_id).await? {
        Ok(())
    } else {
        Err(AppError::conversation_not_found())
    }
}

pub async fn create_conversation_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    body: Option<Json<ConversationTitle>>,
) -> Result<Json<Conversation>, AppError> {
    let user_id = state.auth.require_user(&jar).await?;
    let title = body
        .and_then(|Json(b)| b.title)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    let conversation = state.store.create_conversation(user_id, &title).await?;
    info!(
        "create_conversation uid={} conv_id={} title={:?}",
        user_id, conversation.id, conversation.title
    );
    Ok(Json(conversation))
}

pub async fn list_conversations_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Json<Vec<Conversation>>, AppError> {
    let user_id = state.auth.require_user(&jar).await?;
    Ok(Json(state.store.list_conversations(user_id).await?))
}

pub async fn list_messages_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(conv_id): Path<i64>,
) -> Result<Json<Vec<Message>>, AppError> {
    let user_id = state.auth.require_user(&jar).await?;
    ensure_owned(&state, user_id, conv_id).await?;
    Ok(Json(state.store.list_messages(conv_id).await?))
}

pub async fn update_conversation_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(conv_id): Path<i64>,
    payload: Result<Json<ConversationTitle>, JsonRejection>,
) -> Result<Json<Conversation>, AppError> {
    let Json(payload) = payload?;
    let user_id = state.auth.require_user(&jar).await?;
    let title = payload.title.unwrap_or_default().trim().to_string();
    if title.is_empty() {
        return Err(AppError::InvalidInput("Title must not be empty".to_string()));
    }
    ensure_owned(&state, user_id, conv_id).await?;

    let conversation = state
        .store
        .rename_conversation(conv_id, &title)
        .await?
        .ok_or_else(AppError::conversation_not_found)?;
    info!("update_conversation uid={} conv_id={} title={:?}", user_id, conv_id, title);
    Ok(Json(conversation))
}

pub async fn delete_conversation_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(conv_id): Path<i64>,
) -> Result<Json<OkResponse>, AppError> {
    let user_id = state.auth.require_user(&jar).await?;
    ensure_owned(&state, user_id, conv_id).await?;

    state.store.delete_conversation(conv_id).await?;
    info!("delete_conversation uid={} conv_id={}", user_id, conv_id);
    Ok(Json(OkResponse { ok: true }))
}
