use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::AppError;
use crate::models::{GenerateRequest, GenerateResponse};
use crate::recorder::Turn;
use crate::state::AppState;
use crate::store::TurnType;

pub async fn generate_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, AppError> {
    let Json(payload) = payload?;
    if payload.prompt.trim().is_empty() {
        return Err(AppError::InvalidInput("prompt must not be empty".to_string()));
    }

    let model = state.generation.resolve_model(payload.model.as_deref());
    info!("/v1/generate model={} conv_id={:?}", model, payload.conv_id);

    let result = state
        .generation
        .generate(&payload.prompt, Some(&model), payload.params.to_config())
        .await?;

    let turn = Turn {
        turn_type: TurnType::Generate,
        prompt: &payload.prompt,
        images: &result.images,
        texts: &result.texts,
        params: payload.params.recorded(Some(&model)),
    };
    record_if_requested(&state, &jar, payload.conv_id, turn).await;

    info!("/v1/generate ok images={} texts={}", result.images.len(), result.texts.len());
    Ok(Json(result.into()))
}

/// Records a turn when the caller is logged in and named a conversation.
/// Never fails the request: a skipped or failed write is only logged.
pub(super) async fn record_if_requested(
    state: &AppState,
    jar: &CookieJar,
    conv_id: Option<i64>,
    turn: Turn<'_>,
) {
    let Some(conversation_id) = conv_id else {
        return;
    };
    let Some(user_id) = state.auth.current_user(jar).await else {
        return;
    };
    if let Err(e) = state.recorder.record(user_id, conversation_id, turn).await {
        warn!("turn not recorded conv_id={}: {}", conversation_id, e);
    }
}
