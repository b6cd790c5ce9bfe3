use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;
use tracing::info;

use crate::auth::hash_password_blocking;
use crate::error::AppError;
use crate::models::{AuthRequest, MeResponse, OkResponse, UserResponse};
use crate::state::AppState;

pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: Result<Json<AuthRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<UserResponse>), AppError> {
    let Json(payload) = payload?;
    if payload.username.trim().is_empty() || payload.password.is_empty() {
        return Err(AppError::InvalidInput(
            "Username and password are required".to_string(),
        ));
    }

    let password_hash = hash_password_blocking(payload.password).await?;
    let user = state.store.create_user(&payload.username, &password_hash).await?;
    info!("signup user_id={}", user.id);

    let jar = state.auth.start_session(jar, user.id).await?;
    Ok((jar, Json(UserResponse { id: user.id, username: user.username })))
}

pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: Result<Json<AuthRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<UserResponse>), AppError> {
    let Json(payload) = payload?;
    let user_id = state
        .auth
        .verify(&payload.username, &payload.password)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid username or password".to_string()))?;
    info!("login user_id={}", user_id);

    let jar = state.auth.start_session(jar, user_id).await?;
    Ok((jar, Json(UserResponse { id: user_id, username: payload.username })))
}

pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<OkResponse>), AppError> {
    let jar = state.auth.end_session(jar).await?;
    Ok((jar, Json(OkResponse { ok: true })))
}

pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Json<MeResponse>, AppError> {
    let anonymous = MeResponse {
        authenticated: false,
        id: None,
        username: None,
        created_at: None,
    };

    let Some(user_id) = state.auth.current_user(&jar).await else {
        return Ok(Json(anonymous));
    };
    let Some(user) = state.store.get_user(user_id).await? else {
        return Ok(Json(anonymous));
    };

    Ok(Json(MeResponse {
        authenticated: true,
        id: Some(user.id),
        username: Some(user.username),
        created_at: Some(user.created_at),
    }))
}
