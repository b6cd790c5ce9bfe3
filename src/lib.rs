//! Rate-limited HTTP proxy for Gemini image generation and editing, with
//! cookie sessions and per-user conversation history.

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod gemini;
pub mod generation;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod recorder;
pub mod state;
pub mod store;
pub mod telemetry;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware,
    routing::{get, patch, post},
};
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::warn;

use crate::handlers::*;
use crate::state::AppState;

pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}

//creating the router with routes
pub fn build_router(state: Arc<AppState>, origins: &[String]) -> Router {
    let body_limit = state.max_upload_bytes;

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/me", get(me_handler))
        .route(
            "/conversations",
            post(create_conversation_handler).get(list_conversations_handler),
        )
        .route("/conversations/{id}/messages", get(list_messages_handler))
        .route(
            "/conversations/{id}",
            patch(update_conversation_handler).delete(delete_conversation_handler),
        )
        .route("/v1/generate", post(generate_handler))
        .route("/v1/edit", post(edit_handler))
        .route("/v1/compose", post(compose_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(telemetry::log_requests))
        .layer(cors_layer(origins))
        .with_state(state)
}
