use axum::extract::State;
use axum::response::{Html, IntoResponse};
use std::sync::Arc;

use crate::error::AppError;
use crate::state::AppState;

// Serves the bundled frontend entry page
pub async fn index_handler(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let path = state.public_dir.join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(page) => Ok(Html(page)),
        Err(_) => Err(AppError::NotFound("Frontend not found".to_string())),
    }
}
