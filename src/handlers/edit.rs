use axum::{
    Json,
    extract::{Multipart, State},
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use super::generate::record_if_requested;
use crate::error::AppError;
use crate::generation::InputFile;
use crate::models::{GenerateResponse, GenerationParams};
use crate::recorder::Turn;
use crate::state::AppState;
use crate::store::TurnType;

#[derive(Debug, Clone, Copy)]
enum EditKind {
    Edit,
    Compose,
}

impl EditKind {
    fn route(&self) -> &'static str {
        match self {
            EditKind::Edit => "/v1/edit",
            EditKind::Compose => "/v1/compose",
        }
    }
}

// Multipart body shared by /v1/edit and /v1/compose
#[derive(Debug, Default)]
struct EditForm {
    prompt: Option<String>,
    model: Option<String>,
    files: Vec<InputFile>,
    params: GenerationParams,
    conv_id: Option<i64>,
}

impl EditForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = EditForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::InvalidInput(format!("Malformed form data: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "files" || name == "files[]" {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(|e| {
                    AppError::InvalidInput(format!("Invalid image input for {}: {}", filename, e))
                })?;
                // browsers send an empty, unnamed part when no file was picked
                if filename.is_empty() && data.is_empty() {
                    continue;
                }
                form.files.push(InputFile {
                    filename,
                    content_type,
                    data: data.to_vec(),
                });
                continue;
            }

            let value = field
                .text()
                .await
                .map_err(|e| AppError::InvalidInput(format!("Invalid value for {}: {}", name, e)))?;
            form.set(&name, value)?;
        }

        Ok(form)
    }

    fn set(&mut self, name: &str, value: String) -> Result<(), AppError> {
        match name {
            "prompt" => self.prompt = Some(value),
            "model" => self.model = non_empty(value),
            "temperature" => self.params.temperature = parse_field(name, &value)?,
            "top_p" => self.params.top_p = parse_field(name, &value)?,
            "top_k" => self.params.top_k = parse_field(name, &value)?,
            "candidate_count" => self.params.candidate_count = non_empty(value).map(Value::String),
            "seed" => self.params.seed = parse_field(name, &value)?,
            "max_output_tokens" => self.params.max_output_tokens = parse_field(name, &value)?,
            "conv_id" => self.conv_id = parse_field(name, &value)?,
            _ => {}
        }
        Ok(())
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() { None } else { Some(value) }
}

fn parse_field<T: FromStr>(name: &str, value: &str) -> Result<Option<T>, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| AppError::InvalidInput(format!("Invalid value for {}: {:?}", name, value)))
}

pub async fn edit_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    multipart: Multipart,
) -> Result<Json<GenerateResponse>, AppError> {
    let form = EditForm::read(multipart).await?;
    run(&state, &jar, form, EditKind::Edit).await
}

// Composition takes the same form and follows the same path as edit
pub async fn compose_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    multipart: Multipart,
) -> Result<Json<GenerateResponse>, AppError> {
    let form = EditForm::read(multipart).await?;
    run(&state, &jar, form, EditKind::Compose).await
}

async fn run(
    state: &AppState,
    jar: &CookieJar,
    form: EditForm,
    kind: EditKind,
) -> Result<Json<GenerateResponse>, AppError> {
    let prompt = match form.prompt {
        Some(p) if !p.trim().is_empty() => p,
        _ => return Err(AppError::InvalidInput("prompt is required".to_string())),
    };
    let model = state.generation.resolve_model(form.model.as_deref());
    info!(
        "{} files={} prompt_len={} conv_id={:?}",
        kind.route(),
        form.files.len(),
        prompt.len(),
        form.conv_id
    );

    let config = form.params.to_config();
    let result = match kind {
        EditKind::Edit => state.generation.edit(&prompt, form.files, Some(&model), config).await?,
        EditKind::Compose => {
            state.generation.compose(&prompt, form.files, Some(&model), config).await?
        }
    };

    let turn = Turn {
        turn_type: TurnType::Edit,
        prompt: &prompt,
        images: &result.images,
        texts: &result.texts,
        params: form.params.recorded(form.model.as_deref()),
    };
    record_if_requested(state, jar, form.conv_id, turn).await;

    info!(
        "{} ok images={} texts={}",
        kind.route(),
        result.images.len(),
        result.texts.len()
    );
    Ok(Json(result.into()))
}
