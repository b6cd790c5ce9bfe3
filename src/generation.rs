//! Turns prompts and uploads into upstream requests and splits the answer
//! into images and texts.

use std::sync::Arc;
use tracing::warn;

use crate::error::AppError;
use crate::gateway::UpstreamGateway;
use crate::gemini::{ContentPart, GenerateContentResponse, GenerationConfig};

pub const DEFAULT_MIME_TYPE: &str = "image/png";

/// An uploaded image as received from the client.
#[derive(Debug, Clone)]
pub struct InputFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationResult {
    pub images: Vec<String>, // base64, as received from upstream
    pub texts: Vec<String>,
}

impl GenerationResult {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.texts.is_empty()
    }
}

#[derive(Clone)]
pub struct GenerationService {
    gateway: Arc<UpstreamGateway>,
    default_model: String,
}

impl GenerationService {
    pub fn new(gateway: Arc<UpstreamGateway>, default_model: String) -> Self {
        Self { gateway, default_model }
    }

    pub fn resolve_model(&self, model: Option<&str>) -> String {
        match model.map(str::trim) {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => self.default_model.clone(),
        }
    }

    pub async fn generate(
        &self,
        prompt: &str,
        model: Option<&str>,
        config: GenerationConfig,
    ) -> Result<GenerationResult, AppError> {
        let contents = vec![ContentPart::Text(prompt.to_string())];
        self.run(&self.resolve_model(model), &contents, config).await
    }

    pub async fn edit(
        &self,
        prompt: &str,
        files: Vec<InputFile>,
        model: Option<&str>,
        config: GenerationConfig,
    ) -> Result<GenerationResult, AppError> {
        let contents = build_edit_contents(prompt, files)?;
        self.run(&self.resolve_model(model), &contents, config).await
    }

    /// Multi-image composition; identical to [`edit`](Self::edit).
    pub async fn compose(
        &self,
        prompt: &str,
        files: Vec<InputFile>,
        model: Option<&str>,
        config: GenerationConfig,
    ) -> Result<GenerationResult, AppError> {
        self.edit(prompt, files, model, config).await
    }

    async fn run(
        &self,
        model: &str,
        contents: &[ContentPart],
        config: GenerationConfig,
    ) -> Result<GenerationResult, AppError> {
        let response = self.gateway.call(model, contents, config).await?;
        let result = decode_response(response);
        if result.is_empty() {
            warn!("model {} returned no content", model);
            return Err(AppError::NoContent(
                "Model returned no content. Try adjusting the prompt or inputs.".to_string(),
            ));
        }
        Ok(result)
    }
}

/// Image parts in upload order, then the prompt.
pub fn build_edit_contents(prompt: &str, files: Vec<InputFile>) -> Result<Vec<ContentPart>, AppError> {
    if files.is_empty() {
        return Err(AppError::InvalidInput("No image files uploaded".to_string()));
    }

    let mut contents = Vec::with_capacity(files.len() + 1);
    for file in files {
        let mime_type = match file.content_type.as_deref().map(str::trim) {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => DEFAULT_MIME_TYPE.to_string(),
        };
        if !is_mime_type(&mime_type) {
            return Err(AppError::InvalidInput(format!(
                "Invalid image input for {}: bad content type {:?}",
                file.filename, mime_type
            )));
        }
        if file.data.is_empty() {
            return Err(AppError::InvalidInput(format!(
                "Invalid image input for {}: empty file",
                file.filename
            )));
        }
        contents.push(ContentPart::Image { mime_type, data: file.data });
    }
    contents.push(ContentPart::Text(prompt.to_string()));
    Ok(contents)
}

fn is_mime_type(value: &str) -> bool {
    let valid = |s: &str| {
        !s.is_empty()
            && s.chars().all(|c| c.is_ascii_alphanumeric() || "!#$&^_.+-".contains(c))
    };
    let essence = value.split(';').next().unwrap_or_default().trim();
    match essence.split_once('/') {
        Some((kind, sub)) => valid(kind) && valid(sub),
        None => false,
    }
}

/// Walks candidates then parts in upstream order. A part with inline data
/// counts as an image, otherwise non-empty text counts as text.
pub fn decode_response(response: GenerateContentResponse) -> GenerationResult {
    let mut result = GenerationResult::default();
    for candidate in response.candidates {
        for part in candidate.content.parts {
            match (part.inline_data, part.text) {
                (Some(blob), _) if !blob.data.is_empty() => result.images.push(blob.data),
                (_, Some(text)) if !text.is_empty() => result.texts.push(text),
                _ => {}
            }
        }
    }
    result
}
