//! Gemini `generateContent` client and payload types.
//!
//! The gateway only talks to the [`ImageModel`] trait; [`GeminiClient`] is
//! the production implementation over the REST API.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// Markers Gemini puts in quota errors that do not come back as a plain 429
const RATE_LIMIT_MARKERS: [&str; 4] = ["resource_exhausted", "rate limit", "rate-limit", "ratelimit"];

/// One input part sent upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    Image { mime_type: String, data: Vec<u8> },
}

/// Sampling parameters forwarded as `generationConfig`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i32>,
    pub candidate_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<i32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: None,
            top_p: None,
            top_k: None,
            candidate_count: 1,
            seed: None,
            max_output_tokens: None,
        }
    }
}

/// Top-level `generateContent` response. Absent fields decode as empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Content,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, alias = "inline_data")]
    pub inline_data: Option<InlineData>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Base64 payload as it travels on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default, alias = "mime_type")]
    pub mime_type: String,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("upstream returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("upstream request failed: {0}")]
    Transport(String),

    #[error("invalid upstream response: {0}")]
    Decode(String),
}

impl ModelError {
    /// Quota exhaustion: an explicit 429 or a rate-limit marker in the message.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ModelError::Status { status: 429, .. } => true,
            ModelError::Status { message, .. } => {
                let lower = message.to_lowercase();
                RATE_LIMIT_MARKERS.iter().any(|marker| lower.contains(marker))
            }
            _ => false,
        }
    }
}

/// The external generative model, seen as a black box.
#[async_trait]
pub trait ImageModel: Send + Sync {
    async fn generate_content(
        &self,
        model: &str,
        contents: &[ContentPart],
        config: &GenerationConfig,
    ) -> Result<GenerateContentResponse, ModelError>;
}

// Wire shapes for the request body

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    contents: Vec<WireContent>,
    generation_config: &'a GenerationConfig,
}

#[derive(Serialize)]
struct WireContent {
    role: &'static str,
    parts: Vec<WirePart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WirePart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: WireBlob,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireBlob {
    mime_type: String,
    data: String,
}

impl From<&ContentPart> for WirePart {
    fn from(part: &ContentPart) -> Self {
        match part {
            ContentPart::Text(text) => WirePart::Text { text: text.clone() },
            ContentPart::Image { mime_type, data } => WirePart::InlineData {
                inline_data: WireBlob {
                    mime_type: mime_type.clone(),
                    data: STANDARD.encode(data),
                },
            },
        }
    }
}

#[derive(Deserialize)]
struct WireErrorEnvelope {
    error: WireError,
}

#[derive(Deserialize)]
struct WireError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Builds the request body exactly as it is posted upstream.
fn request_body(contents: &[ContentPart], config: &GenerationConfig) -> serde_json::Result<String> {
    let body = WireRequest {
        contents: vec![WireContent {
            role: "user",
            parts: contents.iter().map(WirePart::from).collect(),
        }],
        generation_config: config,
    };
    serde_json::to_string(&body)
}

// Gemini wraps errors as {"error": {"status": "...", "message": "..."}}
fn error_message(raw: &str) -> String {
    match serde_json::from_str::<WireErrorEnvelope>(raw) {
        Ok(envelope) if !envelope.error.status.is_empty() => {
            format!("{}: {}", envelope.error.status, envelope.error.message)
        }
        Ok(envelope) => envelope.error.message,
        Err(_) => raw.to_string(),
    }
}

pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ImageModel for GeminiClient {
    async fn generate_content(
        &self,
        model: &str,
        contents: &[ContentPart],
        config: &GenerationConfig,
    ) -> Result<GenerateContentResponse, ModelError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let body = request_body(contents, config).map_err(|e| ModelError::Decode(e.to_string()))?;

        let res = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let raw = res.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                message: error_message(&raw),
            });
        }

        res.json::<GenerateContentResponse>()
            .await
            .map_err(|e| ModelError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_rate_limits_by_status_and_marker() {
        let by_status = ModelError::Status { status: 429, message: String::new() };
        let by_marker = ModelError::Status {
            status: 400,
            message: "RESOURCE_EXHAUSTED: quota exceeded".to_string(),
        };
        let other = ModelError::Status {
            status: 400,
            message: "INVALID_ARGUMENT: bad image".to_string(),
        };

        assert!(by_status.is_rate_limited());
        assert!(by_marker.is_rate_limited());
        assert!(!other.is_rate_limited());
        // "generateContent" in a transport message must not look like a rate limit
        assert!(!ModelError::Transport("POST .../models/x:generateContent timed out".into()).is_rate_limited());
    }

    #[test]
    fn request_body_orders_parts_and_skips_unset_params() {
        let contents = vec![
            ContentPart::Image { mime_type: "image/jpeg".into(), data: vec![1, 2, 3] },
            ContentPart::Text("make it blue".into()),
        ];
        let config = GenerationConfig { temperature: Some(0.5), candidate_count: 2, ..Default::default() };

        let body: serde_json::Value = serde_json::from_str(&request_body(&contents, &config).unwrap()).unwrap();

        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[0]["inlineData"]["data"], "AQID");
        assert_eq!(parts[1]["text"], "make it blue");
        assert_eq!(body["generationConfig"]["candidateCount"], 2);
        assert_eq!(body["generationConfig"]["temperature"], 0.5);
        assert!(body["generationConfig"].get("topK").is_none());
    }

    #[test]
    fn response_tolerates_missing_fields() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"image/png","data":"aGk="}},{"text":"hi"}]}},{}]}"#;
        let response: GenerateContentResponse = serde_json::from_str(raw).unwrap();

        assert_eq!(response.candidates.len(), 2);
        assert_eq!(response.candidates[0].content.parts.len(), 2);
        assert!(response.candidates[1].content.parts.is_empty());

        let empty: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.candidates.is_empty());
    }

    #[test]
    fn error_envelope_keeps_status_marker() {
        let raw = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(error_message(raw), "RESOURCE_EXHAUSTED: Quota exceeded");
        assert_eq!(error_message("plain text"), "plain text");
    }
}
