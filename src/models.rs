use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::gemini::GenerationConfig;
use crate::generation::GenerationResult;

pub const MAX_CANDIDATES: u32 = 6;

// Sampling parameters as the client sent them
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<i32>,
    // kept raw: anything that is not a usable number clamps to 1
    pub candidate_count: Option<Value>,
    pub seed: Option<i32>,
    pub max_output_tokens: Option<i32>,
}

impl GenerationParams {
    pub fn to_config(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            candidate_count: clamp_candidate_count(self.candidate_count.as_ref()),
            seed: self.seed,
            max_output_tokens: self.max_output_tokens,
        }
    }

    /// Parameters stored alongside a recorded turn. `model` is null when
    /// the caller left it to the default.
    pub fn recorded(&self, model: Option<&str>) -> Value {
        serde_json::json!({
            "temperature": self.temperature,
            "top_p": self.top_p,
            "top_k": self.top_k,
            "candidate_count": self.candidate_count,
            "seed": self.seed,
            "max_output_tokens": self.max_output_tokens,
            "model": model,
        })
    }
}

/// Coerces a client-supplied candidate count into `[1, MAX_CANDIDATES]`.
pub fn clamp_candidate_count(raw: Option<&Value>) -> u32 {
    let requested = match raw {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(truncate)),
        Some(Value::String(s)) => parse_count(s),
        _ => None,
    };
    match requested {
        Some(n) if n >= 1 => n.min(MAX_CANDIDATES as i64) as u32,
        _ => 1,
    }
}

fn parse_count(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().map(truncate))
}

fn truncate(value: f64) -> i64 {
    if value.is_finite() { value.trunc() as i64 } else { 0 }
}

// POST /v1/generate body
#[derive(Deserialize, Clone, Debug)]
pub struct GenerateRequest {
    pub prompt: String,
    pub model: Option<String>,
    #[serde(flatten)]
    pub params: GenerationParams,
    pub conv_id: Option<i64>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct GenerateResponse {
    pub images: Vec<String>, // base64
    pub texts: Vec<String>,
}

impl From<GenerationResult> for GenerateResponse {
    fn from(result: GenerationResult) -> Self {
        GenerateResponse {
            images: result.images,
            texts: result.texts,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct AuthRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct MeResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct ConversationTitle {
    pub title: Option<String>,
}

#[derive(Serialize, Clone, Debug)]
pub struct OkResponse {
    pub ok: bool,
}
