//! Client for an OpenAI-compatible vision-language judge.
//!
//! Each evaluation is one `POST {endpoint}/chat/completions` call showing
//! the prompt image and two multi-view renders. The model is constrained to
//! a JSON schema and must answer with `{"penalty_1", "penalty_2", "issues"}`.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use meshgen_core::duel::JudgeVerdict;
use meshgen_core::endpoint_pool::Endpoint;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::RemoteError;
use crate::http::{build_client, parse_response, CONNECT_TIMEOUT};
use crate::services::{DuelJudge, JudgeRequest};

pub const DEFAULT_TEMPERATURE: f32 = 0.0;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_JUDGE_TIMEOUT: Duration = Duration::from_secs(120);

/// API key sent when none is configured. Self-hosted servers ignore it.
pub const DEFAULT_API_KEY: &str = "EMPTY";

const SYSTEM_PROMPT: &str = "You are a specialized 3D model evaluation system. \
Analyze visual quality and prompt adherence with expert precision. \
Always respond with valid JSON only.";

const RUBRIC: &str = r#"Does each 3D model match the image prompt?

Penalty 0-10:
0 = Perfect match
3 = Minor issues (slight shape differences, missing small details)
5 = Moderate issues (wrong style, significant details missing)
7 = Major issues (wrong category but related, e.g. chair vs stool)
10 = Completely wrong object

Output: {"penalty_1": <0-10>, "penalty_2": <0-10>, "issues": "<brief>"}"#;

/// Model settings for every judge call in a run.
#[derive(Debug, Clone)]
pub struct JudgeSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub api_key: String,
}

impl JudgeSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: DEFAULT_JUDGE_TIMEOUT,
            api_key: DEFAULT_API_KEY.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// HTTP judge client.
#[derive(Clone)]
pub struct HttpJudge {
    client: reqwest::Client,
    settings: JudgeSettings,
}

impl HttpJudge {
    pub fn new(settings: JudgeSettings) -> Result<Self, RemoteError> {
        Ok(Self {
            client: build_client(CONNECT_TIMEOUT, settings.timeout)?,
            settings,
        })
    }
}

impl DuelJudge for HttpJudge {
    async fn evaluate(
        &self,
        endpoint: &Endpoint,
        request: JudgeRequest<'_>,
    ) -> Result<JudgeVerdict, RemoteError> {
        let body = completion_body(&self.settings, &request);
        let response = self
            .client
            .post(endpoint.url("/chat/completions"))
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await?;

        let completion: ChatCompletion = parse_response(response).await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RemoteError::Malformed("completion has no message content".into()))?;

        parse_verdict(&content)
    }
}

// ---- request/response shaping ----

fn completion_body(settings: &JudgeSettings, request: &JudgeRequest<'_>) -> Value {
    json!({
        "model": settings.model,
        "temperature": settings.temperature,
        "max_tokens": settings.max_tokens,
        "seed": request.seed,
        "response_format": {
            "type": "json_schema",
            "json_schema": {
                "name": "judge-response",
                "schema": verdict_schema(),
            },
        },
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": "Image prompt to generate 3D model:" },
                    image_part(request.prompt_image),
                    { "type": "text", "text": "First 3D model (4 different views):" },
                    image_part(request.first),
                    { "type": "text", "text": "Second 3D model (4 different views):" },
                    image_part(request.second),
                    { "type": "text", "text": RUBRIC },
                ],
            },
        ],
    })
}

fn verdict_schema() -> Value {
    json!({
        "title": "JudgeResponse",
        "type": "object",
        "properties": {
            "penalty_1": { "type": "integer", "minimum": 0, "maximum": 10 },
            "penalty_2": { "type": "integer", "minimum": 0, "maximum": 10 },
            "issues": { "type": "string" },
        },
        "required": ["penalty_1", "penalty_2", "issues"],
    })
}

fn image_part(bytes: &[u8]) -> Value {
    json!({
        "type": "image_url",
        "image_url": { "url": data_url(bytes) },
    })
}

/// Base64 data URL; JPEG is detected by its magic bytes, anything else is
/// sent as PNG.
fn data_url(bytes: &[u8]) -> String {
    let mime = if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else {
        "image/png"
    };
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Parse and validate the judge's JSON answer. Some servers wrap it in a
/// markdown code fence despite the schema.
fn parse_verdict(content: &str) -> Result<JudgeVerdict, RemoteError> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let verdict: JudgeVerdict = serde_json::from_str(unfenced)
        .map_err(|e| RemoteError::Malformed(format!("judge verdict: {e}")))?;
    verdict
        .validate()
        .map_err(|e| RemoteError::Malformed(e.to_string()))?;
    Ok(verdict)
}
