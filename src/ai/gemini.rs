use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{send_json, AiError, AnalysisRequest, VisionProvider};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const TOP_P: f32 = 0.95;
const TOP_K: u32 = 64;

pub struct GeminiClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: Client::new(),
        }
    }

    fn endpoint_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        )
    }

    fn build_request_body(&self, request: &AnalysisRequest) -> Value {
        json!({
            "contents": [
                {
                    "role": "user",
                    "parts": [
                        { "text": request.prompt },
                        { "inline_data": { "mime_type": "image/jpeg", "data": request.image_base64 } }
                    ]
                }
            ],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
                "topP": TOP_P,
                "topK": TOP_K
            }
        })
    }
}

/// Join the text parts of the first candidate.
fn extract_text(response: &Value) -> Result<String, AiError> {
    let candidate = response
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first());

    let Some(candidate) = candidate else {
        let reason = response
            .pointer("/promptFeedback/blockReason")
            .and_then(|r| r.as_str())
            .unwrap_or("no candidates returned");
        return Err(AiError::ModelError(format!("Gemini returned no answer: {}", reason)));
    };

    let text: String = candidate
        .pointer("/content/parts")
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        let finish = candidate
            .get("finishReason")
            .and_then(|r| r.as_str())
            .unwrap_or("unknown");
        return Err(AiError::InvalidResponse(format!(
            "candidate has no text (finishReason={})",
            finish
        )));
    }
    Ok(text)
}

#[async_trait]
impl VisionProvider for GeminiClient {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, AiError> {
        let body = self.build_request_body(request);
        let req = self
            .client
            .post(self.endpoint_url(&request.model))
            .header("x-goog-api-key", &self.api_key);
        let response = send_json(req, &body).await?;
        extract_text(&response)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
