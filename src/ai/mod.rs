use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde_json::Value;

pub mod dispatch;
pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod types;
pub use dispatch::{ProviderDispatch, ProviderKind};
pub use types::*;

/// Trait for multimodal providers (Gemini, OpenAI, a local Ollama server).
/// Each provider turns a prompt plus one image into a block of text.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Classify the image in `request` and return the model's answer.
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, AiError>;

    /// Provider name for logging/display
    fn name(&self) -> &str;
}

/// Send a JSON request and map non-2xx statuses onto `AiError`.
pub(crate) async fn send_json(req: RequestBuilder, body: &Value) -> Result<Value, AiError> {
    let response = req
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| AiError::ConnectionError(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "failed to read error body".into());
        return Err(status_error(status.as_u16(), error_body));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| AiError::InvalidResponse(e.to_string()))
}

pub(crate) fn status_error(status: u16, body: String) -> AiError {
    match status {
        401 | 403 => AiError::AuthError(body),
        429 => AiError::RateLimited {
            retry_after_ms: 1000,
        },
        _ => AiError::ConnectionError(format!("HTTP {}: {}", status, body)),
    }
}
