use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{send_json, AiError, AnalysisRequest, VisionProvider};

/// Locally hosted model server speaking the Ollama API.
pub struct OllamaClient {
    endpoint: String,
    client: Client,
}

impl OllamaClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: Client::new(),
        }
    }

    fn endpoint_url(&self) -> String {
        format!("{}/api/generate", self.endpoint.trim_end_matches('/'))
    }

    fn build_request_body(&self, request: &AnalysisRequest) -> Value {
        json!({
            "model": request.model,
            "prompt": request.prompt,
            "images": [request.image_base64],
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens
            }
        })
    }
}

fn extract_text(response: &Value) -> Result<String, AiError> {
    if let Some(err) = response.get("error").and_then(|e| e.as_str()) {
        return Err(AiError::ModelError(err.to_string()));
    }
    response
        .get("response")
        .and_then(|r| r.as_str())
        .map(|r| r.trim().to_string())
        .ok_or_else(|| AiError::InvalidResponse("missing `response` field".into()))
}

#[async_trait]
impl VisionProvider for OllamaClient {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, AiError> {
        let body = self.build_request_body(request);
        let response = send_json(self.client.post(self.endpoint_url()), &body).await?;
        extract_text(&response)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
