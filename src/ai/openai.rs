use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{send_json, AiError, AnalysisRequest, VisionProvider};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    /// Point at any OpenAI-compatible server.
    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: Client::new(),
        }
    }

    fn endpoint_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_request_body(&self, request: &AnalysisRequest) -> Value {
        json!({
            "model": request.model,
            "messages": [
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": request.prompt },
                        {
                            "type": "image_url",
                            "image_url": { "url": format!("data:image/jpeg;base64,{}", request.image_base64) }
                        }
                    ]
                }
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens
        })
    }
}

/// Pull the answer out of a chat completion.
fn extract_text(response: &Value) -> Result<String, AiError> {
    let choices = response
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| AiError::InvalidResponse("missing `choices`".into()))?;

    let Some(first) = choices.first() else {
        return Ok("No response received from OpenAI".into());
    };

    first
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| AiError::InvalidResponse("choice without message content".into()))
}

#[async_trait]
impl VisionProvider for OpenAiClient {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, AiError> {
        let body = self.build_request_body(request);
        let req = self
            .client
            .post(self.endpoint_url())
            .header("Authorization", format!("Bearer {}", self.api_key));
        let response = send_json(req, &body).await?;
        extract_text(&response)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            model: "gpt-4o".into(),
            prompt: "What kind of trash is this?".into(),
            image_base64: "base64data".into(),
            temperature: 0.7,
            max_tokens: 100,
        }
    }

    #[test]
    fn test_request_body_structure() {
        let client = OpenAiClient::new("test-key");
        let body = client.build_request_body(&request());

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], json!(100));
        assert!((body["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");

        let content = messages[0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "What kind of trash is this?");
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(
            content[1]["image_url"]["url"],
            "data:image/jpeg;base64,base64data"
        );
    }

    #[test]
    fn test_extract_text() {
        let response = json!({
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": "Plastic bottle" } }]
        });
        assert_eq!(extract_text(&response).unwrap(), "Plastic bottle");
    }

    #[test]
    fn test_extract_text_no_choices() {
        let response = json!({ "choices": [] });
        assert_eq!(
            extract_text(&response).unwrap(),
            "No response received from OpenAI"
        );
    }

    #[test]
    fn test_extract_text_malformed() {
        assert!(matches!(
            extract_text(&json!({ "error": "nope" })),
            Err(AiError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_endpoint_url_construction() {
        let client = OpenAiClient::with_base_url("http://localhost:8080/", "key");
        assert_eq!(
            client.endpoint_url(),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_client_name() {
        assert_eq!(OpenAiClient::new("k").name(), "openai");
    }
}
