use serde::{Deserialize, Serialize};

/// Error type for AI operations
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("Connection failed: {0}")]
    ConnectionError(String),
    #[error("Authentication failed: {0}")]
    AuthError(String),
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("Model error: {0}")]
    ModelError(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("{0} API key not configured")]
    NotConfigured(String),
}

/// One classification request, already reduced to what every backend needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub model: String,
    pub prompt: String,
    /// Base64-encoded JPEG.
    pub image_base64: String,
    pub temperature: f32,
    pub max_tokens: u32,
}
