// dispatch.rs - Routes a classification request to the selected provider.
//
// Failures never propagate as errors: the caller always gets text back, and
// a failed call reads `ERROR: <message>` so it can be shown verbatim.

use image::RgbImage;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use super::gemini::GeminiClient;
use super::ollama::OllamaClient;
use super::openai::OpenAiClient;
use super::{AiError, AnalysisRequest, VisionProvider};
use crate::images;
use crate::settings::Settings;

pub const ERROR_PREFIX: &str = "ERROR:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Gemini,
    OpenAI,
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::Gemini, ProviderKind::OpenAI, ProviderKind::Ollama];

    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "Gemini",
            ProviderKind::OpenAI => "OpenAI",
            ProviderKind::Ollama => "Ollama",
        }
    }

    /// Models offered for this provider, default first.
    pub fn models(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::Gemini => &["gemini-2.0-flash", "gemini-2.0-flash-lite", "gemini-1.5-flash"],
            ProviderKind::OpenAI => &["gpt-4o", "gpt-4o-mini"],
            ProviderKind::Ollama => &["llava", "llama3.2-vision", "moondream"],
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown provider: {}", s))
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Configured providers by kind.
#[derive(Default, Clone)]
pub struct ProviderDispatch {
    providers: HashMap<ProviderKind, Arc<dyn VisionProvider>>,
}

impl ProviderDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every provider the settings have credentials for. The local
    /// server needs none and is always registered.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut dispatch = Self::new();
        if !settings.gemini_api_key.is_empty() {
            dispatch.register(ProviderKind::Gemini, Arc::new(GeminiClient::new(&settings.gemini_api_key)));
        }
        if !settings.openai_api_key.is_empty() {
            dispatch.register(ProviderKind::OpenAI, Arc::new(OpenAiClient::new(&settings.openai_api_key)));
        }
        dispatch.register(
            ProviderKind::Ollama,
            Arc::new(OllamaClient::new(&settings.ollama_endpoint)),
        );
        log::info!(
            "Providers configured: {}",
            dispatch
                .available()
                .iter()
                .map(|k| k.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        dispatch
    }

    pub fn register(&mut self, kind: ProviderKind, provider: Arc<dyn VisionProvider>) {
        self.providers.insert(kind, provider);
    }

    pub fn is_configured(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    /// Configured providers in display order; `[Gemini]` when nothing is set up.
    pub fn available(&self) -> Vec<ProviderKind> {
        let kinds: Vec<ProviderKind> = ProviderKind::ALL
            .into_iter()
            .filter(|k| self.is_configured(*k))
            .collect();
        if kinds.is_empty() {
            vec![ProviderKind::Gemini]
        } else {
            kinds
        }
    }

    /// Run one classification. Always returns text; failures are prefixed
    /// with `ERROR:`. No retries.
    pub async fn analyze(
        &self,
        provider: &str,
        model: &str,
        prompt: &str,
        raw_pixels: &RgbImage,
        temperature: f32,
        max_tokens: u32,
    ) -> String {
        match self
            .try_analyze(provider, model, prompt, raw_pixels, temperature, max_tokens)
            .await
        {
            Ok(text) => text,
            Err(message) => {
                log::error!("Analysis with {} failed: {}", provider, message);
                format!("{} {}", ERROR_PREFIX, message)
            }
        }
    }

    async fn try_analyze(
        &self,
        provider: &str,
        model: &str,
        prompt: &str,
        raw_pixels: &RgbImage,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, String> {
        let kind = ProviderKind::from_str(provider)?;
        let client = self
            .providers
            .get(&kind)
            .ok_or_else(|| AiError::NotConfigured(kind.name().into()).to_string())?;

        let image_base64 = images::encode_for_provider(raw_pixels)
            .map_err(|e| format!("Could not encode image: {}", e))?;

        let request = AnalysisRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            image_base64,
            temperature,
            max_tokens,
        };
        log::info!("Analyzing with {} / {}", client.name(), model);
        client
            .analyze(&request)
            .await
            .map_err(|e| format!("{} API error: {}", kind.name(), e))
    }
}

pub fn is_error_text(text: &str) -> bool {
    text.starts_with(ERROR_PREFIX)
}
