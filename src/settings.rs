use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("No configuration directory on this platform")]
    NoConfigDir,
    #[error("Settings I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Could not serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub gemini_api_key: String,
    pub openai_api_key: String,
    pub ollama_endpoint: String,
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub device_id: u32,
    pub esp32_url: Option<String>,
    pub poll_interval_secs: u64,
    pub captured_dir: PathBuf,
    pub esp32_image_dir: PathBuf,
    pub esp32_base64_dir: PathBuf,
    pub dataset_dirs: Vec<PathBuf>,
    /// Append a counter instead of overwriting a capture taken in the same second.
    pub disambiguate_filenames: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            openai_api_key: String::new(),
            ollama_endpoint: "http://localhost:11434".into(),
            provider: "Gemini".into(),
            model: "gemini-2.0-flash".into(),
            prompt: "What kind of trash is shown in this image? Answer with one of: plastic, paper, glass, metal, organic, e-waste, residual. Then give a one-sentence reason.".into(),
            temperature: 0.7,
            max_tokens: 100,
            device_id: 0,
            esp32_url: None,
            poll_interval_secs: 2,
            captured_dir: PathBuf::from("captured_images"),
            esp32_image_dir: PathBuf::from("esp32_images"),
            esp32_base64_dir: PathBuf::from("esp32_base64"),
            dataset_dirs: vec![
                PathBuf::from("complete_dataset"),
                PathBuf::from("complete_dataset").join("complete_dataset"),
            ],
            disambiguate_filenames: false,
        }
    }
}

pub const TEMPERATURE_RANGE: std::ops::RangeInclusive<f32> = 0.1..=1.0;
pub const MAX_TOKENS_RANGE: std::ops::RangeInclusive<u32> = 1..=500;

impl Settings {
    /// `<config dir>/trash-analyzer/settings.toml`.
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        let dir = dirs::config_dir()
            .ok_or(SettingsError::NoConfigDir)?
            .join("trash-analyzer");
        Ok(dir.join("settings.toml"))
    }

    /// Load from the user config directory, defaults when the file is absent.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(&Self::default_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings.clamped())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        log::info!("Settings saved to {}", path.display());
        Ok(())
    }

    /// Keep the sampling parameters inside the ranges the UI offered.
    pub fn clamped(mut self) -> Self {
        self.temperature = self
            .temperature
            .clamp(*TEMPERATURE_RANGE.start(), *TEMPERATURE_RANGE.end());
        self.max_tokens = self
            .max_tokens
            .clamp(*MAX_TOKENS_RANGE.start(), *MAX_TOKENS_RANGE.end());
        if self.poll_interval_secs == 0 {
            self.poll_interval_secs = 1;
        }
        self
    }

    /// API keys and the Ollama host from the environment win over the file.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(key) = get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY")) {
            self.gemini_api_key = key;
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.openai_api_key = key;
        }
        if let Some(host) = get("OLLAMA_HOST") {
            self.ollama_endpoint = host;
        }
        self
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs.max(1))
    }
}
