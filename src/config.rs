use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub vision: VisionConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Which analysis stages a run may execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_true")]
    pub local_enabled: bool,

    #[serde(default = "default_true")]
    pub api_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            local_enabled: true,
            api_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VisionProviderType {
    /// Any OpenAI-compatible chat completions endpoint (OpenAI, LM Studio, ...)
    OpenAI,
    /// Alibaba DashScope multimodal generation (qwen-vl models)
    Qwen,
    #[default]
    None,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    #[serde(default)]
    pub provider: VisionProviderType,

    /// Base URL of the provider. Empty means the provider's public endpoint.
    #[serde(default)]
    pub endpoint: String,

    /// Model identifier. Empty means the provider's default model.
    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable consulted when `api_key` is not set.
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Images whose longest edge exceeds this are downscaled before upload.
    #[serde(default = "default_max_edge")]
    pub max_edge: u32,
}

// Hand-written so credentials never end up in logs.
impl fmt::Debug for VisionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionConfig")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_key_env", &self.api_key_env)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_edge", &self.max_edge)
            .finish()
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_edge() -> u32 {
    1024
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            provider: VisionProviderType::default(),
            endpoint: String::new(),
            model: String::new(),
            api_key: None,
            api_key_env: None,
            timeout_secs: default_timeout_secs(),
            max_edge: default_max_edge(),
        }
    }
}

impl VisionConfig {
    pub const OPENAI_ENDPOINT: &'static str = "https://api.openai.com/v1";
    pub const OPENAI_MODEL: &'static str = "gpt-4o";
    pub const QWEN_ENDPOINT: &'static str = "https://dashscope.aliyuncs.com/api/v1";
    pub const QWEN_MODEL: &'static str = "qwen-vl-plus";

    /// The configured key, falling back to the `api_key_env` variable and then
    /// to the provider's conventional variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Some(key.trim().to_string());
        }

        let fallback = match self.provider {
            VisionProviderType::OpenAI => Some("OPENAI_API_KEY"),
            VisionProviderType::Qwen => Some("QWEN_API_KEY"),
            VisionProviderType::None => None,
        };

        self.api_key_env
            .as_deref()
            .or(fallback)
            .and_then(|var| std::env::var(var).ok())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }

    pub fn resolved_endpoint(&self) -> String {
        let endpoint = self.endpoint.trim().trim_end_matches('/');
        if !endpoint.is_empty() {
            return endpoint.to_string();
        }
        match self.provider {
            VisionProviderType::OpenAI => Self::OPENAI_ENDPOINT.to_string(),
            VisionProviderType::Qwen => Self::QWEN_ENDPOINT.to_string(),
            VisionProviderType::None => String::new(),
        }
    }

    pub fn resolved_model(&self) -> String {
        let model = self.model.trim();
        if !model.is_empty() {
            return model.to_string();
        }
        match self.provider {
            VisionProviderType::OpenAI => Self::OPENAI_MODEL.to_string(),
            VisionProviderType::Qwen => Self::QWEN_MODEL.to_string(),
            VisionProviderType::None => String::new(),
        }
    }

    /// Whether a provider is selected and has what it needs to make a request.
    /// A self-hosted OpenAI-compatible endpoint may run without a key.
    pub fn is_available(&self) -> bool {
        match self.provider {
            VisionProviderType::None => false,
            VisionProviderType::Qwen => self.resolved_api_key().is_some(),
            VisionProviderType::OpenAI => {
                self.resolved_api_key().is_some()
                    || (!self.endpoint.trim().is_empty()
                        && self.resolved_endpoint() != Self::OPENAI_ENDPOINT)
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    /// Bounded worker pool inside this process.
    #[default]
    InProcess,
    /// Jobs are written to the `annotation_jobs` table and drained by the daemon.
    Queue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub runner: RunnerKind,

    /// Upper bound on concurrently executing runs (and so on external API calls).
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// How often the daemon polls the job table.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_poll_interval_secs() -> u64 {
    5
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            runner: RunnerKind::default(),
            max_concurrency: default_max_concurrency(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_db_path() -> PathBuf {
    Config::data_dir().join("momento.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            analysis: AnalysisConfig::default(),
            vision: VisionConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    /// Load from `MOMENTO_CONFIG` or the default location, writing a default
    /// config file on first use.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("MOMENTO_CONFIG") {
            return PathBuf::from(path);
        }

        Self::config_dir().join("config.toml")
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("momento")
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("momento")
    }
}
