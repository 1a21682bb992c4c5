use crate::cloudflare;
use crate::dispatch::{Persona, PersonaPreset};
use crate::llm::LlmSettings;
use anyhow::Context;
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;

/// Config file picked up from the working directory when none is given.
const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Enable rate limiting
    #[arg(long, env = "RATE_LIMIT_ENABLED")]
    pub rate_limit_enabled: Option<bool>,

    /// Disable timeout middleware
    #[arg(long, env = "TIMEOUT_DISABLED")]
    pub timeout_disabled: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub resilience: ResilienceConfig,
    pub log: LogConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub assistant: AssistantConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Sessions idle longer than this are dropped.
    pub session_idle_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
            session_idle_timeout_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ResilienceConfig {
    pub rate_limit_enabled: bool,
    pub timeout_disabled: bool,
    pub requests_per_second: f32,
    pub burst_size: f32,
    pub request_timeout_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            rate_limit_enabled: true,
            timeout_disabled: false,
            requests_per_second: 5.0,
            burst_size: 10.0,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
}

/// Chat generation endpoint. Defaults to Workers AI's OpenAI-compatible API.
#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    /// Overrides the Workers AI endpoint derived from `account_id`.
    pub base_url: Option<String>,
    pub account_id: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            account_id: None,
            api_key: None,
            model: "@cf/meta/llama-3.3-70b-instruct-fp8-fast".to_string(),
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url())
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl LlmConfig {
    /// Explicit base URL, else the account's Workers AI endpoint.
    #[must_use]
    pub fn base_url(&self) -> Option<String> {
        self.base_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| {
                self.account_id.as_deref().map(|account| {
                    cloudflare::account_url(cloudflare::DEFAULT_API_BASE, account, "ai")
                })
            })
    }

    pub fn settings(&self) -> anyhow::Result<LlmSettings> {
        let base_url = self
            .base_url()
            .context("llm.base_url or llm.account_id is required")?;
        Ok(LlmSettings {
            base_url,
            api_key: self.api_key.clone().filter(|k| !k.trim().is_empty()),
            model: self.model.clone(),
        })
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingProvider {
    #[default]
    #[serde(rename = "workers-ai")]
    WorkersAi,
    #[serde(rename = "openai")]
    OpenAi,
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    /// Overrides the provider's default API base.
    pub base_url: Option<String>,
    pub model: String,
    pub account_id: Option<String>,
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::WorkersAi,
            base_url: None,
            model: "@cf/baai/bge-m3".to_string(),
            account_id: None,
            api_key: None,
        }
    }
}

impl std::fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("account_id", &self.account_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl EmbeddingConfig {
    #[must_use]
    pub fn base_url(&self) -> String {
        self.base_url.clone().unwrap_or_else(|| match self.provider {
            EmbeddingProvider::WorkersAi => cloudflare::DEFAULT_API_BASE.to_string(),
            EmbeddingProvider::OpenAi => "https://api.openai.com".to_string(),
        })
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexProvider {
    Vectorize,
    #[default]
    Memory,
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    pub provider: IndexProvider,
    pub base_url: Option<String>,
    pub index_name: String,
    pub account_id: Option<String>,
    pub api_key: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            provider: IndexProvider::Memory,
            base_url: None,
            index_name: "study-notes".to_string(),
            account_id: None,
            api_key: None,
        }
    }
}

impl std::fmt::Debug for IndexConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("index_name", &self.index_name)
            .field("account_id", &self.account_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl IndexConfig {
    #[must_use]
    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| cloudflare::DEFAULT_API_BASE.to_string())
    }
}

/// Persona selection and per-field overrides.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AssistantConfig {
    pub preset: PersonaPreset,
    pub learn_command: String,
    pub top_k: usize,
    /// Recall system prompt; `{context}` and `{query}` are substituted.
    pub system_prompt: Option<String>,
    /// Learn confirmation prompt; `{note}` and `{confirmation}` are substituted.
    pub confirmation_prompt: Option<String>,
    pub confirmation: Option<String>,
    pub greeting: Option<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            preset: PersonaPreset::StudyGuide,
            learn_command: "/learn".to_string(),
            top_k: 3,
            system_prompt: None,
            confirmation_prompt: None,
            confirmation: None,
            greeting: None,
        }
    }
}

impl AssistantConfig {
    /// The preset with configured overrides applied.
    #[must_use]
    pub fn persona(&self) -> Persona {
        let mut persona = Persona::preset(self.preset);
        persona.learn_command = self.learn_command.clone();
        persona.top_k = self.top_k;
        if let Some(template) = &self.system_prompt {
            persona.system_template = template.clone();
        }
        if let Some(template) = &self.confirmation_prompt {
            persona.confirmation_template = template.clone();
        }
        if let Some(confirmation) = &self.confirmation {
            persona.confirmation = confirmation.clone();
        }
        if let Some(greeting) = &self.greeting {
            persona.greeting = greeting.clone();
        }
        persona
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder();

        // 1. Config file: explicit path, else ./config.yaml if present
        match &cli.config {
            Some(path) => builder = builder.add_source(File::with_name(path).required(true)),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                builder = builder.add_source(File::with_name(DEFAULT_CONFIG_FILE));
            }
            None => {}
        }

        // 2. Environment variables prefixed with SC_, e.g. SC_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("SC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // 3. Unprefixed service credentials; LLM_* beats CLOUDFLARE_* for llm keys
        for (var, keys) in [
            (
                "CLOUDFLARE_ACCOUNT_ID",
                &["llm.account_id", "embedding.account_id", "index.account_id"][..],
            ),
            (
                "CLOUDFLARE_API_TOKEN",
                &["llm.api_key", "embedding.api_key", "index.api_key"][..],
            ),
            ("LLM_BASE_URL", &["llm.base_url"][..]),
            ("LLM_MODEL", &["llm.model"][..]),
            ("LLM_API_KEY", &["llm.api_key"][..]),
        ] {
            if let Some(val) = env::var(var).ok().filter(|v| !v.trim().is_empty()) {
                for key in keys {
                    builder = builder.set_override(*key, val.clone())?;
                }
            }
        }

        // 4. CLI flags (and their env aliases) win
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(rl) = cli.rate_limit_enabled {
            builder = builder.set_override("resilience.rate_limit_enabled", rl)?;
        }
        if let Some(td) = cli.timeout_disabled {
            builder = builder.set_override("resilience.timeout_disabled", td)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check cross-field requirements.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let invalid = |msg: &str| Err(config::ConfigError::Message(msg.to_string()));

        if self.llm.base_url().is_none() {
            return invalid("llm.base_url or llm.account_id is required");
        }
        if self.llm.model.trim().is_empty() {
            return invalid("llm.model cannot be empty");
        }
        if self.embedding.provider == EmbeddingProvider::WorkersAi
            && self.embedding.account_id.is_none()
        {
            return invalid("embedding.account_id is required for the workers-ai provider");
        }
        if self.index.provider == IndexProvider::Vectorize && self.index.account_id.is_none() {
            return invalid("index.account_id is required for the vectorize provider");
        }
        if self.assistant.top_k == 0 {
            return invalid("assistant.top_k must be at least 1");
        }
        if self.assistant.learn_command.is_empty()
            || self.assistant.learn_command.contains(char::is_whitespace)
        {
            return invalid("assistant.learn_command must be a single non-empty word");
        }
        Ok(())
    }
}
