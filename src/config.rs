//! Configuration for contract-agent.
//!
//! Loaded once at startup and passed into constructors. Sources, later ones
//! winning: built-in defaults, a YAML file, then environment variables (a
//! `.env` file in the working directory is read first).

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const PROJECT_NAME: &str = "contract-agent";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub storage: StorageConfig,
    pub workflow: WorkflowConfig,
}

/// Which backend answers `generate`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Direct API-key provider
    #[default]
    OpenAi,
    /// Enterprise gateway with OAuth client-credentials tokens
    AiCore,
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "direct" => Ok(Provider::OpenAi),
            "aicore" | "gateway" => Ok(Provider::AiCore),
            other => Err(format!("unknown LLM provider '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Provider,
    pub api_base: String,
    pub model: String,
    /// Mandatory for any model call to succeed; never serialized back out
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    pub aicore: AiCoreConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_secs: 120,
            temperature: 0.15,
            max_tokens: 1500,
            aicore: AiCoreConfig::default(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiCoreConfig {
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    pub auth_url: String,
    pub api_base: String,
    pub deployment_id: String,
    pub resource_group: String,
    pub scope: Option<String>,
    pub chat_completions_path: Option<String>,
}

impl Default for AiCoreConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            auth_url: String::new(),
            api_base: String::new(),
            deployment_id: String::new(),
            resource_group: "default".to_string(),
            scope: None,
            chat_completions_path: None,
        }
    }
}

impl AiCoreConfig {
    /// Completions path relative to `api_base`
    pub fn completions_path(&self) -> String {
        self.chat_completions_path
            .clone()
            .unwrap_or_else(|| format!("/v2/inference/deployments/{}/chat/completions", self.deployment_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts = max_retries + 1
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Generated stage outputs: `<data_root>/<run_id>/<role>.<ext>`
    pub data_root: PathBuf,
    /// Raw uploads: `<artefact_root>/<run_id>/<original-filename>`
    pub artefact_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            artefact_root: PathBuf::from("artefacts"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub target_language: String,
    /// Reject compare assessments for unknown keys or with keys missing
    pub strict_compare: bool,
    /// Reject translations whose heading/bullet counts differ from the source
    pub preserve_structure: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            target_language: "de".to_string(),
            strict_compare: true,
            preserve_structure: true,
        }
    }
}

impl Config {
    /// Load configuration with fallback chain, then apply the environment.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. ./contract-agent.yml
    /// 3. ~/.config/contract-agent/contract-agent.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            log::debug!("No .env file loaded: {}", e);
        }

        let mut config = Self::load_file_chain(config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn load_file_chain(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_config = PathBuf::from(format!("{}.yml", PROJECT_NAME));
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", project_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join(PROJECT_NAME).join(format!("{}.yml", PROJECT_NAME));
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply environment-style overrides through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("LLM_PROVIDER") {
            self.llm.provider = v.parse().map_err(|e: String| eyre::eyre!(e))?;
        }
        if let Some(v) = get("LLM_API_BASE") {
            self.llm.api_base = v;
        }
        if let Some(v) = get("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("LLM_API_KEY").or_else(|| get("OPENAI_API_KEY")) {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("LLM_REQUEST_TIMEOUT_SECS") {
            self.llm.timeout_secs = v.parse().context("LLM_REQUEST_TIMEOUT_SECS must be an integer")?;
        }
        if let Some(v) = get("LLM_MAX_RETRIES") {
            self.retry.max_retries = v.parse().context("LLM_MAX_RETRIES must be an integer")?;
        }
        if let Some(v) = get("LLM_BACKOFF_BASE_MS") {
            self.retry.backoff_base_ms = v.parse().context("LLM_BACKOFF_BASE_MS must be an integer")?;
        }
        if let Some(v) = get("DATA_STORAGE_PATH") {
            self.storage.data_root = PathBuf::from(v);
        }
        if let Some(v) = get("ARTEFACT_STORAGE_PATH") {
            self.storage.artefact_root = PathBuf::from(v);
        }
        if let Some(v) = get("TARGET_LANGUAGE") {
            self.workflow.target_language = v;
        }

        let aicore = &mut self.llm.aicore;
        if let Some(v) = get("SAP_AICORE_CLIENT_ID") {
            aicore.client_id = v;
        }
        if let Some(v) = get("SAP_AICORE_CLIENT_SECRET") {
            aicore.client_secret = v;
        }
        if let Some(v) = get("SAP_AICORE_AUTH_URL") {
            aicore.auth_url = v;
        }
        if let Some(v) = get("SAP_AICORE_API_BASE") {
            aicore.api_base = v;
        }
        if let Some(v) = get("SAP_AICORE_DEPLOYMENT_ID") {
            aicore.deployment_id = v;
        }
        if let Some(v) = get("SAP_AICORE_RESOURCE_GROUP") {
            aicore.resource_group = v;
        }
        if let Some(v) = get("SAP_AICORE_SCOPE") {
            aicore.scope = Some(v);
        }
        if let Some(v) = get("SAP_AICORE_CHAT_COMPLETIONS_PATH") {
            aicore.chat_completions_path = Some(v);
        }
        if let Some(v) = get("SAP_AICORE_REQUEST_TIMEOUT") {
            self.llm.timeout_secs = v.parse().context("SAP_AICORE_REQUEST_TIMEOUT must be an integer")?;
        }

        Ok(())
    }

    /// Validate the configuration.
    ///
    /// A missing credential is not an error here; the model client reports it
    /// as an auth failure on first use.
    pub fn validate(&self) -> Result<()> {
        if self.llm.timeout_secs == 0 {
            eyre::bail!("llm.timeout_secs must be > 0");
        }
        if self.storage.data_root.as_os_str().is_empty() {
            eyre::bail!("storage.data_root must not be empty");
        }
        if self.storage.artefact_root.as_os_str().is_empty() {
            eyre::bail!("storage.artefact_root must not be empty");
        }
        if self.workflow.target_language.trim().is_empty() {
            eyre::bail!("workflow.target_language must not be empty");
        }
        if self.retry.backoff_max_ms < self.retry.backoff_base_ms {
            eyre::bail!("retry.backoff_max_ms must be >= retry.backoff_base_ms");
        }
        Ok(())
    }
}
