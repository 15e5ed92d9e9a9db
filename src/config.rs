use crate::error::{Error, Result};
use crate::http::RetryPolicy;
use crate::llm::RequestOptions;
use crate::tokens::Pricing;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const OPENROUTER_API_KEY: &str = "OPENROUTER_API_KEY";
pub const CUSTOM_LLM_API_KEY: &str = "CUSTOM_LLM_API_KEY";
pub const CUSTOM_LLM_BASE_URL: &str = "CUSTOM_LLM_BASE_URL";
pub const OPENROUTER_DEFAULT_MODEL: &str = "OPENROUTER_DEFAULT_MODEL";

/// Model used for semantic matching when `OPENROUTER_DEFAULT_MODEL` is unset.
pub const DEFAULT_SEMANTIC_MATCH_MODEL: &str = "openai/gpt-3.5-turbo";

/// API credentials and endpoint overrides read from the process environment.
#[derive(Clone, Default)]
pub struct Credentials {
    openrouter_api_key: Option<String>,
    custom_api_key: Option<String>,
    custom_base_url: Option<String>,
    default_model: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field(
                "openrouter_api_key",
                &self.openrouter_api_key.as_deref().map(mask_key),
            )
            .field("custom_api_key", &self.custom_api_key.as_deref().map(mask_key))
            .field("custom_base_url", &self.custom_base_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            openrouter_api_key: read(OPENROUTER_API_KEY),
            custom_api_key: read(CUSTOM_LLM_API_KEY),
            custom_base_url: read(CUSTOM_LLM_BASE_URL),
            default_model: read(OPENROUTER_DEFAULT_MODEL),
        }
    }

    pub fn openrouter_api_key(&self) -> Option<&str> {
        self.openrouter_api_key.as_deref()
    }

    pub fn require_openrouter(&self) -> Result<&str> {
        self.openrouter_api_key().ok_or_else(|| {
            Error::missing_credential(
                OPENROUTER_API_KEY,
                "Create a key at https://openrouter.ai/keys, then run \
                 `export OPENROUTER_API_KEY=sk-or-...` or add it to .env",
            )
        })
    }

    pub fn has_custom_endpoint(&self) -> bool {
        self.custom_base_url.is_some()
    }

    /// The custom OpenAI-compatible endpoint, if `CUSTOM_LLM_BASE_URL` is set.
    pub fn custom_endpoint(&self) -> Result<Option<CustomEndpoint>> {
        let Some(raw) = self.custom_base_url.as_deref() else {
            return Ok(None);
        };
        Ok(Some(CustomEndpoint {
            base_url: normalize_base_url(raw)?,
            api_key: self.custom_api_key.clone(),
        }))
    }

    pub fn semantic_match_model(&self) -> String {
        self.default_model
            .clone()
            .unwrap_or_else(|| DEFAULT_SEMANTIC_MATCH_MODEL.into())
    }
}

/// An operator-supplied server exposing `/v1/chat/completions`.
#[derive(Clone, PartialEq, Eq)]
pub struct CustomEndpoint {
    /// Normalised base, always ending in `/v1`.
    pub base_url: String,
    pub api_key: Option<String>,
}

impl fmt::Debug for CustomEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomEndpoint")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_deref().map(mask_key))
            .finish()
    }
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(Error::config(format!(
            "{CUSTOM_LLM_BASE_URL} must start with http:// or https:// (got {raw:?})"
        )));
    }
    if trimmed.ends_with("/v1") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/v1"))
    }
}

/// Shorten a secret for display: first four and last four characters.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".into();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub pricing: Pricing,
}

#[derive(Debug, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_planning_model")]
    pub planning_text_model: String,
    #[serde(default = "default_reward_model")]
    pub global_reward_text_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_true")]
    pub json_mode: bool,
    /// Sent to OpenRouter as `X-Title`.
    pub app_name: Option<String>,
    /// Sent to OpenRouter as `HTTP-Referer`.
    pub site_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            planning_text_model: default_planning_model(),
            global_reward_text_model: default_reward_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            json_mode: true,
            app_name: None,
            site_url: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

// Defaults
fn default_planning_model() -> String {
    "openai/gpt-4o".into()
}
fn default_reward_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_max_tokens() -> u32 {
    500
}
fn default_temperature() -> f32 {
    0.7
}
fn default_true() -> bool {
    true
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    180
}
fn default_ledger_path() -> PathBuf {
    PathBuf::from("token_counts.json")
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config {}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| Error::config(format!("Failed to parse config: {e}")))
    }

    /// Defaults when the file doesn't exist; a file that exists must parse.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }
}

/// Command-line model selection, applied over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub planning_text_model: Option<String>,
    pub global_reward_text_model: Option<String>,
    /// Planning model served by the custom endpoint instead of OpenRouter.
    pub custom_model: Option<String>,
}

/// Everything needed to talk to the models, validated up front.
#[derive(Clone)]
pub struct Settings {
    pub openrouter_api_key: String,
    pub planning_text_model: String,
    /// Set when the planning model runs on the custom endpoint.
    pub planning_endpoint: Option<CustomEndpoint>,
    pub global_reward_text_model: String,
    pub semantic_match_model: String,
    pub options: RequestOptions,
    pub json_mode: bool,
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub app_name: Option<String>,
    pub site_url: Option<String>,
    pub ledger_path: PathBuf,
    pub pricing: Pricing,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("openrouter_api_key", &mask_key(&self.openrouter_api_key))
            .field("planning_text_model", &self.planning_text_model)
            .field("planning_endpoint", &self.planning_endpoint)
            .field("global_reward_text_model", &self.global_reward_text_model)
            .field("semantic_match_model", &self.semantic_match_model)
            .field("options", &self.options)
            .field("json_mode", &self.json_mode)
            .field("retry", &self.retry)
            .field("ledger_path", &self.ledger_path)
            .finish_non_exhaustive()
    }
}

impl Settings {
    pub fn resolve(config: &Config, credentials: &Credentials, overrides: &Overrides) -> Result<Self> {
        let openrouter_api_key = credentials.require_openrouter()?.to_string();

        let (planning_text_model, planning_endpoint) = match &overrides.custom_model {
            Some(model) => {
                let endpoint = credentials.custom_endpoint()?.ok_or_else(|| {
                    Error::config(format!(
                        "--custom_model {model} needs {CUSTOM_LLM_BASE_URL} pointing at an \
                         OpenAI-compatible server (e.g. export {CUSTOM_LLM_BASE_URL}=http://localhost:8000/v1)"
                    ))
                })?;
                let model = model.trim();
                if model.is_empty() {
                    return Err(Error::config("--custom_model must not be empty"));
                }
                (model.to_string(), Some(endpoint))
            }
            None => {
                if credentials.has_custom_endpoint() {
                    debug!("{CUSTOM_LLM_BASE_URL} set without --custom_model; ignoring");
                }
                let model = overrides
                    .planning_text_model
                    .clone()
                    .unwrap_or_else(|| config.llm.planning_text_model.clone());
                validate_openrouter_model("planning_text_model", &model)?;
                (model, None)
            }
        };

        let global_reward_text_model = overrides
            .global_reward_text_model
            .clone()
            .unwrap_or_else(|| config.llm.global_reward_text_model.clone());
        validate_openrouter_model("global_reward_text_model", &global_reward_text_model)?;

        let semantic_match_model = credentials.semantic_match_model();
        validate_openrouter_model(OPENROUTER_DEFAULT_MODEL, &semantic_match_model)?;

        if !(0.0..=2.0).contains(&config.llm.temperature) {
            return Err(Error::config(format!(
                "llm.temperature must be within [0, 2], got {}",
                config.llm.temperature
            )));
        }
        if config.llm.max_tokens == 0 {
            return Err(Error::config("llm.max_tokens must be greater than 0"));
        }
        if config.retry.max_attempts == 0 {
            return Err(Error::config("retry.max_attempts must be at least 1"));
        }

        Ok(Self {
            openrouter_api_key,
            planning_text_model,
            planning_endpoint,
            global_reward_text_model,
            semantic_match_model,
            options: RequestOptions {
                max_tokens: config.llm.max_tokens,
                temperature: config.llm.temperature,
            },
            json_mode: config.llm.json_mode,
            retry: config.retry.policy(),
            timeout: Duration::from_secs(config.retry.timeout_secs),
            app_name: config.llm.app_name.clone(),
            site_url: config.llm.site_url.clone(),
            ledger_path: config.ledger.path.clone(),
            pricing: config.pricing.clone(),
        })
    }
}

/// OpenRouter ids are provider-qualified: `provider/model-name[:variant]`.
fn validate_openrouter_model(field: &str, model: &str) -> Result<()> {
    let valid = match model.split_once('/') {
        Some((provider, name)) => {
            !provider.is_empty() && !name.is_empty() && !model.contains(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::config(format!(
            "{field} must be a provider-qualified model like `openai/gpt-4o`, got {model:?}"
        )))
    }
}
