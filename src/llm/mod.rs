pub mod json_mode;
pub mod schemas;
pub mod types;

pub use json_mode::{JsonStrategy, StrategyCell};
pub use schemas::{AgentAction, ElementId, ResponseSchema, Reward};
pub use types::{Completion, Content, ContentPart, Message, RequestOptions, Role, Usage};

use crate::config::{CustomEndpoint, Settings};
use crate::error::{Error, Result};
use crate::http::{HttpClient, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

const USER_AGENT: &str = concat!("webeval-llm/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Where requests go. Both speak the OpenAI chat-completions format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenRouter,
    /// Operator-supplied OpenAI-compatible server (vLLM, llama.cpp, ollama, ...).
    Custom,
}

impl Provider {
    fn label(self) -> &'static str {
        match self {
            Self::OpenRouter => "openrouter",
            Self::Custom => "custom",
        }
    }
}

pub struct LlmClient {
    provider: Provider,
    api_key: Option<String>,
    model: String,
    base_url: String,
    options: RequestOptions,
    json_mode: bool,
    schema: ResponseSchema,
    strategy: StrategyCell,
    extra_headers: Vec<(String, String)>,
    http: HttpClient,
}

// -- OpenAI-compatible format --

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<UsageRequest>,
}

/// OpenRouter only reports cost when asked to.
#[derive(Serialize)]
struct UsageRequest {
    include: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
    cost: Option<f64>,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        let prompt_tokens = u.prompt_tokens.unwrap_or(0);
        let completion_tokens = u.completion_tokens.unwrap_or(0);
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: u.total_tokens.unwrap_or(prompt_tokens + completion_tokens),
            total_cost: u.cost.unwrap_or(0.0),
        }
    }
}

#[derive(Deserialize)]
struct KeyResponse {
    data: KeyStatus,
}

/// What OpenRouter reports about the configured API key.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyStatus {
    pub label: Option<String>,
    #[serde(default)]
    pub usage: f64,
    pub limit: Option<f64>,
    #[serde(default)]
    pub is_free_tier: bool,
}

impl LlmClient {
    pub fn new(
        provider: Provider,
        api_key: Option<String>,
        model: String,
        base_url: Option<String>,
    ) -> Result<Self> {
        let http = HttpClient::new(USER_AGENT, DEFAULT_TIMEOUT, RetryPolicy::default())?;
        let base_url = base_url
            .unwrap_or_else(|| OPENROUTER_BASE_URL.into())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            provider,
            api_key,
            model,
            base_url,
            options: RequestOptions::default(),
            json_mode: false,
            schema: schemas::agent_action_schema(),
            strategy: StrategyCell::default(),
            extra_headers: Vec::new(),
            http,
        })
    }

    /// A client for any OpenRouter model, e.g. `openai/gpt-4o` or
    /// `anthropic/claude-3.5-sonnet`.
    pub fn openrouter(api_key: &str, model: impl Into<String>, json_mode: bool) -> Result<Self> {
        Ok(Self::new(Provider::OpenRouter, Some(api_key.into()), model.into(), None)?
            .with_json_mode(json_mode))
    }

    pub fn custom(endpoint: &CustomEndpoint, model: impl Into<String>) -> Result<Self> {
        Self::new(
            Provider::Custom,
            endpoint.api_key.clone(),
            model.into(),
            Some(endpoint.base_url.clone()),
        )
    }

    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }

    /// Schema used for the `json_schema` strategy. Defaults to [`AgentAction`].
    pub fn with_schema(mut self, schema: ResponseSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy, timeout: Duration) -> Result<Self> {
        self.http = HttpClient::new(USER_AGENT, timeout, retry)?;
        Ok(self)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn json_mode(&self) -> bool {
        self.json_mode
    }

    /// The JSON strategy the next JSON-mode request will start from.
    pub fn json_strategy(&self) -> JsonStrategy {
        self.strategy.get()
    }

    /// Send a chat completion. Transient failures are retried by the HTTP
    /// layer; in JSON mode, rejected response formats are downgraded and the
    /// call is repeated with the next weaker strategy.
    pub async fn request(&self, messages: &[Message]) -> Result<Completion> {
        debug!(provider = self.provider.label(), model = %self.model, "sending LLM request");

        if !self.json_mode {
            return self.send(messages, None).await;
        }

        loop {
            let strategy = self.strategy.get();
            if strategy == JsonStrategy::Disabled {
                debug!(model = %self.model, "JSON mode disabled, relying on prompt instructions");
                return self.send(messages, Some(strategy)).await;
            }

            let prepared = json_mode::prepare_messages(messages);
            match self.send(&prepared, Some(strategy)).await {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_unsupported_request() => {
                    let next = self.strategy.downgrade_to(strategy.next());
                    warn!(
                        model = %self.model,
                        from = strategy.as_str(),
                        to = next.as_str(),
                        error = %e,
                        "response format rejected, downgrading JSON mode"
                    );
                    if next == JsonStrategy::Disabled {
                        warn!(
                            model = %self.model,
                            "neither json_schema nor json_object supported; relying on prompt instructions for JSON"
                        );
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Request and parse the reply as JSON, tolerating markdown fences.
    pub async fn complete_json<T: serde::de::DeserializeOwned>(
        &self,
        messages: &[Message],
    ) -> Result<(T, Completion)> {
        let completion = self.request(messages).await?;
        let parsed = self.parse_json(&completion)?;
        Ok((parsed, completion))
    }

    /// Parse a completion's content as JSON. Callers that account for usage
    /// should record `completion.usage` before calling this, since a billed
    /// reply can still fail to parse.
    pub fn parse_json<T: serde::de::DeserializeOwned>(&self, completion: &Completion) -> Result<T> {
        if completion.truncated() {
            warn!(model = %self.model, "response truncated; JSON may be incomplete");
        }
        let json_str = extract_json(&completion.content);
        serde_json::from_str(json_str).map_err(|e| {
            Error::parse(format!("parse LLM JSON: {e}\nraw: {}", completion.content))
        })
    }

    /// Query OpenRouter for the key's label, spend and limit.
    pub async fn key_status(&self) -> Result<KeyStatus> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::config("no API key configured for this client"))?;
        let url = format!("{}/key", self.base_url);
        let resp: KeyResponse = self.http.get_json_authed(&url, api_key).await?;
        Ok(resp.data)
    }

    async fn send(&self, messages: &[Message], strategy: Option<JsonStrategy>) -> Result<Completion> {
        let request = ChatRequest {
            model: &self.model,
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
            messages,
            response_format: strategy.and_then(|s| s.response_format(&self.schema)),
            usage: (self.provider == Provider::OpenRouter).then_some(UsageRequest { include: true }),
        };
        if let Some(s) = strategy {
            info!(model = %self.model, strategy = s.as_str(), "JSON mode request");
        }

        let body = serde_json::to_string(&request)
            .map_err(|e| Error::parse(format!("serialize request: {e}")))?;

        let auth = self.api_key.as_ref().map(|k| format!("Bearer {k}"));
        let mut headers: Vec<(&str, &str)> = self
            .extra_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        if let Some(auth) = auth.as_deref() {
            headers.push(("Authorization", auth));
        }

        let url = format!("{}/chat/completions", self.base_url);
        let response_text = self
            .http
            .post_json_raw(&url, &body, &headers)
            .await
            .map_err(|e| {
                warn!(provider = self.provider.label(), "LLM API error: {e}");
                e
            })?;

        let resp: ChatResponse = serde_json::from_str(&response_text)
            .map_err(|e| Error::parse(format!("parse LLM response: {e}")))?;

        let usage = match resp.usage {
            Some(u) => Usage::from(u),
            None => {
                warn!(model = %self.model, "no usage data in response");
                Usage::default()
            }
        };

        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::parse("empty response from LLM"))?;

        let completion = Completion {
            content: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason,
            usage,
            strategy,
        };
        if completion.truncated() {
            warn!(model = %self.model, "response may be truncated due to length");
        }
        debug!(
            model = %self.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            cost = usage.total_cost,
            "LLM request complete"
        );
        Ok(completion)
    }
}

/// Semantic matching call on the router's default model
/// (`OPENROUTER_DEFAULT_MODEL`, else `openai/gpt-3.5-turbo`). Plain text, no
/// JSON mode.
pub async fn semantic_match_request(router: &ModelRouter, messages: &[Message]) -> Result<String> {
    let client = router.client_for(TaskKind::SemanticMatch);
    Ok(client.request(messages).await?.content)
}

/// Pipeline stage an LLM call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Planning,
    GlobalReward,
    SemanticMatch,
}

/// Routes each stage to its own client, falling back to a default.
pub struct ModelRouter {
    default: LlmClient,
    overrides: HashMap<TaskKind, LlmClient>,
}

impl ModelRouter {
    pub fn new(default: LlmClient) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_client(mut self, kind: TaskKind, client: LlmClient) -> Self {
        self.overrides.insert(kind, client);
        self
    }

    pub fn client_for(&self, kind: TaskKind) -> &LlmClient {
        self.overrides.get(&kind).unwrap_or(&self.default)
    }

    /// Planning goes to the custom endpoint when one was selected; reward and
    /// semantic matching always go through OpenRouter.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let openrouter = |model: &str| -> Result<LlmClient> {
            let mut client = LlmClient::openrouter(&settings.openrouter_api_key, model, false)?
                .with_options(settings.options)
                .with_retry(settings.retry, settings.timeout)?;
            if let Some(site) = &settings.site_url {
                client = client.with_header("HTTP-Referer", site);
            }
            if let Some(app) = &settings.app_name {
                client = client.with_header("X-Title", app);
            }
            Ok(client)
        };

        let planning = match &settings.planning_endpoint {
            Some(endpoint) => LlmClient::custom(endpoint, &settings.planning_text_model)?
                .with_options(settings.options)
                .with_retry(settings.retry, settings.timeout)?,
            None => openrouter(&settings.planning_text_model)?,
        }
        .with_json_mode(settings.json_mode)
        .with_schema(schemas::agent_action_schema());

        let reward = openrouter(&settings.global_reward_text_model)?
            .with_json_mode(settings.json_mode)
            .with_schema(schemas::reward_schema());

        let semantic = openrouter(&settings.semantic_match_model)?;

        info!(
            planning = %planning.model(),
            planning_provider = planning.provider().label(),
            reward = %reward.model(),
            semantic = %semantic.model(),
            "model routing resolved"
        );

        Ok(Self::new(semantic)
            .with_client(TaskKind::Planning, planning)
            .with_client(TaskKind::GlobalReward, reward))
    }
}

/// Extract JSON from a response that might be wrapped in markdown code fences.
pub fn extract_json(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        let content = &text[start + 7..];
        if let Some(end) = content.find("```") {
            return content[..end].trim();
        }
    }
    if let Some(start) = text.find("```") {
        let content = &text[start + 3..];
        if let Some(end) = content.find("```") {
            let inner = content[..end].trim();
            if inner.starts_with('{') || inner.starts_with('[') {
                return inner;
            }
        }
    }
    if let Some(start) = text.find('{')
        && let Some(end) = text.rfind('}')
        && start < end
    {
        return &text[start..=end];
    }
    text.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_from_fence() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nthanks";
        assert_eq!(extract_json(text), "{\"a\": 1}");
    }

    #[test]
    fn extract_json_from_bare_fence() {
        assert_eq!(extract_json("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn extract_json_from_prose() {
        assert_eq!(extract_json("sure! {\"a\": {\"b\": 2}} done"), "{\"a\": {\"b\": 2}}");
    }

    #[test]
    fn extract_json_passthrough() {
        assert_eq!(extract_json("  [1, 2]  "), "[1, 2]");
    }

    #[test]
    fn usage_total_falls_back_to_sum() {
        let usage = Usage::from(ApiUsage {
            prompt_tokens: Some(12),
            completion_tokens: Some(8),
            total_tokens: None,
            cost: None,
        });
        assert_eq!(usage.total_tokens, 20);
        assert_eq!(usage.total_cost, 0.0);
    }

    #[test]
    fn openrouter_requests_ask_for_usage() {
        let messages = [Message::user("hi")];
        let request = ChatRequest {
            model: "openai/gpt-4o",
            max_tokens: 500,
            temperature: 0.7,
            messages: &messages,
            response_format: None,
            usage: Some(UsageRequest { include: true }),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["usage"]["include"], true);
        assert!(value.get("response_format").is_none());
    }
}
