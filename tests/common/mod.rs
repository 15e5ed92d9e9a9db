#![allow(dead_code)]

use serde_json::{Value, json};
use std::time::Duration;
use webeval_llm::http::RetryPolicy;
use webeval_llm::llm::{LlmClient, Provider};
use wiremock::{Match, MockServer, Request};

pub const API_KEY: &str = "sk-or-test-key";

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
    }
}

pub fn client(server: &MockServer, provider: Provider, api_key: Option<&str>, model: &str) -> LlmClient {
    LlmClient::new(
        provider,
        api_key.map(String::from),
        model.into(),
        Some(format!("{}/v1", server.uri())),
    )
    .unwrap()
    .with_retry(fast_retry(3), Duration::from_secs(5))
    .unwrap()
}

pub fn openrouter_client(server: &MockServer, model: &str) -> LlmClient {
    client(server, Provider::OpenRouter, Some(API_KEY), model)
}

/// A chat-completions body the way OpenRouter returns it.
pub fn completion_body(content: &str, finish_reason: &str, cost: f64) -> Value {
    json!({
        "id": "gen-123",
        "object": "chat.completion",
        "model": "openai/gpt-4o",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": finish_reason
        }],
        "usage": {
            "prompt_tokens": 120,
            "completion_tokens": 30,
            "total_tokens": 150,
            "cost": cost
        }
    })
}

pub fn body_json(request: &Request) -> Value {
    serde_json::from_slice(&request.body).unwrap()
}

/// Matches JSON bodies that do not carry the given top-level field.
pub struct WithoutField(pub &'static str);

impl Match for WithoutField {
    fn matches(&self, request: &Request) -> bool {
        serde_json::from_slice::<Value>(&request.body)
            .map(|v| v.get(self.0).is_none())
            .unwrap_or(false)
    }
}

pub const ACTION_JSON: &str = r#"{"thought":"search first","action":"google_search","action_input":"weather paris","element_id":null,"description":"On a blank page, searching"}"#;

pub const REWARD_JSON: &str =
    r#"{"status":"doing","score":"7","reason":"search issued","description":"keep going"}"#;
