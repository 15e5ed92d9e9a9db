//! JSON-mode degradation.
//!
//! Not every model behind OpenRouter accepts every `response_format`. A client
//! starts with strict `json_schema`, falls back to `json_object`, and finally
//! to plain requests whose prompts ask for JSON. Each downgrade sticks for the
//! lifetime of the client so later calls skip formats known to fail.

use super::schemas::ResponseSchema;
use super::types::{Message, Role};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU8, Ordering};

pub const JSON_INSTRUCTION: &str = "You are a helpful assistant designed to output JSON.";

/// Ordered strongest to weakest; the discriminant order is relied upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonStrategy {
    JsonSchema = 0,
    JsonObject = 1,
    Disabled = 2,
}

impl JsonStrategy {
    pub fn next(self) -> Self {
        match self {
            Self::JsonSchema => Self::JsonObject,
            Self::JsonObject | Self::Disabled => Self::Disabled,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::JsonSchema => "json_schema",
            Self::JsonObject => "json_object",
            Self::Disabled => "disabled",
        }
    }

    /// The `response_format` request field for this strategy.
    pub fn response_format(self, schema: &ResponseSchema) -> Option<Value> {
        match self {
            Self::JsonSchema => Some(schema.response_format()),
            Self::JsonObject => Some(json!({"type": "json_object"})),
            Self::Disabled => None,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::JsonSchema,
            1 => Self::JsonObject,
            _ => Self::Disabled,
        }
    }
}

/// Sticky per-client strategy. Only ever moves towards `Disabled`.
#[derive(Debug)]
pub struct StrategyCell(AtomicU8);

impl Default for StrategyCell {
    fn default() -> Self {
        Self(AtomicU8::new(JsonStrategy::JsonSchema as u8))
    }
}

impl StrategyCell {
    pub fn get(&self) -> JsonStrategy {
        JsonStrategy::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `to` unless a concurrent call already went further.
    pub fn downgrade_to(&self, to: JsonStrategy) -> JsonStrategy {
        let prev = self.0.fetch_max(to as u8, Ordering::AcqRel);
        JsonStrategy::from_u8(prev.max(to as u8))
    }
}

/// Ensure some system message mentions JSON; `json_object` mode on several
/// providers rejects requests otherwise.
pub fn prepare_messages(messages: &[Message]) -> Vec<Message> {
    let has_instruction = messages.iter().filter(|m| m.role == Role::System).any(|m| {
        m.content
            .text_segments()
            .iter()
            .any(|t| t.to_lowercase().contains("json"))
    });

    let mut prepared = Vec::with_capacity(messages.len() + 1);
    if !has_instruction {
        prepared.push(Message::system(JSON_INSTRUCTION));
    }
    prepared.extend_from_slice(messages);
    prepared
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::schemas::agent_action_schema;
    use crate::llm::types::Content;

    #[test]
    fn instruction_inserted_when_missing() {
        let messages = vec![Message::system("You plan web actions."), Message::user("go")];
        let prepared = prepare_messages(&messages);
        assert_eq!(prepared.len(), 3);
        assert_eq!(prepared[0], Message::system(JSON_INSTRUCTION));
        assert_eq!(prepared[1..], messages[..]);
    }

    #[test]
    fn existing_instruction_kept_as_is() {
        let messages = vec![Message::system("Reply in JSON only."), Message::user("go")];
        assert_eq!(prepare_messages(&messages), messages);
    }

    #[test]
    fn json_mention_in_user_message_does_not_count() {
        let messages = vec![Message::user("return json please")];
        let prepared = prepare_messages(&messages);
        assert_eq!(prepared.len(), 2);
        assert_eq!(prepared[0].content, Content::Text(JSON_INSTRUCTION.into()));
    }

    #[test]
    fn strategy_order_and_formats() {
        assert_eq!(JsonStrategy::JsonSchema.next(), JsonStrategy::JsonObject);
        assert_eq!(JsonStrategy::JsonObject.next(), JsonStrategy::Disabled);
        assert_eq!(JsonStrategy::Disabled.next(), JsonStrategy::Disabled);

        let schema = agent_action_schema();
        assert_eq!(
            JsonStrategy::JsonObject.response_format(&schema),
            Some(json!({"type": "json_object"}))
        );
        assert!(JsonStrategy::Disabled.response_format(&schema).is_none());
    }

    #[test]
    fn cell_never_upgrades() {
        let cell = StrategyCell::default();
        assert_eq!(cell.get(), JsonStrategy::JsonSchema);
        cell.downgrade_to(JsonStrategy::Disabled);
        assert_eq!(cell.downgrade_to(JsonStrategy::JsonObject), JsonStrategy::Disabled);
        assert_eq!(cell.get(), JsonStrategy::Disabled);
    }
}
