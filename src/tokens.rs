//! Offline token estimates and static per-model pricing.
//!
//! API-reported usage is always preferred. These are the fallback for
//! endpoints that report neither usage nor cost.

use crate::llm::Message;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

const CHARS_PER_TOKEN: usize = 4;

/// Rough token count: four characters per token, rounded up.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    chars.div_ceil(CHARS_PER_TOKEN) as u32
}

/// USD per token for one model.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
}

/// Static price table keyed by model id, from the `[pricing]` config section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Pricing(HashMap<String, ModelPrice>);

impl Pricing {
    pub fn get(&self, model: &str) -> Option<&ModelPrice> {
        self.0.get(model)
    }

    pub fn contains(&self, model: &str) -> bool {
        self.0.contains_key(model)
    }

    pub fn insert(&mut self, model: impl Into<String>, price: ModelPrice) {
        self.0.insert(model.into(), price);
    }

    /// `(input_cost, output_cost)` for the given counts, if the model is priced.
    pub fn cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> Option<(f64, f64)> {
        self.get(model).map(|p| {
            (
                f64::from(input_tokens) * p.input,
                f64::from(output_tokens) * p.output,
            )
        })
    }
}

/// Estimate prompt tokens for a conversation.
///
/// Models missing from the price table are skipped (returns 0), since the
/// count would only feed a cost that can't be computed. Counting stops at the
/// first message with empty content.
pub fn count_message_tokens(messages: &[Message], model: &str, pricing: &Pricing) -> u32 {
    if !pricing.contains(model) {
        debug!(model, "model not in pricing table, skipping token estimate");
        return 0;
    }

    let mut total = 0;
    for message in messages {
        if message.content.is_empty() {
            warn!("message content is empty, stopping token count");
            break;
        }
        total += message
            .content
            .text_segments()
            .into_iter()
            .map(estimate_tokens)
            .sum::<u32>();
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn priced(model: &str) -> Pricing {
        let mut pricing = Pricing::default();
        pricing.insert(
            model,
            ModelPrice {
                input: 0.000001,
                output: 0.000002,
            },
        );
        pricing
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn unpriced_model_counts_zero() {
        let messages = vec![Message::user("a fairly long prompt")];
        assert_eq!(count_message_tokens(&messages, "x/unknown", &Pricing::default()), 0);
    }

    #[test]
    fn counts_text_and_text_parts() {
        let pricing = priced("openai/gpt-4o");
        let messages = vec![
            Message::system("12345678"),
            Message::user_with_image("1234", "https://example.com/shot.png"),
        ];
        assert_eq!(count_message_tokens(&messages, "openai/gpt-4o", &pricing), 3);
    }

    #[test]
    fn stops_at_empty_message() {
        let pricing = priced("openai/gpt-4o");
        let messages = vec![Message::user("1234"), Message::user(""), Message::user("12345678")];
        assert_eq!(count_message_tokens(&messages, "openai/gpt-4o", &pricing), 1);
    }

    #[test]
    fn cost_uses_per_token_prices() {
        let pricing = priced("openai/gpt-4o");
        let (input, output) = pricing.cost("openai/gpt-4o", 1000, 500).unwrap();
        assert!((input - 0.001).abs() < 1e-12);
        assert!((output - 0.001).abs() < 1e-12);
        assert!(pricing.cost("other/model", 1, 1).is_none());
    }

    #[test]
    fn pricing_parses_from_toml_table() {
        let pricing: Pricing = toml::from_str(
            r#"
["openai/gpt-4o"]
input = 0.0000025
output = 0.00001
"#,
        )
        .unwrap();
        assert!(pricing.contains("openai/gpt-4o"));
    }
}
