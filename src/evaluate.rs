//! One evaluation step: plan the next action, then score the trajectory.

use crate::error::Error;
use crate::ledger::StepTokens;
use crate::llm::{AgentAction, Completion, Message, ModelRouter, Reward, TaskKind, Usage};
use crate::prompts;
use crate::tokens::{self, Pricing};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub action: AgentAction,
    /// `None` if the reward model failed; the step itself still counts.
    pub reward: Option<Reward>,
    pub tokens: StepTokens,
}

/// A step that could not produce an action. `tokens` holds whatever usage was
/// billed before the failure.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct StepError {
    pub tokens: StepTokens,
    pub source: Error,
}

/// Run planning then global reward for a single step.
///
/// A planning failure aborts the step. A reward failure is logged and leaves
/// `reward` empty so the evaluation can continue. Usage is recorded as soon as
/// a reply arrives, before its JSON is parsed. Endpoints that report no usage
/// get an offline estimate for models listed in `pricing`.
pub async fn run_step(
    router: &ModelRouter,
    pricing: &Pricing,
    task: &str,
    observation: &str,
    history: &[String],
) -> Result<StepOutcome, StepError> {
    let mut tokens = StepTokens::default();

    let planner = router.client_for(TaskKind::Planning);
    let messages = prompts::planning_messages(task, observation);
    let completion = planner
        .request(&messages)
        .await
        .map_err(|source| StepError { tokens, source })?;
    tokens.record_planning(&reported_or_estimated(&completion, &messages, planner.model(), pricing));
    let action: AgentAction = planner
        .parse_json(&completion)
        .map_err(|source| StepError { tokens, source })?;
    info!(action = %action.action, input = %action.action_input, "planned action");

    let trajectory = render_trajectory(history, &action);
    let rewarder = router.client_for(TaskKind::GlobalReward);
    let messages = prompts::reward_messages(task, &trajectory);
    let reward = match rewarder.request(&messages).await {
        Ok(completion) => {
            tokens.record_reward(&reported_or_estimated(
                &completion,
                &messages,
                rewarder.model(),
                pricing,
            ));
            match rewarder.parse_json::<Reward>(&completion) {
                Ok(reward) => {
                    info!(score = %reward.score, status = ?reward.status, "reward scored");
                    Some(reward)
                }
                Err(e) => {
                    warn!(error = %e, "reward reply was not valid JSON");
                    None
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "reward request failed");
            None
        }
    };

    Ok(StepOutcome {
        action,
        reward,
        tokens,
    })
}

fn reported_or_estimated(
    completion: &Completion,
    messages: &[Message],
    model: &str,
    pricing: &Pricing,
) -> Usage {
    if completion.usage.total_tokens > 0 || !pricing.contains(model) {
        return completion.usage;
    }
    let prompt_tokens = tokens::count_message_tokens(messages, model, pricing);
    let completion_tokens = tokens::estimate_tokens(&completion.content);
    debug!(model, prompt_tokens, completion_tokens, "no usage reported, using estimate");
    Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
        total_cost: completion.usage.total_cost,
    }
}

fn render_trajectory(history: &[String], next: &AgentAction) -> String {
    let mut lines: Vec<String> = history
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{}. {h}", i + 1))
        .collect();
    lines.push(format!(
        "{}. {} {} ({})",
        history.len() + 1,
        next.action,
        next.action_input,
        next.description
    ));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::ModelPrice;

    fn completion(content: &str, usage: Usage) -> Completion {
        Completion {
            content: content.into(),
            finish_reason: Some("stop".into()),
            usage,
            strategy: None,
        }
    }

    #[test]
    fn reported_usage_wins() {
        let mut pricing = Pricing::default();
        pricing.insert("a/b", ModelPrice { input: 1.0, output: 1.0 });
        let reported = Usage {
            prompt_tokens: 5,
            completion_tokens: 1,
            total_tokens: 6,
            total_cost: 0.0,
        };
        let usage = reported_or_estimated(
            &completion("abcd", reported),
            &[Message::user("12345678")],
            "a/b",
            &pricing,
        );
        assert_eq!(usage, reported);
    }

    #[test]
    fn missing_usage_estimated_for_priced_models() {
        let mut pricing = Pricing::default();
        pricing.insert("a/b", ModelPrice { input: 1.0, output: 1.0 });
        let usage = reported_or_estimated(
            &completion("abcd", Usage::default()),
            &[Message::user("12345678")],
            "a/b",
            &pricing,
        );
        assert_eq!(usage.prompt_tokens, 2);
        assert_eq!(usage.completion_tokens, 1);
        assert_eq!(usage.total_tokens, 3);

        let unpriced = reported_or_estimated(
            &completion("abcd", Usage::default()),
            &[Message::user("12345678")],
            "x/y",
            &pricing,
        );
        assert_eq!(unpriced.total_tokens, 0);
    }

    #[test]
    fn trajectory_numbers_history_and_appends_next_action() {
        let next = AgentAction {
            thought: "t".into(),
            action: "click".into(),
            action_input: String::new(),
            element_id: None,
            description: "search button".into(),
        };
        let rendered = render_trajectory(&["goto https://example.com".into()], &next);
        assert_eq!(
            rendered,
            "1. goto https://example.com\n2. click  (search button)"
        );
    }
}
