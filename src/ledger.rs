use crate::error::{Error, Result};
use crate::llm::Usage;
use crate::tokens::Pricing;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Token counts and API-reported cost for one evaluated task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepTokens {
    #[serde(rename = "steps_planning_input_token_counts")]
    pub planning_input: u64,
    #[serde(rename = "steps_planning_output_token_counts")]
    pub planning_output: u64,
    #[serde(rename = "steps_reward_input_token_counts")]
    pub reward_input: u64,
    #[serde(rename = "steps_reward_output_token_counts")]
    pub reward_output: u64,
    #[serde(rename = "steps_input_token_counts")]
    pub input: u64,
    #[serde(rename = "steps_output_token_counts")]
    pub output: u64,
    #[serde(rename = "steps_token_counts")]
    pub total: u64,
    #[serde(default)]
    pub planning_total_cost: f64,
    #[serde(default)]
    pub reward_total_cost: f64,
}

impl StepTokens {
    pub fn record_planning(&mut self, usage: &Usage) {
        self.planning_input += u64::from(usage.prompt_tokens);
        self.planning_output += u64::from(usage.completion_tokens);
        self.planning_total_cost += usage.total_cost;
        self.add_totals(usage);
    }

    pub fn record_reward(&mut self, usage: &Usage) {
        self.reward_input += u64::from(usage.prompt_tokens);
        self.reward_output += u64::from(usage.completion_tokens);
        self.reward_total_cost += usage.total_cost;
        self.add_totals(usage);
    }

    fn add_totals(&mut self, usage: &Usage) {
        self.input += u64::from(usage.prompt_tokens);
        self.output += u64::from(usage.completion_tokens);
        self.total += u64::from(usage.prompt_tokens) + u64::from(usage.completion_tokens);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub task_name: String,
    pub step_tokens: StepTokens,
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
}

/// Cumulative token and cost accounting, persisted as pretty JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenLedger {
    #[serde(skip)]
    path: PathBuf,
    pub calls: Vec<CallRecord>,
    pub total_planning_input_tokens: u64,
    pub total_planning_output_tokens: u64,
    pub total_reward_input_tokens: u64,
    pub total_reward_output_tokens: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    #[serde(default)]
    pub total_planning_input_token_cost: f64,
    #[serde(default)]
    pub total_planning_output_token_cost: f64,
    #[serde(default)]
    pub total_reward_input_token_cost: f64,
    #[serde(default)]
    pub total_reward_output_token_cost: f64,
    #[serde(default)]
    pub total_input_token_cost: f64,
    #[serde(default)]
    pub total_output_token_cost: f64,
    #[serde(default)]
    pub total_planning_cost: f64,
    #[serde(default)]
    pub total_reward_cost: f64,
    #[serde(default)]
    pub total_token_cost: f64,
}

impl TokenLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Load an existing ledger, or start an empty one if the file is missing.
    pub fn load_or_new(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no ledger yet, starting fresh");
                return Ok(Self::new(path));
            }
            Err(e) => return Err(e.into()),
        };
        let mut ledger: Self = serde_json::from_str(&content).map_err(|e| {
            Error::parse(format!("token ledger {}: {e}", path.display()))
        })?;
        ledger.path = path.to_path_buf();
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add one task's usage. Each stage's API-reported cost wins; the static
    /// price table is only consulted for a stage whose endpoint reported none
    /// and whose model is priced. Returns the cost attributed to this task.
    pub fn record(
        &mut self,
        task_name: &str,
        step: StepTokens,
        planning_model: &str,
        reward_model: &str,
        pricing: &Pricing,
    ) -> f64 {
        self.calls.push(CallRecord {
            task_name: task_name.to_string(),
            step_tokens: step,
            recorded_at: Utc::now(),
        });

        self.total_planning_input_tokens += step.planning_input;
        self.total_planning_output_tokens += step.planning_output;
        self.total_reward_input_tokens += step.reward_input;
        self.total_reward_output_tokens += step.reward_output;
        self.total_input_tokens += step.input;
        self.total_output_tokens += step.output;
        self.total_tokens += step.total;

        let planning = StageCost::resolve(
            step.planning_total_cost,
            pricing,
            planning_model,
            step.planning_input,
            step.planning_output,
        );
        let reward = StageCost::resolve(
            step.reward_total_cost,
            pricing,
            reward_model,
            step.reward_input,
            step.reward_output,
        );
        self.total_planning_input_token_cost += planning.input;
        self.total_planning_output_token_cost += planning.output;
        self.total_reward_input_token_cost += reward.input;
        self.total_reward_output_token_cost += reward.output;
        self.total_input_token_cost += planning.input + reward.input;
        self.total_output_token_cost += planning.output + reward.output;
        self.total_planning_cost += planning.total();
        self.total_reward_cost += reward.total();
        let step_cost = planning.total() + reward.total();
        self.total_token_cost += step_cost;

        info!(
            task = task_name,
            tokens = step.total,
            cost = %format!("${step_cost:.6}"),
            "recorded task usage"
        );
        step_cost
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::parse(format!("serialize ledger: {e}")))?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// Cost of one stage: either what the API reported, or a price-table estimate
/// split into input and output.
#[derive(Debug, Default)]
struct StageCost {
    reported: f64,
    input: f64,
    output: f64,
}

impl StageCost {
    fn resolve(reported: f64, pricing: &Pricing, model: &str, input: u64, output: u64) -> Self {
        if reported > 0.0 {
            return Self {
                reported,
                ..Self::default()
            };
        }
        match pricing.cost(model, saturate(input), saturate(output)) {
            Some((input, output)) => Self {
                reported: 0.0,
                input,
                output,
            },
            None => Self::default(),
        }
    }

    fn total(&self) -> f64 {
        self.reported + self.input + self.output
    }
}

fn saturate(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
