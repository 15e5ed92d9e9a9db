use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use webeval_llm::config::{Config, Credentials, Overrides, Settings, mask_key};
use webeval_llm::evaluate;
use webeval_llm::ledger::{StepTokens, TokenLedger};
use webeval_llm::llm::{self, AgentAction, LlmClient, ModelRouter, Reward, TaskKind};
use webeval_llm::prompts;

#[derive(Parser)]
#[command(
    name = "webeval",
    about = "Model access for web-agent evaluation via OpenRouter or a custom OpenAI-compatible endpoint"
)]
struct Cli {
    /// Path to config file (optional; defaults apply when missing)
    #[arg(short, long, global = true, default_value = "webeval.toml")]
    config: PathBuf,

    /// Planning model, provider-qualified (e.g. openai/gpt-4o)
    #[arg(long = "planning_text_model", global = true)]
    planning_text_model: Option<String>,

    /// Global reward model, provider-qualified (e.g. openai/gpt-4o-mini)
    #[arg(long = "global_reward_text_model", global = true)]
    global_reward_text_model: Option<String>,

    /// Serve the planning model from CUSTOM_LLM_BASE_URL under this model name
    #[arg(long = "custom_model", global = true)]
    custom_model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Validate credentials and model selection, then print the resolved routing
    Check {
        /// Also ask OpenRouter about the API key (label, spend, limit)
        #[arg(long)]
        online: bool,
    },

    /// Ask the planning model for the next action
    Plan {
        #[arg(long)]
        task: String,
        /// Current page observation (accessibility tree)
        #[arg(long)]
        observation: String,
    },

    /// Ask the global reward model to score a trajectory
    Reward {
        #[arg(long)]
        task: String,
        #[arg(long)]
        trajectory: String,
    },

    /// Plan + reward for one step, recording token usage in the ledger
    Step {
        #[arg(long)]
        task: String,
        #[arg(long)]
        observation: String,
        /// Previous actions, oldest first (repeatable)
        #[arg(long = "history")]
        history: Vec<String>,
    },

    /// Send a semantic-matching prompt to the default model
    Match {
        #[arg(long)]
        prompt: String,
    },

    /// Print cumulative token and cost totals from the ledger
    Ledger,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webeval_llm=info,webeval=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;
    let overrides = Overrides {
        planning_text_model: cli.planning_text_model,
        global_reward_text_model: cli.global_reward_text_model,
        custom_model: cli.custom_model,
    };

    match cli.command {
        Command::Ledger => {
            let ledger = TokenLedger::load_or_new(&config.ledger.path)?;
            print_ledger(&ledger);
        }
        Command::Check { online } => {
            let (settings, router) = resolve(&config, &overrides)?;
            check(&settings, &router, online).await?;
        }
        Command::Plan { task, observation } => {
            let (_, router) = resolve(&config, &overrides)?;
            let (action, completion) = router
                .client_for(TaskKind::Planning)
                .complete_json::<AgentAction>(&prompts::planning_messages(&task, &observation))
                .await?;
            let out = json!({ "action": action, "usage": completion.usage });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Reward { task, trajectory } => {
            let (_, router) = resolve(&config, &overrides)?;
            let (reward, completion) = router
                .client_for(TaskKind::GlobalReward)
                .complete_json::<Reward>(&prompts::reward_messages(&task, &trajectory))
                .await?;
            let out = json!({ "reward": reward, "usage": completion.usage });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Step {
            task,
            observation,
            history,
        } => {
            let (settings, router) = resolve(&config, &overrides)?;
            let mut ledger = TokenLedger::load_or_new(&settings.ledger_path)?;
            let result =
                evaluate::run_step(&router, &settings.pricing, &task, &observation, &history).await;
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(failure) => {
                    // The step still shows up, with whatever planning usage was billed.
                    record(&mut ledger, &task, failure.tokens, &settings)?;
                    return Err(failure.into());
                }
            };
            let cost = record(&mut ledger, &task, outcome.tokens, &settings)?;
            let out = json!({ "outcome": outcome, "step_cost_usd": cost });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Match { prompt } => {
            let (_, router) = resolve(&config, &overrides)?;
            let content =
                llm::semantic_match_request(&router, &prompts::semantic_match_messages(&prompt))
                    .await?;
            println!("{content}");
        }
    }
    Ok(())
}

/// Validate credentials and model selection before any request is sent.
fn resolve(config: &Config, overrides: &Overrides) -> Result<(Settings, ModelRouter)> {
    let settings = Settings::resolve(config, &Credentials::from_env(), overrides)?;
    let router = ModelRouter::from_settings(&settings)?;
    Ok((settings, router))
}

async fn check(settings: &Settings, router: &ModelRouter, online: bool) -> Result<()> {
    println!("OPENROUTER_API_KEY: {}", mask_key(&settings.openrouter_api_key));
    for (label, kind) in [
        ("planning", TaskKind::Planning),
        ("global reward", TaskKind::GlobalReward),
        ("semantic match", TaskKind::SemanticMatch),
    ] {
        describe(label, router.client_for(kind));
    }
    if online {
        let status = router
            .client_for(TaskKind::GlobalReward)
            .key_status()
            .await
            .context("OpenRouter rejected the key check")?;
        println!(
            "key: {} (used ${:.4}{})",
            status.label.as_deref().unwrap_or("unlabelled"),
            status.usage,
            status
                .limit
                .map(|l| format!(" of ${l:.2}"))
                .unwrap_or_default()
        );
    }
    println!("configuration OK");
    Ok(())
}

fn record(
    ledger: &mut TokenLedger,
    task: &str,
    step: StepTokens,
    settings: &Settings,
) -> Result<f64> {
    let cost = ledger.record(
        task,
        step,
        &settings.planning_text_model,
        &settings.global_reward_text_model,
        &settings.pricing,
    );
    ledger
        .save()
        .with_context(|| format!("writing ledger {}", ledger.path().display()))?;
    Ok(cost)
}

fn describe(label: &str, client: &LlmClient) {
    println!(
        "{label}: {} via {:?} ({}){}",
        client.model(),
        client.provider(),
        client.base_url(),
        if client.json_mode() { ", JSON mode" } else { "" }
    );
}

fn print_ledger(ledger: &TokenLedger) {
    println!("ledger: {}", ledger.path().display());
    println!("tasks recorded: {}", ledger.calls.len());
    println!(
        "planning tokens: {} in / {} out",
        ledger.total_planning_input_tokens, ledger.total_planning_output_tokens
    );
    println!(
        "reward tokens:   {} in / {} out",
        ledger.total_reward_input_tokens, ledger.total_reward_output_tokens
    );
    println!("total tokens:    {}", ledger.total_tokens);
    println!(
        "cost: ${:.4} (planning ${:.4}, reward ${:.4})",
        ledger.total_token_cost, ledger.total_planning_cost, ledger.total_reward_cost
    );
}
