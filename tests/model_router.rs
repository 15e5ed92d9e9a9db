use std::collections::HashMap;
use webeval_llm::config::{
    CUSTOM_LLM_API_KEY, CUSTOM_LLM_BASE_URL, Config, Credentials, OPENROUTER_API_KEY, Overrides,
    Settings,
};
use webeval_llm::llm::{JsonStrategy, LlmClient, ModelRouter, OPENROUTER_BASE_URL, Provider, TaskKind};

fn credentials(vars: &[(&str, &str)]) -> Credentials {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Credentials::from_lookup(|name| map.get(name).cloned())
}

#[test]
fn default_client_returned_when_no_override() {
    let client = LlmClient::new(
        Provider::OpenRouter,
        Some("key".into()),
        "openai/default-model".into(),
        Some("http://localhost:1".into()),
    )
    .unwrap();
    let router = ModelRouter::new(client);
    assert_eq!(
        router.client_for(TaskKind::Planning).model(),
        "openai/default-model"
    );
    assert_eq!(
        router.client_for(TaskKind::GlobalReward).model(),
        "openai/default-model"
    );
}

#[test]
fn override_returns_custom_client() {
    let default = LlmClient::new(
        Provider::OpenRouter,
        Some("key".into()),
        "openai/default-model".into(),
        Some("http://localhost:1".into()),
    )
    .unwrap();
    let custom = LlmClient::new(
        Provider::Custom,
        None,
        "custom-model".into(),
        Some("http://localhost:1/v1".into()),
    )
    .unwrap();
    let router = ModelRouter::new(default).with_client(TaskKind::Planning, custom);

    assert_eq!(router.client_for(TaskKind::Planning).model(), "custom-model");
    assert_eq!(
        router.client_for(TaskKind::SemanticMatch).model(),
        "openai/default-model"
    );
}

#[test]
fn settings_route_every_stage_through_openrouter_by_default() {
    let settings = Settings::resolve(
        &Config::default(),
        &credentials(&[(OPENROUTER_API_KEY, "sk-or-test")]),
        &Overrides::default(),
    )
    .unwrap();
    let router = ModelRouter::from_settings(&settings).unwrap();

    let planning = router.client_for(TaskKind::Planning);
    assert_eq!(planning.provider(), Provider::OpenRouter);
    assert_eq!(planning.base_url(), OPENROUTER_BASE_URL);
    assert_eq!(planning.model(), "openai/gpt-4o");
    assert!(planning.json_mode());
    assert_eq!(planning.json_strategy(), JsonStrategy::JsonSchema);

    let reward = router.client_for(TaskKind::GlobalReward);
    assert_eq!(reward.model(), "openai/gpt-4o-mini");
    assert!(reward.json_mode());

    let semantic = router.client_for(TaskKind::SemanticMatch);
    assert_eq!(semantic.model(), "openai/gpt-3.5-turbo");
    assert!(!semantic.json_mode());
}

#[test]
fn custom_model_moves_only_planning_to_custom_endpoint() {
    let settings = Settings::resolve(
        &Config::default(),
        &credentials(&[
            (OPENROUTER_API_KEY, "sk-or-test"),
            (CUSTOM_LLM_BASE_URL, "https://inference.example.com/v1"),
            (CUSTOM_LLM_API_KEY, "local-secret"),
        ]),
        &Overrides {
            custom_model: Some("qwen2.5-72b-instruct".into()),
            ..Default::default()
        },
    )
    .unwrap();
    let router = ModelRouter::from_settings(&settings).unwrap();

    let planning = router.client_for(TaskKind::Planning);
    assert_eq!(planning.provider(), Provider::Custom);
    assert_eq!(planning.base_url(), "https://inference.example.com/v1");
    assert_eq!(planning.model(), "qwen2.5-72b-instruct");

    let reward = router.client_for(TaskKind::GlobalReward);
    assert_eq!(reward.provider(), Provider::OpenRouter);
    assert_eq!(reward.base_url(), OPENROUTER_BASE_URL);
}
