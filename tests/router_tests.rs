use orchestra::config::RouterConfig;
use orchestra::model::{Complexity, TaskType};
use orchestra::router::{classify_models, ModelRegistry, ModelRouter, SelectionContext};
use std::sync::{Arc, RwLock};

fn tags_payload() -> Vec<serde_json::Value> {
    serde_json::json!([
        {
            "name": "llama3:8b",
            "size": 4_700_000_000u64,
            "details": { "parameter_size": "8B", "quantization_level": "Q4_0", "family": "llama" }
        },
        {
            "name": "deepseek-coder:33b",
            "size": 19_000_000_000u64,
            "details": { "parameter_size": "33B", "quantization_level": "Q4_0", "family": "deepseek" }
        },
        {
            "name": "deepseek-r1:70b",
            "size": 40_000_000_000u64,
            "details": { "parameter_size": "70B", "quantization_level": "Q4_0", "family": "deepseek2" }
        },
        {
            "name": "nomic-embed-text",
            "size": 280_000_000u64,
            "details": { "parameter_size": "137M", "quantization_level": "F16", "family": "nomic-bert" }
        }
    ])
    .as_array()
    .unwrap()
    .clone()
}

#[test]
fn classify_models_excludes_embedding_models() {
    let models = classify_models(tags_payload());
    assert!(models.iter().all(|m| !m.name.contains("embed")));
    assert_eq!(models.len(), 3);
}

#[test]
fn classify_models_flags_coder_and_reasoning_families() {
    let models = classify_models(tags_payload());
    let coder = models.iter().find(|m| m.name == "deepseek-coder:33b").unwrap();
    assert!(coder.is_coder);
    let reasoning = models.iter().find(|m| m.name == "deepseek-r1:70b").unwrap();
    assert!(reasoning.is_reasoning);
    let plain = models.iter().find(|m| m.name == "llama3:8b").unwrap();
    assert!(!plain.is_coder && !plain.is_reasoning);
}

#[test]
fn complex_coding_task_prefers_reasoning_model_end_to_end() {
    let models = classify_models(tags_payload());
    let router = ModelRouter::new(
        Arc::new(RwLock::new(ModelRegistry::new(models))),
        RouterConfig {
            max_vram_gb: 64.0,
            allow_heavy: true,
            allow_ultra: true,
            ..RouterConfig::default()
        },
    );

    let selection = router
        .select_model_for_complexity(
            Complexity::Complex,
            TaskType::Coding,
            None,
        )
        .expect("a model should be selected");

    assert_eq!(selection.model_name, "deepseek-r1:70b");
    assert!(selection.is_reasoning);
}

#[test]
fn hardware_budget_excludes_oversized_models() {
    let models = classify_models(tags_payload());
    let router = ModelRouter::new(
        Arc::new(RwLock::new(ModelRegistry::new(models))),
        RouterConfig {
            max_vram_gb: 10.0,
            allow_heavy: false,
            allow_ultra: false,
            ..RouterConfig::default()
        },
    );

    let ctx = SelectionContext { complexity: Some(Complexity::Simple) };
    let selection = router
        .select_model(TaskType::Planning, None, &ctx)
        .expect("a light model should remain after filtering");

    assert_eq!(selection.model_name, "llama3:8b");
}

#[test]
fn fallback_never_repeats_the_failed_model() {
    let models = classify_models(tags_payload());
    let router = ModelRouter::new(
        Arc::new(RwLock::new(ModelRegistry::new(models))),
        RouterConfig {
            max_vram_gb: 64.0,
            allow_heavy: true,
            allow_ultra: true,
            ..RouterConfig::default()
        },
    );

    let fallback = router
        .get_fallback_model("deepseek-r1:70b", TaskType::Coding, Some(Complexity::Complex))
        .expect("a fallback should exist");

    assert_ne!(fallback.model_name, "deepseek-r1:70b");
}
