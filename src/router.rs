//! Model Registry & Router (C3).
//!
//! The registry is an immutable snapshot, swapped wholesale on refresh so
//! concurrent selections never observe a half-updated set. The router
//! itself is a pure function of that snapshot plus the request — no
//! singleton, no class-name dispatch, per the design notes.

use crate::model::{rank_ascending, rank_descending, Complexity, ModelInfo, ModelSelection, TaskType, Tier};
use crate::pool::ConnectionPool;
use crate::config::RouterConfig;
use std::sync::Arc;
use std::sync::RwLock;

/// Immutable snapshot of locally available models.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<ModelInfo>,
}

impl ModelRegistry {
    pub fn new(models: Vec<ModelInfo>) -> Self {
        Self { models }
    }

    pub fn models(&self) -> &[ModelInfo] {
        &self.models
    }

    pub fn find(&self, name: &str) -> Option<&ModelInfo> {
        self.models.iter().find(|m| m.name == name)
    }
}

/// Classifies a raw model tag list from the local model server into
/// [`ModelInfo`] records. Embedding-only models are excluded, matching the
/// registry's refresh contract.
pub fn classify_models(raw: Vec<serde_json::Value>) -> Vec<ModelInfo> {
    raw.into_iter()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?.to_string();
            if name.to_lowercase().contains("embed") {
                return None;
            }
            let size_bytes = entry.get("size").and_then(|v| v.as_u64()).unwrap_or(0);
            let parameter_size = entry
                .get("details")
                .and_then(|d| d.get("parameter_size"))
                .and_then(|v| v.as_str())
                .unwrap_or("0B")
                .to_string();
            let quantization = entry
                .get("details")
                .and_then(|d| d.get("quantization_level"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            let family = entry
                .get("details")
                .and_then(|d| d.get("family"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();

            let lower = name.to_lowercase();
            let is_coder = ["code", "coder", "codellama", "starcoder", "deepseek-coder"]
                .iter()
                .any(|s| lower.contains(s));
            let is_reasoning = ["r1", "reasoning", "qwq", "o1", "think"]
                .iter()
                .any(|s| lower.contains(s));

            let info = ModelInfo {
                name,
                size_bytes,
                parameter_size: parameter_size.clone(),
                quantization,
                family,
                is_coder,
                is_reasoning,
                estimated_quality: estimate_quality(&parameter_size, is_coder),
                tier: estimate_tier(&parameter_size),
                estimated_vram_gb: estimate_vram(size_bytes),
            };
            Some(info)
        })
        .collect()
}

fn estimate_quality(parameter_size: &str, is_coder: bool) -> f32 {
    let params = ModelInfo {
        name: String::new(),
        size_bytes: 0,
        parameter_size: parameter_size.to_string(),
        quantization: String::new(),
        family: String::new(),
        is_coder,
        is_reasoning: false,
        estimated_quality: 0.0,
        tier: Tier::Standard,
        estimated_vram_gb: 0.0,
    }
    .parameter_count();

    // Monotone non-decreasing within a family as parameter count rises.
    let base = match params {
        0..=1_500_000_000 => 0.35,
        1_500_000_001..=4_000_000_000 => 0.50,
        4_000_000_001..=9_000_000_000 => 0.65,
        9_000_000_001..=20_000_000_000 => 0.78,
        20_000_000_001..=40_000_000_000 => 0.88,
        _ => 0.95,
    };
    if is_coder {
        (base + 0.02).min(1.0)
    } else {
        base
    }
}

fn estimate_tier(parameter_size: &str) -> Tier {
    let info = ModelInfo {
        name: String::new(),
        size_bytes: 0,
        parameter_size: parameter_size.to_string(),
        quantization: String::new(),
        family: String::new(),
        is_coder: false,
        is_reasoning: false,
        estimated_quality: 0.0,
        tier: Tier::Standard,
        estimated_vram_gb: 0.0,
    };
    match info.parameter_count() {
        0..=3_000_000_000 => Tier::Light,
        3_000_000_001..=13_000_000_000 => Tier::Standard,
        13_000_000_001..=40_000_000_000 => Tier::Heavy,
        _ => Tier::Ultra,
    }
}

fn estimate_vram(size_bytes: u64) -> f32 {
    // Rough rule of thumb: resident weights plus ~20% runtime overhead.
    (size_bytes as f32 / 1_073_741_824.0) * 1.2
}

/// Selection context carried alongside the task type.
#[derive(Debug, Clone, Default)]
pub struct SelectionContext {
    pub complexity: Option<Complexity>,
}

/// Pure selection logic over a registry snapshot plus router config.
pub struct ModelRouter {
    registry: Arc<RwLock<ModelRegistry>>,
    config: RouterConfig,
}

impl ModelRouter {
    pub fn new(registry: Arc<RwLock<ModelRegistry>>, config: RouterConfig) -> Self {
        Self { registry, config }
    }

    /// A clone of the current registry snapshot, for read-only callers
    /// like the gateway's `/models` passthrough.
    pub fn registry_snapshot(&self) -> ModelRegistry {
        self.registry.read().unwrap().clone()
    }

    /// Re-queries the local model server and atomically swaps the
    /// registry snapshot.
    pub async fn refresh(&self, pool: &ConnectionPool) -> Result<(), crate::error::PoolError> {
        let value = pool.post_json("/api/tags", &serde_json::json!({})).await?;
        let raw = value
            .get("models")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let models = classify_models(raw);
        *self.registry.write().unwrap() = ModelRegistry::new(models);
        Ok(())
    }

    /// Selects a model for a task, delegating to complexity-aware
    /// selection when a complexity hint is present; otherwise applies each
    /// stage's inherent bias.
    pub fn select_model(
        &self,
        task_type: TaskType,
        preferred: Option<&str>,
        context: &SelectionContext,
    ) -> Option<ModelSelection> {
        if let Some(complexity) = context.complexity {
            return self.select_model_for_complexity(complexity, task_type, preferred);
        }
        let complexity = match task_type {
            TaskType::Intent | TaskType::Planning => Complexity::Simple,
            TaskType::Coding => Complexity::Medium,
            TaskType::Testing | TaskType::Reflection | TaskType::Debugging => Complexity::Simple,
        };
        self.select_model_for_complexity(complexity, task_type, preferred)
    }

    pub fn select_model_for_complexity(
        &self,
        complexity: Complexity,
        task_type: TaskType,
        preferred: Option<&str>,
    ) -> Option<ModelSelection> {
        let registry = self.registry.read().unwrap();

        if let Some(name) = preferred {
            if let Some(model) = registry.find(name) {
                return Some(ModelSelection {
                    model_name: model.name.clone(),
                    confidence: 1.0,
                    reason: "caller-preferred model".into(),
                    is_reasoning: model.is_reasoning,
                    metadata: None,
                });
            }
        }

        let filtered = self.filter_by_hardware(&registry);

        if complexity == Complexity::Complex
            && self.config.prefer_reasoning_for_complex
            && !task_type.avoids_reasoning()
        {
            if let Some(selection) = self.try_select_reasoning(&filtered) {
                return Some(selection);
            }
        }

        self.select_best_from_filtered(&filtered, complexity, task_type)
    }

    fn filter_by_hardware<'a>(&self, registry: &'a ModelRegistry) -> Vec<&'a ModelInfo> {
        registry
            .models()
            .iter()
            .filter(|m| {
                if m.estimated_vram_gb > self.config.max_vram_gb {
                    return false;
                }
                if m.tier == Tier::Heavy && !self.config.allow_heavy {
                    return false;
                }
                if m.tier == Tier::Ultra && !self.config.allow_ultra {
                    return false;
                }
                true
            })
            .collect()
    }

    fn try_select_reasoning(&self, candidates: &[&ModelInfo]) -> Option<ModelSelection> {
        let mut reasoning: Vec<&ModelInfo> = candidates
            .iter()
            .copied()
            .filter(|m| {
                m.is_reasoning
                    || self
                        .config
                        .reasoning_substrings
                        .iter()
                        .any(|s| m.name.to_lowercase().contains(&s.to_lowercase()))
            })
            .collect();
        reasoning.sort_by(|a, b| rank_descending(a, b));
        reasoning.first().map(|m| ModelSelection {
            model_name: m.name.clone(),
            confidence: m.estimated_quality,
            reason: "reasoning-native model preferred for complex task".into(),
            is_reasoning: true,
            metadata: None,
        })
    }

    fn select_best_from_filtered(
        &self,
        candidates: &[&ModelInfo],
        complexity: Complexity,
        task_type: TaskType,
    ) -> Option<ModelSelection> {
        let min_quality = complexity.min_quality();
        let mut eligible: Vec<&ModelInfo> = candidates
            .iter()
            .copied()
            .filter(|m| m.estimated_quality >= min_quality)
            .collect();
        if eligible.is_empty() {
            // Nothing clears the bar; fall back to the best available
            // rather than returning nothing, matching the original's
            // "always answer with something" behavior.
            eligible = candidates.to_vec();
        }

        if task_type.is_coder_flavored() {
            let coders: Vec<&ModelInfo> = eligible.iter().copied().filter(|m| m.is_coder).collect();
            if !coders.is_empty() {
                eligible = coders;
            }
        }

        match complexity {
            Complexity::Simple => eligible.sort_by(|a, b| rank_ascending(a, b)),
            Complexity::Medium | Complexity::Complex => {
                eligible.sort_by(|a, b| rank_descending(a, b))
            }
        }

        eligible.first().map(|m| ModelSelection {
            model_name: m.name.clone(),
            confidence: m.estimated_quality,
            reason: format!("{:?} complexity, {:?} stage selection", complexity, task_type),
            is_reasoning: m.is_reasoning,
            metadata: None,
        })
    }

    /// Returns a different model of equal or lower tier than the failed
    /// one, never the failed model itself. `None` if nothing remains.
    pub fn get_fallback_model(
        &self,
        failed_model: &str,
        task_type: TaskType,
        complexity: Option<Complexity>,
    ) -> Option<ModelSelection> {
        let registry = self.registry.read().unwrap();
        let failed_tier = registry.find(failed_model).map(|m| m.tier);
        let filtered = self.filter_by_hardware(&registry);
        let mut candidates: Vec<&ModelInfo> = filtered
            .iter()
            .copied()
            .filter(|m| m.name != failed_model)
            .filter(|m| match failed_tier {
                Some(t) => tier_rank(m.tier) <= tier_rank(t),
                None => true,
            })
            .collect();

        let complexity = complexity.unwrap_or(Complexity::Medium);
        match complexity {
            Complexity::Simple => candidates.sort_by(|a, b| rank_ascending(a, b)),
            Complexity::Medium | Complexity::Complex => {
                candidates.sort_by(|a, b| rank_descending(a, b))
            }
        }

        let _ = task_type;
        candidates.first().map(|m| ModelSelection {
            model_name: m.name.clone(),
            confidence: m.estimated_quality,
            reason: format!("fallback for unavailable model {failed_model}"),
            is_reasoning: m.is_reasoning,
            metadata: None,
        })
    }
}

fn tier_rank(tier: Tier) -> u8 {
    match tier {
        Tier::Light => 0,
        Tier::Standard => 1,
        Tier::Heavy => 2,
        Tier::Ultra => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(name: &str, params: &str, quality: f32, tier: Tier, coder: bool, reasoning: bool) -> ModelInfo {
        ModelInfo {
            name: name.into(),
            size_bytes: 1,
            parameter_size: params.into(),
            quantization: "Q4".into(),
            family: "test".into(),
            is_coder: coder,
            is_reasoning: reasoning,
            estimated_quality: quality,
            tier,
            estimated_vram_gb: 4.0,
        }
    }

    fn router_with(models: Vec<ModelInfo>, config: RouterConfig) -> ModelRouter {
        ModelRouter::new(Arc::new(RwLock::new(ModelRegistry::new(models))), config)
    }

    #[test]
    fn never_exceeds_hardware_budget_unless_disabled() {
        let models = vec![
            model("small", "3B", 0.4, Tier::Light, false, false),
            model("huge", "70B", 0.95, Tier::Ultra, false, false),
        ];
        let mut config = RouterConfig::default();
        config.max_vram_gb = 8.0;
        config.allow_ultra = false;
        let models_with_vram = {
            let mut m = models.clone();
            m[1].estimated_vram_gb = 40.0;
            m
        };
        let router = router_with(models_with_vram, config);
        let selection = router
            .select_model_for_complexity(Complexity::Complex, TaskType::Coding, None)
            .unwrap();
        assert_eq!(selection.model_name, "small");
    }

    #[test]
    fn fallback_never_returns_failed_model() {
        let models = vec![
            model("m1", "7B", 0.6, Tier::Standard, true, false),
            model("m2", "7B", 0.6, Tier::Standard, true, false),
        ];
        let router = router_with(models, RouterConfig::default());
        let fallback = router
            .get_fallback_model("m1", TaskType::Coding, Some(Complexity::Medium))
            .unwrap();
        assert_ne!(fallback.model_name, "m1");
    }

    #[test]
    fn fallback_returns_none_when_nothing_remains() {
        let models = vec![model("only", "7B", 0.6, Tier::Standard, true, false)];
        let router = router_with(models, RouterConfig::default());
        assert!(router
            .get_fallback_model("only", TaskType::Coding, None)
            .is_none());
    }

    #[test]
    fn simple_tasks_favor_smaller_model_on_tie() {
        let models = vec![
            model("small", "3B", 0.5, Tier::Light, false, false),
            model("big", "13B", 0.5, Tier::Standard, false, false),
        ];
        let router = router_with(models, RouterConfig::default());
        let selection = router
            .select_model_for_complexity(Complexity::Simple, TaskType::Testing, None)
            .unwrap();
        assert_eq!(selection.model_name, "small");
    }

    #[test]
    fn complex_tasks_prefer_reasoning_model() {
        let models = vec![
            model("coder-7b", "7B", 0.9, Tier::Standard, true, false),
            model("deepseek-r1-7b", "7B", 0.7, Tier::Standard, false, true),
        ];
        let router = router_with(models, RouterConfig::default());
        let selection = router
            .select_model_for_complexity(Complexity::Complex, TaskType::Coding, None)
            .unwrap();
        assert!(selection.is_reasoning);
    }
}
