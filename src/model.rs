//! Data model for the Model Registry & Router: [`ModelInfo`], its quality
//! [`Tier`], task [`Complexity`], [`TaskType`], and the router's output
//! [`ModelSelection`].

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Quality tier bucket a model falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Light,
    Standard,
    Heavy,
    Ultra,
}

/// Coarse complexity classification of an incoming task, used to pick a
/// minimum quality threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    /// Minimum `estimated_quality` a model must clear to be selected for
    /// this complexity, per the router's selection table.
    pub fn min_quality(self) -> f32 {
        match self {
            Complexity::Simple => 0.30,
            Complexity::Medium => 0.55,
            Complexity::Complex => 0.70,
        }
    }
}

/// Pipeline stage a model is being selected for. Each stage has its own
/// bias (lightest-above-threshold for intent/planning, coder-flavored for
/// coding, reasoning-avoidant for testing/reflection/debugging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Intent,
    Planning,
    Coding,
    Testing,
    Reflection,
    Debugging,
}

impl TaskType {
    /// Whether this stage favors coder-flavored models when choosing among
    /// otherwise-equal candidates.
    pub fn is_coder_flavored(self) -> bool {
        matches!(self, TaskType::Coding | TaskType::Debugging)
    }

    /// Whether reasoning models should be avoided for this stage even if
    /// the complexity would otherwise prefer one — their latency dwarfs the
    /// gain for quick validation-style stages.
    pub fn avoids_reasoning(self) -> bool {
        matches!(
            self,
            TaskType::Testing | TaskType::Reflection | TaskType::Debugging
        )
    }
}

/// A snapshot of one locally available model, as classified by the
/// registry. The whole registry is a value-typed set of these, swapped
/// atomically on refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size_bytes: u64,
    pub parameter_size: String,
    pub quantization: String,
    pub family: String,
    pub is_coder: bool,
    pub is_reasoning: bool,
    pub estimated_quality: f32,
    pub tier: Tier,
    pub estimated_vram_gb: f32,
}

impl ModelInfo {
    /// Parses a parameter-size label like `"7B"` or `"70b"` into a raw
    /// count, used to break ties between models of equal quality. Returns
    /// 0 for labels this crate doesn't recognize rather than failing the
    /// whole selection.
    pub fn parameter_count(&self) -> u64 {
        parse_parameter_size(&self.parameter_size)
    }
}

fn parse_parameter_size(label: &str) -> u64 {
    let trimmed = label.trim();
    let (digits, multiplier) = if let Some(stripped) = trimmed
        .strip_suffix('B')
        .or_else(|| trimmed.strip_suffix('b'))
    {
        (stripped, 1_000_000_000u64)
    } else if let Some(stripped) = trimmed
        .strip_suffix('M')
        .or_else(|| trimmed.strip_suffix('m'))
    {
        (stripped, 1_000_000u64)
    } else {
        (trimmed, 1u64)
    };
    digits
        .parse::<f64>()
        .map(|n| (n * multiplier as f64) as u64)
        .unwrap_or(0)
}

/// Ordering used when the router needs the "biggest wins" tie-break
/// (complex/medium tasks): quality descending, then parameter count
/// descending, then name ascending for full determinism.
pub fn rank_descending(a: &ModelInfo, b: &ModelInfo) -> Ordering {
    b.estimated_quality
        .partial_cmp(&a.estimated_quality)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.parameter_count().cmp(&a.parameter_count()))
        .then_with(|| a.name.cmp(&b.name))
}

/// Ordering used for the "smallest wins" tie-break (simple tasks, favoring
/// latency): quality ascending above the threshold, then parameter count
/// ascending, then name ascending.
pub fn rank_ascending(a: &ModelInfo, b: &ModelInfo) -> Ordering {
    a.estimated_quality
        .partial_cmp(&b.estimated_quality)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.parameter_count().cmp(&b.parameter_count()))
        .then_with(|| a.name.cmp(&b.name))
}

/// The router's immutable output: one chosen model plus the reasoning
/// behind the choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSelection {
    pub model_name: String,
    pub confidence: f32,
    pub reason: String,
    pub is_reasoning: bool,
    pub metadata: Option<serde_json::Value>,
}
