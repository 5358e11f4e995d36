//! Runtime configuration, read once from environment variables with typed
//! defaults for every tunable named across the component design.
//!
//! No TOML/YAML parsing dependency is introduced — matching the teacher's
//! preference for minimal, hand-rolled config structs — but unlike the
//! teacher's `CloudLLMConfig` (which users construct by hand), this one
//! mirrors the original system's `EnvironmentConfig`: every field has an
//! env-var name and a default, and `Config::from_env` never fails.
//!
//! # Example
//!
//! ```rust
//! use orchestra::config::Config;
//!
//! let config = Config::from_env();
//! assert_eq!(config.pool.max_concurrent, 10);
//! ```

use std::env;
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}

/// Connection Pool (C1) tunables.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub base_url: String,
    pub max_concurrent: usize,
    pub max_keepalive: usize,
    pub request_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let max_concurrent = env_or("ORCHESTRA_POOL_SIZE", 10usize);
        Self {
            base_url: env::var("ORCHESTRA_LLM_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            max_concurrent,
            max_keepalive: (max_concurrent / 2).max(1),
            request_timeout: Duration::from_secs(env_or("ORCHESTRA_POOL_TIMEOUT_SECS", 300u64)),
        }
    }
}

/// LLM Client (C2) backoff policy, centralized per the design notes rather
/// than scattered per retry site.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs_f64(env_or("ORCHESTRA_BACKOFF_BASE_SECS", 1.0)),
            max_delay: Duration::from_secs_f64(env_or("ORCHESTRA_BACKOFF_MAX_SECS", 30.0)),
            max_attempts: env_or("ORCHESTRA_MAX_RETRIES", 3u32),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given zero-indexed retry attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

/// Model Registry & Router (C3) tunables.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub max_vram_gb: f32,
    pub allow_heavy: bool,
    pub allow_ultra: bool,
    pub prefer_reasoning_for_complex: bool,
    /// Substring allow-list identifying "reasoning-native" models. Treated
    /// as data, not code, per the open question this resolves.
    pub reasoning_substrings: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_vram_gb: env_or("ORCHESTRA_MAX_VRAM_GB", 24.0f32),
            allow_heavy: env_bool("ORCHESTRA_ALLOW_HEAVY", true),
            allow_ultra: env_bool("ORCHESTRA_ALLOW_ULTRA", false),
            prefer_reasoning_for_complex: env_bool("ORCHESTRA_PREFER_REASONING", true),
            reasoning_substrings: env::var("ORCHESTRA_REASONING_MODELS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| {
                    vec!["deepseek-r1".into(), "qwq".into(), "o1".into(), "r1".into()]
                }),
        }
    }
}

/// Reasoning-Stream Manager (C4) tunables.
#[derive(Debug, Clone)]
pub struct ReasoningStreamConfig {
    pub enabled: bool,
    pub chunk_size: usize,
    pub debounce_ms: u64,
    pub max_thinking_time_ms: u64,
    pub show_summary_only: bool,
}

impl Default for ReasoningStreamConfig {
    fn default() -> Self {
        Self {
            enabled: env_bool("ORCHESTRA_REASONING_STREAM_ENABLED", true),
            chunk_size: env_or("ORCHESTRA_CHUNK_SIZE", 100usize),
            debounce_ms: env_or("ORCHESTRA_DEBOUNCE_MS", 50u64),
            max_thinking_time_ms: env_or("ORCHESTRA_MAX_THINKING_MS", 120_000u64),
            show_summary_only: env_bool("ORCHESTRA_SHOW_SUMMARY_ONLY", false),
        }
    }
}

/// Event Store (C5) tunables.
#[derive(Debug, Clone)]
pub struct EventStoreConfig {
    pub max_sessions: usize,
    pub event_ttl: Duration,
    pub cleanup_interval: Duration,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            max_sessions: env_or("ORCHESTRA_MAX_SESSIONS", 1000usize),
            event_ttl: Duration::from_secs(env_or("ORCHESTRA_EVENT_TTL_SECS", 3600u64)),
            cleanup_interval: Duration::from_secs(env_or(
                "ORCHESTRA_CLEANUP_INTERVAL_SECS",
                300u64,
            )),
        }
    }
}

/// Orchestrator (C7) tunables.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub quality_threshold: f64,
    pub max_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            quality_threshold: env_or("ORCHESTRA_QUALITY_THRESHOLD", 0.70f64),
            max_retries: env_or("ORCHESTRA_MAX_RETRIES_ORCH", 2u32),
        }
    }
}

/// Lifecycle & Gateway (C8) tunables.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub drain_timeout: Duration,
    pub output_dir: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: env::var("ORCHESTRA_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            drain_timeout: Duration::from_secs(env_or("ORCHESTRA_DRAIN_TIMEOUT_SECS", 10u64)),
            output_dir: env::var("ORCHESTRA_OUTPUT_DIR").unwrap_or_else(|_| "output".to_string()),
        }
    }
}

/// Top-level configuration, composed of one section per component.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub pool: PoolConfig,
    pub backoff: BackoffPolicy,
    pub router: RouterConfig,
    pub reasoning_stream: ReasoningStreamConfig,
    pub event_store: EventStoreConfig,
    pub orchestrator: OrchestratorConfig,
    pub gateway: GatewayConfig,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// built-in defaults for anything unset. Never fails.
    pub fn from_env() -> Self {
        Self::default()
    }
}
