//! `StageMetrics` and `SystemBenchmark` (§3 data model), grounded on
//! `infrastructure/performance_metrics.py`'s rolling-window stats and
//! persisted to the configured output directory as JSON, matching the
//! "Persisted state" interface.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

const DEFAULT_WINDOW: usize = 100;

/// Rolling-window timing statistics for one pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageMetrics {
    pub stage: String,
    #[serde(skip)]
    window: VecDeque<f64>,
    window_size: usize,
    pub count: u64,
    pub avg_ms: f64,
    pub median_ms: f64,
    pub stddev_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl StageMetrics {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            window: VecDeque::with_capacity(DEFAULT_WINDOW),
            window_size: DEFAULT_WINDOW,
            count: 0,
            avg_ms: 0.0,
            median_ms: 0.0,
            stddev_ms: 0.0,
            min_ms: 0.0,
            max_ms: 0.0,
        }
    }

    /// Record one stage-completion duration and recompute derived stats.
    pub fn record(&mut self, duration: Duration) {
        let ms = duration.as_secs_f64() * 1000.0;
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(ms);
        self.count += 1;
        self.recompute();
    }

    fn recompute(&mut self) {
        let mut sorted: Vec<f64> = self.window.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let n = sorted.len();
        if n == 0 {
            return;
        }
        let sum: f64 = sorted.iter().sum();
        self.avg_ms = sum / n as f64;
        self.median_ms = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };
        self.min_ms = sorted[0];
        self.max_ms = sorted[n - 1];
        let variance = sorted.iter().map(|v| (v - self.avg_ms).powi(2)).sum::<f64>() / n as f64;
        self.stddev_ms = variance.sqrt();
    }

    /// Whether this sample count lands on a persistence boundary (every
    /// 10th sample).
    pub fn should_persist(&self) -> bool {
        self.count > 0 && self.count % 10 == 0
    }
}

/// Measured throughput used to scale per-stage time estimates shown to
/// clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBenchmark {
    pub tokens_per_second: f64,
    pub time_to_first_token_ms: f64,
    pub model_used: String,
    pub baseline_tokens_per_second: f64,
}

impl SystemBenchmark {
    pub fn new(
        tokens_per_second: f64,
        time_to_first_token_ms: f64,
        model_used: String,
        baseline_tokens_per_second: f64,
    ) -> Self {
        Self {
            tokens_per_second,
            time_to_first_token_ms,
            model_used,
            baseline_tokens_per_second,
        }
    }

    pub fn performance_multiplier(&self) -> f64 {
        if self.baseline_tokens_per_second <= 0.0 {
            1.0
        } else {
            self.tokens_per_second / self.baseline_tokens_per_second
        }
    }
}

/// Persists stage metrics and the current benchmark under `output_dir` as
/// `stage_metrics.json` / `benchmark.json`.
pub struct MetricsStore {
    output_dir: std::path::PathBuf,
}

impl MetricsStore {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub async fn persist_stage_metrics(
        &self,
        metrics: &[StageMetrics],
    ) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join("stage_metrics.json");
        let body = serde_json::to_vec_pretty(metrics).unwrap_or_default();
        tokio::fs::write(path, body).await
    }

    pub async fn persist_benchmark(&self, benchmark: &SystemBenchmark) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join("benchmark.json");
        let body = serde_json::to_vec_pretty(benchmark).unwrap_or_default();
        tokio::fs::write(path, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_metrics_tracks_rolling_window_stats() {
        let mut metrics = StageMetrics::new("planning");
        for ms in [100, 200, 300, 400, 500] {
            metrics.record(Duration::from_millis(ms));
        }
        assert_eq!(metrics.count, 5);
        assert_eq!(metrics.min_ms, 100.0);
        assert_eq!(metrics.max_ms, 500.0);
        assert_eq!(metrics.median_ms, 300.0);
    }

    #[test]
    fn should_persist_every_tenth_sample() {
        let mut metrics = StageMetrics::new("coding");
        for _ in 0..9 {
            metrics.record(Duration::from_millis(10));
            assert!(!metrics.should_persist());
        }
        metrics.record(Duration::from_millis(10));
        assert!(metrics.should_persist());
    }

    #[test]
    fn performance_multiplier_scales_against_baseline() {
        let benchmark = SystemBenchmark::new(50.0, 120.0, "m1".into(), 25.0);
        assert_eq!(benchmark.performance_multiplier(), 2.0);
    }
}
