//! Orchestrator (C7): drives a directed sequence of agent stages for one
//! session, persists each yielded event into the Event Store, and runs the
//! reflection-stage retry/quality loop.
//!
//! Generalized from the teacher's `Orchestration` (which drives N
//! conversational agents through collaboration modes) into a fixed
//! staged pipeline: intent -> planning -> test synthesis -> code
//! generation -> validation -> debugging -> reflection, matching this
//! system's purpose statement.

use crate::agent::Agent;
use crate::event_store::{EventStore, EventType};
use crate::model::{Complexity, TaskType};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Composite validation outcome feeding the quality score.
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub tests_passed: bool,
    pub types_passed: bool,
    pub security_passed: bool,
    pub static_analysis_issue_count: u32,
}

impl ValidationOutcome {
    /// Weighted composite score: tests 0.5, types 0.25, security 0.25,
    /// minus a bounded penalty for the number of static-analysis issues.
    pub fn quality_score(&self) -> f64 {
        let mut score = 0.0;
        if self.tests_passed {
            score += 0.5;
        }
        if self.types_passed {
            score += 0.25;
        }
        if self.security_passed {
            score += 0.25;
        }
        let penalty = (self.static_analysis_issue_count as f64 * 0.02).min(0.3);
        (score - penalty).max(0.0)
    }
}

/// Final outcome of one orchestrator run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub session_id: String,
    pub artifact: String,
    pub quality_score: f64,
    pub iterations: u32,
}

/// Drives the fixed pipeline for one session, wiring each stage's events
/// into the Event Store and honoring cancellation between stages and
/// between chunks within a stage.
pub struct Orchestrator {
    event_store: EventStore,
    quality_threshold: f64,
    max_retries: u32,
    cancelled: CancellationToken,
}

impl Orchestrator {
    pub fn new(event_store: EventStore, quality_threshold: f64, max_retries: u32) -> Self {
        Self {
            event_store,
            quality_threshold,
            max_retries,
            cancelled: CancellationToken::new(),
        }
    }

    /// Closing the SSE response calls this; checked between stages and
    /// surfaced to each agent's own `interrupt()`.
    pub fn cancel(&self) {
        self.cancelled.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }

    /// Run the full pipeline: intent -> planning -> testing -> coding ->
    /// validate (caller-supplied) -> debugging -> reflection, retrying
    /// from the coding stage while quality is below threshold and retries
    /// remain.
    pub async fn run<F>(
        &self,
        session_id: &str,
        task: &str,
        planner: &Agent,
        tester: &Agent,
        coder: &Agent,
        debugger: &Agent,
        reflector: &Agent,
        validate: F,
    ) -> RunResult
    where
        F: Fn(&str) -> ValidationOutcome,
    {
        let mut artifacts: Vec<(TaskType, String)> = Vec::new();
        let mut iterations = 0u32;
        let mut quality = 0.0f64;
        let mut final_artifact = String::new();

        if self.is_cancelled() {
            self.emit_done(session_id, "", 0.0, 0).await;
            return RunResult {
                session_id: session_id.to_string(),
                artifact: String::new(),
                quality_score: 0.0,
                iterations: 0,
            };
        }

        let plan = self
            .run_stage(session_id, planner, task, &artifacts, EventType::PlanChunk)
            .await;
        artifacts.push((TaskType::Planning, plan));

        let tests = self
            .run_stage(session_id, tester, task, &artifacts, EventType::TestChunk)
            .await;
        artifacts.push((TaskType::Testing, tests));

        loop {
            if self.is_cancelled() {
                break;
            }

            let code = self
                .run_stage(session_id, coder, task, &artifacts, EventType::CodeChunk)
                .await;
            final_artifact = code.clone();

            let outcome = validate(&code);
            quality = outcome.quality_score();

            self.event_store
                .save_event(
                    session_id,
                    EventType::AnalysisChunk,
                    json!({
                        "content": format!("quality_score={:.2}", quality),
                        "session_id": session_id,
                    }),
                )
                .await;

            if quality >= self.quality_threshold || iterations >= self.max_retries {
                if quality < self.quality_threshold {
                    let debug_artifacts = {
                        let mut a = artifacts.clone();
                        a.push((TaskType::Coding, code.clone()));
                        a
                    };
                    let debugged = self
                        .run_stage(session_id, debugger, task, &debug_artifacts, EventType::ReflectionChunk)
                        .await;
                    if !debugged.trim().is_empty() {
                        final_artifact = debugged;
                    }
                }
                break;
            }

            iterations += 1;
            let mut retry_artifacts = artifacts.clone();
            retry_artifacts.push((TaskType::Coding, code));
            let reflection = self
                .run_stage(session_id, reflector, task, &retry_artifacts, EventType::ReflectionChunk)
                .await;
            artifacts.push((TaskType::Reflection, reflection));
        }

        self.emit_done(session_id, &final_artifact, quality, iterations)
            .await;

        RunResult {
            session_id: session_id.to_string(),
            artifact: final_artifact,
            quality_score: quality,
            iterations,
        }
    }

    async fn run_stage(
        &self,
        session_id: &str,
        agent: &Agent,
        task: &str,
        prior_artifacts: &[(TaskType, String)],
        chunk_type: EventType,
    ) -> String {
        use crate::reasoning_stream::ReasoningEvent;
        use futures_util::StreamExt;

        let mut stream = agent
            .stream(task, prior_artifacts, None, Some(Complexity::Medium))
            .await;
        let mut artifact = String::new();

        while let Some(event) = stream.next().await {
            if self.is_cancelled() {
                agent.interrupt();
            }
            match event {
                Ok(ReasoningEvent::Thinking { sse_frame: _, status }) => {
                    let event_type = match status {
                        crate::reasoning_stream::ThinkingStatus::Started => EventType::ThinkingStarted,
                        crate::reasoning_stream::ThinkingStatus::InProgress => {
                            EventType::ThinkingInProgress
                        }
                        crate::reasoning_stream::ThinkingStatus::Completed => {
                            EventType::ThinkingCompleted
                        }
                        crate::reasoning_stream::ThinkingStatus::Interrupted => {
                            EventType::ThinkingInterrupted
                        }
                    };
                    self.event_store
                        .save_event(session_id, event_type, json!({}))
                        .await;
                }
                Ok(ReasoningEvent::Content(text)) => {
                    artifact.push_str(&text);
                    self.event_store
                        .save_event(
                            session_id,
                            chunk_type.clone(),
                            json!({"content": text, "session_id": session_id}),
                        )
                        .await;
                }
                Ok(ReasoningEvent::Done(full)) => {
                    if artifact.is_empty() {
                        artifact = full;
                    }
                    break;
                }
                Err(e) => {
                    self.event_store
                        .save_event(
                            session_id,
                            EventType::Error,
                            json!({"kind": e.kind_tag(), "message": e.to_string(), "retryable": e.retryable()}),
                        )
                        .await;
                    break;
                }
            }
        }

        artifact
    }

    async fn emit_done(&self, session_id: &str, artifact: &str, quality_score: f64, iterations: u32) {
        self.event_store
            .save_event(
                session_id,
                EventType::Done,
                json!({
                    "session_id": session_id,
                    "artifact": artifact,
                    "quality_score": quality_score,
                    "iterations": iterations,
                }),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_score_weights_tests_highest() {
        let outcome = ValidationOutcome {
            tests_passed: true,
            types_passed: false,
            security_passed: false,
            static_analysis_issue_count: 0,
        };
        assert_eq!(outcome.quality_score(), 0.5);
    }

    #[test]
    fn quality_score_penalty_is_bounded() {
        let outcome = ValidationOutcome {
            tests_passed: true,
            types_passed: true,
            security_passed: true,
            static_analysis_issue_count: 1000,
        };
        assert!(outcome.quality_score() >= 0.0);
        assert_eq!(outcome.quality_score(), 1.0 - 0.3);
    }
}
