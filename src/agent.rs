//! Agent (C6): a stateful wrapper around one Reasoning-Stream invocation,
//! representing a single pipeline stage (planner / coder / tester /
//! debugger / reflector / critic).
//!
//! Generalized from the teacher's general-purpose conversational `Agent`
//! (identity fields, builder methods, event-handler hook) into a single-
//! purpose stage runner, since this pipeline's agents don't hold a tool
//! registry or multi-turn session state — each invocation is one prompt
//! in, one artifact out.

use crate::config::ReasoningStreamConfig;
use crate::error::OrchestraError;
use crate::llm_client::{GenerateOptions, LlmClient};
use crate::model::{Complexity, TaskType};
use crate::reasoning_stream::{ReasoningEvent, ReasoningStreamManager};
use crate::router::{ModelRouter, SelectionContext};
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Builds the prompt for one stage from whatever inputs the orchestrator
/// hands it. Treated as an external collaborator — prompt templates are
/// explicitly out of scope — but a minimal implementation is required so
/// the pipeline can run end to end.
pub trait PromptBuilder: Send + Sync {
    fn build(&self, task: &str, stage: TaskType, prior_artifacts: &[(TaskType, String)]) -> String;
}

/// Default prompt builder: concatenates the task and any prior-stage
/// artifacts into a single instruction block. Sufficient to exercise the
/// pipeline end to end; real prompt engineering belongs to the caller.
pub struct DefaultPromptBuilder;

impl PromptBuilder for DefaultPromptBuilder {
    fn build(&self, task: &str, stage: TaskType, prior_artifacts: &[(TaskType, String)]) -> String {
        let mut prompt = format!("Stage: {stage:?}\nTask: {task}\n");
        for (stage, artifact) in prior_artifacts {
            prompt.push_str(&format!("\n--- {stage:?} output ---\n{artifact}\n"));
        }
        prompt
    }
}

/// Output of one agent invocation.
#[derive(Debug, Clone, Default)]
pub struct AgentResponse {
    pub artifact: String,
    pub thinking_frames: Vec<String>,
    pub model_used: Option<String>,
    pub fallback_used: bool,
}

/// A single pipeline stage.
pub struct Agent {
    pub stage: TaskType,
    llm_client: LlmClient,
    router: Arc<ModelRouter>,
    prompt_builder: Arc<dyn PromptBuilder>,
    reasoning_config: ReasoningStreamConfig,
    interrupted: CancellationToken,
}

impl Agent {
    pub fn new(
        stage: TaskType,
        llm_client: LlmClient,
        router: Arc<ModelRouter>,
        reasoning_config: ReasoningStreamConfig,
    ) -> Self {
        Self {
            stage,
            llm_client,
            router,
            prompt_builder: Arc::new(DefaultPromptBuilder),
            reasoning_config,
            interrupted: CancellationToken::new(),
        }
    }

    pub fn with_prompt_builder(mut self, builder: Arc<dyn PromptBuilder>) -> Self {
        self.prompt_builder = builder;
        self
    }

    /// Signals the running invocation to stop after the current chunk and
    /// emit a final `done` with whatever artifact has accumulated so far.
    pub fn interrupt(&self) {
        self.interrupted.cancel();
    }

    /// Run this stage to completion, yielding reasoning/content events as
    /// they arrive. On `ModelUnavailable`, falls back once to an
    /// alternate model with a rebuilt prompt; if no fallback exists, emits
    /// an empty-artifact `done`.
    pub async fn stream(
        &self,
        task: &str,
        prior_artifacts: &[(TaskType, String)],
        preferred_model: Option<&str>,
        complexity: Option<Complexity>,
    ) -> Pin<Box<dyn Stream<Item = Result<ReasoningEvent, OrchestraError>> + Send>> {
        self.stream_with_meta(task, prior_artifacts, preferred_model, complexity)
            .await
            .0
    }

    /// Same as [`Agent::stream`], but also reports which model actually
    /// served the request and whether the fallback path was taken — the
    /// bookkeeping `run` needs to populate [`AgentResponse`].
    async fn stream_with_meta(
        &self,
        task: &str,
        prior_artifacts: &[(TaskType, String)],
        preferred_model: Option<&str>,
        complexity: Option<Complexity>,
    ) -> (
        Pin<Box<dyn Stream<Item = Result<ReasoningEvent, OrchestraError>> + Send>>,
        Option<String>,
        bool,
    ) {
        let ctx = SelectionContext { complexity };
        let Some(selection) = self.router.select_model(self.stage, preferred_model, &ctx) else {
            return (
                Box::pin(futures_util::stream::once(async {
                    Ok(ReasoningEvent::Done(String::new()))
                })),
                None,
                false,
            );
        };

        let prompt = self.prompt_builder.build(task, self.stage, prior_artifacts);
        let result = self.run_stream(&prompt, &selection.model_name).await;

        match result {
            Ok(stream) => (stream, Some(selection.model_name), false),
            Err(OrchestraError::ModelUnavailable(failed)) => {
                let fallback = self
                    .router
                    .get_fallback_model(&failed, self.stage, complexity);
                match fallback {
                    Some(fallback) => {
                        let rebuilt_prompt =
                            self.prompt_builder.build(task, self.stage, prior_artifacts);
                        let model_used = Some(fallback.model_name.clone());
                        match self.run_stream(&rebuilt_prompt, &fallback.model_name).await {
                            Ok(stream) => (stream, model_used, true),
                            Err(_) => (
                                Box::pin(futures_util::stream::once(async {
                                    Ok(ReasoningEvent::Done(String::new()))
                                })),
                                model_used,
                                true,
                            ),
                        }
                    }
                    None => (
                        Box::pin(futures_util::stream::once(async {
                            Ok(ReasoningEvent::Done(String::new()))
                        })),
                        None,
                        false,
                    ),
                }
            }
            Err(e) => (Box::pin(futures_util::stream::once(async move { Err(e) })), None, false),
        }
    }

    async fn run_stream(
        &self,
        prompt: &str,
        model: &str,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<ReasoningEvent, OrchestraError>> + Send>>, OrchestraError>
    {
        let opts = GenerateOptions {
            model: model.to_string(),
            prompt: prompt.to_string(),
            temperature: 0.25,
            top_p: 0.9,
            num_predict: 4096,
            timeout: std::time::Duration::from_secs(300),
        };
        let raw_stream = self.llm_client.generate_stream(&opts).await?;
        let manager = ReasoningStreamManager::new(self.reasoning_config.clone());
        if self.interrupted.is_cancelled() {
            manager.interrupt();
        }
        Ok(manager.process(format!("{:?}", self.stage).to_lowercase(), raw_stream))
    }

    /// Collects a full [`AgentResponse`] from [`Agent::stream`], post-
    /// processing the aggregated content: strips Markdown code fences for
    /// coding stages.
    pub async fn run(
        &self,
        task: &str,
        prior_artifacts: &[(TaskType, String)],
        preferred_model: Option<&str>,
        complexity: Option<Complexity>,
    ) -> AgentResponse {
        let (mut stream, model_used, fallback_used) = self
            .stream_with_meta(task, prior_artifacts, preferred_model, complexity)
            .await;
        let mut response = AgentResponse {
            model_used,
            fallback_used,
            ..AgentResponse::default()
        };
        let mut content = String::new();

        while let Some(event) = stream.next().await {
            match event {
                Ok(ReasoningEvent::Thinking { sse_frame, .. }) => {
                    response.thinking_frames.push(sse_frame);
                }
                Ok(ReasoningEvent::Content(text)) => content.push_str(&text),
                Ok(ReasoningEvent::Done(full)) => {
                    if content.is_empty() {
                        content = full;
                    }
                    break;
                }
                Err(_) => break,
            }
        }

        response.artifact = if self.stage.is_coder_flavored() {
            strip_code_fences(&content)
        } else {
            content
        };
        response
    }
}

/// Strips leading/trailing Markdown code fences (` ``` `), keeping the
/// code body intact.
fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.splitn(2, '\n').nth(1).unwrap_or(rest);
        rest.strip_suffix("```").unwrap_or(rest).trim().to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_code_fences_removes_language_tagged_fence() {
        let input = "```rust\nfn main() {}\n```";
        assert_eq!(strip_code_fences(input), "fn main() {}");
    }

    #[test]
    fn strip_code_fences_passes_through_plain_text() {
        assert_eq!(strip_code_fences("println!(\"hi\")"), "println!(\"hi\")");
    }

    #[test]
    fn default_prompt_builder_includes_prior_artifacts() {
        let builder = DefaultPromptBuilder;
        let prompt = builder.build(
            "print hello",
            TaskType::Coding,
            &[(TaskType::Planning, "step 1: print".into())],
        );
        assert!(prompt.contains("print hello"));
        assert!(prompt.contains("step 1: print"));
    }
}
