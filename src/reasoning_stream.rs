//! Reasoning-Stream Manager (C4): wraps an [`LlmClient`](crate::llm_client::LlmClient)
//! stream and produces a dual thinking/content output framed as SSE.
//!
//! Grounded on the state table in the component design: `Idle -> Thinking
//! -> Content -> Done`, with `interrupt()` flipping an atomic flag sampled
//! between chunks.

use crate::config::ReasoningStreamConfig;
use crate::error::OrchestraError;
use crate::llm_client::StreamChunk;
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use log::warn;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Lifecycle status of one thinking block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingStatus {
    Started,
    InProgress,
    Completed,
    Interrupted,
}

/// One unit of thinking progress, serialized as the `data` field of a
/// `thinking_*` SSE frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingChunk {
    pub stage: String,
    pub content: String,
    pub status: ThinkingStatus,
    pub elapsed_ms: u64,
    pub total_chars: usize,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// The three output kinds the manager yields for a single invocation.
#[derive(Debug, Clone)]
pub enum ReasoningEvent {
    /// A complete SSE frame for a `thinking_*` event.
    Thinking { sse_frame: String, status: ThinkingStatus },
    /// Plain text contributing to the artifact.
    Content(String),
    /// Terminal event; carries the fully aggregated response.
    Done(String),
}

fn sse_frame(event_type: &str, payload: &impl Serialize) -> String {
    let ts = Utc::now().timestamp_millis();
    let data = serde_json::to_string(payload).unwrap_or_else(|_| "{}".into());
    format!("id: {ts}\nevent: {event_type}\ndata: {data}\n\n")
}

fn first_sentence(text: &str, max_len: usize) -> String {
    let end = text.find(['.', '!', '?']).map(|i| i + 1).unwrap_or(text.len());
    let slice = &text[..end.min(text.len())];
    if slice.chars().count() > max_len {
        slice.chars().take(max_len).collect()
    } else {
        slice.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Idle,
    Thinking,
    Content,
    Done,
}

/// Wraps one `generate_stream` invocation's lifecycle: thinking/content
/// demultiplexing into framed SSE events, plus cooperative cancellation.
pub struct ReasoningStreamManager {
    config: ReasoningStreamConfig,
    interrupted: CancellationToken,
}

impl ReasoningStreamManager {
    pub fn new(config: ReasoningStreamConfig) -> Self {
        Self {
            config,
            interrupted: CancellationToken::new(),
        }
    }

    /// Flip the interrupt flag; sampled by the streaming loop between
    /// chunks.
    pub fn interrupt(&self) {
        self.interrupted.cancel();
    }

    /// Reset the manager for reuse across invocations.
    pub fn reset(&mut self) {
        self.interrupted = CancellationToken::new();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.is_cancelled()
    }

    /// Drive one `StreamChunk` stream to completion, yielding
    /// [`ReasoningEvent`]s. `stage` is carried on every thinking payload.
    pub fn process(
        &self,
        stage: String,
        mut chunks: Pin<Box<dyn Stream<Item = Result<StreamChunk, OrchestraError>> + Send>>,
    ) -> Pin<Box<dyn Stream<Item = Result<ReasoningEvent, OrchestraError>> + Send>> {
        let config = self.config.clone();
        let interrupted = self.interrupted.clone();

        let s = async_stream::stream! {
            let mut state = StreamState::Idle;
            let mut thinking_buf = String::new();
            let mut full_response = String::new();
            let start = Instant::now();

            loop {
                if interrupted.is_cancelled() {
                    if state == StreamState::Thinking {
                        let frame = sse_frame(
                            "thinking_interrupted",
                            &ThinkingChunk {
                                stage: stage.clone(),
                                content: thinking_buf.clone(),
                                status: ThinkingStatus::Interrupted,
                                elapsed_ms: start.elapsed().as_millis() as u64,
                                total_chars: thinking_buf.len(),
                                timestamp: Utc::now().timestamp_millis(),
                                summary: None,
                            },
                        );
                        yield Ok(ReasoningEvent::Thinking { sse_frame: frame, status: ThinkingStatus::Interrupted });
                    }
                    yield Ok(ReasoningEvent::Done(full_response.clone()));
                    return;
                }

                let next = chunks.next().await;
                let Some(next) = next else {
                    // Stream ended without an explicit is_done chunk.
                    if state == StreamState::Thinking {
                        yield Ok(ReasoningEvent::Thinking {
                            sse_frame: sse_frame("thinking_completed", &ThinkingChunk {
                                stage: stage.clone(),
                                content: thinking_buf.clone(),
                                status: ThinkingStatus::Completed,
                                elapsed_ms: start.elapsed().as_millis() as u64,
                                total_chars: thinking_buf.len(),
                                timestamp: Utc::now().timestamp_millis(),
                                summary: None,
                            }),
                            status: ThinkingStatus::Completed,
                        });
                    }
                    yield Ok(ReasoningEvent::Done(full_response.clone()));
                    return;
                };

                let chunk = match next {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                full_response = chunk.full_response.clone();

                if chunk.is_done {
                    match state {
                        StreamState::Thinking => {
                            let frame = sse_frame("thinking_completed", &ThinkingChunk {
                                stage: stage.clone(),
                                content: thinking_buf.clone(),
                                status: ThinkingStatus::Completed,
                                elapsed_ms: start.elapsed().as_millis() as u64,
                                total_chars: thinking_buf.len(),
                                timestamp: Utc::now().timestamp_millis(),
                                summary: None,
                            });
                            yield Ok(ReasoningEvent::Thinking { sse_frame: frame, status: ThinkingStatus::Completed });
                        }
                        _ => {}
                    }
                    state = StreamState::Done;
                    yield Ok(ReasoningEvent::Done(full_response.clone()));
                    return;
                }

                if !config.enabled {
                    if !chunk.content.is_empty() {
                        yield Ok(ReasoningEvent::Content(chunk.content.clone()));
                    }
                    continue;
                }

                let elapsed_ms = start.elapsed().as_millis() as u64;
                if state == StreamState::Thinking && elapsed_ms > config.max_thinking_time_ms {
                    warn!("stage {stage} exceeded max_thinking_time_ms, force-closing");
                    let frame = sse_frame("thinking_completed", &ThinkingChunk {
                        stage: stage.clone(),
                        content: thinking_buf.clone(),
                        status: ThinkingStatus::Completed,
                        elapsed_ms,
                        total_chars: thinking_buf.len(),
                        timestamp: Utc::now().timestamp_millis(),
                        summary: Some("time_budget".to_string()),
                    });
                    yield Ok(ReasoningEvent::Thinking { sse_frame: frame, status: ThinkingStatus::Completed });
                    state = StreamState::Content;
                }

                match (state, chunk.is_thinking) {
                    (StreamState::Idle, true) => {
                        state = StreamState::Thinking;
                        thinking_buf.clear();
                        yield Ok(ReasoningEvent::Thinking {
                            sse_frame: sse_frame("thinking_started", &ThinkingChunk {
                                stage: stage.clone(),
                                content: String::new(),
                                status: ThinkingStatus::Started,
                                elapsed_ms: 0,
                                total_chars: 0,
                                timestamp: Utc::now().timestamp_millis(),
                                summary: None,
                            }),
                            status: ThinkingStatus::Started,
                        });
                        if !chunk.content.is_empty() {
                            thinking_buf.push_str(&chunk.content);
                            if !config.show_summary_only {
                                yield Ok(ReasoningEvent::Thinking {
                                    sse_frame: sse_frame("thinking_in_progress", &ThinkingChunk {
                                        stage: stage.clone(),
                                        content: chunk.content.clone(),
                                        status: ThinkingStatus::InProgress,
                                        elapsed_ms,
                                        total_chars: thinking_buf.len(),
                                        timestamp: Utc::now().timestamp_millis(),
                                        summary: None,
                                    }),
                                    status: ThinkingStatus::InProgress,
                                });
                            }
                        }
                    }
                    (StreamState::Idle, false) => {
                        state = StreamState::Content;
                        if !chunk.content.is_empty() {
                            yield Ok(ReasoningEvent::Content(chunk.content.clone()));
                        }
                    }
                    (StreamState::Thinking, true) => {
                        thinking_buf.push_str(&chunk.content);
                        if !config.show_summary_only {
                            yield Ok(ReasoningEvent::Thinking {
                                sse_frame: sse_frame("thinking_in_progress", &ThinkingChunk {
                                    stage: stage.clone(),
                                    content: chunk.content.clone(),
                                    status: ThinkingStatus::InProgress,
                                    elapsed_ms,
                                    total_chars: thinking_buf.len(),
                                    timestamp: Utc::now().timestamp_millis(),
                                    summary: None,
                                }),
                                status: ThinkingStatus::InProgress,
                            });
                        }
                    }
                    (StreamState::Thinking, false) => {
                        let summary = if config.show_summary_only {
                            Some(first_sentence(&thinking_buf, 150))
                        } else {
                            None
                        };
                        yield Ok(ReasoningEvent::Thinking {
                            sse_frame: sse_frame("thinking_completed", &ThinkingChunk {
                                stage: stage.clone(),
                                content: thinking_buf.clone(),
                                status: ThinkingStatus::Completed,
                                elapsed_ms,
                                total_chars: thinking_buf.len(),
                                timestamp: Utc::now().timestamp_millis(),
                                summary,
                            }),
                            status: ThinkingStatus::Completed,
                        });
                        state = StreamState::Content;
                        if !chunk.content.is_empty() {
                            yield Ok(ReasoningEvent::Content(chunk.content.clone()));
                        }
                    }
                    (StreamState::Content, true) => {
                        // Not expected: treat as a fresh thinking block.
                        state = StreamState::Thinking;
                        thinking_buf.clear();
                        thinking_buf.push_str(&chunk.content);
                        yield Ok(ReasoningEvent::Thinking {
                            sse_frame: sse_frame("thinking_started", &ThinkingChunk {
                                stage: stage.clone(),
                                content: String::new(),
                                status: ThinkingStatus::Started,
                                elapsed_ms,
                                total_chars: 0,
                                timestamp: Utc::now().timestamp_millis(),
                                summary: None,
                            }),
                            status: ThinkingStatus::Started,
                        });
                    }
                    (StreamState::Content, false) => {
                        if !chunk.content.is_empty() {
                            yield Ok(ReasoningEvent::Content(chunk.content.clone()));
                        }
                    }
                    (StreamState::Done, _) => {}
                }
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestraError;
    use futures_util::stream;

    fn stub_stream(
        chunks: Vec<StreamChunk>,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamChunk, OrchestraError>> + Send>> {
        Box::pin(stream::iter(chunks.into_iter().map(Ok)))
    }

    #[tokio::test]
    async fn e5_thinking_then_content_then_done() {
        let manager = ReasoningStreamManager::new(ReasoningStreamConfig {
            enabled: true,
            chunk_size: 100,
            debounce_ms: 0,
            max_thinking_time_ms: 120_000,
            show_summary_only: false,
        });

        let chunks = vec![
            StreamChunk { content: String::new(), is_thinking: true, is_done: false, full_response: String::new() },
            StreamChunk { content: "plan".into(), is_thinking: true, is_done: false, full_response: "plan".into() },
            StreamChunk { content: "code".into(), is_thinking: false, is_done: false, full_response: "plancode".into() },
            StreamChunk { content: String::new(), is_thinking: false, is_done: true, full_response: "plancode".into() },
        ];

        let mut out = manager.process("coding".into(), stub_stream(chunks));
        let mut events = Vec::new();
        while let Some(ev) = out.next().await {
            events.push(ev.unwrap());
        }

        assert!(matches!(events[0], ReasoningEvent::Thinking { status: ThinkingStatus::Started, .. }));
        assert!(matches!(&events[1], ReasoningEvent::Thinking { status: ThinkingStatus::InProgress, sse_frame } if sse_frame.contains("plan")));
        assert!(matches!(&events[2], ReasoningEvent::Thinking { status: ThinkingStatus::Completed, sse_frame } if sse_frame.contains("plan")));
        assert!(matches!(&events[3], ReasoningEvent::Content(c) if c == "code"));
        assert!(matches!(events.last().unwrap(), ReasoningEvent::Done(_)));
    }

    #[tokio::test]
    async fn interrupt_emits_interrupted_then_done() {
        let manager = ReasoningStreamManager::new(ReasoningStreamConfig {
            enabled: true,
            chunk_size: 100,
            debounce_ms: 0,
            max_thinking_time_ms: 120_000,
            show_summary_only: false,
        });
        manager.interrupt();

        let chunks = vec![StreamChunk {
            content: "never seen".into(),
            is_thinking: true,
            is_done: false,
            full_response: "never seen".into(),
        }];
        let mut out = manager.process("coding".into(), stub_stream(chunks));
        let first = out.next().await.unwrap().unwrap();
        assert!(matches!(first, ReasoningEvent::Done(_)));
    }
}
