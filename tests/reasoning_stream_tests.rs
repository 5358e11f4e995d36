use futures_util::{Stream, StreamExt};
use orchestra::config::ReasoningStreamConfig;
use orchestra::error::OrchestraError;
use orchestra::llm_client::StreamChunk;
use orchestra::reasoning_stream::{ReasoningEvent, ReasoningStreamManager};
use std::pin::Pin;
use std::time::Duration;

fn stub_stream(
    chunks: Vec<StreamChunk>,
) -> Pin<Box<dyn Stream<Item = Result<StreamChunk, OrchestraError>> + Send>> {
    Box::pin(futures_util::stream::iter(chunks.into_iter().map(Ok)))
}

fn delayed_stream(
    chunks: Vec<(StreamChunk, u64)>,
) -> Pin<Box<dyn Stream<Item = Result<StreamChunk, OrchestraError>> + Send>> {
    Box::pin(async_stream::stream! {
        for (chunk, delay_ms) in chunks {
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            yield Ok(chunk);
        }
    })
}

#[tokio::test]
async fn forces_thinking_block_closed_after_time_budget_exceeded() {
    let manager = ReasoningStreamManager::new(ReasoningStreamConfig {
        enabled: true,
        chunk_size: 100,
        debounce_ms: 0,
        max_thinking_time_ms: 10,
        show_summary_only: false,
    });

    let chunks = vec![
        (
            StreamChunk { content: String::new(), is_thinking: true, is_done: false, full_response: String::new() },
            0,
        ),
        (
            StreamChunk {
                content: "still pondering".into(),
                is_thinking: true,
                is_done: false,
                full_response: "still pondering".into(),
            },
            50,
        ),
        (
            StreamChunk {
                content: String::new(),
                is_thinking: false,
                is_done: true,
                full_response: "final answer".into(),
            },
            0,
        ),
    ];

    let mut out = manager.process("planning".into(), delayed_stream(chunks));
    let mut saw_time_budget_summary = false;
    while let Some(event) = out.next().await {
        if let ReasoningEvent::Thinking { sse_frame, .. } = event.unwrap() {
            if sse_frame.contains("time_budget") {
                saw_time_budget_summary = true;
            }
        }
    }
    assert!(saw_time_budget_summary, "expected a forced thinking_completed frame tagged time_budget");
}

#[tokio::test]
async fn summary_only_mode_suppresses_progress_frames_but_keeps_a_summary() {
    let manager = ReasoningStreamManager::new(ReasoningStreamConfig {
        enabled: true,
        chunk_size: 100,
        debounce_ms: 0,
        max_thinking_time_ms: 120_000,
        show_summary_only: true,
    });

    let chunks = vec![
        StreamChunk { content: String::new(), is_thinking: true, is_done: false, full_response: String::new() },
        StreamChunk {
            content: "First the plan is clear. Then we code.".into(),
            is_thinking: true,
            is_done: false,
            full_response: "First the plan is clear. Then we code.".into(),
        },
        StreamChunk { content: "done".into(), is_thinking: false, is_done: false, full_response: "done".into() },
        StreamChunk { content: String::new(), is_thinking: false, is_done: true, full_response: "done".into() },
    ];

    let mut out = manager.process("planning".into(), stub_stream(chunks));
    let mut in_progress_frames = 0;
    let mut completed_frame = None;
    while let Some(event) = out.next().await {
        if let ReasoningEvent::Thinking { sse_frame, .. } = event.unwrap() {
            if sse_frame.contains("thinking_in_progress") {
                in_progress_frames += 1;
            }
            if sse_frame.contains("thinking_completed") {
                completed_frame = Some(sse_frame);
            }
        }
    }

    assert_eq!(in_progress_frames, 0, "show_summary_only must suppress per-chunk progress frames");
    let completed_frame = completed_frame.expect("a thinking_completed frame should still be emitted");
    assert!(completed_frame.contains("First the plan is clear."));
}

#[tokio::test]
async fn disabled_manager_passes_thinking_content_straight_through() {
    let manager = ReasoningStreamManager::new(ReasoningStreamConfig {
        enabled: false,
        chunk_size: 100,
        debounce_ms: 0,
        max_thinking_time_ms: 120_000,
        show_summary_only: false,
    });

    let chunks = vec![
        StreamChunk { content: "<think>".into(), is_thinking: true, is_done: false, full_response: "<think>".into() },
        StreamChunk { content: String::new(), is_thinking: false, is_done: true, full_response: "<think>".into() },
    ];

    let mut out = manager.process("planning".into(), stub_stream(chunks));
    let mut contents = Vec::new();
    while let Some(event) = out.next().await {
        if let ReasoningEvent::Content(text) = event.unwrap() {
            contents.push(text);
        }
    }
    assert_eq!(contents, vec!["<think>".to_string()]);
}
