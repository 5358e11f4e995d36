//! LLM Client (C2): `generate` / `generate_stream` against the pooled
//! connection, with retries, timeouts, and `<think>` tag demultiplexing.
//!
//! The streaming path never uses substring search across the whole
//! accumulated buffer — per the design notes, that silently mishandles
//! chunk boundaries. Instead a small explicit state machine holds back
//! just enough trailing text to recognize a tag prefix before flushing.

use crate::config::BackoffPolicy;
use crate::error::OrchestraError;
use crate::pool::ConnectionPool;
use futures_util::Stream;
use log::{error, warn};
use serde::{Deserialize, Serialize};
use std::pin::Pin;

const OPENERS: [&str; 3] = ["<think>", "<thinking>", "<thought>"];
const CLOSERS: [&str; 3] = ["</think>", "</thinking>", "</thought>"];

/// One tagged chunk of a streaming response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamChunk {
    pub content: String,
    pub is_thinking: bool,
    pub is_done: bool,
    pub full_response: String,
}

/// Request parameters shared by `generate` and `generate_stream`.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub top_p: f32,
    pub num_predict: u32,
    pub timeout: std::time::Duration,
}

impl GenerateOptions {
    fn effective_num_predict(&self) -> u32 {
        if self.num_predict > 1024 && self.prompt.len() < 500 {
            (self.num_predict / 2).min(512)
        } else {
            self.num_predict
        }
    }

    fn to_body(&self, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "prompt": self.prompt,
            "stream": stream,
            "options": {
                "temperature": self.temperature,
                "top_p": self.top_p,
                "num_predict": self.effective_num_predict(),
            }
        })
    }
}

/// Wraps a [`ConnectionPool`] with retrying single-shot generation and
/// tag-demultiplexed streaming generation.
#[derive(Clone)]
pub struct LlmClient {
    pool: ConnectionPool,
    backoff: BackoffPolicy,
}

impl LlmClient {
    pub fn new(pool: ConnectionPool, backoff: BackoffPolicy) -> Self {
        Self { pool, backoff }
    }

    /// Complete once. Retries on timeout/transport error with exponential
    /// backoff; returns an empty string (never an `Err`, matching the
    /// original's "degrade, don't raise" contract) once attempts are
    /// exhausted, logging the final failure.
    pub async fn generate(&self, opts: &GenerateOptions) -> Result<String, OrchestraError> {
        let body = opts.to_body(false);
        for attempt in 0..self.backoff.max_attempts {
            match tokio::time::timeout(opts.timeout, self.pool.post_json("/api/generate", &body))
                .await
            {
                Ok(Ok(value)) => {
                    return Ok(value
                        .get("response")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string());
                }
                Ok(Err(pool_err)) => {
                    warn!(
                        "generate attempt {attempt} failed for model {}: {pool_err}",
                        opts.model
                    );
                }
                Err(_) => {
                    warn!("generate attempt {attempt} timed out for model {}", opts.model);
                }
            }
            if attempt + 1 < self.backoff.max_attempts {
                tokio::time::sleep(self.backoff.delay_for(attempt)).await;
            }
        }
        error!(
            "generate exhausted {} attempts for model {}",
            self.backoff.max_attempts, opts.model
        );
        Ok(String::new())
    }

    /// Streaming generate: reads line-delimited JSON frames from the
    /// transport and runs them through the tag state machine, yielding
    /// [`StreamChunk`] values.
    pub async fn generate_stream(
        &self,
        opts: &GenerateOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamChunk, OrchestraError>> + Send>>, OrchestraError>
    {
        let body = opts.to_body(true);
        let byte_stream = self
            .pool
            .stream_post("/api/generate", &body)
            .await
            .map_err(|_| OrchestraError::ModelUnavailable(opts.model.clone()))?;

        let demuxed = TagDemuxStream::new(byte_stream);
        Ok(Box::pin(demuxed))
    }
}

/// Internal state of the `<think>` tag state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagState {
    Outside,
    InsideThink,
}

/// Longest recognized tag text, used to size the lookback buffer.
fn max_tag_len() -> usize {
    OPENERS
        .iter()
        .chain(CLOSERS.iter())
        .map(|s| s.len())
        .max()
        .unwrap_or(0)
}

fn matches_opener_ci(buf: &str) -> Option<usize> {
    let lower = buf.to_lowercase();
    OPENERS
        .iter()
        .find(|tag| lower.starts_with(*tag))
        .map(|tag| tag.len())
}

fn matches_closer_ci(buf: &str) -> Option<usize> {
    let lower = buf.to_lowercase();
    CLOSERS.iter().find_map(|tag| {
        if lower.starts_with(tag) {
            Some(tag.len())
        } else {
            None
        }
    })
}

/// Whether `buf`'s tail could still be extended into a recognized tag —
/// used to decide how much trailing text must be held back rather than
/// flushed early.
fn tail_could_be_tag_prefix(buf: &str) -> bool {
    let lower = buf.to_lowercase();
    for tag in OPENERS.iter().chain(CLOSERS.iter()) {
        let max_check = tag.len().min(lower.len());
        for take in 1..=max_check {
            let suffix_start = lower.len() - take;
            if tag.starts_with(&lower[suffix_start..]) {
                return true;
            }
        }
    }
    false
}

/// Adapts a raw byte stream of line-delimited `{response, done}` JSON
/// frames into a [`StreamChunk`] stream, demultiplexing `<think>` content.
struct TagDemuxStream<S> {
    inner: S,
    line_buf: String,
    lookback: String,
    state: TagState,
    full_response: String,
    finished: bool,
    pending: std::collections::VecDeque<StreamChunk>,
}

impl<S> TagDemuxStream<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            line_buf: String::new(),
            lookback: String::new(),
            state: TagState::Outside,
            full_response: String::new(),
            finished: false,
            pending: std::collections::VecDeque::new(),
        }
    }

    /// Parse one line of the transport's `{response, done}` frame and feed
    /// its text through the tag state machine, queuing resulting chunks.
    fn handle_line(&mut self, line: &str) {
        let parsed: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => return,
        };
        let text = parsed.get("response").and_then(|v| v.as_str()).unwrap_or("");
        if !text.is_empty() {
            self.pending.extend(self.feed(text));
        }
        if parsed.get("done").and_then(|v| v.as_bool()).unwrap_or(false) {
            self.pending.extend(self.finish());
        }
    }
}

impl<S> TagDemuxStream<S> {
    /// Feed new text into the lookback buffer, emit as many fully-decided
    /// chunks as possible, and keep the remainder (which might still
    /// complete a tag) buffered.
    fn feed(&mut self, text: &str) -> Vec<StreamChunk> {
        self.lookback.push_str(text);
        self.full_response.push_str(text);
        let mut out = Vec::new();

        loop {
            if self.lookback.is_empty() {
                break;
            }
            match self.state {
                TagState::Outside => {
                    if let Some(tag_len) = matches_opener_ci(&self.lookback) {
                        self.lookback.drain(..tag_len);
                        self.state = TagState::InsideThink;
                        out.push(StreamChunk {
                            content: String::new(),
                            is_thinking: true,
                            is_done: false,
                            full_response: self.full_response.clone(),
                        });
                        continue;
                    }
                }
                TagState::InsideThink => {
                    if let Some(tag_len) = matches_closer_ci(&self.lookback) {
                        self.lookback.drain(..tag_len);
                        self.state = TagState::Outside;
                        continue;
                    }
                }
            }

            if tail_could_be_tag_prefix(&self.lookback) && self.lookback.len() <= max_tag_len() {
                break;
            }

            // Flush everything except a trailing window that could still
            // extend into a recognized tag.
            let mut safe_len = {
                let mut keep = 0usize;
                for take in (1..=self.lookback.len().min(max_tag_len())).rev() {
                    let suffix_start = self.lookback.len() - take;
                    if tail_could_be_tag_prefix(&self.lookback[suffix_start..]) {
                        keep = take;
                    }
                }
                self.lookback.len() - keep
            };
            // Never flush past a '<' that lands inside that window: it may
            // open or close a tag once the rest of it arrives, and the
            // head-of-buffer checks above only recognize a tag once it sits
            // at the very front of `lookback`. The leading byte, if it is
            // itself '<', has already failed those checks this iteration,
            // so it's dead and safe to flush past; look for the next one.
            let search_from = if self.lookback.starts_with('<') { 1 } else { 0 };
            if search_from < safe_len {
                if let Some(rel) = self.lookback[search_from..safe_len].find('<') {
                    safe_len = search_from + rel;
                }
            }
            if safe_len == 0 {
                break;
            }
            let flushed: String = self.lookback.drain(..safe_len).collect();
            if !flushed.is_empty() {
                out.push(StreamChunk {
                    content: flushed,
                    is_thinking: self.state == TagState::InsideThink,
                    is_done: false,
                    full_response: self.full_response.clone(),
                });
            }
        }

        out
    }

    /// Flush whatever remains at stream end. An unclosed `<think>` block is
    /// emitted as thinking content and implicitly closed, with a warning.
    fn finish(&mut self) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        if !self.lookback.is_empty() {
            if self.state == TagState::InsideThink {
                warn!("stream ended with an unclosed <think> block; force-closing");
            }
            out.push(StreamChunk {
                content: std::mem::take(&mut self.lookback),
                is_thinking: self.state == TagState::InsideThink,
                is_done: false,
                full_response: self.full_response.clone(),
            });
        }
        out.push(StreamChunk {
            content: String::new(),
            is_thinking: false,
            is_done: true,
            full_response: self.full_response.clone(),
        });
        out
    }
}

impl<S> Stream for TagDemuxStream<S>
where
    S: Stream<Item = Result<bytes::Bytes, OrchestraError>> + Unpin,
{
    type Item = Result<StreamChunk, OrchestraError>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;

        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Poll::Ready(Some(Ok(chunk)));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            // Drain any already-buffered line before polling for more bytes.
            if let Some(nl) = self.line_buf.find('\n') {
                let line: String = self.line_buf.drain(..=nl).collect();
                let trimmed = line.trim().to_string();
                if !trimmed.is_empty() {
                    self.handle_line(&trimmed);
                }
                continue;
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    self.line_buf.push_str(&String::from_utf8_lossy(&bytes));
                    continue;
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    let rest = std::mem::take(&mut self.line_buf);
                    let trimmed = rest.trim().to_string();
                    if !trimmed.is_empty() {
                        self.handle_line(&trimmed);
                    }
                    if self.pending.is_empty() {
                        self.pending.extend(self.finish());
                    }
                    continue;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
