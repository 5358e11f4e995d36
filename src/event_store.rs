//! Event Store (C5): per-session append-only event log plus a single-
//! consumer live queue, bounded by TTL and a cross-session LRU cap.
//!
//! Grounded directly on the original `EventStore`'s class-level state
//! (`_events`, `_event_queues`, `_lock`, `_max_sessions`, `_event_ttl`,
//! `_cleanup_interval`), translated into a single explicitly constructed
//! service rather than a process-global singleton (per the design notes).

use crate::config::EventStoreConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Closed set of event kinds a session's log may contain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ThinkingStarted,
    ThinkingInProgress,
    ThinkingCompleted,
    ThinkingInterrupted,
    Progress,
    PlanChunk,
    TestChunk,
    CodeChunk,
    AnalysisChunk,
    ReflectionChunk,
    Error,
    Done,
}

/// One immutable, store-owned event. Created only by [`EventStore::save_event`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
}

struct SessionRecord {
    log: Vec<Event>,
    queue_tx: Option<mpsc::UnboundedSender<Event>>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl SessionRecord {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            log: Vec::new(),
            queue_tx: None,
            created_at: now,
            last_activity: now,
        }
    }
}

struct Inner {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    config: EventStoreConfig,
}

/// Per-session bounded event store, backing both live SSE subscribers and
/// reconnect-replay reads over the log.
#[derive(Clone)]
pub struct EventStore {
    inner: Arc<Inner>,
}

impl EventStore {
    pub fn new(config: EventStoreConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: Mutex::new(HashMap::new()),
                config,
            }),
        }
    }

    /// Returns (creating if absent) the session's index entry. If creating
    /// would exceed `max_sessions`, evicts the least-recently-touched
    /// session first, outside the lock used for eviction to avoid
    /// deadlocking `cleanup_session` against itself.
    pub async fn get_for_session(&self, session_id: &str) {
        let needs_eviction = {
            let sessions = self.inner.sessions.lock().await;
            if sessions.contains_key(session_id) {
                false
            } else {
                sessions.len() >= self.inner.config.max_sessions
            }
        };

        if needs_eviction {
            if let Some(victim) = self.find_lru_session(session_id).await {
                self.cleanup_session(&victim).await;
            }
        }

        let mut sessions = self.inner.sessions.lock().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionRecord::new);
    }

    async fn find_lru_session(&self, excluding: &str) -> Option<String> {
        let sessions = self.inner.sessions.lock().await;
        sessions
            .iter()
            .filter(|(id, _)| id.as_str() != excluding)
            .min_by_key(|(_, rec)| rec.last_activity)
            .map(|(id, _)| id.clone())
    }

    /// Assigns a UUID and timestamp, appends to the log, and, if a live
    /// channel exists, non-blockingly enqueues the event. Never removes
    /// the just-saved event and never raises on a failed enqueue — the log
    /// remains the source of truth.
    pub async fn save_event(
        &self,
        session_id: &str,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Event {
        self.get_for_session(session_id).await;

        let event = Event {
            event_id: Uuid::new_v4(),
            event_type,
            payload,
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
        };

        let mut sessions = self.inner.sessions.lock().await;
        if let Some(record) = sessions.get_mut(session_id) {
            record.last_activity = event.timestamp;
            record.log.push(event.clone());
            if let Some(tx) = &record.queue_tx {
                if tx.send(event.clone()).is_err() {
                    log::warn!("event queue for session {session_id} has no receiver; dropping live delivery");
                }
            }
        }
        event
    }

    /// Exactly one live channel per session. Creates it on first call.
    pub async fn get_event_queue(&self, session_id: &str) -> mpsc::UnboundedReceiver<Event> {
        self.get_for_session(session_id).await;
        let mut sessions = self.inner.sessions.lock().await;
        let record = sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionRecord::new);
        let (tx, rx) = mpsc::unbounded_channel();
        record.queue_tx = Some(tx);
        rx
    }

    /// Removes the live channel; the receiver half, once dropped by the
    /// caller, drains pending items.
    pub async fn remove_event_queue(&self, session_id: &str) {
        let mut sessions = self.inner.sessions.lock().await;
        if let Some(record) = sessions.get_mut(session_id) {
            record.queue_tx = None;
        }
    }

    pub async fn get_event(&self, session_id: &str, event_id: Uuid) -> Option<Event> {
        let sessions = self.inner.sessions.lock().await;
        sessions
            .get(session_id)
            .and_then(|r| r.log.iter().find(|e| e.event_id == event_id).cloned())
    }

    pub async fn get_events(&self, session_id: &str) -> Vec<Event> {
        let sessions = self.inner.sessions.lock().await;
        sessions
            .get(session_id)
            .map(|r| r.log.clone())
            .unwrap_or_default()
    }

    pub async fn get_all_events(&self) -> Vec<Event> {
        let sessions = self.inner.sessions.lock().await;
        sessions.values().flat_map(|r| r.log.clone()).collect()
    }

    /// Idempotent: removes the log, drains and removes the queue, removes
    /// the session record. A second call on the same id is a no-op.
    pub async fn cleanup_session(&self, session_id: &str) {
        let mut sessions = self.inner.sessions.lock().await;
        sessions.remove(session_id);
    }

    pub async fn session_count(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    pub async fn session_exists(&self, session_id: &str) -> bool {
        self.inner.sessions.lock().await.contains_key(session_id)
    }

    /// TTL sweep: retains only events younger than `event_ttl`, deletes
    /// sessions left empty, and drops queues whose session has been
    /// deleted and are empty. Matches the original's two-pass cleanup.
    pub async fn cleanup_all_old_events(&self) {
        let ttl = self.inner.config.event_ttl;
        let now = Utc::now();
        let mut sessions = self.inner.sessions.lock().await;
        let mut to_delete = Vec::new();
        for (id, record) in sessions.iter_mut() {
            record.log.retain(|e| {
                now.signed_duration_since(e.timestamp)
                    .to_std()
                    .map(|age| age < ttl)
                    .unwrap_or(true)
            });
            if record.log.is_empty() && record.queue_tx.is_none() {
                to_delete.push(id.clone());
            }
        }
        for id in to_delete {
            sessions.remove(&id);
        }
    }

    /// Spawn the periodic background sweep task. Returns a handle whose
    /// drop does not stop the task; call `.abort()` on shutdown.
    pub fn spawn_cleanup_task(&self) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        let interval = self.inner.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                store.cleanup_all_old_events().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_sessions: usize, ttl_secs: u64) -> EventStoreConfig {
        EventStoreConfig {
            max_sessions,
            event_ttl: std::time::Duration::from_secs(ttl_secs),
            cleanup_interval: std::time::Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn e3_lru_eviction_keeps_cap() {
        let store = EventStore::new(config(3, 3600));
        for id in ["a", "b", "c"] {
            store
                .save_event(id, EventType::Progress, serde_json::json!({}))
                .await;
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        store
            .save_event("d", EventType::Progress, serde_json::json!({}))
            .await;

        assert!(!store.session_exists("a").await);
        assert!(store.session_exists("b").await);
        assert!(store.session_exists("c").await);
        assert!(store.session_exists("d").await);
        assert_eq!(store.session_count().await, 3);
    }

    #[tokio::test]
    async fn e4_ttl_sweep_removes_expired_events() {
        let store = EventStore::new(config(1000, 1));
        store
            .save_event("s1", EventType::Progress, serde_json::json!({}))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        store.cleanup_all_old_events().await;

        let events = store.get_events("s1").await;
        let exists = store.session_exists("s1").await;
        assert!(events.is_empty() || !exists);
    }

    #[tokio::test]
    async fn cleanup_session_is_idempotent() {
        let store = EventStore::new(config(10, 3600));
        store
            .save_event("s1", EventType::Progress, serde_json::json!({}))
            .await;
        store.cleanup_session("s1").await;
        store.cleanup_session("s1").await;
        assert!(!store.session_exists("s1").await);
    }

    #[tokio::test]
    async fn saved_event_is_retrievable_before_cleanup() {
        let store = EventStore::new(config(10, 3600));
        let event = store
            .save_event("s1", EventType::Done, serde_json::json!({"artifact": "x"}))
            .await;
        let fetched = store.get_event("s1", event.event_id).await;
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn live_queue_receives_saved_events_in_order() {
        let store = EventStore::new(config(10, 3600));
        let mut rx = store.get_event_queue("s1").await;
        store
            .save_event("s1", EventType::PlanChunk, serde_json::json!({"content": "1"}))
            .await;
        store
            .save_event("s1", EventType::PlanChunk, serde_json::json!({"content": "2"}))
            .await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.payload["content"], "1");
        assert_eq!(second.payload["content"], "2");
    }
}
