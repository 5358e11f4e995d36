//! Lifecycle management for C8: idempotent shutdown flag, active-request
//! drain, and per-step bounded cleanup.
//!
//! Translated directly from `backend/shutdown_manager.py`'s
//! `ShutdownManager`: a shutdown `Notify`/flag, an `active_requests`
//! counter guarded by a lock, `wait_for_active_requests` polling loop, and
//! `cleanup_with_timeout` wrapping each named cleanup step so a single
//! slow step logs and proceeds instead of blocking shutdown indefinitely.

use log::{info, warn};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tracks in-flight request count and the shutdown flag, and runs the
/// bounded cleanup sequence.
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_requested: Arc<AtomicBool>,
    active_requests: Arc<AtomicUsize>,
    drain_timeout: Duration,
}

impl ShutdownManager {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            active_requests: Arc::new(AtomicUsize::new(0)),
            drain_timeout,
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Idempotent: setting the flag twice is a no-op on the second call.
    pub fn request_shutdown(&self) {
        if !self.shutdown_requested.swap(true, Ordering::SeqCst) {
            info!("shutdown requested");
        }
    }

    pub fn increment_active_requests(&self) {
        self.active_requests.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_active_requests(&self) {
        // Never go negative: a decrement racing a fresh counter reset
        // would otherwise underflow the atomic.
        let _ = self
            .active_requests
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v.saturating_sub(1)));
    }

    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::SeqCst)
    }

    /// Poll every 500ms for the active-request counter to reach zero, up
    /// to `drain_timeout`. Logs and proceeds on timeout rather than
    /// blocking shutdown forever.
    pub async fn wait_for_active_requests(&self) {
        if self.active_requests() == 0 {
            info!("no active requests");
            return;
        }
        info!(
            "waiting for {} active requests (max {:?})",
            self.active_requests(),
            self.drain_timeout
        );
        let start = tokio::time::Instant::now();
        while self.active_requests() > 0 {
            if start.elapsed() >= self.drain_timeout {
                warn!("timed out waiting for active requests, proceeding with shutdown");
                return;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        info!("all active requests completed");
    }

    /// Run one cleanup step under its own timeout. Never propagates a
    /// failure: logs a warning and returns `false` on timeout or error so
    /// the overall shutdown sequence always proceeds.
    pub async fn cleanup_with_timeout<F, Fut>(&self, name: &str, timeout: Duration, op: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        match tokio::time::timeout(timeout, op()).await {
            Ok(()) => {
                info!("{name} completed");
                true
            }
            Err(_) => {
                warn!("{name} timed out after {timeout:?}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_shutdown_is_idempotent() {
        let manager = ShutdownManager::new(Duration::from_secs(1));
        manager.request_shutdown();
        manager.request_shutdown();
        assert!(manager.is_shutdown_requested());
    }

    #[test]
    fn active_requests_never_go_negative() {
        let manager = ShutdownManager::new(Duration::from_secs(1));
        manager.decrement_active_requests();
        assert_eq!(manager.active_requests(), 0);
    }

    #[tokio::test]
    async fn wait_for_active_requests_returns_once_drained() {
        let manager = ShutdownManager::new(Duration::from_secs(2));
        manager.increment_active_requests();
        let m2 = manager.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            m2.decrement_active_requests();
        });
        manager.wait_for_active_requests().await;
        assert_eq!(manager.active_requests(), 0);
    }

    #[tokio::test]
    async fn cleanup_with_timeout_reports_failure_on_timeout() {
        let manager = ShutdownManager::new(Duration::from_secs(1));
        let ok = manager
            .cleanup_with_timeout("slow step", Duration::from_millis(10), || async {
                tokio::time::sleep(Duration::from_millis(100)).await;
            })
            .await;
        assert!(!ok);
    }
}
