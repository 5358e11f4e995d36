//! Pooled HTTP client against the local model server (C1).
//!
//! Unlike the process-global `CLIENT_POOL` static this crate's ancestor
//! used, `ConnectionPool` is constructed explicitly and passed down to
//! whoever needs it — only the gateway binary holds a process-wide handle.
//! The semaphore is the single contention point for outbound model calls:
//! in-flight requests never exceed `max_concurrent` regardless of caller
//! concurrency.
//!
//! # Example
//!
//! ```rust,no_run
//! use orchestra::config::PoolConfig;
//! use orchestra::pool::ConnectionPool;
//!
//! # async {
//! let pool = ConnectionPool::new(PoolConfig {
//!     base_url: "http://localhost:11434".into(),
//!     max_concurrent: 10,
//!     max_keepalive: 5,
//!     request_timeout: std::time::Duration::from_secs(300),
//! });
//! let body = pool.post_json("/api/generate", &serde_json::json!({"model": "x"})).await.unwrap();
//! # };
//! ```

use crate::config::PoolConfig;
use crate::error::{OrchestraError, PoolError};
use bytes::Bytes;
use futures_util::Stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

struct Inner {
    client: reqwest::Client,
    base_url: String,
    semaphore: Arc<Semaphore>,
    initialized: AtomicBool,
    closed: AtomicBool,
}

/// A pooled HTTP client guarded by a concurrency-capping semaphore.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<Inner>,
}

impl ConnectionPool {
    /// Build the client and initialize the pool. Keep-alive and connect
    /// timeouts mirror the teacher's `create_pooled_client`.
    pub fn new(config: PoolConfig) -> Self {
        let client = reqwest::ClientBuilder::new()
            .pool_max_idle_per_host(config.max_keepalive)
            .pool_idle_timeout(Some(std::time::Duration::from_secs(90)))
            .tcp_keepalive(Some(std::time::Duration::from_secs(60)))
            .connect_timeout(std::time::Duration::from_secs(30))
            .timeout(config.request_timeout)
            .build()
            .expect("failed to build pooled HTTP client");

        Self {
            inner: Arc::new(Inner {
                client,
                base_url: config.base_url,
                semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
                initialized: AtomicBool::new(true),
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn check_initialized(&self) -> Result<(), PoolError> {
        if self.inner.closed.load(Ordering::SeqCst) || !self.inner.initialized.load(Ordering::SeqCst) {
            return Err(PoolError::NotInitialized);
        }
        Ok(())
    }

    /// POST a JSON body to `endpoint` (joined with the configured base URL)
    /// and return the parsed JSON response body.
    pub async fn post_json(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, PoolError> {
        self.check_initialized()?;
        let _permit = self
            .inner
            .semaphore
            .acquire()
            .await
            .map_err(|_| PoolError::NotInitialized)?;
        let url = format!("{}{}", self.inner.base_url, endpoint);
        let resp = self
            .inner
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(OrchestraError::from)?;
        let value = resp.json::<serde_json::Value>().await.map_err(OrchestraError::from)?;
        Ok(value)
    }

    /// POST a JSON body and return the raw byte stream of the response,
    /// for line-delimited streaming endpoints. The semaphore permit is held
    /// for the lifetime of the returned stream.
    pub async fn stream_post(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<impl Stream<Item = Result<Bytes, OrchestraError>>, PoolError> {
        self.check_initialized()?;
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::NotInitialized)?;
        let url = format!("{}{}", self.inner.base_url, endpoint);
        let resp = self
            .inner
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(OrchestraError::from)?;
        let byte_stream = resp.bytes_stream();
        Ok(PermitGuardedStream {
            inner: byte_stream,
            _permit: permit,
        })
    }

    /// Idempotent shutdown: marks the pool closed so further calls fail
    /// fast with `PoolError::NotInitialized` instead of racing in-flight
    /// permits. Safe to call more than once.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst) && !self.inner.closed.load(Ordering::SeqCst)
    }
}

use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::OwnedSemaphorePermit;

struct PermitGuardedStream<S> {
    inner: S,
    _permit: OwnedSemaphorePermit,
}

impl<S> Stream for PermitGuardedStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<Bytes, OrchestraError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(b))) => Poll::Ready(Some(Ok(b))),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(OrchestraError::from(e)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
