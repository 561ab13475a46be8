//! Client-facing request API.
//!
//! [`FetchClient`] owns one scheduler and one cache. Construct it once at
//! startup and clone the handle into every component that issues requests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::body::Body;
use super::cache_policy::DEFAULT_TTL;
use super::download::DEFAULT_BUFFER_BUDGET;
use super::http::{DEFAULT_TIMEOUT, Headers, ReqwestTransport, Transport};
use super::scheduler::{
    Callback, DEFAULT_MAX_INFLIGHT_PER_CATEGORY, NO_CATEGORY, RequestFlags, RequestId,
    RequestScheduler, SchedulerOptions,
};
use crate::error::{FetchqError, Result};
use crate::storage::cache::CacheStore;
use crate::storage::{AppPaths, ResolvedConfig};

/// Construction-time client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub max_inflight_per_category: usize,
    pub cache_dir: PathBuf,
    pub buffer_budget: usize,
    pub default_ttl: Duration,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_inflight_per_category: DEFAULT_MAX_INFLIGHT_PER_CATEGORY,
            cache_dir: AppPaths::new().http_cache_dir(),
            buffer_budget: DEFAULT_BUFFER_BUDGET,
            default_ttl: DEFAULT_TTL,
            timeout: DEFAULT_TIMEOUT,
            user_agent: None,
        }
    }
}

impl From<&ResolvedConfig> for ClientConfig {
    fn from(resolved: &ResolvedConfig) -> Self {
        Self {
            max_inflight_per_category: resolved.max_inflight_per_category,
            cache_dir: resolved.cache_dir.clone(),
            buffer_budget: resolved.buffer_budget,
            default_ttl: resolved.default_ttl,
            timeout: resolved.timeout,
            user_agent: resolved.user_agent.clone(),
        }
    }
}

impl ClientConfig {
    fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            max_inflight_per_category: self.max_inflight_per_category,
            default_ttl: self.default_ttl,
            buffer_budget: self.buffer_budget,
        }
    }
}

/// Handle for issuing scheduled, optionally cached GET requests.
#[derive(Debug, Clone)]
pub struct FetchClient {
    scheduler: RequestScheduler,
    cache: Arc<CacheStore>,
}

impl FetchClient {
    /// Create a client on top of `transport`.
    ///
    /// # Errors
    ///
    /// Returns error if the cache directory cannot be created.
    pub fn new(config: &ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let cache = Arc::new(CacheStore::open(&config.cache_dir)?);
        let scheduler =
            RequestScheduler::new(config.scheduler_options(), transport, Arc::clone(&cache));
        tracing::debug!(
            max_inflight = config.max_inflight_per_category,
            cache_dir = %config.cache_dir.display(),
            "Created fetch client"
        );
        Ok(Self { scheduler, cache })
    }

    /// Create a client with a `reqwest` transport.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client or cache directory cannot be created.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.timeout, config.user_agent.as_deref())?;
        Self::new(config, Arc::new(transport))
    }

    /// Issue a request in the default category.
    ///
    /// # Errors
    ///
    /// See [`RequestScheduler::enqueue`].
    pub fn get(
        &self,
        uri: impl Into<String>,
        headers: Headers,
        cancel: CancellationToken,
        callback: Callback,
        flags: RequestFlags,
    ) -> Result<RequestId> {
        self.get_with_category(uri, NO_CATEGORY, headers, cancel, callback, flags)
    }

    /// Issue a request in `category`.
    ///
    /// # Errors
    ///
    /// See [`RequestScheduler::enqueue`].
    pub fn get_with_category(
        &self,
        uri: impl Into<String>,
        category: impl Into<String>,
        headers: Headers,
        cancel: CancellationToken,
        callback: Callback,
        flags: RequestFlags,
    ) -> Result<RequestId> {
        self.scheduler
            .enqueue(uri, category, headers, cancel, callback, flags)
    }

    /// Issue a request in the default category and await its outcome.
    ///
    /// # Errors
    ///
    /// Returns the request's error, or the enqueue error.
    pub async fn fetch(
        &self,
        uri: impl Into<String>,
        headers: Headers,
        cancel: CancellationToken,
        flags: RequestFlags,
    ) -> Result<Body> {
        self.fetch_with_category(uri, NO_CATEGORY, headers, cancel, flags)
            .await
    }

    /// Issue a request in `category` and await its outcome.
    ///
    /// # Errors
    ///
    /// Returns the request's error, or the enqueue error.
    pub async fn fetch_with_category(
        &self,
        uri: impl Into<String>,
        category: impl Into<String>,
        headers: Headers,
        cancel: CancellationToken,
        flags: RequestFlags,
    ) -> Result<Body> {
        let (tx, rx) = oneshot::channel();
        self.get_with_category(
            uri,
            category,
            headers,
            cancel,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
            flags,
        )?;
        rx.await.map_err(|_| FetchqError::Cancelled)?
    }

    #[must_use]
    pub const fn scheduler(&self) -> &RequestScheduler {
        &self.scheduler
    }

    /// Read-only view of the response cache.
    #[must_use]
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Cancel queued requests, wait for in-flight ones, then write the
    /// cache index.
    ///
    /// # Errors
    ///
    /// Returns error if the index cannot be written.
    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.shutdown();
        self.scheduler.wait_idle().await;
        self.cache.persist()
    }
}
