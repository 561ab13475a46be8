//! Request scheduler with per-category admission control.
//!
//! Requests are queued in arrival order and dispatched to the
//! [`Transport`] while their category has fewer than
//! `max_inflight_per_category` requests outstanding. Each completion frees a
//! slot and re-runs dispatch.
//!
//! Every accepted request resolves its callback exactly once, with a
//! [`Body`] or one [`FetchqError`]. Nothing is retried.
//!
//! Cancellation:
//! - a queued request whose token fires is removed and resolved with
//!   `Cancelled`;
//! - an in-flight transport call is raced against the token and dropped;
//! - a token that fires after the transport answered is still honoured at
//!   completion, before any body is read.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bitflags::bitflags;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

use super::body::Body;
use super::cache_policy::{self, CacheValidators};
use super::download::BufferedDownloader;
use super::http::{Headers, Transport, TransportRequest, TransportResponse};
use crate::error::{FetchqError, Result};
use crate::storage::cache::CacheStore;

/// Category used by requests that do not name one.
pub const NO_CATEGORY: &str = "_NO_CATEGORY";

/// Default concurrency limit for each category.
pub const DEFAULT_MAX_INFLIGHT_PER_CATEGORY: usize = 4;

bitflags! {
    /// How a successful response is handed back.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RequestFlags: u8 {
        /// Hand the caller the live response stream.
        const RETURN_STREAM = 1;
        /// Serve from or store into the response cache.
        const CACHE_RESPONSE = 1 << 1;
    }
}

/// Receives the outcome of one request.
pub type Callback = Box<dyn FnOnce(Result<Body>) + Send + 'static>;

/// Identifier assigned to an accepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Counters over the scheduler's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub enqueued: u64,
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Construction-time scheduler settings.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    pub max_inflight_per_category: usize,
    pub default_ttl: Duration,
    pub buffer_budget: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_inflight_per_category: DEFAULT_MAX_INFLIGHT_PER_CATEGORY,
            default_ttl: cache_policy::DEFAULT_TTL,
            buffer_budget: super::download::DEFAULT_BUFFER_BUDGET,
        }
    }
}

struct PendingRequest {
    id: RequestId,
    uri: String,
    category: String,
    headers: Headers,
    cancel: CancellationToken,
    callback: Callback,
    flags: RequestFlags,
    watcher: Option<AbortHandle>,
}

impl PendingRequest {
    fn disarm(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

#[derive(Default)]
struct SchedulerState {
    queue: VecDeque<PendingRequest>,
    inflight: HashMap<String, usize>,
    peak: HashMap<String, usize>,
    active: usize,
    shut_down: bool,
    stats: SchedulerStats,
}

impl SchedulerState {
    /// Remove queued requests whose token has already fired.
    fn take_cancelled(&mut self) -> Vec<PendingRequest> {
        let (cancelled, kept): (Vec<_>, Vec<_>) = self
            .queue
            .drain(..)
            .partition(|request| request.cancel.is_cancelled());
        self.queue = kept.into();
        cancelled
    }

    /// Remove every queued request that fits its category's budget, in
    /// queue order, claiming a slot for each.
    fn take_ready(&mut self, max_inflight: usize) -> Vec<PendingRequest> {
        let mut ready = Vec::new();
        let mut waiting = VecDeque::with_capacity(self.queue.len());

        for request in self.queue.drain(..) {
            let count = self.inflight.entry(request.category.clone()).or_insert(0);
            if *count < max_inflight {
                *count += 1;
                let peak = self.peak.entry(request.category.clone()).or_insert(0);
                *peak = (*peak).max(*count);
                ready.push(request);
            } else {
                waiting.push_back(request);
            }
        }

        self.queue = waiting;
        self.active += ready.len();
        self.stats.dispatched += ready.len() as u64;
        ready
    }

    fn release(&mut self, category: &str) {
        if let Some(count) = self.inflight.get_mut(category) {
            *count = count.saturating_sub(1);
        }
    }

    fn record(&mut self, result: &Result<Body>) {
        match result {
            Ok(_) => self.stats.succeeded += 1,
            Err(FetchqError::Cancelled) => self.stats.cancelled += 1,
            Err(_) => self.stats.failed += 1,
        }
    }
}

struct Inner {
    options: SchedulerOptions,
    transport: Arc<dyn Transport>,
    cache: Arc<CacheStore>,
    downloader: BufferedDownloader,
    state: Mutex<SchedulerState>,
    next_id: AtomicU64,
    idle: Notify,
}

/// Marks a dispatched request as finished when dropped, including when the
/// callback panics.
struct ActiveGuard(Arc<Inner>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        Inner::pump(&self.0);
        self.0.finish();
    }
}

/// What completion decided without touching the body.
enum Disposition {
    Resolved(Result<Body>),
    Cache(TransportResponse),
    Buffer(TransportResponse),
}

/// Queues requests and dispatches them under per-category limits.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct RequestScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RequestScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScheduler")
            .field("options", &self.inner.options)
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

impl RequestScheduler {
    /// Create a scheduler.
    ///
    /// A `max_inflight_per_category` of zero is raised to one.
    #[must_use]
    pub fn new(
        mut options: SchedulerOptions,
        transport: Arc<dyn Transport>,
        cache: Arc<CacheStore>,
    ) -> Self {
        options.max_inflight_per_category = options.max_inflight_per_category.max(1);
        Self {
            inner: Arc::new(Inner {
                downloader: BufferedDownloader::new(options.buffer_budget),
                options,
                transport,
                cache,
                state: Mutex::new(SchedulerState::default()),
                next_id: AtomicU64::new(0),
                idle: Notify::new(),
            }),
        }
    }

    #[must_use]
    pub fn options(&self) -> &SchedulerOptions {
        &self.inner.options
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.inner.cache
    }

    /// Queue a request and dispatch whatever now fits.
    ///
    /// On error the callback is dropped without being called; the returned
    /// error is the request's only outcome.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for an empty `uri`, `category` or `flags`;
    /// `Cancelled` after [`shutdown`](Self::shutdown).
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn enqueue(
        &self,
        uri: impl Into<String>,
        category: impl Into<String>,
        headers: Headers,
        cancel: CancellationToken,
        callback: Callback,
        flags: RequestFlags,
    ) -> Result<RequestId> {
        let uri = uri.into();
        let category = category.into();
        if uri.is_empty() {
            return Err(FetchqError::InvalidRequest("empty uri".to_string()));
        }
        if category.is_empty() {
            return Err(FetchqError::InvalidRequest("empty category".to_string()));
        }
        if flags.is_empty() {
            return Err(FetchqError::InvalidRequest(
                "no response handling flags set".to_string(),
            ));
        }

        let id = RequestId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let watcher = spawn_watcher(Arc::downgrade(&self.inner), id, cancel.clone());

        {
            let mut state = self.inner.lock();
            if state.shut_down {
                watcher.abort();
                return Err(FetchqError::Cancelled);
            }
            state.stats.enqueued += 1;
            tracing::debug!(%id, uri = %uri, category = %category, ?flags, "Queued request");
            state.queue.push_back(PendingRequest {
                id,
                uri,
                category,
                headers,
                cancel,
                callback,
                flags,
                watcher: Some(watcher),
            });
        }

        Inner::pump(&self.inner);
        Ok(id)
    }

    /// Resolve every queued request with `Cancelled` and refuse new ones.
    ///
    /// In-flight requests run to completion.
    pub fn shutdown(&self) {
        let drained: Vec<PendingRequest> = {
            let mut state = self.inner.lock();
            state.shut_down = true;
            state.queue.drain(..).collect()
        };
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "Cancelling queued requests at shutdown");
        }
        for mut request in drained {
            request.disarm();
            self.inner.resolve(request.id, request.callback, Err(FetchqError::Cancelled));
        }
    }

    /// Wait until no dispatched request or cache write is outstanding.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.lock().active == 0 {
                return;
            }
            notified.await;
        }
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().shut_down
    }

    /// Requests of `category` currently dispatched.
    #[must_use]
    pub fn inflight(&self, category: &str) -> usize {
        self.inner.lock().inflight.get(category).copied().unwrap_or(0)
    }

    /// Highest concurrent dispatch count seen for `category`.
    #[must_use]
    pub fn peak_inflight(&self, category: &str) -> usize {
        self.inner.lock().peak.get(category).copied().unwrap_or(0)
    }

    /// Requests waiting for a slot.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.inner.lock().stats
    }
}

/// Resolve `id` with `Cancelled` if its token fires while it is still queued.
fn spawn_watcher(inner: Weak<Inner>, id: RequestId, cancel: CancellationToken) -> AbortHandle {
    tokio::spawn(async move {
        cancel.cancelled().await;
        if let Some(inner) = inner.upgrade() {
            inner.cancel_queued(id);
        }
    })
    .abort_handle()
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, id: RequestId, callback: Callback, result: Result<Body>) {
        self.lock().record(&result);
        match &result {
            Ok(body) => tracing::debug!(%id, source = ?body.source(), "Request resolved"),
            Err(e) => tracing::debug!(%id, error = %e, "Request resolved with error"),
        }
        callback(result);
    }

    fn cancel_queued(&self, id: RequestId) {
        let removed = {
            let mut state = self.lock();
            state
                .queue
                .iter()
                .position(|request| request.id == id)
                .and_then(|pos| state.queue.remove(pos))
        };
        if let Some(request) = removed {
            tracing::debug!(%id, uri = %request.uri, "Queued request cancelled");
            self.resolve(id, request.callback, Err(FetchqError::Cancelled));
        }
    }

    fn pump(this: &Arc<Self>) {
        let (cancelled, ready) = {
            let mut state = this.lock();
            let cancelled = state.take_cancelled();
            let ready = state.take_ready(this.options.max_inflight_per_category);
            (cancelled, ready)
        };

        for mut request in cancelled {
            request.disarm();
            this.resolve(request.id, request.callback, Err(FetchqError::Cancelled));
        }

        for mut request in ready {
            request.disarm();
            tracing::debug!(
                id = %request.id,
                uri = %request.uri,
                category = %request.category,
                "Dispatching request"
            );
            tokio::spawn(Self::execute(Arc::clone(this), request));
        }
    }

    async fn execute(this: Arc<Self>, request: PendingRequest) {
        let PendingRequest {
            id,
            uri,
            category,
            headers,
            cancel,
            callback,
            flags,
            ..
        } = request;
        let _active = ActiveGuard(Arc::clone(&this));

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(FetchqError::Cancelled),
            result = this.transport.send(TransportRequest { uri: uri.clone(), headers }) => result,
        };

        this.lock().release(&category);
        let disposition = Self::dispose(&uri, &cancel, flags, outcome);

        let pending_write = match disposition {
            Disposition::Resolved(result) => {
                this.resolve(id, callback, result);
                None
            }
            Disposition::Cache(response) => {
                Self::pump(&this);
                let (result, write) = this.serve_cacheable(&uri, flags, response, &cancel).await;
                this.resolve(id, callback, result);
                write
            }
            Disposition::Buffer(response) => {
                Self::pump(&this);
                let result = this
                    .downloader
                    .download(response.body, response.content_length, &cancel)
                    .await
                    .map(Body::from_bytes);
                this.resolve(id, callback, result);
                None
            }
        };

        if let Some(write) = pending_write
            && let Err(e) = write.await
        {
            tracing::warn!(%id, error = %e, "Cache write task failed");
        }
    }

    fn finish(&self) {
        let idle = {
            let mut state = self.lock();
            state.active = state.active.saturating_sub(1);
            state.active == 0
        };
        if idle {
            self.idle.notify_waiters();
        }
    }

    fn dispose(
        uri: &str,
        cancel: &CancellationToken,
        flags: RequestFlags,
        outcome: Result<TransportResponse>,
    ) -> Disposition {
        if cancel.is_cancelled() {
            return Disposition::Resolved(Err(FetchqError::Cancelled));
        }

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(uri, error = %e, "Transport error");
                return Disposition::Resolved(Err(e));
            }
        };

        if !response.is_success() {
            tracing::warn!(uri, status = response.status, "Received unsuccessful response");
            return Disposition::Resolved(Err(FetchqError::UnsuccessfulResponse {
                uri: uri.to_string(),
                status: response.status,
                reason: response.reason().to_string(),
            }));
        }

        let cacheable = cache_policy::is_cacheable(&response.headers);
        if flags.contains(RequestFlags::CACHE_RESPONSE) && cacheable {
            Disposition::Cache(response)
        } else if flags.contains(RequestFlags::RETURN_STREAM) {
            Disposition::Resolved(Ok(Body::from_stream(response.body)))
        } else {
            tracing::debug!(uri, "Response not cacheable, returning it uncached");
            Disposition::Buffer(response)
        }
    }

    /// Serve a fresh cached copy or download and cache the response.
    async fn serve_cacheable(
        &self,
        uri: &str,
        flags: RequestFlags,
        response: TransportResponse,
        cancel: &CancellationToken,
    ) -> (Result<Body>, Option<JoinHandle<()>>) {
        let validators =
            CacheValidators::from_headers(&response.headers, Utc::now(), self.options.default_ttl);

        if validators.has_validator()
            && !self
                .cache
                .is_stale(uri, validators.last_modified, validators.etag.as_deref())
        {
            match self.cache.get_stream(uri).await {
                Ok(file) => {
                    tracing::debug!(uri, "Cache hit");
                    self.lock().stats.cache_hits += 1;
                    return (Ok(Body::from_file(file)), None);
                }
                Err(e) => {
                    tracing::warn!(uri, error = %e, "Cached blob unreadable, downloading");
                }
            }
        }

        tracing::debug!(uri, "Cache miss");
        self.lock().stats.cache_misses += 1;

        if let Err(e) = self.downloader.check_length(response.content_length) {
            if flags.contains(RequestFlags::RETURN_STREAM) {
                tracing::debug!(uri, error = %e, "Too large to cache, returning stream");
                return (Ok(Body::from_stream(response.body)), None);
            }
            tracing::warn!(uri, error = %e, "Response too large to cache");
            return (Err(e), None);
        }

        match self
            .downloader
            .download(response.body, response.content_length, cancel)
            .await
        {
            Ok(data) => {
                let write = self.cache.save(
                    uri,
                    data.clone(),
                    validators.last_modified,
                    validators.expiry,
                    validators.etag.as_deref(),
                );
                (Ok(Body::from_bytes(data)), write)
            }
            Err(e) => (Err(e), None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockTransport, recording_callback, response};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn scheduler(max: usize, transport: &Arc<MockTransport>, dir: &TempDir) -> RequestScheduler {
        let cache = Arc::new(CacheStore::open(dir.path()).unwrap());
        RequestScheduler::new(
            SchedulerOptions {
                max_inflight_per_category: max,
                ..SchedulerOptions::default()
            },
            Arc::clone(transport) as Arc<dyn Transport>,
            cache,
        )
    }

    fn noop() -> Callback {
        Box::new(|_| {})
    }

    fn stream(
        scheduler: &RequestScheduler,
        uri: impl Into<String>,
        category: &str,
        callback: Callback,
    ) -> Result<RequestId> {
        scheduler.enqueue(
            uri,
            category,
            Vec::new(),
            CancellationToken::new(),
            callback,
            RequestFlags::RETURN_STREAM,
        )
    }

    #[tokio::test]
    async fn rejects_invalid_requests_without_callback() {
        let tmp = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        let scheduler = scheduler(2, &transport, &tmp);
        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let flag = Arc::clone(&called);
        let err = scheduler
            .enqueue(
                "",
                NO_CATEGORY,
                Vec::new(),
                CancellationToken::new(),
                Box::new(move |_| flag.store(true, std::sync::atomic::Ordering::SeqCst)),
                RequestFlags::RETURN_STREAM,
            )
            .unwrap_err();
        assert!(matches!(err, FetchqError::InvalidRequest(_)));

        for (category, flags) in [("", RequestFlags::RETURN_STREAM), ("c", RequestFlags::empty())] {
            let err = scheduler
                .enqueue("https://a", category, Vec::new(), CancellationToken::new(), noop(), flags)
                .unwrap_err();
            assert!(matches!(err, FetchqError::InvalidRequest(_)));
        }

        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(scheduler.queued(), 0);
        assert_eq!(scheduler.stats().enqueued, 0);
    }

    #[tokio::test]
    async fn admission_is_bounded_per_category() {
        let tmp = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        let scheduler = scheduler(2, &transport, &tmp);

        for i in 0..5 {
            stream(&scheduler, format!("https://a/{i}"), "a", noop()).unwrap();
        }
        stream(&scheduler, "https://b/0", "b", noop()).unwrap();

        assert_eq!(scheduler.inflight("a"), 2);
        assert_eq!(scheduler.inflight("b"), 1);
        assert_eq!(scheduler.queued(), 3);
        assert_eq!(scheduler.peak_inflight("a"), 2);
    }

    #[tokio::test]
    async fn zero_limit_is_treated_as_one() {
        let tmp = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        let scheduler = scheduler(0, &transport, &tmp);
        assert_eq!(scheduler.options().max_inflight_per_category, 1);

        stream(&scheduler, "https://a", "c", noop()).unwrap();
        assert_eq!(scheduler.inflight("c"), 1);
    }

    #[tokio::test]
    async fn unsuccessful_status_carries_code() {
        let tmp = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        let scheduler = scheduler(1, &transport, &tmp);
        let (tx, mut rx) = mpsc::unbounded_channel();

        stream(&scheduler, "https://a/missing", "c", recording_callback(&tx, "r")).unwrap();
        transport.wait_for_calls(1).await;
        assert!(transport.respond("https://a/missing", response(404, &[], b"nope")));

        let (_, result) = rx.recv().await.unwrap();
        assert_eq!(result.unwrap_err().status_code(), Some(404));
        assert_eq!(scheduler.inflight("c"), 0);
        assert_eq!(scheduler.stats().failed, 1);
    }

    #[tokio::test]
    async fn transport_error_is_forwarded() {
        let tmp = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        let scheduler = scheduler(1, &transport, &tmp);
        let (tx, mut rx) = mpsc::unbounded_channel();

        stream(&scheduler, "https://a", "c", recording_callback(&tx, "r")).unwrap();
        transport.wait_for_calls(1).await;
        transport.fail("https://a", "connection refused");

        let (_, result) = rx.recv().await.unwrap();
        assert!(matches!(
            result,
            Err(FetchqError::Transport { message, .. }) if message == "connection refused"
        ));
    }

    #[tokio::test]
    async fn shutdown_cancels_queue_and_rejects_new_requests() {
        let tmp = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        let scheduler = scheduler(1, &transport, &tmp);
        let (tx, mut rx) = mpsc::unbounded_channel();

        for label in ["first", "second"] {
            let uri = format!("https://a/{label}");
            stream(&scheduler, uri, "c", recording_callback(&tx, label)).unwrap();
        }

        scheduler.shutdown();
        let (label, result) = rx.recv().await.unwrap();
        assert_eq!(label, "second");
        assert!(matches!(result, Err(FetchqError::Cancelled)));

        let err = stream(&scheduler, "https://a/late", "c", noop()).unwrap_err();
        assert!(err.is_cancelled());

        transport.wait_for_calls(1).await;
        transport.respond("https://a/first", response(200, &[], b"ok"));
        let (label, result) = rx.recv().await.unwrap();
        assert_eq!(label, "first");
        assert!(result.is_ok());

        scheduler.wait_idle().await;
        assert_eq!(transport.calls().len(), 1);
    }
}
