//! Test utilities for fetchq.
//!
//! Provides a scripted transport, response factories, callback helpers and
//! an isolated directory type for use across all test modules.
//!
//! # Usage
//!
//! ```rust,ignore
//! use fetchq::test_utils::*;
//!
//! let transport = Arc::new(MockTransport::new());
//! // ... enqueue requests through a scheduler built on `transport` ...
//! transport.wait_for_calls(2).await;
//! transport.respond("https://example.com/a", response(200, &[], b"ok"));
//! ```

use std::fs;
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::{Notify, mpsc, oneshot};

use crate::core::body::Body;
use crate::core::http::{Transport, TransportRequest, TransportResponse};
use crate::core::scheduler::Callback;
use crate::error::{FetchqError, Result};

/// How long helpers wait for background tasks before failing a test.
pub const TEST_WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Scripted transport
// =============================================================================

struct PendingCall {
    request: TransportRequest,
    reply: oneshot::Sender<Result<TransportResponse>>,
}

/// A [`Transport`] whose calls stay open until the test answers them.
///
/// Every `send` is recorded and parks until [`respond`](Self::respond) or
/// [`fail`](Self::fail) is called for its URI. Dropping the parked future
/// (cancellation) simply discards the reply channel.
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<TransportRequest>>,
    pending: Mutex<Vec<PendingCall>>,
    changed: Notify,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request sent so far, in dispatch order.
    ///
    /// # Panics
    ///
    /// Panics if the call log lock is poisoned.
    #[must_use]
    pub fn calls(&self) -> Vec<TransportRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// URIs sent so far, in dispatch order.
    #[must_use]
    pub fn dispatched(&self) -> Vec<String> {
        self.calls().into_iter().map(|r| r.uri).collect()
    }

    /// URIs currently awaiting a reply.
    ///
    /// # Panics
    ///
    /// Panics if the pending lock is poisoned.
    #[must_use]
    pub fn open_calls(&self) -> Vec<String> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .filter(|call| !call.reply.is_closed())
            .map(|call| call.request.uri.clone())
            .collect()
    }

    /// Wait until at least `count` requests have been sent.
    ///
    /// # Panics
    ///
    /// Panics if that does not happen within [`TEST_WAIT`].
    pub async fn wait_for_calls(&self, count: usize) {
        let wait = async {
            loop {
                let notified = self.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.calls.lock().unwrap().len() >= count {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(TEST_WAIT, wait).await.is_err() {
            panic!(
                "expected {count} transport calls, saw {:?}",
                self.dispatched()
            );
        }
    }

    /// Answer the oldest open call for `uri`. Returns false if none is open.
    ///
    /// # Panics
    ///
    /// Panics if the pending lock is poisoned.
    pub fn respond(&self, uri: &str, response: TransportResponse) -> bool {
        self.reply(uri, Ok(response))
    }

    /// Fail the oldest open call for `uri` with a transport error.
    pub fn fail(&self, uri: &str, message: &str) -> bool {
        self.reply(
            uri,
            Err(FetchqError::Transport {
                uri: uri.to_string(),
                message: message.to_string(),
            }),
        )
    }

    fn reply(&self, uri: &str, result: Result<TransportResponse>) -> bool {
        let call = {
            let mut pending = self.pending.lock().unwrap();
            pending.retain(|call| !call.reply.is_closed());
            pending
                .iter()
                .position(|call| call.request.uri == uri)
                .map(|pos| pending.remove(pos))
        };
        call.is_some_and(|call| call.reply.send(result).is_ok())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let (reply, answer) = oneshot::channel();
        let uri = request.uri.clone();
        self.calls.lock().unwrap().push(request.clone());
        self.pending
            .lock()
            .unwrap()
            .push(PendingCall { request, reply });
        self.changed.notify_waiters();

        answer.await.unwrap_or_else(|_| {
            Err(FetchqError::Transport {
                uri,
                message: "mock reply dropped".to_string(),
            })
        })
    }
}

// =============================================================================
// Response factories
// =============================================================================

/// Build a response with a `Content-Length` matching `body`.
///
/// # Panics
///
/// Panics if a header name or value is invalid.
#[must_use]
pub fn response(status: u16, headers: &[(&str, &str)], body: &'static [u8]) -> TransportResponse {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.append(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    TransportResponse {
        status,
        headers: map,
        content_length: Some(body.len() as u64),
        body: stream::iter(vec![Ok(Bytes::from_static(body))]).boxed(),
    }
}

/// Like [`response`] but split into chunks, with an explicit length hint.
#[must_use]
pub fn chunked_response(
    headers: &[(&str, &str)],
    chunks: Vec<&'static str>,
    content_length: Option<u64>,
) -> TransportResponse {
    let mut base = response(200, headers, b"");
    base.content_length = content_length;
    base.body = stream::iter(
        chunks
            .into_iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes()))),
    )
    .boxed();
    base
}

// =============================================================================
// Callback helpers
// =============================================================================

/// A callback that forwards its outcome, tagged with `label`, into `tx`.
#[must_use]
pub fn recording_callback(
    tx: &mpsc::UnboundedSender<(String, Result<Body>)>,
    label: impl Into<String>,
) -> Callback {
    let tx = tx.clone();
    let label = label.into();
    Box::new(move |result| {
        let _ = tx.send((label, result));
    })
}

/// Receive the next outcome or fail after [`TEST_WAIT`].
///
/// # Panics
///
/// Panics on timeout or if every sender was dropped.
pub async fn next_outcome(
    rx: &mut mpsc::UnboundedReceiver<(String, Result<Body>)>,
) -> (String, Result<Body>) {
    tokio::time::timeout(TEST_WAIT, rx.recv())
        .await
        .expect("timed out waiting for a callback")
        .expect("callback channel closed")
}

// =============================================================================
// Isolated directories
// =============================================================================

/// Isolated temporary directory for tests.
///
/// # Examples
///
/// ```rust,ignore
/// use fetchq::test_utils::TestDir;
///
/// let dir = TestDir::new();
/// dir.create_file("config.toml", "[scheduler]\nmax_inflight_per_category = 2");
/// assert!(dir.file_exists("config.toml"));
/// ```
pub struct TestDir {
    inner: tempfile::TempDir,
}

impl TestDir {
    /// Create a new isolated temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: tempfile::tempdir().expect("Failed to create temp directory"),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Create a file with the given content, creating parent directories.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be created or written.
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.inner.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        let mut file = fs::File::create(&path).expect("Failed to create test file");
        file.write_all(content.as_bytes())
            .expect("Failed to write test file");
    }

    #[must_use]
    pub fn file_exists(&self, name: &str) -> bool {
        self.inner.path().join(name).exists()
    }

    #[must_use]
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.inner.path().join(name)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

/// Sample configuration file exercising every section.
#[must_use]
pub fn make_test_config_toml() -> String {
    r#"
[scheduler]
max_inflight_per_category = 2

[cache]
directory = "/tmp/fetchq-test-cache"
buffer_budget = 1024
default_ttl_seconds = 60

[http]
timeout_seconds = 5
user_agent = "fetchq-test/1.0"
"#
    .to_string()
}
