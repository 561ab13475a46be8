//! Bounded buffering of response bodies before they are cached.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::body::ByteStream;
use crate::error::{FetchqError, Result};

/// Largest body that will be buffered for caching (2 MB).
pub const DEFAULT_BUFFER_BUDGET: usize = 2 * 1000 * 1024;

/// Initial allocation when the body length is unknown.
const UNKNOWN_LENGTH_CAPACITY: usize = 64 * 1024;

/// Reads a body into a fixed-size budget.
#[derive(Debug, Clone, Copy)]
pub struct BufferedDownloader {
    budget: usize,
}

impl Default for BufferedDownloader {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_BUDGET)
    }
}

impl BufferedDownloader {
    #[must_use]
    pub const fn new(budget: usize) -> Self {
        Self { budget }
    }

    #[must_use]
    pub const fn budget(&self) -> usize {
        self.budget
    }

    /// Reject a body whose advertised length cannot fit the budget.
    ///
    /// # Errors
    ///
    /// Returns `ResponseTooLarge` when `content_length` exceeds the budget.
    pub fn check_length(&self, content_length: Option<u64>) -> Result<()> {
        match content_length {
            Some(len) if len > self.budget as u64 => Err(FetchqError::ResponseTooLarge {
                content_length: len,
                budget: self.budget,
            }),
            _ => Ok(()),
        }
    }

    /// Fill a buffer from `body`.
    ///
    /// With a known length, reads exactly that many bytes and discards any
    /// excess. Without one, reads to end of stream and fails once the
    /// budget is exceeded.
    ///
    /// # Errors
    ///
    /// `ResponseTooLarge` (checked before the first read when the length is
    /// known), `Cancelled` if `cancel` fires between chunks, the stream's
    /// own error, or `UnexpectedEof` when the stream ends short.
    pub async fn download(
        &self,
        mut body: ByteStream,
        content_length: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        self.check_length(content_length)?;

        // check_length guarantees a known length fits in usize
        let limit = content_length.map_or(self.budget, |len| len as usize);
        let mut buffer = BytesMut::with_capacity(
            content_length.map_or(UNKNOWN_LENGTH_CAPACITY.min(self.budget), |_| limit),
        );

        while content_length.is_none() || buffer.len() < limit {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FetchqError::Cancelled),
                next = body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    let room = limit - buffer.len();
                    if chunk.len() > room {
                        if content_length.is_none() {
                            return Err(FetchqError::ResponseTooLarge {
                                content_length: (buffer.len() + chunk.len()) as u64,
                                budget: self.budget,
                            });
                        }
                        tracing::debug!(
                            discarded = chunk.len() - room,
                            "Body longer than Content-Length, truncating"
                        );
                        buffer.extend_from_slice(&chunk[..room]);
                    } else {
                        buffer.extend_from_slice(&chunk);
                    }
                    tracing::trace!(
                        bytes_read = buffer.len(),
                        expected = ?content_length,
                        "Filled buffer"
                    );
                }
                Some(Err(e)) => return Err(e),
                None => {
                    if content_length.is_some() {
                        return Err(FetchqError::Io(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            format!("body ended after {} of {} bytes", buffer.len(), limit),
                        )));
                    }
                    break;
                }
            }
        }

        Ok(buffer.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_pending, assert_ready_ok, task};

    fn chunked(parts: Vec<&'static str>) -> ByteStream {
        stream::iter(parts.into_iter().map(|p| Ok(Bytes::from_static(p.as_bytes())))).boxed()
    }

    #[tokio::test]
    async fn reads_exact_content_length_across_chunks() {
        let downloader = BufferedDownloader::new(16);
        let cancel = CancellationToken::new();
        let data = downloader
            .download(chunked(vec!["abc", "defg", "hi"]), Some(9), &cancel)
            .await
            .unwrap();
        assert_eq!(&data[..], b"abcdefghi");
    }

    #[tokio::test]
    async fn too_large_is_rejected_without_reading() {
        let polled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polled);
        let body = stream::iter(vec![Bytes::from_static(b"x")])
            .map(move |chunk| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(chunk)
            })
            .boxed();

        let downloader = BufferedDownloader::new(4);
        let err = downloader
            .download(body, Some(5), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FetchqError::ResponseTooLarge {
                content_length: 5,
                budget: 4
            }
        ));
        assert_eq!(polled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_length_reads_to_end() {
        let downloader = BufferedDownloader::new(16);
        let data = downloader
            .download(chunked(vec!["one", "two"]), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(&data[..], b"onetwo");
    }

    #[tokio::test]
    async fn unknown_length_over_budget_fails() {
        let downloader = BufferedDownloader::new(4);
        let err = downloader
            .download(chunked(vec!["abc", "def"]), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchqError::ResponseTooLarge { budget: 4, .. }));
    }

    #[tokio::test]
    async fn short_body_is_an_error() {
        let downloader = BufferedDownloader::default();
        let err = downloader
            .download(chunked(vec!["abc"]), Some(10), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            FetchqError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn excess_bytes_are_truncated() {
        let downloader = BufferedDownloader::default();
        let data = downloader
            .download(chunked(vec!["abcdef"]), Some(4), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(&data[..], b"abcd");
    }

    #[tokio::test]
    async fn zero_length_body_is_empty() {
        let downloader = BufferedDownloader::default();
        let data = downloader
            .download(stream::pending().boxed(), Some(0), &CancellationToken::new())
            .await
            .unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn cancellation_mid_fill_stops() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let body = stream::iter(vec![Ok(Bytes::from_static(b"ab"))])
            .chain(stream::pending())
            .boxed();

        let downloader = BufferedDownloader::default();
        let task = tokio::spawn(async move { downloader.download(body, Some(10), &cancel).await });
        tokio::task::yield_now().await;
        trigger.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(FetchqError::Cancelled)));
    }

    #[tokio::test]
    async fn stream_error_is_propagated() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Err(FetchqError::Transport {
                uri: "https://example.com".to_string(),
                message: "connection reset".to_string(),
            }),
        ])
        .boxed();
        let err = BufferedDownloader::default()
            .download(body, Some(10), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchqError::Transport { .. }));
    }

    #[test]
    fn waits_for_slow_chunks() {
        let (tx, rx) = futures::channel::mpsc::unbounded::<Result<Bytes>>();
        let downloader = BufferedDownloader::new(16);
        let cancel = CancellationToken::new();
        let mut pending = task::spawn(downloader.download(rx.boxed(), Some(6), &cancel));

        assert_pending!(pending.poll());
        tx.unbounded_send(Ok(Bytes::from_static(b"abc"))).unwrap();
        assert!(pending.is_woken());
        assert_pending!(pending.poll());

        tx.unbounded_send(Ok(Bytes::from_static(b"def"))).unwrap();
        let data = assert_ready_ok!(pending.poll());
        assert_eq!(&data[..], b"abcdef");
    }
}
