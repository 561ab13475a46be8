//! Response bodies handed to request callbacks.
//!
//! A body is either the live network stream, bytes that were buffered while
//! being written to the cache, or an open cache blob.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

use crate::error::{FetchqError, Result};

/// Boxed stream of body chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Where a body's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySource {
    /// Straight from the transport, unread.
    Network,
    /// Read from the transport into memory (and possibly cached).
    Downloaded,
    /// Served from the disk cache.
    Cache,
}

enum BodyKind {
    Stream(ByteStream),
    Buffered(Bytes),
    File(tokio::fs::File),
}

/// A response body.
pub struct Body {
    kind: BodyKind,
}

impl Body {
    /// Wrap a live transport stream.
    #[must_use]
    pub fn from_stream(stream: ByteStream) -> Self {
        Self {
            kind: BodyKind::Stream(stream),
        }
    }

    /// Wrap bytes that have already been read.
    #[must_use]
    pub const fn from_bytes(bytes: Bytes) -> Self {
        Self {
            kind: BodyKind::Buffered(bytes),
        }
    }

    /// Wrap an open cache blob.
    #[must_use]
    pub const fn from_file(file: tokio::fs::File) -> Self {
        Self {
            kind: BodyKind::File(file),
        }
    }

    #[must_use]
    pub const fn source(&self) -> BodySource {
        match self.kind {
            BodyKind::Stream(_) => BodySource::Network,
            BodyKind::Buffered(_) => BodySource::Downloaded,
            BodyKind::File(_) => BodySource::Cache,
        }
    }

    /// Buffered bytes, if this body is already in memory.
    #[must_use]
    pub const fn as_bytes(&self) -> Option<&Bytes> {
        match &self.kind {
            BodyKind::Buffered(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Read the whole body into memory.
    ///
    /// # Errors
    ///
    /// Returns the stream's error, or an I/O error reading a cache blob.
    pub async fn bytes(self) -> Result<Bytes> {
        match self.kind {
            BodyKind::Buffered(bytes) => Ok(bytes),
            BodyKind::File(mut file) => {
                let mut buf = Vec::new();
                file.read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
            BodyKind::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.try_next().await? {
                    buf.extend_from_slice(&chunk);
                }
                Ok(buf.freeze())
            }
        }
    }

    /// Convert into a chunk stream regardless of origin.
    #[must_use]
    pub fn into_stream(self) -> ByteStream {
        match self.kind {
            BodyKind::Stream(stream) => stream,
            BodyKind::Buffered(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            BodyKind::File(file) => ReaderStream::new(file).map_err(FetchqError::from).boxed(),
        }
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dbg = f.debug_struct("Body");
        dbg.field("source", &self.source());
        if let Some(bytes) = self.as_bytes() {
            dbg.field("len", &bytes.len());
        }
        dbg.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunks(parts: &[&'static [u8]]) -> ByteStream {
        let items: Vec<Result<Bytes>> = parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn stream_body_collects_all_chunks() {
        let body = Body::from_stream(chunks(&[b"hello ", b"world"]));
        assert_eq!(body.source(), BodySource::Network);
        assert_eq!(body.bytes().await.unwrap(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn stream_error_is_propagated() {
        let items: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"part")),
            Err(FetchqError::Transport {
                uri: "u".to_string(),
                message: "reset".to_string(),
            }),
        ];
        let body = Body::from_stream(stream::iter(items).boxed());
        assert!(matches!(
            body.bytes().await,
            Err(FetchqError::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn file_body_reads_blob() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blob");
        std::fs::write(&path, b"cached").unwrap();

        let file = tokio::fs::File::open(&path).await.unwrap();
        let body = Body::from_file(file);
        assert_eq!(body.source(), BodySource::Cache);
        assert!(body.as_bytes().is_none());

        let collected: Vec<Bytes> = body.into_stream().try_collect().await.unwrap();
        assert_eq!(collected.concat(), b"cached");
    }

    #[tokio::test]
    async fn buffered_body_is_available_without_reading() {
        let body = Body::from_bytes(Bytes::from_static(b"abc"));
        assert_eq!(body.source(), BodySource::Downloaded);
        assert_eq!(body.as_bytes().map(Bytes::len), Some(3));
        assert_eq!(format!("{body:?}"), "Body { source: Downloaded, len: 3 }");
    }
}
