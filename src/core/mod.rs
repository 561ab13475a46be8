//! Request scheduling, transport, and response handling.

pub mod body;
pub mod cache_policy;
pub mod client;
pub mod download;
pub mod http;
pub mod logging;
pub mod scheduler;

pub use body::{Body, BodySource, ByteStream};
pub use cache_policy::CacheValidators;
pub use client::{ClientConfig, FetchClient};
pub use download::BufferedDownloader;
pub use http::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
pub use scheduler::{
    Callback, NO_CATEGORY, RequestFlags, RequestId, RequestScheduler, SchedulerOptions,
    SchedulerStats,
};
