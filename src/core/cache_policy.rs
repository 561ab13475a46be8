//! Cacheability and validator extraction from response headers.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::header::{CACHE_CONTROL, ETAG, EXPIRES, HeaderMap, HeaderName, LAST_MODIFIED, PRAGMA};

/// Expiry applied when the origin sends neither `max-age` nor `Expires`.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

fn header_str(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}

/// Whether a comma-separated header list contains `token` (case-insensitive).
#[must_use]
pub fn header_contains(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    header_str(headers, name).is_some_and(|value| {
        value
            .split(',')
            .any(|item| item.trim().eq_ignore_ascii_case(token))
    })
}

/// `max-age` from `Cache-Control`, if present and well formed.
#[must_use]
pub fn max_age(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, &CACHE_CONTROL)?
        .split(',')
        .filter_map(|directive| {
            let (name, value) = directive.trim().split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("max-age")
                .then(|| value.trim().trim_matches('"').parse().ok())
                .flatten()
        })
        .next()
}

/// Whether the headers allow the response to be stored.
///
/// `Pragma: no-cache`, `Cache-Control: no-cache`, `no-store`, `max-age=0`
/// and `Expires: 0` all forbid it.
#[must_use]
pub fn is_cacheable(headers: &HeaderMap) -> bool {
    if header_contains(headers, &PRAGMA, "no-cache")
        || header_contains(headers, &CACHE_CONTROL, "no-cache")
        || header_contains(headers, &CACHE_CONTROL, "no-store")
    {
        return false;
    }
    if max_age(headers) == Some(0) {
        return false;
    }
    !header_str(headers, &EXPIRES).is_some_and(|v| v.trim() == "0")
}

/// Parse an HTTP date (`Wed, 21 Oct 2015 07:28:00 GMT`).
#[must_use]
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Validation metadata for one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheValidators {
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub expiry: DateTime<Utc>,
}

impl CacheValidators {
    /// Extract validators, computing expiry from `max-age`, then
    /// `Expires`, then `default_ttl`. An unparseable `Expires` means the
    /// response is already expired.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap, now: DateTime<Utc>, default_ttl: Duration) -> Self {
        let last_modified = header_str(headers, &LAST_MODIFIED).and_then(|v| parse_http_date(&v));
        let etag = header_str(headers, &ETAG).filter(|v| !v.is_empty());

        let expiry = if let Some(secs) = max_age(headers) {
            add_secs(now, secs)
        } else if let Some(expires) = header_str(headers, &EXPIRES) {
            parse_http_date(&expires).unwrap_or(now)
        } else {
            add_secs(now, default_ttl.as_secs())
        };

        Self {
            last_modified,
            etag,
            expiry,
        }
    }

    /// Whether there is anything to validate a cached copy against.
    #[must_use]
    pub const fn has_validator(&self) -> bool {
        self.last_modified.is_some() || self.etag.is_some()
    }
}

fn add_secs(now: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
