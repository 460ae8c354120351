//! Quota snapshot extraction from upstream rate-limit headers.
//!
//! The upstream reports its quota window via `x-ratelimit-*` response
//! headers plus `retry-after` on explicit throttling. Headers are advisory
//! metadata: a missing or malformed value must never fail the call, so
//! every field degrades to a configured default (full limit) rather than
//! zero, so a single noisy response cannot force the critical strategy or
//! trip the breaker.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use tracing::warn;

use crate::config::QuotaDefaults;

/// Rate-limit header names, as sent by OpenAI-compatible APIs.
pub const HEADER_LIMIT_REQUESTS: &str = "x-ratelimit-limit-requests";
pub const HEADER_REMAINING_REQUESTS: &str = "x-ratelimit-remaining-requests";
pub const HEADER_RESET_REQUESTS: &str = "x-ratelimit-reset-requests";
pub const HEADER_LIMIT_TOKENS: &str = "x-ratelimit-limit-tokens";
pub const HEADER_REMAINING_TOKENS: &str = "x-ratelimit-remaining-tokens";
pub const HEADER_RESET_TOKENS: &str = "x-ratelimit-reset-tokens";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// Point-in-time quota metadata extracted from one upstream response.
///
/// Invariant: `requests_remaining <= requests_limit` and
/// `tokens_remaining <= tokens_limit` (clamped at parse time).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaSnapshot {
    /// Requests allowed per quota window.
    pub requests_limit: u64,
    /// Requests left in the current window.
    pub requests_remaining: u64,
    /// When the request window resets, if reported.
    pub requests_reset_at: Option<DateTime<Utc>>,
    /// Tokens allowed per quota window.
    pub tokens_limit: u64,
    /// Tokens left in the current window.
    pub tokens_remaining: u64,
    /// When the token window resets, if reported.
    pub tokens_reset_at: Option<DateTime<Utc>>,
    /// Upstream-suggested back-off; present only on throttling responses.
    pub retry_after: Option<Duration>,
}

impl QuotaSnapshot {
    /// A full-quota snapshot built purely from the configured defaults.
    ///
    /// Used when a response carried no usable metadata at all, and as the
    /// initial persisted state.
    pub fn full(defaults: &QuotaDefaults) -> Self {
        Self {
            requests_limit: defaults.requests_limit,
            requests_remaining: defaults.requests_limit,
            requests_reset_at: None,
            tokens_limit: defaults.tokens_limit,
            tokens_remaining: defaults.tokens_limit,
            tokens_reset_at: None,
            retry_after: None,
        }
    }

    /// Extract a snapshot from response headers.
    ///
    /// Absent or unparsable numeric headers fall back to the configured
    /// defaults (limit headers) or to the just-resolved limit (remaining
    /// headers), with a warning. Reset headers carry unix epoch seconds;
    /// unparsable resets become `None`. Never errors.
    pub fn from_headers(headers: &HeaderMap, defaults: &QuotaDefaults) -> Self {
        let requests_limit =
            header_u64(headers, HEADER_LIMIT_REQUESTS).unwrap_or(defaults.requests_limit);
        let requests_remaining = header_u64(headers, HEADER_REMAINING_REQUESTS)
            .unwrap_or(requests_limit)
            .min(requests_limit);

        let tokens_limit =
            header_u64(headers, HEADER_LIMIT_TOKENS).unwrap_or(defaults.tokens_limit);
        let tokens_remaining = header_u64(headers, HEADER_REMAINING_TOKENS)
            .unwrap_or(tokens_limit)
            .min(tokens_limit);

        Self {
            requests_limit,
            requests_remaining,
            requests_reset_at: header_epoch(headers, HEADER_RESET_REQUESTS),
            tokens_limit,
            tokens_remaining,
            tokens_reset_at: header_epoch(headers, HEADER_RESET_TOKENS),
            retry_after: header_u64(headers, HEADER_RETRY_AFTER).map(Duration::from_secs),
        }
    }

    /// Fraction of the request window still available.
    pub fn requests_ratio(&self) -> f64 {
        ratio(self.requests_remaining, self.requests_limit)
    }

    /// Fraction of the token window still available.
    pub fn tokens_ratio(&self) -> f64 {
        ratio(self.tokens_remaining, self.tokens_limit)
    }
}

/// Remaining/limit as a fraction; a zero limit reads as fully available
/// (fail open: a bogus limit must not look like exhaustion).
pub(crate) fn ratio(remaining: u64, limit: u64) -> f64 {
    if limit == 0 {
        1.0
    } else {
        remaining as f64 / limit as f64
    }
}

/// Parse a header value as u64. Logs and returns `None` on garbage.
fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    let raw = headers.get(name)?.to_str().ok()?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(header = name, value = raw, "unparsable rate-limit header: {e}");
            None
        }
    }
}

/// Parse a header value as unix epoch seconds.
fn header_epoch(headers: &HeaderMap, name: &str) -> Option<DateTime<Utc>> {
    let secs = header_u64(headers, name)?;
    let parsed = DateTime::from_timestamp(secs as i64, 0);
    if parsed.is_none() {
        warn!(header = name, value = secs, "reset timestamp out of range");
    }
    parsed
}
