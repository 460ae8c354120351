//! Error taxonomy for the adaptive client.
//!
//! Every failure mode is a variant the caller can pattern-match on. Nothing
//! in this crate panics on an upstream or store failure; errors are returned
//! so callers decide their own retry and messaging policy. The crate itself
//! never retries: it decides whether to *allow* an attempt, not how many
//! times to attempt it.

use std::time::Duration;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GateError>;

/// All failure modes surfaced by [`crate::client::AdaptiveClient`] and the
/// quota store backends.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// The circuit breaker is open; the upstream was never contacted.
    ///
    /// `retry_after` is the remaining cool-down. Fully recoverable by
    /// retrying after that duration.
    #[error("circuit open, retry after {}s", retry_after.as_secs())]
    CircuitOpen {
        /// Remaining cool-down before a half-open probe becomes possible.
        retry_after: Duration,
    },

    /// The upstream explicitly throttled the request (HTTP 429).
    ///
    /// Opens the circuit as a side effect; callers should back off at
    /// least `retry_after` when it is present.
    #[error("upstream throttled the request")]
    Throttled {
        /// Upstream-suggested back-off, from the `retry-after` header.
        retry_after: Option<Duration>,
    },

    /// Any other non-success upstream response.
    ///
    /// Counts toward consecutive failures but does not by itself trip the
    /// breaker; only the aggregate trip condition does.
    #[error("upstream error (status {status}): {message}")]
    Upstream {
        /// HTTP status code of the response.
        status: u16,
        /// Upstream error body, truncated for logging sanity.
        message: String,
    },

    /// Network-level failure before any response was received.
    ///
    /// Counted like [`GateError::Upstream`] for breaker purposes; no quota
    /// snapshot is available to merge.
    #[error("transport error: {0}")]
    Transport(String),

    /// Missing or invalid client configuration (e.g. empty API key).
    ///
    /// Fails before the quota store is touched; no retry will help.
    #[error("configuration error: {0}")]
    Config(String),

    /// The quota store could not be read or updated.
    #[error("quota store error: {0}")]
    Store(String),
}

impl GateError {
    /// Suggested back-off, when the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after } => Some(*retry_after),
            Self::Throttled { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Whether a later retry by the caller can plausibly succeed.
    ///
    /// Everything except [`GateError::Config`] is retryable under the
    /// caller's own policy.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}
