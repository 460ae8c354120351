//! Durable shared quota and circuit state.
//!
//! All cross-invocation state lives here: the latest quota snapshot, the
//! rolling latency average, and the circuit breaker position. Handlers are
//! stateless and possibly cross-process, so the store is the single
//! writer-of-record: every mutation is a delta ([`QuotaUpdate`]) applied
//! atomically inside the backend's mutual-exclusion mechanism. No caller
//! ever computes a full new state and blind-overwrites it; that would
//! reintroduce the lost-update race this crate exists to prevent.
//!
//! The fold itself is a pure method on [`QuotaState`] so every backend
//! shares identical semantics.

mod file;
mod memory;

pub use file::FileQuotaStore;
pub use memory::MemoryQuotaStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::breaker::CircuitState;
use crate::config::QuotaDefaults;
use crate::error::Result;
use crate::snapshot::{self, QuotaSnapshot};

/// Weight of the previous average in the latency moving average.
///
/// `avg' = avg * LATENCY_SMOOTHING + observed * (1 - LATENCY_SMOOTHING)`.
pub const LATENCY_SMOOTHING: f64 = 0.8;

/// The singleton shared state for one upstream API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaState {
    /// Requests allowed per quota window (latest observed).
    pub requests_limit: u64,
    /// Requests left in the current window (latest observed).
    pub requests_remaining: u64,
    /// When the request window resets, if reported.
    pub requests_reset_at: Option<DateTime<Utc>>,
    /// Tokens allowed per quota window (latest observed).
    pub tokens_limit: u64,
    /// Tokens left in the current window (latest observed).
    pub tokens_remaining: u64,
    /// When the token window resets, if reported.
    pub tokens_reset_at: Option<DateTime<Utc>>,
    /// Exponential moving average of observed call latency.
    pub avg_latency_ms: f64,
    /// Circuit breaker position.
    pub circuit_state: CircuitState,
    /// When the circuit opened. `Some` only while open.
    pub circuit_opened_at: Option<DateTime<Utc>>,
    /// Failed calls since the last success.
    pub consecutive_failures: u32,
}

impl QuotaState {
    /// Initial state: full quota, closed circuit, no latency history.
    pub fn fresh(defaults: &QuotaDefaults) -> Self {
        Self {
            requests_limit: defaults.requests_limit,
            requests_remaining: defaults.requests_limit,
            requests_reset_at: None,
            tokens_limit: defaults.tokens_limit,
            tokens_remaining: defaults.tokens_limit,
            tokens_reset_at: None,
            avg_latency_ms: 0.0,
            circuit_state: CircuitState::Closed,
            circuit_opened_at: None,
            consecutive_failures: 0,
        }
    }

    /// Fraction of the request window still available.
    pub fn requests_ratio(&self) -> f64 {
        snapshot::ratio(self.requests_remaining, self.requests_limit)
    }

    /// Fraction of the token window still available.
    pub fn tokens_ratio(&self) -> f64 {
        snapshot::ratio(self.tokens_remaining, self.tokens_limit)
    }

    /// Overwrite the flattened snapshot fields with newer metadata.
    pub fn merge_snapshot(&mut self, snap: &QuotaSnapshot) {
        self.requests_limit = snap.requests_limit;
        self.requests_remaining = snap.requests_remaining.min(snap.requests_limit);
        self.requests_reset_at = snap.requests_reset_at;
        self.tokens_limit = snap.tokens_limit;
        self.tokens_remaining = snap.tokens_remaining.min(snap.tokens_limit);
        self.tokens_reset_at = snap.tokens_reset_at;
    }

    /// Fold an observed latency into the moving average.
    ///
    /// The first observation seeds the average directly instead of being
    /// dragged through zero.
    pub fn observe_latency(&mut self, latency: Duration) {
        let observed = latency.as_secs_f64() * 1000.0;
        self.avg_latency_ms = if self.avg_latency_ms == 0.0 {
            observed
        } else {
            self.avg_latency_ms * LATENCY_SMOOTHING + observed * (1.0 - LATENCY_SMOOTHING)
        };
    }

    /// Apply one delta. Backends call this inside their atomic section.
    pub fn fold(&mut self, update: &QuotaUpdate) {
        match update {
            QuotaUpdate::Probe => {
                if self.circuit_state == CircuitState::Open {
                    self.circuit_state = CircuitState::HalfOpen;
                    // opened_at is meaningful only while open. The failure
                    // streak survives: only a successful probe clears it.
                    self.circuit_opened_at = None;
                }
            }
            QuotaUpdate::Outcome(outcome) => {
                if let Some(snap) = &outcome.snapshot {
                    self.merge_snapshot(snap);
                }
                if let Some(latency) = outcome.latency {
                    self.observe_latency(latency);
                }
                if outcome.success {
                    self.consecutive_failures = 0;
                } else {
                    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                }
                match outcome.circuit {
                    Some(CircuitWrite::Open { at }) => {
                        self.circuit_state = CircuitState::Open;
                        self.circuit_opened_at = Some(at);
                    }
                    Some(CircuitWrite::Closed) => {
                        self.circuit_state = CircuitState::Closed;
                        self.circuit_opened_at = None;
                    }
                    None => {}
                }
            }
        }
    }
}

/// An explicit circuit transition decided by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitWrite {
    /// Trip (or re-trip) the circuit, restarting the cool-down at `at`.
    Open { at: DateTime<Utc> },
    /// Close the circuit and clear the open timestamp.
    Closed,
}

/// The outcome of one completed call attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    /// Whether the upstream call succeeded.
    pub success: bool,
    /// Quota metadata from the response, when one was received and metered.
    pub snapshot: Option<QuotaSnapshot>,
    /// Wall-clock latency of the upstream call, when metered.
    pub latency: Option<Duration>,
    /// Circuit transition to apply alongside the outcome, if any.
    pub circuit: Option<CircuitWrite>,
}

/// A delta to apply atomically to the shared state.
#[derive(Debug, Clone, PartialEq)]
pub enum QuotaUpdate {
    /// Open → half-open transition ahead of a probe call. A no-op unless
    /// the circuit is currently open.
    Probe,
    /// Fold in the outcome of a completed call attempt.
    Outcome(CallOutcome),
}

/// Shared quota/circuit state with atomic delta updates.
///
/// `read` may return slightly stale data under contention; that is
/// acceptable by design (the client is a damping loop, not an admission
/// gate). `update` must apply its delta atomically with respect to all
/// concurrent writers, including cross-process ones where the backend
/// supports them.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Current state; defaults when nothing has been persisted yet.
    async fn read(&self) -> Result<QuotaState>;

    /// Atomically fold `update` into the state and return the result.
    async fn update(&self, update: QuotaUpdate) -> Result<QuotaState>;
}
