//! Circuit breaker predicates and settings.
//!
//! The breaker is a three-state machine (closed → open → half_open) whose
//! transitions are decided by the orchestrator and persisted through the
//! quota store. This module holds only the pure decision functions; the
//! cool-down is a plain time comparison, never a scheduled callback.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::QuotaState;

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation; calls proceed subject only to the strategy delay.
    #[default]
    Closed,
    /// Calls are rejected locally without contacting the upstream.
    Open,
    /// A probe call is allowed through; its outcome decides the next state.
    HalfOpen,
}

/// Trip and recovery tuning for the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures at which the circuit opens.
    pub max_consecutive_failures: u32,
    /// Open when remaining tokens drop below this floor.
    pub tokens_floor: u64,
    /// Open when remaining requests drop below this floor.
    pub requests_floor: u64,
    /// How long the circuit stays open before a half-open probe is allowed.
    pub cool_down: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            tokens_floor: 100,
            requests_floor: 5,
            cool_down: Duration::from_secs(60),
        }
    }
}

/// Whether the circuit should trip open.
///
/// True when any of the three conditions holds: the failure streak reached
/// the limit, or either remaining-quota dimension fell below its near-zero
/// floor. The orchestrator evaluates this on a hypothetical post-failure
/// view of the state (failure count already incremented, the failed
/// response's snapshot already merged).
pub fn should_open(state: &QuotaState, settings: &BreakerSettings) -> bool {
    state.consecutive_failures >= settings.max_consecutive_failures
        || state.tokens_remaining < settings.tokens_floor
        || state.requests_remaining < settings.requests_floor
}

/// Whether an open circuit may let a half-open probe through.
///
/// True only when the circuit is open and the cool-down has fully elapsed
/// since `circuit_opened_at`. Any other state returns false regardless of
/// elapsed time, as does an open circuit missing its timestamp.
pub fn can_half_open(state: &QuotaState, now: DateTime<Utc>, settings: &BreakerSettings) -> bool {
    if state.circuit_state != CircuitState::Open {
        return false;
    }
    let Some(opened_at) = state.circuit_opened_at else {
        return false;
    };
    match (now - opened_at).to_std() {
        Ok(elapsed) => elapsed >= settings.cool_down,
        // Opened "in the future" (clock skew between writers): stay open.
        Err(_) => false,
    }
}

/// Remaining cool-down for an open circuit, for `CircuitOpen` errors.
///
/// Saturates at zero; a circuit with no recorded open time reports the
/// full cool-down.
pub fn remaining_cool_down(
    state: &QuotaState,
    now: DateTime<Utc>,
    settings: &BreakerSettings,
) -> Duration {
    let Some(opened_at) = state.circuit_opened_at else {
        return settings.cool_down;
    };
    let elapsed = (now - opened_at).to_std().unwrap_or(Duration::ZERO);
    settings.cool_down.saturating_sub(elapsed)
}
