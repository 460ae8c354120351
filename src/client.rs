//! Adaptive client orchestrator.
//!
//! Composes the breaker gate, strategy delay, upstream call, and quota
//! fold-back around a single outbound attempt. It never retries: it
//! decides whether to *allow* an attempt, and what the next caller should
//! see in the shared state afterwards. The only suspension points are the
//! strategy delay and the network call; dropping the returned future
//! before the call is issued writes no state at all.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::breaker::{self, CircuitState};
use crate::config::GateSettings;
use crate::error::{GateError, Result};
use crate::snapshot::QuotaSnapshot;
use crate::store::{CallOutcome, CircuitWrite, QuotaState, QuotaStore, QuotaUpdate};
use crate::strategy::{select_strategy, AdaptiveConfig, AdaptiveStrategy};
use crate::transport::{ChatRequest, HttpTransport, Transport};

/// Longest upstream error body echoed into an error message.
const ERROR_BODY_LIMIT: usize = 200;

/// Successful call result: the raw response body plus the throttling
/// posture that was applied, for observability.
#[derive(Debug, Clone)]
pub struct CallOutput {
    /// Raw upstream response body (JSON when parsable).
    pub body: Value,
    /// The strategy in force when the call was issued.
    pub strategy: AdaptiveStrategy,
    /// Quota metadata parsed from the response headers.
    pub snapshot: QuotaSnapshot,
}

/// The public entry point: one upstream API, one shared quota store.
///
/// Cheap to share behind an `Arc`; every [`call`](Self::call) runs
/// independently and coordinates with concurrent callers only through the
/// store.
pub struct AdaptiveClient {
    transport: Box<dyn Transport>,
    store: Arc<dyn QuotaStore>,
    settings: GateSettings,
}

impl std::fmt::Debug for AdaptiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveClient")
            .field("settings", &self.settings)
            .finish()
    }
}

impl AdaptiveClient {
    /// Build a client over the real HTTP transport.
    ///
    /// Fails with [`GateError::Config`] on a missing credential before the
    /// store is ever touched.
    pub fn new(settings: GateSettings, store: Arc<dyn QuotaStore>) -> Result<Self> {
        let transport = HttpTransport::new(settings.upstream.clone())?;
        Ok(Self {
            transport: Box::new(transport),
            store,
            settings,
        })
    }

    /// Build a client from the environment with the file-backed store at
    /// its default location (shared across processes).
    pub fn from_env() -> Result<Self> {
        let settings = GateSettings::from_env()?;
        let store = Arc::new(crate::store::FileQuotaStore::at_default_location(
            settings.defaults,
        ));
        Self::new(settings, store)
    }

    /// Build a client over a custom transport (tests, alternate wire
    /// protocols).
    pub fn with_transport(
        settings: GateSettings,
        store: Arc<dyn QuotaStore>,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            transport,
            store,
            settings,
        }
    }

    /// Issue one mediated call to the upstream API.
    ///
    /// `is_metered = false` marks calls that do not consume the metered
    /// quota window: they skip the strategy delay and their response
    /// metadata is not folded into the shared snapshot, but they remain
    /// fully breaker-protected in both directions.
    pub async fn call(&self, request: ChatRequest, is_metered: bool) -> Result<CallOutput> {
        let mut state = self.store.read().await?;
        let now = Utc::now();

        // Breaker gate: reject locally, or let a probe through.
        if state.circuit_state == CircuitState::Open {
            if breaker::can_half_open(&state, now, &self.settings.breaker) {
                debug!("circuit cool-down elapsed, half-open probe allowed");
                state = self.store.update(QuotaUpdate::Probe).await?;
            } else {
                let retry_after = breaker::remaining_cool_down(&state, now, &self.settings.breaker);
                debug!(
                    retry_after_ms = retry_after.as_millis() as u64,
                    "circuit open, rejecting without contacting upstream"
                );
                return Err(GateError::CircuitOpen { retry_after });
            }
        }

        let strategy = select_strategy(&state, &self.settings.thresholds);
        let config = AdaptiveConfig::for_strategy(strategy);
        if is_metered && !config.delay.is_zero() {
            debug!(
                ?strategy,
                delay_ms = config.delay.as_millis() as u64,
                "applying adaptive delay"
            );
            tokio::time::sleep(config.delay).await;
        }

        let started = Instant::now();
        let reply = match self.transport.send(&request).await {
            Ok(reply) => reply,
            Err(err) => {
                // No response, no snapshot to merge.
                self.record_failure(&state, None, started.elapsed(), false, is_metered)
                    .await;
                return Err(err);
            }
        };
        let latency = started.elapsed();
        let snapshot = QuotaSnapshot::from_headers(&reply.headers, &self.settings.defaults);

        if reply.is_success() {
            let outcome = CallOutcome {
                success: true,
                snapshot: is_metered.then(|| snapshot.clone()),
                latency: is_metered.then_some(latency),
                circuit: (state.circuit_state != CircuitState::Closed)
                    .then_some(CircuitWrite::Closed),
            };
            self.persist(QuotaUpdate::Outcome(outcome)).await;
            debug!(
                ?strategy,
                latency_ms = latency.as_millis() as u64,
                requests_remaining = snapshot.requests_remaining,
                tokens_remaining = snapshot.tokens_remaining,
                "upstream call succeeded"
            );
            let body = serde_json::from_str(&reply.body)
                .unwrap_or_else(|_| Value::String(reply.body.clone()));
            return Ok(CallOutput {
                body,
                strategy,
                snapshot,
            });
        }

        let throttled = reply.is_throttled();
        let retry_after = snapshot.retry_after;
        self.record_failure(&state, Some(snapshot), latency, throttled, is_metered)
            .await;

        if throttled {
            warn!(
                retry_after_secs = retry_after.map(|d| d.as_secs()),
                "upstream throttled the request"
            );
            Err(GateError::Throttled { retry_after })
        } else {
            Err(GateError::Upstream {
                status: reply.status.as_u16(),
                message: truncate(&reply.body, ERROR_BODY_LIMIT),
            })
        }
    }

    /// Fold a failed attempt into the store and decide the circuit write.
    ///
    /// The trip decision is made on a hypothetical post-failure view:
    /// failure count incremented and the response snapshot merged locally,
    /// whether or not the snapshot is persisted. A failed half-open probe
    /// always re-opens, and explicit throttling always trips.
    async fn record_failure(
        &self,
        prior: &QuotaState,
        snapshot: Option<QuotaSnapshot>,
        latency: Duration,
        throttled: bool,
        is_metered: bool,
    ) {
        let mut hypothetical = prior.clone();
        if let Some(snap) = &snapshot {
            hypothetical.merge_snapshot(snap);
        }
        hypothetical.consecutive_failures = hypothetical.consecutive_failures.saturating_add(1);

        let trip = throttled
            || prior.circuit_state == CircuitState::HalfOpen
            || breaker::should_open(&hypothetical, &self.settings.breaker);
        if trip {
            warn!(
                consecutive_failures = hypothetical.consecutive_failures,
                throttled, "opening circuit"
            );
        }

        let outcome = CallOutcome {
            success: false,
            snapshot: if is_metered { snapshot } else { None },
            latency: is_metered.then_some(latency),
            circuit: trip.then(|| CircuitWrite::Open { at: Utc::now() }),
        };
        self.persist(QuotaUpdate::Outcome(outcome)).await;
    }

    /// Best-effort outcome persistence: a store failure must not mask the
    /// call result the caller is waiting on. The flip side is that a store
    /// that stays down stops the throttling state from advancing, and calls
    /// degrade to unthrottled pass-through until it recovers.
    async fn persist(&self, update: QuotaUpdate) {
        if let Err(e) = self.store.update(update).await {
            warn!("failed to persist call outcome: {e}");
        }
    }
}

fn truncate(body: &str, limit: usize) -> String {
    if body.len() <= limit {
        body.to_string()
    } else {
        let mut end = limit;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}
