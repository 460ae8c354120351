//! Adaptive rate limiting and circuit breaking for a rate-limited LLM API.
//!
//! `quotagate` mediates every call from stateless, concurrent request
//! handlers to one upstream chat-completion API. It reads the upstream's
//! rate-limit headers, keeps a shared [`store::QuotaState`] (latest quota
//! snapshot, rolling latency average, circuit breaker position), and turns
//! that into per-call decisions:
//!
//! - a throttling [`strategy::AdaptiveStrategy`] with a pre-call delay,
//!   picked from the scarcer of the request/token remaining ratios;
//! - a circuit breaker that rejects calls locally after repeated failures
//!   or near-zero remaining quota, then probes half-open after a cool-down.
//!
//! Handlers may run in separate processes: all cross-invocation state goes
//! through a [`store::QuotaStore`], whose `update` applies deltas
//! atomically so concurrent writers never lose each other's updates. Two
//! callers acting on the same slightly-stale state is fine; this is a
//! damping control loop, not an admission gate.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use quotagate::{AdaptiveClient, ChatRequest, GateError, GateSettings, MemoryQuotaStore};
//!
//! # async fn run() -> quotagate::Result<()> {
//! let settings = GateSettings::new("sk-your-key");
//! let store = Arc::new(MemoryQuotaStore::new(&settings.defaults));
//! let client = AdaptiveClient::new(settings, store)?;
//!
//! match client.call(ChatRequest::user("hello"), true).await {
//!     Ok(output) => println!("{} (strategy: {:?})", output.body, output.strategy),
//!     Err(GateError::CircuitOpen { retry_after }) => {
//!         println!("upstream cooling down, retry in {retry_after:?}");
//!     }
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod client;
pub mod config;
pub mod error;
pub mod snapshot;
pub mod store;
pub mod strategy;
pub mod transport;

pub use breaker::{BreakerSettings, CircuitState};
pub use client::{AdaptiveClient, CallOutput};
pub use config::{GateSettings, QuotaDefaults, UpstreamSettings};
pub use error::{GateError, Result};
pub use snapshot::QuotaSnapshot;
pub use store::{FileQuotaStore, MemoryQuotaStore, QuotaState, QuotaStore};
pub use strategy::{AdaptiveConfig, AdaptiveStrategy, StrategyThresholds};
pub use transport::{ChatMessage, ChatRequest, Role, Transport};
