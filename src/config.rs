//! Client configuration and injectable tunables.
//!
//! Everything that governs throttling behavior lives in plain structs with
//! `Default` impls so tests can construct exact scenarios without touching
//! the environment. [`GateSettings::from_env`] is the production path:
//! `.env` via dotenvy, then process environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::breaker::BreakerSettings;
use crate::error::{GateError, Result};
use crate::strategy::StrategyThresholds;

/// Default upstream endpoint (OpenAI-compatible chat completions).
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Default model sent when the request does not name one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default HTTP client timeout for the upstream call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Fallback quota limits used when the upstream response carries no
/// rate-limit metadata (or unparsable metadata).
///
/// Defaults are deliberately generous: a misbehaving upstream must degrade
/// to *under*-throttling, not to a spurious circuit trip. Falling back to
/// zero would instantly breach the breaker floors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaDefaults {
    /// Assumed requests-per-window limit when headers are absent.
    pub requests_limit: u64,
    /// Assumed tokens-per-window limit when headers are absent.
    pub tokens_limit: u64,
}

impl Default for QuotaDefaults {
    fn default() -> Self {
        Self {
            requests_limit: 60,
            tokens_limit: 100_000,
        }
    }
}

/// Connection settings for the upstream LLM API.
#[derive(Clone)]
pub struct UpstreamSettings {
    /// Chat completions endpoint URL.
    pub endpoint: String,
    /// Bearer credential. Must be non-empty.
    pub api_key: String,
    /// Model used when a request does not specify one.
    pub model: String,
    /// Whole-request timeout applied to the HTTP client.
    pub request_timeout: Duration,
}

impl std::fmt::Debug for UpstreamSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSettings")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl UpstreamSettings {
    /// Build settings with defaults for everything but the credential.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Reject an empty credential before anything else runs.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(GateError::Config(
                "missing API key (set QUOTAGATE_API_KEY or OPENAI_API_KEY)".into(),
            ));
        }
        Ok(())
    }
}

/// Full tunable surface of the adaptive client.
#[derive(Debug, Clone)]
pub struct GateSettings {
    /// Upstream connection settings.
    pub upstream: UpstreamSettings,
    /// Fallback limits for missing quota metadata.
    pub defaults: QuotaDefaults,
    /// Remaining-ratio bands for strategy selection.
    pub thresholds: StrategyThresholds,
    /// Circuit breaker trip/recovery settings.
    pub breaker: BreakerSettings,
}

impl GateSettings {
    /// Settings with library defaults around the given credential.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            upstream: UpstreamSettings::new(api_key),
            defaults: QuotaDefaults::default(),
            thresholds: StrategyThresholds::default(),
            breaker: BreakerSettings::default(),
        }
    }

    /// Load settings from `.env` / process environment.
    ///
    /// Resolution order for the credential: `QUOTAGATE_API_KEY`, then
    /// `OPENAI_API_KEY`. Endpoint and model come from `QUOTAGATE_ENDPOINT`
    /// and `QUOTAGATE_MODEL` when set. Fails with
    /// [`GateError::Config`] when no credential is found.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let api_key = std::env::var("QUOTAGATE_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .map_err(|_| {
                GateError::Config(
                    "missing API key (set QUOTAGATE_API_KEY or OPENAI_API_KEY)".into(),
                )
            })?;

        let mut settings = Self::new(api_key);
        if let Ok(endpoint) = std::env::var("QUOTAGATE_ENDPOINT") {
            settings.upstream.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("QUOTAGATE_MODEL") {
            settings.upstream.model = model;
        }
        settings.upstream.validate()?;
        Ok(settings)
    }
}
