//! Upstream HTTP boundary.
//!
//! The request body (model, messages, token/temperature parameters) is
//! pass-through: this crate neither constructs prompts nor interprets the
//! response business content. [`Transport`] is the seam the orchestrator
//! calls through, so tests substitute scripted replies for the real API.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::UpstreamSettings;
use crate::error::{GateError, Result};

/// Message author role, serialized the way chat-completion APIs expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of the conversation being forwarded upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A chat call to forward to the upstream API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    /// Model override; the configured default is used when `None`.
    pub model: Option<String>,
    /// Conversation turns, passed through untouched.
    pub messages: Vec<ChatMessage>,
    /// Completion token cap, when the caller sets one.
    pub max_tokens: Option<u32>,
    /// Sampling temperature, when the caller sets one.
    pub temperature: Option<f32>,
}

impl ChatRequest {
    /// Single user message, everything else defaulted.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(content)],
            ..Self::default()
        }
    }
}

/// Everything the orchestrator needs from a completed HTTP exchange:
/// status, the raw rate-limit headers, and the raw body.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl UpstreamReply {
    /// Whether the upstream accepted the call.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Whether this is an explicit throttling response.
    pub fn is_throttled(&self) -> bool {
        self.status == StatusCode::TOO_MANY_REQUESTS
    }
}

/// The outbound call seam.
///
/// Implementations return `Ok` for *any* received HTTP response, success
/// or not; `Err` is reserved for transport-level failures where no
/// response exists (timeout, connection reset, DNS).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<UpstreamReply>;
}

/// Production transport: reqwest POST with bearer auth.
pub struct HttpTransport {
    client: Client,
    settings: UpstreamSettings,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("settings", &self.settings)
            .finish()
    }
}

impl HttpTransport {
    /// Build the transport, validating the credential first.
    pub fn new(settings: UpstreamSettings) -> Result<Self> {
        settings.validate()?;
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| GateError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, settings })
    }

    /// Assemble the JSON body; `None` fields are omitted entirely.
    fn build_body(&self, request: &ChatRequest) -> Value {
        let model = request.model.as_deref().unwrap_or(&self.settings.model);
        let mut body = json!({
            "model": model,
            "messages": request.messages,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ChatRequest) -> Result<UpstreamReply> {
        let body = self.build_body(request);
        debug!(endpoint = %self.settings.endpoint, "dispatching upstream chat call");

        let response = self
            .client
            .post(&self.settings.endpoint)
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GateError::Transport(format!("upstream request failed: {e}")))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| GateError::Transport(format!("failed to read upstream body: {e}")))?;

        Ok(UpstreamReply {
            status,
            headers,
            body,
        })
    }
}
