//! Reasoning client
//!
//! Uniform wrapper over the external Reasoning Service. Owns the per-call
//! deadline, the retry policy and response parsing. Malformed output never
//! raises: it comes back as a response with `parsed = None` and a
//! schema-mismatch error so the calling stage can pick its own fallback.

use crate::config::PipelineConfig;
use crate::error::OrchestrationError;
use crate::models::{AgentRequest, AgentResponse, ResponseError, ResponseShape};
use crate::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

pub mod gemini;
pub mod mock;

pub use gemini::GeminiService;
pub use mock::{Script, ScriptedService};

/// Transport to the Reasoning Service
///
/// Implementations report retryable failures as
/// [`OrchestrationError::Transport`] and permanent ones as
/// [`OrchestrationError::ServiceRejected`].
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn complete(&self, request: &AgentRequest) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub request_timeout: Duration,
    pub retry_budget: u32,
    pub backoff: Duration,
}

impl From<&PipelineConfig> for RetryPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            request_timeout: config.request_timeout,
            retry_budget: config.retry_budget,
            backoff: config.retry_backoff,
        }
    }
}

/// A response together with its payload decoded into the agent's schema
#[derive(Debug, Clone)]
pub struct Structured<T> {
    pub response: AgentResponse,
    pub payload: Option<T>,
}

impl<T> Structured<T> {
    /// The decoded payload, or a schema mismatch carrying the response error
    pub fn into_payload(self) -> Result<T> {
        let role = self.response.role;
        match self.payload {
            Some(payload) => Ok(payload),
            None => Err(OrchestrationError::SchemaMismatch {
                role: role.to_string(),
                detail: match self.response.error {
                    Some(ResponseError::SchemaMismatch(detail)) => detail,
                    Some(other) => other.to_string(),
                    None => "no payload".to_string(),
                },
            }),
        }
    }
}

pub struct ReasoningClient {
    service: Arc<dyn ReasoningService>,
    policy: RetryPolicy,
}

impl ReasoningClient {
    pub fn new(service: Arc<dyn ReasoningService>, policy: RetryPolicy) -> Self {
        Self { service, policy }
    }

    /// Invoke the service for one agent request.
    ///
    /// Retryable failures and timeouts are retried with exponential backoff
    /// up to the retry budget, after which `ReasoningUnavailable` is
    /// returned. A permanent rejection comes back as a response with its
    /// error set.
    pub async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse> {
        let started = Instant::now();
        let max_attempts = self.policy.retry_budget.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            debug!(role = %request.role, attempt, "Calling reasoning service");

            let outcome =
                tokio::time::timeout(self.policy.request_timeout, self.service.complete(&request))
                    .await;

            match outcome {
                Ok(Ok(text)) => {
                    return Ok(build_response(&request, text, attempt, started));
                }
                Ok(Err(e)) if !e.is_retryable() => {
                    warn!(role = %request.role, error = %e, "Reasoning service rejected request");
                    return Ok(AgentResponse {
                        role: request.role,
                        text: String::new(),
                        parsed: None,
                        latency_ms: started.elapsed().as_millis() as u64,
                        attempts: attempt,
                        error: Some(ResponseError::Rejected(e.to_string())),
                    });
                }
                Ok(Err(e)) => {
                    warn!(role = %request.role, attempt, error = %e, "Reasoning call failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(
                        role = %request.role,
                        attempt,
                        timeout_ms = self.policy.request_timeout.as_millis() as u64,
                        "Reasoning call timed out"
                    );
                    last_error = format!(
                        "timed out after {} ms",
                        self.policy.request_timeout.as_millis()
                    );
                }
            }

            if attempt < max_attempts {
                let backoff = self.policy.backoff.saturating_mul(2u32.saturating_pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }
        }

        error!(role = %request.role, attempts = max_attempts, "Reasoning service unavailable");
        Err(OrchestrationError::ReasoningUnavailable {
            role: request.role.to_string(),
            attempts: max_attempts,
            reason: last_error,
        })
    }

    /// Invoke expecting JSON and decode it as `T`
    pub async fn invoke_structured<T: DeserializeOwned>(
        &self,
        mut request: AgentRequest,
    ) -> Result<Structured<T>> {
        request.shape = ResponseShape::Json;
        let mut response = self.invoke(request).await?;

        let payload = match response.parsed.clone() {
            Some(value) => match serde_json::from_value::<T>(value) {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!(role = %response.role, error = %e, "Response does not match schema");
                    response.error = Some(ResponseError::SchemaMismatch(e.to_string()));
                    None
                }
            },
            None => None,
        };

        Ok(Structured { response, payload })
    }
}

fn build_response(
    request: &AgentRequest,
    text: String,
    attempts: u32,
    started: Instant,
) -> AgentResponse {
    let (parsed, error) = match request.shape {
        ResponseShape::Text => (None, None),
        ResponseShape::Json => match extract_json(&text) {
            Some(value) => (Some(value), None),
            None => (
                None,
                Some(ResponseError::SchemaMismatch(
                    "response is not a JSON object".to_string(),
                )),
            ),
        },
    };

    let latency_ms = started.elapsed().as_millis() as u64;
    debug!(role = %request.role, latency_ms, attempts, "Reasoning call completed");

    AgentResponse {
        role: request.role,
        text,
        parsed,
        latency_ms,
        attempts,
        error,
    }
}

/// Pull a JSON object out of model output: the whole text, a ```json fenced
/// block, or the outermost `{ ... }` span.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            if let Ok(value) = serde_json::from_str::<Value>(after[..end].trim()) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }

    let open = trimmed.find('{')?;
    let close = trimmed.rfind('}')?;
    if close <= open {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[open..=close])
        .ok()
        .filter(Value::is_object)
}
