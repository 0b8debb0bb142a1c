//! Gemini transport for the Reasoning Service
//!
//! Uses a long-lived reqwest::Client for connection pooling. Deadlines and
//! retries are owned by [`ReasoningClient`](super::ReasoningClient); this
//! type only maps one request onto one HTTP call.

use super::ReasoningService;
use crate::error::OrchestrationError;
use crate::models::{AgentRequest, ResponseShape};
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{error, info};

const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiService {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiService {
    pub fn new(api_key: String, model: &str) -> Result<Self> {
        if api_key.is_empty() {
            return Err(OrchestrationError::InvalidConfig(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                model
            ),
        })
    }

    /// Build from `GEMINI_API_KEY` and optional `GEMINI_MODEL`
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("GEMINI_API_KEY").unwrap_or_default();
        let model = env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::new(api_key, &model)
    }
}

#[async_trait]
impl ReasoningService for GeminiService {
    async fn complete(&self, request: &AgentRequest) -> Result<String> {
        let url = format!("{}?key={}", self.base_url, self.api_key);
        let body = build_request(request);

        info!(role = %request.role, "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                OrchestrationError::Transport(format!("Gemini API error: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            let detail = format!("Gemini API {}: {}", status, error_text);
            return Err(if is_transient(status) {
                OrchestrationError::Transport(detail)
            } else {
                OrchestrationError::ServiceRejected(detail)
            });
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::Transport(format!("Gemini parse error: {}", e))
        })?;

        gemini_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| OrchestrationError::Transport("Empty response from Gemini".to_string()))
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Prior turns are replayed as user content labelled with their role
fn build_request(request: &AgentRequest) -> GeminiRequest {
    let mut contents: Vec<Content> = request
        .prior_turns
        .iter()
        .map(|turn| Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: format!("[{}] {}", turn.role, turn.response.text),
            }],
        })
        .collect();

    contents.push(Content {
        role: Some("user".to_string()),
        parts: vec![Part {
            text: request.prompt.clone(),
        }],
    });

    GeminiRequest {
        contents,
        generation_config: GenerationConfig {
            temperature: 0.1,
            top_p: 0.9,
            max_output_tokens: 2048,
            response_mime_type: match request.shape {
                ResponseShape::Json => Some("application/json".to_string()),
                ResponseShape::Text => None,
            },
        },
        system_instruction: SystemInstruction {
            parts: vec![Part {
                text: request.role.system_prompt().to_string(),
            }],
        },
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}
