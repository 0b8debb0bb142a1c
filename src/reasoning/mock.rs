//! Scripted reasoning service for development & testing
//!
//! Keeps the pipeline runnable without a live model: replies are chosen by
//! role and, optionally, by a substring of the rendered prompt.

use super::ReasoningService;
use crate::agent::AgentRole;
use crate::error::OrchestrationError;
use crate::models::AgentRequest;
use crate::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Script {
    Reply(String),
    /// Retryable transport failure
    Fail(String),
    /// Permanent rejection
    Reject(String),
    Delay(Duration, Box<Script>),
}

impl Script {
    pub fn reply(text: impl Into<String>) -> Self {
        Script::Reply(text.into())
    }

    pub fn json(value: serde_json::Value) -> Self {
        Script::Reply(value.to_string())
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Script::Fail(reason.into())
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Script::Reject(reason.into())
    }

    pub fn delay(by: Duration, then: Script) -> Self {
        Script::Delay(by, Box::new(then))
    }
}

struct Rule {
    role: AgentRole,
    needle: Option<String>,
    script: Script,
    uses_left: Option<usize>,
}

/// A call the service received
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub role: AgentRole,
    pub prompt: String,
    pub prior_roles: Vec<AgentRole>,
}

#[derive(Default)]
pub struct ScriptedService {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    fn rule(self, role: AgentRole, needle: Option<String>, script: Script, uses: Option<usize>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                role,
                needle,
                script,
                uses_left: uses,
            });
        }
        self
    }

    /// Answer every call for `role`
    pub fn on(self, role: AgentRole, script: Script) -> Self {
        self.rule(role, None, script, None)
    }

    /// Answer calls for `role` whose prompt contains `needle`
    pub fn on_matching(self, role: AgentRole, needle: impl Into<String>, script: Script) -> Self {
        self.rule(role, Some(needle.into()), script, None)
    }

    /// Answer the next call for `role` only
    pub fn once(self, role: AgentRole, script: Script) -> Self {
        self.rule(role, None, script, Some(1))
    }

    pub fn calls(&self, role: AgentRole) -> usize {
        self.recorded().iter().filter(|c| c.role == role).count()
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Rules are matched in registration order; register specific ones first.
    fn pick(&self, request: &AgentRequest) -> Option<Script> {
        let mut rules = self.rules.lock().ok()?;
        let rule = rules.iter_mut().find(|rule| {
            rule.role == request.role
                && rule.uses_left != Some(0)
                && rule
                    .needle
                    .as_deref()
                    .map_or(true, |needle| request.prompt.contains(needle))
        })?;

        if let Some(uses) = rule.uses_left.as_mut() {
            *uses -= 1;
        }
        Some(rule.script.clone())
    }
}

#[async_trait]
impl ReasoningService for ScriptedService {
    async fn complete(&self, request: &AgentRequest) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                role: request.role,
                prompt: request.prompt.clone(),
                prior_roles: request.prior_turns.iter().map(|t| t.role).collect(),
            });
        }

        let mut script = self.pick(request).ok_or_else(|| {
            OrchestrationError::ServiceRejected(format!("no script for role {}", request.role))
        })?;

        loop {
            match script {
                Script::Reply(text) => return Ok(text),
                Script::Fail(reason) => return Err(OrchestrationError::Transport(reason)),
                Script::Reject(reason) => return Err(OrchestrationError::ServiceRejected(reason)),
                Script::Delay(by, then) => {
                    tokio::time::sleep(by).await;
                    script = *then;
                }
            }
        }
    }
}
