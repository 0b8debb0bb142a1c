//! Agents
//!
//! An agent is a role bound to its prompt templates and the shared
//! reasoning client. Roles form a closed set; runtime selection goes
//! through [`AgentRole::from_str`], never through open-ended lookup.

use crate::error::OrchestrationError;
use crate::models::{AgentRequest, AgentResponse, ResponseShape, Turn};
use crate::reasoning::{ReasoningClient, Structured};
use crate::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

pub mod prompts;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Evaluator,
    Optimizer,
    IdentityScreener,
    AmountScreener,
    JurisdictionScreener,
    JuniorAnalyst,
    TechnicalAnalyst,
    ComplianceOfficer,
    Planner,
    Worker,
}

impl AgentRole {
    pub const ALL: [AgentRole; 10] = [
        AgentRole::Evaluator,
        AgentRole::Optimizer,
        AgentRole::IdentityScreener,
        AgentRole::AmountScreener,
        AgentRole::JurisdictionScreener,
        AgentRole::JuniorAnalyst,
        AgentRole::TechnicalAnalyst,
        AgentRole::ComplianceOfficer,
        AgentRole::Planner,
        AgentRole::Worker,
    ];

    /// Fixed order of the investigation chain
    pub const ANALYST_CHAIN: [AgentRole; 3] = [
        AgentRole::JuniorAnalyst,
        AgentRole::TechnicalAnalyst,
        AgentRole::ComplianceOfficer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Evaluator => "evaluator",
            AgentRole::Optimizer => "optimizer",
            AgentRole::IdentityScreener => "identity_screener",
            AgentRole::AmountScreener => "amount_screener",
            AgentRole::JurisdictionScreener => "jurisdiction_screener",
            AgentRole::JuniorAnalyst => "junior_analyst",
            AgentRole::TechnicalAnalyst => "technical_analyst",
            AgentRole::ComplianceOfficer => "compliance_officer",
            AgentRole::Planner => "planner",
            AgentRole::Worker => "worker",
        }
    }

    pub fn system_prompt(self) -> &'static str {
        prompts::system_prompt(self)
    }
}

impl FromStr for AgentRole {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        AgentRole::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| OrchestrationError::InvalidConfig(format!("unknown agent role '{}'", s)))
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role bound to the reasoning client
#[derive(Clone)]
pub struct Agent {
    role: AgentRole,
    client: Arc<ReasoningClient>,
}

impl Agent {
    pub fn new(role: AgentRole, client: Arc<ReasoningClient>) -> Self {
        Self { role, client }
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    fn request(&self, payload: &str, context: &[Turn], shape: ResponseShape) -> AgentRequest {
        AgentRequest {
            role: self.role,
            prompt: prompts::render(self.role, payload),
            prior_turns: context.to_vec(),
            shape,
        }
    }

    /// Free-text answer given the prior conversation
    pub async fn respond(&self, payload: &str, context: &[Turn]) -> Result<AgentResponse> {
        debug!(role = %self.role, prior_turns = context.len(), "Agent responding");
        self.client
            .invoke(self.request(payload, context, ResponseShape::Text))
            .await
    }

    /// Answer decoded into the role's declared schema
    pub async fn respond_structured<T: DeserializeOwned>(
        &self,
        payload: &str,
        context: &[Turn],
    ) -> Result<Structured<T>> {
        debug!(role = %self.role, "Agent responding with structured output");
        self.client
            .invoke_structured(self.request(payload, context, ResponseShape::Json))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_name() {
        for role in AgentRole::ALL {
            assert_eq!(role.as_str().parse::<AgentRole>().unwrap(), role);
        }
        assert!("fraud_wizard".parse::<AgentRole>().is_err());
    }

    #[test]
    fn test_analyst_chain_order() {
        assert_eq!(
            AgentRole::ANALYST_CHAIN.map(AgentRole::as_str),
            ["junior_analyst", "technical_analyst", "compliance_officer"]
        );
    }
}
