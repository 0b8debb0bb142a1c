//! Sequential chain stage
//!
//! Junior Analyst -> Technical Analyst -> Compliance Officer, one message
//! at a time. Each step sees every prior turn and appends exactly one turn of
//! its own. Chains of different messages share nothing and run concurrently.

use crate::agent::{Agent, AgentRole};
use crate::error::OrchestrationError;
use crate::models::{AgentResponse, ConversationState, FraudAssessment, Message};
use crate::pool::WorkerPool;
use crate::reasoning::ReasoningClient;
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct InvestigationStage {
    chain: Arc<Vec<Agent>>,
    pool: WorkerPool,
}

impl InvestigationStage {
    pub fn new(client: Arc<ReasoningClient>, pool: WorkerPool) -> Self {
        let chain = AgentRole::ANALYST_CHAIN
            .into_iter()
            .map(|role| Agent::new(role, client.clone()))
            .collect();

        Self {
            chain: Arc::new(chain),
            pool,
        }
    }

    pub fn roles(&self) -> Vec<AgentRole> {
        self.chain.iter().map(Agent::role).collect()
    }

    /// Investigate every message whose assessment requires it.
    ///
    /// `cases` pairs a message with its assessment; messages that screened
    /// clear are skipped. Output order follows `cases`.
    pub async fn process(&self, cases: &[(Message, FraudAssessment)]) -> Vec<ConversationState> {
        let selected: Vec<(Message, FraudAssessment)> = cases
            .iter()
            .filter(|(_, assessment)| assessment.requires_investigation())
            .cloned()
            .collect();

        info!(count = selected.len(), "Sequential chain stage starting");

        let mut set = JoinSet::new();
        for (index, (message, assessment)) in selected.iter().cloned().enumerate() {
            let stage = self.clone();
            set.spawn(async move { (index, stage.investigate(&message, &assessment).await) });
        }

        let mut slots: Vec<Option<ConversationState>> = vec![None; selected.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, state)) => slots[index] = Some(state),
                Err(e) => warn!(error = %e, "Investigation task aborted"),
            }
        }

        let conversations: Vec<ConversationState> = slots
            .into_iter()
            .zip(&selected)
            .map(|(slot, (message, _))| {
                slot.unwrap_or_else(|| self.aborted(&message.message_id))
            })
            .collect();

        info!(count = conversations.len(), "Sequential chain stage complete");
        conversations
    }

    /// Run the full chain for one message
    pub async fn investigate(
        &self,
        message: &Message,
        assessment: &FraudAssessment,
    ) -> ConversationState {
        let mut state = ConversationState::new(message.message_id.clone());
        let payload = case_file(message, assessment);

        for agent in self.chain.iter() {
            let role = agent.role();
            let outcome = self.pool.run(agent.respond(&payload, state.turns())).await;

            let response = match outcome {
                Ok(response) => {
                    if let Some(error) = &response.error {
                        warn!(message_id = %message.message_id, %role, error = %error, "Analyst step degraded");
                    }
                    response
                }
                Err(e) => {
                    warn!(message_id = %message.message_id, %role, error = %e, "Analyst unavailable");
                    let attempts = match &e {
                        OrchestrationError::ReasoningUnavailable { attempts, .. } => *attempts,
                        _ => 0,
                    };
                    AgentResponse::unavailable(role, attempts, e.to_string())
                }
            };

            debug!(message_id = %message.message_id, %role, turn = state.len() + 1, "Turn appended");
            state.append(role, response);
        }

        state
    }

    /// A chain whose task died: every role recorded as unavailable
    fn aborted(&self, message_id: &str) -> ConversationState {
        let mut state = ConversationState::new(message_id);
        for role in self.roles() {
            state.append(role, AgentResponse::unavailable(role, 0, "investigation task aborted"));
        }
        state
    }
}

/// Message and screening result as handed to every analyst
fn case_file(message: &Message, assessment: &FraudAssessment) -> String {
    let case = json!({
        "message": message,
        "screening": {
            "status": assessment.screening,
            "contributing": assessment.contributing,
            "unavailable": assessment.unavailable,
            "risk_score": assessment.risk_score,
            "rationale": assessment.rationale,
        },
    });
    serde_json::to_string_pretty(&case).unwrap_or_else(|_| case.to_string())
}
