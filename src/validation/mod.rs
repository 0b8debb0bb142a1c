//! Evaluator-Optimizer stage
//!
//! Per message: evaluate, and while invalid and the repair budget allows,
//! ask the optimizer for a replacement and evaluate again. A message that is
//! still invalid when the budget runs out is finalized as `unresolved`; it
//! is never dropped and never loops.

use crate::agent::{Agent, AgentRole};
use crate::config::PipelineConfig;
use crate::error::OrchestrationError;
use crate::models::{Evaluation, FinalizedMessage, Message, ValidationStatus};
use crate::pool::WorkerPool;
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub mod rules;

pub use rules::SwiftStandardEvaluator;

#[async_trait]
pub trait MessageEvaluator: Send + Sync {
    async fn evaluate(&self, message: &Message) -> Result<Evaluation>;
}

#[async_trait]
pub trait MessageOptimizer: Send + Sync {
    /// Produce a replacement revision of `message` addressing `defects`
    async fn repair(&self, message: &Message, defects: &[String]) -> Result<Message>;
}

/// Evaluator backed by the reasoning service
pub struct AgentEvaluator {
    agent: Agent,
}

impl AgentEvaluator {
    pub fn new(agent: Agent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl MessageEvaluator for AgentEvaluator {
    async fn evaluate(&self, message: &Message) -> Result<Evaluation> {
        let payload = serde_json::to_string_pretty(message)?;
        self.agent
            .respond_structured::<Evaluation>(&payload, &[])
            .await?
            .into_payload()
    }
}

/// Optimizer backed by the reasoning service
pub struct AgentOptimizer {
    agent: Agent,
}

impl AgentOptimizer {
    pub fn new(agent: Agent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl MessageOptimizer for AgentOptimizer {
    async fn repair(&self, message: &Message, defects: &[String]) -> Result<Message> {
        let payload = serde_json::to_string_pretty(&json!({
            "message": message,
            "defects": defects,
        }))?;

        let mut replacement = self
            .agent
            .respond_structured::<Value>(&payload, &[])
            .await?
            .into_payload()?;

        // The id is ours, not the model's.
        if let Some(object) = replacement.as_object_mut() {
            object.insert("message_id".to_string(), Value::from(message.message_id.clone()));
        }

        let replacement: Message =
            serde_json::from_value(replacement).map_err(|e| OrchestrationError::SchemaMismatch {
                role: AgentRole::Optimizer.to_string(),
                detail: e.to_string(),
            })?;

        Ok(message.revise(replacement))
    }
}

#[derive(Clone)]
pub struct ValidationStage {
    evaluator: Arc<dyn MessageEvaluator>,
    optimizer: Arc<dyn MessageOptimizer>,
    pool: WorkerPool,
    repair_budget: u32,
}

impl ValidationStage {
    pub fn new(
        evaluator: Arc<dyn MessageEvaluator>,
        optimizer: Arc<dyn MessageOptimizer>,
        pool: WorkerPool,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            evaluator,
            optimizer,
            pool,
            repair_budget: config.repair_budget,
        }
    }

    /// Finalize every message; output order matches input order
    pub async fn process(&self, messages: &[Message]) -> Vec<FinalizedMessage> {
        info!(count = messages.len(), "Evaluator-optimizer stage starting");

        let mut set = JoinSet::new();
        for (index, message) in messages.iter().cloned().enumerate() {
            let stage = self.clone();
            set.spawn(async move { (index, stage.finalize(message).await) });
        }

        let mut slots: Vec<Option<FinalizedMessage>> = vec![None; messages.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, finalized)) => slots[index] = Some(finalized),
                Err(e) => warn!(error = %e, "Validation task aborted"),
            }
        }

        let finalized: Vec<FinalizedMessage> = slots
            .into_iter()
            .zip(messages)
            .map(|(slot, original)| {
                slot.unwrap_or_else(|| {
                    unresolved(original.clone(), vec!["validation task aborted".to_string()], 0, 0)
                })
            })
            .collect();

        let approved = finalized.iter().filter(|f| f.is_approved()).count();
        info!(
            total = finalized.len(),
            approved,
            unresolved = finalized.len() - approved,
            "Evaluator-optimizer stage complete"
        );

        finalized
    }

    /// Run the propose/repair loop for one message
    pub async fn finalize(&self, message: Message) -> FinalizedMessage {
        let mut current = message;
        let mut evaluations = 0;
        let mut repairs = 0;

        loop {
            evaluations += 1;
            let evaluation = match self.pool.run(self.evaluator.evaluate(&current)).await {
                Ok(evaluation) => evaluation,
                Err(e) => {
                    warn!(message_id = %current.message_id, error = %e, "Evaluation failed");
                    return unresolved(
                        current,
                        vec![format!("evaluation failed: {}", e)],
                        evaluations,
                        repairs,
                    );
                }
            };

            if evaluation.valid {
                debug!(message_id = %current.message_id, evaluations, repairs, "Message approved");
                return FinalizedMessage {
                    message: current,
                    status: ValidationStatus::Approved,
                    defects: Vec::new(),
                    evaluations,
                    repairs,
                };
            }

            debug!(
                message_id = %current.message_id,
                defects = evaluation.defects.len(),
                "Message invalid"
            );

            if repairs >= self.repair_budget {
                let exhausted = OrchestrationError::RepairBudgetExhausted {
                    message_id: current.message_id.clone(),
                    budget: self.repair_budget,
                };
                warn!(error = %exhausted, "Leaving message unresolved");
                return unresolved(current, evaluation.defects, evaluations, repairs);
            }

            repairs += 1;
            match self
                .pool
                .run(self.optimizer.repair(&current, &evaluation.defects))
                .await
            {
                Ok(replacement) => current = replacement,
                Err(e) => {
                    warn!(message_id = %current.message_id, error = %e, "Repair failed");
                    let mut defects = evaluation.defects;
                    defects.push(format!("repair failed: {}", e));
                    return unresolved(current, defects, evaluations, repairs);
                }
            }
        }
    }
}

fn unresolved(
    message: Message,
    defects: Vec<String>,
    evaluations: u32,
    repairs: u32,
) -> FinalizedMessage {
    FinalizedMessage {
        message,
        status: ValidationStatus::Unresolved,
        defects,
        evaluations,
        repairs,
    }
}
