//! Pipeline driver
//!
//! Sequences the four stages over one batch:
//! VALIDATE → SCREEN → INVESTIGATE → GROUP → REPORT
//!
//! Only an invalid batch or configuration aborts a run. Everything else is
//! recovered inside the stage that hit it and shows up in the outcome.

use crate::agent::{Agent, AgentRole};
use crate::audit::AuditTrail;
use crate::classification::{agent_classifiers, rule_classifiers, ClassificationStage, Classifier};
use crate::config::PipelineConfig;
use crate::error::OrchestrationError;
use crate::grouping::{AgentPlanner, AgentWorker, BatchPlanner, GroupingStage, StaticPlanner};
use crate::investigation::InvestigationStage;
use crate::models::{
    BatchReport, ConversationState, Disposition, FinalizedMessage, FraudAssessment, Message,
    MessageFate,
};
use crate::pool::WorkerPool;
use crate::reasoning::{ReasoningClient, ReasoningService, RetryPolicy};
use crate::report::BatchSummary;
use crate::validation::{
    AgentEvaluator, AgentOptimizer, MessageEvaluator, SwiftStandardEvaluator, ValidationStage,
};
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// The batch report plus the per-stage audit artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub finalized: Vec<FinalizedMessage>,
    pub assessments: Vec<FraudAssessment>,
    pub conversations: Vec<ConversationState>,
    pub report: BatchReport,
    pub audit: AuditTrail,
}

#[derive(Clone)]
pub struct Pipeline {
    validation: ValidationStage,
    classification: ClassificationStage,
    investigation: InvestigationStage,
    grouping: GroupingStage,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        validation: ValidationStage,
        classification: ClassificationStage,
        investigation: InvestigationStage,
        grouping: GroupingStage,
        config: PipelineConfig,
    ) -> Self {
        Self {
            validation,
            classification,
            investigation,
            grouping,
            config,
        }
    }

    pub fn builder(service: Arc<dyn ReasoningService>, config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(service, config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the whole batch through every stage
    pub async fn run(&self, batch: Vec<Message>) -> Result<PipelineOutcome> {
        check_batch(&batch)?;

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(%run_id, messages = batch.len(), "Pipeline run starting");

        let finalized = self.validation.process(&batch).await;

        let revised: Vec<Message> = finalized.iter().map(|f| f.message.clone()).collect();
        let assessments = self.classification.process(&revised).await;

        let cases: Vec<(Message, FraudAssessment)> =
            revised.into_iter().zip(assessments.iter().cloned()).collect();
        let conversations = self.investigation.process(&cases).await;

        let clean: Vec<Message> = finalized
            .iter()
            .zip(&assessments)
            .filter(|(f, a)| f.is_approved() && !a.requires_investigation())
            .map(|(f, _)| f.message.clone())
            .collect();
        let grouping = self.grouping.process(&clean).await;

        let fates: Vec<MessageFate> = finalized
            .iter()
            .zip(&assessments)
            .map(|(f, assessment)| {
                let disposition = if assessment.requires_investigation() {
                    Disposition::Escalated
                } else if !f.is_approved() {
                    Disposition::Unresolved
                } else {
                    let group = grouping
                        .group_of(&f.message.message_id)
                        .map(str::to_string)
                        .unwrap_or_else(|| f.message.group_value(grouping.grouping_key));
                    Disposition::Grouped { group }
                };

                MessageFate {
                    message_id: f.message.message_id.clone(),
                    validation: f.status,
                    screening: assessment.screening,
                    disposition,
                }
            })
            .collect();

        let mut report = BatchReport {
            run_id,
            generated_at: Utc::now(),
            grouping_key: grouping.grouping_key,
            planner_analysis: grouping.planner_analysis,
            planner_error: grouping.planner_error,
            groups: grouping.groups,
            batch_reports: grouping.batch_reports,
            rejected_tasks: grouping.rejected_tasks,
            fates,
            summary: BatchSummary::default(),
        };
        report.summary =
            BatchSummary::compute(&report, &finalized, self.config.high_value_threshold);

        if report.grouped_transaction_count() != clean.len() {
            warn!(
                grouped = report.grouped_transaction_count(),
                clean = clean.len(),
                "Grouped transaction count does not match clean set"
            );
        }

        let audit = AuditTrail::build(&report, &conversations);

        info!(
            %run_id,
            approved = report.summary.approved,
            unresolved = report.summary.unresolved,
            escalated = report.summary.escalated,
            grouped = report.summary.grouped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Pipeline run complete"
        );

        Ok(PipelineOutcome {
            finalized,
            assessments,
            conversations,
            report,
            audit,
        })
    }
}

/// Ids must be present and unique; results are correlated by id
fn check_batch(batch: &[Message]) -> Result<()> {
    let mut seen = HashSet::with_capacity(batch.len());
    for (index, message) in batch.iter().enumerate() {
        if message.message_id.trim().is_empty() {
            return Err(OrchestrationError::InvalidBatch(format!(
                "message at position {} has no id",
                index
            )));
        }
        if !seen.insert(message.message_id.as_str()) {
            return Err(OrchestrationError::InvalidBatch(format!(
                "duplicate message id '{}'",
                message.message_id
            )));
        }
    }
    Ok(())
}

/// Assembles a [`Pipeline`] over one reasoning service.
///
/// Every stage defaults to its agent-backed implementation; the deterministic
/// rule sets can be swapped in per stage.
pub struct PipelineBuilder {
    service: Arc<dyn ReasoningService>,
    config: PipelineConfig,
    evaluator: Option<Arc<dyn MessageEvaluator>>,
    classifiers: Option<Vec<Arc<dyn Classifier>>>,
    planner: Option<Arc<dyn BatchPlanner>>,
}

impl PipelineBuilder {
    pub fn new(service: Arc<dyn ReasoningService>, config: PipelineConfig) -> Self {
        Self {
            service,
            config,
            evaluator: None,
            classifiers: None,
            planner: None,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn MessageEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Validate against the built-in SWIFT rules instead of the evaluator agent
    pub fn with_rule_evaluator(self) -> Self {
        self.with_evaluator(Arc::new(SwiftStandardEvaluator))
    }

    pub fn with_classifiers(mut self, classifiers: Vec<Arc<dyn Classifier>>) -> Self {
        self.classifiers = Some(classifiers);
        self
    }

    /// Screen with the built-in heuristics instead of the screener agents
    pub fn with_rule_classifiers(self) -> Self {
        let threshold = self.config.suspicion_threshold;
        self.with_classifiers(rule_classifiers(threshold))
    }

    pub fn with_planner(mut self, planner: Arc<dyn BatchPlanner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_static_planner(self) -> Self {
        self.with_planner(Arc::new(StaticPlanner))
    }

    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;

        let pool = WorkerPool::new(self.config.worker_pool_size);
        let client = Arc::new(ReasoningClient::new(
            self.service,
            RetryPolicy::from(&self.config),
        ));
        let agent = |role: AgentRole| Agent::new(role, client.clone());

        let evaluator: Arc<dyn MessageEvaluator> = match self.evaluator {
            Some(evaluator) => evaluator,
            None => Arc::new(AgentEvaluator::new(agent(AgentRole::Evaluator))),
        };
        let validation = ValidationStage::new(
            evaluator,
            Arc::new(AgentOptimizer::new(agent(AgentRole::Optimizer))),
            pool.clone(),
            &self.config,
        );

        let classifiers = self.classifiers.unwrap_or_else(|| {
            agent_classifiers(client.clone(), self.config.suspicion_threshold)
        });
        let classification = ClassificationStage::new(classifiers, pool.clone(), &self.config)?;

        let investigation = InvestigationStage::new(client.clone(), pool.clone());

        let planner: Arc<dyn BatchPlanner> = match self.planner {
            Some(planner) => planner,
            None => Arc::new(AgentPlanner::new(agent(AgentRole::Planner))),
        };
        let grouping = GroupingStage::new(
            planner,
            Arc::new(AgentWorker::new(agent(AgentRole::Worker))),
            pool,
            &self.config,
        );

        info!(
            pool_size = self.config.worker_pool_size,
            repair_budget = self.config.repair_budget,
            classifiers = classification.classifier_names().len(),
            "Pipeline assembled"
        );

        Ok(Pipeline::new(
            validation,
            classification,
            investigation,
            grouping,
            self.config,
        ))
    }
}

/// Entry operation: run `batch` under `config` with every stage agent-backed
pub async fn run(
    batch: Vec<Message>,
    config: PipelineConfig,
    service: Arc<dyn ReasoningService>,
) -> Result<PipelineOutcome> {
    Pipeline::builder(service, config).build()?.run(batch).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::ScriptedService;

    #[test]
    fn test_duplicate_ids_are_invalid_batch() {
        let batch = vec![Message::new("M1"), Message::new("M2"), Message::new("M1")];
        let err = check_batch(&batch).unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidBatch(ref m) if m.contains("M1")));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_blank_id_is_invalid_batch() {
        assert!(check_batch(&[Message::new("  ")]).is_err());
        assert!(check_batch(&[]).is_ok());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = PipelineConfig {
            worker_pool_size: 0,
            ..PipelineConfig::default()
        };
        let result = Pipeline::builder(Arc::new(ScriptedService::new()), config).build();
        assert!(matches!(result, Err(OrchestrationError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_empty_batch_yields_empty_report() {
        let service = Arc::new(ScriptedService::new());
        let outcome = run(Vec::new(), PipelineConfig::default(), service.clone())
            .await
            .unwrap();

        assert!(outcome.finalized.is_empty());
        assert!(outcome.report.fates.is_empty());
        assert!(outcome.report.groups.is_empty());
        assert_eq!(outcome.report.summary.total_messages, 0);
        assert!(service.recorded().is_empty());
    }
}
