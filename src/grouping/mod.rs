//! Orchestrator-worker stage
//!
//! One planner call decides the grouping key and follow-up tasks for the
//! clean transactions. Validated tasks are dispatched concurrently, one
//! worker per task, and the collector waits for every task to resolve
//! before merging the reports. A failed task is recorded, never fatal.

use crate::agent::prompts::worker_brief;
use crate::agent::{Agent, AgentRole};
use crate::config::PipelineConfig;
use crate::error::OrchestrationError;
use crate::models::{
    GroupReport, GroupingKey, Message, RejectedTask, Task, TaskStatus, WorkerReport,
};
use crate::pool::WorkerPool;
use crate::reasoning::ReasoningClient;
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub mod plan;

pub use plan::{
    partition, validate, AgentPlanner, BatchOverview, BatchPlanner, PlanProposal, ProposedTask,
    StaticPlanner, ValidatedPlan,
};

/// Executes exactly one task
#[async_trait]
pub trait TaskWorker: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<Value>;
}

/// Worker backed by the generic worker agent, briefed per task type
pub struct AgentWorker {
    agent: Agent,
}

impl AgentWorker {
    pub fn new(agent: Agent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl TaskWorker for AgentWorker {
    async fn execute(&self, task: &Task) -> Result<Value> {
        let assignment = json!({
            "task_id": task.task_id,
            "type": task.task_type,
            "group": task.group,
            "description": task.description,
            "parameters": task.parameters,
            "transactions": task.targets,
        });
        let payload = format!(
            "{}\n\n{}",
            worker_brief(task.task_type),
            serde_json::to_string_pretty(&assignment)?
        );

        self.agent
            .respond_structured::<Value>(&payload, &[])
            .await?
            .into_payload()
    }
}

/// Everything the stage contributes to the batch report
#[derive(Debug, Clone)]
pub struct GroupingOutcome {
    pub grouping_key: GroupingKey,
    pub planner_analysis: Option<String>,
    pub planner_error: Option<String>,
    pub groups: BTreeMap<String, GroupReport>,
    pub batch_reports: Vec<WorkerReport>,
    pub rejected_tasks: Vec<RejectedTask>,
}

impl GroupingOutcome {
    fn empty(grouping_key: GroupingKey) -> Self {
        Self {
            grouping_key,
            planner_analysis: None,
            planner_error: None,
            groups: BTreeMap::new(),
            batch_reports: Vec::new(),
            rejected_tasks: Vec::new(),
        }
    }

    /// Group a message landed in, if any
    pub fn group_of(&self, message_id: &str) -> Option<&str> {
        self.groups
            .values()
            .find(|g| g.transactions.iter().any(|m| m.message_id == message_id))
            .map(|g| g.group.as_str())
    }
}

#[derive(Clone)]
pub struct GroupingStage {
    planner: Arc<dyn BatchPlanner>,
    worker: Arc<dyn TaskWorker>,
    pool: WorkerPool,
    default_key: GroupingKey,
}

impl GroupingStage {
    pub fn new(
        planner: Arc<dyn BatchPlanner>,
        worker: Arc<dyn TaskWorker>,
        pool: WorkerPool,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            planner,
            worker,
            pool,
            default_key: config.default_grouping_key,
        }
    }

    /// Stage wired to the planner and worker agents
    pub fn with_agents(
        client: Arc<ReasoningClient>,
        pool: WorkerPool,
        config: &PipelineConfig,
    ) -> Self {
        Self::new(
            Arc::new(AgentPlanner::new(Agent::new(AgentRole::Planner, client.clone()))),
            Arc::new(AgentWorker::new(Agent::new(AgentRole::Worker, client))),
            pool,
            config,
        )
    }

    /// Plan, dispatch and collect over the clean transactions
    pub async fn process(&self, transactions: &[Message]) -> GroupingOutcome {
        if transactions.is_empty() {
            info!("No clean transactions; skipping orchestrator-worker stage");
            return GroupingOutcome::empty(self.default_key);
        }

        info!(count = transactions.len(), "Orchestrator-worker stage starting");

        let overview = BatchOverview::new(transactions, self.default_key);
        let (proposal, mut planner_error) =
            match self.pool.run(self.planner.plan(&overview)).await {
                Ok(proposal) => (proposal, None),
                Err(e) => {
                    warn!(error = %e, "Planner failed; falling back to default grouping");
                    (PlanProposal::default(), Some(e.to_string()))
                }
            };

        let key = match proposal.grouping_key.as_deref().map(str::parse::<GroupingKey>) {
            Some(Ok(key)) => key,
            Some(Err(e)) => {
                warn!(error = %e, default = %self.default_key, "Planner proposed an unusable grouping key");
                planner_error.get_or_insert_with(|| e.to_string());
                self.default_key
            }
            None => self.default_key,
        };

        let groups = partition(transactions, key);
        let validated = validate(&proposal.tasks, key, &groups, transactions);
        for rejected in &validated.rejected {
            warn!(
                task_id = ?rejected.task_id,
                requested_type = %rejected.requested_type,
                reason = %rejected.reason,
                "Task rejected before dispatch"
            );
        }

        info!(
            grouping_key = %key,
            groups = groups.len(),
            tasks = validated.tasks.len(),
            rejected = validated.rejected.len(),
            "Plan validated"
        );

        let reports = self.dispatch(validated.tasks).await;
        let outcome = collect(
            key,
            proposal.analysis,
            planner_error,
            groups,
            reports,
            validated.rejected,
        );

        info!(
            groups = outcome.groups.len(),
            batch_reports = outcome.batch_reports.len(),
            "Orchestrator-worker stage complete"
        );
        outcome
    }

    /// Run every task concurrently; one report per task, in task order
    pub async fn dispatch(&self, tasks: Vec<Task>) -> Vec<WorkerReport> {
        let mut set = JoinSet::new();
        for (index, task) in tasks.iter().cloned().enumerate() {
            let stage = self.clone();
            set.spawn(async move { (index, stage.execute(task).await) });
        }

        let mut slots: Vec<Option<WorkerReport>> = vec![None; tasks.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, report)) => slots[index] = Some(report),
                Err(e) => warn!(error = %e, "Worker task aborted"),
            }
        }

        let reports: Vec<WorkerReport> = slots
            .into_iter()
            .zip(&tasks)
            .map(|(slot, task)| {
                slot.unwrap_or_else(|| failed(task, "worker task aborted".to_string(), 0))
            })
            .collect();

        let failures = reports.iter().filter(|r| r.status == TaskStatus::Failed).count();
        if failures > 0 {
            let partial = OrchestrationError::PartialStageFailure {
                stage: "orchestrator-worker",
                failed: failures,
                total: reports.len(),
            };
            warn!(error = %partial, "Some tasks failed");
        }

        reports
    }

    async fn execute(&self, task: Task) -> WorkerReport {
        let started = Instant::now();
        debug!(task_id = %task.task_id, task_type = %task.task_type, "Dispatching task");

        let outcome = self.pool.run(self.worker.execute(&task)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => WorkerReport {
                task_id: task.task_id,
                task_type: task.task_type,
                group: task.group,
                status: TaskStatus::Completed,
                result,
                error: None,
                latency_ms,
            },
            Err(e) => {
                warn!(task_id = %task.task_id, error = %e, "Task failed");
                failed(&task, e.to_string(), latency_ms)
            }
        }
    }
}

fn failed(task: &Task, error: String, latency_ms: u64) -> WorkerReport {
    WorkerReport {
        task_id: task.task_id.clone(),
        task_type: task.task_type,
        group: task.group.clone(),
        status: TaskStatus::Failed,
        result: json!({}),
        error: Some(error),
        latency_ms,
    }
}

/// Merge worker reports into per-group and batch-wide sections
fn collect(
    key: GroupingKey,
    planner_analysis: Option<String>,
    planner_error: Option<String>,
    partition: BTreeMap<String, Vec<Message>>,
    reports: Vec<WorkerReport>,
    rejected_tasks: Vec<RejectedTask>,
) -> GroupingOutcome {
    let mut groups: BTreeMap<String, GroupReport> = partition
        .into_iter()
        .map(|(group, transactions)| {
            let report = GroupReport {
                group: group.clone(),
                transactions,
                reports: Vec::new(),
            };
            (group, report)
        })
        .collect();

    let mut batch_reports = Vec::new();
    for report in reports {
        match report.group.as_deref().and_then(|g| groups.get_mut(g)) {
            Some(group) => group.reports.push(report),
            None => batch_reports.push(report),
        }
    }

    GroupingOutcome {
        grouping_key: key,
        planner_analysis,
        planner_error,
        groups,
        batch_reports,
        rejected_tasks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskType;
    use crate::reasoning::{RetryPolicy, Script, ScriptedService};
    use std::time::Duration;

    fn message(id: &str, bic: &str, currency: &str, amount: f64) -> Message {
        Message {
            message_type: Some("MT103".to_string()),
            reference: Some(format!("REF{}", id)),
            amount: Some(amount),
            currency: Some(currency.to_string()),
            sender_bic: Some(bic.to_string()),
            receiver_bic: Some("BARCGB22XXX".to_string()),
            ..Message::new(id)
        }
    }

    fn batch() -> Vec<Message> {
        vec![
            message("M1", "CHASUS33XXX", "USD", 1200.5),
            message("M2", "DEUTDEFFXXX", "EUR", 830.0),
            message("M3", "CHASUS33XXX", "EUR", 99.99),
            message("M4", "BNPAFRPPXXX", "USD", 4100.25),
        ]
    }

    fn stage(service: Arc<ScriptedService>) -> GroupingStage {
        let client = Arc::new(ReasoningClient::new(
            service,
            RetryPolicy {
                request_timeout: Duration::from_secs(1),
                retry_budget: 0,
                backoff: Duration::from_millis(1),
            },
        ));
        GroupingStage::with_agents(client, WorkerPool::new(4), &PipelineConfig::default())
    }

    #[tokio::test]
    async fn test_groups_cover_every_transaction_once() {
        let service = Arc::new(
            ScriptedService::new()
                .on(
                    AgentRole::Planner,
                    Script::json(json!({
                        "analysis": "Two banks dominate",
                        "grouping_key": "bank",
                        "tasks": [
                            {"task_id": "verify", "type": "amount_verification"},
                            {"task_id": "fraud", "type": "fraud_analysis"}
                        ]
                    })),
                )
                .on(AgentRole::Worker, Script::json(json!({"ok": true}))),
        );

        let outcome = stage(service.clone()).process(&batch()).await;

        assert_eq!(outcome.grouping_key, GroupingKey::Bank);
        assert_eq!(outcome.planner_analysis.as_deref(), Some("Two banks dominate"));
        assert_eq!(
            outcome.groups.keys().cloned().collect::<Vec<_>>(),
            vec!["BNPA", "CHAS", "DEUT"]
        );
        let total: usize = outcome.groups.values().map(|g| g.transactions.len()).sum();
        assert_eq!(total, 4);
        assert!(outcome.groups.values().all(|g| g.reports.len() == 1));

        assert_eq!(outcome.batch_reports.len(), 1);
        assert_eq!(outcome.batch_reports[0].task_id, "verify");
        assert_eq!(outcome.rejected_tasks.len(), 1);
        assert_eq!(outcome.rejected_tasks[0].requested_type, "fraud_analysis");

        // Three group tasks plus the verification; the rejected task never ran.
        assert_eq!(service.calls(AgentRole::Worker), 4);
        assert_eq!(outcome.group_of("M3"), Some("CHAS"));
    }

    #[tokio::test]
    async fn test_malformed_task_does_not_discard_the_plan() {
        let service = Arc::new(
            ScriptedService::new()
                .on(
                    AgentRole::Planner,
                    Script::json(json!({
                        "grouping_key": "bank",
                        "tasks": [
                            {"type": "amount_verification"},
                            {"description": "no type"}
                        ]
                    })),
                )
                .on(AgentRole::Worker, Script::json(json!({"ok": true}))),
        );

        let outcome = stage(service).process(&batch()).await;

        assert_eq!(outcome.grouping_key, GroupingKey::Bank);
        assert!(outcome.planner_error.is_none());
        assert_eq!(outcome.batch_reports.len(), 1);
        assert_eq!(outcome.rejected_tasks.len(), 1);
        assert!(outcome.rejected_tasks[0].reason.starts_with("malformed task"));
    }

    #[tokio::test]
    async fn test_failed_task_keeps_its_group() {
        let service = Arc::new(
            ScriptedService::new()
                .on(
                    AgentRole::Planner,
                    Script::json(json!({"grouping_key": "currency", "tasks": []})),
                )
                .on_matching(
                    AgentRole::Worker,
                    "\"group\": \"EUR\"",
                    Script::reject("quota exceeded"),
                )
                .on(AgentRole::Worker, Script::json(json!({"count": 2}))),
        );

        let outcome = stage(service).process(&batch()).await;

        let eur = &outcome.groups["EUR"];
        assert_eq!(eur.transactions.len(), 2);
        assert_eq!(eur.reports[0].status, TaskStatus::Failed);
        assert!(eur.reports[0].error.is_some());
        assert_eq!(outcome.groups["USD"].reports[0].status, TaskStatus::Completed);
        let failed = outcome
            .groups
            .values()
            .flat_map(|g| g.reports.iter())
            .filter(|r| r.status == TaskStatus::Failed)
            .count();
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn test_planner_failure_falls_back_to_default_key() {
        let service = Arc::new(
            ScriptedService::new()
                .on(AgentRole::Planner, Script::fail("connection refused"))
                .on(AgentRole::Worker, Script::json(json!({}))),
        );

        let outcome = stage(service).process(&batch()).await;

        assert_eq!(outcome.grouping_key, GroupingKey::Currency);
        assert!(outcome.planner_error.is_some());
        assert_eq!(outcome.groups.len(), 2);
        assert!(outcome
            .groups
            .values()
            .flat_map(|g| g.reports.iter())
            .all(|r| r.task_type == TaskType::GroupByCurrency));
    }

    #[tokio::test]
    async fn test_bad_grouping_key_is_recorded() {
        let service = Arc::new(
            ScriptedService::new()
                .on(
                    AgentRole::Planner,
                    Script::json(json!({"grouping_key": "country", "tasks": []})),
                )
                .on(AgentRole::Worker, Script::json(json!({}))),
        );

        let outcome = stage(service).process(&batch()).await;
        assert_eq!(outcome.grouping_key, GroupingKey::Currency);
        assert!(outcome
            .planner_error
            .as_deref()
            .is_some_and(|e| e.contains("country")));
    }

    #[tokio::test]
    async fn test_empty_input_skips_planner() {
        let service = Arc::new(ScriptedService::new());
        let outcome = stage(service.clone()).process(&[]).await;

        assert!(outcome.groups.is_empty());
        assert_eq!(service.calls(AgentRole::Planner), 0);
    }

    #[tokio::test]
    async fn test_worker_prompt_carries_brief() {
        let service = Arc::new(
            ScriptedService::new()
                .on(
                    AgentRole::Planner,
                    Script::json(json!({
                        "grouping_key": "currency",
                        "tasks": [{"type": "summary_report"}]
                    })),
                )
                .on(AgentRole::Worker, Script::json(json!({}))),
        );

        stage(service.clone()).process(&batch()).await;

        let prompts: Vec<String> = service
            .recorded()
            .into_iter()
            .filter(|c| c.role == AgentRole::Worker)
            .map(|c| c.prompt)
            .collect();
        assert!(prompts.iter().any(|p| p.contains("Report Generator")));
        assert_eq!(
            prompts.iter().filter(|p| p.contains("Settlement Clerk")).count(),
            2
        );
    }
}
