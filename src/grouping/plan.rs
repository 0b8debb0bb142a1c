//! Batch planning and task validation
//!
//! The planner proposes; the core decides. Proposed tasks are checked
//! against the closed [`TaskType`] set and against the partition the core
//! computed, and anything that does not fit is rejected before dispatch.

use crate::agent::Agent;
use crate::models::{GroupingKey, Message, RejectedTask, Task, TaskType};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};

/// Compact view of the clean transactions handed to the planner
#[derive(Debug, Clone, Serialize)]
pub struct BatchOverview {
    pub transaction_count: usize,
    pub total_amount: f64,
    pub by_currency: BTreeMap<String, usize>,
    pub by_bank: BTreeMap<String, usize>,
    pub default_grouping_key: GroupingKey,
    pub allowed_task_types: Vec<&'static str>,
}

impl BatchOverview {
    pub fn new(transactions: &[Message], default_grouping_key: GroupingKey) -> Self {
        let mut by_currency = BTreeMap::new();
        let mut by_bank = BTreeMap::new();
        for message in transactions {
            *by_currency
                .entry(message.group_value(GroupingKey::Currency))
                .or_insert(0) += 1;
            *by_bank.entry(message.group_value(GroupingKey::Bank)).or_insert(0) += 1;
        }

        Self {
            transaction_count: transactions.len(),
            total_amount: transactions.iter().filter_map(|m| m.amount).sum(),
            by_currency,
            by_bank,
            default_grouping_key,
            allowed_task_types: TaskType::ALL.iter().map(|t| t.as_str()).collect(),
        }
    }
}

/// Planner output as proposed, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanProposal {
    #[serde(default)]
    pub analysis: Option<String>,
    #[serde(default)]
    pub grouping_key: Option<String>,
    #[serde(default, deserialize_with = "decode_tasks")]
    pub tasks: Vec<ProposedTask>,
}

/// Decodes each task on its own so one bad entry cannot sink the plan
fn decode_tasks<'de, D>(deserializer: D) -> std::result::Result<Vec<ProposedTask>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = match Value::deserialize(deserializer)? {
        Value::Array(entries) => entries,
        Value::Null => Vec::new(),
        other => vec![other],
    };
    Ok(entries.into_iter().map(ProposedTask::from_entry).collect())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedTask {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(rename = "type", alias = "task_type")]
    pub task_type: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Value,
    /// Set when the entry could not be decoded; such tasks are always rejected
    #[serde(skip)]
    pub malformed: Option<String>,
}

impl ProposedTask {
    fn from_entry(entry: Value) -> Self {
        match serde_json::from_value::<ProposedTask>(entry.clone()) {
            Ok(task) => task,
            Err(e) => {
                let field = |name: &str| {
                    entry.get(name).map(|value| match value {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    })
                };
                ProposedTask {
                    task_id: field("task_id"),
                    task_type: field("type").or_else(|| field("task_type")).unwrap_or_default(),
                    group: field("group"),
                    description: field("description"),
                    parameters: Value::Null,
                    malformed: Some(format!("malformed task: {}", e)),
                }
            }
        }
    }

    fn reject(&self, reason: impl Into<String>) -> RejectedTask {
        RejectedTask {
            task_id: self.task_id.clone(),
            requested_type: self.task_type.clone(),
            group: self.group.clone(),
            reason: reason.into(),
        }
    }
}

/// Trait for batch planning
#[async_trait]
pub trait BatchPlanner: Send + Sync {
    async fn plan(&self, overview: &BatchOverview) -> Result<PlanProposal>;
}

/// Planner backed by the planning agent
pub struct AgentPlanner {
    agent: Agent,
}

impl AgentPlanner {
    pub fn new(agent: Agent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl BatchPlanner for AgentPlanner {
    async fn plan(&self, overview: &BatchOverview) -> Result<PlanProposal> {
        let payload = serde_json::to_string_pretty(overview)?;
        self.agent
            .respond_structured::<PlanProposal>(&payload, &[])
            .await?
            .into_payload()
    }
}

/// Fixed plan: group under the default key, verify amounts and summarise
pub struct StaticPlanner;

#[async_trait]
impl BatchPlanner for StaticPlanner {
    async fn plan(&self, overview: &BatchOverview) -> Result<PlanProposal> {
        let task = |task_type: TaskType, description: &str| ProposedTask {
            task_id: None,
            task_type: task_type.as_str().to_string(),
            group: None,
            description: Some(description.to_string()),
            parameters: json!({}),
            malformed: None,
        };

        Ok(PlanProposal {
            analysis: Some(format!(
                "{} clean transaction(s) across {} currenc(ies) and {} bank(s)",
                overview.transaction_count,
                overview.by_currency.len(),
                overview.by_bank.len()
            )),
            grouping_key: Some(overview.default_grouping_key.as_str().to_string()),
            tasks: vec![
                task(TaskType::AmountVerification, "Verify amounts across the clean batch"),
                task(TaskType::SummaryReport, "Summarise the clean batch"),
            ],
        })
    }
}

/// Tasks ready for dispatch plus everything refused on the way
#[derive(Debug, Default)]
pub struct ValidatedPlan {
    pub tasks: Vec<Task>,
    pub rejected: Vec<RejectedTask>,
}

/// Validate proposed tasks against the partition.
///
/// Every group ends up with exactly one grouping task: the planner's when it
/// proposed a matching one, otherwise one built here. A grouping task with
/// no group serves as the template for groups the planner did not name.
pub fn validate(
    proposed: &[ProposedTask],
    key: GroupingKey,
    partition: &BTreeMap<String, Vec<Message>>,
    transactions: &[Message],
) -> ValidatedPlan {
    let mut plan = ValidatedPlan::default();
    let mut task_ids: HashSet<String> = HashSet::new();
    let mut grouped: BTreeMap<String, Task> = BTreeMap::new();
    let mut template: Option<&ProposedTask> = None;

    for proposal in proposed {
        if let Some(defect) = &proposal.malformed {
            plan.rejected.push(proposal.reject(defect.clone()));
            continue;
        }

        let task_type = match proposal.task_type.parse::<TaskType>() {
            Ok(task_type) => task_type,
            Err(e) => {
                plan.rejected.push(proposal.reject(e.to_string()));
                continue;
            }
        };

        if task_type.is_grouping() && task_type != key.task_type() {
            plan.rejected.push(proposal.reject(format!(
                "{} does not match grouping key {}",
                task_type, key
            )));
            continue;
        }

        let targets = match proposal.group.as_deref() {
            Some(group) => match partition.get(group) {
                Some(members) => members.clone(),
                None => {
                    plan.rejected
                        .push(proposal.reject(format!("unknown group '{}'", group)));
                    continue;
                }
            },
            None if task_type.is_grouping() => {
                if template.is_none() {
                    template = Some(proposal);
                } else {
                    plan.rejected
                        .push(proposal.reject("duplicate grouping template"));
                }
                continue;
            }
            None => transactions.to_vec(),
        };

        if task_type.is_grouping() {
            if let Some(group) = proposal.group.as_deref() {
                if grouped.contains_key(group) {
                    plan.rejected.push(proposal.reject(format!(
                        "group '{}' already has a grouping task",
                        group
                    )));
                    continue;
                }
            }
        }

        let task_id = proposal.task_id.clone().unwrap_or_else(|| {
            format!(
                "{}-{}",
                task_type,
                proposal.group.as_deref().unwrap_or("batch")
            )
        });
        if !task_ids.insert(task_id.clone()) {
            plan.rejected
                .push(proposal.reject(format!("duplicate task id '{}'", task_id)));
            continue;
        }

        let task = Task {
            task_id,
            task_type,
            group: proposal.group.clone(),
            description: proposal
                .description
                .clone()
                .unwrap_or_else(|| task_type.as_str().replace('_', " ")),
            parameters: normalize(&proposal.parameters),
            targets,
        };

        match (task_type.is_grouping(), proposal.group.clone()) {
            (true, Some(group)) => {
                grouped.insert(group, task);
            }
            _ => plan.tasks.push(task),
        }
    }

    for (group, members) in partition {
        if grouped.contains_key(group) {
            continue;
        }

        let mut task_id = format!("{}-{}", key.task_type(), group);
        while task_ids.contains(&task_id) {
            task_id.push('+');
        }
        task_ids.insert(task_id.clone());

        grouped.insert(
            group.clone(),
            Task {
                task_id,
                task_type: key.task_type(),
                group: Some(group.clone()),
                description: template
                    .and_then(|t| t.description.clone())
                    .unwrap_or_else(|| format!("Summarise {} group {}", key, group)),
                parameters: template.map_or_else(|| json!({}), |t| normalize(&t.parameters)),
                targets: members.clone(),
            },
        );
    }

    let mut tasks: Vec<Task> = grouped.into_values().collect();
    tasks.append(&mut plan.tasks);
    plan.tasks = tasks;
    plan
}

fn normalize(parameters: &Value) -> Value {
    if parameters.is_null() {
        json!({})
    } else {
        parameters.clone()
    }
}

/// Split transactions by their value under `key`, keeping input order
pub fn partition(transactions: &[Message], key: GroupingKey) -> BTreeMap<String, Vec<Message>> {
    let mut groups: BTreeMap<String, Vec<Message>> = BTreeMap::new();
    for message in transactions {
        groups
            .entry(message.group_value(key))
            .or_default()
            .push(message.clone());
    }
    groups
}
