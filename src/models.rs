//! Core data models for the SWIFT agent pipeline

use crate::agent::AgentRole;
use crate::error::OrchestrationError;
use crate::report::BatchSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//
// ================= Message =================
//

/// Fields a message must carry before it can be approved
pub const REQUIRED_FIELDS: &[&str] = &[
    "message_type",
    "reference",
    "amount",
    "currency",
    "sender_bic",
    "receiver_bic",
];

/// A SWIFT payment message as handed over by the message source.
///
/// Messages are value data: stages never mutate one in place, they produce a
/// new revision through [`Message::revise`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub message_id: String,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub sender_bic: Option<String>,
    #[serde(default)]
    pub receiver_bic: Option<String>,
    #[serde(default)]
    pub value_date: Option<String>,
    #[serde(default)]
    pub ordering_customer: Option<String>,
    #[serde(default)]
    pub beneficiary: Option<String>,
    #[serde(default)]
    pub remittance_info: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// 0 for the message as received, bumped on every repair
    #[serde(default)]
    pub revision: u32,
    #[serde(default)]
    pub corrected: bool,

    /// Source-specific fields with no typed home
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Message {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            message_type: None,
            reference: None,
            amount: None,
            currency: None,
            sender_bic: None,
            receiver_bic: None,
            value_date: None,
            ordering_customer: None,
            beneficiary: None,
            remittance_info: None,
            created_at: None,
            revision: 0,
            corrected: false,
            extra: BTreeMap::new(),
        }
    }

    /// Required fields that are absent or blank
    pub fn missing_required_fields(&self) -> Vec<&'static str> {
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());

        REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| match *field {
                "message_type" => blank(&self.message_type),
                "reference" => blank(&self.reference),
                "amount" => self.amount.is_none(),
                "currency" => blank(&self.currency),
                "sender_bic" => blank(&self.sender_bic),
                "receiver_bic" => blank(&self.receiver_bic),
                _ => false,
            })
            .collect()
    }

    /// Build the next revision from an optimizer replacement.
    ///
    /// The replacement keeps this message's id; any field it left out is
    /// carried over from `self`.
    pub fn revise(&self, mut replacement: Message) -> Message {
        fn carry(target: &mut Option<String>, source: &Option<String>) {
            if target.as_deref().map_or(true, |s| s.trim().is_empty()) {
                *target = source.clone();
            }
        }

        replacement.message_id = self.message_id.clone();
        carry(&mut replacement.message_type, &self.message_type);
        carry(&mut replacement.reference, &self.reference);
        carry(&mut replacement.currency, &self.currency);
        carry(&mut replacement.sender_bic, &self.sender_bic);
        carry(&mut replacement.receiver_bic, &self.receiver_bic);
        carry(&mut replacement.value_date, &self.value_date);
        carry(&mut replacement.ordering_customer, &self.ordering_customer);
        carry(&mut replacement.beneficiary, &self.beneficiary);
        carry(&mut replacement.remittance_info, &self.remittance_info);
        for (key, value) in &self.extra {
            replacement
                .extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        if replacement.amount.is_none() {
            replacement.amount = self.amount;
        }
        if replacement.created_at.is_none() {
            replacement.created_at = self.created_at;
        }

        replacement.revision = self.revision.saturating_add(1);
        replacement.corrected = true;
        replacement
    }

    /// Institution code of the sending bank (first four BIC characters)
    pub fn sender_bank(&self) -> Option<&str> {
        self.sender_bic.as_deref().and_then(|bic| bic.get(0..4))
    }

    pub fn sender_country(&self) -> Option<&str> {
        self.sender_bic.as_deref().and_then(country_of)
    }

    pub fn receiver_country(&self) -> Option<&str> {
        self.receiver_bic.as_deref().and_then(country_of)
    }

    /// Value of this message under a grouping criterion
    pub fn group_value(&self, key: GroupingKey) -> String {
        let bank = self.sender_bank().unwrap_or("UNKNOWN").to_uppercase();
        let currency = self.currency.as_deref().unwrap_or("UNKNOWN").to_uppercase();
        match key {
            GroupingKey::Bank => bank,
            GroupingKey::Currency => currency,
            GroupingKey::BankCurrency => format!("{}/{}", bank, currency),
        }
    }
}

/// Country code of a BIC (positions 5-6)
fn country_of(bic: &str) -> Option<&str> {
    bic.get(4..6)
}

//
// ================= Evaluator-Optimizer =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Approved,
    Unresolved,
}

/// Outcome of one evaluator pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    pub valid: bool,
    #[serde(default)]
    pub defects: Vec<String>,
}

/// One message after the Evaluator-Optimizer stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizedMessage {
    pub message: Message,
    pub status: ValidationStatus,
    /// Defects still open when the message was finalized
    pub defects: Vec<String>,
    pub evaluations: u32,
    pub repairs: u32,
}

impl FinalizedMessage {
    pub fn is_approved(&self) -> bool {
        self.status == ValidationStatus::Approved
    }
}

//
// ================= Agent I/O =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseShape {
    Text,
    Json,
}

/// One request to an agent. Built fresh for every invocation.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRequest {
    pub role: AgentRole,
    pub prompt: String,
    pub prior_turns: Vec<Turn>,
    pub shape: ResponseShape,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ResponseError {
    SchemaMismatch(String),
    Rejected(String),
    Unavailable(String),
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseError::SchemaMismatch(d) => write!(f, "schema mismatch: {}", d),
            ResponseError::Rejected(d) => write!(f, "rejected: {}", d),
            ResponseError::Unavailable(d) => write!(f, "unavailable: {}", d),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub role: AgentRole,
    pub text: String,
    pub parsed: Option<Value>,
    pub latency_ms: u64,
    pub attempts: u32,
    pub error: Option<ResponseError>,
}

impl AgentResponse {
    /// Placeholder response for a call that never produced output
    pub fn unavailable(role: AgentRole, attempts: u32, reason: impl Into<String>) -> Self {
        Self {
            role,
            text: String::new(),
            parsed: None,
            latency_ms: 0,
            attempts,
            error: Some(ResponseError::Unavailable(reason.into())),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

//
// ================= Classification =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub classifier: String,
    pub suspicious: bool,
    pub score: f32,
    pub threshold: f32,
    pub rationale: String,
}

impl Verdict {
    /// Suspicious and at or above the classifier's own threshold
    pub fn is_positive(&self) -> bool {
        self.suspicious && self.score >= self.threshold
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClassifierOutcome {
    Verdict(Verdict),
    Unavailable { classifier: String, reason: String },
}

impl ClassifierOutcome {
    pub fn classifier(&self) -> &str {
        match self {
            ClassifierOutcome::Verdict(v) => &v.classifier,
            ClassifierOutcome::Unavailable { classifier, .. } => classifier,
        }
    }
}

/// Every classifier outcome for one message, in completion order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerdictSet {
    pub message_id: String,
    outcomes: Vec<ClassifierOutcome>,
}

impl VerdictSet {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            outcomes: Vec::new(),
        }
    }

    pub fn push(&mut self, outcome: ClassifierOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn contains(&self, classifier: &str) -> bool {
        self.outcomes.iter().any(|o| o.classifier() == classifier)
    }

    pub fn verdicts(&self) -> impl Iterator<Item = &Verdict> {
        self.outcomes.iter().filter_map(|o| match o {
            ClassifierOutcome::Verdict(v) => Some(v),
            ClassifierOutcome::Unavailable { .. } => None,
        })
    }

    pub fn unavailable(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().filter_map(|o| match o {
            ClassifierOutcome::Unavailable { classifier, .. } => Some(classifier.as_str()),
            ClassifierOutcome::Verdict(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Screening {
    Clear,
    Flagged,
    /// No classifier produced a verdict
    Indeterminate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAssessment {
    pub message_id: String,
    pub screening: Screening,
    pub flagged: bool,
    pub contributing: Vec<String>,
    pub unavailable: Vec<String>,
    /// Highest score among available verdicts
    pub risk_score: f32,
    pub rationale: String,
    pub verdicts: VerdictSet,
}

impl FraudAssessment {
    /// Flagged and indeterminate messages both go to the analyst chain
    pub fn requires_investigation(&self) -> bool {
        self.screening != Screening::Clear
    }
}

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: AgentRole,
    pub response: AgentResponse,
}

/// Append-only audit trail of one message's analyst chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub message_id: String,
    turns: Vec<Turn>,
}

impl ConversationState {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            turns: Vec::new(),
        }
    }

    pub fn append(&mut self, role: AgentRole, response: AgentResponse) {
        self.turns.push(Turn { role, response });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn roles(&self) -> Vec<AgentRole> {
        self.turns.iter().map(|t| t.role).collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

//
// ================= Orchestrator-Worker =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum GroupingKey {
    Bank,
    Currency,
    BankCurrency,
}

impl GroupingKey {
    /// Task type that groups transactions under this key
    pub fn task_type(self) -> TaskType {
        match self {
            GroupingKey::Bank => TaskType::GroupByBank,
            GroupingKey::Currency => TaskType::GroupByCurrency,
            GroupingKey::BankCurrency => TaskType::GroupByBankCurrency,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GroupingKey::Bank => "bank",
            GroupingKey::Currency => "currency",
            GroupingKey::BankCurrency => "bank_currency",
        }
    }
}

impl FromStr for GroupingKey {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bank" => Ok(GroupingKey::Bank),
            "currency" => Ok(GroupingKey::Currency),
            "bank_currency" | "hybrid" => Ok(GroupingKey::BankCurrency),
            other => Err(OrchestrationError::InvalidConfig(format!(
                "unknown grouping key '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for GroupingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of task types a worker may execute
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    GroupByBank,
    GroupByCurrency,
    GroupByBankCurrency,
    AmountVerification,
    SummaryReport,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::GroupByBank,
        TaskType::GroupByCurrency,
        TaskType::GroupByBankCurrency,
        TaskType::AmountVerification,
        TaskType::SummaryReport,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::GroupByBank => "group_by_bank",
            TaskType::GroupByCurrency => "group_by_currency",
            TaskType::GroupByBankCurrency => "group_by_bank_currency",
            TaskType::AmountVerification => "amount_verification",
            TaskType::SummaryReport => "summary_report",
        }
    }

    pub fn is_grouping(self) -> bool {
        matches!(
            self,
            TaskType::GroupByBank | TaskType::GroupByCurrency | TaskType::GroupByBankCurrency
        )
    }
}

impl FromStr for TaskType {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| OrchestrationError::UnknownTaskType(s.to_string()))
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated unit of work. Immutable once dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub task_type: TaskType,
    /// Group the task targets; `None` targets the whole clean set
    pub group: Option<String>,
    pub description: String,
    pub parameters: Value,
    pub targets: Vec<Message>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReport {
    pub task_id: String,
    pub task_type: TaskType,
    pub group: Option<String>,
    pub status: TaskStatus,
    pub result: Value,
    pub error: Option<String>,
    pub latency_ms: u64,
}

/// A planned task refused before dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedTask {
    pub task_id: Option<String>,
    pub requested_type: String,
    pub group: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupReport {
    pub group: String,
    pub transactions: Vec<Message>,
    pub reports: Vec<WorkerReport>,
}

//
// ================= Batch Outcome =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum Disposition {
    Grouped { group: String },
    Escalated,
    Unresolved,
}

/// Where one input message ended up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageFate {
    pub message_id: String,
    pub validation: ValidationStatus,
    pub screening: Screening,
    #[serde(flatten)]
    pub disposition: Disposition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub grouping_key: GroupingKey,
    pub planner_analysis: Option<String>,
    pub planner_error: Option<String>,
    pub groups: BTreeMap<String, GroupReport>,
    /// Reports of tasks that targeted the whole clean set
    pub batch_reports: Vec<WorkerReport>,
    pub rejected_tasks: Vec<RejectedTask>,
    pub fates: Vec<MessageFate>,
    pub summary: BatchSummary,
}

impl BatchReport {
    /// Number of transactions across all groups
    pub fn grouped_transaction_count(&self) -> usize {
        self.groups.values().map(|g| g.transactions.len()).sum()
    }

    /// Every worker report, group tasks first
    pub fn worker_reports(&self) -> impl Iterator<Item = &WorkerReport> {
        self.groups
            .values()
            .flat_map(|g| g.reports.iter())
            .chain(self.batch_reports.iter())
    }
}
