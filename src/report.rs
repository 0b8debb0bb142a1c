//! Batch summary statistics and the human-readable report
//!
//! The core only renders; persisting the text is up to the caller.

use crate::models::{
    BatchReport, Disposition, FinalizedMessage, Message, Screening, TaskStatus, ValidationStatus,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

const TOP_TRANSACTIONS: usize = 10;
const RULE_WIDTH: usize = 80;

/// One transaction as listed in the report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionLine {
    pub message_id: String,
    pub message_type: Option<String>,
    pub amount: f64,
    pub currency: Option<String>,
    pub sender_bic: Option<String>,
    pub receiver_bic: Option<String>,
    pub reference: Option<String>,
    pub validation: ValidationStatus,
    pub screening: Screening,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_messages: usize,
    pub approved: usize,
    pub unresolved: usize,
    pub corrected: usize,
    pub flagged: usize,
    pub indeterminate: usize,
    pub escalated: usize,
    pub grouped: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub tasks_rejected: usize,
    pub by_message_type: BTreeMap<String, usize>,
    pub total_amount: f64,
    /// Share of messages that reached a group with no unresolved or
    /// flagged status
    pub stp_rate: f64,
    pub high_value_threshold: f64,
    pub top_transactions: Vec<TransactionLine>,
    /// Transactions above the high-value threshold, in batch order
    pub high_value: Vec<TransactionLine>,
}

impl BatchSummary {
    /// Summarise a report whose fates are already filled in
    pub fn compute(
        report: &BatchReport,
        finalized: &[FinalizedMessage],
        high_value_threshold: f64,
    ) -> Self {
        let screening: BTreeMap<&str, Screening> = report
            .fates
            .iter()
            .map(|fate| (fate.message_id.as_str(), fate.screening))
            .collect();

        let lines: Vec<TransactionLine> = finalized
            .iter()
            .map(|f| {
                let screening = screening
                    .get(f.message.message_id.as_str())
                    .copied()
                    .unwrap_or(Screening::Indeterminate);
                line(&f.message, f.status, screening)
            })
            .collect();

        let mut by_message_type = BTreeMap::new();
        for f in finalized {
            let message_type = f.message.message_type.as_deref().unwrap_or("UNKNOWN");
            *by_message_type.entry(message_type.to_string()).or_insert(0) += 1;
        }

        let count = |wanted: fn(&Disposition) -> bool| {
            report.fates.iter().filter(|f| wanted(&f.disposition)).count()
        };
        let grouped = count(|d| matches!(d, Disposition::Grouped { .. }));

        let (tasks_completed, tasks_failed) = report
            .worker_reports()
            .fold((0, 0), |(done, failed), r| match r.status {
                TaskStatus::Completed => (done + 1, failed),
                TaskStatus::Failed => (done, failed + 1),
            });

        let mut top_transactions = lines.clone();
        top_transactions
            .sort_by(|a, b| b.amount.partial_cmp(&a.amount).unwrap_or(Ordering::Equal));
        top_transactions.truncate(TOP_TRANSACTIONS);

        let total = report.fates.len();
        Self {
            total_messages: total,
            approved: finalized.iter().filter(|f| f.is_approved()).count(),
            unresolved: count(|d| matches!(d, Disposition::Unresolved)),
            corrected: finalized.iter().filter(|f| f.message.corrected).count(),
            flagged: report
                .fates
                .iter()
                .filter(|f| f.screening == Screening::Flagged)
                .count(),
            indeterminate: report
                .fates
                .iter()
                .filter(|f| f.screening == Screening::Indeterminate)
                .count(),
            escalated: count(|d| matches!(d, Disposition::Escalated)),
            grouped,
            tasks_completed,
            tasks_failed,
            tasks_rejected: report.rejected_tasks.len(),
            by_message_type,
            total_amount: lines.iter().map(|l| l.amount).sum(),
            stp_rate: if total == 0 {
                0.0
            } else {
                grouped as f64 / total as f64
            },
            high_value_threshold,
            high_value: lines
                .iter()
                .filter(|l| l.amount > high_value_threshold)
                .cloned()
                .collect(),
            top_transactions,
        }
    }
}

fn line(message: &Message, validation: ValidationStatus, screening: Screening) -> TransactionLine {
    TransactionLine {
        message_id: message.message_id.clone(),
        message_type: message.message_type.clone(),
        amount: message.amount.unwrap_or(0.0),
        currency: message.currency.clone(),
        sender_bic: message.sender_bic.clone(),
        receiver_bic: message.receiver_bic.clone(),
        reference: message.reference.clone(),
        validation,
        screening,
    }
}

fn or_na(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("N/A")
}

fn describe(line: &TransactionLine) -> String {
    format!(
        "{} | {:>15.2} {} | Type: {} | Status: {:?} | Screening: {:?}",
        line.message_id,
        line.amount,
        or_na(&line.currency),
        or_na(&line.message_type),
        line.validation,
        line.screening,
    )
}

impl BatchReport {
    /// Plain-text rendering of the report
    pub fn render_text(&self) -> String {
        let summary = &self.summary;
        let rule = "=".repeat(RULE_WIDTH);
        let thin = "-".repeat(RULE_WIDTH);
        let mut out = vec![
            rule.clone(),
            "SWIFT TRANSACTION PROCESSING - BATCH REPORT".to_string(),
            rule.clone(),
            format!("Run: {}", self.run_id),
            format!("Generated: {}", self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")),
            format!("Total Transactions: {}", summary.total_messages),
            String::new(),
            "SUMMARY STATISTICS:".to_string(),
            format!("- Approved: {} ({} corrected)", summary.approved, summary.corrected),
            format!("- Unresolved: {}", summary.unresolved),
            format!("- Flagged: {}", summary.flagged),
            format!("- Indeterminate: {}", summary.indeterminate),
            format!("- Escalated to analysts: {}", summary.escalated),
            format!("- Grouped: {}", summary.grouped),
            format!("- Total Amount: {:.2}", summary.total_amount),
            format!("- STP Rate: {:.1}%", summary.stp_rate * 100.0),
        ];
        for (message_type, count) in &summary.by_message_type {
            out.push(format!("- {} Messages: {}", message_type, count));
        }
        out.push(String::new());

        out.push(format!("GROUPING ({}):", self.grouping_key));
        if let Some(analysis) = &self.planner_analysis {
            out.push(format!("Planner: {}", analysis));
        }
        if let Some(error) = &self.planner_error {
            out.push(format!("Planner fallback: {}", error));
        }
        out.push(thin.clone());
        for group in self.groups.values() {
            let total: f64 = group.transactions.iter().filter_map(|m| m.amount).sum();
            out.push(format!(
                "{}: {} transaction(s), {:.2}",
                group.group,
                group.transactions.len(),
                total
            ));
            for report in &group.reports {
                out.push(format!(
                    "    {} [{}] {:?}{}",
                    report.task_id,
                    report.task_type,
                    report.status,
                    report
                        .error
                        .as_deref()
                        .map(|e| format!(": {}", e))
                        .unwrap_or_default()
                ));
            }
        }
        for report in &self.batch_reports {
            out.push(format!(
                "batch: {} [{}] {:?}",
                report.task_id, report.task_type, report.status
            ));
        }
        out.push(format!(
            "Tasks: {} completed, {} failed, {} rejected",
            summary.tasks_completed, summary.tasks_failed, summary.tasks_rejected
        ));
        for rejected in &self.rejected_tasks {
            out.push(format!(
                "    rejected {}: {}",
                rejected.requested_type, rejected.reason
            ));
        }
        out.push(String::new());

        out.push(format!("TOP {} TRANSACTIONS BY AMOUNT:", TOP_TRANSACTIONS));
        out.push(thin.clone());
        for (i, line) in summary.top_transactions.iter().enumerate() {
            out.push(format!("{:2}. {}", i + 1, describe(line)));
        }
        out.push(String::new());

        out.push(format!(
            "HIGH-VALUE TRANSACTIONS (> {:.2}): {}",
            summary.high_value_threshold,
            summary.high_value.len()
        ));
        out.push(thin.clone());
        if summary.high_value.is_empty() {
            out.push("No high-value transactions found.".to_string());
        }
        for (i, line) in summary.high_value.iter().enumerate() {
            out.push(format!("{:2}. {}", i + 1, describe(line)));
            out.push(format!("    Sender: {}", or_na(&line.sender_bic)));
            out.push(format!("    Receiver: {}", or_na(&line.receiver_bic)));
            out.push(format!("    Reference: {}", or_na(&line.reference)));
        }
        out.push(String::new());

        out.push("MESSAGE FATES:".to_string());
        out.push(thin);
        for fate in &self.fates {
            let disposition = match &fate.disposition {
                Disposition::Grouped { group } => format!("grouped in {}", group),
                Disposition::Escalated => "escalated".to_string(),
                Disposition::Unresolved => "unresolved".to_string(),
            };
            out.push(format!(
                "{}: {:?} / {:?} -> {}",
                fate.message_id, fate.validation, fate.screening, disposition
            ));
        }
        out.push(rule);

        out.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GroupReport, GroupingKey, MessageFate, TaskType, WorkerReport};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn finalized(id: &str, amount: f64, status: ValidationStatus) -> FinalizedMessage {
        FinalizedMessage {
            message: Message {
                message_type: Some("MT103".to_string()),
                amount: Some(amount),
                currency: Some("USD".to_string()),
                ..Message::new(id)
            },
            status,
            defects: Vec::new(),
            evaluations: 1,
            repairs: 0,
        }
    }

    fn fate(id: &str, screening: Screening, disposition: Disposition) -> MessageFate {
        MessageFate {
            message_id: id.to_string(),
            validation: ValidationStatus::Approved,
            screening,
            disposition,
        }
    }

    fn report(fates: Vec<MessageFate>, groups: BTreeMap<String, GroupReport>) -> BatchReport {
        BatchReport {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            grouping_key: GroupingKey::Currency,
            planner_analysis: Some("one currency".to_string()),
            planner_error: None,
            groups,
            batch_reports: Vec::new(),
            rejected_tasks: Vec::new(),
            fates,
            summary: BatchSummary::default(),
        }
    }

    #[test]
    fn test_summary_counts_and_stp() {
        let finalized = vec![
            finalized("M1", 75_000.0, ValidationStatus::Approved),
            finalized("M2", 1_000.0, ValidationStatus::Approved),
            finalized("M3", 250_000.0, ValidationStatus::Approved),
            finalized("M4", 10.0, ValidationStatus::Unresolved),
        ];
        let mut groups = BTreeMap::new();
        groups.insert(
            "USD".to_string(),
            GroupReport {
                group: "USD".to_string(),
                transactions: vec![finalized[0].message.clone(), finalized[1].message.clone()],
                reports: vec![WorkerReport {
                    task_id: "group_by_currency-USD".to_string(),
                    task_type: TaskType::GroupByCurrency,
                    group: Some("USD".to_string()),
                    status: TaskStatus::Completed,
                    result: json!({}),
                    error: None,
                    latency_ms: 3,
                }],
            },
        );
        let usd = || Disposition::Grouped {
            group: "USD".to_string(),
        };
        let report = report(
            vec![
                fate("M1", Screening::Clear, usd()),
                fate("M2", Screening::Clear, usd()),
                fate("M3", Screening::Flagged, Disposition::Escalated),
                fate("M4", Screening::Clear, Disposition::Unresolved),
            ],
            groups,
        );

        let summary = BatchSummary::compute(&report, &finalized, 50_000.0);

        assert_eq!(summary.total_messages, 4);
        assert_eq!(summary.approved, 3);
        assert_eq!(summary.unresolved, 1);
        assert_eq!(summary.flagged, 1);
        assert_eq!(summary.escalated, 1);
        assert_eq!(summary.grouped, 2);
        assert_eq!(summary.tasks_completed, 1);
        assert!((summary.stp_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(summary.by_message_type["MT103"], 4);
        assert_eq!(summary.top_transactions[0].message_id, "M3");
        assert_eq!(
            summary
                .high_value
                .iter()
                .map(|l| l.message_id.as_str())
                .collect::<Vec<_>>(),
            vec!["M1", "M3"]
        );
        assert_eq!(summary.high_value[1].screening, Screening::Flagged);
    }

    #[test]
    fn test_task_counts_include_batch_wide_reports() {
        let worker = |task_id: &str, status: TaskStatus| WorkerReport {
            task_id: task_id.to_string(),
            task_type: TaskType::SummaryReport,
            group: None,
            status,
            result: json!({}),
            error: None,
            latency_ms: 1,
        };
        let mut groups = BTreeMap::new();
        groups.insert(
            "USD".to_string(),
            GroupReport {
                group: "USD".to_string(),
                transactions: Vec::new(),
                reports: vec![worker("group_by_currency-USD", TaskStatus::Failed)],
            },
        );
        let mut report = report(Vec::new(), groups);
        report.batch_reports = vec![
            worker("summary", TaskStatus::Completed),
            worker("verify", TaskStatus::Failed),
        ];

        assert_eq!(report.worker_reports().count(), 3);
        let summary = BatchSummary::compute(&report, &[], 50_000.0);
        assert_eq!(summary.tasks_completed, 1);
        assert_eq!(summary.tasks_failed, 2);
    }

    #[test]
    fn test_empty_report_renders() {
        let mut report = report(Vec::new(), BTreeMap::new());
        report.summary = BatchSummary::compute(&report, &[], 50_000.0);

        assert_eq!(report.summary.stp_rate, 0.0);
        let text = report.render_text();
        assert!(text.contains("Total Transactions: 0"));
        assert!(text.contains("No high-value transactions found."));
    }

    #[test]
    fn test_render_lists_groups_and_fates() {
        let finalized = vec![finalized("M1", 60_000.0, ValidationStatus::Approved)];
        let mut groups = BTreeMap::new();
        groups.insert(
            "USD".to_string(),
            GroupReport {
                group: "USD".to_string(),
                transactions: vec![finalized[0].message.clone()],
                reports: Vec::new(),
            },
        );
        let mut report = report(
            vec![fate(
                "M1",
                Screening::Clear,
                Disposition::Grouped {
                    group: "USD".to_string(),
                },
            )],
            groups,
        );
        report.summary = BatchSummary::compute(&report, &finalized, 50_000.0);

        let text = report.render_text();
        assert!(text.contains("USD: 1 transaction(s), 60000.00"));
        assert!(text.contains("M1: Approved / Clear -> grouped in USD"));
        assert!(text.contains("HIGH-VALUE TRANSACTIONS (> 50000.00): 1"));
        assert!(text.contains("STP Rate: 100.0%"));
    }
}
