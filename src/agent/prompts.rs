//! Prompt templates per agent role

use super::AgentRole;
use crate::models::TaskType;

/// System instruction sent with every call for a role
pub fn system_prompt(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Evaluator => {
            "You are a SWIFT message validation expert. Check MT103/MT202 messages \
             against SWIFT standards: required fields, BIC format, reference length, \
             amount range and currency. Be precise and list every defect."
        }
        AgentRole::Optimizer => {
            "You are a SWIFT message correction expert. Fix the listed validation \
             defects while preserving the business intent of the payment. Return \
             the complete corrected message as a JSON object."
        }
        AgentRole::IdentityScreener => {
            "You are a fraud screener focused on identity mismatches: test or fake \
             institution codes, identical sender and receiver, and urgency or \
             secrecy language in remittance text."
        }
        AgentRole::AmountScreener => {
            "You are a fraud screener focused on amount and frequency anomalies: \
             unusually large values, suspiciously round amounts and odd precision."
        }
        AgentRole::JurisdictionScreener => {
            "You are a fraud screener focused on high-risk jurisdiction routing, \
             judged from the country codes of the sender and receiver BICs."
        }
        AgentRole::JuniorAnalyst => {
            "You are a Junior Fraud Analyst. Summarise why this payment was \
             flagged and list the facts an investigation should confirm."
        }
        AgentRole::TechnicalAnalyst => {
            "You are a Technical Fraud Analyst. Building on the earlier analysis, \
             examine routing, identifiers and amount patterns in technical depth."
        }
        AgentRole::ComplianceOfficer => {
            "You are a Compliance Officer. Review the full investigation so far and \
             state the regulatory concerns and the escalation you recommend."
        }
        AgentRole::Planner => {
            "You are an Orchestrator for SWIFT transaction processing. Decide how \
             the clean transactions should be grouped and which follow-up tasks \
             workers should run. Only use the task types you are given."
        }
        AgentRole::Worker => {
            "You are a generic processing agent. Complete the assigned task \
             professionally and accurately and answer in JSON."
        }
    }
}

/// Role-specific instructions wrapped around the call payload
pub fn render(role: AgentRole, payload: &str) -> String {
    let instructions = match role {
        AgentRole::Evaluator => {
            "Evaluate this SWIFT message. Respond with JSON \
             {\"valid\": bool, \"defects\": [string]}."
        }
        AgentRole::Optimizer => {
            "Correct this SWIFT message. Respond with the full corrected message as \
             JSON using the same field names."
        }
        AgentRole::IdentityScreener
        | AgentRole::AmountScreener
        | AgentRole::JurisdictionScreener => {
            "Screen this SWIFT message. Respond with JSON \
             {\"suspicious\": bool, \"score\": number between 0 and 1, \"rationale\": string}."
        }
        AgentRole::JuniorAnalyst | AgentRole::TechnicalAnalyst | AgentRole::ComplianceOfficer => {
            "Continue the investigation of this flagged payment."
        }
        AgentRole::Planner => {
            "Plan the processing of this batch. Respond with JSON \
             {\"analysis\": string, \"grouping_key\": \"bank\"|\"currency\"|\"bank_currency\", \
             \"tasks\": [{\"task_id\": string, \"type\": string, \"group\": string|null, \
             \"description\": string, \"parameters\": object}]}."
        }
        AgentRole::Worker => "Execute this task and return your findings as a JSON object.",
    };

    format!("{}\n\n{}", instructions, payload)
}

/// Persona a worker adopts for a task type
pub fn worker_brief(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::GroupByBank | TaskType::GroupByCurrency | TaskType::GroupByBankCurrency => {
            "As a Settlement Clerk, summarise this group of transactions: count, \
             total value and anything notable."
        }
        TaskType::AmountVerification => {
            "As a Financial Auditor, verify and analyse the amounts. Check for \
             unusual amounts or patterns."
        }
        TaskType::SummaryReport => {
            "As a Report Generator, create a summary report with key findings and \
             insights."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_embeds_payload() {
        let prompt = render(AgentRole::Evaluator, "{\"message_id\":\"M1\"}");
        assert!(prompt.contains("\"defects\""));
        assert!(prompt.ends_with("{\"message_id\":\"M1\"}"));
    }

    #[test]
    fn test_every_role_has_a_system_prompt() {
        for role in AgentRole::ALL {
            assert!(!system_prompt(role).is_empty());
        }
    }
}
