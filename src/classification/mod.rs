//! Parallel classification stage
//!
//! Every configured classifier screens a message concurrently. A classifier
//! that errors or misses its deadline yields an explicit `Unavailable`
//! entry; its siblings are unaffected. Aggregation starts only once every
//! classifier has answered or definitively failed, and flags a message if
//! ANY available verdict is suspicious above its own threshold.

use crate::agent::{Agent, AgentRole};
use crate::config::PipelineConfig;
use crate::error::OrchestrationError;
use crate::models::{ClassifierOutcome, FraudAssessment, Message, Screening, Verdict, VerdictSet};
use crate::pool::WorkerPool;
use crate::reasoning::ReasoningClient;
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub mod rules;

pub use rules::{rule_classifiers, AMOUNT_ANOMALY, HIGH_RISK_JURISDICTION, IDENTITY_MISMATCH};

/// Fewest distinct heuristics a screening run may use
pub const MIN_CLASSIFIERS: usize = 3;

#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;
    async fn classify(&self, message: &Message) -> Result<Verdict>;
}

#[derive(Debug, Deserialize)]
struct ScreenerReply {
    suspicious: bool,
    score: f32,
    #[serde(default)]
    rationale: String,
}

/// Classifier backed by a screener agent
pub struct AgentClassifier {
    name: String,
    agent: Agent,
    threshold: f32,
}

impl AgentClassifier {
    pub fn new(name: impl Into<String>, agent: Agent, threshold: f32) -> Self {
        Self {
            name: name.into(),
            agent,
            threshold,
        }
    }
}

#[async_trait]
impl Classifier for AgentClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn classify(&self, message: &Message) -> Result<Verdict> {
        let payload = serde_json::to_string_pretty(message)?;
        let reply = self
            .agent
            .respond_structured::<ScreenerReply>(&payload, &[])
            .await?
            .into_payload()?;

        Ok(Verdict {
            classifier: self.name.clone(),
            suspicious: reply.suspicious,
            score: reply.score.clamp(0.0, 1.0),
            threshold: self.threshold,
            rationale: reply.rationale,
        })
    }
}

/// The three screener agents, one per heuristic
pub fn agent_classifiers(client: Arc<ReasoningClient>, threshold: f32) -> Vec<Arc<dyn Classifier>> {
    [
        (IDENTITY_MISMATCH, AgentRole::IdentityScreener),
        (AMOUNT_ANOMALY, AgentRole::AmountScreener),
        (HIGH_RISK_JURISDICTION, AgentRole::JurisdictionScreener),
    ]
    .into_iter()
    .map(|(name, role)| {
        Arc::new(AgentClassifier::new(name, Agent::new(role, client.clone()), threshold))
            as Arc<dyn Classifier>
    })
    .collect()
}

#[derive(Clone)]
pub struct ClassificationStage {
    classifiers: Arc<Vec<Arc<dyn Classifier>>>,
    pool: WorkerPool,
    deadline: Duration,
}

impl ClassificationStage {
    pub fn new(
        classifiers: Vec<Arc<dyn Classifier>>,
        pool: WorkerPool,
        config: &PipelineConfig,
    ) -> Result<Self> {
        if classifiers.len() < MIN_CLASSIFIERS {
            return Err(OrchestrationError::InvalidConfig(format!(
                "at least {} classifiers required, got {}",
                MIN_CLASSIFIERS,
                classifiers.len()
            )));
        }

        let mut names = HashSet::new();
        for classifier in &classifiers {
            if !names.insert(classifier.name().to_string()) {
                return Err(OrchestrationError::InvalidConfig(format!(
                    "duplicate classifier name '{}'",
                    classifier.name()
                )));
            }
        }

        Ok(Self {
            classifiers: Arc::new(classifiers),
            pool,
            deadline: config.classifier_timeout,
        })
    }

    pub fn classifier_names(&self) -> Vec<String> {
        self.classifiers.iter().map(|c| c.name().to_string()).collect()
    }

    /// Assess every message; output order matches input order
    pub async fn process(&self, messages: &[Message]) -> Vec<FraudAssessment> {
        info!(
            count = messages.len(),
            classifiers = self.classifiers.len(),
            "Classification stage starting"
        );

        let mut set = JoinSet::new();
        for (index, message) in messages.iter().cloned().enumerate() {
            let stage = self.clone();
            set.spawn(async move { (index, stage.assess(Arc::new(message)).await) });
        }

        let mut slots: Vec<Option<FraudAssessment>> = vec![None; messages.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, assessment)) => slots[index] = Some(assessment),
                Err(e) => warn!(error = %e, "Classification task aborted"),
            }
        }

        let assessments: Vec<FraudAssessment> = slots
            .into_iter()
            .zip(messages)
            .map(|(slot, message)| {
                slot.unwrap_or_else(|| {
                    let mut verdicts = VerdictSet::new(message.message_id.clone());
                    self.fill_missing(&mut verdicts, "classification task aborted");
                    aggregate(verdicts)
                })
            })
            .collect();

        let flagged = assessments.iter().filter(|a| a.flagged).count();
        info!(
            total = assessments.len(),
            flagged,
            indeterminate = assessments
                .iter()
                .filter(|a| a.screening == Screening::Indeterminate)
                .count(),
            "Classification stage complete"
        );

        assessments
    }

    /// Screen one message with every classifier and aggregate
    pub async fn assess(&self, message: Arc<Message>) -> FraudAssessment {
        let verdicts = self.collect(message).await;

        let failed = verdicts.unavailable().count();
        if failed > 0 {
            let partial = OrchestrationError::PartialStageFailure {
                stage: "classification",
                failed,
                total: verdicts.len(),
            };
            warn!(message_id = %verdicts.message_id, error = %partial, "Degraded screening");
        }

        aggregate(verdicts)
    }

    /// Fan out to all classifiers and wait for each to resolve
    pub async fn collect(&self, message: Arc<Message>) -> VerdictSet {
        let mut set = JoinSet::new();

        for classifier in self.classifiers.iter().cloned() {
            let message = message.clone();
            let pool = self.pool.clone();
            let deadline = self.deadline;

            set.spawn(async move {
                let name = classifier.name().to_string();
                // The deadline starts once the permit is held, not while queued.
                let outcome = pool
                    .run(async { tokio::time::timeout(deadline, classifier.classify(&message)).await })
                    .await;

                match outcome {
                    Ok(Ok(mut verdict)) => {
                        verdict.classifier = name;
                        ClassifierOutcome::Verdict(verdict)
                    }
                    Ok(Err(e)) => {
                        warn!(classifier = %name, message_id = %message.message_id, error = %e, "Classifier failed");
                        ClassifierOutcome::Unavailable {
                            classifier: name,
                            reason: e.to_string(),
                        }
                    }
                    Err(_) => {
                        warn!(classifier = %name, message_id = %message.message_id, "Classifier deadline exceeded");
                        ClassifierOutcome::Unavailable {
                            classifier: name,
                            reason: format!("deadline of {} ms exceeded", deadline.as_millis()),
                        }
                    }
                }
            });
        }

        let mut verdicts = VerdictSet::new(message.message_id.clone());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => {
                    debug!(message_id = %message.message_id, classifier = outcome.classifier(), "Classifier resolved");
                    verdicts.push(outcome);
                }
                Err(e) => warn!(message_id = %message.message_id, error = %e, "Classifier task aborted"),
            }
        }

        self.fill_missing(&mut verdicts, "classifier task aborted");
        verdicts
    }

    /// Mark every classifier without an outcome as unavailable
    fn fill_missing(&self, verdicts: &mut VerdictSet, reason: &str) {
        for classifier in self.classifiers.iter() {
            if !verdicts.contains(classifier.name()) {
                verdicts.push(ClassifierOutcome::Unavailable {
                    classifier: classifier.name().to_string(),
                    reason: reason.to_string(),
                });
            }
        }
    }
}

/// Combine a verdict set with OR semantics.
///
/// Unavailable entries are ignored, never read as "not suspicious". A set
/// with no available verdict at all is `Indeterminate`.
pub fn aggregate(verdicts: VerdictSet) -> FraudAssessment {
    let positives: Vec<&Verdict> = verdicts.verdicts().filter(|v| v.is_positive()).collect();
    let available = verdicts.verdicts().count();

    let screening = if !positives.is_empty() {
        Screening::Flagged
    } else if available == 0 {
        Screening::Indeterminate
    } else {
        Screening::Clear
    };

    let contributing: Vec<String> = positives.iter().map(|v| v.classifier.clone()).collect();
    let unavailable: Vec<String> = verdicts.unavailable().map(str::to_string).collect();
    let risk_score = verdicts.verdicts().map(|v| v.score).fold(0.0_f32, f32::max);

    let mut rationale = match screening {
        Screening::Flagged => positives
            .iter()
            .map(|v| format!("[{}] {}", v.classifier, v.rationale))
            .collect::<Vec<_>>()
            .join("; "),
        Screening::Clear => "No classifier reported suspicion above its threshold".to_string(),
        Screening::Indeterminate => "No classifier produced a verdict".to_string(),
    };
    if !unavailable.is_empty() {
        rationale.push_str(&format!(" (unavailable: {})", unavailable.join(", ")));
    }

    FraudAssessment {
        message_id: verdicts.message_id.clone(),
        screening,
        flagged: screening == Screening::Flagged,
        contributing,
        unavailable,
        risk_score,
        rationale,
        verdicts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::{RetryPolicy, Script, ScriptedService};
    use serde_json::json;

    struct Fixed {
        name: &'static str,
        score: f32,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl Classifier for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn classify(&self, _message: &Message) -> Result<Verdict> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(OrchestrationError::Transport("boom".to_string()));
            }
            Ok(Verdict {
                classifier: self.name.to_string(),
                suspicious: self.score >= 0.5,
                score: self.score,
                threshold: 0.5,
                rationale: format!("score {}", self.score),
            })
        }
    }

    fn fixed(name: &'static str, score: f32) -> Arc<dyn Classifier> {
        Arc::new(Fixed {
            name,
            score,
            delay: Duration::ZERO,
            fail: false,
        })
    }

    fn config(timeout_ms: u64) -> PipelineConfig {
        PipelineConfig {
            classifier_timeout: Duration::from_millis(timeout_ms),
            ..PipelineConfig::default()
        }
    }

    fn verdict(name: &str, suspicious: bool, score: f32) -> ClassifierOutcome {
        ClassifierOutcome::Verdict(Verdict {
            classifier: name.to_string(),
            suspicious,
            score,
            threshold: 0.5,
            rationale: "r".to_string(),
        })
    }

    #[test]
    fn test_rejects_fewer_than_three_classifiers() {
        let result = ClassificationStage::new(
            vec![fixed("a", 0.0), fixed("b", 0.0)],
            WorkerPool::new(2),
            &config(100),
        );
        assert!(matches!(result, Err(OrchestrationError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let result = ClassificationStage::new(
            vec![fixed("a", 0.0), fixed("a", 0.0), fixed("b", 0.0)],
            WorkerPool::new(2),
            &config(100),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_single_positive_flags_message() {
        let mut set = VerdictSet::new("M1");
        set.push(verdict("a", false, 0.1));
        set.push(verdict("b", true, 0.8));
        set.push(verdict("c", false, 0.2));

        let assessment = aggregate(set);
        assert!(assessment.flagged);
        assert_eq!(assessment.screening, Screening::Flagged);
        assert_eq!(assessment.contributing, vec!["b".to_string()]);
        assert!((assessment.risk_score - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_suspicious_below_threshold_does_not_flag() {
        let mut set = VerdictSet::new("M1");
        set.push(verdict("a", true, 0.3));
        set.push(verdict("b", false, 0.0));
        set.push(verdict("c", false, 0.0));

        assert!(!aggregate(set).flagged);
    }

    #[test]
    fn test_all_unavailable_is_indeterminate() {
        let mut set = VerdictSet::new("M1");
        for name in ["a", "b", "c"] {
            set.push(ClassifierOutcome::Unavailable {
                classifier: name.to_string(),
                reason: "down".to_string(),
            });
        }

        let assessment = aggregate(set);
        assert!(!assessment.flagged);
        assert_eq!(assessment.screening, Screening::Indeterminate);
        assert!(assessment.requires_investigation());
        assert_eq!(assessment.unavailable.len(), 3);
    }

    #[tokio::test]
    async fn test_verdict_set_has_one_entry_per_classifier() {
        let stage = ClassificationStage::new(
            vec![
                fixed("a", 0.1),
                Arc::new(Fixed {
                    name: "b",
                    score: 0.0,
                    delay: Duration::ZERO,
                    fail: true,
                }),
                fixed("c", 0.9),
            ],
            WorkerPool::new(4),
            &config(1_000),
        )
        .unwrap();

        let verdicts = stage.collect(Arc::new(Message::new("M1"))).await;
        assert_eq!(verdicts.len(), 3);
        assert_eq!(verdicts.unavailable().collect::<Vec<_>>(), vec!["b"]);

        let assessment = aggregate(verdicts);
        assert!(assessment.flagged);
        assert_eq!(assessment.contributing, vec!["c".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_unavailable_without_blocking() {
        let stage = ClassificationStage::new(
            vec![
                fixed("a", 0.1),
                fixed("b", 0.2),
                Arc::new(Fixed {
                    name: "slow",
                    score: 0.9,
                    delay: Duration::from_secs(3600),
                    fail: false,
                }),
            ],
            WorkerPool::new(4),
            &config(50),
        )
        .unwrap();

        let started = tokio::time::Instant::now();
        let assessment = stage.assess(Arc::new(Message::new("M1"))).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(assessment.verdicts.len(), 3);
        assert_eq!(assessment.unavailable, vec!["slow".to_string()]);
        assert_eq!(assessment.screening, Screening::Clear);
        // The slow classifier was dropped, not counted as "not suspicious".
        assert_eq!(assessment.verdicts.verdicts().count(), 2);
    }

    fn slow(name: &'static str, millis: u64) -> Arc<dyn Classifier> {
        Arc::new(Fixed {
            name,
            score: 0.1,
            delay: Duration::from_millis(millis),
            fail: false,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_queueing_for_a_permit_does_not_consume_the_deadline() {
        let stage = ClassificationStage::new(
            vec![slow("a", 30), slow("b", 30), slow("c", 30)],
            WorkerPool::new(2),
            &config(50),
        )
        .unwrap();

        let assessment = stage.assess(Arc::new(Message::new("M1"))).await;
        assert!(assessment.unavailable.is_empty());
        assert_eq!(assessment.verdicts.verdicts().count(), 3);
        assert_eq!(assessment.screening, Screening::Clear);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_pool_invents_no_unavailable_verdicts() {
        let stage = ClassificationStage::new(
            vec![slow("a", 30), slow("b", 30), slow("c", 30)],
            WorkerPool::new(4),
            &config(300),
        )
        .unwrap();

        let messages: Vec<Message> = (0..20).map(|i| Message::new(format!("M{}", i))).collect();
        let assessments = stage.process(&messages).await;

        assert_eq!(assessments.len(), 20);
        assert!(assessments.iter().all(|a| a.unavailable.is_empty()));
        assert!(assessments.iter().all(|a| a.screening == Screening::Clear));
    }

    #[tokio::test]
    async fn test_process_preserves_order() {
        let stage = ClassificationStage::new(
            rule_classifiers(0.5),
            WorkerPool::new(2),
            &config(1_000),
        )
        .unwrap();

        let messages: Vec<Message> = (0..6)
            .map(|i| Message {
                amount: Some(if i == 4 { 20_000.0 } else { 120.5 }),
                sender_bic: Some("CHASUS33XXX".to_string()),
                receiver_bic: Some("DEUTDEFFXXX".to_string()),
                ..Message::new(format!("M{}", i))
            })
            .collect();

        let assessments = stage.process(&messages).await;
        let ids: Vec<_> = assessments.iter().map(|a| a.message_id.as_str()).collect();
        assert_eq!(ids, vec!["M0", "M1", "M2", "M3", "M4", "M5"]);
        assert_eq!(
            assessments.iter().map(|a| a.flagged).collect::<Vec<_>>(),
            vec![false, false, false, false, true, false]
        );
    }

    #[tokio::test]
    async fn test_agent_classifier_schema_mismatch_is_unavailable() {
        let service = Arc::new(
            ScriptedService::new()
                .on(AgentRole::IdentityScreener, Script::reply("probably fine"))
                .on(
                    AgentRole::AmountScreener,
                    Script::json(json!({"suspicious": false, "score": 0.1, "rationale": "small"})),
                )
                .on(
                    AgentRole::JurisdictionScreener,
                    Script::json(json!({"suspicious": true, "score": 1.7, "rationale": "IR"})),
                ),
        );
        let client = Arc::new(ReasoningClient::new(
            service,
            RetryPolicy {
                request_timeout: Duration::from_secs(1),
                retry_budget: 0,
                backoff: Duration::from_millis(1),
            },
        ));
        let stage = ClassificationStage::new(
            agent_classifiers(client, 0.5),
            WorkerPool::new(3),
            &config(1_000),
        )
        .unwrap();

        let assessment = stage.assess(Arc::new(Message::new("M1"))).await;
        assert_eq!(assessment.unavailable, vec![IDENTITY_MISMATCH.to_string()]);
        assert!(assessment.flagged);
        assert_eq!(assessment.contributing, vec![HIGH_RISK_JURISDICTION.to_string()]);
        assert_eq!(assessment.risk_score, 1.0);
    }
}
