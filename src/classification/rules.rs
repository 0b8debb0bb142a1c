//! Deterministic heuristic classifiers
//!
//! Static rule tables, no reasoning calls. Scores accumulate per matching
//! rule and are capped at 1.0.

use super::Classifier;
use crate::models::{Message, Verdict};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub const IDENTITY_MISMATCH: &str = "identity_mismatch";
pub const AMOUNT_ANOMALY: &str = "amount_anomaly";
pub const HIGH_RISK_JURISDICTION: &str = "high_risk_jurisdiction";

/// Markers of test or fabricated institution codes
const FAKE_BIC_MARKERS: &[&str] = &["TEST", "FAKE", "DEMO", "999", "000000"];

const PRESSURE_KEYWORDS: &[&str] = &["urgent", "immediately", "secret", "confidential"];

const HIGH_RISK_COUNTRIES: &[&str] = &[
    "IR", "KP", "SY", "CU", "VE", "RU", "BY", "AF", "IQ", "LB",
    "SD", "ZW", "MM", "YE", "SO", "CD", "CG", "HT", "TG", "GN",
];

const MEDIUM_RISK_COUNTRIES: &[&str] = &[
    "CN", "HK", "SG", "AE", "SA", "QA", "KW", "BH", "OM", "JO",
    "TR", "EG", "MA", "TN", "DZ", "LY", "PK", "BD", "LK", "NP",
];

/// Running score plus the reasons that produced it
struct Findings {
    score: f32,
    reasons: Vec<String>,
}

impl Findings {
    fn new() -> Self {
        Self {
            score: 0.0,
            reasons: Vec::new(),
        }
    }

    fn add(&mut self, weight: f32, reason: String) {
        self.score += weight;
        self.reasons.push(reason);
    }

    fn into_verdict(self, classifier: &str, threshold: f32) -> Verdict {
        let score = self.score.min(1.0);
        let rationale = if self.reasons.is_empty() {
            "No indicators found".to_string()
        } else {
            self.reasons.join("; ")
        };

        Verdict {
            classifier: classifier.to_string(),
            suspicious: score >= threshold,
            score,
            threshold,
            rationale,
        }
    }
}

pub struct AmountAnomalyClassifier {
    pub threshold: f32,
}

#[async_trait]
impl Classifier for AmountAnomalyClassifier {
    fn name(&self) -> &str {
        AMOUNT_ANOMALY
    }

    async fn classify(&self, message: &Message) -> Result<Verdict> {
        let mut findings = Findings::new();
        let amount = message.amount.unwrap_or(0.0);

        if amount > 10_000.0 {
            findings.add(0.3, format!("High amount transaction: {:.2}", amount));
        }
        if amount > 0.0 && amount % 1000.0 == 0.0 {
            findings.add(0.2, format!("Suspiciously round amount: {:.2}", amount));
        }
        if amount > 100_000.0 && amount.fract() != 0.0 {
            findings.add(0.1, "Large amount with unusual decimal precision".to_string());
        }

        Ok(findings.into_verdict(AMOUNT_ANOMALY, self.threshold))
    }
}

pub struct IdentityMismatchClassifier {
    pub threshold: f32,
}

#[async_trait]
impl Classifier for IdentityMismatchClassifier {
    fn name(&self) -> &str {
        IDENTITY_MISMATCH
    }

    async fn classify(&self, message: &Message) -> Result<Verdict> {
        let mut findings = Findings::new();
        let sender = message.sender_bic.as_deref().unwrap_or_default().to_uppercase();
        let receiver = message.receiver_bic.as_deref().unwrap_or_default().to_uppercase();

        for marker in FAKE_BIC_MARKERS {
            if sender.contains(marker) || receiver.contains(marker) {
                findings.add(0.4, format!("Test/fake pattern detected in BIC: {}", marker));
            }
        }

        if !sender.is_empty() && sender == receiver {
            findings.add(0.5, "Same sender and receiver BIC".to_string());
        }

        let remittance = message
            .remittance_info
            .as_deref()
            .unwrap_or_default()
            .to_lowercase();
        for keyword in PRESSURE_KEYWORDS {
            if remittance.contains(keyword) {
                findings.add(0.2, format!("Suspicious keyword in remittance: {}", keyword));
            }
        }

        Ok(findings.into_verdict(IDENTITY_MISMATCH, self.threshold))
    }
}

pub struct JurisdictionRiskClassifier {
    pub threshold: f32,
}

#[async_trait]
impl Classifier for JurisdictionRiskClassifier {
    fn name(&self) -> &str {
        HIGH_RISK_JURISDICTION
    }

    async fn classify(&self, message: &Message) -> Result<Verdict> {
        let mut findings = Findings::new();
        let sender = message.sender_country().map(str::to_uppercase);
        let receiver = message.receiver_country().map(str::to_uppercase);

        let high = |c: &Option<String>| c.as_deref().map_or(false, |c| HIGH_RISK_COUNTRIES.contains(&c));
        let medium =
            |c: &Option<String>| c.as_deref().map_or(false, |c| MEDIUM_RISK_COUNTRIES.contains(&c));

        for (side, country) in [("sender", &sender), ("receiver", &receiver)] {
            if high(country) {
                findings.add(0.4, format!("High-risk {} country: {}", side, country.as_deref().unwrap_or_default()));
            } else if medium(country) {
                findings.add(0.2, format!("Medium-risk {} country: {}", side, country.as_deref().unwrap_or_default()));
            }
        }

        if sender.is_some() && receiver.is_some() {
            let mismatched = (high(&sender) && !high(&receiver) && !medium(&receiver))
                || (high(&receiver) && !high(&sender) && !medium(&sender));
            if mismatched {
                findings.add(
                    0.3,
                    format!(
                        "Unusual risk level combination: {} -> {}",
                        sender.as_deref().unwrap_or_default(),
                        receiver.as_deref().unwrap_or_default()
                    ),
                );
            }
        }

        Ok(findings.into_verdict(HIGH_RISK_JURISDICTION, self.threshold))
    }
}

/// The three heuristic classifiers with a shared threshold
pub fn rule_classifiers(threshold: f32) -> Vec<Arc<dyn Classifier>> {
    vec![
        Arc::new(IdentityMismatchClassifier { threshold }),
        Arc::new(AmountAnomalyClassifier { threshold }),
        Arc::new(JurisdictionRiskClassifier { threshold }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(amount: f64, sender: &str, receiver: &str, remittance: &str) -> Message {
        Message {
            message_type: Some("MT103".to_string()),
            reference: Some("REF1".to_string()),
            amount: Some(amount),
            currency: Some("USD".to_string()),
            sender_bic: Some(sender.to_string()),
            receiver_bic: Some(receiver.to_string()),
            remittance_info: Some(remittance.to_string()),
            ..Message::new("M1")
        }
    }

    #[tokio::test]
    async fn test_amount_rules() {
        let classifier = AmountAnomalyClassifier { threshold: 0.5 };

        let verdict = classifier
            .classify(&message(15_000.0, "CHASUS33XXX", "DEUTDEFFXXX", ""))
            .await
            .unwrap();
        assert_eq!(verdict.classifier, AMOUNT_ANOMALY);
        assert!((verdict.score - 0.5).abs() < f32::EPSILON);
        assert!(verdict.is_positive());

        let verdict = classifier
            .classify(&message(1_250.75, "CHASUS33XXX", "DEUTDEFFXXX", ""))
            .await
            .unwrap();
        assert_eq!(verdict.score, 0.0);
        assert!(!verdict.is_positive());
    }

    #[tokio::test]
    async fn test_identity_rules() {
        let classifier = IdentityMismatchClassifier { threshold: 0.5 };
        let verdict = classifier
            .classify(&message(
                100.0,
                "TESTUS33XXX",
                "FAKEGB22XXX",
                "Urgent payment needed immediately",
            ))
            .await
            .unwrap();

        // TEST + FAKE + urgent + immediately
        assert_eq!(verdict.score, 1.0);
        assert!(verdict.suspicious);
        assert!(verdict.rationale.contains("TEST"));
    }

    #[tokio::test]
    async fn test_jurisdiction_rules() {
        let classifier = JurisdictionRiskClassifier { threshold: 0.5 };

        let verdict = classifier
            .classify(&message(100.0, "MELIIRTHXXX", "DEUTDEFFXXX", ""))
            .await
            .unwrap();
        // high-risk sender + high/low combination
        assert!((verdict.score - 0.7).abs() < 1e-6);
        assert!(verdict.is_positive());

        let verdict = classifier
            .classify(&message(100.0, "HSBCHKHHXXX", "DEUTDEFFXXX", ""))
            .await
            .unwrap();
        assert!((verdict.score - 0.2).abs() < 1e-6);
        assert!(!verdict.is_positive());
    }
}
