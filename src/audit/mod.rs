//! Audit digests
//!
//! SHA-256 fingerprints of the artifacts a run hands back, so a caller that
//! persists them can later prove they were not altered.

use crate::models::{BatchReport, ConversationState};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;

/// Digests of every audit artifact of one run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditTrail {
    pub report_digest: String,
    /// Message id -> digest of its conversation
    pub conversation_digests: BTreeMap<String, String>,
}

impl AuditTrail {
    pub fn build(report: &BatchReport, conversations: &[ConversationState]) -> Self {
        Self {
            report_digest: compute_digest(report),
            conversation_digests: conversations
                .iter()
                .map(|c| (c.message_id.clone(), compute_digest(c)))
                .collect(),
        }
    }

    /// Whether a stored conversation still matches its recorded digest
    pub fn verify_conversation(&self, conversation: &ConversationState) -> bool {
        self.conversation_digests
            .get(&conversation.message_id)
            .is_some_and(|digest| *digest == compute_digest(conversation))
    }

    pub fn verify_report(&self, report: &BatchReport) -> bool {
        self.report_digest == compute_digest(report)
    }
}

/// Hex SHA-256 of the JSON form of `value`.
/// Serialization streams straight into the hasher.
pub fn compute_digest<T: Serialize + ?Sized>(value: &T) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), value).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRole;
    use crate::models::AgentResponse;

    fn conversation(text: &str) -> ConversationState {
        let mut state = ConversationState::new("M3");
        state.append(
            AgentRole::JuniorAnalyst,
            AgentResponse {
                role: AgentRole::JuniorAnalyst,
                text: text.to_string(),
                parsed: None,
                latency_ms: 5,
                attempts: 1,
                error: None,
            },
        );
        state
    }

    #[test]
    fn test_digest_is_stable_hex() {
        let a = compute_digest(&conversation("suspicious routing"));
        let b = compute_digest(&conversation("suspicious routing"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tampering_is_detected() {
        let original = conversation("suspicious routing");
        let trail = AuditTrail {
            report_digest: String::new(),
            conversation_digests: [(original.message_id.clone(), compute_digest(&original))]
                .into_iter()
                .collect(),
        };

        assert!(trail.verify_conversation(&original));
        assert!(!trail.verify_conversation(&conversation("nothing to see")));
    }
}
