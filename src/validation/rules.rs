//! Deterministic SWIFT-standard evaluator
//!
//! Rules-based alternative to the evaluator agent. No reasoning calls.

use super::MessageEvaluator;
use crate::models::{Evaluation, Message};
use crate::Result;
use async_trait::async_trait;

const MAX_REFERENCE_LENGTH: usize = 16;
const MIN_AMOUNT: f64 = 0.01;
const MAX_AMOUNT: f64 = 999_999_999.99;
const VALID_MESSAGE_TYPES: &[&str] = &["MT103", "MT202"];
const VALID_CURRENCIES: &[&str] = &["USD", "EUR", "GBP", "JPY", "CHF"];

pub struct SwiftStandardEvaluator;

impl SwiftStandardEvaluator {
    /// All defects of a message, in rule order
    pub fn defects(message: &Message) -> Vec<String> {
        let mut defects: Vec<String> = message
            .missing_required_fields()
            .into_iter()
            .map(|field| format!("Missing required field: {}", field))
            .collect();

        if let Some(message_type) = message.message_type.as_deref() {
            if !VALID_MESSAGE_TYPES.contains(&message_type) {
                defects.push(format!("Invalid message type: {}", message_type));
            }
        }

        if let Some(reference) = message.reference.as_deref() {
            if reference.len() > MAX_REFERENCE_LENGTH {
                defects.push(format!(
                    "Reference too long: {} chars (max {})",
                    reference.len(),
                    MAX_REFERENCE_LENGTH
                ));
            }
        }

        if let Some(amount) = message.amount {
            if !amount.is_finite() {
                defects.push(format!("Invalid amount: {}", amount));
            } else if amount > MAX_AMOUNT {
                defects.push(format!("Amount exceeds maximum: {}", amount));
            } else if amount < MIN_AMOUNT {
                defects.push(format!("Amount below minimum: {}", amount));
            }
        }

        if let Some(currency) = message.currency.as_deref() {
            if !currency.trim().is_empty() && !VALID_CURRENCIES.contains(&currency) {
                defects.push(format!("Invalid currency: {}", currency));
            }
        }

        let sender = message.sender_bic.as_deref().unwrap_or_default();
        let receiver = message.receiver_bic.as_deref().unwrap_or_default();

        if !sender.is_empty() && !is_valid_bic(sender) {
            defects.push(format!("Invalid sender BIC: {}", sender));
        }
        if !receiver.is_empty() && !is_valid_bic(receiver) {
            defects.push(format!("Invalid receiver BIC: {}", receiver));
        }
        if !sender.is_empty() && sender == receiver {
            defects.push("Sender and receiver BIC cannot be the same".to_string());
        }

        defects
    }
}

#[async_trait]
impl MessageEvaluator for SwiftStandardEvaluator {
    async fn evaluate(&self, message: &Message) -> Result<Evaluation> {
        let defects = Self::defects(message);
        Ok(Evaluation {
            valid: defects.is_empty(),
            defects,
        })
    }
}

/// BIC layout: 4 letters bank, 2 letters country, 2 alphanumeric location,
/// optional 3 alphanumeric branch.
pub fn is_valid_bic(bic: &str) -> bool {
    if !bic.is_ascii() || !(bic.len() == 8 || bic.len() == 11) {
        return false;
    }

    let bytes = bic.as_bytes();
    bytes[..6].iter().all(u8::is_ascii_alphabetic)
        && bytes[6..].iter().all(u8::is_ascii_alphanumeric)
}
