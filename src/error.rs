//! Error types for the SWIFT agent pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Reasoning Service Errors
    // =============================

    #[error("Reasoning service unavailable for {role} after {attempts} attempt(s): {reason}")]
    ReasoningUnavailable {
        role: String,
        attempts: u32,
        reason: String,
    },

    #[error("Schema mismatch from {role}: {detail}")]
    SchemaMismatch { role: String, detail: String },

    /// Retryable failure reported by a transport (connection, 5xx, 429)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-retryable rejection reported by a transport (auth, bad request)
    #[error("Service rejected request: {0}")]
    ServiceRejected(String),

    // =============================
    // Stage Errors
    // =============================

    #[error("Repair budget of {budget} exhausted for message {message_id}")]
    RepairBudgetExhausted { message_id: String, budget: u32 },

    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("{stage}: {failed} of {total} unit(s) failed")]
    PartialStageFailure {
        stage: &'static str,
        failed: usize,
        total: usize,
    },

    // =============================
    // Run-Aborting Errors
    // =============================

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    /// Whether a failed reasoning attempt is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestrationError::Transport(_) | OrchestrationError::HttpError(_)
        )
    }

    /// Whether this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchestrationError::InvalidBatch(_) | OrchestrationError::InvalidConfig(_)
        )
    }
}
