//! SWIFT Agent Pipeline
//!
//! Coordinates reasoning agents that jointly process a batch of SWIFT
//! payment messages:
//! - Repairs invalid messages through an evaluator/optimizer loop
//! - Screens every message with independent fraud classifiers in parallel
//! - Threads flagged messages through a fixed chain of analyst agents
//! - Plans, dispatches and collects grouping tasks for the clean remainder
//!
//! PIPELINE:
//! VALIDATE → SCREEN → INVESTIGATE → GROUP → REPORT

pub mod agent;
pub mod audit;
pub mod classification;
pub mod config;
pub mod error;
pub mod grouping;
pub mod investigation;
pub mod models;
pub mod pipeline;
pub mod pool;
pub mod reasoning;
pub mod report;
pub mod validation;

pub use error::Result;

// Re-export common types
pub use config::PipelineConfig;
pub use error::OrchestrationError;
pub use models::*;
pub use pipeline::{run, Pipeline, PipelineBuilder, PipelineOutcome};
pub use reasoning::{GeminiService, ReasoningService, Script, ScriptedService};
