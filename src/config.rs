//! Pipeline policy configuration
//!
//! One immutable value handed to the entry point and threaded into every
//! stage constructor. Nothing in the crate reads configuration globally.

use crate::error::OrchestrationError;
use crate::models::GroupingKey;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on retries per reasoning call
pub const MAX_RETRY_BUDGET: u32 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Optimizer passes allowed per message before it is left unresolved
    pub repair_budget: u32,
    /// Deadline for one classifier verdict, retries included
    pub classifier_timeout: Duration,
    /// Deadline for a single Reasoning Service attempt
    pub request_timeout: Duration,
    /// Extra attempts after a retryable failure
    pub retry_budget: u32,
    /// Initial backoff, doubled per retry
    pub retry_backoff: Duration,
    pub worker_pool_size: usize,
    pub default_grouping_key: GroupingKey,
    pub suspicion_threshold: f32,
    pub high_value_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            repair_budget: 1,
            classifier_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            retry_budget: 1,
            retry_backoff: Duration::from_millis(500),
            worker_pool_size: 8,
            default_grouping_key: GroupingKey::Currency,
            suspicion_threshold: 0.5,
            high_value_threshold: 50_000.0,
        }
    }
}

impl PipelineConfig {
    /// Load from the process environment (and `.env` if present)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            repair_budget: read("PIPELINE_REPAIR_BUDGET")?.unwrap_or(defaults.repair_budget),
            classifier_timeout: read_millis("PIPELINE_CLASSIFIER_TIMEOUT_MS")?
                .unwrap_or(defaults.classifier_timeout),
            request_timeout: read_millis("PIPELINE_REQUEST_TIMEOUT_MS")?
                .unwrap_or(defaults.request_timeout),
            retry_budget: read("PIPELINE_RETRY_BUDGET")?.unwrap_or(defaults.retry_budget),
            retry_backoff: read_millis("PIPELINE_RETRY_BACKOFF_MS")?
                .unwrap_or(defaults.retry_backoff),
            worker_pool_size: read("PIPELINE_WORKER_POOL_SIZE")?
                .unwrap_or(defaults.worker_pool_size),
            default_grouping_key: read("PIPELINE_GROUPING_KEY")?
                .unwrap_or(defaults.default_grouping_key),
            suspicion_threshold: read("PIPELINE_SUSPICION_THRESHOLD")?
                .unwrap_or(defaults.suspicion_threshold),
            high_value_threshold: read("PIPELINE_HIGH_VALUE_THRESHOLD")?
                .unwrap_or(defaults.high_value_threshold),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_size == 0 {
            return Err(OrchestrationError::InvalidConfig(
                "worker_pool_size must be at least 1".to_string(),
            ));
        }
        if self.classifier_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(OrchestrationError::InvalidConfig(
                "timeouts must be non-zero".to_string(),
            ));
        }
        if self.retry_budget > MAX_RETRY_BUDGET {
            return Err(OrchestrationError::InvalidConfig(format!(
                "retry_budget {} exceeds {}",
                self.retry_budget, MAX_RETRY_BUDGET
            )));
        }
        if !(0.0..=1.0).contains(&self.suspicion_threshold) {
            return Err(OrchestrationError::InvalidConfig(format!(
                "suspicion_threshold {} outside [0, 1]",
                self.suspicion_threshold
            )));
        }
        if self.high_value_threshold < 0.0 {
            return Err(OrchestrationError::InvalidConfig(
                "high_value_threshold must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn read<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            OrchestrationError::InvalidConfig(format!("{}='{}' is not valid", name, raw))
        }),
        Err(_) => Ok(None),
    }
}

fn read_millis(name: &str) -> Result<Option<Duration>> {
    Ok(read::<u64>(name)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.repair_budget, 1);
        assert_eq!(config.retry_budget, 1);
        assert_eq!(config.default_grouping_key, GroupingKey::Currency);
    }

    #[test]
    fn test_rejects_empty_pool() {
        let config = PipelineConfig {
            worker_pool_size: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(OrchestrationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_threshold_out_of_range() {
        let config = PipelineConfig {
            suspicion_threshold: 1.5,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unbounded_retry_budget() {
        let config = PipelineConfig {
            retry_budget: u32::MAX,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(OrchestrationError::InvalidConfig(ref m)) if m.contains("retry_budget")
        ));

        let config = PipelineConfig {
            retry_budget: MAX_RETRY_BUDGET,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_read_parses_and_reports_bad_values() {
        env::set_var("PIPELINE_TEST_POOL_OK", "4");
        env::set_var("PIPELINE_TEST_POOL_BAD", "four");

        assert_eq!(read::<usize>("PIPELINE_TEST_POOL_OK").unwrap(), Some(4));
        assert!(read::<usize>("PIPELINE_TEST_POOL_BAD").is_err());
        assert_eq!(read::<usize>("PIPELINE_TEST_POOL_MISSING").unwrap(), None);
        assert_eq!(
            read::<GroupingKey>("PIPELINE_TEST_POOL_MISSING").unwrap(),
            None
        );
    }
}
