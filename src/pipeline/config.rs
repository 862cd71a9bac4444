//! Orchestrator configuration.
//!
//! This module provides configuration options for the job orchestrator,
//! including request limits, agent timeouts, job concurrency, the event
//! buffer, and optional persistence and phase-plan locations.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::agents::DEFAULT_AGENT_TIMEOUT;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// A phase plan file could not be parsed.
    #[error("Invalid phase plan file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the job orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    // Request limits
    /// Largest accepted `population_size`.
    pub max_population_size: u64,

    // Agent settings
    /// Timeout for agents without an override.
    pub default_agent_timeout: Duration,
    /// Per-agent timeout overrides.
    pub agent_timeouts: HashMap<String, Duration>,

    // Execution settings
    /// Jobs allowed to run at once; later jobs wait in Pending.
    pub max_concurrent_jobs: usize,
    /// Capacity of the job event broadcast channel.
    pub event_buffer: usize,

    // Storage settings
    /// SQLite URL for durable records; in-memory storage when unset.
    pub database_url: Option<String>,
    /// YAML phase plan; the built-in plan when unset.
    pub phase_plan_path: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_population_size: 100_000,
            default_agent_timeout: DEFAULT_AGENT_TIMEOUT,
            agent_timeouts: HashMap::new(),
            max_concurrent_jobs: 8,
            event_buffer: 256,
            database_url: None,
            phase_plan_path: None,
        }
    }
}

impl OrchestratorConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `COHORT_MAX_POPULATION`: Maximum population size (default: 100000)
    /// - `COHORT_AGENT_TIMEOUT_SECS`: Default agent timeout in seconds (default: 30)
    /// - `COHORT_AGENT_TIMEOUTS`: Per-agent overrides as `agent=secs,agent=secs`
    /// - `COHORT_MAX_CONCURRENT_JOBS`: Concurrent jobs (default: 8)
    /// - `COHORT_EVENT_BUFFER`: Event channel capacity (default: 256)
    /// - `COHORT_PHASE_PLAN`: Path to a YAML phase plan
    /// - `DATABASE_URL`: SQLite connection URL (optional)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(val) = lookup("COHORT_MAX_POPULATION") {
            config.max_population_size = parse_env_value(&val, "COHORT_MAX_POPULATION")?;
        }

        if let Some(val) = lookup("COHORT_AGENT_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "COHORT_AGENT_TIMEOUT_SECS")?;
            config.default_agent_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("COHORT_AGENT_TIMEOUTS") {
            config.agent_timeouts = parse_timeouts(&val, "COHORT_AGENT_TIMEOUTS")?;
        }

        if let Some(val) = lookup("COHORT_MAX_CONCURRENT_JOBS") {
            config.max_concurrent_jobs = parse_env_value(&val, "COHORT_MAX_CONCURRENT_JOBS")?;
        }

        if let Some(val) = lookup("COHORT_EVENT_BUFFER") {
            config.event_buffer = parse_env_value(&val, "COHORT_EVENT_BUFFER")?;
        }

        if let Some(val) = lookup("COHORT_PHASE_PLAN") {
            config.phase_plan_path = Some(PathBuf::from(val));
        }

        config.database_url = lookup("DATABASE_URL").filter(|url| !url.is_empty());

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_population_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_population_size must be greater than 0".to_string(),
            ));
        }

        if self.default_agent_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "default_agent_timeout must be greater than 0".to_string(),
            ));
        }

        if let Some((agent, _)) = self.agent_timeouts.iter().find(|(_, t)| t.is_zero()) {
            return Err(ConfigError::ValidationFailed(format!(
                "timeout for agent '{}' must be greater than 0",
                agent
            )));
        }

        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_jobs must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer == 0 {
            return Err(ConfigError::ValidationFailed(
                "event_buffer must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the maximum population size.
    pub fn with_max_population_size(mut self, max: u64) -> Self {
        self.max_population_size = max;
        self
    }

    /// Builder method to set the default agent timeout.
    pub fn with_default_agent_timeout(mut self, timeout: Duration) -> Self {
        self.default_agent_timeout = timeout;
        self
    }

    /// Builder method to override one agent's timeout.
    pub fn with_agent_timeout(mut self, agent_id: impl Into<String>, timeout: Duration) -> Self {
        self.agent_timeouts.insert(agent_id.into(), timeout);
        self
    }

    /// Builder method to set the job concurrency limit.
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    /// Builder method to set the event buffer size.
    pub fn with_event_buffer(mut self, size: usize) -> Self {
        self.event_buffer = size;
        self
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Builder method to set the phase plan path.
    pub fn with_phase_plan_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.phase_plan_path = Some(path.into());
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse `agent=secs` pairs separated by commas.
fn parse_timeouts(value: &str, key: &str) -> Result<HashMap<String, Duration>, ConfigError> {
    let mut timeouts = HashMap::new();
    for pair in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (agent, secs) = pair.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected 'agent=secs', got '{}'", pair),
        })?;
        let secs: u64 = parse_env_value(secs, key)?;
        timeouts.insert(agent.trim().to_string(), Duration::from_secs(secs));
    }
    Ok(timeouts)
}
