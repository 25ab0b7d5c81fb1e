//! TOML configuration for the orchestration kernel.

use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading the file.
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error.
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Where this process runs, filtering which catalog entries are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Local-only models (Ollama, mock).
    Local,
    /// Cloud providers only.
    Cloud,
    /// Both local and cloud models.
    #[default]
    Hybrid,
}

impl DeploymentMode {
    /// Whether a model with the given locality is admitted.
    #[must_use]
    pub fn admits(&self, local_model: bool) -> bool {
        match self {
            Self::Local => local_model,
            Self::Cloud => !local_model,
            Self::Hybrid => true,
        }
    }
}

impl FromStr for DeploymentMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "cloud" => Ok(Self::Cloud),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(()),
        }
    }
}

/// Execution behavior settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Global worker budget shared across in-flight requests.
    pub worker_budget: usize,
    /// Whether the arbiter runs at all.
    pub enable_arbitration: bool,
    /// Minimum risk level at which BestQuality dispatches a subtask
    /// redundantly for arbitration ("high" or "critical").
    pub redundant_dispatch_min_risk: String,
    /// Accuracy requirement attached to subtasks that don't specify one.
    pub default_accuracy_requirement: f64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            worker_budget: 32,
            enable_arbitration: true,
            redundant_dispatch_min_risk: "high".to_string(),
            default_accuracy_requirement: 0.8,
        }
    }
}

/// Cost management settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CostSettings {
    /// Advisory per-request cost cap in USD; exceeding it logs a warning.
    pub max_cost_per_request: f64,
    /// Relative estimate/actual gap above which a discrepancy is reported.
    pub discrepancy_tolerance: f64,
    /// TTL for cached estimates, in seconds (capped at one hour).
    pub estimate_cache_ttl_secs: u64,
}

impl Default for CostSettings {
    fn default() -> Self {
        Self {
            max_cost_per_request: 10.0,
            discrepancy_tolerance: 0.5,
            estimate_cache_ttl_secs: 3600,
        }
    }
}

/// Per-role hourly request quotas.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Unauthenticated demo callers.
    pub demo_per_hour: u32,
    /// Authenticated users.
    pub authenticated_per_hour: u32,
    /// Administrators.
    pub admin_per_hour: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self { demo_per_hour: 3, authenticated_per_hour: 100, admin_per_hour: 1000 }
    }
}

/// Main configuration for the kernel.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CouncilConfig {
    /// Deployment mode filtering the model catalog.
    pub deployment: DeploymentMode,
    /// Execution behavior.
    pub execution: ExecutionSettings,
    /// Cost management.
    pub cost: CostSettings,
    /// Rate limit table.
    pub rate_limits: RateLimitSettings,
}

impl CouncilConfig {
    /// Loads configuration from a TOML file and applies environment
    /// overrides.
    ///
    /// # Errors
    /// Returns a `ConfigError` if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Builds the default configuration with environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(mode) = std::env::var("COUNCIL_DEPLOYMENT_MODE") {
            if let Ok(parsed) = DeploymentMode::from_str(&mode) {
                self.deployment = parsed;
            }
        }
    }

    /// Validates value ranges.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` on out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.execution.default_accuracy_requirement) {
            return Err(ConfigError::Validation(
                "default_accuracy_requirement must be within [0, 1]".to_string(),
            ));
        }
        if self.execution.worker_budget == 0 {
            return Err(ConfigError::Validation("worker_budget must be positive".to_string()));
        }
        if self.cost.discrepancy_tolerance <= 0.0 {
            return Err(ConfigError::Validation(
                "discrepancy_tolerance must be positive".to_string(),
            ));
        }
        if self.cost.estimate_cache_ttl_secs > 3600 {
            return Err(ConfigError::Validation(
                "estimate_cache_ttl_secs must not exceed one hour".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = CouncilConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_limits.demo_per_hour, 3);
        assert_eq!(config.rate_limits.authenticated_per_hour, 100);
        assert_eq!(config.rate_limits.admin_per_hour, 1000);
    }

    #[test]
    fn test_deployment_mode_admits() {
        assert!(DeploymentMode::Local.admits(true));
        assert!(!DeploymentMode::Local.admits(false));
        assert!(!DeploymentMode::Cloud.admits(true));
        assert!(DeploymentMode::Cloud.admits(false));
        assert!(DeploymentMode::Hybrid.admits(true));
        assert!(DeploymentMode::Hybrid.admits(false));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
deployment = "cloud"

[execution]
worker_budget = 8

[rate_limits]
demo_per_hour = 5
"#
        )
        .unwrap();

        let config = CouncilConfig::from_file(file.path()).unwrap();
        assert_eq!(config.deployment, DeploymentMode::Cloud);
        assert_eq!(config.execution.worker_budget, 8);
        assert_eq!(config.rate_limits.demo_per_hour, 5);
        // Untouched sections keep defaults.
        assert_eq!(config.rate_limits.admin_per_hour, 1000);
    }

    #[test]
    fn test_invalid_accuracy_rejected() {
        let mut config = CouncilConfig::default();
        config.execution.default_accuracy_requirement = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_cache_ttl_capped_at_one_hour() {
        let mut config = CouncilConfig::default();
        config.cost.estimate_cache_ttl_secs = 7200;
        assert!(config.validate().is_err());
    }
}
