//! Engine configuration.
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `STOCKROUTE_`-prefixed environment variables with `__` separating nested
//! keys (`STOCKROUTE_VARIANCE__TOLERANCE_PERCENT=2.5`).
//!
//! The `emergency` and `alerts` sections are engine-wide defaults; tenants can
//! store their own overrides.

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockroute_analytics::{AlertPolicy, OptimizationStrategy};
use stockroute_transfers::{EmergencyConfig, VarianceTolerance};

pub const ENV_PREFIX: &str = "STOCKROUTE_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(value: figment::Error) -> Self {
        ConfigError::Load(Box::new(value))
    }
}

/// Receiving variance settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VarianceConfig {
    /// A received quantity further than this from the expected one needs a reason.
    pub tolerance_percent: f64,
}

impl Default for VarianceConfig {
    fn default() -> Self {
        Self {
            tolerance_percent: VarianceTolerance::DEFAULT_PERCENT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Band around the demand-weighted ideal inside which a location counts as balanced.
    pub rebalance_tolerance_percent: f64,
    /// `balanced`, `demand_driven` or `cost_minimizing`.
    pub default_strategy: String,
    /// Repeats needed before a variance direction counts as a pattern.
    pub pattern_min_occurrences: usize,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            rebalance_tolerance_percent: 15.0,
            default_strategy: "balanced".to_string(),
            pattern_min_occurrences: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub variance: VarianceConfig,
    pub emergency: EmergencyConfig,
    pub alerts: AlertPolicy,
    pub optimization: OptimizationConfig,
    pub telemetry: TelemetryConfig,
}

impl EngineConfig {
    /// Defaults, then `path` (if any), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |e: stockroute_core::DomainError| ConfigError::Invalid(e.to_string());
        VarianceTolerance::new(self.variance.tolerance_percent).map_err(invalid)?;
        self.emergency.validate().map_err(invalid)?;
        self.alerts.validate().map_err(invalid)?;
        if OptimizationStrategy::named(&self.optimization.default_strategy).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown optimization strategy '{}'",
                self.optimization.default_strategy
            )));
        }
        if !self.optimization.rebalance_tolerance_percent.is_finite()
            || self.optimization.rebalance_tolerance_percent < 0.0
        {
            return Err(ConfigError::Invalid(
                "rebalance_tolerance_percent must be a non-negative percentage".to_string(),
            ));
        }
        Ok(())
    }

    /// Install the process-wide tracing subscriber at `telemetry.log_level`.
    pub fn init_telemetry(&self) {
        stockroute_observability::init_with_level(&self.telemetry.log_level);
    }

    pub fn tolerance(&self) -> VarianceTolerance {
        VarianceTolerance::new(self.variance.tolerance_percent).unwrap_or_default()
    }

    pub fn default_strategy(&self) -> OptimizationStrategy {
        OptimizationStrategy::named(&self.optimization.default_strategy)
            .unwrap_or_else(OptimizationStrategy::balanced)
    }
}
