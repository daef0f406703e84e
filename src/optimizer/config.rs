//! Optimization configuration

use serde::{Deserialize, Serialize};
use super::SamplerType;

/// Direction of optimization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizeDirection {
    Minimize,
    #[default]
    Maximize,
}

impl OptimizeDirection {
    /// Score recorded for a failed trial
    pub fn worst_value(&self) -> f64 {
        match self {
            OptimizeDirection::Minimize => f64::INFINITY,
            OptimizeDirection::Maximize => f64::NEG_INFINITY,
        }
    }

    /// Strict improvement; equal values do not replace the incumbent
    pub fn is_better(&self, candidate: f64, incumbent: f64) -> bool {
        match self {
            OptimizeDirection::Minimize => candidate < incumbent,
            OptimizeDirection::Maximize => candidate > incumbent,
        }
    }
}

/// Configuration for hyperparameter optimization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Number of trials to run
    pub n_trials: usize,

    /// Optimization direction
    pub direction: OptimizeDirection,

    /// Sampler type
    pub sampler: SamplerType,

    /// Number of initial random samples before optimization
    pub n_startup_trials: usize,

    /// Random seed
    pub random_state: Option<u64>,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            n_trials: 100,
            direction: OptimizeDirection::Maximize,
            sampler: SamplerType::Tpe,
            n_startup_trials: 10,
            random_state: Some(42),
        }
    }
}

impl OptimizationConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set number of trials
    pub fn with_n_trials(mut self, n: usize) -> Self {
        self.n_trials = n;
        self
    }

    /// Builder method to set direction
    pub fn with_direction(mut self, direction: OptimizeDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Builder method to set sampler
    pub fn with_sampler(mut self, sampler: SamplerType) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OptimizationConfig::default();
        assert_eq!(config.n_trials, 100);
        assert_eq!(config.sampler, SamplerType::Tpe);
        assert_eq!(config.direction, OptimizeDirection::Maximize);
    }

    #[test]
    fn test_builder() {
        let config = OptimizationConfig::new()
            .with_n_trials(50)
            .with_sampler(SamplerType::Random)
            .with_direction(OptimizeDirection::Minimize);

        assert_eq!(config.n_trials, 50);
        assert!(matches!(config.sampler, SamplerType::Random));
        assert!(matches!(config.direction, OptimizeDirection::Minimize));
    }

    #[test]
    fn test_direction_comparisons() {
        assert!(OptimizeDirection::Maximize.is_better(1.0, 0.5));
        assert!(!OptimizeDirection::Maximize.is_better(1.0, 1.0));
        assert!(OptimizeDirection::Minimize.is_better(0.5, 1.0));
        assert_eq!(OptimizeDirection::Maximize.worst_value(), f64::NEG_INFINITY);
    }
}
