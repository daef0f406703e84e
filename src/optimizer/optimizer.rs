//! HyperOptX - sequential hyperparameter search

use crate::error::{PipelineError, Result};
use super::{
    config::{OptimizationConfig, OptimizeDirection},
    search_space::{SearchSpace, TrialParams},
    samplers::{create_sampler, Sampler},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of a single trial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialResult {
    /// Trial number
    pub trial_id: usize,
    /// Parameters used
    pub params: TrialParams,
    /// Objective value (worst possible value when the trial failed)
    #[serde(deserialize_with = "score_or_nan")]
    pub value: f64,
    /// Trial duration in seconds
    pub duration_secs: f64,
    /// Whether the objective errored or returned a non-finite score
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// JSON has no infinities; failed scores are written as `null`
fn score_or_nan<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Study containing all trials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Study {
    /// All trial results
    pub trials: Vec<TrialResult>,
    /// Best trial index
    pub best_trial_idx: Option<usize>,
    /// Total duration
    pub total_duration_secs: f64,
    /// Optimization direction
    pub direction: OptimizeDirection,
}

impl Study {
    /// Create a new study
    pub fn new(direction: OptimizeDirection) -> Self {
        Self {
            trials: Vec::new(),
            best_trial_idx: None,
            total_duration_secs: 0.0,
            direction,
        }
    }

    /// Get the best trial
    pub fn best_trial(&self) -> Option<&TrialResult> {
        self.best_trial_idx.map(|idx| &self.trials[idx])
    }

    /// Get the best value
    pub fn best_value(&self) -> Option<f64> {
        self.best_trial().map(|t| t.value)
    }

    /// Get the best parameters
    pub fn best_params(&self) -> Option<&TrialParams> {
        self.best_trial().map(|t| &t.params)
    }

    pub fn n_failed(&self) -> usize {
        self.trials.iter().filter(|t| t.failed).count()
    }

    /// Add a trial result. Failed trials never become the best; ties keep the earlier trial.
    pub fn add_trial(&mut self, result: TrialResult) {
        let idx = self.trials.len();

        let is_better = !result.failed
            && match self.best_trial_idx {
                None => true,
                Some(best_idx) => self.direction.is_better(result.value, self.trials[best_idx].value),
            };

        if is_better {
            self.best_trial_idx = Some(idx);
        }

        self.trials.push(result);
    }

    /// Save study to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load study from a JSON file
    pub fn load(path: &Path) -> Result<Study> {
        let json = std::fs::read_to_string(path)?;
        let mut study: Study = serde_json::from_str(&json)?;
        let worst = study.direction.worst_value();
        for trial in study.trials.iter_mut().filter(|t| t.failed || t.value.is_nan()) {
            trial.value = worst;
        }
        Ok(study)
    }
}

/// Main hyperparameter optimizer
pub struct HyperOptX {
    config: OptimizationConfig,
    search_space: SearchSpace,
    sampler: Box<dyn Sampler>,
    study: Study,
}

impl HyperOptX {
    /// Create a new optimizer
    pub fn new(config: OptimizationConfig, search_space: SearchSpace) -> Result<Self> {
        for param in search_space.parameters() {
            param
                .validate()
                .map_err(|reason| PipelineError::invalid_param(&param.name, format!("{:?}", param.param_type), reason))?;
        }
        if search_space.is_empty() {
            return Err(PipelineError::OptimizationError("search space is empty".to_string()));
        }

        let sampler = create_sampler(config.sampler, config.random_state, config.n_startup_trials);
        let study = Study::new(config.direction);

        Ok(Self {
            config,
            search_space,
            sampler,
            study,
        })
    }

    /// Run exactly `n_trials` trials of `objective`.
    ///
    /// A trial whose objective returns an error or a non-finite score is
    /// recorded as failed with the worst possible value, and the search
    /// continues.
    pub fn optimize<F>(&mut self, mut objective: F) -> Result<&Study>
    where
        F: FnMut(&TrialParams) -> Result<f64>,
    {
        let start = Instant::now();
        let direction = self.config.direction;
        let mut history: Vec<(TrialParams, f64)> = Vec::new();

        for trial_id in 0..self.config.n_trials {
            let trial_start = Instant::now();

            // Sample parameters; the sampler always sees higher-is-better scores
            let params = self.sampler.sample(&self.search_space, &history);

            let outcome = objective(&params).and_then(|value| {
                if value.is_finite() {
                    Ok(value)
                } else {
                    Err(PipelineError::OptimizationError(format!("non-finite score {}", value)))
                }
            });

            let result = match outcome {
                Ok(value) => {
                    let signed = match direction {
                        OptimizeDirection::Maximize => value,
                        OptimizeDirection::Minimize => -value,
                    };
                    history.push((params.clone(), signed));

                    TrialResult {
                        trial_id,
                        params,
                        value,
                        duration_secs: trial_start.elapsed().as_secs_f64(),
                        failed: false,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(trial = trial_id, error = %e, "Trial failed, recorded with worst score");
                    TrialResult {
                        trial_id,
                        params,
                        value: direction.worst_value(),
                        duration_secs: trial_start.elapsed().as_secs_f64(),
                        failed: true,
                        error: Some(e.to_string()),
                    }
                }
            };

            debug!(
                trial = trial_id,
                value = result.value,
                best = self.study.best_value().unwrap_or(result.value),
                "Trial finished"
            );

            self.study.add_trial(result);
        }

        self.study.total_duration_secs = start.elapsed().as_secs_f64();

        info!(
            trials = self.study.trials.len(),
            failed = self.study.n_failed(),
            best = ?self.study.best_value(),
            "Hyperparameter search finished"
        );

        Ok(&self.study)
    }

    /// Get the study results
    pub fn study(&self) -> &Study {
        &self.study
    }

    pub fn into_study(self) -> Study {
        self.study
    }

    pub fn search_space(&self) -> &SearchSpace {
        &self.search_space
    }
}
