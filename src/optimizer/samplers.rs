//! Sampling strategies for hyperparameter optimization

use super::search_space::{Parameter, ParameterValue, SearchSpace, TrialParams};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

/// Type of sampler to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerType {
    /// Random sampling
    Random,
    /// Tree-structured Parzen Estimator
    #[default]
    Tpe,
}

/// Trait for hyperparameter samplers.
///
/// `history` holds the completed (successful) trials; higher scores are better.
pub trait Sampler: Send {
    /// Sample the next set of hyperparameters
    fn sample(&mut self, search_space: &SearchSpace, history: &[(TrialParams, f64)]) -> TrialParams;
}

fn seeded_rng(seed: Option<u64>) -> Xoshiro256PlusPlus {
    match seed {
        Some(s) => Xoshiro256PlusPlus::seed_from_u64(s),
        None => Xoshiro256PlusPlus::from_entropy(),
    }
}

/// Random sampler
#[derive(Debug)]
pub struct RandomSampler {
    rng: Xoshiro256PlusPlus,
}

impl RandomSampler {
    /// Create a new random sampler
    pub fn new(seed: Option<u64>) -> Self {
        Self { rng: seeded_rng(seed) }
    }
}

impl Sampler for RandomSampler {
    fn sample(&mut self, search_space: &SearchSpace, _history: &[(TrialParams, f64)]) -> TrialParams {
        search_space.sample(&mut self.rng)
    }
}

/// Tree-structured Parzen Estimator sampler (simplified).
///
/// After `n_startup_trials` random draws, it samples `n_candidates` points
/// and keeps the one closest, in range-normalized distance, to the top
/// `gamma` fraction of previous trials.
#[derive(Debug)]
pub struct TpeSampler {
    rng: Xoshiro256PlusPlus,
    n_startup_trials: usize,
    gamma: f64,
    n_candidates: usize,
}

impl TpeSampler {
    /// Create a new TPE sampler
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: seeded_rng(seed),
            n_startup_trials: 10,
            gamma: 0.25,
            n_candidates: 24,
        }
    }

    /// Set number of startup trials
    pub fn with_n_startup(mut self, n: usize) -> Self {
        self.n_startup_trials = n;
        self
    }

    /// Set gamma (quantile for splitting good/bad)
    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma.clamp(f64::EPSILON, 1.0);
        self
    }

    /// Set number of candidates scored per suggestion
    pub fn with_n_candidates(mut self, n: usize) -> Self {
        self.n_candidates = n.max(1);
        self
    }

    fn similarity(space: &SearchSpace, candidate: &TrialParams, good_trials: &[&TrialParams]) -> f64 {
        if good_trials.is_empty() {
            return 0.0;
        }

        // Average inverse distance
        let mut total_sim = 0.0;
        for good in good_trials {
            let mut dist = 0.0;
            let mut count = 0;

            for param in space.parameters() {
                if let (Some(a), Some(b)) = (candidate.get(&param.name), good.get(&param.name)) {
                    let d = param_distance(param, a, b);
                    dist += d * d;
                    count += 1;
                }
            }

            if count > 0 {
                dist = (dist / count as f64).sqrt();
                total_sim += 1.0 / (1.0 + dist);
            }
        }

        total_sim / good_trials.len() as f64
    }
}

fn param_distance(param: &Parameter, a: &ParameterValue, b: &ParameterValue) -> f64 {
    match (param.normalize(a), param.normalize(b)) {
        (Some(na), Some(nb)) => (na - nb).abs(),
        _ => {
            if a == b {
                0.0
            } else {
                1.0
            }
        }
    }
}

impl Sampler for TpeSampler {
    fn sample(&mut self, search_space: &SearchSpace, history: &[(TrialParams, f64)]) -> TrialParams {
        // Use random sampling for startup trials
        if history.len() < self.n_startup_trials.max(1) {
            return search_space.sample(&mut self.rng);
        }

        // Best scores first; ties keep trial order
        let mut sorted: Vec<&(TrialParams, f64)> = history.iter().collect();
        sorted.sort_by(|a, b| b.1.total_cmp(&a.1));

        let n_good = ((sorted.len() as f64 * self.gamma).ceil() as usize).clamp(1, sorted.len());
        let good_trials: Vec<&TrialParams> = sorted[..n_good].iter().map(|(p, _)| p).collect();

        let mut best_params = search_space.sample(&mut self.rng);
        let mut best_score = Self::similarity(search_space, &best_params, &good_trials);

        for _ in 1..self.n_candidates {
            let candidate = search_space.sample(&mut self.rng);
            let score = Self::similarity(search_space, &candidate, &good_trials);

            if score > best_score {
                best_score = score;
                best_params = candidate;
            }
        }

        best_params
    }
}

/// Create a sampler from type
pub fn create_sampler(sampler_type: SamplerType, seed: Option<u64>, n_startup_trials: usize) -> Box<dyn Sampler> {
    match sampler_type {
        SamplerType::Random => Box::new(RandomSampler::new(seed)),
        SamplerType::Tpe => Box::new(TpeSampler::new(seed).with_n_startup(n_startup_trials)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_sampler() {
        let space = SearchSpace::new()
            .float("lr", 0.001, 0.1)
            .int("n", 10, 100);

        let mut sampler = RandomSampler::new(Some(42));
        let params = sampler.sample(&space, &[]);

        assert!(params.contains_key("lr"));
        assert!(params.contains_key("n"));
    }

    #[test]
    fn test_tpe_sampler_startup() {
        let space = SearchSpace::new().float("lr", 0.001, 0.1);

        let mut sampler = TpeSampler::new(Some(42));

        // During startup, should just do random sampling
        for _ in 0..5 {
            let params = sampler.sample(&space, &[]);
            assert!(params.contains_key("lr"));
        }
    }

    #[test]
    fn test_tpe_biases_toward_high_scores() {
        let space = SearchSpace::new().float("x", 0.0, 1.0);

        // Score grows with x, so good trials sit near 1.0
        let history: Vec<(TrialParams, f64)> = (0..20)
            .map(|i| {
                let x = i as f64 / 19.0;
                let mut params = TrialParams::new();
                params.insert("x".to_string(), ParameterValue::Float(x));
                (params, x)
            })
            .collect();

        let mut sampler = TpeSampler::new(Some(42)).with_n_candidates(64);
        let mean: f64 = (0..20)
            .map(|_| sampler.sample(&space, &history)["x"].as_float().unwrap())
            .sum::<f64>()
            / 20.0;
        assert!(mean > 0.7, "mean suggestion {}", mean);
    }

    #[test]
    fn test_seeded_samplers_repeat() {
        let space = SearchSpace::new().log_float("lr", 1e-3, 0.1).int("depth", 3, 10);
        let mut a = create_sampler(SamplerType::Random, Some(1), 0);
        let mut b = create_sampler(SamplerType::Random, Some(1), 0);
        for _ in 0..5 {
            assert_eq!(a.sample(&space, &[]), b.sample(&space, &[]));
        }
    }
}
