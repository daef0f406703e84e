//! Seeded train/test partitioning

use crate::error::{PipelineError, Result};
use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hold-out split settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Fraction of rows held out for testing, in (0, 1)
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Preserve class proportions. `None` stratifies classification tasks only.
    #[serde(default)]
    pub stratify: Option<bool>,
}

fn default_test_fraction() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: default_test_fraction(),
            seed: default_seed(),
            stratify: None,
        }
    }
}

/// Row indices of a train/test partition, each side sorted ascending
#[derive(Debug, Clone, PartialEq)]
pub struct TrainTestSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
}

/// Materialized partition
#[derive(Debug, Clone)]
pub struct Partitions {
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: Array1<f64>,
    pub y_test: Array1<f64>,
}

impl TrainTestSplit {
    /// Shuffled split holding out `ceil(n * test_fraction)` rows
    pub fn new(n_samples: usize, test_fraction: f64, seed: u64) -> Result<Self> {
        check_fraction(test_fraction)?;
        let n_test = (n_samples as f64 * test_fraction).ceil() as usize;
        check_sides(n_samples, n_test)?;

        let mut indices: Vec<usize> = (0..n_samples).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let mut test_indices = indices[..n_test].to_vec();
        let mut train_indices = indices[n_test..].to_vec();
        test_indices.sort_unstable();
        train_indices.sort_unstable();

        Ok(Self {
            train_indices,
            test_indices,
        })
    }

    /// Split preserving class proportions of `y` in both parts.
    ///
    /// Each class contributes `floor(count * test_fraction)` rows; the rows
    /// still missing from the `ceil(n * test_fraction)` total go to the classes
    /// with the largest fractional remainders.
    pub fn stratified(y: &Array1<f64>, test_fraction: f64, seed: u64) -> Result<Self> {
        check_fraction(test_fraction)?;
        let n_samples = y.len();
        let n_test = (n_samples as f64 * test_fraction).ceil() as usize;
        check_sides(n_samples, n_test)?;

        let mut class_indices: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (idx, &val) in y.iter().enumerate() {
            class_indices.entry(val.round() as i64).or_default().push(idx);
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        for indices in class_indices.values_mut() {
            indices.shuffle(&mut rng);
        }

        let mut quota: Vec<(i64, usize, f64)> = class_indices
            .iter()
            .map(|(&class, indices)| {
                let exact = indices.len() as f64 * test_fraction;
                (class, exact.floor() as usize, exact - exact.floor())
            })
            .collect();

        let assigned: usize = quota.iter().map(|(_, q, _)| q).sum();
        let mut remaining = n_test.saturating_sub(assigned);
        let mut order: Vec<usize> = (0..quota.len()).collect();
        order.sort_by(|&a, &b| quota[b].2.total_cmp(&quota[a].2).then(a.cmp(&b)));
        for i in order {
            if remaining == 0 {
                break;
            }
            let available = class_indices[&quota[i].0].len();
            if quota[i].1 < available {
                quota[i].1 += 1;
                remaining -= 1;
            }
        }

        let mut test_indices = Vec::with_capacity(n_test);
        let mut train_indices = Vec::with_capacity(n_samples - n_test);
        for (class, take, _) in &quota {
            let indices = &class_indices[class];
            test_indices.extend_from_slice(&indices[..*take]);
            train_indices.extend_from_slice(&indices[*take..]);
        }
        test_indices.sort_unstable();
        train_indices.sort_unstable();

        Ok(Self {
            train_indices,
            test_indices,
        })
    }

    /// Gather the rows of each side
    pub fn apply(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Partitions> {
        if x.nrows() != y.len() {
            return Err(PipelineError::ShapeError {
                expected: format!("{} targets", x.nrows()),
                actual: format!("{} targets", y.len()),
            });
        }

        Ok(Partitions {
            x_train: x.select(Axis(0), &self.train_indices),
            x_test: x.select(Axis(0), &self.test_indices),
            y_train: y.select(Axis(0), &self.train_indices),
            y_test: y.select(Axis(0), &self.test_indices),
        })
    }
}

/// Split `n_samples` rows, stratifying on `stratify` when given
pub fn train_test_split(
    n_samples: usize,
    test_fraction: f64,
    seed: u64,
    stratify: Option<&Array1<f64>>,
) -> Result<TrainTestSplit> {
    match stratify {
        Some(y) if y.len() != n_samples => Err(PipelineError::ShapeError {
            expected: format!("{} labels", n_samples),
            actual: format!("{} labels", y.len()),
        }),
        Some(y) => TrainTestSplit::stratified(y, test_fraction, seed),
        None => TrainTestSplit::new(n_samples, test_fraction, seed),
    }
}

fn check_fraction(test_fraction: f64) -> Result<()> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(PipelineError::invalid_param(
            "test_fraction",
            test_fraction,
            "must be in (0, 1)",
        ));
    }
    Ok(())
}

fn check_sides(n_samples: usize, n_test: usize) -> Result<()> {
    if n_test == 0 || n_test >= n_samples {
        return Err(PipelineError::invalid_param(
            "test_fraction",
            format!("{} test rows of {}", n_test, n_samples),
            "both train and test partitions must be non-empty",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_split_sizes_and_disjoint() {
        let split = TrainTestSplit::new(10, 0.2, 42).unwrap();
        assert_eq!(split.test_indices.len(), 2);
        assert_eq!(split.train_indices.len(), 8);

        let mut all: Vec<usize> = split
            .train_indices
            .iter()
            .chain(&split.test_indices)
            .copied()
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_is_deterministic() {
        let a = TrainTestSplit::new(100, 0.25, 7).unwrap();
        let b = TrainTestSplit::new(100, 0.25, 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_ceil_test_size() {
        let split = TrainTestSplit::new(11, 0.2, 0).unwrap();
        assert_eq!(split.test_indices.len(), 3);
    }

    #[test]
    fn test_invalid_fraction() {
        assert!(TrainTestSplit::new(10, 0.0, 0).is_err());
        assert!(TrainTestSplit::new(10, 1.0, 0).is_err());
        assert!(TrainTestSplit::new(1, 0.5, 0).is_err());
    }

    #[test]
    fn test_stratified_preserves_proportions() {
        let y = Array1::from_iter((0..100).map(|i| if i % 10 == 0 { 1.0 } else { 0.0 }));
        let split = TrainTestSplit::stratified(&y, 0.2, 42).unwrap();
        assert_eq!(split.test_indices.len(), 20);

        let positives = split.test_indices.iter().filter(|&&i| y[i] == 1.0).count();
        assert_eq!(positives, 2);
    }

    #[test]
    fn test_stratified_remainder_allocation() {
        // 7 zeros and 3 ones at 0.25: quotas 1.75 and 0.75, ceil total 3
        let y = array![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let split = TrainTestSplit::stratified(&y, 0.25, 3).unwrap();
        assert_eq!(split.test_indices.len(), 3);
        let positives = split.test_indices.iter().filter(|&&i| y[i] == 1.0).count();
        assert_eq!(positives, 1);
    }

    #[test]
    fn test_train_test_split_dispatch() {
        let y = Array1::from_iter((0..20).map(|i| (i % 2) as f64));
        let plain = train_test_split(20, 0.2, 1, None).unwrap();
        let strat = train_test_split(20, 0.2, 1, Some(&y)).unwrap();
        assert_eq!(plain.test_indices.len(), 4);
        assert_eq!(strat.test_indices.iter().filter(|&&i| y[i] == 1.0).count(), 2);
        assert!(train_test_split(21, 0.2, 1, Some(&y)).is_err());
    }

    #[test]
    fn test_apply_gathers_rows() {
        let x = Array2::from_shape_fn((5, 2), |(r, c)| (r * 10 + c) as f64);
        let y = array![0.0, 1.0, 2.0, 3.0, 4.0];
        let split = TrainTestSplit {
            train_indices: vec![0, 2, 4],
            test_indices: vec![1, 3],
        };
        let parts = split.apply(&x, &y).unwrap();
        assert_eq!(parts.x_test.row(1).to_vec(), vec![30.0, 31.0]);
        assert_eq!(parts.y_train.to_vec(), vec![0.0, 2.0, 4.0]);
    }
}
