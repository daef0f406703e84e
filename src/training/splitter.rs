//! Second-order split search
//!
//! Gain of a candidate split with gradient/hessian sums `G`, `H`:
//! `0.5 * [S(GL, HL) + S(GR, HR) - S(G, H)]` where
//! `S(g, h) = T(g)^2 / (h + lambda)` and `T` soft-thresholds `g` by `alpha`.
//!
//! Rows whose feature value is `NaN` always fall on the right side, so every
//! candidate is scored with the missing rows included in the right sums.
//! Thresholds are kept at f32 precision, matching the exported graph.

use ndarray::Array2;
use rayon::prelude::*;
use std::cmp::Ordering;

/// Bin index reserved for missing values
pub(crate) const MISSING_BIN: u16 = u16::MAX;

fn soft_threshold(g: f64, alpha: f64) -> f64 {
    if g > alpha {
        g - alpha
    } else if g < -alpha {
        g + alpha
    } else {
        0.0
    }
}

/// Optimal leaf weight with L1 (alpha) and L2 (lambda) regularization
pub(crate) fn leaf_weight(g_sum: f64, h_sum: f64, lambda: f64, alpha: f64) -> f64 {
    let denom = h_sum + lambda;
    if denom <= 0.0 {
        return 0.0;
    }
    -soft_threshold(g_sum, alpha) / denom
}

fn structure_score(g: f64, h: f64, lambda: f64, alpha: f64) -> f64 {
    let denom = h + lambda;
    if denom <= 0.0 {
        return 0.0;
    }
    let t = soft_threshold(g, alpha);
    t * t / denom
}

pub(crate) fn split_gain(
    gl: f64,
    hl: f64,
    gr: f64,
    hr: f64,
    lambda: f64,
    alpha: f64,
) -> f64 {
    0.5 * (structure_score(gl, hl, lambda, alpha) + structure_score(gr, hr, lambda, alpha)
        - structure_score(gl + gr, hl + hr, lambda, alpha))
}

/// Smallest f32 value not below `v`
fn f32_ceil(v: f64) -> f64 {
    let t = v as f32;
    if f64::from(t) >= v {
        return f64::from(t);
    }
    let up = if t == 0.0 {
        f32::from_bits(1)
    } else if t > 0.0 {
        f32::from_bits(t.to_bits() + 1)
    } else {
        f32::from_bits(t.to_bits() - 1)
    };
    f64::from(up)
}

/// f32 cut between two distinct sorted values; `lo` always stays left
fn cut_between(lo: f64, hi: f64) -> f64 {
    let mid = f64::from(((lo + hi) / 2.0) as f32);
    if mid >= lo {
        mid
    } else {
        f32_ceil(lo)
    }
}

/// Child constraints and regularization applied to every candidate
#[derive(Debug, Clone, Copy)]
pub(crate) struct SplitParams {
    pub reg_lambda: f64,
    pub reg_alpha: f64,
    pub min_child_weight: f64,
    pub min_child_samples: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SplitCandidate {
    pub feature: usize,
    pub threshold: f64,
    pub gain: f64,
}

impl SplitCandidate {
    /// Higher gain wins; equal gains prefer the lower feature index
    fn better_than(&self, other: &SplitCandidate) -> bool {
        match self.gain.total_cmp(&other.gain) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.feature < other.feature,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Sums {
    g: f64,
    h: f64,
    n: usize,
}

impl Sums {
    fn add(&mut self, g: f64, h: f64) {
        self.g += g;
        self.h += h;
        self.n += 1;
    }

    fn minus(&self, other: &Sums) -> Sums {
        Sums {
            g: self.g - other.g,
            h: self.h - other.h,
            n: self.n - other.n,
        }
    }

    fn admissible(&self, params: &SplitParams) -> bool {
        self.n >= params.min_child_samples.max(1) && self.h >= params.min_child_weight
    }
}

/// Feature matrix quantized into at most `max_bin` bins per feature.
///
/// Bin `b` holds values `v` with `cuts[b - 1] < v <= cuts[b]`; a split at cut
/// `k` sends bins `0..=k` left.
#[derive(Debug, Clone)]
pub(crate) struct BinnedMatrix {
    bins: Array2<u16>,
    cuts: Vec<Vec<f64>>,
}

impl BinnedMatrix {
    pub fn build(x: &Array2<f64>, max_bin: usize) -> Self {
        let max_bin = max_bin.clamp(2, MISSING_BIN as usize);
        let cuts: Vec<Vec<f64>> = (0..x.ncols())
            .into_par_iter()
            .map(|f| {
                let mut values: Vec<f64> = x.column(f).iter().copied().filter(|v| !v.is_nan()).collect();
                values.sort_by(|a, b| a.total_cmp(b));
                feature_cuts(&values, max_bin)
            })
            .collect();

        let bins = Array2::from_shape_fn(x.dim(), |(r, f)| {
            let v = x[[r, f]];
            if v.is_nan() {
                MISSING_BIN
            } else {
                cuts[f].partition_point(|&c| c < v) as u16
            }
        });

        Self { bins, cuts }
    }

    pub fn n_cuts(&self, feature: usize) -> usize {
        self.cuts[feature].len()
    }
}

/// Midpoints between consecutive distinct values, thinned to quantiles when
/// there are more distinct values than bins
fn feature_cuts(sorted: &[f64], max_bin: usize) -> Vec<f64> {
    let n = sorted.len();
    let mut cuts = Vec::new();
    if n < 2 {
        return cuts;
    }

    let mut push_cut = |lo: f64, hi: f64| {
        let cut = cut_between(lo, hi);
        if cuts.last().map_or(true, |&last: &f64| cut > last) {
            cuts.push(cut);
        }
    };

    let mut distinct = sorted.to_vec();
    distinct.dedup();
    if distinct.len() <= max_bin {
        for w in distinct.windows(2) {
            push_cut(w[0], w[1]);
        }
    } else {
        for k in 1..max_bin {
            let pos = k * n / max_bin;
            let lo = sorted[pos.saturating_sub(1)];
            if let Some(&hi) = sorted[pos..].iter().find(|&&v| v > lo) {
                push_cut(lo, hi);
            }
        }
    }
    cuts
}

/// Split search strategy
#[derive(Debug, Clone)]
pub(crate) enum SplitFinder {
    /// Exact greedy scan over sorted feature values
    Exact,
    /// Gradient histograms over pre-binned features
    Histogram(BinnedMatrix),
}

impl SplitFinder {
    pub fn histogram(x: &Array2<f64>, max_bin: usize) -> Self {
        SplitFinder::Histogram(BinnedMatrix::build(x, max_bin))
    }

    /// Best split of `indices` over `features`, if any has positive gain
    pub fn find_best(
        &self,
        x: &Array2<f64>,
        grad: &[f64],
        hess: &[f64],
        indices: &[usize],
        features: &[usize],
        params: &SplitParams,
    ) -> Option<SplitCandidate> {
        let candidates: Vec<SplitCandidate> = features
            .par_iter()
            .filter_map(|&f| match self {
                SplitFinder::Exact => exact_split(x, grad, hess, indices, f, params),
                SplitFinder::Histogram(binned) => histogram_split(binned, grad, hess, indices, f, params),
            })
            .collect();

        let mut best: Option<SplitCandidate> = None;
        for c in candidates {
            if c.gain > 0.0 && best.map_or(true, |b| c.better_than(&b)) {
                best = Some(c);
            }
        }
        best
    }
}

fn exact_split(
    x: &Array2<f64>,
    grad: &[f64],
    hess: &[f64],
    indices: &[usize],
    feature: usize,
    params: &SplitParams,
) -> Option<SplitCandidate> {
    let mut total = Sums::default();
    let mut present: Vec<(f64, usize)> = Vec::with_capacity(indices.len());
    for &i in indices {
        total.add(grad[i], hess[i]);
        let v = x[[i, feature]];
        if !v.is_nan() {
            present.push((v, i));
        }
    }
    present.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut left = Sums::default();
    let mut best: Option<SplitCandidate> = None;
    for pos in 0..present.len() {
        let (v, i) = present[pos];
        left.add(grad[i], hess[i]);

        let next = present.get(pos + 1).map(|p| p.0);
        let threshold = match next {
            Some(nv) if nv == v => continue,
            Some(nv) => cut_between(v, nv),
            // Everything present goes left, only missing rows go right
            None if left.n < total.n => f32_ceil(v),
            None => break,
        };

        let right = total.minus(&left);
        if !left.admissible(params) || !right.admissible(params) {
            continue;
        }

        let gain = split_gain(left.g, left.h, right.g, right.h, params.reg_lambda, params.reg_alpha);
        if best.map_or(true, |b| gain > b.gain) {
            best = Some(SplitCandidate {
                feature,
                threshold,
                gain,
            });
        }
    }
    best
}

fn histogram_split(
    binned: &BinnedMatrix,
    grad: &[f64],
    hess: &[f64],
    indices: &[usize],
    feature: usize,
    params: &SplitParams,
) -> Option<SplitCandidate> {
    let n_cuts = binned.n_cuts(feature);
    if n_cuts == 0 {
        return None;
    }

    let mut hist = vec![Sums::default(); n_cuts + 1];
    let mut total = Sums::default();
    for &i in indices {
        total.add(grad[i], hess[i]);
        let b = binned.bins[[i, feature]];
        if b != MISSING_BIN {
            hist[b as usize].add(grad[i], hess[i]);
        }
    }

    let mut left = Sums::default();
    let mut best: Option<SplitCandidate> = None;
    for k in 0..n_cuts {
        let bin = &hist[k];
        left.g += bin.g;
        left.h += bin.h;
        left.n += bin.n;
        if bin.n == 0 && k > 0 {
            continue;
        }

        let right = total.minus(&left);
        if !left.admissible(params) || !right.admissible(params) {
            continue;
        }

        let gain = split_gain(left.g, left.h, right.g, right.h, params.reg_lambda, params.reg_alpha);
        if best.map_or(true, |b| gain > b.gain) {
            best = Some(SplitCandidate {
                feature,
                threshold: binned.cuts[feature][k],
                gain,
            });
        }
    }
    best
}

/// Partition rows by `x[feature] <= threshold`; `NaN` lands right
pub(crate) fn partition(
    x: &Array2<f64>,
    indices: &[usize],
    feature: usize,
    threshold: f64,
) -> (Vec<usize>, Vec<usize>) {
    indices.iter().partition(|&&i| x[[i, feature]] <= threshold)
}
