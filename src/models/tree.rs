//! CART regression tree with squared-error splits

use anyhow::Result;
use faer::Mat;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::Serialize;

use crate::error::AnalysisError;
use crate::models::{check_fit_input, check_predict_input, Regressor};

/// Values closer than this are treated as equal when placing thresholds
const FEATURE_THRESHOLD: f64 = 1e-7;

/// Decision tree node
#[derive(Debug, Clone, Serialize)]
pub enum TreeNode {
    Leaf {
        value: f64,
        n_samples: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        /// Side taken by NaN inputs
        missing_left: bool,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        n_samples: usize,
        impurity: f64,
    },
}

impl TreeNode {
    fn predict_row(&self, x: &Mat<f64>, row: usize) -> f64 {
        match self {
            TreeNode::Leaf { value, .. } => *value,
            TreeNode::Split {
                feature,
                threshold,
                missing_left,
                left,
                right,
                ..
            } => {
                let v = x[(row, *feature)];
                let go_left = if v.is_nan() { *missing_left } else { v <= *threshold };
                if go_left {
                    left.predict_row(x, row)
                } else {
                    right.predict_row(x, row)
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    pub fn n_leaves(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => left.n_leaves() + right.n_leaves(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionTreeConfig {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Seeds the per-node feature visiting order
    pub random_state: u64,
}

impl Default for DecisionTreeConfig {
    fn default() -> Self {
        Self {
            max_depth: Some(10),
            min_samples_split: 2,
            min_samples_leaf: 1,
            random_state: 123,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecisionTreeRegressor {
    pub config: DecisionTreeConfig,
    root: Option<TreeNode>,
    n_features: usize,
    feature_importances: Vec<f64>,
}

/// Best threshold found on one feature
#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    missing_left: bool,
    /// `sum_l² / n_l + sum_r² / n_r`; larger is a lower child SSE
    proxy: f64,
}

/// Sufficient statistics of a set of targets
#[derive(Debug, Clone, Copy, Default)]
struct Moments {
    n: f64,
    sum: f64,
    sum_sq: f64,
}

impl Moments {
    fn of(y: &[f64], indices: &[usize]) -> Self {
        indices.iter().fold(Self::default(), |m, &i| m.push(y[i]))
    }

    fn push(self, v: f64) -> Self {
        Self {
            n: self.n + 1.0,
            sum: self.sum + v,
            sum_sq: self.sum_sq + v * v,
        }
    }

    fn mean(&self) -> f64 {
        self.sum / self.n
    }

    /// Mean squared deviation
    fn impurity(&self) -> f64 {
        (self.sum_sq / self.n - self.mean().powi(2)).max(0.0)
    }
}

impl DecisionTreeRegressor {
    pub fn new(config: DecisionTreeConfig) -> Self {
        Self {
            config,
            root: None,
            n_features: 0,
            feature_importances: Vec::new(),
        }
    }

    pub fn root(&self) -> Option<&TreeNode> {
        self.root.as_ref()
    }

    /// Normalized total impurity decrease per feature (sums to 1 unless the tree is a stump)
    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }

    fn build(
        &self,
        columns: &[Vec<f64>],
        y: &[f64],
        indices: &[usize],
        depth: usize,
        rng: &mut StdRng,
        importances: &mut [f64],
    ) -> TreeNode {
        let moments = Moments::of(y, indices);
        let n_samples = indices.len();
        let impurity = moments.impurity();

        let at_max_depth = self.config.max_depth.map_or(false, |d| depth >= d);
        let too_small = n_samples < self.config.min_samples_split
            || n_samples < 2 * self.config.min_samples_leaf;

        if at_max_depth || too_small || impurity <= f64::EPSILON {
            return TreeNode::Leaf {
                value: moments.mean(),
                n_samples,
            };
        }

        let mut order: Vec<usize> = (0..columns.len()).collect();
        order.shuffle(rng);

        let min_leaf = self.config.min_samples_leaf;
        let candidates: Vec<Option<SplitCandidate>> = order
            .par_iter()
            .map(|&f| best_split_for_feature(f, &columns[f], y, indices, min_leaf))
            .collect();

        // First strictly-best candidate in visiting order wins
        let best = candidates
            .into_iter()
            .flatten()
            .fold(None::<SplitCandidate>, |best, c| match best {
                Some(b) if b.proxy >= c.proxy => Some(b),
                _ => Some(c),
            });

        let Some(split) = best else {
            return TreeNode::Leaf {
                value: moments.mean(),
                n_samples,
            };
        };

        let column = &columns[split.feature];
        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices.iter().partition(|&&i| {
            let v = column[i];
            if v.is_nan() {
                split.missing_left
            } else {
                v <= split.threshold
            }
        });

        let left_m = Moments::of(y, &left_idx);
        let right_m = Moments::of(y, &right_idx);
        importances[split.feature] += moments.n * impurity
            - left_m.n * left_m.impurity()
            - right_m.n * right_m.impurity();

        let left = self.build(columns, y, &left_idx, depth + 1, rng, importances);
        let right = self.build(columns, y, &right_idx, depth + 1, rng, importances);

        TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            missing_left: split.missing_left,
            left: Box::new(left),
            right: Box::new(right),
            n_samples,
            impurity,
        }
    }
}

/// Scan sorted values of one feature for the threshold with the lowest child SSE.
///
/// NaN rows are tried on both sides; when the node has none, they are routed
/// to the larger child at prediction time.
fn best_split_for_feature(
    feature: usize,
    column: &[f64],
    y: &[f64],
    indices: &[usize],
    min_leaf: usize,
) -> Option<SplitCandidate> {
    let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(indices.len());
    let mut missing = Moments::default();
    for &i in indices {
        let v = column[i];
        if v.is_nan() {
            missing = missing.push(y[i]);
        } else {
            pairs.push((v, y[i]));
        }
    }
    if pairs.is_empty() {
        return None;
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let n_missing = missing.n as usize;
    let n_total = (pairs.len() + n_missing) as f64;
    let sum_total: f64 = pairs.iter().map(|p| p.1).sum::<f64>() + missing.sum;

    let first = pairs[0].0;
    let last = pairs[pairs.len() - 1].0;
    if last <= first + FEATURE_THRESHOLD && n_missing == 0 {
        return None;
    }

    let mut best: Option<SplitCandidate> = None;
    let mut consider = |n_left: usize, sum_left: f64, threshold: f64, missing_left: bool| {
        let n_right = n_total as usize - n_left;
        if n_left < min_leaf || n_right < min_leaf {
            return;
        }
        let sum_right = sum_total - sum_left;
        let proxy = sum_left * sum_left / n_left as f64 + sum_right * sum_right / n_right as f64;
        if best.map_or(true, |b| proxy > b.proxy) {
            best = Some(SplitCandidate {
                feature,
                threshold,
                missing_left,
                proxy,
            });
        }
    };

    let mut sum_left = 0.0;
    for p in 0..pairs.len() - 1 {
        sum_left += pairs[p].1;
        let (lo, hi) = (pairs[p].0, pairs[p + 1].0);
        if hi <= lo + FEATURE_THRESHOLD {
            continue;
        }
        let mut threshold = lo / 2.0 + hi / 2.0;
        if threshold == hi || threshold.is_infinite() {
            threshold = lo;
        }

        let n_left = p + 1;
        if n_missing > 0 {
            consider(n_left, sum_left, threshold, false);
            consider(n_left + n_missing, sum_left + missing.sum, threshold, true);
        } else {
            // No NaN seen here: unseen NaN go to the larger child
            consider(n_left, sum_left, threshold, n_left * 2 >= indices.len());
        }
    }

    if n_missing > 0 {
        // Every observed value left, missing right
        consider(pairs.len(), sum_total - missing.sum, f64::INFINITY, false);
    }

    best
}

impl Regressor for DecisionTreeRegressor {
    fn fit(&mut self, x: &Mat<f64>, y: &[f64]) -> Result<()> {
        check_fit_input(x, y)?;
        if self.config.min_samples_leaf == 0 || self.config.min_samples_split < 2 {
            return Err(AnalysisError::invalid(
                "min_samples",
                "min_samples_leaf must be >= 1 and min_samples_split >= 2",
            )
            .into());
        }

        let n_features = x.ncols();
        let columns: Vec<Vec<f64>> = (0..n_features)
            .map(|j| (0..x.nrows()).map(|i| x[(i, j)]).collect())
            .collect();

        let mut rng = StdRng::seed_from_u64(self.config.random_state);
        let mut importances = vec![0.0; n_features];
        let indices: Vec<usize> = (0..x.nrows()).collect();

        let root = self.build(&columns, y, &indices, 0, &mut rng, &mut importances);

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }

        tracing::debug!(
            depth = root.depth(),
            leaves = root.n_leaves(),
            "decision tree fitted"
        );

        self.root = Some(root);
        self.n_features = n_features;
        self.feature_importances = importances;
        Ok(())
    }

    fn predict(&self, x: &Mat<f64>) -> Result<Vec<f64>> {
        let root = self
            .root
            .as_ref()
            .ok_or(AnalysisError::NotFitted("DecisionTreeRegressor"))?;
        check_predict_input(x, self.n_features)?;

        Ok((0..x.nrows())
            .into_par_iter()
            .map(|i| root.predict_row(x, i))
            .collect())
    }

    fn name(&self) -> &str {
        "Decision tree"
    }
}
