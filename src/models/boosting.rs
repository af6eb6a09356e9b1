//! Histogram-based gradient boosting for squared-error regression
//!
//! Features are quantile-binned into at most 255 codes (plus one for NaN), then
//! each iteration fits a least-squares tree to the residuals. Trees grow leaf-wise,
//! best gain first, with histogram subtraction for the larger child.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use anyhow::Result;
use faer::Mat;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::Serialize;

use crate::error::AnalysisError;
use crate::models::binning::{BinMapper, BinnedColumns, MAX_NON_MISSING_BINS, MISSING_BIN};
use crate::models::{check_fit_input, check_predict_input, Regressor};
use crate::pipeline::split::split_indices;

/// Early stopping switches on automatically above this many samples
const AUTO_EARLY_STOPPING_MIN_SAMPLES: usize = 10_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum EarlyStopping {
    /// Enabled when the training set has more than 10 000 rows
    #[default]
    Auto,
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistGradientBoostingConfig {
    pub learning_rate: f64,
    pub max_iter: usize,
    pub max_depth: Option<usize>,
    pub max_leaf_nodes: Option<usize>,
    pub min_samples_leaf: usize,
    pub l2_regularization: f64,
    pub max_bins: usize,
    pub early_stopping: EarlyStopping,
    pub validation_fraction: f64,
    pub n_iter_no_change: usize,
    pub tol: f64,
    pub random_state: u64,
}

impl Default for HistGradientBoostingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            max_iter: 1000,
            max_depth: Some(10),
            max_leaf_nodes: Some(31),
            min_samples_leaf: 20,
            l2_regularization: 0.0,
            max_bins: MAX_NON_MISSING_BINS,
            early_stopping: EarlyStopping::Auto,
            validation_fraction: 0.1,
            n_iter_no_change: 10,
            tol: 1e-7,
            random_state: 123,
        }
    }
}

impl HistGradientBoostingConfig {
    fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0) {
            return Err(AnalysisError::invalid("learning_rate", "must be > 0").into());
        }
        if self.max_iter == 0 {
            return Err(AnalysisError::invalid("max_iter", "must be >= 1").into());
        }
        if self.max_leaf_nodes.is_some_and(|m| m < 2) {
            return Err(AnalysisError::invalid("max_leaf_nodes", "must be >= 2").into());
        }
        if self.min_samples_leaf == 0 {
            return Err(AnalysisError::invalid("min_samples_leaf", "must be >= 1").into());
        }
        if !(self.l2_regularization >= 0.0) {
            return Err(AnalysisError::invalid("l2_regularization", "must be >= 0").into());
        }
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(AnalysisError::invalid("validation_fraction", "must be in (0, 1)").into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
enum PredictorNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        missing_left: bool,
        left: usize,
        right: usize,
    },
}

/// One fitted tree, stored as a flat node array rooted at index 0
#[derive(Debug, Clone, Serialize)]
pub struct BoostedTree {
    nodes: Vec<PredictorNode>,
}

impl BoostedTree {
    fn predict_row(&self, x: &Mat<f64>, row: usize) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                PredictorNode::Leaf { value } => return *value,
                PredictorNode::Split {
                    feature,
                    threshold,
                    missing_left,
                    left,
                    right,
                } => {
                    let v = x[(row, *feature)];
                    let go_left = if v.is_nan() { *missing_left } else { v <= *threshold };
                    id = if go_left { *left } else { *right };
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct HistBin {
    sum_gradients: f64,
    count: usize,
}

impl HistBin {
    fn add(self, other: HistBin) -> HistBin {
        HistBin {
            sum_gradients: self.sum_gradients + other.sum_gradients,
            count: self.count + other.count,
        }
    }

    fn sub(self, other: HistBin) -> HistBin {
        HistBin {
            sum_gradients: self.sum_gradients - other.sum_gradients,
            count: self.count - other.count,
        }
    }
}

/// Per feature: observed-value bins followed by one missing-value bin
type Histograms = Vec<Vec<HistBin>>;

#[derive(Debug, Clone, Copy)]
struct SplitInfo {
    feature: usize,
    bin: u8,
    missing_left: bool,
    gain: f64,
}

struct GrowState {
    /// Positions into the binned training rows
    samples: Vec<usize>,
    depth: usize,
    sum_gradients: f64,
    histograms: Histograms,
    split: Option<SplitInfo>,
}

#[derive(Debug, PartialEq)]
struct SplitCandidate {
    gain: f64,
    node: usize,
}

impl Eq for SplitCandidate {}

impl Ord for SplitCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap on gain; earlier nodes first on ties
        self.gain
            .total_cmp(&other.gain)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for SplitCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct TreeGrower<'a> {
    binned: &'a BinnedColumns,
    mapper: &'a BinMapper,
    gradients: &'a [f64],
    config: &'a HistGradientBoostingConfig,
}

impl<'a> TreeGrower<'a> {
    fn build_histograms(&self, samples: &[usize]) -> Histograms {
        (0..self.binned.codes.len())
            .into_par_iter()
            .map(|f| {
                let n_bins = self.mapper.n_bins_non_missing(f);
                let codes = &self.binned.codes[f];
                let mut hist = vec![HistBin::default(); n_bins + 1];
                for &i in samples {
                    let code = codes[i];
                    let slot = if code == MISSING_BIN { n_bins } else { code as usize };
                    hist[slot].sum_gradients += self.gradients[i];
                    hist[slot].count += 1;
                }
                hist
            })
            .collect()
    }

    fn split_gain(&self, left: HistBin, right: HistBin, parent: HistBin) -> f64 {
        let l2 = self.config.l2_regularization;
        let score = |h: HistBin| h.sum_gradients * h.sum_gradients / (h.count as f64 + l2);
        score(left) + score(right) - score(parent)
    }

    fn best_split_on_feature(&self, feature: usize, hist: &[HistBin], total: HistBin) -> Option<SplitInfo> {
        let n_bins = self.mapper.n_bins_non_missing(feature);
        let missing = hist[n_bins];
        let min_leaf = self.config.min_samples_leaf;

        let mut best: Option<SplitInfo> = None;
        let mut consider = |left: HistBin, bin: usize, missing_left: bool| {
            let right = total.sub(left);
            if left.count < min_leaf || right.count < min_leaf {
                return;
            }
            let gain = self.split_gain(left, right, total);
            if gain > 0.0 && best.map_or(true, |b| gain > b.gain) {
                best = Some(SplitInfo {
                    feature,
                    bin: bin as u8,
                    missing_left,
                    gain,
                });
            }
        };

        let mut left = HistBin::default();
        for bin in 0..n_bins.saturating_sub(1) {
            left = left.add(hist[bin]);
            if missing.count > 0 {
                consider(left, bin, false);
                consider(left.add(missing), bin, true);
            } else {
                // No NaN seen here: unseen NaN go to the larger child
                consider(left, bin, left.count * 2 >= total.count);
            }
        }
        if missing.count > 0 {
            // Observed values left, missing values alone on the right
            consider(total.sub(missing), n_bins - 1, false);
        }

        best
    }

    fn find_best_split(&self, state: &GrowState) -> Option<SplitInfo> {
        let total = HistBin {
            sum_gradients: state.sum_gradients,
            count: state.samples.len(),
        };
        let per_feature: Vec<Option<SplitInfo>> = state
            .histograms
            .par_iter()
            .enumerate()
            .map(|(f, hist)| self.best_split_on_feature(f, hist, total))
            .collect();

        per_feature
            .into_iter()
            .flatten()
            .fold(None, |best: Option<SplitInfo>, s| match best {
                Some(b) if b.gain >= s.gain => Some(b),
                _ => Some(s),
            })
    }

    fn schedule(&self, node: usize, state: &mut GrowState, heap: &mut BinaryHeap<SplitCandidate>) {
        if self.config.max_depth.is_some_and(|d| state.depth >= d) {
            return;
        }
        if state.samples.len() < 2 * self.config.min_samples_leaf {
            return;
        }
        if let Some(split) = self.find_best_split(state) {
            heap.push(SplitCandidate {
                gain: split.gain,
                node,
            });
            state.split = Some(split);
        }
    }

    fn leaf_value(&self, sum_gradients: f64, count: usize) -> f64 {
        -self.config.learning_rate * sum_gradients / (count as f64 + self.config.l2_regularization)
    }

    /// Grow one tree; also returns each leaf's samples with its value.
    fn grow(&self) -> (BoostedTree, Vec<(Vec<usize>, f64)>) {
        let samples: Vec<usize> = (0..self.binned.n_rows).collect();
        let histograms = self.build_histograms(&samples);
        let mut root = GrowState {
            sum_gradients: self.gradients.iter().sum(),
            samples,
            depth: 0,
            histograms,
            split: None,
        };

        let mut heap = BinaryHeap::new();
        self.schedule(0, &mut root, &mut heap);

        let mut nodes = vec![PredictorNode::Leaf { value: 0.0 }];
        let mut states: Vec<Option<GrowState>> = vec![Some(root)];
        let mut n_leaves = 1;

        while let Some(candidate) = heap.pop() {
            if self.config.max_leaf_nodes.is_some_and(|m| n_leaves >= m) {
                break;
            }
            let Some(parent) = states[candidate.node].take() else {
                continue;
            };
            let Some(split) = parent.split else {
                states[candidate.node] = Some(parent);
                continue;
            };

            let codes = &self.binned.codes[split.feature];
            let (left_samples, right_samples): (Vec<usize>, Vec<usize>) =
                parent.samples.iter().partition(|&&i| {
                    let code = codes[i];
                    if code == MISSING_BIN {
                        split.missing_left
                    } else {
                        code <= split.bin
                    }
                });

            let left_is_smaller = left_samples.len() <= right_samples.len();
            let small_hist = self.build_histograms(if left_is_smaller {
                &left_samples
            } else {
                &right_samples
            });
            let large_hist: Histograms = parent
                .histograms
                .iter()
                .zip(&small_hist)
                .map(|(p, s)| p.iter().zip(s).map(|(&pb, &sb)| pb.sub(sb)).collect())
                .collect();
            let (left_hist, right_hist) = if left_is_smaller {
                (small_hist, large_hist)
            } else {
                (large_hist, small_hist)
            };

            let sum_of = |samples: &[usize]| samples.iter().map(|&i| self.gradients[i]).sum::<f64>();
            let mut left = GrowState {
                sum_gradients: sum_of(&left_samples),
                samples: left_samples,
                depth: parent.depth + 1,
                histograms: left_hist,
                split: None,
            };
            let mut right = GrowState {
                sum_gradients: sum_of(&right_samples),
                samples: right_samples,
                depth: parent.depth + 1,
                histograms: right_hist,
                split: None,
            };

            let left_id = nodes.len();
            let right_id = left_id + 1;
            nodes[candidate.node] = PredictorNode::Split {
                feature: split.feature,
                threshold: self.mapper.bin_upper_bound(split.feature, split.bin),
                missing_left: split.missing_left,
                left: left_id,
                right: right_id,
            };
            nodes.push(PredictorNode::Leaf { value: 0.0 });
            nodes.push(PredictorNode::Leaf { value: 0.0 });
            n_leaves += 1;

            self.schedule(left_id, &mut left, &mut heap);
            self.schedule(right_id, &mut right, &mut heap);
            states.push(Some(left));
            states.push(Some(right));
        }

        let mut leaves = Vec::with_capacity(n_leaves);
        for (id, state) in states.into_iter().enumerate() {
            if let Some(state) = state {
                let value = self.leaf_value(state.sum_gradients, state.samples.len());
                nodes[id] = PredictorNode::Leaf { value };
                leaves.push((state.samples, value));
            }
        }

        (BoostedTree { nodes }, leaves)
    }
}

/// Mean of `0.5 * (y - raw)^2`
fn half_squared_error(y: &[f64], raw: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    y.iter().zip(raw).map(|(t, p)| 0.5 * (t - p).powi(2)).sum::<f64>() / y.len() as f64
}

/// True when none of the last `n_iter_no_change` scores beat the one before them by `tol`.
fn should_stop(scores: &[f64], n_iter_no_change: usize, tol: f64) -> bool {
    let reference_position = n_iter_no_change + 1;
    if scores.len() < reference_position {
        return false;
    }
    let reference = scores[scores.len() - reference_position] + tol;
    !scores[scores.len() - reference_position + 1..]
        .iter()
        .any(|&s| s > reference)
}

#[derive(Debug, Clone)]
pub struct HistGradientBoostingRegressor {
    pub config: HistGradientBoostingConfig,
    baseline: f64,
    trees: Vec<BoostedTree>,
    n_features: usize,
    train_scores: Vec<f64>,
    validation_scores: Vec<f64>,
    fitted: bool,
}

impl HistGradientBoostingRegressor {
    pub fn new(config: HistGradientBoostingConfig) -> Self {
        Self {
            config,
            baseline: 0.0,
            trees: Vec::new(),
            n_features: 0,
            train_scores: Vec::new(),
            validation_scores: Vec::new(),
            fitted: false,
        }
    }

    /// Boosting iterations actually run
    pub fn n_iter(&self) -> usize {
        self.trees.len()
    }

    /// Negative half squared error on the training rows, baseline first
    pub fn train_scores(&self) -> &[f64] {
        &self.train_scores
    }

    /// Same on the held-out rows; empty without early stopping
    pub fn validation_scores(&self) -> &[f64] {
        &self.validation_scores
    }

    fn uses_early_stopping(&self, n_samples: usize) -> bool {
        match self.config.early_stopping {
            EarlyStopping::Auto => n_samples > AUTO_EARLY_STOPPING_MIN_SAMPLES,
            EarlyStopping::Enabled => true,
            EarlyStopping::Disabled => false,
        }
    }
}

impl Regressor for HistGradientBoostingRegressor {
    fn fit(&mut self, x: &Mat<f64>, y: &[f64]) -> Result<()> {
        check_fit_input(x, y)?;
        self.config.validate()?;

        let n = x.nrows();
        let early_stopping = self.uses_early_stopping(n);
        let (train_rows, val_rows) = if early_stopping {
            let split = split_indices(n, self.config.validation_fraction, self.config.random_state)?;
            (split.train, split.test)
        } else {
            ((0..n).collect(), Vec::new())
        };

        let mut rng = StdRng::seed_from_u64(self.config.random_state);
        let mut mapper = BinMapper::new(self.config.max_bins)?;
        mapper.fit(x, &train_rows, &mut rng)?;
        let binned = mapper.transform(x, &train_rows)?;

        let y_train: Vec<f64> = train_rows.iter().map(|&i| y[i]).collect();
        let y_val: Vec<f64> = val_rows.iter().map(|&i| y[i]).collect();

        let baseline = y_train.iter().sum::<f64>() / y_train.len() as f64;
        let mut raw = vec![baseline; y_train.len()];
        let mut raw_val = vec![baseline; y_val.len()];

        let mut trees = Vec::new();
        let mut train_scores = vec![-half_squared_error(&y_train, &raw)];
        let mut validation_scores = Vec::new();
        if early_stopping {
            validation_scores.push(-half_squared_error(&y_val, &raw_val));
        }

        for iteration in 0..self.config.max_iter {
            let gradients: Vec<f64> = raw.iter().zip(&y_train).map(|(p, t)| p - t).collect();

            let grower = TreeGrower {
                binned: &binned,
                mapper: &mapper,
                gradients: &gradients,
                config: &self.config,
            };
            let (tree, leaves) = grower.grow();

            for (samples, value) in &leaves {
                for &i in samples {
                    raw[i] += value;
                }
            }
            train_scores.push(-half_squared_error(&y_train, &raw));

            if early_stopping {
                raw_val
                    .par_iter_mut()
                    .zip(val_rows.par_iter())
                    .for_each(|(r, &row)| *r += tree.predict_row(x, row));
                validation_scores.push(-half_squared_error(&y_val, &raw_val));
            }
            trees.push(tree);

            if iteration % 100 == 0 {
                tracing::debug!(
                    iteration,
                    train_loss = -train_scores[train_scores.len() - 1],
                    "boosting progress"
                );
            }

            if early_stopping
                && should_stop(&validation_scores, self.config.n_iter_no_change, self.config.tol)
            {
                tracing::debug!(iterations = trees.len(), "early stopping triggered");
                break;
            }
        }

        self.baseline = baseline;
        self.trees = trees;
        self.n_features = x.ncols();
        self.train_scores = train_scores;
        self.validation_scores = validation_scores;
        self.fitted = true;
        Ok(())
    }

    fn predict(&self, x: &Mat<f64>) -> Result<Vec<f64>> {
        if !self.fitted {
            return Err(AnalysisError::NotFitted("HistGradientBoostingRegressor").into());
        }
        check_predict_input(x, self.n_features)?;

        Ok((0..x.nrows())
            .into_par_iter()
            .map(|i| self.baseline + self.trees.iter().map(|t| t.predict_row(x, i)).sum::<f64>())
            .collect())
    }

    fn name(&self) -> &str {
        "Histogram gradient boosting"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::metrics::r2_score;

    fn small_config() -> HistGradientBoostingConfig {
        HistGradientBoostingConfig {
            max_iter: 100,
            min_samples_leaf: 5,
            early_stopping: EarlyStopping::Disabled,
            ..Default::default()
        }
    }

    #[test]
    fn test_should_stop_rule() {
        assert!(!should_stop(&[0.0, 0.0], 2, 1e-7));
        assert!(should_stop(&[0.0, 0.0, 0.0], 2, 1e-7));
        assert!(!should_stop(&[0.0, 0.0, 1.0], 2, 1e-7));
    }

    #[test]
    fn test_fits_linear_signal() {
        let x = Mat::from_fn(200, 1, |i, _| i as f64);
        let y: Vec<f64> = (0..200).map(|i| 2.0 * i as f64).collect();
        let mut model = HistGradientBoostingRegressor::new(small_config());
        model.fit(&x, &y).unwrap();

        let pred = model.predict(&x).unwrap();
        assert!(r2_score(&y, &pred).unwrap() > 0.95);
        assert_eq!(model.n_iter(), 100);
    }

    #[test]
    fn test_missing_values_learn_their_own_branch() {
        let x = Mat::from_fn(100, 1, |i, _| if i < 50 { i as f64 } else { f64::NAN });
        let y: Vec<f64> = (0..100).map(|i| if i < 50 { 0.0 } else { 10.0 }).collect();
        let mut model = HistGradientBoostingRegressor::new(HistGradientBoostingConfig {
            max_iter: 50,
            ..small_config()
        });
        model.fit(&x, &y).unwrap();

        let query = Mat::from_fn(2, 1, |i, _| if i == 0 { 3.0 } else { f64::NAN });
        let pred = model.predict(&query).unwrap();
        assert!(pred[0].abs() < 0.5, "observed row predicted {}", pred[0]);
        assert!((pred[1] - 10.0).abs() < 0.5, "missing row predicted {}", pred[1]);
    }

    #[test]
    fn test_unseen_missing_values_follow_larger_child() {
        // 80 rows at 0 (left of the only split), 20 rows at 1
        let x = Mat::from_fn(100, 1, |i, _| if i < 80 { 0.0 } else { 1.0 });
        let y: Vec<f64> = (0..100).map(|i| if i < 80 { 0.0 } else { 10.0 }).collect();
        let mut model = HistGradientBoostingRegressor::new(HistGradientBoostingConfig {
            max_iter: 50,
            ..small_config()
        });
        model.fit(&x, &y).unwrap();

        let rows = Mat::from_fn(2, 1, |i, _| if i == 0 { 0.0 } else { f64::NAN });
        let pred = model.predict(&rows).unwrap();
        assert!((pred[1] - pred[0]).abs() < 1e-12, "NaN row predicted {}", pred[1]);
        assert!(pred[1].abs() < 0.5);
    }

    #[test]
    fn test_training_loss_never_increases() {
        let x = Mat::from_fn(200, 1, |i, _| i as f64);
        let y: Vec<f64> = (0..200).map(|i| (i as f64 / 20.0).sin()).collect();
        let mut model = HistGradientBoostingRegressor::new(HistGradientBoostingConfig {
            max_iter: 25,
            ..small_config()
        });
        model.fit(&x, &y).unwrap();

        let scores = model.train_scores();
        assert_eq!(scores.len(), model.n_iter() + 1);
        assert!(scores.windows(2).all(|w| w[1] >= w[0] - 1e-12));
        assert!(model.validation_scores().is_empty());
    }

    #[test]
    fn test_early_stopping_on_flat_target() {
        let x = Mat::from_fn(200, 2, |i, j| (i * (j + 1)) as f64);
        let y = vec![5.0; 200];
        let mut model = HistGradientBoostingRegressor::new(HistGradientBoostingConfig {
            early_stopping: EarlyStopping::Enabled,
            ..small_config()
        });
        model.fit(&x, &y).unwrap();
        assert_eq!(model.n_iter(), 10);
        assert_eq!(model.validation_scores().len(), 11);
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let x = Mat::from_fn(300, 3, |i, j| ((i * 7 + j * 13) % 17) as f64);
        let y: Vec<f64> = (0..300).map(|i| (i % 11) as f64).collect();
        let config = HistGradientBoostingConfig {
            max_iter: 20,
            ..small_config()
        };

        let mut a = HistGradientBoostingRegressor::new(config.clone());
        let mut b = HistGradientBoostingRegressor::new(config);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }
}
