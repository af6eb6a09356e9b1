//! t-distributed stochastic neighbour embedding
//!
//! Input affinities come from the k nearest neighbours of each point, calibrated
//! per point to a target perplexity and symmetrised. The low-dimensional kernel
//! is a Student-t with one degree of freedom; attraction runs over the sparse
//! neighbour graph while repulsion is computed exactly over all pairs.

use anyhow::Result;
use faer::Mat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;

use crate::error::AnalysisError;

/// Iterations with exaggerated affinities and low momentum
const EXPLORATION_N_ITER: usize = 250;
const N_ITER_CHECK: usize = 50;
const BINARY_SEARCH_STEPS: usize = 100;
const PERPLEXITY_TOLERANCE: f64 = 1e-5;
const MIN_GAIN: f64 = 0.01;
const MACHINE_EPSILON: f64 = f64::EPSILON;
/// Rows per Gram block when searching neighbours
const DISTANCE_BLOCK_ROWS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TsneInit {
    /// Leading principal components, rescaled to a tiny spread
    Pca,
    /// Small seeded Gaussian noise
    Random,
}

#[derive(Debug, Clone, Serialize)]
pub struct TsneConfig {
    pub n_components: usize,
    pub perplexity: f64,
    pub early_exaggeration: f64,
    /// `None` picks `max(n / early_exaggeration / 4, 50)`
    pub learning_rate: Option<f64>,
    pub max_iter: usize,
    pub n_iter_without_progress: usize,
    pub min_grad_norm: f64,
    pub init: TsneInit,
    pub random_state: u64,
}

impl Default for TsneConfig {
    fn default() -> Self {
        Self {
            n_components: 2,
            perplexity: 30.0,
            early_exaggeration: 12.0,
            learning_rate: None,
            max_iter: 1000,
            n_iter_without_progress: 300,
            min_grad_norm: 1e-7,
            init: TsneInit::Pca,
            random_state: 123,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TsneResult {
    /// `n_samples x n_components`
    pub embedding: Mat<f64>,
    pub kl_divergence: f64,
    pub n_iter: usize,
}

/// Symmetric sparse joint probabilities, one sorted neighbour list per point
#[derive(Debug, Clone)]
struct Affinities {
    rows: Vec<Vec<(usize, f64)>>,
}

#[derive(Debug, Clone)]
pub struct Tsne {
    pub config: TsneConfig,
}

impl Tsne {
    pub fn new(config: TsneConfig) -> Self {
        Self { config }
    }

    fn validate(&self, n_samples: usize) -> Result<()> {
        let c = &self.config;
        if c.n_components == 0 {
            return Err(AnalysisError::invalid("n_components", "must be >= 1").into());
        }
        if !(c.perplexity > 0.0) {
            return Err(AnalysisError::invalid("perplexity", "must be > 0").into());
        }
        if c.perplexity >= n_samples as f64 {
            return Err(AnalysisError::invalid(
                "perplexity",
                format!("must be less than n_samples ({}), got {}", n_samples, c.perplexity),
            )
            .into());
        }
        if c.max_iter < EXPLORATION_N_ITER {
            return Err(AnalysisError::invalid(
                "max_iter",
                format!("must be at least {}, got {}", EXPLORATION_N_ITER, c.max_iter),
            )
            .into());
        }
        if !(c.early_exaggeration >= 1.0) {
            return Err(AnalysisError::invalid("early_exaggeration", "must be >= 1").into());
        }
        if c.learning_rate.is_some_and(|lr| !(lr > 0.0)) {
            return Err(AnalysisError::invalid("learning_rate", "must be > 0").into());
        }
        Ok(())
    }

    pub fn fit_transform(&self, x: &Mat<f64>) -> Result<TsneResult> {
        let n = x.nrows();
        self.validate(n)?;
        if (0..x.ncols()).any(|j| (0..n).any(|i| !x[(i, j)].is_finite())) {
            return Err(AnalysisError::invalid("x", "t-SNE input must be finite").into());
        }

        let k = (n - 1).min((3.0 * self.config.perplexity + 1.0) as usize);
        tracing::debug!(n_samples = n, neighbors = k, "computing t-SNE affinities");

        let neighbors = nearest_neighbors(x, k);
        let conditional = conditional_probabilities(&neighbors, self.config.perplexity);
        let affinities = symmetrize(&neighbors, &conditional);

        let mut rng = StdRng::seed_from_u64(self.config.random_state);
        let init = match self.config.init {
            TsneInit::Pca => pca_init(x, self.config.n_components, &mut rng)
                .unwrap_or_else(|| random_init(n, self.config.n_components, &mut rng)),
            TsneInit::Random => random_init(n, self.config.n_components, &mut rng),
        };

        let learning_rate = self
            .config
            .learning_rate
            .unwrap_or_else(|| (n as f64 / self.config.early_exaggeration / 4.0).max(50.0));

        let mut opt = Optimizer {
            dims: self.config.n_components,
            params: init,
            update: vec![0.0; n * self.config.n_components],
            gains: vec![1.0; n * self.config.n_components],
            learning_rate,
            min_grad_norm: self.config.min_grad_norm,
        };

        let (_, last) = opt.descend(
            &affinities,
            self.config.early_exaggeration,
            0,
            EXPLORATION_N_ITER,
            0.5,
            EXPLORATION_N_ITER,
        );
        tracing::debug!(iteration = last, "early exaggeration finished");

        let (kl_divergence, last) = opt.descend(
            &affinities,
            1.0,
            last + 1,
            self.config.max_iter,
            0.8,
            self.config.n_iter_without_progress,
        );
        tracing::debug!(iteration = last, kl_divergence, "t-SNE optimisation finished");

        let dims = self.config.n_components;
        let embedding = Mat::from_fn(n, dims, |i, d| opt.params[i * dims + d]);

        Ok(TsneResult {
            embedding,
            kl_divergence,
            n_iter: last + 1,
        })
    }
}

/// Squared Euclidean k nearest neighbours of every row, closest first.
fn nearest_neighbors(x: &Mat<f64>, k: usize) -> Vec<Vec<(usize, f64)>> {
    let n = x.nrows();
    let d = x.ncols();
    let sq_norms: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|i| (0..d).map(|j| x[(i, j)] * x[(i, j)]).sum())
        .collect();

    let mut result = Vec::with_capacity(n);
    let mut start = 0;
    while start < n {
        let len = DISTANCE_BLOCK_ROWS.min(n - start);
        let block = Mat::from_fn(len, d, |r, c| x[(start + r, c)]);
        let gram = block.as_ref() * x.transpose();

        let rows: Vec<Vec<(usize, f64)>> = (0..len)
            .into_par_iter()
            .map(|r| {
                let i = start + r;
                let mut candidates: Vec<(usize, f64)> = (0..n)
                    .filter(|&j| j != i)
                    .map(|j| (j, (sq_norms[i] + sq_norms[j] - 2.0 * gram[(r, j)]).max(0.0)))
                    .collect();
                let by_distance = |a: &(usize, f64), b: &(usize, f64)| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0));
                if k < candidates.len() {
                    candidates.select_nth_unstable_by(k - 1, by_distance);
                    candidates.truncate(k);
                }
                candidates.sort_by(by_distance);
                candidates
            })
            .collect();

        result.extend(rows);
        start += len;
    }
    result
}

/// Per-point Gaussian bandwidth search so each conditional distribution has the target perplexity.
fn conditional_probabilities(neighbors: &[Vec<(usize, f64)>], perplexity: f64) -> Vec<Vec<f64>> {
    let desired_entropy = perplexity.ln();

    neighbors
        .par_iter()
        .map(|row| {
            let mut beta = 1.0;
            let mut beta_min = f64::NEG_INFINITY;
            let mut beta_max = f64::INFINITY;
            let mut p = vec![0.0; row.len()];

            for _ in 0..BINARY_SEARCH_STEPS {
                for (pj, &(_, dist)) in p.iter_mut().zip(row) {
                    *pj = (-dist * beta).exp();
                }
                let mut sum_p: f64 = p.iter().sum();
                if sum_p == 0.0 {
                    sum_p = MACHINE_EPSILON;
                }
                let mut sum_dist_p = 0.0;
                for (pj, &(_, dist)) in p.iter_mut().zip(row) {
                    *pj /= sum_p;
                    sum_dist_p += dist * *pj;
                }

                let entropy = sum_p.ln() + beta * sum_dist_p;
                let diff = entropy - desired_entropy;
                if diff.abs() <= PERPLEXITY_TOLERANCE {
                    break;
                }

                if diff > 0.0 {
                    beta_min = beta;
                    beta = if beta_max == f64::INFINITY { beta * 2.0 } else { (beta + beta_max) / 2.0 };
                } else {
                    beta_max = beta;
                    beta = if beta_min == f64::NEG_INFINITY { beta / 2.0 } else { (beta + beta_min) / 2.0 };
                }
            }
            p
        })
        .collect()
}

/// `P = (C + C^T) / sum`, stored as sorted symmetric adjacency lists.
fn symmetrize(neighbors: &[Vec<(usize, f64)>], conditional: &[Vec<f64>]) -> Affinities {
    let n = neighbors.len();
    let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    for (i, (row, probs)) in neighbors.iter().zip(conditional).enumerate() {
        for (&(j, _), &p) in row.iter().zip(probs) {
            rows[i].push((j, p));
            rows[j].push((i, p));
        }
    }

    let mut total = 0.0;
    for row in rows.iter_mut() {
        row.sort_by_key(|&(j, _)| j);
        let mut merged: Vec<(usize, f64)> = Vec::with_capacity(row.len());
        for &(j, p) in row.iter() {
            match merged.last_mut() {
                Some(last) if last.0 == j => last.1 += p,
                _ => merged.push((j, p)),
            }
        }
        total += merged.iter().map(|e| e.1).sum::<f64>();
        *row = merged;
    }

    let total = total.max(MACHINE_EPSILON);
    for row in rows.iter_mut() {
        for entry in row.iter_mut() {
            entry.1 /= total;
        }
    }
    Affinities { rows }
}

/// First `dims` principal component scores, scaled so the first has std 1e-4.
///
/// Returns `None` for data without spread along the leading component.
fn pca_init(x: &Mat<f64>, dims: usize, rng: &mut StdRng) -> Option<Vec<f64>> {
    const POWER_ITERATIONS: usize = 200;
    const POWER_TOLERANCE: f64 = 1e-10;

    let n = x.nrows();
    let d = x.ncols();
    if d == 0 {
        return None;
    }
    let means: Vec<f64> = (0..d)
        .map(|j| (0..n).map(|i| x[(i, j)]).sum::<f64>() / n as f64)
        .collect();
    let centered = Mat::from_fn(n, d, |i, j| x[(i, j)] - means[j]);

    let mut components: Vec<Mat<f64>> = Vec::with_capacity(dims);
    let mut scores: Vec<Vec<f64>> = Vec::with_capacity(dims);

    for _ in 0..dims {
        let mut v = Mat::from_fn(d, 1, |_, _| rng.gen::<f64>() - 0.5);
        orthogonalize(&mut v, &components);
        if !normalize(&mut v) {
            return None;
        }

        for _ in 0..POWER_ITERATIONS {
            let u = centered.as_ref() * &v;
            let mut next = centered.transpose() * &u;
            orthogonalize(&mut next, &components);
            if !normalize(&mut next) {
                return None;
            }
            let change: f64 = (0..d).map(|j| (next[(j, 0)] - v[(j, 0)]).abs()).sum();
            v = next;
            if change < POWER_TOLERANCE {
                break;
            }
        }

        // Deterministic sign: largest loading positive
        let pivot = (0..d)
            .max_by(|&a, &b| v[(a, 0)].abs().total_cmp(&v[(b, 0)].abs()))
            .unwrap_or(0);
        if v[(pivot, 0)] < 0.0 {
            for j in 0..d {
                v[(j, 0)] = -v[(j, 0)];
            }
        }

        let u = centered.as_ref() * &v;
        scores.push((0..n).map(|i| u[(i, 0)]).collect());
        components.push(v);
    }

    let first = &scores[0];
    let mean = first.iter().sum::<f64>() / n as f64;
    let std = (first.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64).sqrt();
    if !(std > 0.0) {
        return None;
    }

    let scale = 1e-4 / std;
    let mut params = vec![0.0; n * dims];
    for (c, comp_scores) in scores.iter().enumerate() {
        for (i, &s) in comp_scores.iter().enumerate() {
            params[i * dims + c] = s * scale;
        }
    }
    Some(params)
}

fn orthogonalize(v: &mut Mat<f64>, basis: &[Mat<f64>]) {
    for b in basis {
        let dot: f64 = (0..v.nrows()).map(|j| v[(j, 0)] * b[(j, 0)]).sum();
        for j in 0..v.nrows() {
            v[(j, 0)] -= dot * b[(j, 0)];
        }
    }
}

fn normalize(v: &mut Mat<f64>) -> bool {
    let norm = (0..v.nrows()).map(|j| v[(j, 0)].powi(2)).sum::<f64>().sqrt();
    if !(norm > MACHINE_EPSILON) {
        return false;
    }
    for j in 0..v.nrows() {
        v[(j, 0)] /= norm;
    }
    true
}

/// Gaussian noise with standard deviation 1e-4
fn random_init(n: usize, dims: usize, rng: &mut StdRng) -> Vec<f64> {
    (0..n * dims)
        .map(|_| {
            // Box-Muller
            let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
            let u2: f64 = rng.gen();
            1e-4 * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
        })
        .collect()
}

struct Optimizer {
    dims: usize,
    params: Vec<f64>,
    update: Vec<f64>,
    gains: Vec<f64>,
    learning_rate: f64,
    min_grad_norm: f64,
}

impl Optimizer {
    /// KL divergence gradient with affinities scaled by `exaggeration`.
    ///
    /// Returns `(kl, gradient)`; the divergence is only evaluated when `with_error` is set.
    fn objective(&self, p: &Affinities, exaggeration: f64, with_error: bool) -> (f64, Vec<f64>) {
        let dims = self.dims;
        let y = &self.params;
        let n = p.rows.len();

        let per_row: Vec<(Vec<f64>, Vec<f64>, f64)> = (0..n)
            .into_par_iter()
            .map(|i| {
                let yi = &y[i * dims..(i + 1) * dims];
                let mut attract = vec![0.0; dims];
                let mut repel = vec![0.0; dims];
                let mut z = 0.0;

                for j in 0..n {
                    if j == i {
                        continue;
                    }
                    let yj = &y[j * dims..(j + 1) * dims];
                    let dist: f64 = yi.iter().zip(yj).map(|(a, b)| (a - b).powi(2)).sum();
                    let q = 1.0 / (1.0 + dist);
                    z += q;
                    for d in 0..dims {
                        repel[d] += q * q * (yi[d] - yj[d]);
                    }
                }

                for &(j, pij) in &p.rows[i] {
                    let yj = &y[j * dims..(j + 1) * dims];
                    let dist: f64 = yi.iter().zip(yj).map(|(a, b)| (a - b).powi(2)).sum();
                    let q = 1.0 / (1.0 + dist);
                    for d in 0..dims {
                        attract[d] += exaggeration * pij * q * (yi[d] - yj[d]);
                    }
                }

                (attract, repel, z)
            })
            .collect();

        let z_total: f64 = per_row.iter().map(|r| r.2).sum::<f64>().max(MACHINE_EPSILON);

        let mut grad = vec![0.0; n * dims];
        for (i, (attract, repel, _)) in per_row.iter().enumerate() {
            for d in 0..dims {
                grad[i * dims + d] = 4.0 * (attract[d] - repel[d] / z_total);
            }
        }

        let kl = if with_error {
            p.rows
                .par_iter()
                .enumerate()
                .map(|(i, row)| {
                    let yi = &y[i * dims..(i + 1) * dims];
                    row.iter()
                        .map(|&(j, pij)| {
                            let yj = &y[j * dims..(j + 1) * dims];
                            let dist: f64 = yi.iter().zip(yj).map(|(a, b)| (a - b).powi(2)).sum();
                            let qij = (1.0 / (1.0 + dist) / z_total).max(MACHINE_EPSILON);
                            let pij = (pij * exaggeration).max(MACHINE_EPSILON);
                            pij * (pij / qij).ln()
                        })
                        .sum::<f64>()
                })
                .sum()
        } else {
            f64::NAN
        };

        (kl, grad)
    }

    /// Momentum gradient descent with per-parameter gains over iterations `start..end`.
    ///
    /// Returns the last evaluated KL divergence and the index of the last iteration run.
    fn descend(
        &mut self,
        p: &Affinities,
        exaggeration: f64,
        start: usize,
        end: usize,
        momentum: f64,
        n_iter_without_progress: usize,
    ) -> (f64, usize) {
        let mut error = f64::NAN;
        let mut best_error = f64::MAX;
        let mut best_iter = start;
        let mut last = start.saturating_sub(1);

        for i in start..end {
            last = i;
            let check = (i + 1) % N_ITER_CHECK == 0;
            let (kl, mut grad) = self.objective(p, exaggeration, check || i + 1 == end);
            if !kl.is_nan() {
                error = kl;
            }
            let grad_norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();

            for ((g, gain), upd) in grad.iter_mut().zip(self.gains.iter_mut()).zip(self.update.iter_mut()) {
                if *upd * *g < 0.0 {
                    *gain += 0.2;
                } else {
                    *gain *= 0.8;
                }
                *gain = gain.max(MIN_GAIN);
                *g *= *gain;
                *upd = momentum * *upd - self.learning_rate * *g;
            }
            for (param, upd) in self.params.iter_mut().zip(&self.update) {
                *param += upd;
            }

            if check {
                tracing::trace!(iteration = i + 1, kl_divergence = kl, grad_norm, "t-SNE check");
                if kl < best_error {
                    best_error = kl;
                    best_iter = i;
                } else if i - best_iter > n_iter_without_progress {
                    tracing::debug!(iteration = i + 1, "no progress, stopping");
                    break;
                }
                if grad_norm <= self.min_grad_norm {
                    tracing::debug!(iteration = i + 1, grad_norm, "gradient norm below threshold");
                    break;
                }
            }
        }

        if error.is_nan() {
            error = self.objective(p, exaggeration, true).0;
        }
        (error, last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two tight clusters far apart
    fn two_clusters(n_per: usize) -> Mat<f64> {
        Mat::from_fn(2 * n_per, 3, |i, j| {
            let offset = if i < n_per { 0.0 } else { 50.0 };
            offset + ((i * 7 + j * 3) % 5) as f64 * 0.1
        })
    }

    #[test]
    fn test_conditional_rows_sum_to_one() {
        let x = two_clusters(10);
        let neighbors = nearest_neighbors(&x, 5);
        let probs = conditional_probabilities(&neighbors, 3.0);
        for row in &probs {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_affinities_are_symmetric_and_normalized() {
        let x = two_clusters(10);
        let neighbors = nearest_neighbors(&x, 5);
        let p = symmetrize(&neighbors, &conditional_probabilities(&neighbors, 3.0));

        let total: f64 = p.rows.iter().flatten().map(|e| e.1).sum();
        assert!((total - 1.0).abs() < 1e-9);
        for (i, row) in p.rows.iter().enumerate() {
            for &(j, pij) in row {
                let back = p.rows[j].iter().find(|e| e.0 == i).map(|e| e.1);
                assert_eq!(back, Some(pij));
            }
        }
    }

    #[test]
    fn test_nearest_neighbors_exclude_self() {
        let x = Mat::from_fn(4, 1, |i, _| (i * i) as f64);
        let nn = nearest_neighbors(&x, 2);
        assert_eq!(nn[0].iter().map(|e| e.0).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(nn[0][0].1, 1.0);
    }

    #[test]
    fn test_perplexity_must_be_below_sample_count() {
        let tsne = Tsne::new(TsneConfig {
            perplexity: 30.0,
            ..Default::default()
        });
        assert!(tsne.fit_transform(&two_clusters(5)).is_err());
    }

    #[test]
    fn test_embedding_separates_clusters_deterministically() {
        let x = two_clusters(15);
        let tsne = Tsne::new(TsneConfig {
            perplexity: 5.0,
            max_iter: 400,
            ..Default::default()
        });
        let a = tsne.fit_transform(&x).unwrap();
        let b = tsne.fit_transform(&x).unwrap();

        assert_eq!(a.embedding.nrows(), 30);
        assert_eq!(a.embedding.ncols(), 2);
        assert!(a.kl_divergence.is_finite());
        for i in 0..30 {
            for d in 0..2 {
                assert_eq!(a.embedding[(i, d)], b.embedding[(i, d)]);
            }
        }

        let centroid = |range: std::ops::Range<usize>| -> Vec<f64> {
            (0..2)
                .map(|d| range.clone().map(|i| a.embedding[(i, d)]).sum::<f64>() / 15.0)
                .collect()
        };
        let c0 = centroid(0..15);
        let c1 = centroid(15..30);
        let between = ((c0[0] - c1[0]).powi(2) + (c0[1] - c1[1]).powi(2)).sqrt();
        let spread = (0..15)
            .map(|i| ((a.embedding[(i, 0)] - c0[0]).powi(2) + (a.embedding[(i, 1)] - c0[1]).powi(2)).sqrt())
            .fold(0.0, f64::max);
        assert!(between > spread, "between {} spread {}", between, spread);
    }
}
