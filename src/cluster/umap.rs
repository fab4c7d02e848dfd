//! Two-dimensional UMAP layout of the corrected embedding
//!
//! Builds the fuzzy k-neighbor graph (per-point bandwidth so that the
//! membership strengths sum to log2(k), fuzzy-union symmetrization), fits the
//! `1 / (1 + a d^2b)` curve to `min_dist`/`spread`, and optimizes the layout
//! by SGD with negative sampling. The layout is for display only; clustering
//! works on the SNN graph.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::neighbors::knn;
use crate::error::{Result, SpatialError};
use crate::rng::RMersenneTwister;

const OUT_DIMS: usize = 2;
const GRADIENT_CLIP: f64 = 4.0;
const INIT_EXTENT: f64 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UmapParams {
    /// Neighborhood size, the point itself included
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub spread: f64,
    pub n_epochs: usize,
    pub learning_rate: f64,
    pub negative_sample_rate: usize,
    pub seed: u32,
}

impl Default for UmapParams {
    fn default() -> Self {
        Self {
            n_neighbors: 30,
            min_dist: 0.3,
            spread: 1.0,
            n_epochs: 200,
            learning_rate: 1.0,
            negative_sample_rate: 5,
            seed: 42,
        }
    }
}

impl UmapParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_neighbors < 2 {
            return Err(SpatialError::parameter("umap.n_neighbors", "must be at least 2"));
        }
        if !(self.spread > 0.0) {
            return Err(SpatialError::parameter("umap.spread", "must be positive"));
        }
        if !(self.min_dist >= 0.0 && self.min_dist <= self.spread) {
            return Err(SpatialError::parameter("umap.min_dist", "must be in [0, spread]"));
        }
        if self.n_epochs == 0 {
            return Err(SpatialError::parameter("umap.n_epochs", "must be at least 1"));
        }
        if !(self.learning_rate > 0.0) {
            return Err(SpatialError::parameter("umap.learning_rate", "must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct UmapEmbedding {
    /// Spots x 2
    pub coords: Array2<f64>,
    pub a: f64,
    pub b: f64,
}

#[derive(Debug, Clone)]
struct Edge {
    head: usize,
    tail: usize,
    weight: f64,
}

pub fn run_umap(data: ArrayView2<f64>, params: &UmapParams) -> Result<UmapEmbedding> {
    params.validate()?;
    let n = data.nrows();
    if params.n_neighbors > n {
        return Err(SpatialError::parameter(
            "umap.n_neighbors",
            format!("{} neighbors requested for {} spots", params.n_neighbors, n),
        ));
    }

    let nn = knn(data, params.n_neighbors, true)?;
    let edges = fuzzy_graph(&nn.indices, &nn.distances, params.n_neighbors);
    let (a, b) = fit_ab(params.min_dist, params.spread);
    log::info!(
        "UMAP: {} spots, {} edges, a = {:.4}, b = {:.4}, {} epochs",
        n,
        edges.len(),
        a,
        b,
        params.n_epochs
    );

    let mut coords = initial_layout(data);
    optimize(&mut coords, &edges, a, b, params);

    Ok(UmapEmbedding { coords, a, b })
}

/// Membership strengths with per-point bandwidth, then fuzzy union
fn fuzzy_graph(indices: &[Vec<usize>], distances: &[Vec<f64>], k: usize) -> Vec<Edge> {
    let n = indices.len();
    let target = (k as f64).log2();
    let mut directed: Vec<std::collections::BTreeMap<usize, f64>> =
        vec![std::collections::BTreeMap::new(); n];

    for i in 0..n {
        let others: Vec<(usize, f64)> = indices[i]
            .iter()
            .zip(distances[i].iter())
            .filter(|(&j, _)| j != i)
            .map(|(&j, &d)| (j, d))
            .collect();
        let rho = others.iter().map(|&(_, d)| d).find(|&d| d > 0.0).unwrap_or(0.0);

        let membership_sum = |sigma: f64| -> f64 {
            others
                .iter()
                .map(|&(_, d)| (-((d - rho).max(0.0)) / sigma).exp())
                .sum()
        };
        let (mut lo, mut hi) = (0.0f64, f64::INFINITY);
        let mut sigma = 1.0;
        for _ in 0..64 {
            let psum = membership_sum(sigma);
            if (psum - target).abs() < 1e-5 {
                break;
            }
            if psum > target {
                hi = sigma;
                sigma = (lo + hi) / 2.0;
            } else {
                lo = sigma;
                sigma = if hi.is_finite() { (lo + hi) / 2.0 } else { sigma * 2.0 };
            }
        }
        let mean_dist = others.iter().map(|&(_, d)| d).sum::<f64>() / others.len().max(1) as f64;
        sigma = sigma.max(1e-3 * mean_dist).max(1e-12);

        for &(j, d) in &others {
            directed[i].insert(j, (-((d - rho).max(0.0)) / sigma).exp());
        }
    }

    let mut edges = Vec::new();
    for i in 0..n {
        for (&j, &w_ij) in &directed[i] {
            let w_ji = directed[j].get(&i).copied().unwrap_or(0.0);
            // visit each pair once
            if w_ji > 0.0 && j < i {
                continue;
            }
            let w = w_ij + w_ji - w_ij * w_ji;
            if w > 0.0 {
                edges.push(Edge { head: i, tail: j, weight: w });
            }
        }
    }
    edges
}

/// Least-squares fit of `1 / (1 + a d^2b)` to the target curve
/// (1 below `min_dist`, exponential decay with `spread` above)
fn fit_ab(min_dist: f64, spread: f64) -> (f64, f64) {
    let xs: Vec<f64> = (0..300).map(|i| i as f64 * 3.0 * spread / 299.0).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&d| if d < min_dist { 1.0 } else { (-(d - min_dist) / spread).exp() })
        .collect();

    let sse = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(ys.iter())
            .map(|(&d, &y)| {
                let f = 1.0 / (1.0 + a * d.powf(2.0 * b));
                (f - y) * (f - y)
            })
            .sum()
    };

    let (mut a, mut b) = (1.0f64, 1.0f64);
    let mut damping = 1e-3;
    let mut current = sse(a, b);
    for _ in 0..200 {
        let (mut jtj00, mut jtj01, mut jtj11, mut jtr0, mut jtr1) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (&d, &y) in xs.iter().zip(ys.iter()) {
            if d <= 0.0 {
                continue;
            }
            let d2b = d.powf(2.0 * b);
            let denom = 1.0 + a * d2b;
            let r = 1.0 / denom - y;
            let da = -d2b / (denom * denom);
            let db = -a * d2b * 2.0 * d.ln() / (denom * denom);
            jtj00 += da * da;
            jtj01 += da * db;
            jtj11 += db * db;
            jtr0 += da * r;
            jtr1 += db * r;
        }

        let mut accepted = false;
        while damping < 1e10 {
            let m00 = jtj00 * (1.0 + damping);
            let m11 = jtj11 * (1.0 + damping);
            let det = m00 * m11 - jtj01 * jtj01;
            if det.abs() < 1e-300 {
                damping *= 10.0;
                continue;
            }
            let step_a = -(m11 * jtr0 - jtj01 * jtr1) / det;
            let step_b = -(m00 * jtr1 - jtj01 * jtr0) / det;
            let (na, nb) = ((a + step_a).max(1e-3), (b + step_b).max(1e-3));
            let candidate = sse(na, nb);
            if candidate < current {
                let change = (na - a).abs() + (nb - b).abs();
                a = na;
                b = nb;
                current = candidate;
                damping = (damping / 10.0).max(1e-12);
                accepted = change > 1e-10;
                break;
            }
            damping *= 10.0;
        }
        if !accepted {
            break;
        }
    }
    (a, b)
}

/// First two input dimensions, rescaled so the largest coordinate is ±10
fn initial_layout(data: ArrayView2<f64>) -> Array2<f64> {
    let n = data.nrows();
    let mut coords = Array2::<f64>::zeros((n, OUT_DIMS));
    for i in 0..n {
        for d in 0..OUT_DIMS.min(data.ncols()) {
            coords[[i, d]] = data[[i, d]];
        }
    }
    let max_abs = coords.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    if max_abs > 0.0 {
        coords.mapv_inplace(|v| v * INIT_EXTENT / max_abs);
    }
    coords
}

fn optimize(coords: &mut Array2<f64>, edges: &[Edge], a: f64, b: f64, params: &UmapParams) {
    let n = coords.nrows();
    let n_epochs = params.n_epochs;
    let max_weight = edges.iter().map(|e| e.weight).fold(0.0f64, f64::max);
    if edges.is_empty() || max_weight <= 0.0 {
        return;
    }

    let epochs_per_sample: Vec<f64> = edges.iter().map(|e| max_weight / e.weight).collect();
    let mut next_sample = epochs_per_sample.clone();
    let neg_rate = params.negative_sample_rate as f64;
    let epochs_per_negative: Vec<f64> = epochs_per_sample
        .iter()
        .map(|&e| if neg_rate > 0.0 { e / neg_rate } else { f64::INFINITY })
        .collect();
    let mut next_negative = epochs_per_negative.clone();
    let mut rng = RMersenneTwister::new(params.seed);

    let clip = |g: f64| g.clamp(-GRADIENT_CLIP, GRADIENT_CLIP);
    for epoch in 1..=n_epochs {
        let e = epoch as f64;
        let alpha = params.learning_rate * (1.0 - (epoch - 1) as f64 / n_epochs as f64);

        for (idx, edge) in edges.iter().enumerate() {
            if next_sample[idx] > e {
                continue;
            }
            let (i, j) = (edge.head, edge.tail);

            let dx = coords[[i, 0]] - coords[[j, 0]];
            let dy = coords[[i, 1]] - coords[[j, 1]];
            let dist_sq = dx * dx + dy * dy;
            if dist_sq > 0.0 {
                let coeff = -2.0 * a * b * dist_sq.powf(b - 1.0) / (1.0 + a * dist_sq.powf(b));
                let (gx, gy) = (clip(coeff * dx), clip(coeff * dy));
                coords[[i, 0]] += alpha * gx;
                coords[[i, 1]] += alpha * gy;
                coords[[j, 0]] -= alpha * gx;
                coords[[j, 1]] -= alpha * gy;
            }
            next_sample[idx] += epochs_per_sample[idx];

            let n_neg = ((e - next_negative[idx]) / epochs_per_negative[idx]).floor() as i64;
            for _ in 0..n_neg.max(0) {
                let k = rng.unif_index(n);
                if k == i {
                    continue;
                }
                let dx = coords[[i, 0]] - coords[[k, 0]];
                let dy = coords[[i, 1]] - coords[[k, 1]];
                let dist_sq = dx * dx + dy * dy;
                let coeff = if dist_sq > 0.0 {
                    2.0 * b / ((0.001 + dist_sq) * (1.0 + a * dist_sq.powf(b)))
                } else {
                    0.0
                };
                let (gx, gy) = if coeff > 0.0 {
                    (clip(coeff * dx), clip(coeff * dy))
                } else {
                    (GRADIENT_CLIP, GRADIENT_CLIP)
                };
                coords[[i, 0]] += alpha * gx;
                coords[[i, 1]] += alpha * gy;
            }
            next_negative[idx] += n_neg.max(0) as f64 * epochs_per_negative[idx];
        }
    }
}
