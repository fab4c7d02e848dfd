//! Harmony integration (Korsunsky et al. 2019)
//!
//! Alternates two steps until the clustering objective stops improving:
//!
//! 1. Soft k-means on the cosine-normalized embedding, with an entropy term
//!    (`sigma`) and a diversity penalty (`theta`) that down-weights cluster
//!    assignments over-represented by one batch. Cells are updated in
//!    random blocks of `block_size * n`.
//! 2. Mixture-of-experts ridge regression: within each cluster the batch
//!    effect is regressed out of the original embedding, weighted by the
//!    cluster responsibilities, with ridge penalty `lambda` on the batch
//!    terms (the intercept is kept).

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use super::{check_batches, BatchCorrector, CorrectedEmbedding};
use crate::error::{Result, SpatialError};
use crate::linalg::solve;
use crate::rng::RMersenneTwister;
use crate::transform::PcaResult;

const KMEANS_ITER: usize = 25;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmonyParams {
    /// Diversity penalty
    pub theta: f64,
    /// Soft-clustering bandwidth
    pub sigma: f64,
    /// Ridge penalty on batch terms
    pub lambda: f64,
    /// Number of clusters; `None` uses min(round(n / 30), 100)
    pub n_clusters: Option<usize>,
    pub max_iter_harmony: usize,
    pub max_iter_cluster: usize,
    pub epsilon_cluster: f64,
    pub epsilon_harmony: f64,
    /// Fraction of cells updated together in one clustering block
    pub block_size: f64,
    pub seed: u32,
}

impl Default for HarmonyParams {
    fn default() -> Self {
        Self {
            theta: 2.0,
            sigma: 0.1,
            lambda: 1.0,
            n_clusters: None,
            max_iter_harmony: 10,
            max_iter_cluster: 20,
            epsilon_cluster: 1e-5,
            epsilon_harmony: 1e-4,
            block_size: 0.05,
            seed: 42,
        }
    }
}

impl HarmonyParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.theta >= 0.0) {
            return Err(SpatialError::parameter("harmony.theta", "must be non-negative"));
        }
        if !(self.sigma > 0.0) {
            return Err(SpatialError::parameter("harmony.sigma", "must be positive"));
        }
        if !(self.lambda > 0.0) {
            return Err(SpatialError::parameter("harmony.lambda", "must be positive"));
        }
        if matches!(self.n_clusters, Some(k) if k < 2) {
            return Err(SpatialError::parameter("harmony.n_clusters", "must be at least 2"));
        }
        if self.max_iter_harmony == 0 || self.max_iter_cluster == 0 {
            return Err(SpatialError::parameter(
                "harmony.max_iter_harmony",
                "iteration limits must be at least 1",
            ));
        }
        if !(self.block_size > 0.0 && self.block_size <= 1.0) {
            return Err(SpatialError::parameter("harmony.block_size", "must be in (0, 1]"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Harmony {
    params: HarmonyParams,
}

impl Harmony {
    pub fn new(params: HarmonyParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &HarmonyParams {
        &self.params
    }
}

impl BatchCorrector for Harmony {
    fn correct(&self, pca: &PcaResult, batches: &[usize]) -> Result<CorrectedEmbedding> {
        check_batches(pca, batches)?;
        self.params.validate()?;

        let mut levels: Vec<usize> = batches.to_vec();
        levels.sort_unstable();
        levels.dedup();
        if levels.len() < 2 {
            log::info!("Single batch present, skipping Harmony");
            return Ok(CorrectedEmbedding {
                embedding: pca.embedding.clone(),
                iterations: 0,
                converged: true,
            });
        }
        let batch: Vec<usize> = batches
            .iter()
            .map(|b| levels.partition_point(|l| l < b))
            .collect();

        let n = batches.len();
        let k = self
            .params
            .n_clusters
            .unwrap_or_else(|| ((n as f64 / 30.0).round() as usize).min(100))
            .max(2)
            .min(n);
        log::info!(
            "Harmony: {} spots, {} batches, {} clusters, {} dims",
            n,
            levels.len(),
            k,
            pca.embedding.ncols()
        );

        let mut state = HarmonyState::new(&pca.embedding, batch, levels.len(), k, &self.params)?;
        let mut converged = false;
        let mut iterations = 0;
        for iter in 1..=self.params.max_iter_harmony {
            iterations = iter;
            state.cluster()?;
            state.moe_correct()?;
            if state.harmony_converged() {
                converged = true;
                break;
            }
        }

        if converged {
            log::info!("Harmony converged after {} iterations", iterations);
        } else {
            log::warn!(
                "Harmony did not converge in {} iterations; using the last corrected embedding",
                iterations
            );
        }

        Ok(CorrectedEmbedding {
            embedding: state.z_corr.t().to_owned(),
            iterations,
            converged,
        })
    }

    fn name(&self) -> &'static str {
        "harmony"
    }
}

/// Working matrices; embeddings are stored dims x cells
struct HarmonyState<'a> {
    params: &'a HarmonyParams,
    rng: RMersenneTwister,
    z_orig: Array2<f64>,
    z_corr: Array2<f64>,
    z_cos: Array2<f64>,
    batch: Vec<usize>,
    n_batches: usize,
    /// Batch proportions
    pr_b: Array1<f64>,
    /// Responsibilities, clusters x cells
    r: Array2<f64>,
    dist: Array2<f64>,
    /// Expected and observed cluster x batch mass
    e: Array2<f64>,
    o: Array2<f64>,
    objective_cluster: Vec<f64>,
    objective_harmony: Vec<f64>,
}

impl<'a> HarmonyState<'a> {
    fn new(
        embedding: &Array2<f64>,
        batch: Vec<usize>,
        n_batches: usize,
        k: usize,
        params: &'a HarmonyParams,
    ) -> Result<Self> {
        let n = embedding.nrows();
        let z_orig = embedding.t().to_owned();
        let z_cos = cosine_normalize(&z_orig);

        let mut pr_b = Array1::<f64>::zeros(n_batches);
        for &b in &batch {
            pr_b[b] += 1.0;
        }
        pr_b /= n as f64;

        let mut state = HarmonyState {
            params,
            rng: RMersenneTwister::new(params.seed),
            z_corr: z_orig.clone(),
            z_orig,
            z_cos,
            batch,
            n_batches,
            pr_b,
            r: Array2::zeros((k, n)),
            dist: Array2::zeros((k, n)),
            e: Array2::zeros((k, n_batches)),
            o: Array2::zeros((k, n_batches)),
            objective_cluster: Vec::new(),
            objective_harmony: Vec::new(),
        };
        state.init_clusters(k)?;
        Ok(state)
    }

    /// Hard k-means on the cosine embedding seeds the centroids
    fn init_clusters(&mut self, k: usize) -> Result<()> {
        let (d, n) = self.z_cos.dim();
        let picks = self.rng.sample(n, k);
        let mut centroids = self.z_cos.select(Axis(1), &picks);

        let mut assign = vec![0usize; n];
        for _ in 0..KMEANS_ITER {
            let mut changed = false;
            for i in 0..n {
                let cell = self.z_cos.column(i);
                let mut best = (f64::INFINITY, 0usize);
                for c in 0..k {
                    let dsq: f64 = centroids
                        .column(c)
                        .iter()
                        .zip(cell.iter())
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum();
                    if dsq < best.0 {
                        best = (dsq, c);
                    }
                }
                if assign[i] != best.1 {
                    assign[i] = best.1;
                    changed = true;
                }
            }
            let mut sums = Array2::<f64>::zeros((d, k));
            let mut counts = vec![0usize; k];
            for (i, &c) in assign.iter().enumerate() {
                let mut col = sums.column_mut(c);
                col += &self.z_cos.column(i);
                counts[c] += 1;
            }
            for c in 0..k {
                if counts[c] > 0 {
                    let mean = sums.column(c).mapv(|v| v / counts[c] as f64);
                    centroids.column_mut(c).assign(&mean);
                }
            }
            if !changed {
                break;
            }
        }

        let y = cosine_normalize(&centroids);
        self.dist = cosine_distance(&y, &self.z_cos);
        for i in 0..n {
            let column = soft_assign(self.dist.column(i).iter().copied(), self.params.sigma);
            self.r.column_mut(i).assign(&column);
        }
        self.compute_eo();
        let obj = self.objective();
        self.objective_cluster.push(obj);
        self.objective_harmony.push(obj);
        Ok(())
    }

    fn compute_eo(&mut self) {
        let mass = self.r.sum_axis(Axis(1));
        for c in 0..self.r.nrows() {
            for b in 0..self.n_batches {
                self.e[[c, b]] = mass[c] * self.pr_b[b];
            }
        }
        self.o.fill(0.0);
        for (i, &b) in self.batch.iter().enumerate() {
            for c in 0..self.r.nrows() {
                self.o[[c, b]] += self.r[[c, i]];
            }
        }
    }

    fn objective(&self) -> f64 {
        let sigma = self.params.sigma;
        let theta = self.params.theta;
        let mut kmeans_error = 0.0;
        let mut entropy = 0.0;
        let mut cross_entropy = 0.0;
        for (i, &b) in self.batch.iter().enumerate() {
            for c in 0..self.r.nrows() {
                let r = self.r[[c, i]];
                kmeans_error += r * self.dist[[c, i]];
                if r > 0.0 {
                    entropy += r * r.ln();
                }
                let ratio = (self.o[[c, b]] + 1.0) / (self.e[[c, b]] + 1.0);
                cross_entropy += r * theta * ratio.ln();
            }
        }
        kmeans_error + sigma * entropy + sigma * cross_entropy
    }

    /// Soft clustering iterations until the objective stabilizes
    fn cluster(&mut self) -> Result<()> {
        for iter in 0..self.params.max_iter_cluster {
            let y = cosine_normalize(&self.z_cos.dot(&self.r.t()));
            self.dist = cosine_distance(&y, &self.z_cos);
            self.update_r();
            let obj = self.objective();
            let prev = self.objective_cluster.last().copied().unwrap_or(obj);
            self.objective_cluster.push(obj);
            if !obj.is_finite() {
                return Err(SpatialError::NumericalInstability {
                    operation: "Harmony clustering".to_string(),
                    details: format!("objective became {} at iteration {}", obj, iter + 1),
                });
            }
            if (prev - obj) / prev.abs().max(1e-300) < self.params.epsilon_cluster {
                log::debug!("Harmony clustering stabilized after {} iterations", iter + 1);
                break;
            }
        }
        if let Some(&last) = self.objective_cluster.last() {
            self.objective_harmony.push(last);
        }
        Ok(())
    }

    fn update_r(&mut self) {
        let n = self.r.ncols();
        let k = self.r.nrows();
        let theta = self.params.theta;
        let sigma = self.params.sigma;
        let block = ((self.params.block_size * n as f64).ceil() as usize).max(1);
        let order = self.rng.permutation(n);

        for cells in order.chunks(block) {
            for &i in cells {
                let b = self.batch[i];
                for c in 0..k {
                    let r = self.r[[c, i]];
                    for bb in 0..self.n_batches {
                        self.e[[c, bb]] -= r * self.pr_b[bb];
                    }
                    self.o[[c, b]] -= r;
                }
            }
            for &i in cells {
                let b = self.batch[i];
                let mut column = soft_assign(self.dist.column(i).iter().copied(), sigma);
                for c in 0..k {
                    let ratio = (self.e[[c, b]] + 1.0) / (self.o[[c, b]] + 1.0);
                    column[c] *= ratio.powf(theta);
                }
                let total = column.sum();
                if total > 0.0 {
                    column /= total;
                }
                self.r.column_mut(i).assign(&column);
            }
            for &i in cells {
                let b = self.batch[i];
                for c in 0..k {
                    let r = self.r[[c, i]];
                    for bb in 0..self.n_batches {
                        self.e[[c, bb]] += r * self.pr_b[bb];
                    }
                    self.o[[c, b]] += r;
                }
            }
        }
    }

    /// Ridge regression of batch effects per cluster, applied to the original embedding
    fn moe_correct(&mut self) -> Result<()> {
        let (d, n) = self.z_orig.dim();
        let nb = self.n_batches;
        let mut z = self.z_orig.clone();

        for c in 0..self.r.nrows() {
            // Design [intercept, batch indicators], weighted by r[c, .]
            let mut x = Array2::<f64>::zeros((nb + 1, nb + 1));
            let mut rhs = Array2::<f64>::zeros((nb + 1, d));
            for i in 0..n {
                let w = self.r[[c, i]];
                if w == 0.0 {
                    continue;
                }
                let b = self.batch[i] + 1;
                x[[0, 0]] += w;
                x[[0, b]] += w;
                x[[b, 0]] += w;
                x[[b, b]] += w;
                for j in 0..d {
                    let v = w * self.z_orig[[j, i]];
                    rhs[[0, j]] += v;
                    rhs[[b, j]] += v;
                }
            }
            for b in 1..=nb {
                x[[b, b]] += self.params.lambda;
            }
            if x[[0, 0]] < 1e-12 {
                continue;
            }
            let mut beta = solve(&x, &rhs)?;
            beta.row_mut(0).fill(0.0);

            for i in 0..n {
                let w = self.r[[c, i]];
                let b = self.batch[i] + 1;
                for j in 0..d {
                    z[[j, i]] -= w * beta[[b, j]];
                }
            }
        }

        self.z_corr = z;
        self.z_cos = cosine_normalize(&self.z_corr);
        Ok(())
    }

    fn harmony_converged(&self) -> bool {
        let len = self.objective_harmony.len();
        if len < 2 {
            return false;
        }
        let old = self.objective_harmony[len - 2];
        let new = self.objective_harmony[len - 1];
        (old - new) / old.abs().max(1e-300) < self.params.epsilon_harmony
    }
}

/// L2-normalize every column
fn cosine_normalize(m: &Array2<f64>) -> Array2<f64> {
    let mut out = m.clone();
    for mut col in out.axis_iter_mut(Axis(1)) {
        let norm = col.dot(&col).sqrt();
        if norm > 0.0 {
            col /= norm;
        }
    }
    out
}

/// 2 (1 - cos) between unit centroids (dims x k) and unit cells (dims x n)
fn cosine_distance(y: &Array2<f64>, z: &Array2<f64>) -> Array2<f64> {
    y.t().dot(z).mapv(|s| 2.0 * (1.0 - s))
}

fn soft_assign(dist: impl Iterator<Item = f64>, sigma: f64) -> Array1<f64> {
    let scaled: Array1<f64> = dist.map(|d| -d / sigma).collect();
    let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut out = scaled.mapv(|v| (v - max).exp());
    let total = out.sum();
    if total > 0.0 {
        out /= total;
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::integration::NoCorrection;

    pub(crate) fn pca_from(embedding: Array2<f64>) -> PcaResult {
        let k = embedding.ncols();
        PcaResult {
            loadings: Array2::eye(k),
            stdev: Array1::ones(k),
            variance_ratio: Array1::from_elem(k, 1.0 / k as f64),
            gene_names: (0..k).map(|g| format!("G{}", g)).collect(),
            embedding,
        }
    }

    /// Two biological groups split along dim 0, each batch shifted along dim 1
    fn batched_embedding() -> (PcaResult, Vec<usize>) {
        let mut rng = RMersenneTwister::new(11);
        let n_per = 20;
        let mut rows = Vec::new();
        let mut batches = Vec::new();
        for b in 0..3 {
            for g in 0..2 {
                for _ in 0..n_per {
                    let mut row = vec![0.0; 5];
                    row[0] = if g == 0 { 5.0 } else { -5.0 };
                    row[1] = 3.0 * b as f64;
                    for v in row.iter_mut() {
                        *v += 0.5 * rng.rnorm();
                    }
                    rows.extend(row);
                    batches.push(b);
                }
            }
        }
        let embedding = Array2::from_shape_vec((batches.len(), 5), rows).unwrap();
        (pca_from(embedding), batches)
    }

    fn batch_spread(embedding: &Array2<f64>, batches: &[usize], dim: usize) -> f64 {
        let means: Vec<f64> = (0..3)
            .map(|b| {
                let vals: Vec<f64> = batches
                    .iter()
                    .enumerate()
                    .filter(|(_, &x)| x == b)
                    .map(|(i, _)| embedding[[i, dim]])
                    .collect();
                vals.iter().sum::<f64>() / vals.len() as f64
            })
            .collect();
        let max = means.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = means.iter().copied().fold(f64::INFINITY, f64::min);
        max - min
    }

    #[test]
    fn test_harmony_removes_batch_shift() {
        let (pca, batches) = batched_embedding();
        let before = batch_spread(&pca.embedding, &batches, 1);
        let corrected = Harmony::default().correct(&pca, &batches).unwrap();
        assert_eq!(corrected.embedding.dim(), pca.embedding.dim());
        let after = batch_spread(&corrected.embedding, &batches, 1);
        assert!(after < 0.5 * before, "before {} after {}", before, after);

        // biological split along dim 0 survives
        let group_gap = |e: &Array2<f64>| {
            let (mut a, mut b) = (0.0, 0.0);
            for i in 0..e.nrows() {
                if (i / 20) % 2 == 0 {
                    a += e[[i, 0]];
                } else {
                    b += e[[i, 0]];
                }
            }
            (a - b) / 60.0
        };
        assert!(group_gap(&corrected.embedding) > 5.0);
    }

    #[test]
    fn test_harmony_deterministic() {
        let (pca, batches) = batched_embedding();
        let a = Harmony::default().correct(&pca, &batches).unwrap();
        let b = Harmony::default().correct(&pca, &batches).unwrap();
        assert_eq!(a.embedding, b.embedding);
        assert_eq!(a.iterations, b.iterations);
    }

    #[test]
    fn test_single_batch_unchanged() {
        let (pca, batches) = batched_embedding();
        let ones = vec![4; batches.len()];
        let corrected = Harmony::default().correct(&pca, &ones).unwrap();
        assert_eq!(corrected.embedding, pca.embedding);
        assert!(corrected.converged);
        assert_eq!(corrected.iterations, 0);
    }

    #[test]
    fn test_iteration_cap_reports_non_convergence() {
        let (pca, batches) = batched_embedding();
        let params = HarmonyParams {
            max_iter_harmony: 1,
            epsilon_harmony: -1.0,
            ..Default::default()
        };
        let corrected = Harmony::new(params).correct(&pca, &batches).unwrap();
        assert!(!corrected.converged);
        assert_eq!(corrected.iterations, 1);
    }

    #[test]
    fn test_label_count_mismatch() {
        let (pca, _) = batched_embedding();
        assert!(Harmony::default().correct(&pca, &[0, 1]).is_err());
        assert!(NoCorrection.correct(&pca, &[0, 1]).is_err());
    }

    #[test]
    fn test_invalid_params() {
        let params = HarmonyParams {
            sigma: 0.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }
}
