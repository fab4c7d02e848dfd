//! Principal component analysis of the scaled variable genes
//!
//! Truncated PCA by randomized subspace iteration: a seeded Gaussian test
//! matrix is pushed through a few power iterations of X Xᵀ, the resulting
//! orthonormal basis Q projects X to a small matrix B = QᵀX, and the exact
//! eigen-decomposition of B Bᵀ gives the leading singular triplets.

use ndarray::{Array1, Array2, Axis};

use super::scale::ScaledData;
use crate::error::{Result, SpatialError};
use crate::linalg::{orthonormalize_columns, symmetric_eigen};
use crate::rng::RMersenneTwister;

#[derive(Debug, Clone)]
pub struct PcaParams {
    pub n_components: usize,
    /// Extra basis vectors beyond `n_components`
    pub n_oversamples: usize,
    pub n_power_iter: usize,
    pub seed: u32,
}

impl Default for PcaParams {
    fn default() -> Self {
        Self {
            n_components: 50,
            n_oversamples: 10,
            n_power_iter: 7,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PcaResult {
    /// Spots x components
    pub embedding: Array2<f64>,
    /// Genes x components
    pub loadings: Array2<f64>,
    /// Standard deviation of each component
    pub stdev: Array1<f64>,
    /// Fraction of total variance per component
    pub variance_ratio: Array1<f64>,
    pub gene_names: Vec<String>,
}

impl PcaResult {
    pub fn n_components(&self) -> usize {
        self.embedding.ncols()
    }
}

pub fn run_pca(scaled: &ScaledData, params: &PcaParams) -> Result<PcaResult> {
    let x = &scaled.data;
    let (n, p) = x.dim();
    let k = params.n_components;
    if k == 0 {
        return Err(SpatialError::parameter("pca_components", "must be at least 1"));
    }
    if n < k || p < k {
        return Err(SpatialError::parameter(
            "pca_components",
            format!("{} components requested from {} spots x {} genes", k, n, p),
        ));
    }

    let l = (k + params.n_oversamples).min(n).min(p);
    let mut rng = RMersenneTwister::new(params.seed);
    let mut omega = Array2::<f64>::zeros((p, l));
    for v in omega.iter_mut() {
        *v = rng.rnorm();
    }

    let mut q = x.dot(&omega);
    orthonormalize_columns(&mut q);
    for _ in 0..params.n_power_iter {
        let mut z = x.t().dot(&q);
        orthonormalize_columns(&mut z);
        q = x.dot(&z);
        orthonormalize_columns(&mut q);
    }

    let b = q.t().dot(x);
    let bbt = b.dot(&b.t());
    let (eigenvalues, eigenvectors) = symmetric_eigen(&bbt)?;

    // Right singular vectors: V = Bᵀ U_b / s
    let mut loadings = Array2::<f64>::zeros((p, k));
    let mut sing = Array1::<f64>::zeros(k);
    for c in 0..k {
        let s2 = eigenvalues[c].max(0.0);
        let s = s2.sqrt();
        sing[c] = s;
        if s > 1e-12 {
            let v = b.t().dot(&eigenvectors.column(c)) / s;
            loadings.column_mut(c).assign(&v);
        }
    }

    for mut col in loadings.axis_iter_mut(Axis(1)) {
        let pivot = col
            .iter()
            .copied()
            .fold(0.0f64, |best, v| if v.abs() > best.abs() { v } else { best });
        if pivot < 0.0 {
            col.mapv_inplace(|v| -v);
        }
    }

    let embedding = x.dot(&loadings);
    let total_ss: f64 = x.iter().map(|v| v * v).sum();
    let stdev = sing.mapv(|s| s / ((n as f64) - 1.0).max(1.0).sqrt());
    let variance_ratio = if total_ss > 0.0 {
        sing.mapv(|s| s * s / total_ss)
    } else {
        Array1::zeros(k)
    };

    log::info!(
        "PCA: {} components from {} spots x {} genes, {:.1}% variance explained",
        k,
        n,
        p,
        variance_ratio.sum() * 100.0
    );
    log::debug!(
        "PC stdev (first 5): {:?}",
        stdev.iter().take(5).collect::<Vec<_>>()
    );

    Ok(PcaResult {
        embedding,
        loadings,
        stdev,
        variance_ratio,
        gene_names: scaled.genes.clone(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Three groups of spots separated along two gene programmes plus noise
    pub(crate) fn grouped_scaled(n_per_group: usize, n_genes: usize) -> ScaledData {
        let n = n_per_group * 3;
        let mut rng = RMersenneTwister::new(7);
        let mut data = Array2::<f64>::zeros((n, n_genes));
        for s in 0..n {
            let group = s / n_per_group;
            for g in 0..n_genes {
                let signal = match (group, g % 3) {
                    (0, 0) => 4.0,
                    (1, 1) => 4.0,
                    (2, 2) => 4.0,
                    _ => 0.0,
                };
                data[[s, g]] = signal + 0.3 * rng.rnorm();
            }
        }
        let means = data.mean_axis(Axis(0)).unwrap();
        data -= &means;
        ScaledData {
            data,
            genes: (0..n_genes).map(|g| format!("G{}", g)).collect(),
            gene_indices: (0..n_genes).collect(),
            means: vec![0.0; n_genes],
            sds: vec![1.0; n_genes],
        }
    }

    #[test]
    fn test_matches_exact_eigenvalues() {
        let scaled = grouped_scaled(10, 8);
        let params = PcaParams {
            n_components: 4,
            ..Default::default()
        };
        let pca = run_pca(&scaled, &params).unwrap();
        let xtx = scaled.data.t().dot(&scaled.data);
        let (exact, _) = symmetric_eigen(&xtx).unwrap();
        for c in 0..4 {
            let s2 = pca.stdev[c] * pca.stdev[c] * 29.0;
            assert!((s2 - exact[c]).abs() < 1e-6 * exact[0], "component {}", c);
        }
        for w in pca.variance_ratio.as_slice().unwrap().windows(2) {
            assert!(w[0] >= w[1]);
        }
    }

    #[test]
    fn test_loadings_orthonormal_and_sign_fixed() {
        let scaled = grouped_scaled(12, 15);
        let params = PcaParams {
            n_components: 3,
            ..Default::default()
        };
        let pca = run_pca(&scaled, &params).unwrap();
        let gram = pca.loadings.t().dot(&pca.loadings);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((gram[[i, j]] - expected).abs() < 1e-8);
            }
            let col = pca.loadings.column(i);
            let max = col.iter().copied().fold(0.0f64, |a, v| if v.abs() > a.abs() { v } else { a });
            assert!(max > 0.0);
        }
        assert_eq!(pca.embedding.dim(), (36, 3));
    }

    #[test]
    fn test_seeded_runs_identical() {
        let scaled = grouped_scaled(10, 12);
        let params = PcaParams {
            n_components: 3,
            ..Default::default()
        };
        let a = run_pca(&scaled, &params).unwrap();
        let b = run_pca(&scaled, &params).unwrap();
        assert_eq!(a.embedding, b.embedding);
    }

    #[test]
    fn test_too_many_components() {
        let scaled = grouped_scaled(2, 4);
        let params = PcaParams {
            n_components: 5,
            ..Default::default()
        };
        let err = run_pca(&scaled, &params).unwrap_err();
        assert!(matches!(err, SpatialError::InvalidParameter { .. }));
    }
}
