//! Highly variable gene selection (variance-stabilizing "vst" flavour)
//!
//! For each gene the mean and variance of the raw counts are computed, a
//! local quadratic trend of log10(variance) on log10(mean) gives the
//! expected variance at that mean, and the counts are standardized by the
//! expected standard deviation (values clipped at sqrt(n_spots)). Genes are
//! ranked by the variance of the standardized values.

use rayon::prelude::*;
use serde::Serialize;

use super::loess::LocalQuadraticFit;
use crate::data::SpotMatrix;
use crate::error::{Result, SpatialError};

const LOESS_SPAN: f64 = 0.3;
const LOESS_CUT: f64 = 0.8;

/// Mean-variance statistics for one gene
#[derive(Debug, Clone, Serialize)]
pub struct GeneVariance {
    pub gene: String,
    pub mean: f64,
    pub variance: f64,
    pub variance_expected: f64,
    pub variance_standardized: f64,
}

#[derive(Debug, Clone)]
pub struct VariableGenes {
    /// Selected gene indices, most variable first
    pub indices: Vec<usize>,
    /// Statistics for every gene in dataset order
    pub stats: Vec<GeneVariance>,
}

impl VariableGenes {
    pub fn names(&self) -> Vec<&str> {
        self.indices.iter().map(|&i| self.stats[i].gene.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Select the `n_features` most variable genes from raw counts
pub fn find_variable_genes(counts: &SpotMatrix, n_features: usize) -> Result<VariableGenes> {
    let n_genes = counts.n_genes();
    let n_spots = counts.n_spots();
    if n_features > n_genes {
        return Err(SpatialError::parameter(
            "variable_gene_count",
            format!("{} variable genes requested but only {} genes", n_features, n_genes),
        ));
    }
    if n_spots < 2 {
        return Err(SpatialError::EmptyData {
            reason: "variance estimation needs at least two spots".to_string(),
        });
    }

    let by_gene = counts.counts().to_csc();
    let n = n_spots as f64;

    let moments: Vec<(f64, f64)> = by_gene
        .outer_iterator()
        .map(|col| {
            let sum: f64 = col.data().iter().sum();
            let mean = sum / n;
            let nonzero_ss: f64 = col.data().iter().map(|&v| (v - mean) * (v - mean)).sum();
            let zeros = n - col.nnz() as f64;
            let variance = (nonzero_ss + zeros * mean * mean) / (n - 1.0);
            (mean, variance)
        })
        .collect();

    let (fit_x, fit_y): (Vec<f64>, Vec<f64>) = moments
        .iter()
        .filter(|(_, v)| *v > 0.0)
        .map(|(m, v)| (m.log10(), v.log10()))
        .unzip();
    log::info!(
        "Fitting mean-variance trend on {} non-constant genes (span {})",
        fit_x.len(),
        LOESS_SPAN
    );
    let trend = LocalQuadraticFit::fit(&fit_x, &fit_y, LOESS_SPAN, LOESS_CUT)?;

    let clip = n.sqrt();
    let columns: Vec<_> = by_gene.outer_iterator().collect();
    let stats: Vec<GeneVariance> = columns
        .par_iter()
        .zip(moments.par_iter())
        .enumerate()
        .map(|(g, (col, &(mean, variance)))| {
            let (variance_expected, variance_standardized) = if variance > 0.0 {
                let expected = 10f64.powf(trend.predict(mean.log10()));
                let sd = expected.sqrt();
                let nonzero: f64 = col
                    .data()
                    .iter()
                    .map(|&v| {
                        let z = ((v - mean) / sd).min(clip);
                        z * z
                    })
                    .sum();
                let zeros = n - col.nnz() as f64;
                let zero_z = mean / sd;
                (expected, (nonzero + zeros * zero_z * zero_z) / (n - 1.0))
            } else {
                (0.0, 0.0)
            };
            GeneVariance {
                gene: counts.gene_names()[g].clone(),
                mean,
                variance,
                variance_expected,
                variance_standardized,
            }
        })
        .collect();

    let mut order: Vec<usize> = (0..n_genes).collect();
    order.sort_by(|&a, &b| {
        crate::stats::cmp_f64(stats[b].variance_standardized, stats[a].variance_standardized)
            .then_with(|| stats[a].gene.cmp(&stats[b].gene))
    });
    order.truncate(n_features);

    log::info!(
        "Selected {} variable genes (top: {})",
        order.len(),
        order
            .iter()
            .take(5)
            .map(|&i| stats[i].gene.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(VariableGenes {
        indices: order,
        stats,
    })
}
