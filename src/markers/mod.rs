//! Cluster marker genes
//!
//! Each cluster is compared against all other spots. A gene is reported as
//! a marker when it is detected in at least `min_pct` of the cluster's spots
//! and its average log2 fold change is at least `min_logfc` (both bounds
//! inclusive, positive markers only). P-values come from the Wilcoxon
//! rank-sum test and are Bonferroni-adjusted over every gene in the dataset.

mod table;

pub use table::{MarkerRecord, MarkerTable};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cluster::ClusterAssignment;
use crate::error::{Result, SpatialError};
use crate::normalization::NormalizedExpression;
use crate::testing::{bonferroni, GeneRanks};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerParams {
    pub min_pct: f64,
    pub min_logfc: f64,
}

impl Default for MarkerParams {
    fn default() -> Self {
        Self {
            min_pct: 0.25,
            min_logfc: 0.25,
        }
    }
}

/// Per-gene data shared by every cluster comparison
struct GeneColumn {
    /// (spot, expm1 of the normalized value)
    linear: Vec<(usize, f64)>,
    ranks: GeneRanks,
}

/// One-vs-rest markers for every cluster of `assignment`
pub fn find_all_markers(
    expr: &NormalizedExpression,
    assignment: &ClusterAssignment,
    params: &MarkerParams,
) -> Result<MarkerTable> {
    let n_spots = expr.n_spots();
    if assignment.n_spots() != n_spots {
        return Err(SpatialError::DimensionMismatch {
            expected: format!("{} cluster labels", n_spots),
            got: format!("{} cluster labels", assignment.n_spots()),
        });
    }
    let n_genes = expr.n_genes();
    if assignment.n_clusters < 2 {
        log::warn!("Only one cluster present; no markers can be computed");
        return Ok(MarkerTable::new(Vec::new()));
    }

    let by_gene = expr.by_gene();
    let columns: Vec<GeneColumn> = (0..n_genes)
        .into_par_iter()
        .map(|g| {
            let entries: Vec<(usize, f64)> = by_gene
                .outer_view(g)
                .map(|col| col.iter().map(|(s, &v)| (s, v)).collect())
                .unwrap_or_default();
            GeneColumn {
                linear: entries.iter().map(|&(s, v)| (s, v.exp_m1())).collect(),
                ranks: GeneRanks::from_sparse(n_spots, &entries),
            }
        })
        .collect();
    log::debug!("Ranked {} genes over {} spots", n_genes, n_spots);

    let per_cluster: Vec<Vec<MarkerRecord>> = assignment
        .cluster_ids()
        .into_par_iter()
        .map(|cluster| {
            cluster_markers(expr, &columns, assignment, cluster, params, n_genes)
        })
        .collect();

    let records: Vec<MarkerRecord> = per_cluster.into_iter().flatten().collect();
    let table = MarkerTable::new(records);
    log::info!(
        "Found {} markers across {} clusters (min_pct {}, min_logfc {})",
        table.len(),
        assignment.n_clusters,
        params.min_pct,
        params.min_logfc
    );
    for cluster in table.clusters() {
        log::debug!("Cluster {}: {} markers", cluster, table.records(cluster).len());
    }
    Ok(table)
}

fn cluster_markers(
    expr: &NormalizedExpression,
    columns: &[GeneColumn],
    assignment: &ClusterAssignment,
    cluster: u32,
    params: &MarkerParams,
    n_tests: usize,
) -> Vec<MarkerRecord> {
    let in_group: Vec<bool> = assignment.labels.iter().map(|&l| l == cluster).collect();
    let n_in = in_group.iter().filter(|&&b| b).count();
    let n_out = in_group.len() - n_in;
    if n_in == 0 || n_out == 0 {
        return Vec::new();
    }

    let mut records = Vec::new();
    for (g, column) in columns.iter().enumerate() {
        let (mut detected_in, mut detected_out) = (0usize, 0usize);
        let (mut sum_in, mut sum_out) = (0.0, 0.0);
        for &(spot, v) in &column.linear {
            if v <= 0.0 {
                continue;
            }
            if in_group[spot] {
                detected_in += 1;
                sum_in += v;
            } else {
                detected_out += 1;
                sum_out += v;
            }
        }
        let pct_in = detected_in as f64 / n_in as f64;
        let pct_out = detected_out as f64 / n_out as f64;
        if pct_in < params.min_pct {
            continue;
        }
        let avg_log2fc = (sum_in / n_in as f64 + 1.0).log2() - (sum_out / n_out as f64 + 1.0).log2();
        if avg_log2fc < params.min_logfc {
            continue;
        }

        records.push(MarkerRecord {
            gene: expr.gene_names()[g].clone(),
            cluster,
            avg_log2fc,
            p_value: column.ranks.rank_sum_pvalue(&in_group, n_in),
            p_value_adj: f64::NAN,
            pct_in,
            pct_out,
        });
    }
    let raw: Vec<f64> = records.iter().map(|r| r.p_value).collect();
    for (record, adj) in records.iter_mut().zip(bonferroni(&raw, n_tests)) {
        record.p_value_adj = adj;
    }
    records
}
