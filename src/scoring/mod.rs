//! Gene-panel module scores
//!
//! For every panel the score of a spot is the mean expression of the panel
//! genes minus the mean expression of a set of control genes. Controls are
//! drawn, for each panel gene, from the genes with similar average
//! expression: all genes are split into `n_bins` equal-count bins by their
//! average, and `ctrl_size` genes are sampled without replacement from the
//! panel gene's bin. Sampling uses the seeded R-compatible generator so the
//! scores are reproducible.

use std::collections::BTreeSet;

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpatialError};
use crate::normalization::NormalizedExpression;
use crate::rng::RMersenneTwister;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenePanel {
    pub name: String,
    pub genes: Vec<String>,
}

impl GenePanel {
    pub fn new(name: &str, genes: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            genes: genes.iter().map(|g| g.to_string()).collect(),
        }
    }
}

/// Curated skin panels: basal and differentiated keratinocytes, dermal
/// fibroblasts and cycling cells
pub fn default_panels() -> Vec<GenePanel> {
    vec![
        GenePanel::new(
            "basal_keratinocytes",
            &["KRT5", "KRT14", "TP63", "KRT15", "COL17A1", "ITGA6", "ITGB4"],
        ),
        GenePanel::new(
            "suprabasal_keratinocytes",
            &["KRT1", "KRT10", "IVL", "LOR", "FLG", "SPRR1A", "SPRR1B", "DSG1"],
        ),
        GenePanel::new(
            "fibroblasts",
            &["COL1A1", "COL1A2", "COL3A1", "DCN", "LUM", "PDGFRA", "VIM", "FBLN1"],
        ),
        GenePanel::new(
            "proliferation",
            &["MKI67", "TOP2A", "PCNA", "CCNB1", "CDK1", "MCM2", "TYMS", "BIRC5"],
        ),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreParams {
    pub n_bins: usize,
    pub ctrl_size: usize,
    pub seed: u32,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            n_bins: 24,
            ctrl_size: 100,
            seed: 1,
        }
    }
}

impl ScoreParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_bins == 0 {
            return Err(SpatialError::parameter("scoring.n_bins", "must be at least 1"));
        }
        if self.ctrl_size == 0 {
            return Err(SpatialError::parameter("scoring.ctrl_size", "must be at least 1"));
        }
        Ok(())
    }
}

/// Bookkeeping for one scored panel
#[derive(Debug, Clone, Serialize)]
pub struct PanelReport {
    pub name: String,
    pub genes_used: Vec<String>,
    pub genes_missing: Vec<String>,
    pub n_controls: usize,
}

#[derive(Debug, Clone)]
pub struct ModuleScores {
    /// Spots x scored panels
    pub scores: Array2<f64>,
    pub panels: Vec<PanelReport>,
    /// Panels skipped because none of their genes are in the dataset
    pub skipped: Vec<String>,
}

impl ModuleScores {
    pub fn panel_names(&self) -> Vec<&str> {
        self.panels.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn score(&self, panel: &str) -> Option<ArrayView1<'_, f64>> {
        self.panels
            .iter()
            .position(|p| p.name == panel)
            .map(|j| self.scores.column(j))
    }
}

/// Equal-count expression bins, as `cut_number(avg, n_bins)` with
/// left-closed intervals
fn expression_bins(averages: &[f64], n_bins: usize) -> Vec<usize> {
    let mut breaks: Vec<f64> = (0..=n_bins)
        .map(|i| crate::stats::quantile(averages, i as f64 / n_bins as f64))
        .collect();
    breaks.dedup();
    let inner = &breaks[1..breaks.len().saturating_sub(1).max(1)];
    averages
        .iter()
        .map(|&v| inner.partition_point(|&b| b <= v))
        .collect()
}

pub fn score_modules(
    expr: &NormalizedExpression,
    panels: &[GenePanel],
    params: &ScoreParams,
) -> Result<ModuleScores> {
    params.validate()?;
    let n_spots = expr.n_spots();
    let n_genes = expr.n_genes();
    if n_genes == 0 || n_spots == 0 {
        return Err(SpatialError::EmptyData {
            reason: "module scoring needs a non-empty expression matrix".to_string(),
        });
    }

    let by_gene = expr.by_gene();
    let dense_gene = |g: usize| -> Array1<f64> {
        let mut col = Array1::<f64>::zeros(n_spots);
        if let Some(view) = by_gene.outer_view(g) {
            for (s, &v) in view.iter() {
                col[s] = v;
            }
        }
        col
    };

    let mut rng = RMersenneTwister::new(params.seed);
    // Tiny jitter breaks ties between genes with identical averages
    let mut averages: Vec<f64> = (0..n_genes)
        .map(|g| {
            by_gene
                .outer_view(g)
                .map(|v| v.data().iter().sum::<f64>())
                .unwrap_or(0.0)
                / n_spots as f64
        })
        .collect();
    for avg in averages.iter_mut() {
        *avg += rng.rnorm() / 1e30;
    }
    let bins = expression_bins(&averages, params.n_bins);

    // Genes of each bin, in increasing average order
    let mut ranked: Vec<usize> = (0..n_genes).collect();
    ranked.sort_by(|&a, &b| crate::stats::cmp_f64(averages[a], averages[b]));
    let n_bin_ids = bins.iter().copied().max().map_or(0, |m| m + 1);
    let mut bin_members: Vec<Vec<usize>> = vec![Vec::new(); n_bin_ids];
    for &g in &ranked {
        bin_members[bins[g]].push(g);
    }

    let mut columns: Vec<Array1<f64>> = Vec::new();
    let mut reports = Vec::new();
    let mut skipped = Vec::new();
    for panel in panels {
        let (present, missing): (Vec<&String>, Vec<&String>) =
            panel.genes.iter().partition(|g| expr.gene_index(g).is_some());
        if !missing.is_empty() {
            log::warn!(
                "Panel '{}': {} of {} genes not found: {}",
                panel.name,
                missing.len(),
                panel.genes.len(),
                missing.iter().map(|g| g.as_str()).collect::<Vec<_>>().join(", ")
            );
        }
        if present.is_empty() {
            log::warn!("Panel '{}' has no genes in the dataset; skipping", panel.name);
            skipped.push(panel.name.clone());
            continue;
        }

        let gene_idx: Vec<usize> = present.iter().filter_map(|g| expr.gene_index(g)).collect();
        let mut controls: BTreeSet<usize> = BTreeSet::new();
        for &g in &gene_idx {
            let pool = &bin_members[bins[g]];
            if pool.len() < params.ctrl_size {
                log::debug!(
                    "Panel '{}': bin of {} holds only {} genes",
                    panel.name,
                    expr.gene_names()[g],
                    pool.len()
                );
            }
            for pick in rng.sample(pool.len(), params.ctrl_size) {
                controls.insert(pool[pick]);
            }
        }

        let mut features = Array1::<f64>::zeros(n_spots);
        for &g in &gene_idx {
            features += &dense_gene(g);
        }
        features /= gene_idx.len() as f64;
        let mut ctrl = Array1::<f64>::zeros(n_spots);
        for &g in &controls {
            ctrl += &dense_gene(g);
        }
        ctrl /= controls.len().max(1) as f64;

        columns.push(features - ctrl);
        reports.push(PanelReport {
            name: panel.name.clone(),
            genes_used: present.iter().map(|g| g.to_string()).collect(),
            genes_missing: missing.iter().map(|g| g.to_string()).collect(),
            n_controls: controls.len(),
        });
    }

    let mut scores = Array2::<f64>::zeros((n_spots, columns.len()));
    for (j, col) in columns.iter().enumerate() {
        scores.column_mut(j).assign(col);
    }
    log::info!(
        "Scored {} gene panels ({} skipped) over {} spots",
        reports.len(),
        skipped.len(),
        n_spots
    );

    Ok(ModuleScores {
        scores,
        panels: reports,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprs::TriMat;

    /// 20 spots x 60 background genes plus three "basal" genes that are high
    /// in the first 10 spots only
    fn fixture() -> NormalizedExpression {
        let n_spots = 20;
        let mut genes: Vec<String> = (0..60).map(|g| format!("BG{:02}", g)).collect();
        genes.extend(["KRT5", "KRT14", "TP63"].iter().map(|g| g.to_string()));
        let mut tri = TriMat::new((n_spots, genes.len()));
        for s in 0..n_spots {
            for g in 0..60 {
                let v = 0.5 + (g % 6) as f64 * 0.3 + ((s + g) % 3) as f64 * 0.05;
                tri.add_triplet(s, g, v);
            }
            if s < 10 {
                for g in 60..63 {
                    tri.add_triplet(s, g, 3.0);
                }
            }
        }
        NormalizedExpression::from_parts(tri.to_csr(), genes, 1e4)
    }

    fn params() -> ScoreParams {
        ScoreParams {
            n_bins: 4,
            ctrl_size: 5,
            seed: 1,
        }
    }

    #[test]
    fn test_panel_scores_track_expression() {
        let expr = fixture();
        let panels = vec![GenePanel::new("basal", &["KRT5", "KRT14", "TP63", "NOTAGENE"])];
        let scores = score_modules(&expr, &panels, &params()).unwrap();
        assert_eq!(scores.scores.dim(), (20, 1));
        let basal = scores.score("basal").unwrap();
        let high: f64 = basal.iter().take(10).sum::<f64>() / 10.0;
        let low: f64 = basal.iter().skip(10).sum::<f64>() / 10.0;
        assert!(high > low + 1.0, "high {} low {}", high, low);
        assert_eq!(scores.panels[0].genes_missing, vec!["NOTAGENE".to_string()]);
        assert_eq!(scores.panels[0].genes_used.len(), 3);
        assert!(scores.panels[0].n_controls > 0);
    }

    #[test]
    fn test_panel_without_genes_skipped() {
        let expr = fixture();
        let panels = vec![
            GenePanel::new("ghost", &["NOPE1", "NOPE2"]),
            GenePanel::new("basal", &["KRT5"]),
        ];
        let scores = score_modules(&expr, &panels, &params()).unwrap();
        assert_eq!(scores.skipped, vec!["ghost".to_string()]);
        assert_eq!(scores.panel_names(), vec!["basal"]);
        assert!(scores.score("ghost").is_none());
    }

    #[test]
    fn test_seeded_scores_identical() {
        let expr = fixture();
        let a = score_modules(&expr, &default_panels(), &params()).unwrap();
        let b = score_modules(&expr, &default_panels(), &params()).unwrap();
        assert_eq!(a.scores, b.scores);
        let c = score_modules(&expr, &default_panels(), &ScoreParams { seed: 2, ..params() }).unwrap();
        assert_eq!(a.panel_names(), c.panel_names());
    }

    #[test]
    fn test_bins_are_equal_count() {
        let averages: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let bins = expression_bins(&averages, 4);
        for b in 0..4 {
            assert_eq!(bins.iter().filter(|&&x| x == b).count(), 10);
        }
        assert_eq!(bins[0], 0);
        assert_eq!(bins[39], 3);
    }
}
