//! Stage orchestration
//!
//! Each stage takes the previous stage's value and returns a new one; the
//! collected values form [`AnalysisResults`]. [`run_until_clustering`] stops
//! after the resolution ladder so the active resolution can be chosen before
//! markers, scores and enrichment are computed.

use ndarray::s;

use crate::cluster::{
    build_snn_graph, cluster_resolutions, run_umap, ClusterAssignment, ResolutionLadder, SnnGraph,
    UmapEmbedding,
};
use crate::config::PipelineConfig;
use crate::data::SpatialDataset;
use crate::enrichment::{build_backend, run_enrichment, EnrichmentBackend, EnrichmentReport};
use crate::error::Result;
use crate::integration::{BatchCorrector, CorrectedEmbedding, Harmony};
use crate::io::{self, OutputLayout};
use crate::markers::{find_all_markers, MarkerParams, MarkerTable};
use crate::normalization::{log_normalize, NormalizedExpression};
use crate::qc::{compute_qc, QcReport};
use crate::scoring::{score_modules, ModuleScores};
use crate::transform::{find_variable_genes, run_pca, scale_data, PcaParams, PcaResult, ScaledData, VariableGenes};

/// Everything up to and including the resolution ladder
#[derive(Debug, Clone)]
pub struct ClusteringResults {
    pub dataset: SpatialDataset,
    pub qc: QcReport,
    pub normalized: NormalizedExpression,
    pub variable_genes: VariableGenes,
    pub scaled: ScaledData,
    pub pca: PcaResult,
    pub corrected: CorrectedEmbedding,
    pub umap: UmapEmbedding,
    pub snn: SnnGraph,
    pub ladder: ResolutionLadder,
}

#[derive(Debug, Clone)]
pub struct AnalysisResults {
    pub clustering: ClusteringResults,
    pub active: ClusterAssignment,
    pub markers: MarkerTable,
    pub module_scores: ModuleScores,
    /// `None` when enrichment is disabled
    pub enrichment: Option<EnrichmentReport>,
}

/// Load every sample and run the stages through multi-resolution clustering
pub fn run_until_clustering(config: &PipelineConfig) -> Result<ClusteringResults> {
    config.validate()?;
    let dataset = io::load_dataset(config)?;
    cluster_dataset(config, dataset)
}

/// Run QC through clustering on an already loaded dataset
pub fn cluster_dataset(config: &PipelineConfig, dataset: SpatialDataset) -> Result<ClusteringResults> {
    config.validate_against(&dataset)?;

    log::info!("Step 1: Quality control");
    let qc = compute_qc(&dataset);
    log::info!("\n{}", qc);

    log::info!("Step 2: Normalization and variable genes");
    let normalized = log_normalize(dataset.matrix(), config.scale_factor);
    let variable_genes = find_variable_genes(dataset.matrix(), config.variable_gene_count)?;

    log::info!("Step 3: Scaling and PCA");
    let scaled = scale_data(&normalized, &variable_genes.indices, config.scale_max)?;
    let pca_params = PcaParams {
        n_components: config.pca_components,
        seed: config.seed,
        ..Default::default()
    };
    let pca = run_pca(&scaled, &pca_params)?;

    let harmony = Harmony::new(config.harmony.clone());
    log::info!(
        "Step 4: Batch correction ({}) across {} samples",
        harmony.name(),
        dataset.n_samples()
    );
    let corrected = harmony.correct(&pca, &dataset.batch_labels())?;

    log::info!("Step 5: Neighbors, UMAP and clustering");
    let dims = corrected.embedding.slice(s![.., ..config.embedding_dims]);
    let umap = run_umap(dims, &config.umap)?;
    let snn = build_snn_graph(dims, config.neighbor_k, config.prune_snn)?;
    let ladder = cluster_resolutions(&snn, &config.resolutions, &config.louvain)?;
    log::info!("\n{}", ladder.summary());

    Ok(ClusteringResults {
        dataset,
        qc,
        normalized,
        variable_genes,
        scaled,
        pca,
        corrected,
        umap,
        snn,
        ladder,
    })
}

/// Markers, module scores and enrichment at the active resolution.
///
/// `backend` overrides the backend named in the configuration.
pub fn run_downstream(
    config: &PipelineConfig,
    clustering: ClusteringResults,
    backend: Option<&dyn EnrichmentBackend>,
) -> Result<AnalysisResults> {
    let active = clustering.ladder.select(config.active_resolution)?;
    log::info!(
        "Active resolution {}: {} clusters, sizes {:?}",
        active.resolution,
        active.n_clusters,
        active.sizes()
    );

    log::info!("Step 6: Cluster markers");
    let marker_params = MarkerParams {
        min_pct: config.marker_min_pct,
        min_logfc: config.marker_min_logfc,
    };
    let markers = find_all_markers(&clustering.normalized, &active, &marker_params)?;

    log::info!("Step 7: Module scores");
    let module_scores = score_modules(&clustering.normalized, &config.module_panels, &config.scoring)?;

    log::info!("Step 8: Functional enrichment");
    let configured;
    let backend = match backend {
        Some(b) => Some(b),
        None => {
            configured = build_backend(
                &config.enrichment,
                &config.root_path,
                clustering.dataset.gene_names(),
            )?;
            configured.as_deref()
        }
    };
    let enrichment = match backend {
        Some(b) => {
            let report = run_enrichment(&markers, &active.cluster_ids(), b, &config.enrichment);
            log::info!("\n{}", report);
            Some(report)
        }
        None => {
            log::info!("Enrichment disabled");
            None
        }
    };

    Ok(AnalysisResults {
        clustering,
        active,
        markers,
        module_scores,
        enrichment,
    })
}

/// The complete run: load, cluster, then markers, scores and enrichment
pub fn run_pipeline(
    config: &PipelineConfig,
    backend: Option<&dyn EnrichmentBackend>,
) -> Result<AnalysisResults> {
    let clustering = run_until_clustering(config)?;
    run_downstream(config, clustering, backend)
}

/// Tables available after clustering
pub fn write_clustering_outputs(layout: &OutputLayout, results: &ClusteringResults) -> Result<()> {
    let ids = results.dataset.spot_ids();
    io::write_qc(layout, &results.dataset, &results.qc)?;
    io::write_variable_genes(layout.table("variable_genes.csv"), &results.variable_genes)?;
    io::write_pca_variance(layout.table("pca_variance.csv"), &results.pca)?;
    io::write_embedding(layout.table("pca_embedding.csv"), ids, &results.pca.embedding, "PC_")?;
    io::write_embedding(
        layout.table("corrected_embedding.csv"),
        ids,
        &results.corrected.embedding,
        "harmony_",
    )?;
    io::write_embedding(layout.table("umap.csv"), ids, &results.umap.coords, "UMAP_")?;
    io::write_resolution_summary(layout.table("resolution_summary.csv"), &results.ladder.summary())?;
    Ok(())
}

/// Every table of a complete run
pub fn write_outputs(layout: &OutputLayout, results: &AnalysisResults, top_n_values: &[usize]) -> Result<()> {
    let clustering = &results.clustering;
    write_clustering_outputs(layout, clustering)?;
    io::write_clusters(
        layout.table("clusters.csv"),
        &clustering.dataset,
        &clustering.ladder,
        &results.active,
    )?;
    io::write_markers(layout.table("markers_all.csv"), results.markers.iter())?;
    for &n in top_n_values {
        io::write_markers(
            layout.table(&format!("markers_top{}.csv", n)),
            results.markers.top_n_all(n),
        )?;
    }
    io::write_module_scores(layout.table("module_scores.csv"), &clustering.dataset, &results.module_scores)?;
    if let Some(report) = &results.enrichment {
        io::write_enrichment(layout.table("enrichment.csv"), report)?;
    }
    log::info!("Tables written to {}", layout.tables.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SampleSpec;
    use crate::enrichment::tests::MockBackend;
    use crate::enrichment::{EnrichmentBackendKind, EnrichmentOutcome};
    use crate::io::write_sample;
    use crate::scoring::GenePanel;
    use std::path::Path;
    use tempfile::TempDir;

    const N_GROUPS: usize = 4;
    const MARKERS_PER_GROUP: usize = 10;
    const HOUSEKEEPING: usize = 10;
    const SPOTS_PER_GROUP: usize = 4;

    fn gene_names() -> Vec<String> {
        let mut genes = Vec::new();
        for g in 0..N_GROUPS {
            for j in 0..MARKERS_PER_GROUP {
                genes.push(format!("M{}_{}", g, j));
            }
        }
        for h in 0..HOUSEKEEPING {
            genes.push(format!("HK{}", h));
        }
        genes
    }

    /// Sample `s`: 16 spots, four per tissue domain, each domain with its own
    /// ten marker genes; housekeeping genes carry a mild per-sample shift
    fn write_organoid_sample(root: &Path, s: usize) -> SampleSpec {
        let genes = gene_names();
        let gene_refs: Vec<&str> = genes.iter().map(|g| g.as_str()).collect();
        let n_spots = N_GROUPS * SPOTS_PER_GROUP;
        let barcodes: Vec<String> = (0..n_spots).map(|i| format!("SPOT{:02}-1", i)).collect();
        let barcode_refs: Vec<&str> = barcodes.iter().map(|b| b.as_str()).collect();

        let mut entries = Vec::new();
        for i in 0..n_spots {
            let group = i / SPOTS_PER_GROUP;
            for j in 0..MARKERS_PER_GROUP {
                let gene = group * MARKERS_PER_GROUP + j;
                let count = 8 + 2 * j + (i * 3 + j + s) % 5;
                entries.push((gene + 1, i + 1, count as u32));
            }
            for h in 0..HOUSEKEEPING {
                let gene = N_GROUPS * MARKERS_PER_GROUP + h;
                let count = 3 + h + (i * 7 + h * 5 + s * 3) % 6;
                entries.push((gene + 1, i + 1, count as u32));
            }
        }
        write_sample(root, &format!("S{}", s + 1), &gene_refs, &barcode_refs, &entries)
    }

    fn organoid_config(root: &Path) -> PipelineConfig {
        let samples = (0..3).map(|s| write_organoid_sample(root, s)).collect();
        let mut config = PipelineConfig::with_samples(root, samples);
        config.output_dir = root.join("results");
        config.pca_components = 10;
        config.variable_gene_count = 40;
        config.embedding_dims = 10;
        config.neighbor_k = 12;
        config.umap.n_neighbors = 15;
        config.umap.n_epochs = 100;
        config.harmony.n_clusters = Some(4);
        config.module_panels = vec![GenePanel::new(
            "domain0",
            &["M0_0", "M0_1", "M0_2", "M0_3", "M0_4", "NOT_MEASURED"],
        )];
        config.enrichment.backend = EnrichmentBackendKind::None;
        config
    }

    #[test]
    fn test_full_pipeline() {
        let tmp = TempDir::new().unwrap();
        let config = organoid_config(tmp.path());
        let backend: &dyn EnrichmentBackend = &MockBackend { fail: vec![2] };
        let results = run_pipeline(&config, Some(backend)).unwrap();
        let clustering = &results.clustering;

        // Spot totals survive loading and merging
        assert_eq!(clustering.dataset.n_spots(), 48);
        assert_eq!(clustering.dataset.spots_per_sample(), vec![16, 16, 16]);
        let first_total: f64 = (0..MARKERS_PER_GROUP).map(|j| (8 + 2 * j + j % 5) as f64).sum::<f64>()
            + (0..HOUSEKEEPING).map(|h| (3 + h + (h * 5) % 6) as f64).sum::<f64>();
        assert_eq!(clustering.qc.spots[0].total_counts, first_total);

        assert_eq!(clustering.umap.coords.dim(), (48, 2));
        assert!(clustering.corrected.embedding.iter().all(|v| v.is_finite()));

        // Every resolution labels every spot; four domains at every resolution
        let summary = clustering.ladder.summary();
        assert!(summary.monotonic);
        for c in clustering.ladder.clusterings() {
            assert_eq!(c.labels.len(), 48);
        }
        assert_eq!(results.active.n_clusters, 4);
        for spot in 0..48 {
            let domain = (spot % 16) / SPOTS_PER_GROUP;
            assert_eq!(results.active.labels[spot] as usize, domain, "spot {}", spot);
        }

        for cluster in 0..4u32 {
            let top = results.markers.top_n(cluster, 10);
            assert_eq!(top.len(), 10);
            for pair in top.windows(2) {
                assert!(pair[0].avg_log2fc >= pair[1].avg_log2fc);
            }
            for record in top {
                assert!(record.gene.starts_with(&format!("M{}_", cluster)), "{}", record.gene);
                assert_eq!(record.pct_in, 1.0);
                assert_eq!(record.pct_out, 0.0);
            }
        }

        let report = &results.module_scores.panels[0];
        assert_eq!(report.genes_missing, vec!["NOT_MEASURED".to_string()]);
        let scores = results.module_scores.score("domain0").unwrap();
        let in_domain: f64 = (0..48).filter(|s| s % 16 < 4).map(|s| scores[s]).sum::<f64>() / 12.0;
        let elsewhere: f64 = (0..48).filter(|s| s % 16 >= 4).map(|s| scores[s]).sum::<f64>() / 36.0;
        assert!(in_domain > elsewhere);

        let enrichment = results.enrichment.as_ref().unwrap();
        assert_eq!(enrichment.failed_clusters(), vec![2]);
        assert!(matches!(enrichment.outcome(0), Some(EnrichmentOutcome::Enriched(_))));
        assert!(matches!(enrichment.outcome(3), Some(EnrichmentOutcome::Enriched(_))));
        assert_eq!(enrichment.top_terms(1, 5).len(), 5);

        let layout = OutputLayout::create(&config.output_dir).unwrap();
        write_outputs(&layout, &results, &config.top_n_values).unwrap();
        for name in [
            "qc_spots.csv",
            "qc_samples.csv",
            "variable_genes.csv",
            "pca_variance.csv",
            "pca_embedding.csv",
            "corrected_embedding.csv",
            "umap.csv",
            "clusters.csv",
            "resolution_summary.csv",
            "markers_all.csv",
            "markers_top5.csv",
            "markers_top10.csv",
            "markers_top50.csv",
            "module_scores.csv",
            "enrichment.csv",
        ] {
            assert!(layout.table(name).is_file(), "{} missing", name);
        }
        let clusters = std::fs::read_to_string(layout.table("clusters.csv")).unwrap();
        let header = clusters.lines().next().unwrap();
        assert!(header.starts_with("spot_id,sample,res.0.1,res.0.2"));
        assert!(header.ends_with("res.1,active"));
    }

    #[test]
    fn test_seeded_runs_are_identical() {
        let tmp = TempDir::new().unwrap();
        let config = organoid_config(tmp.path());
        let a = run_pipeline(&config, None).unwrap();
        let b = run_pipeline(&config, None).unwrap();
        assert!(a.enrichment.is_none());
        assert_eq!(a.active.labels, b.active.labels);
        assert_eq!(a.clustering.umap.coords, b.clustering.umap.coords);
        assert_eq!(a.module_scores.scores, b.module_scores.scores);
        let genes_a: Vec<&str> = a.markers.iter().map(|r| r.gene.as_str()).collect();
        let genes_b: Vec<&str> = b.markers.iter().map(|r| r.gene.as_str()).collect();
        assert_eq!(genes_a, genes_b);
    }

    #[test]
    fn test_active_resolution_must_be_in_ladder() {
        let tmp = TempDir::new().unwrap();
        let mut config = organoid_config(tmp.path());
        let clustering = run_until_clustering(&config).unwrap();
        config.resolutions.push(2.0);
        config.active_resolution = 2.0;
        assert!(run_downstream(&config, clustering, None).is_err());
    }

    #[test]
    fn test_oversized_parameters_rejected_after_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = organoid_config(tmp.path());
        config.neighbor_k = 48;
        let err = run_until_clustering(&config).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Parameter);
    }
}
