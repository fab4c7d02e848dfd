//! rust_visium: spatial transcriptomics (10x Visium) analysis in Rust
//!
//! Loads several Visium samples onto a shared gene vocabulary, reports QC,
//! log-normalizes, selects variable genes, runs PCA, removes sample effects
//! with Harmony, clusters spots at several resolutions, then finds cluster
//! markers, scores curated gene panels and runs functional enrichment on the
//! markers of each cluster.
//!
//! # Example
//!
//! ```ignore
//! use rust_visium::prelude::*;
//!
//! let config = PipelineConfig::from_path("organoid.toml")?;
//!
//! // Inspect the cluster count per resolution first
//! let clustering = run_until_clustering(&config)?;
//! println!("{}", clustering.ladder.summary());
//!
//! // Markers, module scores and enrichment at `active_resolution`
//! let results = run_downstream(&config, clustering, None)?;
//! let layout = OutputLayout::create(&config.output_dir)?;
//! write_outputs(&layout, &results, &config.top_n_values)?;
//! ```

pub mod cli;
pub mod cluster;
pub mod config;
pub mod data;
pub mod enrichment;
pub mod error;
pub mod integration;
pub mod io;
pub mod linalg;
pub mod markers;
pub mod normalization;
pub mod pipeline;
pub mod qc;
pub mod rng;
pub mod scoring;
pub mod stats;
pub mod testing;
pub mod transform;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cluster::{
        build_snn_graph, cluster_resolutions, louvain, run_umap, ClusterAssignment, LouvainParams,
        ResolutionLadder, SnnGraph, UmapEmbedding, UmapParams,
    };
    pub use crate::config::{PipelineConfig, SampleSpec};
    pub use crate::data::{Sample, SpatialDataset, Spot, SpotMatrix};
    pub use crate::enrichment::{
        run_enrichment, EnrichmentBackend, EnrichmentBackendKind, EnrichmentConfig, EnrichmentOutcome,
        EnrichmentReport, EnrichmentTerm, GmtBackend,
    };
    pub use crate::error::{Result, SpatialError};
    pub use crate::integration::{BatchCorrector, CorrectedEmbedding, Harmony, HarmonyParams, NoCorrection};
    pub use crate::io::{load_dataset, load_sample, write_qc, OutputLayout};
    pub use crate::markers::{find_all_markers, MarkerParams, MarkerRecord, MarkerTable};
    pub use crate::normalization::{log_normalize, NormalizedExpression};
    pub use crate::pipeline::{
        cluster_dataset, run_downstream, run_pipeline, run_until_clustering, write_clustering_outputs,
        write_outputs, AnalysisResults, ClusteringResults,
    };
    pub use crate::qc::{compute_qc, QcReport};
    pub use crate::scoring::{score_modules, GenePanel, ModuleScores, ScoreParams};
    pub use crate::transform::{find_variable_genes, run_pca, scale_data, PcaParams, PcaResult};
}
