//! Functional enrichment of cluster markers
//!
//! The analysis itself is delegated to an [`EnrichmentBackend`]: the
//! g:Profiler web service (feature `gprofiler`) or an offline
//! over-representation test against a GMT gene-set file. Each cluster is
//! queried independently; a failing cluster is recorded as such and does not
//! affect the others.

mod gmt;
#[cfg(feature = "gprofiler")]
mod gprofiler;

pub use gmt::{GeneSet, GmtBackend};
#[cfg(feature = "gprofiler")]
pub use gprofiler::GProfiler;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpatialError};
use crate::markers::MarkerTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentBackendKind {
    GProfiler,
    Gmt,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub backend: EnrichmentBackendKind,
    pub organism: String,
    /// Annotation sources, e.g. "GO:BP", "KEGG", "REAC"
    pub sources: Vec<String>,
    /// Treat the query as ranked by importance
    pub ordered: bool,
    /// Markers per cluster sent as the query
    pub top_genes: usize,
    /// Terms per cluster highlighted in the report
    pub highlight_terms: usize,
    pub user_threshold: f64,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub gmt_path: Option<PathBuf>,
    /// Source label reported for GMT terms
    pub gmt_source: String,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            backend: EnrichmentBackendKind::GProfiler,
            organism: "hsapiens".to_string(),
            sources: vec!["GO:BP".to_string()],
            ordered: true,
            top_genes: 10,
            highlight_terms: 5,
            user_threshold: 0.05,
            base_url: "https://biit.cs.ut.ee/gprofiler".to_string(),
            timeout_secs: 30,
            max_retries: 2,
            gmt_path: None,
            gmt_source: "GMT".to_string(),
        }
    }
}

impl EnrichmentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.top_genes == 0 {
            return Err(SpatialError::parameter("enrichment.top_genes", "must be at least 1"));
        }
        if !(self.user_threshold > 0.0 && self.user_threshold <= 1.0) {
            return Err(SpatialError::parameter("enrichment.user_threshold", "must be in (0, 1]"));
        }
        if self.backend == EnrichmentBackendKind::Gmt && self.gmt_path.is_none() {
            return Err(SpatialError::parameter(
                "enrichment.gmt_path",
                "the gmt backend needs a gene-set file",
            ));
        }
        Ok(())
    }
}

/// Gene list of one cluster sent to a backend
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentQuery {
    pub cluster: u32,
    pub genes: Vec<String>,
    pub organism: String,
    pub sources: Vec<String>,
    pub ordered: bool,
    pub user_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentTerm {
    pub cluster: u32,
    /// 1-based position in the backend's ranking
    pub rank: usize,
    pub term_id: String,
    pub term_name: String,
    pub source: String,
    pub p_value: f64,
    pub term_size: usize,
    pub intersection_size: usize,
}

pub trait EnrichmentBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Enriched terms for one query, best first
    fn enrich(&self, query: &EnrichmentQuery) -> Result<Vec<EnrichmentTerm>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentOutcome {
    Enriched(Vec<EnrichmentTerm>),
    /// The backend answered but nothing passed the threshold
    Empty,
    /// The cluster had no markers to query with
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct EnrichmentReport {
    pub backend: String,
    /// Terms per cluster highlighted in the summary and tables
    pub highlight: usize,
    outcomes: BTreeMap<u32, EnrichmentOutcome>,
}

impl EnrichmentReport {
    pub fn new(backend: &str, highlight: usize, outcomes: BTreeMap<u32, EnrichmentOutcome>) -> Self {
        Self {
            backend: backend.to_string(),
            highlight,
            outcomes,
        }
    }

    pub fn outcome(&self, cluster: u32) -> Option<&EnrichmentOutcome> {
        self.outcomes.get(&cluster)
    }

    pub fn outcomes(&self) -> impl Iterator<Item = (u32, &EnrichmentOutcome)> {
        self.outcomes.iter().map(|(&c, o)| (c, o))
    }

    /// The first `n` terms of `cluster`, empty unless it was enriched
    pub fn top_terms(&self, cluster: u32, n: usize) -> &[EnrichmentTerm] {
        match self.outcomes.get(&cluster) {
            Some(EnrichmentOutcome::Enriched(terms)) => &terms[..n.min(terms.len())],
            _ => &[],
        }
    }

    /// The highlighted terms of `cluster`
    pub fn highlighted(&self, cluster: u32) -> &[EnrichmentTerm] {
        self.top_terms(cluster, self.highlight)
    }

    pub fn terms(&self) -> impl Iterator<Item = &EnrichmentTerm> {
        self.outcomes.values().flat_map(|o| match o {
            EnrichmentOutcome::Enriched(terms) => terms.as_slice(),
            _ => &[],
        })
    }

    pub fn failed_clusters(&self) -> Vec<u32> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, EnrichmentOutcome::Failed { .. }))
            .map(|(&c, _)| c)
            .collect()
    }

    pub fn is_partial(&self) -> bool {
        !self.failed_clusters().is_empty()
    }
}

impl fmt::Display for EnrichmentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Enrichment ({}):", self.backend)?;
        for (cluster, outcome) in &self.outcomes {
            match outcome {
                EnrichmentOutcome::Enriched(terms) => {
                    writeln!(f, "  cluster {}: {} terms", cluster, terms.len())?;
                    for t in self.highlighted(*cluster) {
                        writeln!(
                            f,
                            "    {:>2}. {} {} ({:.2e})",
                            t.rank, t.term_id, t.term_name, t.p_value
                        )?;
                    }
                }
                EnrichmentOutcome::Empty => writeln!(f, "  cluster {}: no significant terms", cluster)?,
                EnrichmentOutcome::Skipped { reason } => {
                    writeln!(f, "  cluster {}: skipped ({})", cluster, reason)?
                }
                EnrichmentOutcome::Failed { reason } => {
                    writeln!(f, "  cluster {}: FAILED ({})", cluster, reason)?
                }
            }
        }
        Ok(())
    }
}

/// Backend selected by the configuration; `None` when enrichment is disabled
pub fn build_backend(
    config: &EnrichmentConfig,
    root: &Path,
    universe: &[String],
) -> Result<Option<Box<dyn EnrichmentBackend>>> {
    match config.backend {
        EnrichmentBackendKind::None => Ok(None),
        EnrichmentBackendKind::Gmt => {
            let path = config.gmt_path.as_ref().ok_or_else(|| {
                SpatialError::parameter("enrichment.gmt_path", "the gmt backend needs a gene-set file")
            })?;
            let path = if path.is_absolute() { path.clone() } else { root.join(path) };
            let backend = GmtBackend::from_path(&path, &config.gmt_source)?.with_universe(universe);
            Ok(Some(Box::new(backend)))
        }
        #[cfg(feature = "gprofiler")]
        EnrichmentBackendKind::GProfiler => Ok(Some(Box::new(GProfiler::new(
            &config.base_url,
            std::time::Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )))),
        #[cfg(not(feature = "gprofiler"))]
        EnrichmentBackendKind::GProfiler => Err(SpatialError::parameter(
            "enrichment.backend",
            "gprofiler backend requires the `gprofiler` feature",
        )),
    }
}

/// Query the backend once per cluster with its top markers
pub fn run_enrichment(
    markers: &MarkerTable,
    clusters: &[u32],
    backend: &dyn EnrichmentBackend,
    config: &EnrichmentConfig,
) -> EnrichmentReport {
    let outcomes: BTreeMap<u32, EnrichmentOutcome> = clusters
        .par_iter()
        .map(|&cluster| {
            let genes: Vec<String> = markers
                .top_n(cluster, config.top_genes)
                .iter()
                .map(|r| r.gene.clone())
                .collect();
            if genes.is_empty() {
                log::info!("Cluster {}: no markers, enrichment skipped", cluster);
                return (cluster, EnrichmentOutcome::Skipped {
                    reason: "no marker genes".to_string(),
                });
            }
            let query = EnrichmentQuery {
                cluster,
                genes,
                organism: config.organism.clone(),
                sources: config.sources.clone(),
                ordered: config.ordered,
                user_threshold: config.user_threshold,
            };
            let outcome = match backend.enrich(&query) {
                Ok(terms) if terms.is_empty() => EnrichmentOutcome::Empty,
                Ok(terms) => EnrichmentOutcome::Enriched(terms),
                Err(e) => {
                    log::warn!("Cluster {}: enrichment failed: {}", cluster, e);
                    EnrichmentOutcome::Failed { reason: e.to_string() }
                }
            };
            (cluster, outcome)
        })
        .collect();

    let report = EnrichmentReport::new(backend.name(), config.highlight_terms, outcomes);
    let failed = report.failed_clusters();
    if !failed.is_empty() {
        log::warn!(
            "Enrichment results are partial: {} of {} clusters failed ({:?})",
            failed.len(),
            clusters.len(),
            failed
        );
    }
    log::info!("Enrichment finished for {} clusters via {}", clusters.len(), backend.name());
    report
}
