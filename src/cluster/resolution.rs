//! Clustering over a ladder of resolutions and selection of the active one

use std::fmt;

use rayon::prelude::*;
use serde::Serialize;

use super::louvain::{louvain, LouvainParams};
use super::neighbors::SnnGraph;
use crate::error::{Result, SpatialError};

const RESOLUTION_TOL: f64 = 1e-9;

/// Labels for one resolution
#[derive(Debug, Clone)]
pub struct ResolutionClustering {
    pub resolution: f64,
    pub labels: Vec<u32>,
    pub n_clusters: usize,
    pub modularity: f64,
}

/// Cluster labels of every spot at the chosen resolution
#[derive(Debug, Clone)]
pub struct ClusterAssignment {
    pub resolution: f64,
    pub labels: Vec<u32>,
    pub n_clusters: usize,
}

impl ClusterAssignment {
    pub fn new(resolution: f64, labels: Vec<u32>) -> Self {
        let n_clusters = labels.iter().max().map_or(0, |&m| m as usize + 1);
        Self {
            resolution,
            labels,
            n_clusters,
        }
    }

    pub fn n_spots(&self) -> usize {
        self.labels.len()
    }

    pub fn cluster_ids(&self) -> Vec<u32> {
        (0..self.n_clusters as u32).collect()
    }

    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.n_clusters];
        for &l in &self.labels {
            sizes[l as usize] += 1;
        }
        sizes
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolutionSummaryRow {
    pub resolution: f64,
    pub n_clusters: usize,
    pub modularity: f64,
}

/// Cluster count per resolution, the diagnostic used to pick the active resolution
#[derive(Debug, Clone)]
pub struct ResolutionSummary {
    pub rows: Vec<ResolutionSummaryRow>,
    /// Cluster count never decreases as the resolution increases
    pub monotonic: bool,
}

impl fmt::Display for ResolutionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>10}  {:>10}  {:>10}", "resolution", "clusters", "modularity")?;
        for row in &self.rows {
            writeln!(
                f,
                "{:>10.2}  {:>10}  {:>10.4}",
                row.resolution, row.n_clusters, row.modularity
            )?;
        }
        if !self.monotonic {
            writeln!(f, "warning: cluster count is not monotonic in resolution")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ResolutionLadder {
    clusterings: Vec<ResolutionClustering>,
}

impl ResolutionLadder {
    pub fn clusterings(&self) -> &[ResolutionClustering] {
        &self.clusterings
    }

    pub fn resolutions(&self) -> Vec<f64> {
        self.clusterings.iter().map(|c| c.resolution).collect()
    }

    pub fn get(&self, resolution: f64) -> Option<&ResolutionClustering> {
        self.clusterings
            .iter()
            .find(|c| (c.resolution - resolution).abs() < RESOLUTION_TOL)
    }

    pub fn summary(&self) -> ResolutionSummary {
        let mut sorted: Vec<&ResolutionClustering> = self.clusterings.iter().collect();
        sorted.sort_by(|a, b| crate::stats::cmp_f64(a.resolution, b.resolution));
        let monotonic = sorted.windows(2).all(|w| w[1].n_clusters >= w[0].n_clusters);
        if !monotonic {
            log::warn!(
                "Cluster count decreases with increasing resolution: {}",
                sorted
                    .iter()
                    .map(|c| format!("{}={}", c.resolution, c.n_clusters))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        ResolutionSummary {
            rows: sorted
                .iter()
                .map(|c| ResolutionSummaryRow {
                    resolution: c.resolution,
                    n_clusters: c.n_clusters,
                    modularity: c.modularity,
                })
                .collect(),
            monotonic,
        }
    }

    /// Labels at the externally chosen `active` resolution
    pub fn select(&self, active: f64) -> Result<ClusterAssignment> {
        let clustering = self.get(active).ok_or_else(|| {
            SpatialError::parameter(
                "active_resolution",
                format!("{} is not among the clustered resolutions {:?}", active, self.resolutions()),
            )
        })?;
        log::info!(
            "Active resolution {}: {} clusters",
            clustering.resolution,
            clustering.n_clusters
        );
        Ok(ClusterAssignment {
            resolution: clustering.resolution,
            labels: clustering.labels.clone(),
            n_clusters: clustering.n_clusters,
        })
    }
}

/// Run Louvain at every resolution (in parallel); results keep the input order
pub fn cluster_resolutions(
    graph: &SnnGraph,
    resolutions: &[f64],
    params: &LouvainParams,
) -> Result<ResolutionLadder> {
    if resolutions.is_empty() {
        return Err(SpatialError::parameter("resolutions", "at least one resolution is required"));
    }
    let clusterings = resolutions
        .par_iter()
        .map(|&resolution| {
            let result = louvain(graph, resolution, params)?;
            log::info!(
                "Resolution {}: {} clusters (modularity {:.4})",
                resolution,
                result.n_clusters,
                result.modularity
            );
            Ok(ResolutionClustering {
                resolution,
                labels: result.labels,
                n_clusters: result.n_clusters,
                modularity: result.modularity,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ResolutionLadder { clusterings })
}
