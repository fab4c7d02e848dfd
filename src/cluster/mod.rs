//! Spot clustering and 2-D layout
//!
//! Neighbors are computed on the leading components of the corrected
//! embedding; the SNN graph feeds Louvain at each configured resolution and
//! UMAP gives the display layout.

mod louvain;
mod neighbors;
mod resolution;
mod umap;

pub use louvain::{louvain, LouvainParams, LouvainResult};
pub use neighbors::{build_snn_graph, knn, NeighborLists, SnnGraph};
pub use resolution::{
    cluster_resolutions, ClusterAssignment, ResolutionClustering, ResolutionLadder,
    ResolutionSummary, ResolutionSummaryRow,
};
pub use umap::{run_umap, UmapEmbedding, UmapParams};
