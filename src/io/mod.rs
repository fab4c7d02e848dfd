//! Reading 10x Visium sample directories and writing result tables

mod image;
mod loader;
mod matrix;
mod positions;
mod tables;

pub use self::image::read_tissue_image;
pub use loader::{load_dataset, load_sample};
pub use matrix::{read_10x_mtx, read_count_matrix};
pub use positions::{align_positions, read_positions, read_scale_factors};
pub use tables::{
    write_clusters, write_embedding, write_enrichment, write_markers, write_module_scores,
    write_pca_variance, write_qc, write_resolution_summary, write_variable_genes, OutputLayout,
};

#[cfg(test)]
pub(crate) use loader::tests::write_sample;
