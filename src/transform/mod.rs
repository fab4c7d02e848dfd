//! Feature selection and dimensionality reduction
//!
//! Variable gene selection on raw counts, scaling of the selected genes and
//! PCA on the scaled matrix.

mod hvg;
mod loess;
mod pca;
mod scale;

pub use hvg::{find_variable_genes, GeneVariance, VariableGenes};
pub use loess::LocalQuadraticFit;
pub use pca::{run_pca, PcaParams, PcaResult};
pub use scale::{scale_data, ScaledData};
