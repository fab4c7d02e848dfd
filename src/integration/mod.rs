//! Batch-effect correction of the PCA embedding
//!
//! Correction is a pluggable step behind [`BatchCorrector`]; the pipeline
//! uses [`Harmony`] and [`NoCorrection`] is available for single-sample runs
//! or to inspect uncorrected structure.

mod harmony;

pub use harmony::{Harmony, HarmonyParams};

use ndarray::Array2;

use crate::error::{Result, SpatialError};
use crate::transform::PcaResult;

/// Batch-corrected embedding, same shape as the PCA embedding
#[derive(Debug, Clone)]
pub struct CorrectedEmbedding {
    /// Spots x components
    pub embedding: Array2<f64>,
    pub iterations: usize,
    pub converged: bool,
}

pub trait BatchCorrector {
    /// Correct `pca.embedding` given one batch label per spot
    fn correct(&self, pca: &PcaResult, batches: &[usize]) -> Result<CorrectedEmbedding>;

    fn name(&self) -> &'static str;
}

/// Identity correction
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCorrection;

impl BatchCorrector for NoCorrection {
    fn correct(&self, pca: &PcaResult, batches: &[usize]) -> Result<CorrectedEmbedding> {
        check_batches(pca, batches)?;
        Ok(CorrectedEmbedding {
            embedding: pca.embedding.clone(),
            iterations: 0,
            converged: true,
        })
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

pub(crate) fn check_batches(pca: &PcaResult, batches: &[usize]) -> Result<()> {
    if batches.len() != pca.embedding.nrows() {
        return Err(SpatialError::DimensionMismatch {
            expected: format!("{} batch labels", pca.embedding.nrows()),
            got: format!("{} batch labels", batches.len()),
        });
    }
    Ok(())
}
