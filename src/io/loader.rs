//! Sample loading and merging

use rayon::prelude::*;

use super::image::{check_image_exists, read_tissue_image};
use super::matrix::read_count_matrix;
use super::positions::{align_positions, read_positions, read_scale_factors};
use crate::config::{PipelineConfig, SampleSpec};
use crate::data::{Sample, SampleData, SpatialDataset};
use crate::error::{Result, SpatialError};

/// Attach the sample id to any error that does not already carry it
fn in_sample<T>(sample_id: &str, result: Result<T>) -> Result<T> {
    result.map_err(|e| match e {
        SpatialError::SampleLoad { .. } | SpatialError::SpotCountMismatch { .. } => e,
        other => SpatialError::sample_load(sample_id, other),
    })
}

/// Load one sample: counts, positions, scale factors and (optionally) the image
pub fn load_sample(config: &PipelineConfig, spec: &SampleSpec) -> Result<SampleData> {
    let id = spec.id.as_str();

    let matrix_path = config.resolve(&spec.matrix);
    log::info!("[{}] Loading count matrix from: {}", id, matrix_path.display());
    let counts = in_sample(id, read_count_matrix(&matrix_path))?;
    log::info!("[{}]   {} spots, {} genes", id, counts.n_spots(), counts.n_genes());

    let positions_path = config.resolve(&spec.positions);
    let listed = in_sample(id, read_positions(&positions_path))?;
    let positions = align_positions(id, counts.spot_ids(), &listed)?;

    let scale_factors = in_sample(id, read_scale_factors(config.resolve(&spec.scale_factors)))?;

    let image = match &spec.image {
        Some(rel) => {
            let path = config.resolve(rel);
            in_sample(id, check_image_exists(&path))?;
            if config.load_images {
                Some(in_sample(id, read_tissue_image(&path))?)
            } else {
                None
            }
        }
        None => None,
    };

    Ok(SampleData {
        sample: Sample {
            id: spec.id.clone(),
            tissue: spec.tissue.clone(),
            scale_factors,
            image,
        },
        counts,
        positions,
    })
}

/// Load every sample in the table (in parallel) and merge them.
/// Any sample failure stops the load.
pub fn load_dataset(config: &PipelineConfig) -> Result<SpatialDataset> {
    let parts: Vec<SampleData> = config
        .sample_table
        .par_iter()
        .map(|spec| load_sample(config, spec))
        .collect::<Result<Vec<_>>>()?;

    let dataset = SpatialDataset::merge(parts)?;
    log::info!(
        "Merged {} samples: {} spots ({:?} per sample), {} genes",
        dataset.n_samples(),
        dataset.n_spots(),
        dataset.spots_per_sample(),
        dataset.n_genes()
    );
    Ok(dataset)
}
