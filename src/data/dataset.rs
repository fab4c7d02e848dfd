//! The merged multi-sample dataset

use std::collections::HashMap;

use sprs::CsMat;

use super::count_matrix::SpotMatrix;
use super::sample::{Sample, SpotPosition};
use crate::error::{Result, SpatialError};

/// A capture location on the slide
#[derive(Debug, Clone)]
pub struct Spot {
    /// Index into `SpatialDataset::samples`
    pub sample: usize,
    pub barcode: String,
    pub position: SpotPosition,
}

/// One sample as read from disk, before merging
#[derive(Debug, Clone)]
pub struct SampleData {
    pub sample: Sample,
    /// Spot barcodes are `counts.spot_ids()`; positions are aligned with them
    pub counts: SpotMatrix,
    pub positions: Vec<SpotPosition>,
}

/// All samples on a shared gene vocabulary.
///
/// Spots are stored sample by sample in configuration order. The count
/// matrix covers the union of all samples' genes; a gene a sample never
/// measured is zero for that sample's spots.
#[derive(Debug, Clone)]
pub struct SpatialDataset {
    samples: Vec<Sample>,
    spots: Vec<Spot>,
    matrix: SpotMatrix,
}

impl SpatialDataset {
    /// Merge per-sample data onto the union gene vocabulary
    pub fn merge(parts: Vec<SampleData>) -> Result<Self> {
        if parts.is_empty() {
            return Err(SpatialError::EmptyData {
                reason: "No samples to merge".to_string(),
            });
        }

        let mut gene_names: Vec<String> = Vec::new();
        let mut gene_lookup: HashMap<String, usize> = HashMap::new();
        for part in &parts {
            if part.positions.len() != part.counts.n_spots() {
                return Err(SpatialError::SpotCountMismatch {
                    sample_id: part.sample.id.clone(),
                    matrix_spots: part.counts.n_spots(),
                    position_spots: part.positions.len(),
                });
            }
            for gene in part.counts.gene_names() {
                if !gene_lookup.contains_key(gene) {
                    gene_lookup.insert(gene.clone(), gene_names.len());
                    gene_names.push(gene.clone());
                }
            }
        }

        let n_spots: usize = parts.iter().map(|p| p.counts.n_spots()).sum();
        let nnz: usize = parts.iter().map(|p| p.counts.counts().nnz()).sum();
        let mut indptr = Vec::with_capacity(n_spots + 1);
        let mut indices = Vec::with_capacity(nnz);
        let mut data = Vec::with_capacity(nnz);
        indptr.push(0);

        let mut samples = Vec::with_capacity(parts.len());
        let mut spots = Vec::with_capacity(n_spots);
        let mut spot_ids = Vec::with_capacity(n_spots);

        for (sample_idx, part) in parts.into_iter().enumerate() {
            let remap: Vec<usize> = part
                .counts
                .gene_names()
                .iter()
                .map(|g| gene_lookup[g])
                .collect();

            for (row, barcode) in part.counts.counts().outer_iterator().zip(part.counts.spot_ids()) {
                let mut entries: Vec<(usize, f64)> =
                    row.iter().map(|(col, &v)| (remap[col], v)).collect();
                entries.sort_unstable_by_key(|&(col, _)| col);
                for (col, v) in entries {
                    indices.push(col);
                    data.push(v);
                }
                indptr.push(indices.len());
                spot_ids.push(format!("{}_{}", part.sample.id, barcode));
            }

            for (barcode, position) in part.counts.spot_ids().iter().zip(part.positions.iter()) {
                spots.push(Spot {
                    sample: sample_idx,
                    barcode: barcode.clone(),
                    position: *position,
                });
            }
            samples.push(part.sample);
        }

        let counts = CsMat::new((n_spots, gene_names.len()), indptr, indices, data);
        let matrix = SpotMatrix::new(counts, gene_names, spot_ids)?;

        Ok(Self {
            samples,
            spots,
            matrix,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn n_spots(&self) -> usize {
        self.spots.len()
    }

    pub fn n_genes(&self) -> usize {
        self.matrix.n_genes()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn spots(&self) -> &[Spot] {
        &self.spots
    }

    /// Raw counts, spots x genes
    pub fn matrix(&self) -> &SpotMatrix {
        &self.matrix
    }

    pub fn gene_names(&self) -> &[String] {
        self.matrix.gene_names()
    }

    /// Spot ids of the form `{sample_id}_{barcode}`
    pub fn spot_ids(&self) -> &[String] {
        self.matrix.spot_ids()
    }

    /// Sample index of every spot, used as the batch label
    pub fn batch_labels(&self) -> Vec<usize> {
        self.spots.iter().map(|s| s.sample).collect()
    }

    pub fn sample_id_of(&self, spot: usize) -> &str {
        &self.samples[self.spots[spot].sample].id
    }

    /// Number of spots contributed by each sample
    pub fn spots_per_sample(&self) -> Vec<usize> {
        let mut counts = vec![0; self.samples.len()];
        for spot in &self.spots {
            counts[spot.sample] += 1;
        }
        counts
    }
}
