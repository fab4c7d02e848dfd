//! Depth normalization followed by a natural-log transform

use sprs::CsMat;

use crate::data::SpotMatrix;

/// Log-normalized expression, spots x genes, same sparsity as the counts
#[derive(Debug, Clone)]
pub struct NormalizedExpression {
    data: CsMat<f64>,
    gene_names: Vec<String>,
    scale_factor: f64,
}

impl NormalizedExpression {
    /// Wrap an already-normalized CSR matrix
    pub fn from_parts(data: CsMat<f64>, gene_names: Vec<String>, scale_factor: f64) -> Self {
        let data = if data.is_csr() { data } else { data.to_csr() };
        Self {
            data,
            gene_names,
            scale_factor,
        }
    }

    /// Spots x genes (CSR)
    pub fn data(&self) -> &CsMat<f64> {
        &self.data
    }

    /// Genes x spots view as CSC of the spot-major matrix; one outer vector per gene
    pub fn by_gene(&self) -> CsMat<f64> {
        self.data.to_csc()
    }

    pub fn gene_names(&self) -> &[String] {
        &self.gene_names
    }

    pub fn gene_index(&self, gene: &str) -> Option<usize> {
        self.gene_names.iter().position(|g| g == gene)
    }

    pub fn n_spots(&self) -> usize {
        self.data.rows()
    }

    pub fn n_genes(&self) -> usize {
        self.data.cols()
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }
}

/// `ln(1 + count / spot_total * scale_factor)` for every stored entry.
///
/// Spots without counts stay all-zero.
pub fn log_normalize(counts: &SpotMatrix, scale_factor: f64) -> NormalizedExpression {
    let totals = counts.spot_totals();
    let empty = totals.iter().filter(|&&t| t == 0.0).count();
    if empty > 0 {
        log::warn!("{} spots have zero total counts and stay all-zero after normalization", empty);
    }

    let raw = counts.counts();
    let mut data = Vec::with_capacity(raw.nnz());
    for (row, total) in raw.outer_iterator().zip(totals.iter()) {
        for &value in row.data() {
            data.push(if *total > 0.0 {
                (value / total * scale_factor).ln_1p()
            } else {
                0.0
            });
        }
    }

    let normalized = CsMat::new(
        raw.shape(),
        raw.indptr().raw_storage().to_vec(),
        raw.indices().to_vec(),
        data,
    );
    log::debug!("Log-normalized {} stored values (scale factor {})", raw.nnz(), scale_factor);

    NormalizedExpression {
        data: normalized,
        gene_names: counts.gene_names().to_vec(),
        scale_factor,
    }
}
