//! Per-gene centering and scaling of the variable genes

use ndarray::Array2;

use crate::error::{Result, SpatialError};
use crate::normalization::NormalizedExpression;
use crate::stats::{mean, sample_variance};

/// Dense spots x genes matrix of z-scores for the selected genes
#[derive(Debug, Clone)]
pub struct ScaledData {
    pub data: Array2<f64>,
    pub genes: Vec<String>,
    /// Column of each gene in the normalized matrix
    pub gene_indices: Vec<usize>,
    pub means: Vec<f64>,
    pub sds: Vec<f64>,
}

impl ScaledData {
    pub fn n_spots(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_genes(&self) -> usize {
        self.data.ncols()
    }
}

/// Center and scale each gene in `gene_indices`, clipping at `scale_max`.
///
/// The standard deviation uses the n - 1 denominator; genes without variance
/// become an all-zero column.
pub fn scale_data(
    expr: &NormalizedExpression,
    gene_indices: &[usize],
    scale_max: f64,
) -> Result<ScaledData> {
    let n_spots = expr.n_spots();
    if n_spots < 2 {
        return Err(SpatialError::EmptyData {
            reason: "scaling needs at least two spots".to_string(),
        });
    }
    if let Some(&bad) = gene_indices.iter().find(|&&g| g >= expr.n_genes()) {
        return Err(SpatialError::InvalidInput {
            reason: format!("gene index {} out of range ({} genes)", bad, expr.n_genes()),
        });
    }

    let by_gene = expr.by_gene();
    let mut data = Array2::<f64>::zeros((n_spots, gene_indices.len()));
    let mut means = Vec::with_capacity(gene_indices.len());
    let mut sds = Vec::with_capacity(gene_indices.len());
    let mut constant = 0usize;

    for (j, &g) in gene_indices.iter().enumerate() {
        let mut column = vec![0.0; n_spots];
        if let Some(col) = by_gene.outer_view(g) {
            for (spot, &v) in col.iter() {
                column[spot] = v;
            }
        }
        let center = mean(&column);
        let sd = sample_variance(&column).sqrt();

        if sd > 0.0 {
            for (spot, v) in column.iter().enumerate() {
                data[[spot, j]] = ((v - center) / sd).min(scale_max);
            }
        } else {
            constant += 1;
        }
        means.push(center);
        sds.push(sd);
    }

    if constant > 0 {
        log::warn!("{} selected genes have zero variance and scale to 0", constant);
    }
    log::info!(
        "Scaled {} genes across {} spots (clipped at {})",
        gene_indices.len(),
        n_spots,
        scale_max
    );

    Ok(ScaledData {
        data,
        genes: gene_indices.iter().map(|&g| expr.gene_names()[g].clone()).collect(),
        gene_indices: gene_indices.to_vec(),
        means,
        sds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprs::TriMat;

    fn expr() -> NormalizedExpression {
        // gene 0: 1,2,3,4 ; gene 1: constant 5 ; gene 2: one outlier
        let mut tri = TriMat::new((4, 3));
        for s in 0..4 {
            tri.add_triplet(s, 0, (s + 1) as f64);
            tri.add_triplet(s, 1, 5.0);
        }
        tri.add_triplet(0, 2, 100.0);
        NormalizedExpression::from_parts(
            tri.to_csr(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            1e4,
        )
    }

    #[test]
    fn test_center_and_scale() {
        let scaled = scale_data(&expr(), &[0], 10.0).unwrap();
        let sd = (5.0f64 / 3.0).sqrt();
        assert!((scaled.means[0] - 2.5).abs() < 1e-12);
        assert!((scaled.sds[0] - sd).abs() < 1e-12);
        assert!((scaled.data[[0, 0]] - (-1.5 / sd)).abs() < 1e-12);
        let col_sum: f64 = scaled.data.column(0).sum();
        assert!(col_sum.abs() < 1e-12);
    }

    #[test]
    fn test_constant_gene_is_zero() {
        let scaled = scale_data(&expr(), &[1], 10.0).unwrap();
        assert!(scaled.data.iter().all(|&v| v == 0.0));
        assert_eq!(scaled.sds[0], 0.0);
    }

    #[test]
    fn test_clipping() {
        let scaled = scale_data(&expr(), &[2, 0], 1.0).unwrap();
        assert_eq!(scaled.genes, vec!["c".to_string(), "a".to_string()]);
        assert!(scaled.data.iter().all(|&v| v <= 1.0));
        assert_eq!(scaled.data[[0, 0]], 1.0);
    }

    #[test]
    fn test_index_out_of_range() {
        assert!(scale_data(&expr(), &[3], 10.0).is_err());
    }
}
