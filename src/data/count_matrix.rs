//! Sparse spot-by-gene count matrix

use std::collections::{HashMap, HashSet};

use sprs::{CsMat, TriMat};

use crate::error::{Result, SpatialError};

/// Make names unique the way R's `make.unique` does: the first occurrence
/// keeps its name, later ones get `.1`, `.2`, ... skipping names already taken.
pub fn make_unique(names: Vec<String>) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for name in &names {
        *counts.entry(name.as_str()).or_insert(0) += 1;
    }
    if counts.values().all(|&c| c == 1) {
        return names;
    }

    let mut taken: HashSet<String> = names.iter().cloned().collect();
    let mut next_suffix: HashMap<String, usize> = HashMap::new();
    let mut first_seen: HashSet<String> = HashSet::new();
    let mut result = Vec::with_capacity(names.len());
    for name in names {
        if first_seen.insert(name.clone()) {
            result.push(name);
            continue;
        }
        let suffix = next_suffix.entry(name.clone()).or_insert(1);
        let mut candidate = format!("{}.{}", name, suffix);
        while taken.contains(&candidate) {
            *suffix += 1;
            candidate = format!("{}.{}", name, suffix);
        }
        *suffix += 1;
        log::warn!("Duplicate gene name '{}' renamed to '{}'", name, candidate);
        taken.insert(candidate.clone());
        result.push(candidate);
    }
    result
}

/// Raw UMI counts, rows are spots and columns are genes (CSR)
#[derive(Debug, Clone)]
pub struct SpotMatrix {
    counts: CsMat<f64>,
    gene_names: Vec<String>,
    spot_ids: Vec<String>,
}

impl SpotMatrix {
    /// Wrap a sparse matrix; CSC input is converted to CSR
    pub fn new(counts: CsMat<f64>, gene_names: Vec<String>, spot_ids: Vec<String>) -> Result<Self> {
        let (n_spots, n_genes) = counts.shape();

        if gene_names.len() != n_genes {
            return Err(SpatialError::DimensionMismatch {
                expected: format!("{} gene names", n_genes),
                got: format!("{} gene names", gene_names.len()),
            });
        }
        if spot_ids.len() != n_spots {
            return Err(SpatialError::DimensionMismatch {
                expected: format!("{} spot ids", n_spots),
                got: format!("{} spot ids", spot_ids.len()),
            });
        }
        if counts.data().iter().any(|&x| x < 0.0 || !x.is_finite()) {
            return Err(SpatialError::InvalidCountMatrix {
                reason: "Counts must be non-negative finite values".to_string(),
            });
        }

        let counts = if counts.is_csr() { counts } else { counts.to_csr() };

        Ok(Self {
            counts,
            gene_names: make_unique(gene_names),
            spot_ids,
        })
    }

    /// Build from (spot, gene, count) triplets; repeated coordinates are summed
    pub fn from_triplets(
        n_spots: usize,
        n_genes: usize,
        triplets: &[(usize, usize, f64)],
        gene_names: Vec<String>,
        spot_ids: Vec<String>,
    ) -> Result<Self> {
        let mut tri = TriMat::with_capacity((n_spots, n_genes), triplets.len());
        for &(spot, gene, value) in triplets {
            if spot >= n_spots || gene >= n_genes {
                return Err(SpatialError::InvalidCountMatrix {
                    reason: format!(
                        "entry ({}, {}) outside a {} x {} matrix",
                        spot, gene, n_spots, n_genes
                    ),
                });
            }
            tri.add_triplet(spot, gene, value);
        }
        Self::new(tri.to_csr(), gene_names, spot_ids)
    }

    pub fn n_spots(&self) -> usize {
        self.counts.rows()
    }

    pub fn n_genes(&self) -> usize {
        self.counts.cols()
    }

    pub fn counts(&self) -> &CsMat<f64> {
        &self.counts
    }

    pub fn gene_names(&self) -> &[String] {
        &self.gene_names
    }

    pub fn spot_ids(&self) -> &[String] {
        &self.spot_ids
    }

    pub fn gene_index(&self, gene: &str) -> Option<usize> {
        self.gene_names.iter().position(|g| g == gene)
    }

    /// Value at (spot, gene), zero when not stored
    pub fn get(&self, spot: usize, gene: usize) -> f64 {
        self.counts.get(spot, gene).copied().unwrap_or(0.0)
    }

    /// Total UMI count per spot
    pub fn spot_totals(&self) -> Vec<f64> {
        self.counts
            .outer_iterator()
            .map(|row| row.data().iter().sum())
            .collect()
    }

    /// Number of genes with a positive count per spot
    pub fn genes_detected(&self) -> Vec<usize> {
        self.counts
            .outer_iterator()
            .map(|row| row.data().iter().filter(|&&x| x > 0.0).count())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_make_unique() {
        let out = make_unique(names(&["A", "B", "A", "A", "C"]));
        assert_eq!(out, names(&["A", "B", "A.1", "A.2", "C"]));
    }

    #[test]
    fn test_make_unique_skips_taken() {
        let out = make_unique(names(&["A", "A.1", "A"]));
        assert_eq!(out, names(&["A", "A.1", "A.2"]));
    }

    #[test]
    fn test_from_triplets_sums_duplicates() {
        let m = SpotMatrix::from_triplets(
            2,
            3,
            &[(0, 0, 1.0), (0, 0, 2.0), (1, 2, 5.0)],
            names(&["g1", "g2", "g3"]),
            names(&["AAAC-1", "AAAG-1"]),
        )
        .unwrap();
        assert_eq!(m.get(0, 0), 3.0);
        assert_eq!(m.get(1, 1), 0.0);
        assert_eq!(m.spot_totals(), vec![3.0, 5.0]);
        assert_eq!(m.genes_detected(), vec![1, 1]);
    }

    #[test]
    fn test_negative_counts_rejected() {
        let result = SpotMatrix::from_triplets(1, 1, &[(0, 0, -1.0)], names(&["g"]), names(&["s"]));
        assert!(result.is_err());
    }

    #[test]
    fn test_out_of_range_triplet() {
        let result = SpotMatrix::from_triplets(1, 1, &[(0, 3, 1.0)], names(&["g"]), names(&["s"]));
        assert!(matches!(result, Err(SpatialError::InvalidCountMatrix { .. })));
    }
}
