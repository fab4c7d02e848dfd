//! Multiple-testing adjustment
//!
//! - Bonferroni family-wise correction over an explicit number of tests
//!   (marker p-values are adjusted for every gene in the dataset, not only
//!   the genes that were tested)
//! - Benjamini-Hochberg FDR, used for gene-set over-representation

/// Bonferroni adjustment `min(1, p * n_tests)`; NaN stays NaN
pub fn bonferroni(pvalues: &[f64], n_tests: usize) -> Vec<f64> {
    let m = n_tests.max(1) as f64;
    pvalues
        .iter()
        .map(|&p| if p.is_nan() { f64::NAN } else { (p * m).min(1.0) })
        .collect()
}

/// Benjamini-Hochberg adjusted p-values, equivalent to `p.adjust(method = "BH")`.
///
/// NaN p-values are excluded from the test count and stay NaN.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let n = pvalues.len();
    let mut order: Vec<usize> = (0..n).filter(|&i| !pvalues[i].is_nan()).collect();
    let m = order.len();
    let mut padj = vec![f64::NAN; n];
    if m == 0 {
        return padj;
    }
    order.sort_by(|&a, &b| crate::stats::cmp_f64(pvalues[a], pvalues[b]));

    let mut running_min = f64::INFINITY;
    for (pos, &i) in order.iter().enumerate().rev() {
        let rank = (pos + 1) as f64;
        running_min = running_min.min(pvalues[i] * m as f64 / rank);
        padj[i] = running_min.min(1.0);
    }
    padj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bh_matches_r() {
        // p.adjust(c(0.01, 0.04, 0.03, 0.02), "BH") = 0.04 0.04 0.04 0.04
        let padj = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.02]);
        for adj in padj {
            assert!((adj - 0.04).abs() < 1e-12);
        }
        // p.adjust(c(0.001, 0.01, 0.05, 0.5), "BH") = 0.004 0.02 0.0666.. 0.5
        let padj = benjamini_hochberg(&[0.001, 0.01, 0.05, 0.5]);
        assert!((padj[0] - 0.004).abs() < 1e-12);
        assert!((padj[1] - 0.02).abs() < 1e-12);
        assert!((padj[2] - 0.05 * 4.0 / 3.0).abs() < 1e-12);
        assert!((padj[3] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_bh_with_nan() {
        let padj = benjamini_hochberg(&[0.01, f64::NAN, 0.03, 0.02]);
        assert!(padj[1].is_nan());
        assert!((padj[0] - 0.03).abs() < 1e-12);
        assert!((padj[2] - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_bonferroni_uses_total_tests() {
        let padj = bonferroni(&[0.001, 0.2, f64::NAN], 100);
        assert!((padj[0] - 0.1).abs() < 1e-12);
        assert_eq!(padj[1], 1.0);
        assert!(padj[2].is_nan());
    }
}
