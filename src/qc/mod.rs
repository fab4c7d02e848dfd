//! Per-spot and per-sample quality-control metrics
//!
//! The report is descriptive: it is logged and written out, but no spot is
//! removed on the basis of these numbers.

use serde::Serialize;

use crate::data::SpatialDataset;
use crate::stats::{mean, median, min_max};

/// Depth metrics for one spot
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpotQc {
    pub total_counts: f64,
    pub n_genes: usize,
}

/// Distribution of the spot metrics within one sample
#[derive(Debug, Clone, Serialize)]
pub struct SampleQcSummary {
    pub sample_id: String,
    pub n_spots: usize,
    pub mean_counts: f64,
    pub median_counts: f64,
    pub min_counts: f64,
    pub max_counts: f64,
    pub mean_genes: f64,
    pub median_genes: f64,
    pub min_genes: f64,
    pub max_genes: f64,
    /// Spots without a single count
    pub empty_spots: usize,
}

#[derive(Debug, Clone)]
pub struct QcReport {
    /// One entry per spot, in dataset order
    pub spots: Vec<SpotQc>,
    pub samples: Vec<SampleQcSummary>,
}

/// Compute total counts and detected genes for every spot
pub fn compute_qc(dataset: &SpatialDataset) -> QcReport {
    let totals = dataset.matrix().spot_totals();
    let detected = dataset.matrix().genes_detected();
    let spots: Vec<SpotQc> = totals
        .iter()
        .zip(detected.iter())
        .map(|(&total_counts, &n_genes)| SpotQc { total_counts, n_genes })
        .collect();

    let mut per_sample_counts: Vec<Vec<f64>> = vec![Vec::new(); dataset.n_samples()];
    let mut per_sample_genes: Vec<Vec<f64>> = vec![Vec::new(); dataset.n_samples()];
    for (spot, qc) in dataset.spots().iter().zip(spots.iter()) {
        per_sample_counts[spot.sample].push(qc.total_counts);
        per_sample_genes[spot.sample].push(qc.n_genes as f64);
    }

    let samples = dataset
        .samples()
        .iter()
        .zip(per_sample_counts.iter().zip(per_sample_genes.iter()))
        .map(|(sample, (counts, genes))| {
            let (min_counts, max_counts) = min_max(counts).unwrap_or((f64::NAN, f64::NAN));
            let (min_genes, max_genes) = min_max(genes).unwrap_or((f64::NAN, f64::NAN));
            let empty_spots = counts.iter().filter(|&&c| c == 0.0).count();
            if empty_spots > 0 {
                log::warn!("[{}] {} spots have zero counts", sample.id, empty_spots);
            }
            SampleQcSummary {
                sample_id: sample.id.clone(),
                n_spots: counts.len(),
                mean_counts: mean(counts),
                median_counts: median(counts),
                min_counts,
                max_counts,
                mean_genes: mean(genes),
                median_genes: median(genes),
                min_genes,
                max_genes,
                empty_spots,
            }
        })
        .collect();

    QcReport { spots, samples }
}

impl QcReport {
    pub fn total_spots(&self) -> usize {
        self.spots.len()
    }
}

impl std::fmt::Display for QcReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Spot QC Summary")?;
        writeln!(f, "===============")?;
        writeln!(f, "Total spots: {}", self.total_spots())?;
        for s in &self.samples {
            writeln!(
                f,
                "  {}: {} spots, UMI median {:.0} (range {:.0}-{:.0}), genes median {:.0} (range {:.0}-{:.0})",
                s.sample_id,
                s.n_spots,
                s.median_counts,
                s.min_counts,
                s.max_counts,
                s.median_genes,
                s.min_genes,
                s.max_genes
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures::sample_data;

    #[test]
    fn test_qc_metrics() {
        let s1 = sample_data("S1", &["A", "B", "C"], 3, |s, g| if g <= s { 2.0 } else { 0.0 });
        let s2 = sample_data("S2", &["A"], 2, |s, _| s as f64);
        let ds = SpatialDataset::merge(vec![s1, s2]).unwrap();
        let qc = compute_qc(&ds);

        assert_eq!(qc.total_spots(), 5);
        assert_eq!(qc.spots[0], SpotQc { total_counts: 2.0, n_genes: 1 });
        assert_eq!(qc.spots[2], SpotQc { total_counts: 6.0, n_genes: 3 });
        assert_eq!(qc.samples.len(), 2);
        assert_eq!(qc.samples[0].n_spots, 3);
        assert_eq!(qc.samples[0].median_counts, 4.0);
        assert_eq!(qc.samples[1].empty_spots, 1);
        assert_eq!(qc.samples[1].max_counts, 1.0);
        assert!(qc.to_string().contains("S2: 2 spots"));
    }

    #[test]
    fn test_qc_does_not_filter() {
        let s1 = sample_data("S1", &["A"], 4, |_, _| 0.0);
        let ds = SpatialDataset::merge(vec![s1]).unwrap();
        let qc = compute_qc(&ds);
        assert_eq!(qc.spots.len(), ds.n_spots());
        assert_eq!(qc.samples[0].empty_spots, 4);
    }
}
