//! CSV tables written at the end of each stage
//!
//! Every figure of an interactive session has a table here it could be drawn
//! from: spot coordinates with QC metrics, embeddings, cluster labels per
//! resolution, marker lists, module scores and enrichment terms.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::Serialize;

use crate::cluster::{ClusterAssignment, ResolutionLadder, ResolutionSummary};
use crate::data::SpatialDataset;
use crate::enrichment::{EnrichmentOutcome, EnrichmentReport};
use crate::error::Result;
use crate::markers::MarkerRecord;
use crate::qc::QcReport;
use crate::scoring::ModuleScores;
use crate::transform::{PcaResult, VariableGenes};

/// `output_dir` with its `tables/` and `figures/` subdirectories
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub root: PathBuf,
    pub tables: PathBuf,
    pub figures: PathBuf,
}

impl OutputLayout {
    pub fn create<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let tables = root.join("tables");
        let figures = root.join("figures");
        fs::create_dir_all(&tables)?;
        fs::create_dir_all(&figures)?;
        Ok(Self { root, tables, figures })
    }

    pub fn table(&self, name: &str) -> PathBuf {
        self.tables.join(name)
    }
}

fn write_rows<P: AsRef<Path>, T: Serialize>(path: P, rows: impl IntoIterator<Item = T>) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)?;
    let mut n = 0usize;
    for row in rows {
        writer.serialize(row)?;
        n += 1;
    }
    writer.flush()?;
    log::debug!("Wrote {} rows to {}", n, path.display());
    Ok(())
}

#[derive(Serialize)]
struct SpotQcRow<'a> {
    spot_id: &'a str,
    sample: &'a str,
    barcode: &'a str,
    array_row: i32,
    array_col: i32,
    pxl_row_in_fullres: f64,
    pxl_col_in_fullres: f64,
    pxl_row_lowres: f64,
    pxl_col_lowres: f64,
    spot_radius_lowres: f64,
    /// Tissue image colour under the spot centre, empty without an image
    image_rgb: Option<String>,
    total_counts: f64,
    n_genes: usize,
}

/// `qc_spots.csv` and `qc_samples.csv`
pub fn write_qc(layout: &OutputLayout, dataset: &SpatialDataset, qc: &QcReport) -> Result<()> {
    let samples = dataset.samples();
    let rows = dataset
        .spots()
        .iter()
        .zip(dataset.spot_ids())
        .zip(&qc.spots)
        .map(|((spot, id), metrics)| {
            let sample = &samples[spot.sample];
            let scalef = sample.scale_factors.tissue_lowres_scalef;
            let row = spot.position.pxl_row_in_fullres * scalef;
            let col = spot.position.pxl_col_in_fullres * scalef;
            let image_rgb = sample
                .image
                .as_ref()
                .and_then(|img| img.pixel_at(col, row))
                .map(|[r, g, b]| format!("#{:02x}{:02x}{:02x}", r, g, b));
            SpotQcRow {
                spot_id: id,
                sample: &sample.id,
                barcode: &spot.barcode,
                array_row: spot.position.array_row,
                array_col: spot.position.array_col,
                pxl_row_in_fullres: spot.position.pxl_row_in_fullres,
                pxl_col_in_fullres: spot.position.pxl_col_in_fullres,
                pxl_row_lowres: row,
                pxl_col_lowres: col,
                spot_radius_lowres: sample.scale_factors.lowres_spot_radius(),
                image_rgb,
                total_counts: metrics.total_counts,
                n_genes: metrics.n_genes,
            }
        });
    write_rows(layout.table("qc_spots.csv"), rows)?;
    write_rows(layout.table("qc_samples.csv"), &qc.samples)
}

#[derive(Serialize)]
struct VariableGeneRow<'a> {
    gene: &'a str,
    mean: f64,
    variance: f64,
    variance_expected: f64,
    variance_standardized: f64,
    /// Position among the selected genes, empty when not selected
    variable_rank: Option<usize>,
}

pub fn write_variable_genes<P: AsRef<Path>>(path: P, hvg: &VariableGenes) -> Result<()> {
    let mut rank = vec![None; hvg.stats.len()];
    for (r, &g) in hvg.indices.iter().enumerate() {
        rank[g] = Some(r + 1);
    }
    write_rows(
        path,
        hvg.stats.iter().zip(rank).map(|(s, variable_rank)| VariableGeneRow {
            gene: &s.gene,
            mean: s.mean,
            variance: s.variance,
            variance_expected: s.variance_expected,
            variance_standardized: s.variance_standardized,
            variable_rank,
        }),
    )
}

#[derive(Serialize)]
struct PcaVarianceRow {
    component: String,
    stdev: f64,
    variance_ratio: f64,
    cumulative_ratio: f64,
}

/// Per-component variance, the elbow-plot data
pub fn write_pca_variance<P: AsRef<Path>>(path: P, pca: &PcaResult) -> Result<()> {
    let mut cumulative = 0.0;
    let rows: Vec<PcaVarianceRow> = pca
        .stdev
        .iter()
        .zip(pca.variance_ratio.iter())
        .enumerate()
        .map(|(i, (&stdev, &ratio))| {
            cumulative += ratio;
            PcaVarianceRow {
                component: format!("PC_{}", i + 1),
                stdev,
                variance_ratio: ratio,
                cumulative_ratio: cumulative,
            }
        })
        .collect();
    write_rows(path, rows)
}

/// Spots x dims matrix with columns `{prefix}1..{prefix}n`
pub fn write_embedding<P: AsRef<Path>>(
    path: P,
    spot_ids: &[String],
    embedding: &Array2<f64>,
    prefix: &str,
) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["spot_id".to_string()];
    header.extend((1..=embedding.ncols()).map(|j| format!("{}{}", prefix, j)));
    writer.write_record(&header)?;
    for (id, row) in spot_ids.iter().zip(embedding.rows()) {
        let mut record = vec![id.clone()];
        record.extend(row.iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    log::debug!("Wrote {} x {} embedding to {}", embedding.nrows(), embedding.ncols(), path.display());
    Ok(())
}

/// One label column per resolution plus the active one
pub fn write_clusters<P: AsRef<Path>>(
    path: P,
    dataset: &SpatialDataset,
    ladder: &ResolutionLadder,
    active: &ClusterAssignment,
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    let mut header = vec!["spot_id".to_string(), "sample".to_string()];
    header.extend(ladder.clusterings().iter().map(|c| format!("res.{}", c.resolution)));
    header.push("active".to_string());
    writer.write_record(&header)?;
    for (spot, id) in dataset.spot_ids().iter().enumerate() {
        let mut record = vec![id.clone(), dataset.sample_id_of(spot).to_string()];
        record.extend(ladder.clusterings().iter().map(|c| c.labels[spot].to_string()));
        record.push(active.labels[spot].to_string());
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_resolution_summary<P: AsRef<Path>>(path: P, summary: &ResolutionSummary) -> Result<()> {
    write_rows(path, &summary.rows)
}

pub fn write_markers<'a, P: AsRef<Path>>(
    path: P,
    records: impl IntoIterator<Item = &'a MarkerRecord>,
) -> Result<()> {
    write_rows(path, records)
}

pub fn write_module_scores<P: AsRef<Path>>(
    path: P,
    dataset: &SpatialDataset,
    scores: &ModuleScores,
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    let mut header = vec!["spot_id".to_string(), "sample".to_string()];
    header.extend(scores.panel_names().iter().map(|p| p.to_string()));
    writer.write_record(&header)?;
    for (spot, id) in dataset.spot_ids().iter().enumerate() {
        let mut record = vec![id.clone(), dataset.sample_id_of(spot).to_string()];
        record.extend(scores.scores.row(spot).iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct EnrichmentRow<'a> {
    cluster: u32,
    status: &'static str,
    rank: Option<usize>,
    term_id: &'a str,
    term_name: &'a str,
    source: &'a str,
    p_value: Option<f64>,
    term_size: Option<usize>,
    intersection_size: Option<usize>,
    reason: &'a str,
    highlighted: bool,
}

impl<'a> EnrichmentRow<'a> {
    fn status_only(cluster: u32, status: &'static str, reason: &'a str) -> Self {
        Self {
            cluster,
            status,
            rank: None,
            term_id: "",
            term_name: "",
            source: "",
            p_value: None,
            term_size: None,
            intersection_size: None,
            reason,
            highlighted: false,
        }
    }
}

/// Terms of enriched clusters; one status row for every other cluster
pub fn write_enrichment<P: AsRef<Path>>(path: P, report: &EnrichmentReport) -> Result<()> {
    let mut rows = Vec::new();
    for (cluster, outcome) in report.outcomes() {
        match outcome {
            EnrichmentOutcome::Enriched(terms) => {
                rows.extend(terms.iter().enumerate().map(|(i, t)| EnrichmentRow {
                    cluster,
                    status: "enriched",
                    rank: Some(t.rank),
                    term_id: &t.term_id,
                    term_name: &t.term_name,
                    source: &t.source,
                    p_value: Some(t.p_value),
                    term_size: Some(t.term_size),
                    intersection_size: Some(t.intersection_size),
                    reason: "",
                    highlighted: i < report.highlight,
                }))
            }
            EnrichmentOutcome::Empty => rows.push(EnrichmentRow::status_only(cluster, "empty", "")),
            EnrichmentOutcome::Skipped { reason } => {
                rows.push(EnrichmentRow::status_only(cluster, "skipped", reason))
            }
            EnrichmentOutcome::Failed { reason } => {
                rows.push(EnrichmentRow::status_only(cluster, "failed", reason))
            }
        }
    }
    write_rows(path, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::EnrichmentTerm;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_layout_creates_directories() {
        let dir = TempDir::new().unwrap();
        let layout = OutputLayout::create(dir.path().join("out")).unwrap();
        assert!(layout.tables.is_dir());
        assert!(layout.figures.is_dir());
        assert_eq!(layout.table("umap.csv"), dir.path().join("out/tables/umap.csv"));
    }

    #[test]
    fn test_qc_spot_table() {
        use crate::data::fixtures::sample_data;
        use crate::data::TissueImage;

        let dir = TempDir::new().unwrap();
        let layout = OutputLayout::create(dir.path()).unwrap();
        let mut part = sample_data("S1", &["KRT5", "KRT14"], 3, |s, g| (s + g) as f64);
        let (width, height) = (8u32, 4u32);
        let mut pixels = Vec::new();
        for y in 0..height {
            for x in 0..width {
                pixels.extend([x as u8 * 10, y as u8 * 10, 7]);
            }
        }
        part.sample.image = Some(TissueImage { width, height, pixels });
        let dataset = SpatialDataset::merge(vec![part]).unwrap();
        let qc = crate::qc::compute_qc(&dataset);
        write_qc(&layout, &dataset, &qc).unwrap();

        let mut reader = csv::Reader::from_path(layout.table("qc_spots.csv")).unwrap();
        let headers = reader.headers().unwrap().clone();
        let col = |name: &str| headers.iter().position(|h| h == name).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        // lowres scale 0.051: spot columns at 0, 5.1 and 10.2 pixels
        assert_eq!(&rows[0][col("image_rgb")], "#000007");
        assert_eq!(&rows[1][col("image_rgb")], "#320007");
        assert_eq!(&rows[2][col("image_rgb")], "");
        let radius: f64 = rows[0][col("spot_radius_lowres")].parse().unwrap();
        assert!((radius - 89.4 * 0.051 / 2.0).abs() < 1e-12);
        assert_eq!(&rows[2][col("total_counts")], "5");
        assert!(layout.table("qc_samples.csv").is_file());
    }

    #[test]
    fn test_embedding_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("umap.csv");
        let ids = vec!["S1_A".to_string(), "S1_B".to_string()];
        let emb = ndarray::arr2(&[[1.0, 2.0], [3.5, -4.0]]);
        write_embedding(&path, &ids, &emb, "UMAP_").unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "spot_id,UMAP_1,UMAP_2");
        assert_eq!(lines[2], "S1_B,3.5,-4");
    }

    #[test]
    fn test_markers_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("markers.csv");
        let records = vec![MarkerRecord {
            gene: "KRT14".to_string(),
            cluster: 1,
            avg_log2fc: 2.5,
            p_value: 1e-10,
            p_value_adj: 1e-7,
            pct_in: 0.9,
            pct_out: 0.2,
        }];
        write_markers(&path, &records).unwrap();
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "gene");
        assert_eq!(&headers[6], "pct_out");
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[0], "KRT14");
        assert_eq!(&row[1], "1");
    }

    #[test]
    fn test_enrichment_table_keeps_failed_clusters() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("enrichment.csv");
        let mut outcomes = BTreeMap::new();
        let term = |rank: usize, id: &str, name: &str| EnrichmentTerm {
            cluster: 0,
            rank,
            term_id: id.to_string(),
            term_name: name.to_string(),
            source: "GO:BP".to_string(),
            p_value: 1e-5 * rank as f64,
            term_size: 220,
            intersection_size: 4,
        };
        outcomes.insert(
            0,
            EnrichmentOutcome::Enriched(vec![
                term(1, "GO:0031424", "keratinization"),
                term(2, "GO:0008544", "epidermis development"),
            ]),
        );
        outcomes.insert(1, EnrichmentOutcome::Failed { reason: "timeout".to_string() });
        outcomes.insert(2, EnrichmentOutcome::Empty);
        write_enrichment(&path, &EnrichmentReport::new("mock", 1, outcomes)).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 4);
        assert_eq!(&rows[0][1], "enriched");
        assert_eq!(&rows[0][4], "keratinization");
        assert_eq!(&rows[0][10], "true");
        assert_eq!(&rows[1][4], "epidermis development");
        assert_eq!(&rows[1][10], "false");
        assert_eq!(&rows[2][1], "failed");
        assert_eq!(&rows[2][9], "timeout");
        assert_eq!(&rows[3][1], "empty");
        assert_eq!(&rows[3][2], "");
    }
}
