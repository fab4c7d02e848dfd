//! Pipeline configuration
//!
//! A run is described by one TOML (or JSON) file listing the samples and
//! the analysis parameters. Parameters that only make sense for a given
//! stage live next to that stage (`HarmonyParams`, `UmapParams`, ...) and
//! are embedded here as optional sections with defaults.
//!
//! ```toml
//! root_path = "/data/organoid"
//! resolutions = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]
//! active_resolution = 0.5
//!
//! [[sample_table]]
//! id = "S1"
//! tissue = "day14"
//! matrix = "S1/filtered_feature_bc_matrix"
//! positions = "S1/spatial/tissue_positions_list.csv"
//! scale_factors = "S1/spatial/scalefactors_json.json"
//! image = "S1/spatial/tissue_lowres_image.png"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cluster::{LouvainParams, UmapParams};
use crate::data::SpatialDataset;
use crate::enrichment::{EnrichmentBackendKind, EnrichmentConfig};
use crate::error::{Result, SpatialError};
use crate::integration::HarmonyParams;
use crate::scoring::{default_panels, GenePanel, ScoreParams};

/// One row of the sample table: where a sample's files live
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SampleSpec {
    pub id: String,
    #[serde(default)]
    pub tissue: String,
    /// Matrix Market directory or `.h5` file
    pub matrix: PathBuf,
    pub positions: PathBuf,
    pub scale_factors: PathBuf,
    #[serde(default)]
    pub image: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Base directory for relative sample paths
    #[serde(default)]
    pub root_path: PathBuf,
    pub sample_table: Vec<SampleSpec>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub load_images: bool,

    #[serde(default = "default_pca_components")]
    pub pca_components: usize,
    #[serde(default = "default_variable_gene_count")]
    pub variable_gene_count: usize,
    /// Leading corrected components used for neighbors and UMAP
    #[serde(default = "default_embedding_dims")]
    pub embedding_dims: usize,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
    #[serde(default = "default_scale_max")]
    pub scale_max: f64,

    #[serde(default = "default_neighbor_k")]
    pub neighbor_k: usize,
    #[serde(default = "default_prune_snn")]
    pub prune_snn: f64,
    #[serde(default = "default_resolutions")]
    pub resolutions: Vec<f64>,
    #[serde(default = "default_active_resolution")]
    pub active_resolution: f64,

    #[serde(default = "default_marker_threshold")]
    pub marker_min_pct: f64,
    #[serde(default = "default_marker_threshold")]
    pub marker_min_logfc: f64,
    #[serde(default = "default_top_n_values")]
    pub top_n_values: Vec<usize>,

    /// Seed for PCA initialization
    #[serde(default = "default_seed")]
    pub seed: u32,

    #[serde(default)]
    pub harmony: HarmonyParams,
    #[serde(default)]
    pub umap: UmapParams,
    #[serde(default)]
    pub louvain: LouvainParams,
    #[serde(default)]
    pub scoring: ScoreParams,
    #[serde(default = "default_panels")]
    pub module_panels: Vec<GenePanel>,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}
fn default_pca_components() -> usize {
    50
}
fn default_variable_gene_count() -> usize {
    2000
}
fn default_embedding_dims() -> usize {
    30
}
fn default_scale_factor() -> f64 {
    1e4
}
fn default_scale_max() -> f64 {
    10.0
}
fn default_neighbor_k() -> usize {
    20
}
fn default_prune_snn() -> f64 {
    1.0 / 15.0
}
fn default_resolutions() -> Vec<f64> {
    (1..=10).map(|i| i as f64 / 10.0).collect()
}
fn default_active_resolution() -> f64 {
    0.5
}
fn default_marker_threshold() -> f64 {
    0.25
}
fn default_top_n_values() -> Vec<usize> {
    vec![5, 10, 50]
}
fn default_seed() -> u32 {
    42
}

impl PipelineConfig {
    /// Configuration with default parameters for the given samples
    pub fn with_samples(root_path: impl Into<PathBuf>, sample_table: Vec<SampleSpec>) -> Self {
        Self {
            root_path: root_path.into(),
            sample_table,
            output_dir: default_output_dir(),
            load_images: false,
            pca_components: default_pca_components(),
            variable_gene_count: default_variable_gene_count(),
            embedding_dims: default_embedding_dims(),
            scale_factor: default_scale_factor(),
            scale_max: default_scale_max(),
            neighbor_k: default_neighbor_k(),
            prune_snn: default_prune_snn(),
            resolutions: default_resolutions(),
            active_resolution: default_active_resolution(),
            marker_min_pct: default_marker_threshold(),
            marker_min_logfc: default_marker_threshold(),
            top_n_values: default_top_n_values(),
            seed: default_seed(),
            harmony: HarmonyParams::default(),
            umap: UmapParams::default(),
            louvain: LouvainParams::default(),
            scoring: ScoreParams::default(),
            module_panels: default_panels(),
            enrichment: EnrichmentConfig::default(),
        }
    }

    /// Read a configuration file; `.json` files are parsed as JSON, anything else as TOML
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| SpatialError::InvalidConfig {
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;
        let is_json = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
        let config: PipelineConfig = if is_json {
            serde_json::from_str(&text)?
        } else {
            toml::from_str(&text)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Resolve a sample path against `root_path`
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_path.join(path)
        }
    }

    /// Check every value that can be judged without looking at the data
    pub fn validate(&self) -> Result<()> {
        if self.sample_table.is_empty() {
            return Err(SpatialError::InvalidConfig {
                reason: "sample_table must list at least one sample".to_string(),
            });
        }
        let mut seen = HashSet::new();
        for spec in &self.sample_table {
            if spec.id.trim().is_empty() {
                return Err(SpatialError::InvalidConfig {
                    reason: "sample ids must not be empty".to_string(),
                });
            }
            if !seen.insert(spec.id.as_str()) {
                return Err(SpatialError::InvalidConfig {
                    reason: format!("duplicate sample id '{}'", spec.id),
                });
            }
        }

        if self.pca_components == 0 {
            return Err(SpatialError::parameter("pca_components", "must be at least 1"));
        }
        if self.variable_gene_count < self.pca_components {
            return Err(SpatialError::parameter(
                "variable_gene_count",
                format!(
                    "{} variable genes cannot support {} principal components",
                    self.variable_gene_count, self.pca_components
                ),
            ));
        }
        if self.embedding_dims == 0 || self.embedding_dims > self.pca_components {
            return Err(SpatialError::parameter(
                "embedding_dims",
                format!("must be between 1 and pca_components ({})", self.pca_components),
            ));
        }
        if !(self.scale_factor > 0.0 && self.scale_factor.is_finite()) {
            return Err(SpatialError::parameter("scale_factor", "must be a positive number"));
        }
        if !(self.scale_max > 0.0) {
            return Err(SpatialError::parameter("scale_max", "must be positive"));
        }
        if self.neighbor_k < 2 {
            return Err(SpatialError::parameter("neighbor_k", "must be at least 2"));
        }
        if !(0.0..1.0).contains(&self.prune_snn) {
            return Err(SpatialError::parameter("prune_snn", "must be in [0, 1)"));
        }

        if self.resolutions.is_empty() {
            return Err(SpatialError::parameter("resolutions", "must not be empty"));
        }
        if let Some(bad) = self.resolutions.iter().find(|r| !(r.is_finite() && **r > 0.0)) {
            return Err(SpatialError::parameter(
                "resolutions",
                format!("{} is not a positive resolution", bad),
            ));
        }
        if let Some(dup) = self
            .resolutions
            .iter()
            .enumerate()
            .find(|&(i, r)| self.resolutions[..i].iter().any(|p| (p - r).abs() < 1e-9))
            .map(|(_, r)| r)
        {
            return Err(SpatialError::parameter(
                "resolutions",
                format!("{} is listed more than once", dup),
            ));
        }
        if !self
            .resolutions
            .iter()
            .any(|r| (r - self.active_resolution).abs() < 1e-9)
        {
            return Err(SpatialError::parameter(
                "active_resolution",
                format!(
                    "{} is not one of the configured resolutions {:?}",
                    self.active_resolution, self.resolutions
                ),
            ));
        }

        if !(0.0..=1.0).contains(&self.marker_min_pct) {
            return Err(SpatialError::parameter("marker_min_pct", "must be in [0, 1]"));
        }
        if !self.marker_min_logfc.is_finite() {
            return Err(SpatialError::parameter("marker_min_logfc", "must be finite"));
        }
        if self.top_n_values.is_empty() || self.top_n_values.contains(&0) {
            return Err(SpatialError::parameter(
                "top_n_values",
                "must be a non-empty list of positive counts",
            ));
        }

        self.harmony.validate()?;
        self.umap.validate()?;
        self.louvain.validate()?;
        self.scoring.validate()?;
        self.enrichment.validate()?;
        if self.enrichment.backend == EnrichmentBackendKind::GProfiler && !cfg!(feature = "gprofiler") {
            return Err(SpatialError::parameter(
                "enrichment.backend",
                "gprofiler backend requires the `gprofiler` feature",
            ));
        }
        Ok(())
    }

    /// Checks that depend on the loaded data; run before any heavy computation
    pub fn validate_against(&self, dataset: &SpatialDataset) -> Result<()> {
        let n_spots = dataset.n_spots();
        let n_genes = dataset.n_genes();
        if n_spots < self.pca_components {
            return Err(SpatialError::parameter(
                "pca_components",
                format!("{} components requested but only {} spots", self.pca_components, n_spots),
            ));
        }
        if n_genes < self.variable_gene_count {
            return Err(SpatialError::parameter(
                "variable_gene_count",
                format!(
                    "{} variable genes requested but the dataset has only {} genes",
                    self.variable_gene_count, n_genes
                ),
            ));
        }
        if self.neighbor_k >= n_spots {
            return Err(SpatialError::parameter(
                "neighbor_k",
                format!("{} neighbors requested but only {} spots", self.neighbor_k, n_spots),
            ));
        }
        if self.umap.n_neighbors >= n_spots {
            return Err(SpatialError::parameter(
                "umap.n_neighbors",
                format!("{} neighbors requested but only {} spots", self.umap.n_neighbors, n_spots),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn spec(id: &str) -> SampleSpec {
        SampleSpec {
            id: id.to_string(),
            tissue: "skin".to_string(),
            matrix: PathBuf::from(format!("{}/matrix", id)),
            positions: PathBuf::from(format!("{}/tissue_positions_list.csv", id)),
            scale_factors: PathBuf::from(format!("{}/scalefactors_json.json", id)),
            image: None,
        }
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::with_samples("/data", vec![spec("S1")]);
        assert_eq!(config.pca_components, 50);
        assert_eq!(config.variable_gene_count, 2000);
        assert_eq!(config.neighbor_k, 20);
        assert_eq!(config.resolutions.len(), 10);
        assert!((config.resolutions[0] - 0.1).abs() < 1e-12);
        assert!((config.resolutions[9] - 1.0).abs() < 1e-12);
        assert_eq!(config.top_n_values, vec![5, 10, 50]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml_minimal() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
root_path = "/data/organoid"
active_resolution = 0.3

[[sample_table]]
id = "S1"
tissue = "day7"
matrix = "S1/filtered_feature_bc_matrix"
positions = "S1/spatial/tissue_positions_list.csv"
scale_factors = "S1/spatial/scalefactors_json.json"

[harmony]
theta = 1.5
"#
        )
        .unwrap();

        let config = PipelineConfig::from_path(file.path()).unwrap();
        assert_eq!(config.sample_table.len(), 1);
        assert_eq!(config.sample_table[0].tissue, "day7");
        assert!((config.active_resolution - 0.3).abs() < 1e-12);
        assert!((config.harmony.theta - 1.5).abs() < 1e-12);
        assert_eq!(config.marker_min_pct, 0.25);
        assert_eq!(
            config.resolve(&config.sample_table[0].positions),
            PathBuf::from("/data/organoid/S1/spatial/tissue_positions_list.csv")
        );
    }

    #[test]
    fn test_parse_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(
            file,
            r#"{{"sample_table": [{{"id": "S1", "matrix": "m", "positions": "p", "scale_factors": "s"}}],
                "neighbor_k": 15}}"#
        )
        .unwrap();
        let config = PipelineConfig::from_path(file.path()).unwrap();
        assert_eq!(config.neighbor_k, 15);
    }

    #[test]
    fn test_active_resolution_must_be_in_ladder() {
        let mut config = PipelineConfig::with_samples("/data", vec![spec("S1")]);
        config.active_resolution = 0.55;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SpatialError::InvalidParameter { ref parameter, .. } if parameter == "active_resolution"));
    }

    #[test]
    fn test_duplicate_resolutions_rejected() {
        let mut config = PipelineConfig::with_samples("/data", vec![spec("S1")]);
        config.resolutions = vec![0.2, 0.5, 0.2];
        config.active_resolution = 0.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"), "{}", err);
        config.resolutions = vec![0.2, 0.5];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_sample_ids_rejected() {
        let config = PipelineConfig::with_samples("/data", vec![spec("S1"), spec("S1")]);
        assert!(matches!(config.validate(), Err(SpatialError::InvalidConfig { .. })));
    }

    #[test]
    fn test_embedding_dims_bounded_by_components() {
        let mut config = PipelineConfig::with_samples("/data", vec![spec("S1")]);
        config.embedding_dims = 60;
        assert!(config.validate().is_err());
    }
}
