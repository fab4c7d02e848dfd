//! Error types for rust_visium

use thiserror::Error;

/// Main error type for the spatial analysis pipeline
#[derive(Error, Debug)]
pub enum SpatialError {
    #[error("Failed to load sample '{sample_id}': {reason}")]
    SampleLoad { sample_id: String, reason: String },

    #[error(
        "Spot count mismatch in sample '{sample_id}': count matrix has {matrix_spots} barcodes, \
         positions list has {position_spots} in-tissue spots"
    )]
    SpotCountMismatch {
        sample_id: String,
        matrix_spots: usize,
        position_spots: usize,
    },

    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter { parameter: String, reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Numerical instability in {operation}: {details}")]
    NumericalInstability { operation: String, details: String },

    #[error("Enrichment backend '{backend}' failed: {reason}")]
    Enrichment { backend: String, reason: String },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[cfg(feature = "images")]
    #[error("Image decoding error: {0}")]
    ImageError(#[from] image::ImageError),

    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5Error(#[from] hdf5::Error),
}

/// Coarse error classes used by the driver to decide how a failure is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Input files missing, malformed or inconsistent; the run stops
    Load,
    /// Configuration values unusable for the data at hand; the run stops before heavy work
    Parameter,
    /// A remote or pluggable service failed; isolated to the unit that called it
    External,
    Other,
}

impl SpatialError {
    pub fn sample_load(sample_id: &str, reason: impl std::fmt::Display) -> Self {
        SpatialError::SampleLoad {
            sample_id: sample_id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn parameter(parameter: &str, reason: impl Into<String>) -> Self {
        SpatialError::InvalidParameter {
            parameter: parameter.to_string(),
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            SpatialError::SampleLoad { .. }
            | SpatialError::SpotCountMismatch { .. }
            | SpatialError::InvalidCountMatrix { .. } => ErrorCategory::Load,
            SpatialError::InvalidConfig { .. } | SpatialError::InvalidParameter { .. } => {
                ErrorCategory::Parameter
            }
            SpatialError::Enrichment { .. } => ErrorCategory::External,
            _ => ErrorCategory::Other,
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, SpatialError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_load_names_sample() {
        let err = SpatialError::sample_load("S2", "matrix.mtx not found");
        let msg = err.to_string();
        assert!(msg.contains("S2"));
        assert!(msg.contains("matrix.mtx"));
        assert_eq!(err.category(), ErrorCategory::Load);
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            SpatialError::parameter("pca_components", "too many").category(),
            ErrorCategory::Parameter
        );
        let err = SpatialError::Enrichment {
            backend: "gprofiler".to_string(),
            reason: "timeout".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::External);
        let io = SpatialError::from(std::io::Error::new(std::io::ErrorKind::Other, "x"));
        assert_eq!(io.category(), ErrorCategory::Other);
    }
}
