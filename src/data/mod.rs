//! Data structures for spatial expression data

mod count_matrix;
mod dataset;
mod sample;

pub use count_matrix::{make_unique, SpotMatrix};
pub use dataset::{SampleData, SpatialDataset, Spot};
pub use sample::{Sample, ScaleFactors, SpotPosition, TissueImage};

#[cfg(test)]
pub(crate) use dataset::tests as fixtures;
