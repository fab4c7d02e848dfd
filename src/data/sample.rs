//! Per-sample metadata: scale factors, spot positions and the tissue image

use serde::{Deserialize, Serialize};

/// Image scale factors written by the alignment pipeline (`scalefactors_json.json`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleFactors {
    pub spot_diameter_fullres: f64,
    pub tissue_hires_scalef: f64,
    pub tissue_lowres_scalef: f64,
    #[serde(default)]
    pub fiducial_diameter_fullres: f64,
}

impl ScaleFactors {
    /// Spot radius in low-resolution image pixels
    pub fn lowres_spot_radius(&self) -> f64 {
        self.spot_diameter_fullres * self.tissue_lowres_scalef / 2.0
    }
}

/// One row of the tissue positions list
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpotPosition {
    pub in_tissue: bool,
    pub array_row: i32,
    pub array_col: i32,
    pub pxl_row_in_fullres: f64,
    pub pxl_col_in_fullres: f64,
}

/// Decoded tissue image as 8-bit RGB pixels, row-major
#[derive(Debug, Clone)]
pub struct TissueImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TissueImage {
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = ((y as usize) * (self.width as usize) + x as usize) * 3;
        self.pixels.get(offset..offset + 3).map(|p| [p[0], p[1], p[2]])
    }

    /// Pixel nearest to image coordinates `(x, y)`; `None` outside the image
    pub fn pixel_at(&self, x: f64, y: f64) -> Option<[u8; 3]> {
        let (x, y) = (x.round(), y.round());
        if !(x >= 0.0 && y >= 0.0) {
            return None;
        }
        self.pixel(x as u32, y as u32)
    }
}

/// A physical tissue section, immutable once loaded
#[derive(Debug, Clone)]
pub struct Sample {
    pub id: String,
    pub tissue: String,
    pub scale_factors: ScaleFactors,
    pub image: Option<TissueImage>,
}
