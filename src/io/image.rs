//! Tissue image decoding

use std::path::Path;

use crate::data::TissueImage;
use crate::error::{Result, SpatialError};

/// Decode a PNG or JPEG tissue image to RGB8
#[cfg(feature = "images")]
pub fn read_tissue_image<P: AsRef<Path>>(path: P) -> Result<TissueImage> {
    let rgb = image::open(path.as_ref())?.to_rgb8();
    let (width, height) = rgb.dimensions();
    log::debug!("{}: {} x {} pixels", path.as_ref().display(), width, height);
    Ok(TissueImage {
        width,
        height,
        pixels: rgb.into_raw(),
    })
}

#[cfg(not(feature = "images"))]
pub fn read_tissue_image<P: AsRef<Path>>(path: P) -> Result<TissueImage> {
    Err(SpatialError::InvalidInput {
        reason: format!(
            "{}: decoding tissue images requires building with the `images` feature",
            path.as_ref().display()
        ),
    })
}

/// Confirm an image file is present without decoding it
pub fn check_image_exists(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(SpatialError::InvalidInput {
            reason: format!("tissue image {} does not exist", path.display()),
        })
    }
}

#[cfg(all(test, feature = "images"))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_decode_png() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tissue_lowres_image.png");
        let img = image::RgbImage::from_fn(4, 3, |x, y| image::Rgb([x as u8 * 10, y as u8 * 20, 200]));
        img.save(&path).unwrap();

        let decoded = read_tissue_image(&path).unwrap();
        assert_eq!((decoded.width, decoded.height), (4, 3));
        assert_eq!(decoded.pixel(3, 2), Some([30, 40, 200]));
        assert_eq!(decoded.pixel(4, 0), None);
    }

    #[test]
    fn test_missing_image() {
        let tmp = TempDir::new().unwrap();
        assert!(check_image_exists(&tmp.path().join("nope.png")).is_err());
        assert!(read_tissue_image(tmp.path().join("nope.png")).is_err());
    }
}
