//! Tissue positions list and scale factor readers

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::data::{ScaleFactors, SpotPosition};
use crate::error::{Result, SpatialError};

/// Read `tissue_positions_list.csv` (no header) or `tissue_positions.csv`
/// (header starting with `barcode`). Returns every listed barcode in file
/// order, in-tissue or not.
pub fn read_positions<P: AsRef<Path>>(path: P) -> Result<Vec<(String, SpotPosition)>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut positions = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        if i == 0 && record.get(0).map_or(false, |f| f.eq_ignore_ascii_case("barcode")) {
            continue;
        }
        if record.len() < 6 {
            return Err(SpatialError::InvalidInput {
                reason: format!(
                    "{}: line {} has {} columns, expected 6",
                    path.display(),
                    i + 1,
                    record.len()
                ),
            });
        }
        let field_err = |col: usize| SpatialError::InvalidInput {
            reason: format!(
                "{}: line {}: cannot parse '{}' in column {}",
                path.display(),
                i + 1,
                &record[col],
                col + 1
            ),
        };
        let in_tissue = match &record[1] {
            "1" => true,
            "0" => false,
            _ => return Err(field_err(1)),
        };
        let position = SpotPosition {
            in_tissue,
            array_row: record[2].parse().map_err(|_| field_err(2))?,
            array_col: record[3].parse().map_err(|_| field_err(3))?,
            pxl_row_in_fullres: record[4].parse().map_err(|_| field_err(4))?,
            pxl_col_in_fullres: record[5].parse().map_err(|_| field_err(5))?,
        };
        positions.push((record[0].to_string(), position));
    }

    if positions.is_empty() {
        return Err(SpatialError::EmptyData {
            reason: format!("{} lists no spots", path.display()),
        });
    }
    Ok(positions)
}

/// Positions of the matrix barcodes, in matrix order.
///
/// The in-tissue spot count must equal the number of matrix barcodes, and
/// each barcode must be listed as in tissue.
pub fn align_positions(
    sample_id: &str,
    barcodes: &[String],
    positions: &[(String, SpotPosition)],
) -> Result<Vec<SpotPosition>> {
    let in_tissue: HashMap<&str, &SpotPosition> = positions
        .iter()
        .filter(|(_, p)| p.in_tissue)
        .map(|(bc, p)| (bc.as_str(), p))
        .collect();

    if in_tissue.len() != barcodes.len() {
        return Err(SpatialError::SpotCountMismatch {
            sample_id: sample_id.to_string(),
            matrix_spots: barcodes.len(),
            position_spots: in_tissue.len(),
        });
    }

    barcodes
        .iter()
        .map(|bc| {
            in_tissue
                .get(bc.as_str())
                .map(|p| **p)
                .ok_or_else(|| SpatialError::sample_load(
                    sample_id,
                    format!("barcode {} has no in-tissue position", bc),
                ))
        })
        .collect()
}

/// Read `scalefactors_json.json`
pub fn read_scale_factors<P: AsRef<Path>>(path: P) -> Result<ScaleFactors> {
    let file = File::open(path.as_ref()).map_err(|e| SpatialError::InvalidInput {
        reason: format!("cannot open {}: {}", path.as_ref().display(), e),
    })?;
    let factors: ScaleFactors = serde_json::from_reader(BufReader::new(file))?;
    if !(factors.tissue_lowres_scalef > 0.0 && factors.tissue_hires_scalef > 0.0) {
        return Err(SpatialError::InvalidInput {
            reason: format!("{}: image scale factors must be positive", path.as_ref().display()),
        });
    }
    Ok(factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_positions_without_header() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "AAAC-1,1,0,0,1500,2300").unwrap();
        writeln!(file, "AAAG-1,0,0,2,1500,2450").unwrap();
        let positions = read_positions(file.path()).unwrap();
        assert_eq!(positions.len(), 2);
        assert!(positions[0].1.in_tissue);
        assert!(!positions[1].1.in_tissue);
        assert_eq!(positions[1].1.array_col, 2);
        assert_eq!(positions[0].1.pxl_col_in_fullres, 2300.0);
    }

    #[test]
    fn test_read_positions_with_header() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "barcode,in_tissue,array_row,array_col,pxl_row_in_fullres,pxl_col_in_fullres").unwrap();
        writeln!(file, "AAAC-1,1,3,4,10.5,20.25").unwrap();
        let positions = read_positions(file.path()).unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].0, "AAAC-1");
        assert_eq!(positions[0].1.pxl_row_in_fullres, 10.5);
    }

    #[test]
    fn test_malformed_positions() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "AAAC-1,yes,0,0,1,1").unwrap();
        assert!(read_positions(file.path()).is_err());
    }

    #[test]
    fn test_align_positions_count_mismatch() {
        let pos = |t| SpotPosition {
            in_tissue: t,
            array_row: 0,
            array_col: 0,
            pxl_row_in_fullres: 0.0,
            pxl_col_in_fullres: 0.0,
        };
        let positions = vec![
            ("A".to_string(), pos(true)),
            ("B".to_string(), pos(true)),
            ("C".to_string(), pos(false)),
        ];
        let barcodes = vec!["B".to_string(), "A".to_string()];
        let aligned = align_positions("S1", &barcodes, &positions).unwrap();
        assert_eq!(aligned.len(), 2);

        let too_few = vec!["A".to_string()];
        let err = align_positions("S1", &too_few, &positions).unwrap_err();
        assert!(matches!(
            err,
            SpatialError::SpotCountMismatch { matrix_spots: 1, position_spots: 2, .. }
        ));
    }

    #[test]
    fn test_read_scale_factors() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"spot_diameter_fullres": 89.43, "tissue_hires_scalef": 0.17011, "fiducial_diameter_fullres": 144.46, "tissue_lowres_scalef": 0.05103, "regist_target_img_scalef": 0.2}}"#
        )
        .unwrap();
        let sf = read_scale_factors(file.path()).unwrap();
        assert!((sf.tissue_lowres_scalef - 0.05103).abs() < 1e-12);
        assert!(sf.lowres_spot_radius() > 2.0);
    }
}
