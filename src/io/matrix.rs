//! 10x feature-barcode count matrix readers
//!
//! The Matrix Market directory layout (`matrix.mtx`, `features.tsv`,
//! `barcodes.tsv`, optionally gzip-compressed) is always available. The HDF5
//! layout (`filtered_feature_bc_matrix.h5`) needs the `hdf5` feature.
//! Only features of type "Gene Expression" are kept; gene symbols are used
//! as names.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;

use crate::data::SpotMatrix;
use crate::error::{Result, SpatialError};

const GENE_EXPRESSION: &str = "Gene Expression";

/// Read a count matrix from a Matrix Market directory or a `.h5` file.
/// The returned matrix has barcodes as spot ids.
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<SpotMatrix> {
    let path = path.as_ref();
    if path.is_dir() {
        return read_10x_mtx(path);
    }
    let is_h5 = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("h5"));
    if is_h5 {
        return read_10x_h5(path);
    }
    if !path.exists() {
        return Err(SpatialError::InvalidInput {
            reason: format!("count matrix {} does not exist", path.display()),
        });
    }
    Err(SpatialError::InvalidInput {
        reason: format!(
            "{} is neither a Matrix Market directory nor an .h5 file",
            path.display()
        ),
    })
}

/// Open a file that may be gzip-compressed (detected by `.gz` suffix)
pub(crate) fn open_text(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).map_err(|e| SpatialError::InvalidInput {
        reason: format!("cannot open {}: {}", path.display(), e),
    })?;
    let gz = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("gz"));
    if gz {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// First existing file among `candidates` inside `dir`, plain or gzipped
fn find_file(dir: &Path, candidates: &[&str]) -> Option<PathBuf> {
    candidates.iter().find_map(|name| {
        let plain = dir.join(name);
        if plain.is_file() {
            return Some(plain);
        }
        let gz = dir.join(format!("{}.gz", name));
        gz.is_file().then_some(gz)
    })
}

/// Feature table rows: (symbol, keep)
fn read_features(path: &Path) -> Result<Vec<(String, bool)>> {
    let mut features = Vec::new();
    for (line_no, line) in open_text(path)?.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let symbol = fields.get(1).copied().unwrap_or(fields[0]);
        if symbol.is_empty() {
            return Err(SpatialError::InvalidCountMatrix {
                reason: format!("{}:{}: empty feature name", path.display(), line_no + 1),
            });
        }
        let keep = fields.get(2).map_or(true, |t| t.trim() == GENE_EXPRESSION);
        features.push((symbol.trim().to_string(), keep));
    }
    Ok(features)
}

fn read_barcodes(path: &Path) -> Result<Vec<String>> {
    let mut barcodes = Vec::new();
    for line in open_text(path)?.lines() {
        let line = line?;
        let barcode = line.trim();
        if !barcode.is_empty() {
            barcodes.push(barcode.to_string());
        }
    }
    Ok(barcodes)
}

/// Read a 10x Matrix Market directory (genes x barcodes on disk)
pub fn read_10x_mtx(dir: &Path) -> Result<SpotMatrix> {
    let missing = |what: &str| SpatialError::InvalidInput {
        reason: format!("{} not found in {}", what, dir.display()),
    };
    let matrix_path = find_file(dir, &["matrix.mtx"]).ok_or_else(|| missing("matrix.mtx"))?;
    let features_path =
        find_file(dir, &["features.tsv", "genes.tsv"]).ok_or_else(|| missing("features.tsv"))?;
    let barcodes_path = find_file(dir, &["barcodes.tsv"]).ok_or_else(|| missing("barcodes.tsv"))?;

    let features = read_features(&features_path)?;
    let barcodes = read_barcodes(&barcodes_path)?;

    let mut lines = open_text(&matrix_path)?.lines();
    let header = lines.next().ok_or_else(|| SpatialError::EmptyData {
        reason: format!("{} is empty", matrix_path.display()),
    })??;
    let header_lower = header.to_lowercase();
    if !header_lower.starts_with("%%matrixmarket") || !header_lower.contains("coordinate") {
        return Err(SpatialError::InvalidCountMatrix {
            reason: format!("{}: not a coordinate Matrix Market file", matrix_path.display()),
        });
    }
    let pattern = header_lower.contains("pattern");

    let mut size: Option<(usize, usize, usize)> = None;
    let mut triplets: Vec<(usize, usize, f64)> = Vec::new();
    let mut gene_map: Vec<Option<usize>> = Vec::new();
    let mut n_kept = 0;

    for line in lines {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        let parse_index = |s: &str| -> Result<usize> {
            s.parse::<usize>().map_err(|_| SpatialError::InvalidCountMatrix {
                reason: format!("{}: invalid index '{}'", matrix_path.display(), s),
            })
        };

        match size {
            None => {
                if fields.len() < 3 {
                    return Err(SpatialError::InvalidCountMatrix {
                        reason: format!("{}: malformed size line", matrix_path.display()),
                    });
                }
                let (n_rows, n_cols, nnz) =
                    (parse_index(fields[0])?, parse_index(fields[1])?, parse_index(fields[2])?);
                if n_rows != features.len() {
                    return Err(SpatialError::DimensionMismatch {
                        expected: format!("{} features", n_rows),
                        got: format!("{} rows in {}", features.len(), features_path.display()),
                    });
                }
                if n_cols != barcodes.len() {
                    return Err(SpatialError::DimensionMismatch {
                        expected: format!("{} barcodes", n_cols),
                        got: format!("{} rows in {}", barcodes.len(), barcodes_path.display()),
                    });
                }
                gene_map = features
                    .iter()
                    .map(|(_, keep)| {
                        if *keep {
                            n_kept += 1;
                            Some(n_kept - 1)
                        } else {
                            None
                        }
                    })
                    .collect();
                triplets.reserve(nnz);
                size = Some((n_rows, n_cols, nnz));
            }
            Some((n_rows, n_cols, _)) => {
                let expected_fields = if pattern { 2 } else { 3 };
                if fields.len() < expected_fields {
                    return Err(SpatialError::InvalidCountMatrix {
                        reason: format!("{}: malformed entry '{}'", matrix_path.display(), trimmed),
                    });
                }
                let row = parse_index(fields[0])?;
                let col = parse_index(fields[1])?;
                if row == 0 || row > n_rows || col == 0 || col > n_cols {
                    return Err(SpatialError::InvalidCountMatrix {
                        reason: format!(
                            "{}: entry ({}, {}) outside {} x {}",
                            matrix_path.display(),
                            row,
                            col,
                            n_rows,
                            n_cols
                        ),
                    });
                }
                let value = if pattern {
                    1.0
                } else {
                    fields[2].parse::<f64>().map_err(|_| SpatialError::InvalidCountMatrix {
                        reason: format!("{}: invalid value '{}'", matrix_path.display(), fields[2]),
                    })?
                };
                if let Some(gene) = gene_map[row - 1] {
                    triplets.push((col - 1, gene, value));
                }
            }
        }
    }

    let (_, _, nnz) = size.ok_or_else(|| SpatialError::InvalidCountMatrix {
        reason: format!("{}: missing size line", matrix_path.display()),
    })?;
    log::debug!(
        "{}: {} declared entries, {} gene-expression entries kept",
        matrix_path.display(),
        nnz,
        triplets.len()
    );

    let gene_names: Vec<String> = features
        .into_iter()
        .filter(|(_, keep)| *keep)
        .map(|(name, _)| name)
        .collect();
    SpotMatrix::from_triplets(barcodes.len(), gene_names.len(), &triplets, gene_names, barcodes)
}

#[cfg(feature = "hdf5")]
fn read_10x_h5(path: &Path) -> Result<SpotMatrix> {
    use hdf5::types::FixedAscii;

    let file = hdf5::File::open(path)?;
    let group = file.group("matrix")?;
    let data: Vec<i64> = group.dataset("data")?.read_raw()?;
    let indices: Vec<i64> = group.dataset("indices")?.read_raw()?;
    let indptr: Vec<i64> = group.dataset("indptr")?.read_raw()?;
    let shape: Vec<i64> = group.dataset("shape")?.read_raw()?;
    if shape.len() != 2 || indptr.len() != shape[1] as usize + 1 {
        return Err(SpatialError::InvalidCountMatrix {
            reason: format!("{}: inconsistent matrix/shape and matrix/indptr", path.display()),
        });
    }

    let to_strings = |v: Vec<FixedAscii<256>>| -> Vec<String> {
        v.into_iter().map(|s| s.as_str().to_string()).collect()
    };
    let barcodes = to_strings(group.dataset("barcodes")?.read_raw()?);
    let names = to_strings(group.dataset("features/name")?.read_raw()?);
    let types = to_strings(group.dataset("features/feature_type")?.read_raw()?);

    let mut gene_map = Vec::with_capacity(names.len());
    let mut gene_names = Vec::new();
    for (name, kind) in names.into_iter().zip(types.iter()) {
        if kind == GENE_EXPRESSION {
            gene_map.push(Some(gene_names.len()));
            gene_names.push(name);
        } else {
            gene_map.push(None);
        }
    }

    // CSC on disk: one column per barcode
    let mut triplets = Vec::with_capacity(data.len());
    for barcode in 0..barcodes.len() {
        for k in indptr[barcode] as usize..indptr[barcode + 1] as usize {
            let feature = indices[k] as usize;
            if let Some(Some(gene)) = gene_map.get(feature) {
                triplets.push((barcode, *gene, data[k] as f64));
            }
        }
    }
    SpotMatrix::from_triplets(barcodes.len(), gene_names.len(), &triplets, gene_names, barcodes)
}

#[cfg(not(feature = "hdf5"))]
fn read_10x_h5(path: &Path) -> Result<SpotMatrix> {
    Err(SpatialError::InvalidInput {
        reason: format!(
            "{}: reading .h5 matrices requires building with the `hdf5` feature",
            path.display()
        ),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    /// Write a small Matrix Market directory: genes x barcodes with given triplets (1-based)
    pub(crate) fn write_mtx_dir(
        dir: &Path,
        features: &[(&str, &str, &str)],
        barcodes: &[&str],
        entries: &[(usize, usize, u32)],
    ) {
        std::fs::create_dir_all(dir).unwrap();
        let mut f = File::create(dir.join("features.tsv")).unwrap();
        for (id, name, kind) in features {
            writeln!(f, "{}\t{}\t{}", id, name, kind).unwrap();
        }
        let mut b = File::create(dir.join("barcodes.tsv")).unwrap();
        for bc in barcodes {
            writeln!(b, "{}", bc).unwrap();
        }
        let mut m = File::create(dir.join("matrix.mtx")).unwrap();
        writeln!(m, "%%MatrixMarket matrix coordinate integer general").unwrap();
        writeln!(m, "%metadata_json: {{}}").unwrap();
        writeln!(m, "{} {} {}", features.len(), barcodes.len(), entries.len()).unwrap();
        for (r, c, v) in entries {
            writeln!(m, "{} {} {}", r, c, v).unwrap();
        }
    }

    #[test]
    fn test_read_mtx_directory() {
        let tmp = TempDir::new().unwrap();
        write_mtx_dir(
            tmp.path(),
            &[
                ("ENSG1", "KRT5", GENE_EXPRESSION),
                ("ENSG2", "KRT14", GENE_EXPRESSION),
                ("AB1", "CD3_TotalSeqB", "Antibody Capture"),
            ],
            &["AAAC-1", "AAAG-1"],
            &[(1, 1, 4), (2, 2, 7), (3, 1, 100)],
        );

        let m = read_count_matrix(tmp.path()).unwrap();
        assert_eq!(m.n_spots(), 2);
        assert_eq!(m.n_genes(), 2);
        assert_eq!(m.gene_names(), &["KRT5", "KRT14"]);
        assert_eq!(m.spot_ids(), &["AAAC-1", "AAAG-1"]);
        assert_eq!(m.get(0, 0), 4.0);
        assert_eq!(m.get(1, 1), 7.0);
        assert_eq!(m.spot_totals(), vec![4.0, 7.0]);
    }

    #[test]
    fn test_read_gzipped_mtx() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let tmp = TempDir::new().unwrap();
        write_mtx_dir(tmp.path(), &[("E1", "A", GENE_EXPRESSION)], &["B1"], &[(1, 1, 3)]);
        for name in ["features.tsv", "barcodes.tsv", "matrix.mtx"] {
            let plain = std::fs::read(tmp.path().join(name)).unwrap();
            let mut enc = GzEncoder::new(
                File::create(tmp.path().join(format!("{}.gz", name))).unwrap(),
                Compression::default(),
            );
            enc.write_all(&plain).unwrap();
            enc.finish().unwrap();
            std::fs::remove_file(tmp.path().join(name)).unwrap();
        }
        let m = read_count_matrix(tmp.path()).unwrap();
        assert_eq!(m.get(0, 0), 3.0);
    }

    #[test]
    fn test_barcode_count_mismatch() {
        let tmp = TempDir::new().unwrap();
        write_mtx_dir(tmp.path(), &[("E1", "A", GENE_EXPRESSION)], &["B1"], &[(1, 1, 3)]);
        // declare two barcodes in the size line
        let mut m = File::create(tmp.path().join("matrix.mtx")).unwrap();
        writeln!(m, "%%MatrixMarket matrix coordinate integer general").unwrap();
        writeln!(m, "1 2 1").unwrap();
        writeln!(m, "1 1 3").unwrap();
        drop(m);
        assert!(matches!(
            read_count_matrix(tmp.path()),
            Err(SpatialError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_matrix_file() {
        let tmp = TempDir::new().unwrap();
        let err = read_count_matrix(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("matrix.mtx"));
    }
}
