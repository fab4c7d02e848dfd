//! Dense linear-algebra kernels on small ndarray matrices
//!
//! Only what the reduction and integration stages need: column
//! orthonormalization, a symmetric eigensolver for the projected PCA
//! problem, and a pivoted linear solve for Harmony's ridge regression.

use ndarray::{Array1, Array2, Axis};

use crate::error::{Result, SpatialError};

/// Orthonormalize the columns of `a` in place (modified Gram-Schmidt).
///
/// Columns that become numerically zero are left as zero vectors.
pub fn orthonormalize_columns(a: &mut Array2<f64>) {
    let ncols = a.ncols();
    for j in 0..ncols {
        for i in 0..j {
            let proj = a.column(i).dot(&a.column(j));
            let qi = a.column(i).to_owned();
            a.column_mut(j).scaled_add(-proj, &qi);
        }
        let norm = a.column(j).dot(&a.column(j)).sqrt();
        if norm > 1e-12 {
            a.column_mut(j).mapv_inplace(|v| v / norm);
        } else {
            a.column_mut(j).fill(0.0);
        }
    }
}

/// Eigen-decomposition of a symmetric matrix by cyclic Jacobi rotations.
///
/// Returns eigenvalues in decreasing order and the matching eigenvectors as
/// columns.
pub fn symmetric_eigen(m: &Array2<f64>) -> Result<(Array1<f64>, Array2<f64>)> {
    let n = m.nrows();
    if n != m.ncols() {
        return Err(SpatialError::DimensionMismatch {
            expected: format!("{} x {} square matrix", n, n),
            got: format!("{} x {}", n, m.ncols()),
        });
    }

    let mut a = m.clone();
    let mut v = Array2::<f64>::eye(n);
    let scale = a.iter().map(|x| x * x).sum::<f64>().sqrt().max(1e-300);

    for _sweep in 0..100 {
        let off: f64 = (0..n)
            .flat_map(|i| (0..n).filter(move |&j| j != i).map(move |j| (i, j)))
            .map(|(i, j)| a[[i, j]] * a[[i, j]])
            .sum::<f64>()
            .sqrt();
        if off <= 1e-14 * scale {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() <= 1e-300 {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let t = if theta == 0.0 { 1.0 } else { t };
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| crate::stats::cmp_f64(a[[j, j]], a[[i, i]]));
    let values = Array1::from_iter(order.iter().map(|&i| a[[i, i]]));
    let vectors = v.select(Axis(1), &order);
    Ok((values, vectors))
}

/// Solve `a x = b` for a square `a` by Gaussian elimination with partial
/// pivoting; `b` may hold several right-hand sides as columns.
pub fn solve(a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n || b.nrows() != n {
        return Err(SpatialError::DimensionMismatch {
            expected: format!("{} x {} system", n, n),
            got: format!("{} x {} with {} right-hand rows", a.nrows(), a.ncols(), b.nrows()),
        });
    }
    let mut m = a.clone();
    let mut x = b.clone();

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| crate::stats::cmp_f64(m[[i, col]].abs(), m[[j, col]].abs()))
            .unwrap_or(col);
        if m[[pivot, col]].abs() < 1e-12 {
            return Err(SpatialError::NumericalInstability {
                operation: "linear solve".to_string(),
                details: format!("matrix is singular at column {}", col),
            });
        }
        if pivot != col {
            for k in 0..n {
                m.swap([pivot, k], [col, k]);
            }
            for k in 0..x.ncols() {
                x.swap([pivot, k], [col, k]);
            }
        }
        let diag = m[[col, col]];
        for row in (col + 1)..n {
            let factor = m[[row, col]] / diag;
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                m[[row, k]] -= factor * m[[col, k]];
            }
            for k in 0..x.ncols() {
                x[[row, k]] -= factor * x[[col, k]];
            }
        }
    }

    for col in (0..n).rev() {
        for k in 0..x.ncols() {
            let mut acc = x[[col, k]];
            for j in (col + 1)..n {
                acc -= m[[col, j]] * x[[j, k]];
            }
            x[[col, k]] = acc / m[[col, col]];
        }
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_orthonormalize() {
        let mut a = array![[1.0, 1.0], [1.0, 0.0], [0.0, 1.0]];
        orthonormalize_columns(&mut a);
        assert!((a.column(0).dot(&a.column(0)) - 1.0).abs() < 1e-12);
        assert!((a.column(1).dot(&a.column(1)) - 1.0).abs() < 1e-12);
        assert!(a.column(0).dot(&a.column(1)).abs() < 1e-12);
    }

    #[test]
    fn test_symmetric_eigen() {
        let m = array![[2.0, 1.0, 0.0], [1.0, 2.0, 0.0], [0.0, 0.0, 5.0]];
        let (values, vectors) = symmetric_eigen(&m).unwrap();
        assert!((values[0] - 5.0).abs() < 1e-10);
        assert!((values[1] - 3.0).abs() < 1e-10);
        assert!((values[2] - 1.0).abs() < 1e-10);
        // M v = lambda v
        for k in 0..3 {
            let v = vectors.column(k);
            let mv = m.dot(&v);
            for i in 0..3 {
                assert!((mv[i] - values[k] * v[i]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_solve() {
        let a = array![[0.0, 2.0], [3.0, 1.0]];
        let b = array![[4.0], [5.0]];
        let x = solve(&a, &b).unwrap();
        assert!((x[[0, 0]] - 1.0).abs() < 1e-12);
        assert!((x[[1, 0]] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_solve_singular() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        let b = array![[1.0], [2.0]];
        assert!(solve(&a, &b).is_err());
    }
}
