//! Local quadratic regression with adaptive evaluation points
//!
//! Fits a degree-2 polynomial with tricube weights over the nearest
//! `span * n` observations at a set of vertices, then interpolates between
//! vertices with cubic Hermite polynomials using the fitted values and
//! slopes. Vertices are placed at the data range ends and cells are split in
//! half while they are wider than `cut` times the smaller of the two
//! neighbouring bandwidths.

use crate::error::{Result, SpatialError};

/// Fitted value and slope at one vertex
#[derive(Debug, Clone)]
struct Vertex {
    x: f64,
    value: f64,
    slope: f64,
    bandwidth: f64,
}

pub struct LocalQuadraticFit {
    vertices: Vec<Vertex>,
    xs: Vec<f64>,
    ys: Vec<f64>,
    k: usize,
}

impl LocalQuadraticFit {
    pub fn fit(x: &[f64], y: &[f64], span: f64, cut: f64) -> Result<Self> {
        if x.len() != y.len() {
            return Err(SpatialError::DimensionMismatch {
                expected: format!("{} responses", x.len()),
                got: format!("{} responses", y.len()),
            });
        }
        let mut pairs: Vec<(f64, f64)> = x
            .iter()
            .zip(y.iter())
            .filter(|(a, b)| a.is_finite() && b.is_finite())
            .map(|(&a, &b)| (a, b))
            .collect();
        if pairs.len() < 3 {
            return Err(SpatialError::EmptyData {
                reason: format!("local regression needs at least 3 points, got {}", pairs.len()),
            });
        }
        if !(span > 0.0 && span <= 1.0) {
            return Err(SpatialError::parameter("span", "must be in (0, 1]"));
        }
        pairs.sort_by(|a, b| crate::stats::cmp_f64(a.0, b.0));

        let n = pairs.len();
        let k = ((n as f64 * span).floor() as usize).clamp(3, n);
        let mut fit = LocalQuadraticFit {
            vertices: Vec::new(),
            xs: pairs.iter().map(|p| p.0).collect(),
            ys: pairs.iter().map(|p| p.1).collect(),
            k,
        };

        let lo = fit.fit_at(fit.xs[0]);
        let hi = fit.fit_at(fit.xs[n - 1]);
        fit.vertices.push(lo);
        fit.vertices.push(hi);
        fit.split(0, 1, cut);
        fit.vertices.sort_by(|a, b| crate::stats::cmp_f64(a.x, b.x));
        Ok(fit)
    }

    /// Bandwidth at `x`: distance to the k-th nearest observation
    fn bandwidth(&self, x: f64) -> f64 {
        let n = self.xs.len();
        let pos = self.xs.partition_point(|&v| v < x);
        let (mut l, mut r) = (pos, pos);
        // window [l, r) grows towards the closer side until it holds k points
        while r - l < self.k {
            let take_left = match (l > 0, r < n) {
                (true, true) => (x - self.xs[l - 1]) <= (self.xs[r] - x),
                (true, false) => true,
                (false, true) => false,
                (false, false) => break,
            };
            if take_left {
                l -= 1;
            } else {
                r += 1;
            }
        }
        let left = (x - self.xs[l]).abs();
        let right = (self.xs[r - 1] - x).abs();
        left.max(right).max(1e-10)
    }

    fn fit_at(&self, x: f64) -> Vertex {
        let h = self.bandwidth(x) * (1.0 + 1e-10);

        // Weighted normal equations for the basis [1, dx, dx^2 / 2]
        let mut m = [[0.0f64; 3]; 3];
        let mut b = [0.0f64; 3];
        for (&xi, &yi) in self.xs.iter().zip(self.ys.iter()) {
            let dx = xi - x;
            let u = dx.abs() / h;
            if u >= 1.0 {
                continue;
            }
            let t = 1.0 - u * u * u;
            let w = t * t * t;
            let basis = [1.0, dx, dx * dx / 2.0];
            for r in 0..3 {
                b[r] += w * basis[r] * yi;
                for c in 0..3 {
                    m[r][c] += w * basis[r] * basis[c];
                }
            }
        }

        let (value, slope) = solve_value_and_slope(&m, &b);
        Vertex {
            x,
            value,
            slope,
            bandwidth: h,
        }
    }

    fn split(&mut self, left: usize, right: usize, cut: f64) {
        let (lx, rx) = (self.vertices[left].x, self.vertices[right].x);
        let width = rx - lx;
        let min_h = self.vertices[left].bandwidth.min(self.vertices[right].bandwidth);
        if width / min_h <= cut || width < 1e-10 {
            return;
        }
        let mid = self.fit_at((lx + rx) / 2.0);
        let mid_idx = self.vertices.len();
        self.vertices.push(mid);
        self.split(left, mid_idx, cut);
        self.split(mid_idx, right, cut);
    }

    pub fn predict(&self, x: f64) -> f64 {
        let n = self.vertices.len();
        let first = &self.vertices[0];
        let last = &self.vertices[n - 1];
        if x <= first.x {
            return first.value + first.slope * (x - first.x);
        }
        if x >= last.x {
            return last.value + last.slope * (x - last.x);
        }

        let right_idx = self.vertices.partition_point(|v| v.x <= x).min(n - 1);
        let left = &self.vertices[right_idx - 1];
        let right = &self.vertices[right_idx];
        let d = right.x - left.x;
        if d.abs() < 1e-15 {
            return left.value;
        }
        let t = (x - left.x) / d;
        let h_right = t * t * (3.0 - 2.0 * t);
        let h_left = 1.0 - h_right;
        let s_left = t * (1.0 - t) * (1.0 - t);
        let s_right = t * t * (t - 1.0);
        h_left * left.value + h_right * right.value + d * (s_left * left.slope + s_right * right.slope)
    }
}

/// Intercept and linear coefficient of the 3x3 weighted least-squares system
fn solve_value_and_slope(m: &[[f64; 3]; 3], b: &[f64; 3]) -> (f64, f64) {
    let det3 = |a: &[[f64; 3]; 3]| {
        a[0][0] * (a[1][1] * a[2][2] - a[1][2] * a[2][1])
            - a[0][1] * (a[1][0] * a[2][2] - a[1][2] * a[2][0])
            + a[0][2] * (a[1][0] * a[2][1] - a[1][1] * a[2][0])
    };
    let det = det3(m);
    let scale = m[0][0].max(1.0) * m[1][1].max(1.0) * m[2][2].max(1.0);
    if det.abs() < 1e-15 * scale {
        // degenerate neighbourhood: local mean, flat
        return if m[0][0] > 1e-10 { (b[0] / m[0][0], 0.0) } else { (0.0, 0.0) };
    }
    let mut m0 = *m;
    let mut m1 = *m;
    for r in 0..3 {
        m0[r][0] = b[r];
        m1[r][1] = b[r];
    }
    (det3(&m0) / det, det3(&m1) / det)
}
