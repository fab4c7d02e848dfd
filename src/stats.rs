//! Small descriptive-statistics helpers shared across modules

use std::cmp::Ordering;

/// Arithmetic mean; NaN for an empty slice
pub fn mean(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    x.iter().sum::<f64>() / x.len() as f64
}

/// Sample variance with n - 1 denominator; NaN when fewer than two values
pub fn sample_variance(x: &[f64]) -> f64 {
    let n = x.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(x);
    x.iter().map(|&v| (v - m) * (v - m)).sum::<f64>() / (n - 1) as f64
}

/// Quantile with linear interpolation between order statistics (R type 7)
pub fn quantile(x: &[f64], prob: f64) -> f64 {
    let mut sorted: Vec<f64> = x.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let h = (sorted.len() - 1) as f64 * prob.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

pub fn median(x: &[f64]) -> f64 {
    quantile(x, 0.5)
}

/// Minimum and maximum, ignoring NaN; `None` for an empty slice
pub fn min_max(x: &[f64]) -> Option<(f64, f64)> {
    x.iter().filter(|v| !v.is_nan()).fold(None, |acc, &v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Total order on f64 for sorting, NaN last
pub fn cmp_f64(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantile_type7() {
        let x = [1.0, 2.0, 3.0, 4.0];
        assert!((median(&x) - 2.5).abs() < 1e-12);
        assert!((quantile(&x, 0.25) - 1.75).abs() < 1e-12);
        assert_eq!(quantile(&[], 0.5).is_nan(), true);
    }

    #[test]
    fn test_variance() {
        let x = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((sample_variance(&x) - 32.0 / 7.0).abs() < 1e-12);
        assert!(sample_variance(&[1.0]).is_nan());
    }

    #[test]
    fn test_min_max_and_cmp() {
        assert_eq!(min_max(&[3.0, f64::NAN, -1.0, 2.0]), Some((-1.0, 3.0)));
        assert_eq!(min_max(&[]), None);
        let mut v = vec![2.0, f64::NAN, 1.0];
        v.sort_by(|a, b| cmp_f64(*a, *b));
        assert_eq!(v[0], 1.0);
        assert!(v[2].is_nan());
    }
}
