//! P-value of a normal test statistic

use statrs::function::erf::erfc;

/// Two-sided p-value of a standard normal statistic, `2 * pnorm(-|z|)`
pub fn normal_two_sided(z: f64) -> f64 {
    if z.is_nan() {
        return f64::NAN;
    }
    erfc(z.abs() / std::f64::consts::SQRT_2).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_sided_symmetric() {
        for &z in &[0.5, 1.959963984540054, 2.0, 3.7] {
            assert_eq!(normal_two_sided(z).to_bits(), normal_two_sided(-z).to_bits());
            assert_eq!(normal_two_sided(z), erfc(z / std::f64::consts::SQRT_2));
        }
        assert!((normal_two_sided(0.0) - 1.0).abs() < 1e-15);
        // 2 * pnorm(-1.959964) = 0.05
        assert!((normal_two_sided(1.959963984540054) - 0.05).abs() < 1e-10);
        // 2 * pnorm(-2) = 0.04550026
        assert!((normal_two_sided(2.0) - 0.04550026389635842).abs() < 1e-10);
    }

    #[test]
    fn test_extreme_and_nan() {
        assert!(normal_two_sided(40.0) >= 0.0);
        assert!(normal_two_sided(40.0) < 1e-300);
        assert!(normal_two_sided(f64::NAN).is_nan());
    }
}
