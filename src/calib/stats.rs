//! Small statistics helpers shared by the fits.

use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Probability of a chi2 at least this large given `ndof` degrees of freedom.
///
/// Returns NaN when `ndof` is zero or chi2 is not finite.
pub fn chi2_probability(chi2: f64, ndof: usize) -> f64 {
    if ndof == 0 || !chi2.is_finite() {
        return f64::NAN;
    }
    match ChiSquared::new(ndof as f64) {
        Ok(dist) => dist.sf(chi2.max(0.0)),
        Err(_) => f64::NAN,
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Root mean square, ignoring non-finite values.
pub fn rms(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    mean(&finite.iter().map(|v| v * v).collect::<Vec<_>>()).map(f64::sqrt)
}

/// Inverse-variance weighted mean and its error.
pub fn weighted_mean(values: &[f64], errors: &[f64]) -> Option<(f64, f64)> {
    let mut sum_w = 0.0;
    let mut sum_wx = 0.0;
    for (&v, &e) in values.iter().zip(errors) {
        if !(v.is_finite() && e.is_finite() && e > 0.0) {
            continue;
        }
        let w = 1.0 / (e * e);
        sum_w += w;
        sum_wx += w * v;
    }
    if sum_w > 0.0 {
        Some((sum_wx / sum_w, sum_w.sqrt().recip()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chi2_probability() {
        // Median of chi2 with 2 dof is 2 ln 2.
        let p = chi2_probability(2.0 * 2f64.ln(), 2);
        assert!((p - 0.5).abs() < 1e-10);
        assert!(chi2_probability(1.0, 0).is_nan());
        assert!((chi2_probability(0.0, 5) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rms_skips_nan() {
        let r = rms(&[3.0, f64::NAN, -3.0]).unwrap();
        assert!((r - 3.0).abs() < 1e-12);
        assert!(rms(&[]).is_none());
    }

    #[test]
    fn test_weighted_mean() {
        let (m, e) = weighted_mean(&[1.0, 3.0], &[1.0, 1.0]).unwrap();
        assert!((m - 2.0).abs() < 1e-12);
        assert!((e - 1.0 / 2f64.sqrt()).abs() < 1e-12);

        let (m, _) = weighted_mean(&[1.0, 100.0], &[1.0, 0.0]).unwrap();
        assert_eq!(m, 1.0);
        assert!(weighted_mean(&[1.0], &[f64::NAN]).is_none());
    }
}
