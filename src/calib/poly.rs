//! Weighted polynomial fits of the pixel → wavelength relation.

use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use super::lineshape::Estimate;
use super::stats::chi2_probability;
use crate::error::{CalibError, Result};

pub const MIN_DEGREE: usize = 1;
pub const MAX_DEGREE: usize = 9;

/// Result of a weighted polynomial fit.
///
/// The polynomial is expressed in the rescaled abscissa
/// `t = (x - x_center) / x_scale`, which maps the fitted range to [-1, 1].
/// Use [`PolynomialFit::eval`] to evaluate at a pixel, or
/// [`PolynomialFit::pixel_coefficients`] for the plain power series in x.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolynomialFit {
    pub degree: usize,
    /// Lowest order first.
    pub coefficients: Vec<Estimate>,
    pub x_center: f64,
    pub x_scale: f64,
    pub chi2: f64,
    pub ndof: usize,
    pub probability: f64,
    pub valid: bool,
}

impl PolynomialFit {
    pub fn eval(&self, x: f64) -> f64 {
        let t = (x - self.x_center) / self.x_scale;
        self.coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, c| acc * t + c.value)
    }

    /// Coefficients of the same polynomial in powers of x, lowest first.
    pub fn pixel_coefficients(&self) -> Vec<f64> {
        let n = self.coefficients.len();
        let mut out = vec![0.0; n];
        // (x - c)^k / s^k expanded with binomial coefficients.
        for (k, coeff) in self.coefficients.iter().enumerate() {
            let scale = coeff.value / self.x_scale.powi(k as i32);
            let mut binom = 1.0;
            for j in 0..=k {
                out[j] += scale * binom * (-self.x_center).powi((k - j) as i32);
                binom = binom * (k - j) as f64 / (j + 1) as f64;
            }
        }
        out
    }
}

/// Fit `y ± sigma` with a polynomial of `degree` in `x` by minimising chi2.
pub fn fit_polynomial(x: &[f64], y: &[f64], sigma: &[f64], degree: usize) -> Result<PolynomialFit> {
    if !(MIN_DEGREE..=MAX_DEGREE).contains(&degree) {
        return Err(CalibError::UnsupportedDegree(degree));
    }
    if x.len() != y.len() || x.len() != sigma.len() {
        return Err(CalibError::InvalidArgument(
            "x, y and sigma must have the same length".to_string(),
        ));
    }
    let n_coeffs = degree + 1;
    if x.len() < n_coeffs {
        return Err(CalibError::TooFewPoints {
            needed: n_coeffs,
            got: x.len(),
        });
    }
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return Err(CalibError::InvalidArgument(
            "non-finite value in fit data".to_string(),
        ));
    }
    if sigma.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
        return Err(CalibError::InvalidArgument(
            "uncertainties must be finite and positive".to_string(),
        ));
    }

    let lo = x.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let x_center = (lo + hi) / 2.0;
    let x_scale = if hi > lo { (hi - lo) / 2.0 } else { 1.0 };

    let n = x.len();
    let design = DMatrix::from_fn(n, n_coeffs, |i, j| {
        ((x[i] - x_center) / x_scale).powi(j as i32) / sigma[i]
    });
    let rhs = DVector::from_fn(n, |i, _| y[i] / sigma[i]);

    let svd = design.clone().svd(true, true);
    let eps = svd.singular_values.max() * 1e-13;
    let solution = svd
        .solve(&rhs, eps)
        .map_err(|_| CalibError::Singular("polynomial normal equations"))?;

    let residual = &design * &solution - &rhs;
    let chi2 = residual.norm_squared();
    let ndof = n - n_coeffs;

    let covariance = (design.transpose() * &design).try_inverse();
    let errors: Vec<f64> = match &covariance {
        Some(cov) => (0..n_coeffs).map(|i| cov[(i, i)].sqrt()).collect(),
        None => vec![f64::NAN; n_coeffs],
    };
    let valid = covariance.is_some()
        && errors.iter().all(|e| e.is_finite())
        && solution.iter().all(|c| c.is_finite());

    Ok(PolynomialFit {
        degree,
        coefficients: solution
            .iter()
            .zip(&errors)
            .map(|(&v, &e)| Estimate::new(v, e))
            .collect(),
        x_center,
        x_scale,
        chi2,
        ndof,
        probability: chi2_probability(chi2, ndof),
        valid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_cubic_recovered() {
        let truth = [5000.0, 0.01, -2e-7, 3e-12];
        let x: Vec<f64> = (0..40).map(|i| 50.0 + i as f64 * 180.0).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|&xi| truth.iter().rev().fold(0.0, |acc, c| acc * xi + c))
            .collect();
        let sigma = vec![1e-3; x.len()];

        let fit = fit_polynomial(&x, &y, &sigma, 3).unwrap();
        assert!(fit.valid);
        assert!(fit.chi2 < 1e-10);
        assert_eq!(fit.ndof, 36);
        for (&xi, &yi) in x.iter().zip(&y) {
            assert!((fit.eval(xi) - yi).abs() < 1e-8);
        }
        let raw = fit.pixel_coefficients();
        for (r, t) in raw.iter().zip(truth) {
            assert!(((r - t) / t).abs() < 1e-6, "{r} vs {t}");
        }
    }

    #[test]
    fn test_high_degree_is_conditioned() {
        let x: Vec<f64> = (0..60).map(|i| i as f64 * 130.0).collect();
        let y: Vec<f64> = x.iter().map(|&xi| 4500.0 + 0.012 * xi).collect();
        let sigma = vec![0.01; x.len()];
        let fit = fit_polynomial(&x, &y, &sigma, 9).unwrap();
        assert!(fit.valid);
        for (&xi, &yi) in x.iter().zip(&y) {
            assert!((fit.eval(xi) - yi).abs() < 1e-6);
        }
    }

    #[test]
    fn test_weights_pull_towards_precise_points() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [0.0, 1.0, 2.0, 10.0];
        let precise = fit_polynomial(&x, &y, &[0.01, 0.01, 0.01, 100.0], 1).unwrap();
        assert!((precise.eval(1.0) - 1.0).abs() < 1e-3);
        let chi2_expected: f64 = x
            .iter()
            .zip(&y)
            .zip(&[0.01, 0.01, 0.01, 100.0])
            .map(|((&xi, &yi), &s)| ((yi - precise.eval(xi)) / s).powi(2))
            .sum();
        assert!((precise.chi2 - chi2_expected).abs() < 1e-9);
    }

    #[test]
    fn test_degree_limits() {
        let x = [0.0, 1.0, 2.0];
        let s = [1.0; 3];
        assert_eq!(
            fit_polynomial(&x, &x, &s, 0),
            Err(CalibError::UnsupportedDegree(0))
        );
        assert_eq!(
            fit_polynomial(&x, &x, &s, 10),
            Err(CalibError::UnsupportedDegree(10))
        );
        assert_eq!(
            fit_polynomial(&x, &x, &s, 3),
            Err(CalibError::TooFewPoints { needed: 4, got: 3 })
        );
    }

    #[test]
    fn test_exactly_determined_has_zero_dof() {
        let x = [0.0, 1.0, 2.0];
        let y = [1.0, 3.0, 7.0];
        let fit = fit_polynomial(&x, &y, &[1.0; 3], 2).unwrap();
        assert_eq!(fit.ndof, 0);
        assert!(fit.probability.is_nan());
        assert!((fit.eval(1.5) - (1.0 + 1.5 + 1.5 * 1.5)).abs() < 1e-9);
    }
}
