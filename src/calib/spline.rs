//! Natural cubic spline interpolation.
//!
//! Each segment is `S(x) = a + b(x-xi) + c(x-xi)² + d(x-xi)³` with second
//! derivatives forced to zero at both ends. Used both as a wavelength
//! solution through the comb lines and to resample template spectra.

use crate::error::{CalibError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    coeffs: Vec<[f64; 4]>,
}

impl CubicSpline {
    /// Build the spline through `(x, y)`.
    ///
    /// `x` must be strictly increasing and hold at least two points.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        if x.len() != y.len() {
            return Err(CalibError::InvalidArgument(format!(
                "x has {} values but y has {}",
                x.len(),
                y.len()
            )));
        }
        if x.len() < 2 {
            return Err(CalibError::TooFewPoints {
                needed: 2,
                got: x.len(),
            });
        }
        if x.iter().chain(&y).any(|v| !v.is_finite()) {
            return Err(CalibError::InvalidArgument(
                "non-finite value in spline knots".to_string(),
            ));
        }
        if x.windows(2).any(|w| w[1] <= w[0]) {
            return Err(CalibError::InvalidArgument(
                "x values must be strictly increasing".to_string(),
            ));
        }

        let coeffs = natural_coefficients(&x, &y);
        Ok(Self { x, y, coeffs })
    }

    /// Knot range `(first, last)`.
    pub fn domain(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    pub fn contains(&self, x: f64) -> bool {
        let (lo, hi) = self.domain();
        x >= lo && x <= hi
    }

    /// Value at `x`. Outside the knot range the spline continues as a
    /// straight line with the end slope, which keeps the second derivative
    /// zero there.
    pub fn evaluate(&self, x: f64) -> f64 {
        let last = self.x.len() - 1;
        if x <= self.x[0] {
            return self.y[0] + (x - self.x[0]) * self.coeffs[0][1];
        }
        if x >= self.x[last] {
            return self.y[last] + (x - self.x[last]) * self.end_slope();
        }

        let segment = self.find_segment(x);
        let dx = x - self.x[segment];
        let [a, b, c, d] = self.coeffs[segment];
        a + dx * (b + dx * (c + dx * d))
    }

    /// First derivative at the last knot.
    fn end_slope(&self) -> f64 {
        let last = self.x.len() - 1;
        let h = self.x[last] - self.x[last - 1];
        let [_, b, c, d] = self.coeffs[last - 1];
        b + h * (2.0 * c + 3.0 * h * d)
    }

    /// Left knot index of the segment containing `x` (binary search).
    fn find_segment(&self, x: f64) -> usize {
        self.x.partition_point(|&knot| knot <= x).saturating_sub(1).min(self.coeffs.len() - 1)
    }
}

/// Solve the tridiagonal system for natural boundary conditions.
fn natural_coefficients(x: &[f64], y: &[f64]) -> Vec<[f64; 4]> {
    let n = x.len();
    let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();

    let mut alpha = vec![0.0; n];
    for i in 1..n - 1 {
        alpha[i] = 3.0 / h[i] * (y[i + 1] - y[i]) - 3.0 / h[i - 1] * (y[i] - y[i - 1]);
    }

    let mut l = vec![1.0; n];
    let mut mu = vec![0.0; n];
    let mut z = vec![0.0; n];
    for i in 1..n - 1 {
        l[i] = 2.0 * (x[i + 1] - x[i - 1]) - h[i - 1] * mu[i - 1];
        mu[i] = h[i] / l[i];
        z[i] = (alpha[i] - h[i - 1] * z[i - 1]) / l[i];
    }

    let mut c = vec![0.0; n];
    let mut coeffs = vec![[0.0; 4]; n - 1];
    for j in (0..n - 1).rev() {
        c[j] = z[j] - mu[j] * c[j + 1];
        let b = (y[j + 1] - y[j]) / h[j] - h[j] * (c[j + 1] + 2.0 * c[j]) / 3.0;
        let d = (c[j + 1] - c[j]) / (3.0 * h[j]);
        coeffs[j] = [y[j], b, c[j], d];
    }
    coeffs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_interpolation() {
        let spline = CubicSpline::new(vec![0.0, 1.0], vec![0.0, 1.0]).unwrap();
        assert!((spline.evaluate(0.5) - 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_passes_through_knots() {
        let x = vec![0.0, 1.0, 3.0, 6.0, 10.0];
        let y = vec![0.0, 1.0, 0.0, -1.0, 0.5];
        let spline = CubicSpline::new(x.clone(), y.clone()).unwrap();
        for (xi, yi) in x.iter().zip(&y) {
            assert!((spline.evaluate(*xi) - yi).abs() < 1e-10);
        }
    }

    #[test]
    fn test_continuity_across_knots() {
        let x = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let y = vec![0.0, 2.0, 8.0, 18.0, 32.0];
        let spline = CubicSpline::new(x, y).unwrap();
        let left = spline.evaluate(2.0 - 1e-9);
        let right = spline.evaluate(2.0 + 1e-9);
        assert!((left - right).abs() < 1e-6);
    }

    #[test]
    fn test_constant_data() {
        let spline = CubicSpline::new(vec![0.0, 1.0, 2.0, 3.0], vec![5.0; 4]).unwrap();
        for x in [0.5, 1.5, 2.5] {
            assert!((spline.evaluate(x) - 5.0).abs() < 1e-10);
        }
    }

    #[test]
    fn test_linear_continuation_outside_range() {
        let spline = CubicSpline::new(vec![0.0, 1.0, 2.0, 3.0], vec![0.0, 1.0, 4.0, 9.0]).unwrap();
        let eps = 1e-7;
        let left_slope = (spline.evaluate(eps) - spline.evaluate(0.0)) / eps;
        let right_slope = (spline.evaluate(3.0) - spline.evaluate(3.0 - eps)) / eps;
        assert!(left_slope > 0.0 && right_slope > 0.0);
        assert!((spline.evaluate(-1.0) - (0.0 - left_slope)).abs() < 1e-5);
        assert!((spline.evaluate(5.0) - (9.0 + 2.0 * right_slope)).abs() < 1e-5);
        assert!(spline.evaluate(3.5) > spline.evaluate(3.0));
        assert!(spline.contains(1.5));
        assert!(!spline.contains(3.5));
        assert_eq!(spline.domain(), (0.0, 3.0));
    }

    #[test]
    fn test_smooth_function_accuracy() {
        let x: Vec<f64> = (0..50).map(|i| i as f64 * 0.2).collect();
        let y: Vec<f64> = x.iter().map(|v| v.sin()).collect();
        let spline = CubicSpline::new(x, y).unwrap();
        for t in [1.05, 3.33, 6.01, 8.5] {
            assert!((spline.evaluate(t) - f64::sin(t)).abs() < 1e-3);
        }
    }

    #[test]
    fn test_invalid_input() {
        assert!(CubicSpline::new(vec![0.0, 1.0, 2.0], vec![0.0, 1.0]).is_err());
        assert!(CubicSpline::new(vec![1.0], vec![1.0]).is_err());
        assert!(CubicSpline::new(vec![0.0, 2.0, 1.0], vec![0.0, 4.0, 1.0]).is_err());
        assert!(CubicSpline::new(vec![0.0, 1.0, 1.0], vec![0.0, 1.0, 2.0]).is_err());
        assert!(CubicSpline::new(vec![0.0, f64::NAN], vec![0.0, 1.0]).is_err());
    }
}
