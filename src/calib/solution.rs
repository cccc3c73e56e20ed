//! Pixel → wavelength solutions built from matched comb lines.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::pipeline::OrderCalibration;
use super::poly::{fit_polynomial, PolynomialFit};
use super::spline::CubicSpline;
use crate::error::{CalibError, Result};
use crate::SPEED_OF_LIGHT;

// ---------------------------------------------------------------------------
// Method selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalibrationMethod {
    Polynomial { degree: usize },
    CubicSpline,
}

impl fmt::Display for CalibrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationMethod::Polynomial { degree } => write!(f, "polynomial (degree {degree})"),
            CalibrationMethod::CubicSpline => write!(f, "cubic spline"),
        }
    }
}

// ---------------------------------------------------------------------------
// Calibration points
// ---------------------------------------------------------------------------

/// Matched comb lines of one order: fitted pixel centers, true
/// wavelengths (Å), weights and comb mode numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CalibrationPoints {
    pub pixels: Vec<f64>,
    pub wavelengths: Vec<f64>,
    pub errors: Vec<f64>,
    pub modes: Vec<u64>,
}

impl CalibrationPoints {
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn push(&mut self, pixel: f64, wavelength: f64, error: f64, mode: u64) {
        self.pixels.push(pixel);
        self.wavelengths.push(wavelength);
        self.errors.push(error);
        self.modes.push(mode);
    }

    /// Points at the given positions.
    pub fn subset(&self, indices: impl IntoIterator<Item = usize>) -> Self {
        let mut out = Self::default();
        for i in indices {
            out.push(self.pixels[i], self.wavelengths[i], self.errors[i], self.modes[i]);
        }
        out
    }

    /// Sorted by pixel, dropping points that repeat a pixel position.
    pub fn sorted(&self) -> Self {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| self.pixels[a].total_cmp(&self.pixels[b]));
        order.dedup_by(|a, b| self.pixels[*a] == self.pixels[*b]);
        self.subset(order)
    }
}

// ---------------------------------------------------------------------------
// Solutions
// ---------------------------------------------------------------------------

pub trait WavelengthSolution {
    /// Wavelength in Å at a (fractional) pixel position.
    fn wavelength_at(&self, pixel: f64) -> f64;

    fn method(&self) -> CalibrationMethod;

    /// Wavelength of every pixel `0..n_pixels`.
    fn evaluate_grid(&self, n_pixels: usize) -> Vec<f64> {
        (0..n_pixels).map(|p| self.wavelength_at(p as f64)).collect()
    }
}

#[derive(Debug, Clone)]
pub struct PolynomialSolution {
    pub fit: PolynomialFit,
}

impl WavelengthSolution for PolynomialSolution {
    fn wavelength_at(&self, pixel: f64) -> f64 {
        self.fit.eval(pixel)
    }

    fn method(&self) -> CalibrationMethod {
        CalibrationMethod::Polynomial {
            degree: self.fit.degree,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SplineSolution {
    pub spline: CubicSpline,
}

impl WavelengthSolution for SplineSolution {
    fn wavelength_at(&self, pixel: f64) -> f64 {
        self.spline.evaluate(pixel)
    }

    fn method(&self) -> CalibrationMethod {
        CalibrationMethod::CubicSpline
    }
}

/// Build a wavelength solution from calibration points.
pub fn fit_points(
    method: CalibrationMethod,
    points: &CalibrationPoints,
) -> Result<Box<dyn WavelengthSolution>> {
    let points = points.sorted();
    match method {
        CalibrationMethod::Polynomial { degree } => {
            let fit = fit_polynomial(&points.pixels, &points.wavelengths, &points.errors, degree)?;
            if !fit.valid {
                return Err(CalibError::Singular("polynomial wavelength solution"));
            }
            Ok(Box::new(PolynomialSolution { fit }))
        }
        CalibrationMethod::CubicSpline => {
            let spline = CubicSpline::new(points.pixels, points.wavelengths)?;
            Ok(Box::new(SplineSolution { spline }))
        }
    }
}

/// Wavelength solution of a calibrated order from its converged line fits.
pub fn fit_solution(
    method: CalibrationMethod,
    order: &OrderCalibration,
) -> Result<Box<dyn WavelengthSolution>> {
    if !order.is_calibrated() {
        return Err(CalibError::InvalidArgument(format!(
            "order {} was not calibrated",
            order.order
        )));
    }
    fit_points(method, &order.calibration_points())
}

/// Wavelength error expressed as a velocity, m/s.
pub fn velocity_residual(fitted: f64, truth: f64) -> f64 {
    (fitted - truth) / truth * SPEED_OF_LIGHT
}

/// Residual of every point against `solution`, m/s.
pub fn residuals(solution: &dyn WavelengthSolution, points: &CalibrationPoints) -> Vec<f64> {
    points
        .pixels
        .iter()
        .zip(&points.wavelengths)
        .map(|(&p, &w)| velocity_residual(solution.wavelength_at(p), w))
        .collect()
}
