//! Super-Gaussian fits of individual comb lines.

use serde::Serialize;

use super::lm::{self, LmOptions, Model};
use super::stats::chi2_probability;
use crate::config::LineFitConfig;

/// Number of free parameters of the line profile.
pub const N_PARAMS: usize = 5;

/// Fewest usable pixels in a fit window.
pub const MIN_POINTS: usize = N_PARAMS + 1;

// ---------------------------------------------------------------------------
// Line profile
// ---------------------------------------------------------------------------

/// `A·exp(-z^P) + C` with `z = (x - μ)² / (2σ²)`.
///
/// Parameter order: `[A, μ, σ, P, C]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuperGaussian;

impl SuperGaussian {
    pub fn eval(x: f64, amplitude: f64, center: f64, width: f64, shape: f64, offset: f64) -> f64 {
        let z = (x - center).powi(2) / (2.0 * width * width);
        amplitude * (-z.powf(shape)).exp() + offset
    }
}

impl Model for SuperGaussian {
    fn n_params(&self) -> usize {
        N_PARAMS
    }

    fn value(&self, x: f64, p: &[f64]) -> f64 {
        Self::eval(x, p[0], p[1], p[2], p[3], p[4])
    }

    fn gradient(&self, x: f64, p: &[f64], grad: &mut [f64]) {
        let [a, mu, sigma, shape, _] = [p[0], p[1], p[2], p[3], p[4]];
        let dx = x - mu;
        let z = dx * dx / (2.0 * sigma * sigma);
        let zp = z.powf(shape);
        let e = (-zp).exp();

        grad[0] = e;
        grad[4] = 1.0;
        if z > 0.0 {
            // ∂f/∂z = -A·e·P·z^(P-1)
            let dfdz = -a * e * shape * zp / z;
            grad[1] = dfdz * (-dx / (sigma * sigma));
            grad[2] = dfdz * (-2.0 * z / sigma);
            grad[3] = -a * e * zp * z.ln();
        } else {
            grad[1] = 0.0;
            grad[2] = 0.0;
            grad[3] = 0.0;
        }
    }
}

// ---------------------------------------------------------------------------
// Fit results
// ---------------------------------------------------------------------------

/// A fitted value with its 1σ uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Estimate {
    pub value: f64,
    pub error: f64,
}

impl Estimate {
    pub const NAN: Estimate = Estimate {
        value: f64::NAN,
        error: f64::NAN,
    };

    pub fn new(value: f64, error: f64) -> Self {
        Self { value, error }
    }
}

/// Super-Gaussian fit of one comb line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakFit {
    pub amplitude: Estimate,
    /// Line center in pixels.
    pub center: Estimate,
    pub width: Estimate,
    pub offset: Estimate,
    pub shape: Estimate,
    pub chi2: f64,
    pub ndof: usize,
    pub converged: bool,
    pub index_start: usize,
    pub index_end: usize,
    pub probability: f64,
}

impl PeakFit {
    fn failed(index_start: usize, index_end: usize) -> Self {
        Self {
            amplitude: Estimate::NAN,
            center: Estimate::NAN,
            width: Estimate::NAN,
            offset: Estimate::NAN,
            shape: Estimate::NAN,
            chi2: f64::NAN,
            ndof: 0,
            converged: false,
            index_start,
            index_end,
            probability: f64::NAN,
        }
    }

    /// Evaluate the fitted profile.
    pub fn model(&self, x: f64) -> f64 {
        SuperGaussian::eval(
            x,
            self.amplitude.value,
            self.center.value,
            self.width.value,
            self.shape.value,
            self.offset.value,
        )
    }
}

// ---------------------------------------------------------------------------
// Fitting
// ---------------------------------------------------------------------------

/// Fit the line in `spectrum[start..end]`.
///
/// Pixels with non-finite flux or non-positive uncertainty are skipped.
/// A window with too few usable pixels, or a fit that fails, yields a
/// `PeakFit` with `converged == false`.
pub fn fit_peak(
    spectrum: &[f64],
    uncertainty: &[f64],
    (start, end): (usize, usize),
    cfg: &LineFitConfig,
) -> PeakFit {
    let end = end.min(spectrum.len()).min(uncertainty.len());
    if start >= end {
        return PeakFit::failed(start, end);
    }

    let mut x = Vec::with_capacity(end - start);
    let mut y = Vec::with_capacity(end - start);
    let mut ey = Vec::with_capacity(end - start);
    for i in start..end {
        let (f, e) = (spectrum[i], uncertainty[i]);
        if f.is_finite() && e.is_finite() && e > 0.0 {
            x.push(i as f64);
            y.push(f);
            ey.push(e);
        }
    }
    if x.len() < MIN_POINTS {
        return PeakFit::failed(start, end);
    }

    let lo = y.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let amplitude = if hi > lo { hi - lo } else { cfg.amplitude };
    let offset = if lo.is_finite() { lo } else { cfg.offset };
    let center = (start + end - 1) as f64 / 2.0;

    let initial = [amplitude, center, cfg.width, cfg.shape, offset];
    let options = LmOptions {
        max_iterations: cfg.max_iterations,
        ..LmOptions::default()
    };

    let fit = match lm::minimize(&SuperGaussian, &x, &y, &ey, &initial, &options) {
        Ok(fit) => fit,
        Err(e) => {
            log::debug!("Line fit in [{start}, {end}) failed: {e}");
            return PeakFit::failed(start, end);
        }
    };

    let ndof = x.len() - N_PARAMS;
    let p = &fit.params;
    let err = &fit.errors;
    let center_inside = p[1] >= start as f64 && p[1] < end as f64;

    PeakFit {
        amplitude: Estimate::new(p[0], err[0]),
        center: Estimate::new(p[1], err[1]),
        width: Estimate::new(p[2].abs(), err[2]),
        shape: Estimate::new(p[3], err[3]),
        offset: Estimate::new(p[4], err[4]),
        chi2: fit.chi2,
        ndof,
        converged: fit.converged && center_inside,
        index_start: start,
        index_end: end,
        probability: chi2_probability(fit.chi2, ndof),
    }
}

/// Fit every window in `ranges`.
pub fn fit_peaks(
    spectrum: &[f64],
    uncertainty: &[f64],
    ranges: &[(usize, usize)],
    cfg: &LineFitConfig,
) -> Vec<PeakFit> {
    ranges
        .iter()
        .map(|&range| {
            let fit = fit_peak(spectrum, uncertainty, range, cfg);
            log::debug!(
                "Peak fitted. N = {:2}   Chi2 = {:5.1}   Center = {:8.3}+-{:5.3}",
                fit.ndof + N_PARAMS,
                fit.chi2,
                fit.center.value,
                fit.center.error
            );
            fit
        })
        .collect()
}
