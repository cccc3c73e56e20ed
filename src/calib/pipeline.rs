use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use super::comb::{CombLine, FrequencyComb};
use super::lineshape::{fit_peaks, PeakFit};
use super::peaks::{find_peaks, peak_index_ranges, Peak};
use super::solution::CalibrationPoints;
use crate::config::CalibrationConfig;
use crate::error::{CalibError, Result};
use crate::data::loader::load_file;
use crate::data::model::{EchelleOrder, Exposure};

// ---------------------------------------------------------------------------
// Per-order result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OrderStatus {
    Calibrated,
    /// Fewer comb lines than required were detected.
    Skipped { peaks_found: usize },
}

/// Everything measured on one order of an LFC exposure.
#[derive(Debug, Clone, Serialize)]
pub struct OrderCalibration {
    pub order: usize,
    pub status: OrderStatus,
    pub n_pixels: usize,
    pub peaks: Vec<Peak>,
    pub fits: Vec<PeakFit>,
    /// Comb line matched to each peak, aligned with `fits`.
    pub lines: Vec<Option<CombLine>>,
    /// Pre-existing wavelength solution sampled at each peak pixel.
    pub given_wavelengths: Vec<f64>,
}

impl OrderCalibration {
    pub fn is_calibrated(&self) -> bool {
        self.status == OrderStatus::Calibrated
    }

    pub fn converged_fits(&self) -> usize {
        self.fits.iter().filter(|f| f.converged).count()
    }

    /// Converged fits with a matched comb line, weighted by the fitted width.
    pub fn calibration_points(&self) -> CalibrationPoints {
        let mut points = CalibrationPoints::default();
        for (fit, line) in self.fits.iter().zip(&self.lines) {
            let Some(line) = line else { continue };
            let usable = fit.converged
                && fit.center.value.is_finite()
                && fit.width.value.is_finite()
                && fit.width.value > 0.0;
            if usable {
                points.push(fit.center.value, line.wavelength, fit.width.value, line.mode);
            }
        }
        points
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Detect, fit and identify the comb lines of one order.
///
/// The order's spectrum, uncertainty and wavelength vectors must have the
/// same length.
pub fn calibrate_order(order: &EchelleOrder, config: &CalibrationConfig) -> Result<OrderCalibration> {
    if !order.is_consistent() {
        return Err(CalibError::InvalidArgument(format!(
            "order {}: spectrum, uncertainty and wavelength lengths differ ({}, {}, {})",
            order.order,
            order.spectrum.len(),
            order.uncertainty.len(),
            order.wavelength.len()
        )));
    }
    let factor = config.error_factor();
    let uncertainty: Vec<f64> = order.uncertainty.iter().map(|e| e * factor).collect();

    let peaks = find_peaks(
        &order.spectrum,
        config.peaks.distance,
        config.peaks.prominence,
        config.peaks.wlen,
    );

    let skipped = |peaks: Vec<Peak>| OrderCalibration {
        order: order.order,
        status: OrderStatus::Skipped {
            peaks_found: peaks.len(),
        },
        n_pixels: order.len(),
        peaks,
        fits: Vec::new(),
        lines: Vec::new(),
        given_wavelengths: Vec::new(),
    };

    if peaks.len() < config.peaks.min_peaks.max(2) {
        log::warn!("Order {}: only {} peaks found, skipping", order.order, peaks.len());
        return Ok(skipped(peaks));
    }

    let locations: Vec<usize> = peaks.iter().map(|p| p.index).collect();
    let ranges = match peak_index_ranges(&locations, config.peaks.window, order.len()) {
        Ok(r) => r,
        Err(e) => {
            log::warn!("Order {}: {e}", order.order);
            return Ok(skipped(peaks));
        }
    };

    let fits = fit_peaks(&order.spectrum, &uncertainty, &ranges, &config.line_fit);
    let given_wavelengths: Vec<f64> = locations.iter().map(|&i| order.wavelength[i]).collect();
    let lines = FrequencyComb::from(config.comb).match_lines(&given_wavelengths);

    let failed = fits.iter().filter(|f| !f.converged).count();
    if failed > 0 {
        log::warn!("Order {}: {failed} of {} line fits did not converge", order.order, fits.len());
    }

    Ok(OrderCalibration {
        order: order.order,
        status: OrderStatus::Calibrated,
        n_pixels: order.len(),
        peaks,
        fits,
        lines,
        given_wavelengths,
    })
}

/// Calibrate the configured order range, restricted to orders present in
/// the exposure.
pub fn calibrate_exposure(exposure: &Exposure, config: &CalibrationConfig) -> Vec<OrderCalibration> {
    let range = config.order_range();
    let results: Vec<OrderCalibration> = exposure
        .orders
        .iter()
        .filter(|o| range.contains(&o.order))
        .filter_map(|o| match calibrate_order(o, config) {
            Ok(r) => Some(r),
            Err(e) => {
                log::warn!("{e}, skipping");
                None
            }
        })
        .collect();

    let calibrated = results.iter().filter(|r| r.is_calibrated()).count();
    log::info!(
        "Calibrated {calibrated} of {} orders in range {}..{}",
        results.len(),
        range.start,
        range.end
    );
    results
}

/// Load an exposure from disk and calibrate it.
pub fn load_and_calibrate(
    path: &Path,
    config: &CalibrationConfig,
) -> anyhow::Result<(Exposure, Vec<OrderCalibration>)> {
    let exposure = load_file(path).with_context(|| format!("loading {}", path.display()))?;
    let results = calibrate_exposure(&exposure, config);
    Ok((exposure, results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calib::solution::{fit_points, residuals, CalibrationMethod};
    use crate::calib::stats::rms;
    use crate::data::synthetic::{lfc_exposure, LfcParams};

    fn config_for(params: &LfcParams) -> CalibrationConfig {
        CalibrationConfig {
            first_order: params.first_order,
            last_order: params.first_order + params.n_orders,
            ..Default::default()
        }
    }

    #[test]
    fn test_synthetic_exposure_calibrates() {
        let params = LfcParams::default();
        let exposure = lfc_exposure(&params, 1);
        let results = calibrate_exposure(&exposure, &config_for(&params));

        assert_eq!(results.len(), params.n_orders);
        for r in &results {
            assert!(r.is_calibrated(), "order {} not calibrated", r.order);
            assert!(r.fits.len() > 100);
            assert!(r.converged_fits() as f64 > 0.95 * r.fits.len() as f64);
            assert_eq!(r.fits.len(), r.lines.len());
        }
    }

    #[test]
    fn test_comb_modes_consecutive() {
        let params = LfcParams::default();
        let exposure = lfc_exposure(&params, 2);
        let results = calibrate_exposure(&exposure, &config_for(&params));
        let points = results[0].calibration_points();
        // Wavelength increases with pixel, so modes decrease by one per line.
        assert!(points.modes.windows(2).all(|w| w[0] == w[1] + 1));
    }

    #[test]
    fn test_polynomial_residuals_small() {
        let params = LfcParams::default();
        let exposure = lfc_exposure(&params, 3);
        let results = calibrate_exposure(&exposure, &config_for(&params));
        for r in &results {
            let points = r.calibration_points();
            let sol = fit_points(CalibrationMethod::Polynomial { degree: 3 }, &points).unwrap();
            let res = rms(&residuals(sol.as_ref(), &points)).unwrap();
            assert!(res < 30.0, "order {}: rms {res} m/s", r.order);
        }
    }

    #[test]
    fn test_flat_order_skipped() {
        let order = EchelleOrder::new(3, vec![0.5; 500], vec![0.01; 500], vec![5000.0; 500]);
        let r = calibrate_order(&order, &CalibrationConfig::default()).unwrap();
        assert_eq!(r.status, OrderStatus::Skipped { peaks_found: 0 });
        assert!(r.calibration_points().is_empty());
    }

    #[test]
    fn test_orders_outside_range_ignored() {
        let params = LfcParams::default();
        let exposure = lfc_exposure(&params, 4);
        let config = CalibrationConfig {
            first_order: params.first_order + 1,
            last_order: params.first_order + 2,
            ..Default::default()
        };
        let results = calibrate_exposure(&exposure, &config);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].order, params.first_order + 1);
    }

    #[test]
    fn test_error_factor_scales_chi2() {
        let params = LfcParams::default();
        let exposure = lfc_exposure(&params, 5);
        let order = &exposure.orders[0];
        let plain = calibrate_order(order, &config_for(&params)).unwrap();
        let corrected = calibrate_order(
            order,
            &CalibrationConfig {
                correct_errors: true,
                custom_error_factor: Some(2.0),
                ..config_for(&params)
            },
        )
        .unwrap();
        let (a, b) = (&plain.fits[10], &corrected.fits[10]);
        assert!(a.converged && b.converged);
        assert!((a.chi2 / b.chi2 - 4.0).abs() < 0.05);
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let params = LfcParams::default();
        let mut exposure = lfc_exposure(&params, 6);
        exposure.orders[0].wavelength.truncate(100);
        let err = calibrate_order(&exposure.orders[0], &config_for(&params)).unwrap_err();
        assert!(matches!(err, CalibError::InvalidArgument(_)));

        let results = calibrate_exposure(&exposure, &config_for(&params));
        assert_eq!(results.len(), params.n_orders - 1);
        assert!(results.iter().all(|r| r.order != exposure.orders[0].order));
    }
}
