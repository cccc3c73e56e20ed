//! Polynomial vs cubic-spline solutions, judged on lines left out of the fit.
//!
//! The comb lines of an order are split into even and odd positions (by
//! pixel). Each half is used once as training set while the lines of the
//! other half that lie inside the training range are predicted. A spline
//! interpolates its knots exactly, so only held-out lines give a fair
//! comparison between the two methods.

use serde::Serialize;

use super::pipeline::OrderCalibration;
use super::solution::{fit_points, residuals, CalibrationMethod, CalibrationPoints};
use super::stats::rms;
use crate::error::{CalibError, Result};

/// Held-out residuals (m/s) of both methods on one order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodComparison {
    pub order: usize,
    pub degree: usize,
    /// Pixel of every held-out line, increasing.
    pub pixels: Vec<f64>,
    pub poly_residuals: Vec<f64>,
    pub spline_residuals: Vec<f64>,
    pub poly_rms: f64,
    pub spline_rms: f64,
}

/// Pooled RMS over several orders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonSummary {
    pub orders: usize,
    pub lines: usize,
    pub poly_rms: f64,
    pub spline_rms: f64,
}

/// Points of `test` that lie within the pixel range of `train`.
fn inside(train: &CalibrationPoints, test: &CalibrationPoints) -> CalibrationPoints {
    let lo = train.pixels.first().copied().unwrap_or(f64::INFINITY);
    let hi = train.pixels.last().copied().unwrap_or(f64::NEG_INFINITY);
    test.subset((0..test.len()).filter(|&i| test.pixels[i] >= lo && test.pixels[i] <= hi))
}

/// Cross-validate a polynomial of `degree` against a cubic spline on the
/// converged lines of one order.
pub fn compare_methods(order: &OrderCalibration, degree: usize) -> Result<MethodComparison> {
    let points = order.calibration_points().sorted();
    let needed = 2 * (degree + 2);
    if points.len() < needed {
        return Err(CalibError::TooFewPoints {
            needed,
            got: points.len(),
        });
    }

    let even = points.subset((0..points.len()).step_by(2));
    let odd = points.subset((1..points.len()).step_by(2));
    let poly = CalibrationMethod::Polynomial { degree };

    let mut rows: Vec<(f64, f64, f64)> = Vec::with_capacity(points.len());
    for (train, test) in [(&even, &odd), (&odd, &even)] {
        let test = inside(train, test);
        let p = fit_points(poly, train)?;
        let s = fit_points(CalibrationMethod::CubicSpline, train)?;
        let rp = residuals(p.as_ref(), &test);
        let rs = residuals(s.as_ref(), &test);
        rows.extend(test.pixels.iter().zip(rp).zip(rs).map(|((&x, a), b)| (x, a, b)));
    }
    rows.sort_by(|a, b| a.0.total_cmp(&b.0));

    let pixels: Vec<f64> = rows.iter().map(|r| r.0).collect();
    let poly_residuals: Vec<f64> = rows.iter().map(|r| r.1).collect();
    let spline_residuals: Vec<f64> = rows.iter().map(|r| r.2).collect();
    let poly_rms = rms(&poly_residuals).unwrap_or(f64::NAN);
    let spline_rms = rms(&spline_residuals).unwrap_or(f64::NAN);

    log::info!(
        "Order {}: held-out RMS {poly} {poly_rms:.2} m/s, cubic spline {spline_rms:.2} m/s ({} lines)",
        order.order,
        pixels.len()
    );

    Ok(MethodComparison {
        order: order.order,
        degree,
        pixels,
        poly_residuals,
        spline_residuals,
        poly_rms,
        spline_rms,
    })
}

/// Compare every calibrated order; orders that cannot be compared are
/// logged and left out.
pub fn compare_orders(orders: &[OrderCalibration], degree: usize) -> Vec<MethodComparison> {
    orders
        .iter()
        .filter(|o| o.is_calibrated())
        .filter_map(|o| match compare_methods(o, degree) {
            Ok(c) => Some(c),
            Err(e) => {
                log::warn!("Order {}: comparison failed: {e}", o.order);
                None
            }
        })
        .collect()
}

pub fn summarize(comparisons: &[MethodComparison]) -> ComparisonSummary {
    let poly: Vec<f64> = comparisons.iter().flat_map(|c| c.poly_residuals.iter().copied()).collect();
    let spline: Vec<f64> = comparisons
        .iter()
        .flat_map(|c| c.spline_residuals.iter().copied())
        .collect();
    ComparisonSummary {
        orders: comparisons.len(),
        lines: poly.len(),
        poly_rms: rms(&poly).unwrap_or(f64::NAN),
        spline_rms: rms(&spline).unwrap_or(f64::NAN),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calib::pipeline::calibrate_exposure;
    use crate::config::CalibrationConfig;
    use crate::data::synthetic::{lfc_exposure, LfcParams};

    fn calibrated() -> Vec<OrderCalibration> {
        let params = LfcParams::default();
        let config = CalibrationConfig {
            first_order: params.first_order,
            last_order: params.first_order + params.n_orders,
            ..Default::default()
        };
        calibrate_exposure(&lfc_exposure(&params, 21), &config)
    }

    #[test]
    fn test_both_methods_accurate_on_synthetic() {
        let orders = calibrated();
        let c = compare_methods(&orders[0], 3).unwrap();
        assert_eq!(c.pixels.len(), c.poly_residuals.len());
        assert_eq!(c.pixels.len(), c.spline_residuals.len());
        assert!(c.pixels.windows(2).all(|w| w[0] <= w[1]));
        assert!(c.pixels.len() > 100);
        assert!(c.poly_rms < 30.0, "poly {}", c.poly_rms);
        assert!(c.spline_rms < 30.0, "spline {}", c.spline_rms);
    }

    #[test]
    fn test_summary_pools_orders() {
        let comparisons = compare_orders(&calibrated(), 3);
        assert_eq!(comparisons.len(), 3);
        let summary = summarize(&comparisons);
        assert_eq!(summary.orders, 3);
        let lines: usize = comparisons.iter().map(|c| c.pixels.len()).sum();
        assert_eq!(summary.lines, lines);
        let max = comparisons.iter().map(|c| c.poly_rms).fold(0.0, f64::max);
        assert!(summary.poly_rms <= max + 1e-9);
    }

    #[test]
    fn test_too_few_lines() {
        let mut orders = calibrated();
        let order = &mut orders[0];
        order.fits.truncate(5);
        order.lines.truncate(5);
        assert!(matches!(
            compare_methods(order, 3),
            Err(CalibError::TooFewPoints { .. })
        ));
    }

    #[test]
    fn test_summary_of_nothing() {
        let s = summarize(&[]);
        assert_eq!(s.lines, 0);
        assert!(s.poly_rms.is_nan());
    }
}
