//! χ² velocity scan of one order and the combination across orders.

use serde::Serialize;

use super::doppler::doppler_factor;
use crate::calib::poly::fit_polynomial;
use crate::calib::spline::CubicSpline;
use crate::calib::stats::weighted_mean;
use crate::config::RvConfig;
use crate::data::model::{EchelleOrder, Exposure};
use crate::error::{CalibError, Result};

/// Fewest pixels an order must contribute to the scan.
const MIN_PIXELS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderVelocity {
    pub order: usize,
    /// m/s
    pub velocity: f64,
    pub error: f64,
    /// χ² at the minimum and its degrees of freedom.
    pub chi2: f64,
    pub ndof: usize,
    /// Flux scale of the template at the minimum.
    pub scale: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadialVelocity {
    pub velocity: f64,
    pub error: f64,
    /// Orders kept after sigma clipping.
    pub orders: Vec<OrderVelocity>,
    /// Order numbers rejected by the clipping.
    pub rejected: Vec<usize>,
}

/// Observed pixels and the interpolated template, ready for scanning.
struct Scan {
    template: CubicSpline,
    wavelength: Vec<f64>,
    flux: Vec<f64>,
    weight: Vec<f64>,
}

impl Scan {
    fn new(template: &EchelleOrder, observation: &EchelleOrder, max_velocity: f64) -> Result<Self> {
        let mut pairs: Vec<(f64, f64)> = template
            .wavelength
            .iter()
            .zip(&template.spectrum)
            .filter(|(w, f)| w.is_finite() && f.is_finite())
            .map(|(&w, &f)| (w, f))
            .collect();
        // Orders may be stored with wavelength decreasing along the pixels.
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (tw, tf): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
        let template = CubicSpline::new(tw, tf)?;

        let (lo, hi) = template.domain();
        let d_max = doppler_factor(max_velocity.abs())?;
        let d_min = doppler_factor(-max_velocity.abs())?;

        let mut scan = Scan {
            template,
            wavelength: Vec::new(),
            flux: Vec::new(),
            weight: Vec::new(),
        };
        let pixels = observation
            .wavelength
            .iter()
            .zip(&observation.spectrum)
            .zip(&observation.uncertainty);
        for ((&w, &f), &e) in pixels {
            let usable = f.is_finite() && e.is_finite() && e > 0.0 && w / d_max >= lo && w / d_min <= hi;
            if usable {
                scan.wavelength.push(w);
                scan.flux.push(f);
                scan.weight.push(1.0 / (e * e));
            }
        }
        if scan.wavelength.len() < MIN_PIXELS {
            return Err(CalibError::TooFewPoints {
                needed: MIN_PIXELS,
                got: scan.wavelength.len(),
            });
        }
        Ok(scan)
    }

    /// χ² and the best flux scale of the template shifted by `velocity`.
    fn chi2(&self, velocity: f64) -> Result<(f64, f64)> {
        let d = doppler_factor(velocity)?;
        let model: Vec<f64> = self.wavelength.iter().map(|w| self.template.evaluate(w / d)).collect();

        let (mut num, mut den) = (0.0, 0.0);
        for ((m, o), w) in model.iter().zip(&self.flux).zip(&self.weight) {
            num += w * o * m;
            den += w * m * m;
        }
        if den <= 0.0 {
            return Err(CalibError::Singular("template flux scale"));
        }
        let scale = num / den;

        let chi2 = model
            .iter()
            .zip(&self.flux)
            .zip(&self.weight)
            .map(|((m, o), w)| w * (o - scale * m).powi(2))
            .sum();
        Ok((chi2, scale))
    }

    fn scan(&self, grid: &[f64]) -> Result<Vec<f64>> {
        grid.iter().map(|&v| self.chi2(v).map(|(c, _)| c)).collect()
    }
}

fn argmin(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map_or(0, |(i, _)| i)
}

/// Fit the velocity of `observation` relative to `template`.
///
/// χ² is scanned on a coarse grid of `±max_velocity` in steps of `step`,
/// then on a grid `refine_factor` times finer around the coarse minimum.
/// A parabola through the fine scan gives the velocity and its error from
/// `Δχ² = 1`.
pub fn fit_order_velocity(
    template: &EchelleOrder,
    observation: &EchelleOrder,
    config: &RvConfig,
) -> Result<OrderVelocity> {
    let valid_grid = config.step > 0.0 && config.max_velocity > config.step && config.refine_factor > 0;
    if !valid_grid {
        return Err(CalibError::InvalidArgument(format!(
            "velocity grid ±{} step {} refine {}",
            config.max_velocity, config.step, config.refine_factor
        )));
    }
    let scan = Scan::new(template, observation, config.max_velocity)?;

    let n = (config.max_velocity / config.step).floor() as i64;
    let coarse: Vec<f64> = (-n..=n).map(|k| k as f64 * config.step).collect();
    let chi2 = scan.scan(&coarse)?;
    let best = argmin(&chi2);
    if best == 0 || best == coarse.len() - 1 {
        return Err(CalibError::VelocityAtGridEdge(coarse[best]));
    }

    let r = config.refine_factor as i64;
    let fine_step = config.step / config.refine_factor as f64;
    let fine: Vec<f64> = (-r..=r).map(|k| coarse[best] + k as f64 * fine_step).collect();
    let fine_chi2 = scan.scan(&fine)?;

    let ones = vec![1.0; fine.len()];
    let parabola = fit_polynomial(&fine, &fine_chi2, &ones, 2)?;
    let [_, c1, c2] = [
        parabola.coefficients[0].value,
        parabola.coefficients[1].value,
        parabola.coefficients[2].value,
    ];
    if c2.is_nan() || c2 <= 0.0 {
        return Err(CalibError::Singular("χ² parabola has no minimum"));
    }
    let velocity = parabola.x_center - parabola.x_scale * c1 / (2.0 * c2);
    let error = parabola.x_scale / c2.sqrt();
    let (chi2_min, scale) = scan.chi2(velocity)?;

    log::debug!(
        "Order {}: v = {velocity:.2} +- {error:.2} m/s, chi2 = {chi2_min:.1}",
        observation.order
    );

    Ok(OrderVelocity {
        order: observation.order,
        velocity,
        error,
        chi2: chi2_min,
        ndof: scan.wavelength.len().saturating_sub(2),
        scale,
    })
}

/// Inverse-variance mean of the order velocities, iteratively rejecting
/// orders more than `clip_sigma` of their own error from the mean.
pub fn combine_orders(velocities: Vec<OrderVelocity>, clip_sigma: f64) -> Result<RadialVelocity> {
    let mut kept: Vec<OrderVelocity> = velocities
        .into_iter()
        .filter(|v| v.velocity.is_finite() && v.error.is_finite() && v.error > 0.0)
        .collect();
    let mut rejected = Vec::new();

    loop {
        let values: Vec<f64> = kept.iter().map(|v| v.velocity).collect();
        let errors: Vec<f64> = kept.iter().map(|v| v.error).collect();
        let (mean, error) = weighted_mean(&values, &errors)
            .ok_or_else(|| CalibError::NoUsableOrders("no finite order velocities".to_string()))?;

        let worst = kept
            .iter()
            .enumerate()
            .map(|(i, v)| (i, (v.velocity - mean).abs() / v.error))
            .max_by(|a, b| a.1.total_cmp(&b.1));

        match worst {
            Some((i, deviation)) if kept.len() > 1 && deviation > clip_sigma => {
                let dropped = kept.remove(i);
                log::info!(
                    "Rejecting order {} ({:.1} sigma from {mean:.2} m/s)",
                    dropped.order,
                    deviation
                );
                rejected.push(dropped.order);
            }
            _ => {
                return Ok(RadialVelocity {
                    velocity: mean,
                    error,
                    orders: kept,
                    rejected,
                })
            }
        }
    }
}

/// Radial velocity of `observation` against `template`, matching orders
/// by number. Orders that cannot be fitted are logged and skipped.
pub fn extract_radial_velocity(
    template: &Exposure,
    observation: &Exposure,
    config: &RvConfig,
) -> Result<RadialVelocity> {
    let mut velocities = Vec::new();
    for obs in &observation.orders {
        let Some(tpl) = template.order(obs.order) else {
            log::warn!("Order {}: no template order", obs.order);
            continue;
        };
        match fit_order_velocity(tpl, obs, config) {
            Ok(v) => velocities.push(v),
            Err(e) => log::warn!("Order {}: {e}", obs.order),
        }
    }
    if velocities.is_empty() {
        return Err(CalibError::NoUsableOrders(format!(
            "none of {} observed orders gave a velocity",
            observation.len()
        )));
    }

    let rv = combine_orders(velocities, config.clip_sigma)?;
    log::info!(
        "Radial velocity {:.2} +- {:.2} m/s from {} orders",
        rv.velocity,
        rv.error,
        rv.orders.len()
    );
    Ok(rv)
}
