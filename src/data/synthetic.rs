//! Deterministic synthetic exposures with known truth.
//!
//! The LFC generator places super-Gaussian lines at the exact comb
//! wavelengths of a smooth per-order pixel→wavelength relation, so the
//! calibration can be checked against known modes. The stellar generator
//! produces a template and a Doppler-shifted observation of the same
//! absorption-line spectrum.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;

use super::model::{EchelleOrder, Exposure, MetadataValue};
use crate::calib::comb::FrequencyComb;
use crate::calib::lineshape::SuperGaussian;
use crate::error::Result;
use crate::rv::doppler_factor;

// ---------------------------------------------------------------------------
// Laser frequency comb
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct LfcParams {
    pub first_order: usize,
    pub n_orders: usize,
    pub n_pixels: usize,
    /// Wavelength of pixel 0 of the first order, Å.
    pub start_wavelength: f64,
    /// Wavelength shift between consecutive orders, Å.
    pub order_step: f64,
    /// Å per pixel at pixel 0.
    pub dispersion: f64,
    /// Quadratic term of the pixel→wavelength relation, Å per pixel².
    pub curvature: f64,
    pub amplitude: f64,
    pub width: f64,
    pub shape: f64,
    pub offset: f64,
    /// Gaussian flux noise; also the reported uncertainty.
    pub noise: f64,
    /// Error of the "given" wavelength solution stored with the exposure, Å.
    pub given_offset: f64,
    pub comb: FrequencyComb,
}

impl Default for LfcParams {
    fn default() -> Self {
        Self {
            first_order: 40,
            n_orders: 3,
            n_pixels: 2048,
            start_wavelength: 5000.0,
            order_step: 15.0,
            dispersion: 0.0085,
            curvature: 2e-7,
            amplitude: 0.87,
            width: 1.8,
            shape: 1.3,
            offset: 0.12,
            noise: 0.005,
            given_offset: 0.003,
            comb: FrequencyComb::default(),
        }
    }
}

impl LfcParams {
    /// True wavelength of `pixel` in order number `k` (0-based).
    pub fn true_wavelength(&self, k: usize, pixel: f64) -> f64 {
        self.start_wavelength
            + self.order_step * k as f64
            + self.dispersion * pixel
            + self.curvature * pixel * pixel
    }

    /// Inverse of [`true_wavelength`](Self::true_wavelength).
    pub fn pixel_of(&self, k: usize, wavelength: f64) -> f64 {
        let c = self.start_wavelength + self.order_step * k as f64 - wavelength;
        if self.curvature == 0.0 {
            return -c / self.dispersion;
        }
        let b = self.dispersion;
        let a = self.curvature;
        // Numerically stable root of a·p² + b·p + c = 0 closest to zero.
        let q = -0.5 * (b + b.signum() * (b * b - 4.0 * a * c).sqrt());
        c / q
    }
}

/// Gaussian noise source, `None` for a non-positive sigma.
fn noise(sigma: f64) -> Option<Normal<f64>> {
    if sigma > 0.0 {
        Normal::new(0.0, sigma).ok()
    } else {
        None
    }
}

/// LFC exposure with comb lines at their exact wavelengths.
pub fn lfc_exposure(params: &LfcParams, seed: u64) -> Exposure {
    let mut rng = StdRng::seed_from_u64(seed);
    let dist = noise(params.noise);
    let n = params.n_pixels;
    // Tail cutoff: the profile is below 1e-8 of the amplitude.
    let reach = (params.width * (2.0 * 18.5f64.powf(1.0 / params.shape)).sqrt()).ceil() as isize;

    let orders = (0..params.n_orders)
        .map(|k| {
            let lo = params.true_wavelength(k, 0.0);
            let hi = params.true_wavelength(k, (n - 1) as f64);
            let mut spectrum = vec![params.offset; n];
            for line in params.comb.lines_between(lo, hi) {
                let center = params.pixel_of(k, line.wavelength);
                let c = center.round() as isize;
                for i in (c - reach).max(0)..(c + reach + 1).min(n as isize) {
                    spectrum[i as usize] += SuperGaussian::eval(
                        i as f64,
                        params.amplitude,
                        center,
                        params.width,
                        params.shape,
                        0.0,
                    );
                }
            }
            if let Some(dist) = dist {
                for v in spectrum.iter_mut() {
                    *v += rng.sample(dist);
                }
            }

            let wavelength = (0..n)
                .map(|p| params.true_wavelength(k, p as f64) + params.given_offset)
                .collect();
            let mut order = EchelleOrder::new(
                params.first_order + k,
                spectrum,
                vec![params.noise; n],
                wavelength,
            );
            order
                .metadata
                .insert("source".to_string(), MetadataValue::String("LFC".to_string()));
            order
        })
        .collect();

    let mut header = BTreeMap::new();
    header.insert("OBJECT".to_string(), MetadataValue::String("LFC".to_string()));
    header.insert("SEED".to_string(), MetadataValue::Integer(seed as i64));
    Exposure::from_orders(header, orders)
}

// ---------------------------------------------------------------------------
// Stellar spectra
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct StellarParams {
    pub first_order: usize,
    pub n_orders: usize,
    pub n_pixels: usize,
    pub start_wavelength: f64,
    pub order_step: f64,
    pub dispersion: f64,
    /// Absorption lines per order.
    pub lines_per_order: usize,
    /// Gaussian sigma of the absorption lines, Å.
    pub line_width: f64,
    pub max_depth: f64,
    /// Relative flux noise of the observation.
    pub noise: f64,
    /// Seed of the line list, shared by template and observation.
    pub line_seed: u64,
}

impl Default for StellarParams {
    fn default() -> Self {
        Self {
            first_order: 40,
            n_orders: 4,
            n_pixels: 2048,
            start_wavelength: 5000.0,
            order_step: 15.0,
            dispersion: 0.0085,
            lines_per_order: 60,
            line_width: 0.05,
            max_depth: 0.7,
            noise: 0.002,
            line_seed: 17,
        }
    }
}

impl StellarParams {
    fn wavelength(&self, k: usize) -> Vec<f64> {
        let start = self.start_wavelength + self.order_step * k as f64;
        (0..self.n_pixels)
            .map(|p| start + self.dispersion * p as f64)
            .collect()
    }

    /// Rest-frame absorption lines `(center, depth)` covering all orders
    /// with a margin for Doppler shifts.
    fn line_list(&self) -> Vec<(f64, f64)> {
        let mut rng = StdRng::seed_from_u64(self.line_seed);
        let span = self.dispersion * self.n_pixels as f64;
        let lo = self.start_wavelength - 1.0;
        let hi = self.start_wavelength + self.order_step * self.n_orders as f64 + span + 1.0;
        let count = (self.lines_per_order as f64 * (hi - lo) / span).ceil() as usize;
        (0..count)
            .map(|_| {
                let center = rng.gen_range(lo..hi);
                let depth = rng.gen_range(0.1..self.max_depth);
                (center, depth)
            })
            .collect()
    }
}

/// Continuum-normalised flux of the line list at `wavelength`.
fn stellar_flux(lines: &[(f64, f64)], width: f64, wavelength: f64) -> f64 {
    lines
        .iter()
        .filter(|(c, _)| (c - wavelength).abs() < 8.0 * width)
        .fold(1.0, |flux, (c, depth)| {
            let z = (wavelength - c) / width;
            flux * (1.0 - depth * (-0.5 * z * z).exp())
        })
}

fn stellar_exposure(
    params: &StellarParams,
    velocity: f64,
    noise_seed: Option<u64>,
    object: &str,
) -> Result<Exposure> {
    let factor = doppler_factor(velocity)?;
    let lines = params.line_list();
    let mut rng = noise_seed.map(StdRng::seed_from_u64);
    let dist = noise(params.noise);

    let orders = (0..params.n_orders)
        .map(|k| {
            let wavelength = params.wavelength(k);
            let spectrum: Vec<f64> = wavelength
                .iter()
                .map(|&w| {
                    let flux = stellar_flux(&lines, params.line_width, w / factor);
                    match (rng.as_mut(), dist) {
                        (Some(r), Some(d)) => flux + r.sample(d),
                        _ => flux,
                    }
                })
                .collect();
            let sigma = params.noise.max(1e-4);
            EchelleOrder::new(
                params.first_order + k,
                spectrum,
                vec![sigma; params.n_pixels],
                wavelength,
            )
        })
        .collect();

    let mut header = BTreeMap::new();
    header.insert("OBJECT".to_string(), MetadataValue::String(object.to_string()));
    header.insert("VELOCITY".to_string(), MetadataValue::Float(velocity));
    Ok(Exposure::from_orders(header, orders))
}

/// Noise-free rest-frame template.
pub fn stellar_template(params: &StellarParams) -> Result<Exposure> {
    stellar_exposure(params, 0.0, None, "TEMPLATE")
}

/// Noisy observation of the template spectrum Doppler-shifted by
/// `velocity` (m/s).
pub fn stellar_observation(params: &StellarParams, velocity: f64, seed: u64) -> Result<Exposure> {
    stellar_exposure(params, velocity, Some(seed), "STAR")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_of_inverts_wavelength() {
        let p = LfcParams::default();
        for k in 0..3 {
            for pix in [0.0, 17.3, 1023.5, 2047.0] {
                let w = p.true_wavelength(k, pix);
                assert!((p.pixel_of(k, w) - pix).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_lfc_exposure_shape() {
        let p = LfcParams::default();
        let exp = lfc_exposure(&p, 1);
        assert_eq!(exp.len(), p.n_orders);
        assert_eq!(exp.orders[0].order, p.first_order);
        for o in &exp.orders {
            assert!(o.is_consistent());
            assert_eq!(o.len(), p.n_pixels);
            let max = o.spectrum.iter().copied().fold(f64::MIN, f64::max);
            assert!(max > p.offset + 0.8 * p.amplitude);
        }
    }

    #[test]
    fn test_lfc_deterministic() {
        let p = LfcParams::default();
        assert_eq!(lfc_exposure(&p, 9).orders, lfc_exposure(&p, 9).orders);
        assert_ne!(lfc_exposure(&p, 9).orders, lfc_exposure(&p, 10).orders);
    }

    #[test]
    fn test_observation_is_shifted_template() {
        let p = StellarParams {
            noise: 0.0,
            ..Default::default()
        };
        let template = stellar_template(&p).unwrap();
        let same = stellar_observation(&p, 0.0, 3).unwrap();
        for (a, b) in template.orders.iter().zip(&same.orders) {
            assert!(a.spectrum.iter().zip(&b.spectrum).all(|(x, y)| (x - y).abs() < 1e-12));
        }
        let shifted = stellar_observation(&p, 3000.0, 3).unwrap();
        assert_ne!(template.orders[0].spectrum, shifted.orders[0].spectrum);
        assert!(template.orders[0].spectrum.iter().any(|&f| f < 0.8));
    }

    #[test]
    fn test_superluminal_rejected() {
        assert!(stellar_observation(&StellarParams::default(), 3.0e8, 1).is_err());
    }
}
