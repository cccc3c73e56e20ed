use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::calib::solution::CalibrationMethod;

// ---------------------------------------------------------------------------
// Configuration sections
// ---------------------------------------------------------------------------

/// Peak detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    /// Minimum distance between peaks in pixels.
    pub distance: f64,
    /// Minimum prominence of a peak.
    pub prominence: f64,
    /// Window used when re-evaluating prominences for the widths.
    pub wlen: usize,
    /// Orders with fewer peaks than this are skipped.
    pub min_peaks: usize,
    /// Explicit fit window size; `None` uses the mean peak separation.
    pub window: Option<usize>,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            distance: 11.0,
            prominence: 0.15,
            wlen: 20,
            min_peaks: 10,
            window: None,
        }
    }
}

/// Starting values of the super-Gaussian line fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineFitConfig {
    pub amplitude: f64,
    pub width: f64,
    pub shape: f64,
    pub offset: f64,
    pub max_iterations: usize,
}

impl Default for LineFitConfig {
    fn default() -> Self {
        Self {
            amplitude: 0.87,
            width: 1.8,
            shape: 1.3,
            offset: 0.12,
            max_iterations: 200,
        }
    }
}

/// Laser frequency comb parameters (Hz).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombConfig {
    pub repetition_rate: f64,
    pub offset_frequency: f64,
}

impl Default for CombConfig {
    fn default() -> Self {
        Self {
            repetition_rate: 14e9,
            offset_frequency: 6.19e9,
        }
    }
}

/// Velocity grid of the radial-velocity scan (m/s).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RvConfig {
    pub max_velocity: f64,
    pub step: f64,
    /// Fine grid step as a fraction of `step`.
    pub refine_factor: usize,
    /// Orders further than this many sigma from the mean are rejected.
    pub clip_sigma: f64,
}

impl Default for RvConfig {
    fn default() -> Self {
        Self {
            max_velocity: 10_000.0,
            step: 100.0,
            refine_factor: 20,
            clip_sigma: 5.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// First and one-past-last echelle order to calibrate.
    pub first_order: usize,
    pub last_order: usize,
    /// Inflate the pipeline uncertainties by sqrt(3).
    pub correct_errors: bool,
    /// Replaces the sqrt(3) factor when `correct_errors` is set.
    pub custom_error_factor: Option<f64>,
    pub method: CalibrationMethod,
    pub peaks: PeakConfig,
    pub line_fit: LineFitConfig,
    pub comb: CombConfig,
    pub rv: RvConfig,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            first_order: 40,
            last_order: 76,
            correct_errors: false,
            custom_error_factor: None,
            method: CalibrationMethod::Polynomial { degree: 5 },
            peaks: PeakConfig::default(),
            line_fit: LineFitConfig::default(),
            comb: CombConfig::default(),
            rv: RvConfig::default(),
        }
    }
}

impl CalibrationConfig {
    /// Read a TOML file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("parsing TOML config")
    }

    pub fn order_range(&self) -> Range<usize> {
        self.first_order..self.last_order
    }

    /// Factor applied to the pipeline uncertainties.
    pub fn error_factor(&self) -> f64 {
        match (self.correct_errors, self.custom_error_factor) {
            (false, _) => 1.0,
            (true, Some(f)) => f,
            (true, None) => 3f64.sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_analysis_constants() {
        let cfg = CalibrationConfig::default();
        assert_eq!(cfg.order_range(), 40..76);
        assert_eq!(cfg.peaks.distance, 11.0);
        assert_eq!(cfg.peaks.prominence, 0.15);
        assert_eq!(cfg.peaks.min_peaks, 10);
        assert_eq!(cfg.error_factor(), 1.0);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = CalibrationConfig::from_toml(
            r#"
            correct_errors = true
            first_order = 0
            last_order = 5

            [method]
            kind = "cubic_spline"

            [peaks]
            prominence = 0.3
            "#,
        )
        .unwrap();

        assert_eq!(cfg.order_range(), 0..5);
        assert!((cfg.error_factor() - 3f64.sqrt()).abs() < 1e-12);
        assert_eq!(cfg.method, CalibrationMethod::CubicSpline);
        assert_eq!(cfg.peaks.prominence, 0.3);
        assert_eq!(cfg.peaks.distance, 11.0);
        assert_eq!(cfg.comb, CombConfig::default());
    }

    #[test]
    fn test_custom_error_factor() {
        let cfg = CalibrationConfig {
            correct_errors: true,
            custom_error_factor: Some(2.5),
            ..Default::default()
        };
        assert_eq!(cfg.error_factor(), 2.5);
    }

    #[test]
    fn test_polynomial_method_from_toml() {
        let cfg = CalibrationConfig::from_toml(
            r#"
            [method]
            kind = "polynomial"
            degree = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.method, CalibrationMethod::Polynomial { degree: 3 });
    }
}
