//! Laser-frequency-comb mode wavelengths.

use serde::Serialize;

use crate::config::CombConfig;
use crate::SPEED_OF_LIGHT;

/// A comb mode and its vacuum wavelength in Ångström.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CombLine {
    pub wavelength: f64,
    pub mode: u64,
}

/// `f_n = f_rep · n + f_offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyComb {
    pub repetition_rate: f64,
    pub offset_frequency: f64,
}

impl Default for FrequencyComb {
    fn default() -> Self {
        CombConfig::default().into()
    }
}

impl From<CombConfig> for FrequencyComb {
    fn from(cfg: CombConfig) -> Self {
        Self {
            repetition_rate: cfg.repetition_rate,
            offset_frequency: cfg.offset_frequency,
        }
    }
}

impl FrequencyComb {
    pub fn frequency(&self, mode: u64) -> f64 {
        self.repetition_rate * mode as f64 + self.offset_frequency
    }

    /// Wavelength of mode `n` in Ångström.
    pub fn wavelength(&self, mode: u64) -> f64 {
        SPEED_OF_LIGHT / self.frequency(mode) * 1e10
    }

    /// Continuous mode number for a wavelength in Ångström.
    fn mode_number(&self, wavelength: f64) -> f64 {
        (SPEED_OF_LIGHT / (wavelength * 1e-10) - self.offset_frequency) / self.repetition_rate
    }

    /// Comb line closest in wavelength to `wavelength`.
    pub fn closest_line(&self, wavelength: f64) -> Option<CombLine> {
        if !(wavelength.is_finite() && wavelength > 0.0) {
            return None;
        }
        let n = self.mode_number(wavelength);
        if n < 0.0 {
            return None;
        }
        let lo = n.floor() as u64;
        [lo, lo + 1]
            .into_iter()
            .map(|mode| CombLine {
                wavelength: self.wavelength(mode),
                mode,
            })
            .min_by(|a, b| {
                (a.wavelength - wavelength)
                    .abs()
                    .total_cmp(&(b.wavelength - wavelength).abs())
            })
    }

    /// Closest comb line for every given wavelength. Unmatchable entries
    /// (non-finite or non-positive wavelengths) are `None`.
    pub fn match_lines(&self, given: &[f64]) -> Vec<Option<CombLine>> {
        given.iter().map(|&w| self.closest_line(w)).collect()
    }

    /// All comb lines between two wavelengths, in decreasing mode order
    /// (increasing wavelength).
    pub fn lines_between(&self, min_wavelength: f64, max_wavelength: f64) -> Vec<CombLine> {
        if !(min_wavelength > 0.0 && max_wavelength > min_wavelength) {
            return Vec::new();
        }
        let n_max = self.mode_number(min_wavelength).floor().max(0.0) as u64;
        let n_min = self.mode_number(max_wavelength).ceil().max(0.0) as u64;
        (n_min..=n_max)
            .rev()
            .map(|mode| CombLine {
                wavelength: self.wavelength(mode),
                mode,
            })
            .filter(|l| l.wavelength >= min_wavelength && l.wavelength <= max_wavelength)
            .collect()
    }
}
