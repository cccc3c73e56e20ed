//! comb-calib - wavelength calibration from laser-frequency-comb exposures
//!
//! - **data** - exposure model, file loaders/writers, synthetic exposures
//! - **calib** - peak finding, line fitting, comb modes, wavelength solutions
//! - **rv** - Doppler radial-velocity extraction against a template
//! - **config** - TOML configuration with the analysis defaults

pub mod calib;
pub mod config;
pub mod data;
pub mod error;
pub mod rv;

pub use config::CalibrationConfig;
pub use error::CalibError;

/// Speed of light in vacuum, m/s.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;
