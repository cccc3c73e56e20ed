use crate::error::{CalibError, Result};
use crate::SPEED_OF_LIGHT;

/// Relativistic Doppler factor `sqrt((1 + β) / (1 − β))` for a radial
/// velocity in m/s (positive = receding).
pub fn doppler_factor(velocity: f64) -> Result<f64> {
    let beta = velocity / SPEED_OF_LIGHT;
    if !beta.is_finite() || beta.abs() >= 1.0 {
        return Err(CalibError::Superluminal(velocity));
    }
    Ok(((1.0 + beta) / (1.0 - beta)).sqrt())
}

/// Observed wavelength of a line emitted at `rest` by a source moving at
/// `velocity`.
pub fn shift_wavelength(rest: f64, velocity: f64) -> Result<f64> {
    Ok(rest * doppler_factor(velocity)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factor_at_rest_is_one() {
        assert_eq!(doppler_factor(0.0).unwrap(), 1.0);
    }

    #[test]
    fn test_low_velocity_limit() {
        let v = 1000.0;
        let d = doppler_factor(v).unwrap();
        assert!((d - (1.0 + v / SPEED_OF_LIGHT)).abs() < 1e-10);
        assert!(doppler_factor(-v).unwrap() < 1.0);
    }

    #[test]
    fn test_reciprocal() {
        let v = 2.5e7;
        let product = doppler_factor(v).unwrap() * doppler_factor(-v).unwrap();
        assert!((product - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_superluminal_rejected() {
        assert!(matches!(
            doppler_factor(SPEED_OF_LIGHT),
            Err(CalibError::Superluminal(_))
        ));
        assert!(doppler_factor(-4.0e8).is_err());
        assert!(doppler_factor(f64::NAN).is_err());
    }

    #[test]
    fn test_shift_wavelength() {
        let w = shift_wavelength(5000.0, 3000.0).unwrap();
        assert!((w - 5000.0 * (1.0 + 1e-5)).abs() < 1e-3);
    }
}
