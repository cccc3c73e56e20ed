/// Radial velocities of a stellar observation against a template.
///
/// ```text
///   template order ──► natural cubic spline T(λ)
///                           │
///   observation order ──►  χ²(v) = Σ (o − a·T(λ / D(v)))² / σ²
///                           │   coarse grid → fine grid → parabola
///                           ▼
///                     OrderVelocity (v, σ_v)
///                           │  inverse-variance mean, sigma clipping
///                           ▼
///                     RadialVelocity
/// ```
pub mod doppler;
pub mod extract;

pub use doppler::{doppler_factor, shift_wavelength};
pub use extract::{
    combine_orders, extract_radial_velocity, fit_order_velocity, OrderVelocity, RadialVelocity,
};
