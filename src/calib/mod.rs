/// Calibration layer: from an LFC exposure to a wavelength solution.
///
/// ```text
///   EchelleOrder (spectrum, uncertainty, wavelength)
///        │
///        ▼
///   ┌──────────┐
///   │  peaks    │  local maxima, distance/prominence selection, widths
///   └──────────┘
///        │  index ranges
///        ▼
///   ┌───────────┐
///   │ lineshape  │  super-Gaussian chi2 fit per line (lm)
///   └───────────┘
///        │  centers
///        ▼
///   ┌──────────┐
///   │  comb     │  closest comb mode → true wavelength
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐      ┌─────────┐
///   │ solution  │ ───► │ compare │  cross-validated residuals in m/s
///   └──────────┘      └─────────┘
///    poly | spline
/// ```

pub mod comb;
pub mod compare;
pub mod lineshape;
pub mod lm;
pub mod peaks;
pub mod pipeline;
pub mod poly;
pub mod solution;
pub mod spline;
pub mod stats;

pub use comb::{CombLine, FrequencyComb};
pub use compare::{compare_methods, compare_orders, summarize, ComparisonSummary, MethodComparison};
pub use lineshape::{Estimate, PeakFit};
pub use peaks::{find_peaks, peak_index_ranges, Peak};
pub use pipeline::{calibrate_exposure, calibrate_order, OrderCalibration, OrderStatus};
pub use solution::{fit_solution, CalibrationMethod, WavelengthSolution};
pub use spline::CubicSpline;
