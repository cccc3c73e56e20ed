use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use comb_calib::calib::solution::velocity_residual;
use comb_calib::calib::{
    calibrate_exposure, compare_methods, fit_solution, CalibrationMethod, MethodComparison,
    OrderCalibration,
};
use comb_calib::data::filter::{filtered_indices, init_filter_state, FilterState};
use comb_calib::data::model::{Exposure, MetadataValue};
use comb_calib::CalibrationConfig;

use crate::color::ColorMap;

// ---------------------------------------------------------------------------
// Plot modes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotMode {
    /// Flux per pixel with the fitted line profiles.
    Spectrum,
    /// Residuals of the wavelength solution at each comb line (m/s).
    Residuals,
    /// Held-out residuals of polynomial vs cubic spline (m/s).
    Comparison,
    /// New solution minus the wavelength solution stored in the file (m/s).
    Deviation,
}

impl PlotMode {
    pub const ALL: [PlotMode; 4] = [
        PlotMode::Spectrum,
        PlotMode::Residuals,
        PlotMode::Comparison,
        PlotMode::Deviation,
    ];
}

impl fmt::Display for PlotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlotMode::Spectrum => "Spectrum",
            PlotMode::Residuals => "Residuals",
            PlotMode::Comparison => "Poly vs spline",
            PlotMode::Deviation => "Deviation",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Per-order results cached for drawing
// ---------------------------------------------------------------------------

/// Calibration of one order plus the curves derived from it.
pub struct OrderResult {
    pub calibration: OrderCalibration,
    /// `[pixel, residual m/s]` of every calibration line.
    pub residuals: Vec<[f64; 2]>,
    pub rms: Option<f64>,
    /// `[pixel, (new - given) m/s]` over the whole order.
    pub deviation: Vec<[f64; 2]>,
    pub comparison: Option<MethodComparison>,
}

impl OrderResult {
    fn new(calibration: OrderCalibration, wavelength: &[f64], config: &CalibrationConfig) -> Self {
        let mut result = OrderResult {
            calibration,
            residuals: Vec::new(),
            rms: None,
            deviation: Vec::new(),
            comparison: None,
        };
        if !result.calibration.is_calibrated() {
            return result;
        }

        match fit_solution(config.method, &result.calibration) {
            Ok(solution) => {
                let points = result.calibration.calibration_points();
                let res = comb_calib::calib::solution::residuals(solution.as_ref(), &points);
                result.rms = comb_calib::calib::stats::rms(&res);
                result.residuals = points.pixels.iter().zip(res).map(|(&p, r)| [p, r]).collect();
                result.deviation = solution
                    .evaluate_grid(wavelength.len())
                    .into_iter()
                    .zip(wavelength)
                    .enumerate()
                    .filter(|(_, (_, given))| given.is_finite())
                    .map(|(p, (new, &given))| [p as f64, velocity_residual(new, given)])
                    .collect();
            }
            Err(e) => log::warn!("Order {}: {} solution failed: {e}", result.calibration.order, config.method),
        }

        // A spline run is compared against the default polynomial.
        let degree = match config.method {
            CalibrationMethod::Polynomial { degree } => degree,
            CalibrationMethod::CubicSpline => match CalibrationConfig::default().method {
                CalibrationMethod::Polynomial { degree } => degree,
                CalibrationMethod::CubicSpline => 5,
            },
        };
        result.comparison = match compare_methods(&result.calibration, degree) {
            Ok(c) => Some(c),
            Err(e) => {
                log::debug!("Order {}: no comparison: {e}", result.calibration.order);
                None
            }
        };
        result
    }
}

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// The full UI state, independent of rendering.
pub struct AppState {
    /// Loaded exposure (None until user loads a file).
    pub exposure: Option<Exposure>,
    pub source: Option<PathBuf>,

    pub config: CalibrationConfig,

    /// Results keyed by order number.
    pub results: BTreeMap<usize, OrderResult>,

    /// Per-column filter selections.
    pub filters: FilterState,

    /// Positions in `exposure.orders` passing the current filters (cached).
    pub visible_indices: Vec<usize>,

    /// Which metadata column is used for colouring.
    pub color_column: Option<String>,

    /// Active colour map.
    pub color_map: Option<ColorMap>,

    pub plot_mode: PlotMode,
    pub minmax_scaling: bool,
    pub show_fits: bool,

    /// Status / error message shown in the UI.
    pub status_message: Option<String>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            exposure: None,
            source: None,
            config: CalibrationConfig::default(),
            results: BTreeMap::new(),
            filters: FilterState::default(),
            visible_indices: Vec::new(),
            color_column: None,
            color_map: None,
            plot_mode: PlotMode::Spectrum,
            minmax_scaling: false,
            show_fits: true,
            status_message: None,
        }
    }
}

impl AppState {
    pub fn with_config(config: CalibrationConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Ingest a newly loaded exposure, initialise filters and colour, and
    /// calibrate it.
    pub fn set_exposure(&mut self, exposure: Exposure, source: Option<PathBuf>) {
        self.filters = init_filter_state(&exposure);
        self.visible_indices = (0..exposure.len()).collect();

        self.color_column = exposure.column_names.first().cloned();
        self.color_map = Self::build_color_map(&exposure, self.color_column.as_deref());

        self.exposure = Some(exposure);
        self.source = source;
        self.status_message = None;
        self.recalibrate();
    }

    /// Re-run the calibration with the current configuration.
    pub fn recalibrate(&mut self) {
        let Some(exposure) = &self.exposure else {
            return;
        };
        let calibrations = calibrate_exposure(exposure, &self.config);
        self.results = calibrations
            .into_iter()
            .filter_map(|c| {
                let wavelength = &exposure.order(c.order)?.wavelength;
                Some((c.order, OrderResult::new(c, wavelength, &self.config)))
            })
            .collect();

        let calibrated = self.results.values().filter(|r| r.calibration.is_calibrated()).count();
        if self.results.is_empty() {
            self.status_message = Some(format!(
                "No orders in range {}..{}",
                self.config.first_order, self.config.last_order
            ));
        } else if calibrated == 0 {
            self.status_message = Some("No order could be calibrated".to_string());
        } else {
            self.status_message = None;
        }
    }

    fn build_color_map(exposure: &Exposure, column: Option<&str>) -> Option<ColorMap> {
        let col = column?;
        exposure
            .unique_values
            .get(col)
            .map(|vals| ColorMap::new(col, vals))
    }

    /// Recompute `visible_indices` after filter change.
    pub fn refilter(&mut self) {
        if let Some(exp) = &self.exposure {
            self.visible_indices = filtered_indices(exp, &self.filters);
        }
    }

    /// Set colour column and rebuild the map.
    pub fn set_color_column(&mut self, col: String) {
        self.color_column = Some(col);
        if let Some(exp) = &self.exposure {
            self.color_map = Self::build_color_map(exp, self.color_column.as_deref());
        }
    }

    /// Select all values in a column.
    pub fn select_all(&mut self, column: &str) {
        if let Some(exp) = &self.exposure {
            if let Some(all_vals) = exp.unique_values.get(column) {
                self.filters.insert(column.to_string(), all_vals.clone());
                self.refilter();
            }
        }
    }

    /// Deselect all values in a column.
    pub fn select_none(&mut self, column: &str) {
        self.filters.insert(column.to_string(), BTreeSet::new());
        self.refilter();
    }

    /// Colour of a visible order, from the colour-by column.
    pub fn order_color(&self, metadata: &BTreeMap<String, MetadataValue>) -> Option<eframe::egui::Color32> {
        let col = self.color_column.as_deref()?;
        let value = metadata.get(col)?;
        Some(self.color_map.as_ref()?.color_for(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comb_calib::data::synthetic::{lfc_exposure, LfcParams};

    fn loaded() -> AppState {
        let params = LfcParams {
            n_orders: 2,
            ..Default::default()
        };
        let mut state = AppState::with_config(CalibrationConfig {
            first_order: params.first_order,
            last_order: params.first_order + params.n_orders,
            ..Default::default()
        });
        state.set_exposure(lfc_exposure(&params, 8), None);
        state
    }

    #[test]
    fn test_exposure_calibrated_on_load() {
        let state = loaded();
        assert_eq!(state.results.len(), 2);
        assert_eq!(state.visible_indices, vec![0, 1]);
        assert!(state.status_message.is_none());
        for r in state.results.values() {
            assert!(!r.residuals.is_empty());
            assert_eq!(r.deviation.len(), 2048);
            assert!(r.rms.is_some_and(|v| v < 30.0));
            assert!(r.comparison.is_some());
        }
    }

    #[test]
    fn test_recalibrate_outside_range() {
        let mut state = loaded();
        state.config.first_order = 70;
        state.config.last_order = 76;
        state.recalibrate();
        assert!(state.results.is_empty());
        assert!(state.status_message.is_some());
    }

    #[test]
    fn test_select_none_hides_orders() {
        let mut state = loaded();
        state.select_none("order");
        assert!(state.visible_indices.is_empty());
        state.select_all("order");
        assert_eq!(state.visible_indices.len(), 2);
    }
}
