use eframe::egui::{Color32, Ui};
use egui_plot::{HLine, Legend, Line, MarkerShape, Plot, PlotPoints, PlotUi, Points};

use comb_calib::data::model::EchelleOrder;

use crate::state::{AppState, PlotMode};

/// Samples per pixel when drawing a fitted line profile.
const PROFILE_SAMPLES: usize = 8;

// ---------------------------------------------------------------------------
// Central panel
// ---------------------------------------------------------------------------

/// Render the plot for the active mode.
pub fn central_plot(ui: &mut Ui, state: &AppState) {
    let Some(exposure) = &state.exposure else {
        ui.centered_and_justified(|ui: &mut Ui| {
            ui.heading("Open an LFC exposure to calibrate  (File → Open…)");
        });
        return;
    };

    let y_label = match state.plot_mode {
        PlotMode::Spectrum if state.minmax_scaling => "Flux (scaled)",
        PlotMode::Spectrum => "Flux",
        _ => "Residual [m/s]",
    };

    Plot::new(("calibration_plot", state.plot_mode as u8))
        .legend(Legend::default())
        .x_axis_label("Pixel")
        .y_axis_label(y_label)
        .allow_boxed_zoom(true)
        .allow_drag(true)
        .allow_scroll(true)
        .allow_zoom(true)
        .show(ui, |plot_ui| {
            if state.plot_mode != PlotMode::Spectrum {
                plot_ui.hline(HLine::new(0.0).color(Color32::DARK_GRAY));
            }
            for &idx in &state.visible_indices {
                let order = &exposure.orders[idx];
                let color = state.order_color(&order.metadata).unwrap_or(Color32::LIGHT_BLUE);
                let name = format!("order {}", order.order);
                match state.plot_mode {
                    PlotMode::Spectrum => spectrum(plot_ui, state, order, &name, color),
                    PlotMode::Residuals => residuals(plot_ui, state, order, &name, color),
                    PlotMode::Comparison => comparison(plot_ui, state, order, &name, color),
                    PlotMode::Deviation => deviation(plot_ui, state, order, &name, color),
                }
            }
        });
}

/// Smallest and largest finite value.
fn finite_range(y: &[f64]) -> Option<(f64, f64)> {
    let mut finite = y.iter().copied().filter(|v| v.is_finite());
    let first = finite.next()?;
    Some(finite.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
}

fn spectrum(plot_ui: &mut PlotUi, state: &AppState, order: &EchelleOrder, name: &str, color: Color32) {
    // Min-max scaling maps the finite flux range onto [0, 1].
    let (offset, scale) = match finite_range(&order.spectrum) {
        Some((lo, hi)) if state.minmax_scaling => (lo, (hi - lo).max(f64::EPSILON)),
        _ => (0.0, 1.0),
    };
    let points: PlotPoints = order
        .spectrum
        .iter()
        .enumerate()
        .map(|(i, &v)| [i as f64, (v - offset) / scale])
        .collect();
    plot_ui.line(Line::new(points).name(name).color(color).width(1.0));

    let Some(result) = state.results.get(&order.order) else {
        return;
    };
    let cal = &result.calibration;

    let peaks: PlotPoints = cal
        .peaks
        .iter()
        .map(|p| [p.index as f64, (p.height - offset) / scale])
        .collect();
    plot_ui.points(
        Points::new(peaks)
            .name(format!("{name} peaks"))
            .shape(MarkerShape::Down)
            .radius(3.0)
            .color(color),
    );

    if !state.show_fits {
        return;
    }
    for fit in cal.fits.iter().filter(|f| f.converged) {
        let n = (fit.index_end - fit.index_start) * PROFILE_SAMPLES;
        let profile: PlotPoints = (0..=n)
            .map(|k| {
                let x = fit.index_start as f64 + k as f64 / PROFILE_SAMPLES as f64;
                [x, (fit.model(x) - offset) / scale]
            })
            .collect();
        plot_ui.line(Line::new(profile).color(Color32::YELLOW).width(1.0));
    }
}

fn residuals(plot_ui: &mut PlotUi, state: &AppState, order: &EchelleOrder, name: &str, color: Color32) {
    let Some(result) = state.results.get(&order.order) else {
        return;
    };
    if result.residuals.is_empty() {
        return;
    }
    let label = match result.rms {
        Some(rms) => format!("{name} ({} rms {rms:.1} m/s)", state.config.method),
        None => name.to_string(),
    };
    plot_ui.points(
        Points::new(PlotPoints::from(result.residuals.clone()))
            .name(label)
            .radius(2.5)
            .color(color),
    );
}

fn comparison(plot_ui: &mut PlotUi, state: &AppState, order: &EchelleOrder, name: &str, color: Color32) {
    let Some(c) = state.results.get(&order.order).and_then(|r| r.comparison.as_ref()) else {
        return;
    };
    let poly: PlotPoints = c.pixels.iter().zip(&c.poly_residuals).map(|(&x, &y)| [x, y]).collect();
    let spline: PlotPoints = c.pixels.iter().zip(&c.spline_residuals).map(|(&x, &y)| [x, y]).collect();
    plot_ui.points(
        Points::new(poly)
            .name(format!("{name} poly deg {} ({:.1} m/s)", c.degree, c.poly_rms))
            .shape(MarkerShape::Circle)
            .radius(2.5)
            .color(color),
    );
    plot_ui.points(
        Points::new(spline)
            .name(format!("{name} spline ({:.1} m/s)", c.spline_rms))
            .shape(MarkerShape::Cross)
            .radius(3.0)
            .color(color.gamma_multiply(0.6)),
    );
}

fn deviation(plot_ui: &mut PlotUi, state: &AppState, order: &EchelleOrder, name: &str, color: Color32) {
    let Some(result) = state.results.get(&order.order) else {
        return;
    };
    if result.deviation.is_empty() {
        return;
    }
    plot_ui.line(
        Line::new(PlotPoints::from(result.deviation.clone()))
            .name(name)
            .color(color)
            .width(1.5),
    );
}
