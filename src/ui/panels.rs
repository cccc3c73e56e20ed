use eframe::egui::{self, Color32, RichText, ScrollArea, Ui};
use egui_extras::{Column, TableBuilder};

use comb_calib::calib::poly::{MAX_DEGREE, MIN_DEGREE};
use comb_calib::calib::{CalibrationMethod, OrderStatus};

use crate::state::{AppState, PlotMode};

// ---------------------------------------------------------------------------
// Left side panel – calibration settings and filter widgets
// ---------------------------------------------------------------------------

/// Render the left settings/filter panel.
pub fn side_panel(ui: &mut Ui, state: &mut AppState) {
    ui.heading("Calibration");
    ui.separator();
    if settings(ui, state) {
        state.recalibrate();
    }
    ui.add_space(8.0);

    ui.heading("Filters");
    ui.separator();

    let exposure = match &state.exposure {
        Some(exp) => exp,
        None => {
            ui.label("No exposure loaded.");
            return;
        }
    };

    // Clone what we need so we can mutate state inside the loop.
    let columns = exposure.column_names.clone();
    let unique = exposure.unique_values.clone();

    ScrollArea::vertical()
        .auto_shrink([false, false])
        .show(ui, |ui: &mut Ui| {
            // ---- Colour-by selector ----
            ui.strong("Color by");
            let current_color_col = state.color_column.clone().unwrap_or_default();
            egui::ComboBox::from_id_salt("color_by")
                .selected_text(&current_color_col)
                .show_ui(ui, |ui: &mut Ui| {
                    for col in &columns {
                        if ui
                            .selectable_label(current_color_col == *col, col)
                            .clicked()
                        {
                            state.set_color_column(col.clone());
                        }
                    }
                });
            ui.separator();

            // ---- Per-column filter widgets (collapsible) ----
            for col in &columns {
                let Some(all_values) = unique.get(col) else {
                    continue;
                };

                let n_selected = state.filters.get(col).map_or(0, |s| s.len());
                let header_text = format!("{col}  ({n_selected}/{})", all_values.len());

                egui::CollapsingHeader::new(RichText::new(header_text).strong())
                    .id_salt(col)
                    .default_open(col == comb_calib::data::model::ORDER_COLUMN)
                    .show(ui, |ui: &mut Ui| {
                        ui.horizontal(|ui: &mut Ui| {
                            if ui.small_button("All").clicked() {
                                state.select_all(col);
                            }
                            if ui.small_button("None").clicked() {
                                state.select_none(col);
                            }
                        });

                        for val in all_values {
                            let mut text = RichText::new(val.to_string());
                            if state.color_column.as_deref() == Some(col) {
                                if let Some(cm) = &state.color_map {
                                    text = text.color(cm.color_for(val));
                                }
                            }

                            let selected = state.filters.entry(col.clone()).or_default();
                            let mut checked = selected.contains(val);
                            if ui.checkbox(&mut checked, text).changed() {
                                if checked {
                                    selected.insert(val.clone());
                                } else {
                                    selected.remove(val);
                                }
                            }
                        }
                    });
            }
        });

    // Recompute visible indices after any checkbox changes.
    state.refilter();
}

/// What a value widget did this frame.
#[derive(Debug, Clone, Copy, Default)]
struct EditEvent {
    changed: bool,
    dragging: bool,
    drag_stopped: bool,
    focused: bool,
    lost_focus: bool,
}

impl EditEvent {
    fn from_response(response: &egui::Response) -> Self {
        Self {
            changed: response.changed(),
            dragging: response.dragged(),
            drag_stopped: response.drag_stopped(),
            focused: response.has_focus(),
            lost_focus: response.lost_focus(),
        }
    }

    /// The edit is complete: a drag was released, typed input lost focus,
    /// or a single click set the value.
    fn finished(self) -> bool {
        self.drag_stopped || self.lost_focus || (self.changed && !self.dragging && !self.focused)
    }
}

/// Method, degree and error-correction widgets. Returns whether a finished
/// edit changed the settings.
fn settings(ui: &mut Ui, state: &mut AppState) -> bool {
    let config = &mut state.config;
    let mut changed = false;

    let mut spline = config.method == CalibrationMethod::CubicSpline;
    let mut degree = match config.method {
        CalibrationMethod::Polynomial { degree } => degree,
        CalibrationMethod::CubicSpline => 5,
    };

    ui.horizontal(|ui: &mut Ui| {
        changed |= ui.radio_value(&mut spline, false, "Polynomial").changed();
        changed |= ui.radio_value(&mut spline, true, "Cubic spline").changed();
    });
    ui.add_enabled_ui(!spline, |ui: &mut Ui| {
        let slider = ui.add(egui::Slider::new(&mut degree, MIN_DEGREE..=MAX_DEGREE).text("degree"));
        changed |= EditEvent::from_response(&slider).finished();
    });
    config.method = if spline {
        CalibrationMethod::CubicSpline
    } else {
        CalibrationMethod::Polynomial { degree }
    };

    changed |= ui
        .checkbox(&mut config.correct_errors, "Inflate uncertainties (√3)")
        .changed();

    ui.horizontal(|ui: &mut Ui| {
        ui.label("Orders");
        let first = ui.add(egui::DragValue::new(&mut config.first_order).range(0..=config.last_order));
        changed |= EditEvent::from_response(&first).finished();
        ui.label("..");
        let last = ui.add(egui::DragValue::new(&mut config.last_order).range(config.first_order..=1000));
        changed |= EditEvent::from_response(&last).finished();
    });

    if state.exposure.is_some() && ui.button("Recalibrate").clicked() {
        changed = true;
    }
    changed
}

// ---------------------------------------------------------------------------
// Top bar
// ---------------------------------------------------------------------------

/// Render the top menu / toolbar.
pub fn top_bar(ui: &mut Ui, state: &mut AppState) {
    egui::menu::bar(ui, |ui: &mut Ui| {
        ui.menu_button("File", |ui: &mut Ui| {
            if ui.button("Open…").clicked() {
                open_file_dialog(state);
                ui.close_menu();
            }
        });

        ui.separator();

        for mode in PlotMode::ALL {
            if ui
                .selectable_label(state.plot_mode == mode, mode.to_string())
                .clicked()
            {
                state.plot_mode = mode;
            }
        }

        ui.separator();

        if state.plot_mode == PlotMode::Spectrum {
            ui.checkbox(&mut state.show_fits, "Fitted lines");
            if ui
                .selectable_label(state.minmax_scaling, "Min-Max Scaling")
                .clicked()
            {
                state.minmax_scaling = !state.minmax_scaling;
            }
            ui.separator();
        }

        if let Some(exp) = &state.exposure {
            let name = state
                .source
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            ui.label(format!(
                "{name}  {} orders, {} visible",
                exp.len(),
                state.visible_indices.len()
            ));
        }

        if let Some(msg) = &state.status_message {
            ui.label(RichText::new(msg).color(Color32::RED));
        }
    });
}

// ---------------------------------------------------------------------------
// Bottom panel – per-order summary table
// ---------------------------------------------------------------------------

fn format_rms(v: Option<f64>) -> String {
    v.filter(|v| v.is_finite())
        .map_or_else(|| "–".to_string(), |v| format!("{v:.2}"))
}

pub fn summary_table(ui: &mut Ui, state: &AppState) {
    if state.results.is_empty() {
        ui.label("No calibration results.");
        return;
    }

    TableBuilder::new(ui)
        .striped(true)
        .column(Column::auto().at_least(50.0))
        .columns(Column::auto().at_least(70.0), 4)
        .column(Column::remainder())
        .header(20.0, |mut header| {
            for title in ["Order", "Peaks", "Converged", "RMS [m/s]", "Poly held-out", "Spline held-out"] {
                header.col(|ui| {
                    ui.strong(title);
                });
            }
        })
        .body(|mut body| {
            for result in state.results.values() {
                let cal = &result.calibration;
                body.row(18.0, |mut row| {
                    row.col(|ui| {
                        ui.label(cal.order.to_string());
                    });
                    row.col(|ui| {
                        ui.label(cal.peaks.len().to_string());
                    });
                    row.col(|ui| match cal.status {
                        OrderStatus::Calibrated => {
                            ui.label(format!("{}/{}", cal.converged_fits(), cal.fits.len()));
                        }
                        OrderStatus::Skipped { .. } => {
                            ui.label(RichText::new("skipped").color(Color32::ORANGE));
                        }
                    });
                    row.col(|ui| {
                        ui.label(format_rms(result.rms));
                    });
                    row.col(|ui| {
                        ui.label(format_rms(result.comparison.as_ref().map(|c| c.poly_rms)));
                    });
                    row.col(|ui| {
                        ui.label(format_rms(result.comparison.as_ref().map(|c| c.spline_rms)));
                    });
                });
            }
        });
}

// ---------------------------------------------------------------------------
// File dialog
// ---------------------------------------------------------------------------

pub fn open_file_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Open LFC exposure")
        .add_filter("Supported files", &["fits", "fit", "fts", "parquet", "pq", "json", "csv"])
        .add_filter("FITS", &["fits", "fit", "fts"])
        .add_filter("Parquet", &["parquet", "pq"])
        .add_filter("JSON", &["json"])
        .add_filter("CSV", &["csv"])
        .pick_file();

    if let Some(path) = file {
        match comb_calib::data::loader::load_file(&path) {
            Ok(exposure) => {
                log::info!(
                    "Loaded {} orders with columns {:?}",
                    exposure.len(),
                    exposure.column_names
                );
                state.set_exposure(exposure, Some(path));
            }
            Err(e) => {
                log::error!("Failed to load file: {e:#}");
                state.status_message = Some(format!("Error: {e:#}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_finished_only_when_released() {
        let dragging = EditEvent {
            changed: true,
            dragging: true,
            ..Default::default()
        };
        assert!(!dragging.finished());

        let typing = EditEvent {
            changed: true,
            focused: true,
            ..Default::default()
        };
        assert!(!typing.finished());

        let released = EditEvent {
            drag_stopped: true,
            ..Default::default()
        };
        assert!(released.finished());

        let clicked = EditEvent {
            changed: true,
            ..Default::default()
        };
        assert!(clicked.finished());
        assert!(!EditEvent::default().finished());
    }
}
