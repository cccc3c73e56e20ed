use eframe::egui;

use crate::state::AppState;
use crate::ui::{panels, plot};

// ---------------------------------------------------------------------------
// eframe App implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CombCalibApp {
    pub state: AppState,
}

impl CombCalibApp {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

impl eframe::App for CombCalibApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // ---- Top panel: menu bar and plot modes ----
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            panels::top_bar(ui, &mut self.state);
        });

        // ---- Bottom panel: per-order summary ----
        egui::TopBottomPanel::bottom("summary")
            .resizable(true)
            .default_height(180.0)
            .show(ctx, |ui| {
                panels::summary_table(ui, &self.state);
            });

        // ---- Left side panel: settings and filters ----
        egui::SidePanel::left("filter_panel")
            .default_width(240.0)
            .resizable(true)
            .show(ctx, |ui| {
                panels::side_panel(ui, &mut self.state);
            });

        // ---- Central panel: plot ----
        egui::CentralPanel::default().show(ctx, |ui| {
            plot::central_plot(ui, &self.state);
        });
    }
}
