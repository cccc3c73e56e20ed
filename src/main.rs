mod app;
mod color;
mod state;
mod ui;

use std::path::PathBuf;

use app::CombCalibApp;
use clap::Parser;
use comb_calib::data::loader::load_file;
use comb_calib::CalibrationConfig;
use eframe::egui;
use state::AppState;

/// Interactive viewer for LFC wavelength calibration.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Exposure to open on start-up.
    file: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn initial_state(args: &Args) -> AppState {
    let config = match &args.config {
        Some(path) => CalibrationConfig::load(path).unwrap_or_else(|e| {
            log::error!("{e:#}, using defaults");
            CalibrationConfig::default()
        }),
        None => CalibrationConfig::default(),
    };
    let mut state = AppState::with_config(config);

    if let Some(path) = &args.file {
        match load_file(path) {
            Ok(exposure) => state.set_exposure(exposure, Some(path.clone())),
            Err(e) => {
                log::error!("Failed to load {}: {e:#}", path.display());
                state.status_message = Some(format!("Error: {e:#}"));
            }
        }
    }
    state
}

fn main() -> eframe::Result {
    env_logger::init();
    let args = Args::parse();
    let state = initial_state(&args);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 860.0])
            .with_min_inner_size([640.0, 420.0]),
        ..Default::default()
    };

    eframe::run_native(
        "comb-calib – LFC wavelength calibration",
        options,
        Box::new(|_cc| Ok(Box::new(CombCalibApp::new(state)))),
    )
}
