use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use comb_calib::calib::pipeline::load_and_calibrate;
use comb_calib::calib::solution::residuals;
use comb_calib::calib::stats::rms;
use comb_calib::calib::{
    compare_orders, fit_solution, summarize, ComparisonSummary, MethodComparison, OrderCalibration,
    OrderStatus,
};
use comb_calib::data::loader::load_file;
use comb_calib::data::writer::write_file;
use comb_calib::rv::{extract_radial_velocity, RadialVelocity};
use comb_calib::CalibrationConfig;

/// Batch LFC wavelength calibration and radial velocities.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// TOML configuration file; missing keys use the defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Write the report as JSON to this file.
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit the wavelength solution of every order of an LFC exposure.
    Calibrate {
        input: PathBuf,
        /// Also write the exposure with the new wavelength solutions.
        #[arg(long)]
        recalibrated: Option<PathBuf>,
    },
    /// Cross-validate polynomial against cubic-spline solutions.
    Compare {
        input: PathBuf,
        /// Polynomial degree (defaults to the configured method's degree).
        #[arg(short, long)]
        degree: Option<usize>,
    },
    /// Radial velocity of an observation against a template.
    Rv { template: PathBuf, observation: PathBuf },
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct OrderReport {
    order: usize,
    #[serde(flatten)]
    status: OrderStatus,
    peaks: usize,
    converged: usize,
    lines: usize,
    rms: Option<f64>,
}

#[derive(Serialize)]
struct CalibrationReport {
    input: PathBuf,
    method: String,
    orders: Vec<OrderReport>,
}

#[derive(Serialize)]
struct ComparisonReport {
    input: PathBuf,
    degree: usize,
    summary: ComparisonSummary,
    orders: Vec<MethodComparison>,
}

#[derive(Serialize)]
struct RvReport {
    template: PathBuf,
    observation: PathBuf,
    #[serde(flatten)]
    result: RadialVelocity,
}

fn write_report<T: Serialize>(report: &T, path: Option<&Path>) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating report {}", path.display()))?;
    serde_json::to_writer_pretty(file, report).context("writing report")?;
    log::info!("Report written to {}", path.display());
    Ok(())
}

fn order_report(cal: &OrderCalibration, config: &CalibrationConfig) -> (OrderReport, Option<Vec<f64>>) {
    let points = cal.calibration_points();
    let mut report = OrderReport {
        order: cal.order,
        status: cal.status,
        peaks: cal.peaks.len(),
        converged: cal.converged_fits(),
        lines: points.len(),
        rms: None,
    };
    if !cal.is_calibrated() {
        return (report, None);
    }
    match fit_solution(config.method, cal) {
        Ok(solution) => {
            report.rms = rms(&residuals(solution.as_ref(), &points));
            (report, Some(solution.evaluate_grid(cal.n_pixels)))
        }
        Err(e) => {
            log::warn!("Order {}: {e}", cal.order);
            (report, None)
        }
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

fn calibrate(input: &Path, recalibrated: Option<&Path>, cli: &Cli, config: &CalibrationConfig) -> Result<()> {
    let (mut exposure, calibrations) = load_and_calibrate(input, config)?;

    println!("{:>6} {:>6} {:>10} {:>6} {:>10}", "order", "peaks", "converged", "lines", "rms [m/s]");
    let mut orders = Vec::with_capacity(calibrations.len());
    for cal in &calibrations {
        let (report, grid) = order_report(cal, config);
        let rms = report.rms.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"));
        println!(
            "{:>6} {:>6} {:>10} {:>6} {:>10}",
            report.order, report.peaks, report.converged, report.lines, rms
        );
        if let (Some(grid), Some(order)) = (grid, exposure.orders.iter_mut().find(|o| o.order == cal.order)) {
            order.wavelength = grid;
        }
        orders.push(report);
    }

    if let Some(path) = recalibrated {
        write_file(&exposure, path)?;
    }
    write_report(
        &CalibrationReport {
            input: input.to_path_buf(),
            method: config.method.to_string(),
            orders,
        },
        cli.output.as_deref(),
    )
}

fn compare(input: &Path, degree: usize, cli: &Cli, config: &CalibrationConfig) -> Result<()> {
    let (_, calibrations) = load_and_calibrate(input, config)?;
    let comparisons = compare_orders(&calibrations, degree);
    let summary = summarize(&comparisons);

    println!("{:>6} {:>6} {:>14} {:>14}", "order", "lines", "poly [m/s]", "spline [m/s]");
    for c in &comparisons {
        println!(
            "{:>6} {:>6} {:>14.2} {:>14.2}",
            c.order,
            c.pixels.len(),
            c.poly_rms,
            c.spline_rms
        );
    }
    println!(
        "{:>6} {:>6} {:>14.2} {:>14.2}",
        "all", summary.lines, summary.poly_rms, summary.spline_rms
    );

    write_report(
        &ComparisonReport {
            input: input.to_path_buf(),
            degree,
            summary,
            orders: comparisons,
        },
        cli.output.as_deref(),
    )
}

fn radial_velocity(template: &Path, observation: &Path, cli: &Cli, config: &CalibrationConfig) -> Result<()> {
    let tpl = load_file(template).with_context(|| format!("loading {}", template.display()))?;
    let obs = load_file(observation).with_context(|| format!("loading {}", observation.display()))?;
    let result = extract_radial_velocity(&tpl, &obs, &config.rv)?;

    for v in &result.orders {
        println!("order {:>4}: {:>10.2} ± {:.2} m/s", v.order, v.velocity, v.error);
    }
    if !result.rejected.is_empty() {
        println!("rejected orders: {:?}", result.rejected);
    }
    println!("RV = {:.2} ± {:.2} m/s", result.velocity, result.error);

    write_report(
        &RvReport {
            template: template.to_path_buf(),
            observation: observation.to_path_buf(),
            result,
        },
        cli.output.as_deref(),
    )
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => CalibrationConfig::load(path)?,
        None => CalibrationConfig::default(),
    };

    match &cli.command {
        Command::Calibrate { input, recalibrated } => {
            calibrate(input, recalibrated.as_deref(), cli, &config)
        }
        Command::Compare { input, degree } => {
            let degree = degree.unwrap_or(match config.method {
                comb_calib::calib::CalibrationMethod::Polynomial { degree } => degree,
                comb_calib::calib::CalibrationMethod::CubicSpline => 5,
            });
            compare(input, degree, cli, &config)
        }
        Command::Rv {
            template,
            observation,
        } => radial_velocity(template, observation, cli, &config),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        log::error!("{e:#}");
        std::process::exit(1);
    }
}
