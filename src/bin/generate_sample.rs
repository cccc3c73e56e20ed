use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Array, Int64Array, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use clap::Parser;

use comb_calib::data::model::Exposure;
use comb_calib::data::synthetic::{
    lfc_exposure, stellar_observation, stellar_template, LfcParams, StellarParams,
};
use comb_calib::data::writer::write_parquet;

/// Write synthetic LFC, template and observation exposures.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Output directory.
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Radial velocity of the observation, m/s.
    #[arg(short, long, default_value_t = 1234.5)]
    velocity: f64,

    #[arg(short, long, default_value_t = 42)]
    seed: u64,

    /// Number of echelle orders in each file.
    #[arg(short, long, default_value_t = 5)]
    n_orders: usize,
}

/// One line per order: number, pixels and wavelength range.
fn overview(exposure: &Exposure) -> Result<RecordBatch> {
    let orders = &exposure.orders;
    let schema = Arc::new(Schema::new(vec![
        Field::new("order", DataType::Int64, false),
        Field::new("pixels", DataType::UInt64, false),
        Field::new("wavelength_min", DataType::Float64, false),
        Field::new("wavelength_max", DataType::Float64, false),
    ]));
    let first = |o: &comb_calib::data::model::EchelleOrder| o.wavelength.first().copied().unwrap_or(f64::NAN);
    let last = |o: &comb_calib::data::model::EchelleOrder| o.wavelength.last().copied().unwrap_or(f64::NAN);
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(orders.iter().map(|o| o.order as i64).collect::<Int64Array>()),
            Arc::new(orders.iter().map(|o| o.len() as u64).collect::<UInt64Array>()),
            Arc::new(orders.iter().map(first).collect::<Float64Array>()),
            Arc::new(orders.iter().map(last).collect::<Float64Array>()),
        ],
    )
    .context("building overview batch")
}

fn write(exposure: &Exposure, args: &Args, name: &str) -> Result<()> {
    let path = args.out_dir.join(name);
    write_parquet(exposure, &path)?;
    println!("{}:\n{}", path.display(), pretty_format_batches(&[overview(exposure)?])?);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;

    let lfc = LfcParams {
        n_orders: args.n_orders,
        ..Default::default()
    };
    write(&lfc_exposure(&lfc, args.seed), &args, "sample_lfc.parquet")?;

    let stellar = StellarParams {
        n_orders: args.n_orders,
        ..Default::default()
    };
    write(&stellar_template(&stellar)?, &args, "sample_template.parquet")?;
    write(
        &stellar_observation(&stellar, args.velocity, args.seed)?,
        &args,
        "sample_observation.parquet",
    )?;

    println!("Observation shifted by {} m/s", args.velocity);
    Ok(())
}
