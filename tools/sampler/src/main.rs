/// Label sampling tool: draws a seeded random sample of labelled pixels from a
/// categorical GeoTIFF and writes the points as CSV.
///
/// Useful for inspecting the class mix a given seed and sample size produce
/// before running the full pipeline.
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use landcover_core::crs::align_to;
use landcover_core::geotiff::read_categorical;
use landcover_core::sampler::sample_random;
use landcover_core::{Crs, Legend, NATIONAL_GRID};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "sampler", about = "Sample labelled pixels of a categorical GeoTIFF into a CSV")]
struct Args {
    /// Categorical label raster
    #[arg(short, long)]
    labels: PathBuf,

    /// Output CSV (X,Y,category)
    #[arg(short, long, default_value = "data/sample.csv")]
    output: PathBuf,

    /// Number of points to draw
    #[arg(short = 'n', long, default_value = "20000")]
    size: usize,

    #[arg(long, default_value = "1")]
    seed: u64,

    /// Label no-data code (defaults to the file's GDAL_NODATA tag)
    #[arg(long)]
    nodata: Option<f32>,

    /// EPSG code of the output coordinates (defaults to the raster's CRS)
    #[arg(long)]
    epsg: Option<u32>,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct Record {
    #[serde(rename = "X")]
    x: f64,
    #[serde(rename = "Y")]
    y: f64,
    category: Option<u16>,
}

fn init_logging(verbose: bool) -> Result<()> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialise logging")
}

// ── Sampling ─────────────────────────────────────────────────────────────────

/// Sample the label raster and write the CSV; returns the per-class tally.
fn run(args: &Args) -> Result<BTreeMap<u16, usize>> {
    let legend = Legend::landcover();
    let mut raster = read_categorical(&args.labels, args.nodata, &legend)
        .with_context(|| format!("Cannot read {}", args.labels.display()))?;
    if raster.crs.is_none() {
        warn!(fallback = %NATIONAL_GRID, "label raster has no CRS");
        raster.crs = Some(NATIONAL_GRID);
    }

    let mut rng = StdRng::seed_from_u64(args.seed);
    let sample = sample_random(&raster, args.size, &mut rng).context("Sampling failed")?;
    let target = match args.epsg {
        Some(code) => Crs::from_epsg(code).with_context(|| format!("Unsupported --epsg {code}"))?,
        None => sample.crs,
    };
    let sample = align_to(&sample, target)?;

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create {}", parent.display()))?;
    }
    let mut counts: BTreeMap<u16, usize> = BTreeMap::new();
    let mut writer = csv::Writer::from_path(&args.output)
        .with_context(|| format!("Cannot create {}", args.output.display()))?;
    let categories = sample.categories.clone().unwrap_or_default();
    for (i, c) in sample.coords.iter().enumerate() {
        let category = categories.get(i).copied().flatten();
        if let Some(code) = category {
            *counts.entry(code).or_default() += 1;
        }
        writer
            .serialize(Record { x: c.x, y: c.y, category })
            .with_context(|| format!("Write failed: {}", args.output.display()))?;
    }
    writer.flush()?;

    let raster_legend = raster.legend.as_ref().unwrap_or(&legend);
    for (code, n) in &counts {
        info!(
            code,
            name = %raster_legend.label(*code),
            count = n,
            share = *n as f64 / sample.len().max(1) as f64,
            "class"
        );
    }
    info!(points = sample.len(), crs = %target, path = %args.output.display(), "wrote sample");
    Ok(counts)
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;
    run(&args)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use landcover_core::{GeoTransform, Raster, IMAGERY_UTM};

    /// 20×20 national-grid labels at 30 m: forest (3) west of 15°E,
    /// agriculture (2) east, top row no-data.
    fn write_labels(path: &std::path::Path) {
        let t = GeoTransform::new(499_700.0, 100_300.0, 30.0, -30.0);
        let mut data = Vec::with_capacity(400);
        for r in 0..20 {
            for c in 0..20 {
                let (x, _) = t.pixel_center(r, c);
                data.push(if r == 0 { f32::NAN } else if x < 500_000.0 { 3.0 } else { 2.0 });
            }
        }
        let raster = Raster::from_band("category", data, 20, 20, t, Some(NATIONAL_GRID))
            .unwrap()
            .with_legend(Legend::landcover());
        landcover_core::geotiff::write_geotiff(&raster, path).unwrap();
    }

    #[test]
    fn samples_reprojected_points_into_a_new_directory() {
        let dir = tempfile::tempdir().unwrap();
        let labels = dir.path().join("labels.tif");
        write_labels(&labels);
        let output = dir.path().join("nested").join("sample.csv");
        let args = Args::parse_from([
            "sampler",
            "--labels", labels.to_str().unwrap(),
            "--output", output.to_str().unwrap(),
            "-n", "50",
            "--epsg", "32633",
        ]);

        let counts = run(&args).unwrap();
        assert_eq!(counts.values().sum::<usize>(), 50);
        assert!(counts.keys().all(|c| [2, 3].contains(c)));

        let mut reader = csv::Reader::from_path(&output).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(str::to_string).collect();
        assert_eq!(headers, vec!["X", "Y", "category"]);
        let mut rows = 0;
        for record in reader.records() {
            let record = record.unwrap();
            let x: f64 = record[0].parse().unwrap();
            let y: f64 = record[1].parse().unwrap();
            let code: u16 = record[2].parse().unwrap();
            // Back on the national grid the point sits on a labelled pixel
            // centre of the class written there.
            let (gx, gy) = IMAGERY_UTM.transform(NATIONAL_GRID, x, y);
            assert!((499_700.0..500_300.0).contains(&gx), "x {gx}");
            assert!((99_700.0..100_270.0).contains(&gy), "y {gy}");
            assert!(((gx - 499_715.0) / 30.0 - ((gx - 499_715.0) / 30.0).round()).abs() < 1e-3);
            assert_eq!(code, if gx < 500_000.0 { 3 } else { 2 });
            rows += 1;
        }
        assert_eq!(rows, 50);
    }

    #[test]
    fn sample_larger_than_raster_returns_every_labelled_pixel() {
        let dir = tempfile::tempdir().unwrap();
        let labels = dir.path().join("labels.tif");
        write_labels(&labels);
        let output = dir.path().join("all.csv");
        let args = Args::parse_from([
            "sampler",
            "--labels", labels.to_str().unwrap(),
            "--output", output.to_str().unwrap(),
            "-n", "1000",
        ]);
        let counts = run(&args).unwrap();
        // 19 labelled rows, 10 columns on each side of the meridian.
        assert_eq!(counts.get(&3), Some(&190));
        assert_eq!(counts.get(&2), Some(&190));
    }
}
