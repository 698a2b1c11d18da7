/// Land-cover classification CLI: runs the full pipeline from band files to
/// the submission CSV, optionally rendering a PNG preview of the map.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use landcover_core::raster::to_code;
use landcover_core::{Legend, Pipeline, PipelineConfig, Raster};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "landcover",
    about = "Train a random forest on labelled rasters and classify a satellite scene"
)]
struct Args {
    /// JSON pipeline configuration; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of single-band GeoTIFFs
    #[arg(long, conflicts_with = "archive")]
    imagery: Option<PathBuf>,

    /// .tar / .tar.gz scene archive
    #[arg(long)]
    archive: Option<PathBuf>,

    /// Training label raster
    #[arg(long)]
    train: Option<PathBuf>,

    /// Validation label raster
    #[arg(long)]
    validation: Option<PathBuf>,

    /// CSV of submission coordinates (X,Y,category)
    #[arg(long)]
    submission: Option<PathBuf>,

    /// Output directory (created if absent)
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    /// Points sampled from each label raster
    #[arg(long)]
    sample_size: Option<usize>,

    #[arg(long)]
    trees: Option<usize>,

    /// Training threads (0 = all cores)
    #[arg(long)]
    workers: Option<usize>,

    /// Raster prediction threads
    #[arg(long)]
    predict_workers: Option<usize>,

    /// Write the fitted model as JSON
    #[arg(long)]
    save_model: bool,

    /// Write legend names instead of codes in the submission
    #[arg(long)]
    names: bool,

    /// Render the predicted map as a PNG
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(&self, config: &mut PipelineConfig) {
        let inputs = &mut config.inputs;
        if let Some(dir) = &self.imagery {
            inputs.imagery_dir = Some(dir.clone());
            inputs.imagery_archive = None;
        }
        if let Some(archive) = &self.archive {
            inputs.imagery_archive = Some(archive.clone());
            inputs.imagery_dir = None;
        }
        if let Some(p) = &self.train {
            inputs.train_labels = p.clone();
        }
        if let Some(p) = &self.validation {
            inputs.validation_labels = p.clone();
        }
        if let Some(p) = &self.submission {
            inputs.submission = p.clone();
        }
        if let Some(p) = &self.output {
            config.output.dir = p.clone();
        }
        if let Some(seed) = self.seed {
            config.sampling.seed = seed;
        }
        if let Some(n) = self.sample_size {
            config.sampling.size = n;
        }
        if let Some(n) = self.trees {
            config.forest.n_trees = n;
        }
        if let Some(n) = self.workers {
            config.forest.workers = n;
        }
        if let Some(n) = self.predict_workers {
            config.prediction.workers = n;
        }
        config.output.save_model |= self.save_model;
        config.output.write_names |= self.names;
    }
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

// ── Preview ──────────────────────────────────────────────────────────────────

/// One pixel per cell, coloured by legend; no-data is black.
fn write_preview(prediction: &Raster, legend: &Legend, path: &Path) -> Result<()> {
    let mut img = image::RgbImage::new(prediction.width as u32, prediction.height as u32);
    for r in 0..prediction.height {
        for c in 0..prediction.width {
            let rgb = to_code(prediction.get(0, r, c)).map_or([0, 0, 0], |code| legend.color(code));
            img.put_pixel(c as u32, r as u32, image::Rgb(rgb));
        }
    }
    img.save(path)
        .with_context(|| format!("Write failed: {}", path.display()))
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Cannot read config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let result = Pipeline::new().run(&config).context("Pipeline failed")?;
    let report = &result.report;

    if let Some(path) = &args.preview {
        let legend = result.prediction.legend.as_ref().unwrap_or(&config.legend);
        write_preview(&result.prediction, legend, path)?;
        info!(path = %path.display(), "wrote preview");
    }

    println!(
        "accuracy {:.4}  balanced accuracy {:.4}  kappa {:.4}",
        report.evaluation.accuracy, report.evaluation.balanced_accuracy, report.evaluation.kappa
    );
    println!(
        "submission: {} rows ({} without prediction) -> {}",
        report.submission_rows,
        report.submission_missing,
        report.outputs.submission.display()
    );
    println!("report: {}", report.outputs.report.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args = Args::parse_from([
            "landcover", "--archive", "scene.tar.gz", "--seed", "9", "--trees", "20",
            "--sample-size", "100", "--names",
        ]);
        let mut config = PipelineConfig::default();
        config.inputs.imagery_dir = Some("old".into());
        args.apply(&mut config);
        assert_eq!(config.inputs.imagery_archive, Some(PathBuf::from("scene.tar.gz")));
        assert_eq!(config.inputs.imagery_dir, None);
        assert_eq!(config.sampling.seed, 9);
        assert_eq!(config.sampling.size, 100);
        assert_eq!(config.forest.n_trees, 20);
        assert!(config.output.write_names);
        assert!(!config.output.save_model);
    }

    #[test]
    fn imagery_and_archive_conflict() {
        assert!(Args::try_parse_from(["landcover", "--imagery", "a", "--archive", "b"]).is_err());
    }
}
