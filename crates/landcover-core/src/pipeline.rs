//! Pipeline orchestrator: runs every stage in order, from band files to the
//! submission CSV.
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::crs::{align_to, Crs, IMAGERY_UTM, NATIONAL_GRID};
use crate::error::{Error, Result};
use crate::evaluate::{ConfusionMatrix, Evaluation};
use crate::extract::SampleTable;
use crate::forest::{ForestParams, RandomForest};
use crate::geotiff::{list_band_files, load_band_stack, load_band_stack_from_archive, read_categorical, write_geotiff};
use crate::points::PointSet;
use crate::raster::Raster;
use crate::sampler::sample_random;
use crate::submission::{predict_submission, read_submission, write_submission, SubmissionOptions};

pub const REPORT_FILE: &str = "report.json";
pub const MODEL_FILE: &str = "model.json";
pub const PREDICTION_FILE: &str = "prediction.tif";

// ── Public structs ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub mean_decrease_gini: f64,
}

/// Sample counts for one labelled split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitCounts {
    pub sampled: usize,
    pub dropped: usize,
    pub used: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputPaths {
    pub report: PathBuf,
    pub submission: PathBuf,
    pub prediction: Option<PathBuf>,
    pub model: Option<PathBuf>,
}

/// Summary of one run, written as `report.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub bands: Vec<String>,
    pub imagery_crs: Crs,
    pub train: SplitCounts,
    pub validation: SplitCounts,
    pub classes: Vec<u16>,
    pub n_trees: usize,
    /// Forest parameters the model was fitted with.
    pub forest: ForestParams,
    /// Validation codes the forest never saw in training.
    pub unseen_validation_classes: Vec<u16>,
    pub evaluation: Evaluation,
    /// Sorted by decreasing importance.
    pub feature_importance: Vec<FeatureImportance>,
    pub prediction_size: (usize, usize),
    pub submission_rows: usize,
    pub submission_missing: usize,
    pub outputs: OutputPaths,
    pub elapsed_ms: u64,
}

/// Full output of a run.
pub struct PipelineResult {
    pub report: RunReport,
    pub prediction: Raster,
    pub model: RandomForest,
}

// ── Orchestrator ─────────────────────────────────────────────────────────────

pub struct Pipeline;

impl Pipeline {
    pub fn new() -> Self {
        Self
    }

    /// Run the pipeline.
    ///
    /// Stage order:
    ///   1. Imagery: load bands, rescale to reflectance
    ///   2. Labels: training and validation rasters
    ///   3. Sampling: training then validation, one seeded generator
    ///   4. Extraction into the imagery frame, incomplete rows dropped
    ///   5. Training
    ///   6. Evaluation on the validation sample
    ///   7. Raster prediction over the validation extent
    ///   8. Submission and output files
    pub fn run(&self, config: &PipelineConfig) -> Result<PipelineResult> {
        config.validate()?;
        let started = Instant::now();

        // ── 1. Imagery ───────────────────────────────────────────────────────
        let mut imagery = load_imagery(config)?;
        let imagery_crs = *imagery.crs.get_or_insert_with(|| {
            warn!(fallback = %IMAGERY_UTM, "imagery has no CRS");
            IMAGERY_UTM
        });
        imagery.rescale(config.rescale.scale, config.rescale.offset);
        info!(
            bands = %imagery.band_names.join(","),
            width = imagery.width,
            height = imagery.height,
            crs = %imagery_crs,
            "imagery ready"
        );

        // ── 2. Labels ────────────────────────────────────────────────────────
        let train = load_labels(&config.inputs.train_labels, config)?;
        let validation = load_labels(&config.inputs.validation_labels, config)?;

        // ── 3. Sampling ──────────────────────────────────────────────────────
        let mut rng = StdRng::seed_from_u64(config.sampling.seed);
        let train_points = sample_random(&train, config.sampling.size, &mut rng)?;
        let validation_points = sample_random(&validation, config.sampling.size, &mut rng)?;

        // ── 4. Extraction ────────────────────────────────────────────────────
        let train_points = align_to(&train_points, imagery_crs)?;
        let validation_points = align_to(&validation_points, imagery_crs)?;
        let (train_table, train_counts) = labelled_table(&imagery, &train_points, "training")?;
        let (validation_table, validation_counts) =
            labelled_table(&imagery, &validation_points, "validation")?;

        // ── 5. Training ──────────────────────────────────────────────────────
        let model = RandomForest::fit(&train_table, &config.forest, &mut rng)?;
        debug!(trees = model.n_trees(), classes = ?model.classes(), "model fitted");

        // ── 6. Evaluation ────────────────────────────────────────────────────
        let legend = validation.legend.as_ref().unwrap_or(&config.legend);
        let predicted = model.predict_table(&validation_table)?;
        let (pred_codes, true_codes): (Vec<u16>, Vec<u16>) = predicted
            .iter()
            .enumerate()
            .filter_map(|(i, p)| Some(((*p)?, validation_table.category(i)?)))
            .unzip();
        let evaluation = Evaluation::new(ConfusionMatrix::from_predictions(&pred_codes, &true_codes)?, legend);
        info!(
            accuracy = evaluation.accuracy,
            balanced_accuracy = evaluation.balanced_accuracy,
            kappa = evaluation.kappa,
            "validation"
        );
        info!("confusion matrix\n{}", evaluation.render_table());

        let mut unseen: Vec<u16> = true_codes
            .iter()
            .copied()
            .filter(|c| !model.classes().contains(c))
            .collect();
        unseen.sort_unstable();
        unseen.dedup();
        if !unseen.is_empty() {
            warn!(codes = ?unseen, "validation classes absent from training sample");
        }

        // ── 7. Raster prediction ─────────────────────────────────────────────
        let validation_crs = validation
            .crs
            .ok_or_else(|| Error::MissingCrs("validation raster".into()))?;
        let area = validation.extent().transform(validation_crs, imagery_crs);
        let cropped = imagery.crop(&area)?;
        let prediction = model.predict_raster(&cropped, legend, config.prediction.workers)?;
        debug!(valid = prediction.valid_count(0), "prediction raster");

        // ── 8. Outputs ───────────────────────────────────────────────────────
        let out = &config.output;
        fs::create_dir_all(&out.dir)?;
        let mut outputs = OutputPaths {
            report: out.dir.join(REPORT_FILE),
            submission: out.dir.join(&out.submission_file),
            ..Default::default()
        };

        let points = read_submission(&config.inputs.submission, config.delimiter())?;
        let rows = predict_submission(&prediction, &points)?;
        let options = SubmissionOptions {
            delimiter: config.delimiter(),
            missing_marker: out.missing_marker.clone(),
            write_names: out.write_names,
            legend: legend.clone(),
        };
        let submission_missing = write_submission(&outputs.submission, &rows, &options)?;

        if out.write_raster {
            let path = out.dir.join(PREDICTION_FILE);
            write_geotiff(&prediction, &path)?;
            info!(path = %path.display(), "wrote prediction raster");
            outputs.prediction = Some(path);
        }
        if out.save_model {
            let path = out.dir.join(MODEL_FILE);
            fs::write(&path, serde_json::to_string(&model)?)?;
            info!(path = %path.display(), "wrote model");
            outputs.model = Some(path);
        }

        let mut feature_importance: Vec<FeatureImportance> = model
            .feature_importance()
            .into_iter()
            .map(|(feature, mean_decrease_gini)| FeatureImportance { feature, mean_decrease_gini })
            .collect();
        feature_importance.sort_by(|a, b| b.mean_decrease_gini.total_cmp(&a.mean_decrease_gini));

        let report = RunReport {
            bands: imagery.band_names.clone(),
            imagery_crs,
            train: train_counts,
            validation: validation_counts,
            classes: model.classes().to_vec(),
            n_trees: model.n_trees(),
            forest: model.params().clone(),
            unseen_validation_classes: unseen,
            evaluation,
            feature_importance,
            prediction_size: (prediction.width, prediction.height),
            submission_rows: rows.len(),
            submission_missing,
            outputs,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        fs::write(&report.outputs.report, serde_json::to_string_pretty(&report)?)?;
        info!(elapsed_ms = report.elapsed_ms, "pipeline finished");

        Ok(PipelineResult { report, prediction, model })
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

// ── Stage helpers ────────────────────────────────────────────────────────────

fn load_imagery(config: &PipelineConfig) -> Result<Raster> {
    let i = &config.inputs;
    match (&i.imagery_dir, &i.imagery_archive) {
        (Some(dir), _) => {
            let bands = list_band_files(dir, &i.bands)?;
            if bands.is_empty() {
                return Err(Error::EmptyInput(format!("no band files in {}", dir.display())));
            }
            load_band_stack(&bands, i.imagery_nodata)
        }
        (None, Some(archive)) => load_band_stack_from_archive(archive, &i.bands, i.imagery_nodata),
        (None, None) => Err(Error::InvalidConfig("no imagery source".into())),
    }
}

fn load_labels(path: &Path, config: &PipelineConfig) -> Result<Raster> {
    let mut raster = read_categorical(path, config.inputs.label_nodata, &config.legend)?;
    if raster.crs.is_none() {
        warn!(path = %path.display(), fallback = %NATIONAL_GRID, "label raster has no CRS");
        raster.crs = Some(NATIONAL_GRID);
    }
    info!(
        path = %path.display(),
        width = raster.width,
        height = raster.height,
        valid = raster.valid_count(0),
        "labels ready"
    );
    Ok(raster)
}

/// Extract `imagery` at labelled points and drop rows with missing values.
fn labelled_table(
    imagery: &Raster,
    points: &PointSet,
    split: &str,
) -> Result<(SampleTable, SplitCounts)> {
    let mut table = SampleTable::from_points(imagery, points)?;
    let sampled = table.n_rows();
    let dropped = table.drop_incomplete();
    if dropped > 0 {
        warn!(split, dropped, sampled, "dropped samples with missing values");
    }
    let used = table.n_rows();
    if used == 0 {
        return Err(Error::EmptyInput(format!("no complete {split} samples")));
    }
    info!(split, used, "sample table ready");
    Ok((table, SplitCounts { sampled, dropped, used }))
}
