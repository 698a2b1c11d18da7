//! End-to-end run over a synthetic scene: three UTM imagery bands, national-grid
//! label rasters split at the 15°E meridian (forest west, agriculture east),
//! and a submission list with one point outside the scene.
use std::fs;
use std::path::Path;

use landcover_core::geotiff::write_geotiff;
use landcover_core::pipeline::{MODEL_FILE, PREDICTION_FILE, REPORT_FILE};
use landcover_core::{
    GeoTransform, Legend, Pipeline, PipelineConfig, Raster, RunReport, IMAGERY_UTM, NATIONAL_GRID,
};

const FOREST: u16 = 3;
const AGRICULTURE: u16 = 2;
/// National-grid easting of 15°E; also the UTM 33N false easting.
const MERIDIAN: f64 = 500_000.0;
const CENTRE_N: f64 = 100_000.0;

fn class_at(x: f64) -> u16 {
    if x < MERIDIAN {
        FOREST
    } else {
        AGRICULTURE
    }
}

/// 60×60 px at 30 m around the scene centre; raw DNs, pixel (0,0) no-data.
fn write_imagery(dir: &Path) {
    let (_, uy) = NATIONAL_GRID.transform(IMAGERY_UTM, MERIDIAN, CENTRE_N);
    let t = GeoTransform::new(MERIDIAN - 900.0, uy + 900.0, 30.0, -30.0);
    let bands: [(&str, f32, f32); 3] = [("B2", 8_000.0, 9_000.0), ("B3", 8_500.0, 10_000.0), ("B4", 7_000.0, 12_000.0)];
    for (name, forest, agriculture) in bands {
        let mut data = Vec::with_capacity(3600);
        for r in 0..60 {
            for c in 0..60 {
                let (x, _) = t.pixel_center(r, c);
                let base = if class_at(x) == FOREST { forest } else { agriculture };
                data.push(base + ((r * 7 + c * 13) % 50) as f32);
            }
        }
        data[0] = 0.0;
        let raster = Raster::from_band(name, data, 60, 60, t, Some(IMAGERY_UTM)).unwrap();
        write_geotiff(&raster, &dir.join(format!("LC09_L2SP_190028_SR_{name}.TIF"))).unwrap();
    }
    // Panchromatic band and non-band files are ignored.
    let pan = Raster::from_band("B8", vec![1.0; 4], 2, 2, t, Some(IMAGERY_UTM)).unwrap();
    write_geotiff(&pan, &dir.join("LC09_L2SP_190028_SR_B8.TIF")).unwrap();
    fs::write(dir.join("LC09_L2SP_190028_MTL.txt"), "metadata").unwrap();
}

/// Square label raster of `half` metres around the centre, 30 m cells.
fn write_labels(path: &Path, half: f64) {
    let n = (2.0 * half / 30.0) as usize;
    let t = GeoTransform::new(MERIDIAN - half, CENTRE_N + half, 30.0, -30.0);
    let mut data = Vec::with_capacity(n * n);
    for r in 0..n {
        for c in 0..n {
            let (x, _) = t.pixel_center(r, c);
            data.push(class_at(x) as f32);
        }
    }
    // A no-data row along the top edge.
    data[..n].iter_mut().for_each(|v| *v = f32::NAN);
    let raster = Raster::from_band("category", data, n, n, t, Some(NATIONAL_GRID))
        .unwrap()
        .with_legend(Legend::landcover());
    write_geotiff(&raster, path).unwrap();
}

fn scene(root: &Path) -> PipelineConfig {
    let imagery = root.join("scene");
    fs::create_dir_all(&imagery).unwrap();
    write_imagery(&imagery);
    write_labels(&root.join("train.tif"), 750.0);
    write_labels(&root.join("validation.tif"), 450.0);
    fs::write(
        root.join("points.csv"),
        "X,Y,category\n500100,100100,\n600000,200000,\n499800,99900,\n",
    )
    .unwrap();

    let mut config = PipelineConfig::default();
    config.inputs.imagery_dir = Some(imagery);
    config.inputs.train_labels = root.join("train.tif");
    config.inputs.validation_labels = root.join("validation.tif");
    config.inputs.submission = root.join("points.csv");
    config.sampling.size = 400;
    config.forest.n_trees = 25;
    config.forest.workers = 2;
    config.output.dir = root.join("out");
    config.output.save_model = true;
    config
}

#[test]
fn full_run_writes_ordered_submission_and_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let config = scene(dir.path());
    let result = Pipeline::new().run(&config).unwrap();
    let report = &result.report;

    assert_eq!(report.bands, vec!["B2", "B3", "B4"]);
    assert_eq!(report.imagery_crs, IMAGERY_UTM);
    assert_eq!(report.train.sampled, 400);
    assert_eq!(report.train.used + report.train.dropped, 400);
    assert_eq!(report.classes, vec![AGRICULTURE, FOREST]);
    assert_eq!(report.n_trees, 25);
    assert_eq!(report.forest, config.forest);
    assert!(report.unseen_validation_classes.is_empty());
    assert!(report.evaluation.accuracy > 0.95, "accuracy {}", report.evaluation.accuracy);
    assert!(report.evaluation.kappa > 0.9, "kappa {}", report.evaluation.kappa);
    assert_eq!(report.feature_importance.len(), 3);

    // Prediction covers the validation area, not the whole scene.
    let (w, h) = report.prediction_size;
    assert!(w < 60 && h < 60 && w >= 30 && h >= 30, "{w}x{h}");
    assert_eq!(result.prediction.crs, Some(IMAGERY_UTM));

    assert_eq!(report.submission_rows, 3);
    assert_eq!(report.submission_missing, 1);
    let text = fs::read_to_string(&report.outputs.submission).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec!["X,Y,category", "500100,100100,2", "600000,200000,NA", "499800,99900,3"]
    );

    let out = &config.output.dir;
    assert!(out.join(PREDICTION_FILE).exists());
    assert!(out.join(format!("{PREDICTION_FILE}.legend.json")).exists());
    assert!(out.join(MODEL_FILE).exists());
    let saved: RunReport = serde_json::from_str(&fs::read_to_string(out.join(REPORT_FILE)).unwrap()).unwrap();
    assert_eq!(saved.evaluation, report.evaluation);
}

#[test]
fn same_seed_reproduces_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = scene(dir.path());
    let first = Pipeline::new().run(&config).unwrap().report;

    config.output.dir = dir.path().join("out-again");
    config.forest.workers = 1;
    let second = Pipeline::new().run(&config).unwrap().report;

    assert_eq!(first.train, second.train);
    assert_eq!(first.evaluation, second.evaluation);
    assert_eq!(first.feature_importance, second.feature_importance);
    assert_eq!(
        fs::read_to_string(&first.outputs.submission).unwrap(),
        fs::read_to_string(&second.outputs.submission).unwrap()
    );
}

#[test]
fn missing_inputs_fail_before_any_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = scene(dir.path());
    config.inputs.train_labels = dir.path().join("absent.tif");
    assert!(Pipeline::new().run(&config).is_err());
    assert!(!config.output.dir.join(REPORT_FILE).exists());
}
