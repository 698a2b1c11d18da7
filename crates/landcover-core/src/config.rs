//! Pipeline configuration, loaded from JSON. Every field has a default, so a
//! config file only needs the input paths.
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::forest::ForestParams;
use crate::geotiff::BandFilter;
use crate::legend::Legend;

// ── Sections ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Directory of single-band GeoTIFFs. Exactly one of this and
    /// `imagery_archive` must be set.
    pub imagery_dir: Option<PathBuf>,
    /// `.tar` / `.tar.gz` scene archive.
    pub imagery_archive: Option<PathBuf>,
    pub bands: BandFilter,
    /// Raw digital number marking no-data in the imagery.
    pub imagery_nodata: Option<f32>,
    pub train_labels: PathBuf,
    pub validation_labels: PathBuf,
    /// No-data code of the label rasters; the file's GDAL_NODATA tag otherwise.
    pub label_nodata: Option<f32>,
    pub submission: PathBuf,
    pub delimiter: char,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            imagery_dir: None,
            imagery_archive: None,
            bands: BandFilter::default(),
            imagery_nodata: Some(0.0),
            train_labels: PathBuf::new(),
            validation_labels: PathBuf::new(),
            label_nodata: None,
            submission: PathBuf::new(),
            delimiter: ',',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Points drawn from each of the training and validation rasters.
    pub size: usize,
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self { size: 20_000, seed: 1 }
    }
}

/// Digital number → surface reflectance: `dn * scale + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RescaleConfig {
    pub scale: f32,
    pub offset: f32,
}

impl Default for RescaleConfig {
    fn default() -> Self {
        Self { scale: 2.75e-5, offset: -0.2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Threads for raster-wide prediction.
    pub workers: usize,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self { workers: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub submission_file: String,
    /// Write legend names instead of codes in the submission.
    pub write_names: bool,
    pub missing_marker: String,
    pub save_model: bool,
    pub write_raster: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            submission_file: "submission.csv".into(),
            write_names: false,
            missing_marker: "NA".into(),
            save_model: false,
            write_raster: true,
        }
    }
}

// ── Top level ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub inputs: InputConfig,
    pub sampling: SamplingConfig,
    pub rescale: RescaleConfig,
    pub forest: ForestParams,
    pub prediction: PredictionConfig,
    pub output: OutputConfig,
    /// Legend for label rasters without a sidecar.
    pub legend: Legend,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidConfig(msg.to_string()));
        let i = &self.inputs;
        match (&i.imagery_dir, &i.imagery_archive) {
            (None, None) => return invalid("one of inputs.imagery_dir or inputs.imagery_archive is required"),
            (Some(_), Some(_)) => return invalid("inputs.imagery_dir and inputs.imagery_archive are exclusive"),
            _ => {}
        }
        for (name, path) in [
            ("inputs.train_labels", &i.train_labels),
            ("inputs.validation_labels", &i.validation_labels),
            ("inputs.submission", &i.submission),
        ] {
            if path.as_os_str().is_empty() {
                return Err(Error::InvalidConfig(format!("{name} is required")));
            }
        }
        if !i.delimiter.is_ascii() {
            return invalid("inputs.delimiter must be a single ASCII character");
        }
        if self.sampling.size == 0 {
            return invalid("sampling.size must be positive");
        }
        if self.rescale.scale == 0.0 || !self.rescale.scale.is_finite() || !self.rescale.offset.is_finite() {
            return invalid("rescale.scale must be finite and non-zero");
        }
        if self.legend.is_empty() {
            return invalid("legend has no categories");
        }
        if self.output.submission_file.is_empty() {
            return invalid("output.submission_file is required");
        }
        self.forest.validate()
    }

    pub fn delimiter(&self) -> u8 {
        self.inputs.delimiter as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> PipelineConfig {
        let mut c = PipelineConfig::default();
        c.inputs.imagery_dir = Some("scene".into());
        c.inputs.train_labels = "train.tif".into();
        c.inputs.validation_labels = "validation.tif".into();
        c.inputs.submission = "points.csv".into();
        c
    }

    #[test]
    fn defaults_match_workflow_constants() {
        let c = PipelineConfig::default();
        assert_eq!(c.sampling.size, 20_000);
        assert_eq!(c.sampling.seed, 1);
        assert_eq!(c.rescale.scale, 2.75e-5);
        assert_eq!(c.rescale.offset, -0.2);
        assert_eq!(c.inputs.imagery_nodata, Some(0.0));
        assert_eq!(c.prediction.workers, 1);
        assert_eq!(c.forest.n_trees, 500);
        assert_eq!(c.output.missing_marker, "NA");
        assert_eq!(c.legend, Legend::landcover());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{
            "inputs": { "imagery_archive": "scene.tar.gz", "train_labels": "t.tif",
                        "validation_labels": "v.tif", "submission": "s.csv", "delimiter": ";" },
            "forest": { "n_trees": 50 },
            "sampling": { "seed": 7 }
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, json).unwrap();
        let c = PipelineConfig::load(&path).unwrap();
        assert_eq!(c.forest.n_trees, 50);
        assert_eq!(c.forest.min_node_size, 1);
        assert_eq!(c.sampling.seed, 7);
        assert_eq!(c.sampling.size, 20_000);
        assert_eq!(c.delimiter(), b';');
        assert_eq!(c.inputs.bands, BandFilter::default());
        c.validate().unwrap();
    }

    #[test]
    fn validation_rejects_bad_values() {
        minimal().validate().unwrap();

        let mut c = minimal();
        c.sampling.size = 0;
        assert!(matches!(c.validate(), Err(Error::InvalidConfig(_))));

        let mut c = minimal();
        c.forest.n_trees = 0;
        assert!(c.validate().is_err());

        let mut c = minimal();
        c.rescale.scale = 0.0;
        assert!(c.validate().is_err());

        let mut c = minimal();
        c.legend = Legend::new(vec![]);
        assert!(c.validate().is_err());

        let mut c = minimal();
        c.inputs.imagery_archive = Some("scene.tar".into());
        assert!(c.validate().is_err());

        let mut c = minimal();
        c.inputs.submission = PathBuf::new();
        assert!(c.validate().is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let c = minimal();
        let back: PipelineConfig = serde_json::from_str(&serde_json::to_string(&c).unwrap()).unwrap();
        assert_eq!(back, c);
    }
}
