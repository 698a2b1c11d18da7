//! Submission file: read the coordinates to classify, look them up in the
//! prediction raster, write them back in their original order and frame.
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::crs::{align_to, NATIONAL_GRID};
use crate::error::{Error, Result};
use crate::extract::extract_categories;
use crate::legend::Legend;
use crate::points::{Coord, PointSet};
use crate::raster::Raster;

#[derive(Debug, Deserialize)]
struct InputRecord {
    #[serde(rename = "X")]
    x: f64,
    #[serde(rename = "Y")]
    y: f64,
}

/// One output row: the coordinates as read, and the predicted code when the
/// point fell on a classified pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRow {
    pub x: f64,
    pub y: f64,
    pub category: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct SubmissionOptions {
    pub delimiter: u8,
    /// Written in place of a category for points without a prediction.
    pub missing_marker: String,
    /// Write legend names instead of numeric codes.
    pub write_names: bool,
    pub legend: Legend,
}

impl Default for SubmissionOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            missing_marker: "NA".into(),
            write_names: false,
            legend: Legend::landcover(),
        }
    }
}

/// Read `X,Y[,category]` rows in national-grid coordinates. Any existing
/// category values are ignored.
pub fn read_submission(path: &Path, delimiter: u8) -> Result<PointSet> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)?;
    let mut coords = Vec::new();
    for record in reader.deserialize::<InputRecord>() {
        let r = record?;
        coords.push(Coord::new(r.x, r.y));
    }
    info!(path = %path.display(), rows = coords.len(), "read submission points");
    Ok(PointSet::new(NATIONAL_GRID, coords))
}

/// Predicted code for every submission point, in input order. Points are
/// reprojected into the prediction's frame for lookup only; rows keep their
/// original coordinates.
pub fn predict_submission(prediction: &Raster, points: &PointSet) -> Result<Vec<SubmissionRow>> {
    let target = prediction
        .crs
        .ok_or_else(|| Error::MissingCrs("prediction raster".into()))?;
    let aligned = align_to(points, target)?;
    let codes = extract_categories(prediction, &aligned)?;
    Ok(points
        .coords
        .iter()
        .zip(codes)
        .map(|(c, category)| SubmissionRow { x: c.x, y: c.y, category })
        .collect())
}

/// Write `X,Y,category` rows. Rows without a prediction carry the missing
/// marker. Returns the number of such rows.
pub fn write_submission(path: &Path, rows: &[SubmissionRow], options: &SubmissionOptions) -> Result<usize> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(options.delimiter)
        .from_path(path)?;
    writer.write_record(["X", "Y", "category"])?;

    let mut missing = 0;
    for row in rows {
        let category = match row.category {
            Some(code) if options.write_names => options.legend.label(code),
            Some(code) => code.to_string(),
            None => {
                missing += 1;
                options.missing_marker.clone()
            }
        };
        writer.write_record([row.x.to_string(), row.y.to_string(), category])?;
    }
    writer.flush()?;

    if missing > 0 {
        warn!(missing, total = rows.len(), marker = %options.missing_marker, "submission points without prediction");
    }
    info!(path = %path.display(), rows = rows.len(), "wrote submission");
    Ok(missing)
}
