//! Feature/label extraction: raster values at point locations, joined into a
//! flat table with one column per band plus a category column.
use serde::{Deserialize, Serialize};

use crate::crs::require_same_crs;
use crate::error::{Error, Result};
use crate::points::PointSet;
use crate::raster::Raster;

/// Nearest-pixel values of every band at every point, row-major
/// (`points × bands`). Points outside the raster or on no-data give `NaN`.
/// Both inputs must already share a CRS.
pub fn extract(raster: &Raster, points: &PointSet) -> Result<Vec<f32>> {
    require_same_crs(raster.crs, Some(points.crs))?;
    let bands = raster.band_count();
    let mut out = Vec::with_capacity(points.len() * bands);
    for c in &points.coords {
        match raster.pixel_at(c.x, c.y) {
            Some((row, col)) => out.extend((0..bands).map(|b| raster.get(b, row, col))),
            None => out.extend(std::iter::repeat(f32::NAN).take(bands)),
        }
    }
    Ok(out)
}

/// Category code (band 0) at every point; `None` outside or on no-data.
pub fn extract_categories(raster: &Raster, points: &PointSet) -> Result<Vec<Option<u16>>> {
    require_same_crs(raster.crs, Some(points.crs))?;
    Ok(points.coords.iter().map(|c| raster.category_at(c.x, c.y)).collect())
}

/// Tabular sample set: row-major feature matrix with named columns and an
/// optional category per row. Missing features are `NaN`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleTable {
    pub feature_names: Vec<String>,
    pub features: Vec<f32>,
    pub categories: Option<Vec<Option<u16>>>,
}

impl SampleTable {
    /// Table from extracted values, validating the shape.
    pub fn from_extraction(
        feature_names: Vec<String>,
        features: Vec<f32>,
        categories: Option<Vec<Option<u16>>>,
    ) -> Result<Self> {
        let n_features = feature_names.len();
        if n_features == 0 {
            return Err(Error::EmptyInput("table without feature columns".into()));
        }
        if features.len() % n_features != 0 {
            return Err(Error::LengthMismatch { left: features.len(), right: n_features });
        }
        if let Some(c) = &categories {
            if c.len() != features.len() / n_features {
                return Err(Error::LengthMismatch { left: features.len() / n_features, right: c.len() });
            }
        }
        Ok(Self { feature_names, features, categories })
    }

    /// Extract `raster` at `points` and attach the points' categories.
    pub fn from_points(raster: &Raster, points: &PointSet) -> Result<Self> {
        let features = extract(raster, points)?;
        Self::from_extraction(raster.band_names.clone(), features, points.categories.clone())
    }

    pub fn n_rows(&self) -> usize {
        self.features.len() / self.feature_names.len()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn row(&self, i: usize) -> &[f32] {
        let p = self.n_features();
        &self.features[i * p..(i + 1) * p]
    }

    pub fn category(&self, i: usize) -> Option<u16> {
        self.categories.as_ref().and_then(|c| c[i])
    }

    pub fn is_complete(&self, i: usize) -> bool {
        self.row(i).iter().all(|v| !v.is_nan())
            && self.categories.as_ref().map_or(true, |c| c[i].is_some())
    }

    /// Remove rows with a `NaN` feature or (when labelled) a missing category.
    /// Returns the number of rows removed.
    pub fn drop_incomplete(&mut self) -> usize {
        let keep: Vec<usize> = (0..self.n_rows()).filter(|&i| self.is_complete(i)).collect();
        let dropped = self.n_rows() - keep.len();
        if dropped > 0 {
            let mut features = Vec::with_capacity(keep.len() * self.n_features());
            for &i in &keep {
                features.extend_from_slice(self.row(i));
            }
            self.categories = self
                .categories
                .take()
                .map(|c| keep.iter().map(|&i| c[i]).collect());
            self.features = features;
        }
        dropped
    }

    /// The same rows without the category column.
    pub fn without_categories(&self) -> SampleTable {
        SampleTable {
            feature_names: self.feature_names.clone(),
            features: self.features.clone(),
            categories: None,
        }
    }
}
