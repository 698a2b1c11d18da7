/// Point samples: coordinates tagged with a CRS, optionally with category codes.
use serde::{Deserialize, Serialize};

use crate::crs::{Crs, Extent, Reproject};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSet {
    pub crs: Crs,
    pub coords: Vec<Coord>,
    /// One code per point when the set came from a categorical raster.
    pub categories: Option<Vec<Option<u16>>>,
}

impl PointSet {
    pub fn new(crs: Crs, coords: Vec<Coord>) -> Self {
        Self { crs, coords, categories: None }
    }

    pub fn with_categories(crs: Crs, coords: Vec<Coord>, categories: Vec<Option<u16>>) -> Result<Self> {
        if categories.len() != coords.len() {
            return Err(Error::LengthMismatch { left: coords.len(), right: categories.len() });
        }
        Ok(Self { crs, coords, categories: Some(categories) })
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Bounding box of all points, `None` when empty.
    pub fn extent(&self) -> Option<Extent> {
        let first = self.coords.first()?;
        let init = Extent::new(first.x, first.y, first.x, first.y);
        Some(self.coords.iter().fold(init, |e, c| {
            Extent::new(e.min_x.min(c.x), e.min_y.min(c.y), e.max_x.max(c.x), e.max_y.max(c.y))
        }))
    }
}

impl Reproject for PointSet {
    fn crs(&self) -> Option<Crs> {
        Some(self.crs)
    }

    /// Same points, same order, same categories, new coordinates.
    fn to_crs(&self, target: Crs) -> Result<PointSet> {
        let coords = self
            .coords
            .iter()
            .map(|c| {
                let (x, y) = self.crs.transform(target, c.x, c.y);
                Coord::new(x, y)
            })
            .collect();
        Ok(PointSet { crs: target, coords, categories: self.categories.clone() })
    }

    fn describe(&self) -> String {
        format!("{} points in {}", self.len(), self.crs)
    }
}
