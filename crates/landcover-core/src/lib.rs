//! Land-cover classification from multiband satellite imagery.
//!
//! Bands are read from GeoTIFFs, rescaled to reflectance, sampled at labelled
//! pixels of reference rasters, and used to train a random forest that
//! classifies the whole scene and a list of submission points.

pub mod config;
pub mod crs;
pub mod error;
pub mod evaluate;
pub mod extract;
pub mod forest;
pub mod geotiff;
pub mod legend;
pub mod pipeline;
pub mod points;
pub mod raster;
pub mod sampler;
pub mod submission;

pub use config::PipelineConfig;
pub use crs::{align_to, Crs, Extent, Reproject, IMAGERY_UTM, NATIONAL_GRID};
pub use error::{Error, Result};
pub use extract::SampleTable;
pub use forest::{ForestParams, RandomForest};
pub use legend::{Category, Legend};
pub use pipeline::{Pipeline, PipelineResult, RunReport};
pub use points::{Coord, PointSet};
pub use raster::{GeoTransform, Raster};
