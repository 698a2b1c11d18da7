//! Error type shared by every stage of the pipeline.

use thiserror::Error;

/// Errors raised by raster I/O, reprojection, sampling, training and output.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Pixel type the raster store does not convert to `f32`.
    #[error("unsupported sample type in {0}")]
    UnsupportedSampleType(String),

    /// Two rasters (or a raster and a data buffer) disagree on shape.
    #[error("dimension mismatch: expected {expected_width}x{expected_height}, got {width}x{height} ({context})")]
    DimensionMismatch {
        expected_width: usize,
        expected_height: usize,
        width: usize,
        height: usize,
        context: String,
    },

    #[error("{0} has no coordinate reference system")]
    MissingCrs(String),

    #[error("unsupported coordinate reference system EPSG:{0}")]
    UnsupportedCrs(u32),

    #[error("CRS mismatch: {left} vs {right}")]
    CrsMismatch { left: String, right: String },

    /// Feature columns differ between the fitted model and the input table.
    #[error("schema mismatch: model expects [{expected}], table has [{actual}]")]
    SchemaMismatch { expected: String, actual: String },

    #[error("missing values: {0}")]
    MissingValues(String),

    #[error("empty input: {0}")]
    EmptyInput(String),

    #[error("length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
