use serde::{Deserialize, Serialize};

use crate::crs::{Crs, Extent, Reproject};
use crate::error::{Error, Result};
use crate::legend::Legend;

/// North-up affine geotransform. `pixel_height` is negative: row 0 is the
/// northern edge, as stored in GeoTIFF.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X of the upper-left corner.
    pub origin_x: f64,
    /// Y of the upper-left corner.
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self { origin_x, origin_y, pixel_width, pixel_height }
    }

    /// Centre of pixel (row, col).
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Fractional (row, col) of a coordinate.
    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (y - self.origin_y) / self.pixel_height,
            (x - self.origin_x) / self.pixel_width,
        )
    }
}

/// A band-sequential `f32` raster. No-data is `NaN`.
///
/// Continuous imagery uses one band per spectral channel; categorical rasters
/// have a single band of integer codes and carry a [`Legend`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Raster {
    /// Band-sequential values: band `b`, row `r`, col `c` lives at
    /// `b * width * height + r * width + c`.
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
    pub band_names: Vec<String>,
    pub transform: GeoTransform,
    pub crs: Option<Crs>,
    pub legend: Option<Legend>,
}

impl Raster {
    /// Create a raster with every cell of every band set to `fill`.
    pub fn new(
        width: usize,
        height: usize,
        band_names: Vec<String>,
        transform: GeoTransform,
        crs: Option<Crs>,
        fill: f32,
    ) -> Self {
        Self {
            data: vec![fill; width * height * band_names.len()],
            width,
            height,
            band_names,
            transform,
            crs,
            legend: None,
        }
    }

    /// Single-band raster from row-major data.
    pub fn from_band(
        name: impl Into<String>,
        data: Vec<f32>,
        width: usize,
        height: usize,
        transform: GeoTransform,
        crs: Option<Crs>,
    ) -> Result<Self> {
        if data.len() != width * height {
            return Err(Error::DimensionMismatch {
                expected_width: width,
                expected_height: height,
                width: data.len(),
                height: 1,
                context: "band buffer length".into(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            band_names: vec![name.into()],
            transform,
            crs,
            legend: None,
        })
    }

    pub fn with_legend(mut self, legend: Legend) -> Self {
        self.legend = Some(legend);
        self
    }

    #[inline]
    pub fn band_count(&self) -> usize {
        self.band_names.len()
    }

    #[inline]
    fn plane(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn get(&self, band: usize, row: usize, col: usize) -> f32 {
        self.data[band * self.plane() + row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, band: usize, row: usize, col: usize, val: f32) {
        let plane = self.plane();
        self.data[band * plane + row * self.width + col] = val;
    }

    pub fn band(&self, band: usize) -> &[f32] {
        let plane = self.plane();
        &self.data[band * plane..(band + 1) * plane]
    }

    /// All band values of one pixel, in band order.
    pub fn pixel(&self, row: usize, col: usize) -> Vec<f32> {
        (0..self.band_count()).map(|b| self.get(b, row, col)).collect()
    }

    pub fn extent(&self) -> Extent {
        let t = &self.transform;
        let x1 = t.origin_x + self.width as f64 * t.pixel_width;
        let y1 = t.origin_y + self.height as f64 * t.pixel_height;
        Extent::new(t.origin_x.min(x1), t.origin_y.min(y1), t.origin_x.max(x1), t.origin_y.max(y1))
    }

    /// (x, y) pixel size in CRS units.
    pub fn resolution(&self) -> (f64, f64) {
        (self.transform.pixel_width.abs(), self.transform.pixel_height.abs())
    }

    /// (row, col) of the pixel containing (x, y), or `None` outside the grid.
    pub fn pixel_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (fr, fc) = self.transform.to_pixel(x, y);
        if !fr.is_finite() || !fc.is_finite() || fr < 0.0 || fc < 0.0 {
            return None;
        }
        let (row, col) = (fr.floor() as usize, fc.floor() as usize);
        (row < self.height && col < self.width).then_some((row, col))
    }

    /// Value of `band` at (x, y); `NaN` outside the grid or on no-data.
    pub fn value_at(&self, band: usize, x: f64, y: f64) -> f32 {
        self.pixel_at(x, y).map_or(f32::NAN, |(r, c)| self.get(band, r, c))
    }

    /// Category code of band 0 at (x, y).
    pub fn category_at(&self, x: f64, y: f64) -> Option<u16> {
        to_code(self.value_at(0, x, y))
    }

    /// Count of non-`NaN` cells in `band`.
    pub fn valid_count(&self, band: usize) -> usize {
        self.band(band).iter().filter(|v| !v.is_nan()).count()
    }

    /// `value × scale + offset` on every band. No clipping: results outside the
    /// physical range are kept. `NaN` stays `NaN`.
    pub fn rescale(&mut self, scale: f32, offset: f32) {
        for v in &mut self.data {
            *v = *v * scale + offset;
        }
    }

    /// Concatenate single- or multi-band rasters in order. All inputs must
    /// share the first raster's dimensions; metadata comes from the first.
    pub fn stack(rasters: Vec<Raster>) -> Result<Raster> {
        let mut iter = rasters.into_iter();
        let mut out = iter.next().ok_or_else(|| Error::EmptyInput("no bands to stack".into()))?;
        for r in iter {
            if r.width != out.width || r.height != out.height {
                return Err(Error::DimensionMismatch {
                    expected_width: out.width,
                    expected_height: out.height,
                    width: r.width,
                    height: r.height,
                    context: format!("band {}", r.band_names.join(",")),
                });
            }
            out.data.extend_from_slice(&r.data);
            out.band_names.extend(r.band_names);
        }
        Ok(out)
    }

    /// Sub-raster of every pixel whose area intersects `extent`.
    pub fn crop(&self, extent: &Extent) -> Result<Raster> {
        if !self.extent().intersects(extent) {
            return Err(Error::EmptyInput(format!(
                "crop extent {extent:?} does not intersect raster extent {:?}",
                self.extent()
            )));
        }
        let t = &self.transform;
        let (r_a, c_a) = t.to_pixel(extent.min_x, extent.max_y);
        let (r_b, c_b) = t.to_pixel(extent.max_x, extent.min_y);
        let clamp = |v: f64, hi: usize| v.max(0.0).min(hi as f64);
        let row0 = clamp(r_a.min(r_b).floor(), self.height) as usize;
        let row1 = clamp(r_a.max(r_b).ceil(), self.height) as usize;
        let col0 = clamp(c_a.min(c_b).floor(), self.width) as usize;
        let col1 = clamp(c_a.max(c_b).ceil(), self.width) as usize;
        let (w, h) = (col1 - col0, row1 - row0);
        if w == 0 || h == 0 {
            return Err(Error::EmptyInput("crop produced an empty raster".into()));
        }

        let mut data = Vec::with_capacity(w * h * self.band_count());
        for b in 0..self.band_count() {
            let band = self.band(b);
            for r in row0..row1 {
                data.extend_from_slice(&band[r * self.width + col0..r * self.width + col1]);
            }
        }
        Ok(Raster {
            data,
            width: w,
            height: h,
            band_names: self.band_names.clone(),
            transform: GeoTransform::new(
                t.origin_x + col0 as f64 * t.pixel_width,
                t.origin_y + row0 as f64 * t.pixel_height,
                t.pixel_width,
                t.pixel_height,
            ),
            crs: self.crs,
            legend: self.legend.clone(),
        })
    }
}

/// Cell value → category code. `NaN`, negative and out-of-range values have none.
pub fn to_code(v: f32) -> Option<u16> {
    if v.is_finite() && v >= 0.0 && v <= u16::MAX as f32 {
        Some(v.round() as u16)
    } else {
        None
    }
}

impl Reproject for Raster {
    fn crs(&self) -> Option<Crs> {
        self.crs
    }

    /// Nearest-neighbour resampling onto a north-up grid covering the
    /// transformed envelope, keeping the source pixel count.
    fn to_crs(&self, target: Crs) -> Result<Raster> {
        let source = self.crs.ok_or_else(|| Error::MissingCrs(self.describe()))?;
        if source == target {
            return Ok(self.clone());
        }
        let env = self.extent().transform(source, target);
        let transform = GeoTransform::new(
            env.min_x,
            env.max_y,
            env.width() / self.width as f64,
            -env.height() / self.height as f64,
        );
        let mut out = Raster::new(
            self.width,
            self.height,
            self.band_names.clone(),
            transform,
            Some(target),
            f32::NAN,
        );
        out.legend = self.legend.clone();

        for row in 0..out.height {
            for col in 0..out.width {
                let (x, y) = transform.pixel_center(row, col);
                let (sx, sy) = target.transform(source, x, y);
                if let Some((sr, sc)) = self.pixel_at(sx, sy) {
                    for b in 0..self.band_count() {
                        out.set(b, row, col, self.get(b, sr, sc));
                    }
                }
            }
        }
        Ok(out)
    }

    fn describe(&self) -> String {
        format!("raster [{}] {}x{}", self.band_names.join(","), self.width, self.height)
    }
}
