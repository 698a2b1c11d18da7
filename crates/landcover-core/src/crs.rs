/// Coordinate reference systems, extents and transverse-Mercator math.
/// All coordinate math uses f64. Projected units are metres, geographic units
/// are degrees with x = longitude and y = latitude.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ── Ellipsoids ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    /// Semi-major axis in metres.
    pub a: f64,
    /// Flattening.
    pub f: f64,
}

impl Ellipsoid {
    pub const WGS84: Ellipsoid = Ellipsoid { a: 6_378_137.0, f: 1.0 / 298.257_223_563 };
    pub const GRS80: Ellipsoid = Ellipsoid { a: 6_378_137.0, f: 1.0 / 298.257_222_101 };

    /// First eccentricity squared.
    pub fn e2(&self) -> f64 {
        2.0 * self.f - self.f * self.f
    }

    /// Second eccentricity squared.
    pub fn ep2(&self) -> f64 {
        let e2 = self.e2();
        e2 / (1.0 - e2)
    }

    /// Meridional arc from the equator to `lat` (radians). Snyder eq. 3-21.
    fn meridional_arc(&self, lat: f64) -> f64 {
        let e2 = self.e2();
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        self.a
            * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
                - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
                + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
                - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
    }
}

// ── Transverse Mercator (Snyder 1987, USGS Prof. Paper 1395, pp. 61-64) ──────

/// Transverse Mercator with latitude of origin 0°.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransverseMercator {
    pub ellipsoid: Ellipsoid,
    /// Central meridian in degrees.
    pub lon0: f64,
    pub k0: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

impl TransverseMercator {
    /// (lon, lat) degrees → (easting, northing) metres.
    pub fn forward(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let el = &self.ellipsoid;
        let e2 = el.e2();
        let ep2 = el.ep2();
        let lat = lat_deg.to_radians();
        let lon = lon_deg.to_radians();
        let lon0 = self.lon0.to_radians();

        let (sin_lat, cos_lat) = lat.sin_cos();
        let tan_lat = lat.tan();

        let n = el.a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        let t = tan_lat * tan_lat;
        let c = ep2 * cos_lat * cos_lat;
        let a = cos_lat * (lon - lon0);
        let m = el.meridional_arc(lat);

        let a2 = a * a;
        let a4 = a2 * a2;
        let a6 = a4 * a2;

        let easting = self.k0
            * n
            * (a + (1.0 - t + c) * a2 * a / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a4 * a / 120.0)
            + self.false_easting;

        let northing = self.k0
            * (m + n
                * tan_lat
                * (a2 / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a6 / 720.0))
            + self.false_northing;

        (easting, northing)
    }

    /// (easting, northing) metres → (lon, lat) degrees. Snyder eqs. 8-12 … 8-25.
    pub fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let el = &self.ellipsoid;
        let e2 = el.e2();
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        let ep2 = el.ep2();

        let x = easting - self.false_easting;
        let m = (northing - self.false_northing) / self.k0;
        let mu = m / (el.a * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

        let sq = (1.0 - e2).sqrt();
        let e1 = (1.0 - sq) / (1.0 + sq);
        let e1_2 = e1 * e1;
        let e1_3 = e1_2 * e1;
        let e1_4 = e1_3 * e1;

        // Footpoint latitude.
        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1_3 / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1_2 / 16.0 - 55.0 * e1_4 / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1_3 / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1_4 / 512.0) * (8.0 * mu).sin();

        let (sin1, cos1) = phi1.sin_cos();
        let tan1 = phi1.tan();
        let c1 = ep2 * cos1 * cos1;
        let t1 = tan1 * tan1;
        let w = 1.0 - e2 * sin1 * sin1;
        let n1 = el.a / w.sqrt();
        let r1 = el.a * (1.0 - e2) / w.powf(1.5);
        let d = x / (n1 * self.k0);

        let d2 = d * d;
        let d3 = d2 * d;
        let d4 = d2 * d2;
        let d5 = d4 * d;
        let d6 = d4 * d2;

        let lat = phi1
            - (n1 * tan1 / r1)
                * (d2 / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d4 / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                        * d6
                        / 720.0);

        let lon = self.lon0.to_radians()
            + (d - (1.0 + 2.0 * t1 + c1) * d3 / 6.0
                + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d5
                    / 120.0)
                / cos1;

        (lon.to_degrees(), lat.to_degrees())
    }
}

// ── CRS ──────────────────────────────────────────────────────────────────────

/// The coordinate reference systems the pipeline can reconcile.
///
/// WGS84 and ETRS89 are treated as the same datum; the offset between them is
/// well below the 30 m imagery pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Crs {
    /// Geographic lon/lat on WGS84 (EPSG:4326, also accepts EPSG:4258).
    Geographic,
    /// UTM on WGS84 (EPSG:326xx north, 327xx south).
    Utm { zone: u8, north: bool },
    /// Slovenia D96/TM national grid (EPSG:3794).
    D96Tm,
}

/// National grid of the label rasters and submission coordinates.
pub const NATIONAL_GRID: Crs = Crs::D96Tm;
/// UTM zone of the imagery.
pub const IMAGERY_UTM: Crs = Crs::Utm { zone: 33, north: true };

impl Crs {
    pub fn from_epsg(epsg: u32) -> Result<Self> {
        match epsg {
            4326 | 4258 => Ok(Crs::Geographic),
            3794 => Ok(Crs::D96Tm),
            32601..=32660 => Ok(Crs::Utm { zone: (epsg - 32600) as u8, north: true }),
            32701..=32760 => Ok(Crs::Utm { zone: (epsg - 32700) as u8, north: false }),
            other => Err(Error::UnsupportedCrs(other)),
        }
    }

    pub fn epsg(self) -> u32 {
        match self {
            Crs::Geographic => 4326,
            Crs::D96Tm => 3794,
            Crs::Utm { zone, north: true } => 32600 + zone as u32,
            Crs::Utm { zone, north: false } => 32700 + zone as u32,
        }
    }

    pub fn is_geographic(self) -> bool {
        matches!(self, Crs::Geographic)
    }

    fn projection(self) -> Option<TransverseMercator> {
        match self {
            Crs::Geographic => None,
            Crs::D96Tm => Some(TransverseMercator {
                ellipsoid: Ellipsoid::GRS80,
                lon0: 15.0,
                k0: 0.9999,
                false_easting: 500_000.0,
                false_northing: -5_000_000.0,
            }),
            Crs::Utm { zone, north } => Some(TransverseMercator {
                ellipsoid: Ellipsoid::WGS84,
                lon0: (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0,
                k0: 0.9996,
                false_easting: 500_000.0,
                false_northing: if north { 0.0 } else { 10_000_000.0 },
            }),
        }
    }

    /// Native coordinates → (lon, lat) degrees.
    pub fn to_geographic(self, x: f64, y: f64) -> (f64, f64) {
        match self.projection() {
            Some(tm) => tm.inverse(x, y),
            None => (x, y),
        }
    }

    /// (lon, lat) degrees → native coordinates.
    pub fn from_geographic(self, lon: f64, lat: f64) -> (f64, f64) {
        match self.projection() {
            Some(tm) => tm.forward(lon, lat),
            None => (lon, lat),
        }
    }

    /// Transform one coordinate pair from `self` into `target`.
    pub fn transform(self, target: Crs, x: f64, y: f64) -> (f64, f64) {
        if self == target {
            return (x, y);
        }
        let (lon, lat) = self.to_geographic(x, y);
        target.from_geographic(lon, lat)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl TryFrom<u32> for Crs {
    type Error = Error;

    fn try_from(epsg: u32) -> Result<Self> {
        Crs::from_epsg(epsg)
    }
}

impl From<Crs> for u32 {
    fn from(crs: Crs) -> u32 {
        crs.epsg()
    }
}

// ── Extent ───────────────────────────────────────────────────────────────────

/// Axis-aligned bounding box in the units of some CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn intersects(&self, other: &Extent) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// Envelope of this extent after transforming it from `from` to `to`.
    /// Edges are densified because projected edges are curved.
    pub fn transform(&self, from: Crs, to: Crs) -> Extent {
        if from == to {
            return *self;
        }
        const STEPS: usize = 16;
        let mut out = Extent::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for i in 0..=STEPS {
            let t = i as f64 / STEPS as f64;
            let x = self.min_x + t * self.width();
            let y = self.min_y + t * self.height();
            for (px, py) in [(x, self.min_y), (x, self.max_y), (self.min_x, y), (self.max_x, y)] {
                let (tx, ty) = from.transform(to, px, py);
                out.min_x = out.min_x.min(tx);
                out.min_y = out.min_y.min(ty);
                out.max_x = out.max_x.max(tx);
                out.max_y = out.max_y.max(ty);
            }
        }
        out
    }
}

// ── Common reference frame ───────────────────────────────────────────────────

/// A spatial entity that carries a CRS and can be re-expressed in another one.
pub trait Reproject: Sized {
    /// The entity's CRS, `None` when it is not georeferenced.
    fn crs(&self) -> Option<Crs>;

    /// Re-express the entity in `target`. Fails when `crs()` is `None`.
    fn to_crs(&self, target: Crs) -> Result<Self>;

    /// Human-readable name for error messages.
    fn describe(&self) -> String;
}

/// Bring `entity` into `reference`: borrowed as-is when the CRS already
/// matches, reprojected otherwise.
pub fn align_to<T: Reproject + Clone>(entity: &T, reference: Crs) -> Result<std::borrow::Cow<'_, T>> {
    let crs = entity.crs().ok_or_else(|| Error::MissingCrs(entity.describe()))?;
    if crs == reference {
        Ok(std::borrow::Cow::Borrowed(entity))
    } else {
        tracing::debug!(from = %crs, to = %reference, entity = %entity.describe(), "reprojecting");
        Ok(std::borrow::Cow::Owned(entity.to_crs(reference)?))
    }
}

/// Error unless both CRSs are present and equal.
pub fn require_same_crs(left: Option<Crs>, right: Option<Crs>) -> Result<Crs> {
    match (left, right) {
        (Some(l), Some(r)) if l == r => Ok(l),
        (l, r) => Err(Error::CrsMismatch {
            left: l.map_or_else(|| "none".to_string(), |c| c.to_string()),
            right: r.map_or_else(|| "none".to_string(), |c| c.to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    // pyproj: Transformer.from_crs(4326, 32630, always_xy=True)
    //   .transform(-3.7037, 40.4168) → (440298.94, 4474257.31)
    #[test]
    fn utm_forward_matches_reference() {
        let (e, n) = Crs::Utm { zone: 30, north: true }.from_geographic(-3.7037, 40.4168);
        assert_abs_diff_eq!(e, 440_298.94, epsilon = 1.0);
        assert_abs_diff_eq!(n, 4_474_257.31, epsilon = 1.0);
    }

    #[test]
    fn utm_south_applies_false_northing() {
        let (e, n) = Crs::Utm { zone: 21, north: false }.from_geographic(-58.3816, -34.6037);
        assert_abs_diff_eq!(e, 373_317.50, epsilon = 1.0);
        assert_abs_diff_eq!(n, 6_170_036.17, epsilon = 1.0);
    }

    #[test]
    fn d96_central_meridian_has_false_easting() {
        let (e, n) = Crs::D96Tm.from_geographic(15.0, 46.0);
        assert_abs_diff_eq!(e, 500_000.0, epsilon = 1e-6);
        // Slovenia's northings fall roughly between 30 km and 200 km.
        assert!(n > 30_000.0 && n < 200_000.0, "northing {n}");
    }

    #[test]
    fn inverse_undoes_forward() {
        for crs in [Crs::D96Tm, IMAGERY_UTM, Crs::Utm { zone: 21, north: false }] {
            let tm = crs.projection().unwrap();
            let lon = tm.lon0 + 1.3;
            let lat = if matches!(crs, Crs::Utm { north: false, .. }) { -34.6 } else { 46.1 };
            let (x, y) = tm.forward(lon, lat);
            let (lon2, lat2) = tm.inverse(x, y);
            assert_abs_diff_eq!(lon2, lon, epsilon = 1e-8);
            assert_abs_diff_eq!(lat2, lat, epsilon = 1e-8);
        }
    }

    #[test]
    fn national_grid_to_utm_and_back() {
        // Points spread over Slovenia in D96/TM.
        let pts = [(374_000.0, 31_000.0), (461_500.0, 101_200.0), (620_000.0, 170_000.0)];
        for (x, y) in pts {
            let (u, v) = NATIONAL_GRID.transform(IMAGERY_UTM, x, y);
            // Both grids share the 15°E meridian, so the offsets are modest.
            assert!((u - x).abs() < 1_000.0);
            assert!((v - y - 5_000_000.0).abs() < 5_000.0);
            let (x2, y2) = IMAGERY_UTM.transform(NATIONAL_GRID, u, v);
            assert_abs_diff_eq!(x2, x, epsilon = 1e-3);
            assert_abs_diff_eq!(y2, y, epsilon = 1e-3);
        }
    }

    #[test]
    fn epsg_codes_round_trip() {
        for code in [4326, 3794, 32633, 32721] {
            assert_eq!(Crs::from_epsg(code).unwrap().epsg(), code);
        }
        assert_eq!(Crs::from_epsg(4258).unwrap(), Crs::Geographic);
        assert!(matches!(Crs::from_epsg(3912), Err(Error::UnsupportedCrs(3912))));
        assert!(Crs::from_epsg(32600).is_err());
    }

    #[test]
    fn crs_serializes_as_epsg_number() {
        let json = serde_json::to_string(&IMAGERY_UTM).unwrap();
        assert_eq!(json, "32633");
        let back: Crs = serde_json::from_str("3794").unwrap();
        assert_eq!(back, Crs::D96Tm);
    }

    #[test]
    fn extent_transform_contains_corners() {
        let ext = Extent::new(450_000.0, 90_000.0, 480_000.0, 120_000.0);
        let out = ext.transform(NATIONAL_GRID, IMAGERY_UTM);
        for (x, y) in [(ext.min_x, ext.min_y), (ext.max_x, ext.max_y)] {
            let (u, v) = NATIONAL_GRID.transform(IMAGERY_UTM, x, y);
            assert!(u >= out.min_x && u <= out.max_x);
            assert!(v >= out.min_y && v <= out.max_y);
        }
    }

    #[test]
    fn same_crs_required() {
        assert!(require_same_crs(Some(Crs::D96Tm), Some(Crs::D96Tm)).is_ok());
        assert!(matches!(
            require_same_crs(Some(Crs::D96Tm), Some(IMAGERY_UTM)),
            Err(Error::CrsMismatch { .. })
        ));
        assert!(require_same_crs(None, Some(IMAGERY_UTM)).is_err());
    }
}
