//! GeoTIFF input/output on top of the pure-Rust `tiff` crate.
//!
//! Reads single-band GeoTIFFs (one file per spectral band), stacks them into a
//! multiband [`Raster`], and writes single-band categorical rasters back out.
//! Georeferencing comes from the ModelPixelScale/ModelTiepoint tags and the
//! EPSG code from the GeoKeyDirectory. Band directories and packaged scene
//! archives (`.tar`, `.tar.gz`) are both supported.
use std::fs;
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;
use tracing::{debug, info, warn};

use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::legend::Legend;
use crate::raster::{GeoTransform, Raster};

// ── GeoTIFF tag and key ids ──────────────────────────────────────────────────

const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const KEY_MODEL_TYPE: u16 = 1024;
const KEY_RASTER_TYPE: u16 = 1025;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_CS_TYPE: u16 = 3072;
/// GeoKey value meaning "user-defined", i.e. no EPSG code.
const KEY_USER_DEFINED: u16 = 32767;

fn tag(id: u16) -> Tag {
    Tag::from_u16_exhaustive(id)
}

// ── Band selection ───────────────────────────────────────────────────────────

/// Which files of a scene are spectral bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandFilter {
    /// File extension, compared case-insensitively (e.g. "tif").
    pub extension: String,
    /// Substring a file name must contain (e.g. "_SR_B"), if any.
    pub contains: Option<String>,
    /// Band names to skip (e.g. the panchromatic "B8").
    pub exclude: Vec<String>,
}

impl Default for BandFilter {
    fn default() -> Self {
        Self {
            extension: "tif".into(),
            contains: None,
            exclude: vec!["B8".into()],
        }
    }
}

impl BandFilter {
    /// Band name for an accepted file name, `None` if the file is not a band.
    pub fn band_name(&self, file_name: &str) -> Option<String> {
        let (stem, ext) = file_name.rsplit_once('.')?;
        if !ext.eq_ignore_ascii_case(&self.extension) {
            return None;
        }
        if let Some(needle) = &self.contains {
            if !file_name.contains(needle.as_str()) {
                return None;
            }
        }
        let name = band_name_from_stem(stem);
        if self.exclude.iter().any(|e| e.eq_ignore_ascii_case(&name)) {
            return None;
        }
        Some(name)
    }
}

/// `LC09_..._SR_B4` → `B4`. Stems without a trailing `_B<n>` token are kept whole.
fn band_name_from_stem(stem: &str) -> String {
    match stem.rsplit_once('_') {
        Some((_, last)) if band_number(last).is_some() => last.to_string(),
        _ => stem.to_string(),
    }
}

/// `B4` → 4, `b10` → 10.
fn band_number(name: &str) -> Option<u32> {
    let rest = name.strip_prefix('B').or_else(|| name.strip_prefix('b'))?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Numeric band order first (B2 before B10), then name.
fn band_order(a: &str, b: &str) -> std::cmp::Ordering {
    match (band_number(a), band_number(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// List band files of `dir` accepted by `filter`, in band order.
pub fn list_band_files(dir: &Path, filter: &BandFilter) -> Result<Vec<(String, PathBuf)>> {
    let mut bands = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(fname) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(name) = filter.band_name(fname) {
            bands.push((name, path));
        }
    }
    bands.sort_by(|a, b| band_order(&a.0, &b.0));
    Ok(bands)
}

// ── Reading ──────────────────────────────────────────────────────────────────

/// Read a single-band GeoTIFF. `nodata` overrides the file's GDAL_NODATA tag;
/// cells equal to the sentinel become `NaN`.
pub fn read_geotiff(path: &Path, name: &str, nodata: Option<f32>) -> Result<Raster> {
    let file = fs::File::open(path)?;
    decode_geotiff(io::BufReader::new(file), name, nodata)
        .map_err(|e| annotate(e, &path.display().to_string()))
}

/// Read a categorical raster. The legend comes from a `.legend.json` sidecar
/// when present, otherwise from `fallback`.
pub fn read_categorical(path: &Path, nodata: Option<f32>, fallback: &Legend) -> Result<Raster> {
    let raster = read_geotiff(path, "category", nodata)?;
    let legend = match read_legend_sidecar(path)? {
        Some(l) => l,
        None => fallback.clone(),
    };
    Ok(raster.with_legend(legend))
}

/// Decode a single-band GeoTIFF from any `Read + Seek` source.
pub fn decode_geotiff<R: Read + Seek>(reader: R, name: &str, nodata: Option<f32>) -> Result<Raster> {
    let mut decoder = Decoder::new(reader)?;
    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);

    let transform = read_transform(&mut decoder).unwrap_or_else(|| {
        warn!(band = name, "no georeferencing tags, using pixel coordinates");
        GeoTransform::new(0.0, height as f64, 1.0, -1.0)
    });
    let crs = read_epsg(&mut decoder).and_then(|epsg| match Crs::from_epsg(epsg) {
        Ok(crs) => Some(crs),
        Err(e) => {
            warn!(band = name, error = %e, "ignoring CRS");
            None
        }
    });
    let file_nodata = decoder
        .get_tag_ascii_string(tag(TAG_GDAL_NODATA))
        .ok()
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f32>().ok());
    let sentinel = nodata.or(file_nodata);

    let mut data = to_f32(decoder.read_image()?).ok_or_else(|| Error::UnsupportedSampleType(name.to_string()))?;
    if data.len() != width * height {
        return Err(Error::DimensionMismatch {
            expected_width: width,
            expected_height: height,
            width: data.len() / height.max(1),
            height,
            context: format!("{name}: multi-sample TIFFs are not supported"),
        });
    }
    if let Some(s) = sentinel.filter(|s| !s.is_nan()) {
        for v in &mut data {
            if *v == s {
                *v = f32::NAN;
            }
        }
    }
    debug!(band = name, width, height, ?crs, ?sentinel, "decoded GeoTIFF");
    Raster::from_band(name, data, width, height, transform, crs)
}

fn to_f32(img: DecodingResult) -> Option<Vec<f32>> {
    let v = match img {
        DecodingResult::U8(b) => b.into_iter().map(f32::from).collect(),
        DecodingResult::U16(b) => b.into_iter().map(f32::from).collect(),
        DecodingResult::U32(b) => b.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(b) => b.into_iter().map(f32::from).collect(),
        DecodingResult::I16(b) => b.into_iter().map(f32::from).collect(),
        DecodingResult::I32(b) => b.into_iter().map(|v| v as f32).collect(),
        DecodingResult::F32(b) => b,
        DecodingResult::F64(b) => b.into_iter().map(|v| v as f32).collect(),
        _ => return None,
    };
    Some(v)
}

/// Geotransform from ModelPixelScale + ModelTiepoint.
fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(tag(TAG_MODEL_PIXEL_SCALE)).ok()?;
    let tie = decoder.get_tag_f64_vec(tag(TAG_MODEL_TIEPOINT)).ok()?;
    if scale.len() < 2 || tie.len() < 6 {
        return None;
    }
    // tiepoint: [I, J, K, X, Y, Z] maps raster (I, J) to model (X, Y).
    let origin_x = tie[3] - tie[0] * scale[0];
    let origin_y = tie[4] + tie[1] * scale[1];
    Some(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]))
}

/// EPSG code from the GeoKeyDirectory (projected first, then geographic).
fn read_epsg<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<u32> {
    let keys = decoder.get_tag_u16_vec(tag(TAG_GEO_KEY_DIRECTORY)).ok()?;
    geokey_epsg(&keys)
}

fn geokey_epsg(keys: &[u16]) -> Option<u32> {
    if keys.len() < 4 {
        return None;
    }
    let n = keys[3] as usize;
    let lookup = |id: u16| {
        keys[4..]
            .chunks_exact(4)
            .take(n)
            // location 0: value stored inline
            .find(|k| k[0] == id && k[1] == 0)
            .map(|k| k[3])
            .filter(|&v| v != 0 && v != KEY_USER_DEFINED)
    };
    lookup(KEY_PROJECTED_CS_TYPE)
        .or_else(|| lookup(KEY_GEOGRAPHIC_TYPE))
        .map(u32::from)
}

/// Read the listed band files and stack them in order.
pub fn load_band_stack(bands: &[(String, PathBuf)], nodata: Option<f32>) -> Result<Raster> {
    let mut rasters = Vec::with_capacity(bands.len());
    for (name, path) in bands {
        info!(band = %name, path = %path.display(), "loading band");
        rasters.push(read_geotiff(path, name, nodata)?);
    }
    check_aligned(&rasters)?;
    Raster::stack(rasters)
}

/// Load every band of a `.tar` / `.tar.gz` scene archive accepted by `filter`.
pub fn load_band_stack_from_archive(
    archive_path: &Path,
    filter: &BandFilter,
    nodata: Option<f32>,
) -> Result<Raster> {
    let file = fs::File::open(archive_path)?;
    let name = archive_path.to_string_lossy().to_ascii_lowercase();
    let reader: Box<dyn Read> = if name.ends_with(".gz") || name.ends_with(".tgz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut archive = tar::Archive::new(reader);

    let mut rasters = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let Some(fname) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(band) = filter.band_name(fname) else {
            continue;
        };
        // tar entries don't implement Seek; the decoder needs Read + Seek.
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        info!(band = %band, entry = fname, "loading band from archive");
        let raster = decode_geotiff(io::Cursor::new(buf), &band, nodata)
            .map_err(|e| annotate(e, fname))?;
        rasters.push(raster);
    }
    if rasters.is_empty() {
        return Err(Error::EmptyInput(format!(
            "no band files in {}",
            archive_path.display()
        )));
    }
    rasters.sort_by(|a, b| band_order(&a.band_names[0], &b.band_names[0]));
    check_aligned(&rasters)?;
    Raster::stack(rasters)
}

/// All bands must share a CRS; dimensions are checked by `Raster::stack`.
fn check_aligned(rasters: &[Raster]) -> Result<()> {
    let Some(first) = rasters.first() else {
        return Ok(());
    };
    for r in &rasters[1..] {
        if r.crs != first.crs {
            return Err(Error::CrsMismatch {
                left: format!("{} {:?}", first.band_names.join(","), first.crs),
                right: format!("{} {:?}", r.band_names.join(","), r.crs),
            });
        }
    }
    Ok(())
}

fn annotate(err: Error, what: &str) -> Error {
    match err {
        Error::Io(e) => Error::Io(io::Error::new(e.kind(), format!("{what}: {e}"))),
        Error::Tiff(e) => Error::Io(io::Error::new(io::ErrorKind::InvalidData, format!("{what}: {e}"))),
        other => other,
    }
}

// ── Writing ──────────────────────────────────────────────────────────────────

/// Path of the legend sidecar for a raster file.
pub fn legend_sidecar(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".legend.json");
    PathBuf::from(s)
}

fn read_legend_sidecar(path: &Path) -> Result<Option<Legend>> {
    let sidecar = legend_sidecar(path);
    if !sidecar.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(&sidecar)?;
    Ok(Some(serde_json::from_str(&text)?))
}

/// Write band 0 of `raster` as a 32-bit float GeoTIFF with georeferencing,
/// EPSG GeoKeys and a `nan` GDAL_NODATA tag. A legend, if any, is written to
/// the `.legend.json` sidecar.
pub fn write_geotiff(raster: &Raster, path: &Path) -> Result<()> {
    let file = io::BufWriter::new(fs::File::create(path)?);
    encode_geotiff(raster, file)?;
    if let Some(legend) = &raster.legend {
        fs::write(legend_sidecar(path), serde_json::to_string_pretty(legend)?)?;
    }
    Ok(())
}

fn encode_geotiff<W: io::Write + Seek>(raster: &Raster, writer: W) -> Result<()> {
    let mut encoder = TiffEncoder::new(writer)?;
    let mut image = encoder.new_image::<Gray32Float>(raster.width as u32, raster.height as u32)?;

    let t = &raster.transform;
    let scale = [t.pixel_width, t.pixel_height.abs(), 0.0];
    image.encoder().write_tag(tag(TAG_MODEL_PIXEL_SCALE), &scale[..])?;
    let tiepoint = [0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0];
    image.encoder().write_tag(tag(TAG_MODEL_TIEPOINT), &tiepoint[..])?;

    let mut keys: Vec<u16> = vec![1, 1, 0, 2];
    let model_type = match raster.crs {
        Some(crs) if crs.is_geographic() => 2,
        _ => 1,
    };
    keys.extend_from_slice(&[KEY_MODEL_TYPE, 0, 1, model_type]);
    keys.extend_from_slice(&[KEY_RASTER_TYPE, 0, 1, 1]);
    if let Some(crs) = raster.crs {
        let key = if crs.is_geographic() { KEY_GEOGRAPHIC_TYPE } else { KEY_PROJECTED_CS_TYPE };
        keys.extend_from_slice(&[key, 0, 1, crs.epsg() as u16]);
        keys[3] = 3;
    }
    image.encoder().write_tag(tag(TAG_GEO_KEY_DIRECTORY), &keys[..])?;
    image.encoder().write_tag(tag(TAG_GDAL_NODATA), "nan")?;

    image.write_data(raster.band(0))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::IMAGERY_UTM;

    fn categorical() -> Raster {
        let t = GeoTransform::new(500_000.0, 5_100_000.0, 30.0, -30.0);
        let data = vec![1.0, 2.0, f32::NAN, 4.0, 5.0, 3.0];
        Raster::from_band("category", data, 3, 2, t, Some(IMAGERY_UTM))
            .unwrap()
            .with_legend(Legend::landcover())
    }

    #[test]
    fn write_then_read_keeps_georeferencing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pred.tif");
        write_geotiff(&categorical(), &path).unwrap();

        let back = read_categorical(&path, None, &Legend::new(vec![])).unwrap();
        assert_eq!((back.width, back.height), (3, 2));
        assert_eq!(back.transform, categorical().transform);
        assert_eq!(back.crs, Some(IMAGERY_UTM));
        assert_eq!(back.legend, Some(Legend::landcover()));
        assert!(back.get(0, 0, 2).is_nan());
        assert_eq!(back.get(0, 1, 0), 4.0);
    }

    #[test]
    fn nodata_sentinel_becomes_nan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("band.tif");
        let t = GeoTransform::new(0.0, 2.0, 1.0, -1.0);
        let r = Raster::from_band("B1", vec![0.0, 7.0, 0.0, 9.0], 2, 2, t, None).unwrap();
        write_geotiff(&r, &path).unwrap();

        let back = read_geotiff(&path, "B1", Some(0.0)).unwrap();
        assert_eq!(back.valid_count(0), 2);
        assert!(back.get(0, 0, 0).is_nan());
        assert_eq!(back.get(0, 1, 1), 9.0);
    }

    #[test]
    fn band_filter_picks_spectral_bands() {
        let f = BandFilter { contains: Some("_SR_".into()), ..BandFilter::default() };
        assert_eq!(f.band_name("LC09_L2SP_190028_SR_B4.TIF"), Some("B4".into()));
        assert_eq!(f.band_name("LC09_L2SP_190028_SR_B8.TIF"), None);
        assert_eq!(f.band_name("LC09_L2SP_190028_QA_PIXEL.TIF"), None);
        assert_eq!(f.band_name("LC09_L2SP_190028_SR_B4.xml"), None);
        assert_eq!(BandFilter::default().band_name("red.tif"), Some("red".into()));
    }

    #[test]
    fn listing_orders_bands_numerically() {
        let dir = tempfile::tempdir().unwrap();
        let t = GeoTransform::new(0.0, 1.0, 1.0, -1.0);
        for b in ["B10", "B2", "B1", "B8"] {
            let r = Raster::from_band(b, vec![1.0], 1, 1, t, None).unwrap();
            write_geotiff(&r, &dir.path().join(format!("scene_{b}.tif"))).unwrap();
        }
        let bands = list_band_files(dir.path(), &BandFilter::default()).unwrap();
        let names: Vec<_> = bands.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["B1", "B2", "B10"]);

        let stack = load_band_stack(&bands, None).unwrap();
        assert_eq!(stack.band_names, vec!["B1", "B2", "B10"]);
    }

    #[test]
    fn archive_bands_are_stacked() {
        let dir = tempfile::tempdir().unwrap();
        let t = GeoTransform::new(0.0, 2.0, 1.0, -1.0);
        let tar_path = dir.path().join("scene.tar.gz");
        {
            let gz = flate2::write::GzEncoder::new(
                fs::File::create(&tar_path).unwrap(),
                flate2::Compression::fast(),
            );
            let mut builder = tar::Builder::new(gz);
            for (b, v) in [("B2", 2.0f32), ("B1", 1.0)] {
                let p = dir.path().join(format!("s_SR_{b}.TIF"));
                let r = Raster::from_band(b, vec![v; 4], 2, 2, t, None).unwrap();
                write_geotiff(&r, &p).unwrap();
                builder.append_path_with_name(&p, format!("scene/s_SR_{b}.TIF")).unwrap();
            }
            builder.into_inner().unwrap().finish().unwrap();
        }
        let stack = load_band_stack_from_archive(&tar_path, &BandFilter::default(), None).unwrap();
        assert_eq!(stack.band_names, vec!["B1", "B2"]);
        assert_eq!(stack.pixel(0, 0), vec![1.0, 2.0]);
    }

    #[test]
    fn geokeys_parse_projected_and_geographic() {
        let projected = [1, 1, 0, 2, 1024, 0, 1, 1, 3072, 0, 1, 32633];
        assert_eq!(geokey_epsg(&projected), Some(32633));
        let geographic = [1, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, 4326];
        assert_eq!(geokey_epsg(&geographic), Some(4326));
        let user_defined = [1, 1, 0, 1, 3072, 0, 1, KEY_USER_DEFINED];
        assert_eq!(geokey_epsg(&user_defined), None);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = read_geotiff(Path::new("/nonexistent/band.tif"), "B1", None).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
