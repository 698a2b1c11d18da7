//! Random sampling of labelled pixels from a categorical raster.
//!
//! Selection is uniform over valid (non-`NaN`) pixel centres of band 0, without
//! replacement. No stratification: the class mix of the sample follows the
//! class mix of the raster.
use rand::rngs::StdRng;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::points::{Coord, PointSet};
use crate::raster::{to_code, Raster};

/// Draw up to `n` random valid pixels. Returns exactly `min(n, valid)` points,
/// each tagged with its category code. The order is fixed for a given `rng`
/// state, so reseeding reproduces the sample.
pub fn sample_random(raster: &Raster, n: usize, rng: &mut StdRng) -> Result<PointSet> {
    let crs = raster
        .crs
        .ok_or_else(|| Error::MissingCrs("categorical raster to sample".into()))?;

    let valid: Vec<usize> = raster
        .band(0)
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .map(|(i, _)| i)
        .collect();

    let picked: Vec<usize> = if n >= valid.len() {
        if n > valid.len() {
            warn!(requested = n, available = valid.len(), "sample size exceeds valid pixels");
        }
        valid
    } else {
        rand::seq::index::sample(rng, valid.len(), n)
            .into_iter()
            .map(|i| valid[i])
            .collect()
    };

    let band = raster.band(0);
    let mut coords = Vec::with_capacity(picked.len());
    let mut categories = Vec::with_capacity(picked.len());
    for idx in picked {
        let (row, col) = (idx / raster.width, idx % raster.width);
        let (x, y) = raster.transform.pixel_center(row, col);
        coords.push(Coord::new(x, y));
        categories.push(to_code(band[idx]));
    }
    debug!(points = coords.len(), %crs, "sampled raster");
    PointSet::with_categories(crs, coords, categories)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::NATIONAL_GRID;
    use crate::raster::GeoTransform;
    use rand::SeedableRng;
    use std::collections::HashMap;

    /// 100×100 raster with 9000 A (1), 900 B (2), 100 C (3), shuffled by a
    /// fixed permutation so classes are spatially mixed.
    fn imbalanced() -> Raster {
        let mut data: Vec<f32> = Vec::with_capacity(10_000);
        data.extend(std::iter::repeat(1.0).take(9000));
        data.extend(std::iter::repeat(2.0).take(900));
        data.extend(std::iter::repeat(3.0).take(100));
        // 7919 is coprime to 10_000, so this is a permutation.
        let mixed: Vec<f32> = (0..10_000).map(|i| data[(i * 7919) % 10_000]).collect();
        let t = GeoTransform::new(400_000.0, 100_000.0, 10.0, -10.0);
        Raster::from_band("category", mixed, 100, 100, t, Some(NATIONAL_GRID)).unwrap()
    }

    #[test]
    fn same_seed_same_sample() {
        let r = imbalanced();
        let a = sample_random(&r, 500, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = sample_random(&r, 500, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(a, b);
        let c = sample_random(&r, 500, &mut StdRng::seed_from_u64(2)).unwrap();
        assert_ne!(a.coords, c.coords);
    }

    #[test]
    fn oversized_request_returns_all_valid_pixels() {
        let t = GeoTransform::new(0.0, 3.0, 1.0, -1.0);
        let data = vec![1.0, f32::NAN, 2.0, f32::NAN, 3.0, 4.0, f32::NAN, 5.0, 1.0];
        let r = Raster::from_band("category", data, 3, 3, t, Some(NATIONAL_GRID)).unwrap();
        let s = sample_random(&r, 20_000, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(s.len(), 6);
        assert!(s.categories.unwrap().iter().all(Option::is_some));
    }

    #[test]
    fn no_duplicate_pixels() {
        let r = imbalanced();
        let s = sample_random(&r, 2000, &mut StdRng::seed_from_u64(7)).unwrap();
        let mut keys: Vec<(i64, i64)> = s.coords.iter().map(|c| (c.x as i64, c.y as i64)).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), 2000);
    }

    #[test]
    fn class_mix_follows_source_without_rebalancing() {
        let r = imbalanced();
        let s = sample_random(&r, 2000, &mut StdRng::seed_from_u64(1)).unwrap();
        let mut counts: HashMap<u16, usize> = HashMap::new();
        for c in s.categories.unwrap().into_iter().flatten() {
            *counts.entry(c).or_default() += 1;
        }
        let frac = |k| *counts.get(&k).unwrap_or(&0) as f64 / 2000.0;
        // Expected 0.90 / 0.09 / 0.01; tolerances are several standard errors.
        assert!((frac(1) - 0.90).abs() < 0.03, "A = {}", frac(1));
        assert!((frac(2) - 0.09).abs() < 0.025, "B = {}", frac(2));
        assert!((frac(3) - 0.01).abs() < 0.01, "C = {}", frac(3));
    }

    #[test]
    fn points_sit_on_pixel_centres_with_their_codes() {
        let r = imbalanced();
        let s = sample_random(&r, 50, &mut StdRng::seed_from_u64(3)).unwrap();
        for (c, code) in s.coords.iter().zip(s.categories.unwrap()) {
            assert_eq!(r.category_at(c.x, c.y), code);
            assert_eq!((c.x - 400_005.0) % 10.0, 0.0);
        }
    }

    #[test]
    fn raster_without_crs_is_rejected() {
        let mut r = imbalanced();
        r.crs = None;
        assert!(sample_random(&r, 10, &mut StdRng::seed_from_u64(1)).is_err());
    }
}
