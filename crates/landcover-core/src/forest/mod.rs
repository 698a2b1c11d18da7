//! Random-forest classifier: bootstrap-aggregated Gini CART trees with a
//! random feature subset at every split.
//!
//! One seed per tree is drawn from the caller's `StdRng` before any tree is
//! grown, so a fitted forest depends on the seed only, never on the number of
//! worker threads.

mod tree;

use std::num::NonZeroUsize;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::extract::SampleTable;
use crate::legend::Legend;
use crate::raster::Raster;

pub use tree::DecisionTree;
use tree::{argmax, GrowParams, TrainingSet};

// ── Parameters ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    /// Features tried per split; `None` means ⌊√p⌋.
    pub mtry: Option<usize>,
    /// Nodes with this many rows or fewer become leaves.
    pub min_node_size: usize,
    pub max_depth: Option<usize>,
    /// Training threads, `0` = all available.
    pub workers: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self { n_trees: 500, mtry: None, min_node_size: 1, max_depth: None, workers: 0 }
    }
}

impl ForestParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_trees == 0 {
            return Err(Error::InvalidConfig("forest needs at least one tree".into()));
        }
        if self.min_node_size == 0 {
            return Err(Error::InvalidConfig("min_node_size must be at least 1".into()));
        }
        if self.mtry == Some(0) {
            return Err(Error::InvalidConfig("mtry must be at least 1".into()));
        }
        Ok(())
    }

    fn mtry_for(&self, n_features: usize) -> usize {
        self.mtry
            .unwrap_or_else(|| (n_features as f64).sqrt().floor() as usize)
            .clamp(1, n_features)
    }
}

// ── Worker pools ─────────────────────────────────────────────────────────────

/// Requested worker count clamped to the machine; `0` means all cores.
pub fn effective_workers(requested: usize) -> usize {
    let available = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
    if requested == 0 {
        available
    } else {
        requested.min(available)
    }
}

fn thread_pool(workers: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| Error::InvalidConfig(format!("cannot build {workers}-thread pool: {e}")))
}

// ── Model ────────────────────────────────────────────────────────────────────

/// A fitted forest. Immutable: every prediction method takes `&self`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    feature_names: Vec<String>,
    /// Sorted class codes; trees vote with indices into this list.
    classes: Vec<u16>,
    trees: Vec<DecisionTree>,
    /// Mean decrease in Gini impurity per feature.
    importance: Vec<f64>,
    params: ForestParams,
}

impl RandomForest {
    /// Fit on a complete, labelled table.
    pub fn fit(table: &SampleTable, params: &ForestParams, rng: &mut StdRng) -> Result<Self> {
        params.validate()?;
        let n = table.n_rows();
        if n == 0 {
            return Err(Error::EmptyInput("training table has no rows".into()));
        }
        let categories = table
            .categories
            .as_ref()
            .ok_or_else(|| Error::MissingValues("training table has no category column".into()))?;
        if let Some(i) = table.features.iter().position(|v| v.is_nan()) {
            let p = table.n_features();
            return Err(Error::MissingValues(format!(
                "feature {} of training row {} is NaN",
                table.feature_names[i % p],
                i / p
            )));
        }
        let codes = categories
            .iter()
            .enumerate()
            .map(|(i, c)| c.ok_or_else(|| Error::MissingValues(format!("training row {i} has no category"))))
            .collect::<Result<Vec<u16>>>()?;

        let mut classes = codes.clone();
        classes.sort_unstable();
        classes.dedup();
        let y: Vec<usize> = codes.iter().map(|c| classes.partition_point(|k| k < c)).collect();

        let p = table.n_features();
        let grow = GrowParams {
            mtry: params.mtry_for(p),
            min_node_size: params.min_node_size,
            max_depth: params.max_depth,
        };
        let data = TrainingSet { x: &table.features, n_features: p, y: &y, n_classes: classes.len() };
        let seeds: Vec<u64> = (0..params.n_trees).map(|_| rng.gen()).collect();
        let workers = effective_workers(params.workers);
        info!(
            rows = n,
            features = p,
            classes = classes.len(),
            trees = params.n_trees,
            mtry = grow.mtry,
            workers,
            "fitting random forest"
        );

        let grown: Vec<(DecisionTree, Vec<f64>)> = thread_pool(workers)?.install(|| {
            seeds
                .par_iter()
                .map(|&seed| {
                    let mut rng = StdRng::seed_from_u64(seed);
                    let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                    let mut importance = vec![0.0; p];
                    let tree = DecisionTree::grow(&data, rows, &grow, &mut rng, &mut importance);
                    (tree, importance)
                })
                .collect()
        });

        let mut importance = vec![0.0; p];
        let mut trees = Vec::with_capacity(grown.len());
        for (tree, imp) in grown {
            for (total, v) in importance.iter_mut().zip(imp) {
                *total += v;
            }
            trees.push(tree);
        }
        let n_trees = trees.len() as f64;
        importance.iter_mut().for_each(|v| *v /= n_trees);
        debug!(
            nodes = trees.iter().map(DecisionTree::node_count).sum::<usize>(),
            "forest grown"
        );

        Ok(Self {
            feature_names: table.feature_names.clone(),
            classes,
            trees,
            importance,
            params: params.clone(),
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn classes(&self) -> &[u16] {
        &self.classes
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    /// `(feature, mean decrease Gini)` in column order.
    pub fn feature_importance(&self) -> Vec<(String, f64)> {
        self.feature_names.iter().cloned().zip(self.importance.iter().copied()).collect()
    }

    /// Plurality vote; ties go to the lowest class code. `None` when any
    /// feature is `NaN` or the row has the wrong width.
    pub fn predict_row(&self, row: &[f32]) -> Option<u16> {
        if row.len() != self.feature_names.len() || row.iter().any(|v| v.is_nan()) {
            return None;
        }
        let mut votes = vec![0u32; self.classes.len()];
        for tree in &self.trees {
            votes[tree.predict(row)] += 1;
        }
        Some(self.classes[argmax(&votes)])
    }

    fn check_schema(&self, names: &[String]) -> Result<()> {
        if names != self.feature_names.as_slice() {
            return Err(Error::SchemaMismatch {
                expected: self.feature_names.join(","),
                actual: names.join(","),
            });
        }
        Ok(())
    }

    pub fn predict_table(&self, table: &SampleTable) -> Result<Vec<Option<u16>>> {
        self.check_schema(&table.feature_names)?;
        Ok((0..table.n_rows()).map(|i| self.predict_row(table.row(i))).collect())
    }

    /// Classify every pixel of `raster` (bands in feature order). Pixels with a
    /// `NaN` band become no-data. The result has one `category` band, the
    /// input's grid and CRS, and `legend` attached.
    pub fn predict_raster(&self, raster: &Raster, legend: &Legend, workers: usize) -> Result<Raster> {
        self.check_schema(&raster.band_names)?;
        let workers = effective_workers(workers);
        let plane = raster.width * raster.height;
        let p = raster.band_count();
        info!(width = raster.width, height = raster.height, workers, "predicting raster");

        let data: Vec<f32> = thread_pool(workers)?.install(|| {
            (0..plane)
                .into_par_iter()
                .map_init(
                    || vec![0.0f32; p],
                    |buf, i| {
                        for (b, v) in buf.iter_mut().enumerate() {
                            *v = raster.data[b * plane + i];
                        }
                        self.predict_row(buf).map_or(f32::NAN, f32::from)
                    },
                )
                .collect()
        });

        let out = Raster::from_band("category", data, raster.width, raster.height, raster.transform, raster.crs)?;
        Ok(out.with_legend(legend.clone()))
    }
}
