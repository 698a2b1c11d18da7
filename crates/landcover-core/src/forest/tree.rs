/// CART classification tree grown on a bootstrap sample with a random feature
/// subset at each split (Gini impurity).
use rand::rngs::StdRng;
use rand::seq::index;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf { class: usize },
    Split { feature: usize, threshold: f32, left: usize, right: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

/// Training data view shared by every tree of a forest.
pub(crate) struct TrainingSet<'a> {
    /// Row-major feature matrix, `n_rows × n_features`.
    pub x: &'a [f32],
    pub n_features: usize,
    /// Class index per row.
    pub y: &'a [usize],
    pub n_classes: usize,
}

impl TrainingSet<'_> {
    #[inline]
    fn value(&self, row: usize, feature: usize) -> f32 {
        self.x[row * self.n_features + feature]
    }
}

pub(crate) struct GrowParams {
    pub mtry: usize,
    pub min_node_size: usize,
    pub max_depth: Option<usize>,
}

struct BestSplit {
    feature: usize,
    threshold: f32,
    decrease: f64,
}

impl DecisionTree {
    /// Grow a tree on `rows` (bootstrap indices, duplicates allowed). Gini
    /// decrease of every split is added to `importance[feature]`.
    pub(crate) fn grow(
        data: &TrainingSet<'_>,
        rows: Vec<usize>,
        params: &GrowParams,
        rng: &mut StdRng,
        importance: &mut [f64],
    ) -> Self {
        let mut nodes = vec![Node::Leaf { class: 0 }];
        // (node slot, rows reaching it, depth)
        let mut stack = vec![(0usize, rows, 0usize)];

        while let Some((slot, rows, depth)) = stack.pop() {
            let counts = class_counts(data, &rows);
            let majority = argmax(&counts);
            let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
            let depth_capped = params.max_depth.is_some_and(|d| depth >= d);

            if pure || depth_capped || rows.len() <= params.min_node_size {
                nodes[slot] = Node::Leaf { class: majority };
                continue;
            }

            let Some(best) = best_split(data, &rows, &counts, params.mtry, rng) else {
                nodes[slot] = Node::Leaf { class: majority };
                continue;
            };

            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                .iter()
                .partition(|&&r| data.value(r, best.feature) <= best.threshold);
            importance[best.feature] += best.decrease;

            let left = nodes.len();
            nodes.push(Node::Leaf { class: majority });
            let right = nodes.len();
            nodes.push(Node::Leaf { class: majority });
            nodes[slot] = Node::Split { feature: best.feature, threshold: best.threshold, left, right };

            stack.push((right, right_rows, depth + 1));
            stack.push((left, left_rows, depth + 1));
        }

        Self { nodes }
    }

    /// Class index for one feature row.
    pub fn predict(&self, row: &[f32]) -> usize {
        let mut i = 0;
        loop {
            match self.nodes[i] {
                Node::Leaf { class } => return class,
                Node::Split { feature, threshold, left, right } => {
                    i = if row[feature] <= threshold { left } else { right };
                }
            }
        }
    }

    /// Single-leaf tree voting for `class`.
    #[cfg(test)]
    pub(crate) fn leaf(class: usize) -> Self {
        Self { nodes: vec![Node::Leaf { class }] }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

fn class_counts(data: &TrainingSet<'_>, rows: &[usize]) -> Vec<u32> {
    let mut counts = vec![0u32; data.n_classes];
    for &r in rows {
        counts[data.y[r]] += 1;
    }
    counts
}

/// Index of the largest count; ties go to the lowest index.
pub(crate) fn argmax(counts: &[u32]) -> usize {
    let mut best = 0;
    for (i, &c) in counts.iter().enumerate() {
        if c > counts[best] {
            best = i;
        }
    }
    best
}

/// Best Gini split over `mtry` randomly chosen features, `None` only when
/// every sampled feature is constant over `rows`. A split with zero decrease
/// is still taken so impure nodes keep growing (XOR-like interactions).
///
/// Weighted impurity n·G = n − Σc²/n, so maximising Σcₗ²/nₗ + Σcᵣ²/nᵣ
/// maximises the decrease.
fn best_split(
    data: &TrainingSet<'_>,
    rows: &[usize],
    counts: &[u32],
    mtry: usize,
    rng: &mut StdRng,
) -> Option<BestSplit> {
    let n = rows.len() as f64;
    let parent_sq: f64 = counts.iter().map(|&c| (c as f64).powi(2)).sum::<f64>() / n;

    let mut best: Option<BestSplit> = None;
    let mut pairs: Vec<(f32, usize)> = Vec::with_capacity(rows.len());
    let mut left = vec![0f64; counts.len()];

    for feature in index::sample(rng, data.n_features, mtry.min(data.n_features)).into_iter() {
        pairs.clear();
        pairs.extend(rows.iter().map(|&r| (data.value(r, feature), data.y[r])));
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        if pairs[0].0 == pairs[pairs.len() - 1].0 {
            continue;
        }

        left.iter_mut().for_each(|c| *c = 0.0);
        let mut right: Vec<f64> = counts.iter().map(|&c| c as f64).collect();
        let mut left_sq = 0.0f64;
        let mut right_sq: f64 = right.iter().map(|c| c * c).sum();

        for i in 0..pairs.len() - 1 {
            let k = pairs[i].1;
            // Moving one row of class k from right to left.
            left_sq += 2.0 * left[k] + 1.0;
            right_sq -= 2.0 * right[k] - 1.0;
            left[k] += 1.0;
            right[k] -= 1.0;

            if pairs[i].0 == pairs[i + 1].0 {
                continue;
            }
            let nl = (i + 1) as f64;
            let nr = n - nl;
            let decrease = (left_sq / nl + right_sq / nr - parent_sq).max(0.0);
            if best.as_ref().map_or(true, |b| decrease > b.decrease + 1e-12) {
                let lo = pairs[i].0;
                let hi = pairs[i + 1].0;
                let mid = lo + (hi - lo) / 2.0;
                // Guard against the midpoint rounding up to `hi`.
                let threshold = if mid < hi { mid } else { lo };
                best = Some(BestSplit { feature, threshold, decrease });
            }
        }
    }
    best
}
