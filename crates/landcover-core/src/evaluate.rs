//! Accuracy assessment: confusion matrix, overall and balanced accuracy,
//! Cohen's kappa.
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::legend::Legend;

/// Square contingency table over the sorted union of codes seen in either
/// vector. Rows are predicted classes, columns are true classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub classes: Vec<u16>,
    pub counts: Vec<Vec<u64>>,
}

impl ConfusionMatrix {
    pub fn from_predictions(predicted: &[u16], truth: &[u16]) -> Result<Self> {
        if predicted.len() != truth.len() {
            return Err(Error::LengthMismatch { left: predicted.len(), right: truth.len() });
        }
        if predicted.is_empty() {
            return Err(Error::EmptyInput("no predictions to evaluate".into()));
        }
        let mut classes: Vec<u16> = predicted.iter().chain(truth).copied().collect();
        classes.sort_unstable();
        classes.dedup();

        let k = classes.len();
        let index = |c: &u16| classes.partition_point(|x| x < c);
        let mut counts = vec![vec![0u64; k]; k];
        for (p, t) in predicted.iter().zip(truth) {
            counts[index(p)][index(t)] += 1;
        }
        Ok(Self { classes, counts })
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    /// Predicted count per class.
    pub fn row_totals(&self) -> Vec<u64> {
        self.counts.iter().map(|row| row.iter().sum()).collect()
    }

    /// True count per class.
    pub fn column_totals(&self) -> Vec<u64> {
        (0..self.classes.len())
            .map(|j| self.counts.iter().map(|row| row[j]).sum())
            .collect()
    }

    fn diagonal(&self) -> u64 {
        (0..self.classes.len()).map(|i| self.counts[i][i]).sum()
    }

    pub fn accuracy(&self) -> f64 {
        self.diagonal() as f64 / self.total() as f64
    }

    /// Recall per class; `None` for classes absent from the true vector.
    pub fn recalls(&self) -> Vec<Option<f64>> {
        self.column_totals()
            .into_iter()
            .enumerate()
            .map(|(j, total)| (total > 0).then(|| self.counts[j][j] as f64 / total as f64))
            .collect()
    }

    /// Mean recall over classes present in the true vector.
    pub fn balanced_accuracy(&self) -> f64 {
        let recalls: Vec<f64> = self.recalls().into_iter().flatten().collect();
        recalls.iter().sum::<f64>() / recalls.len() as f64
    }

    /// Cohen's kappa, (pₒ − pₑ) / (1 − pₑ). When chance agreement is already
    /// total (one class everywhere) agreement is perfect and kappa is 1.
    pub fn kappa(&self) -> f64 {
        let n = self.total() as f64;
        let po = self.accuracy();
        let pe = self
            .row_totals()
            .iter()
            .zip(self.column_totals())
            .map(|(&r, c)| r as f64 * c as f64)
            .sum::<f64>()
            / (n * n);
        if pe >= 1.0 {
            return 1.0;
        }
        (po - pe) / (1.0 - pe)
    }
}

/// Serializable summary of one evaluation, with legend names for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub samples: u64,
    pub accuracy: f64,
    pub balanced_accuracy: f64,
    pub kappa: f64,
    pub class_names: Vec<String>,
    pub recalls: Vec<Option<f64>>,
    pub matrix: ConfusionMatrix,
}

impl Evaluation {
    pub fn new(matrix: ConfusionMatrix, legend: &Legend) -> Self {
        Self {
            samples: matrix.total(),
            accuracy: matrix.accuracy(),
            balanced_accuracy: matrix.balanced_accuracy(),
            kappa: matrix.kappa(),
            class_names: matrix.classes.iter().map(|&c| legend.label(c)).collect(),
            recalls: matrix.recalls(),
            matrix,
        }
    }

    /// Fixed-width text table: predicted rows × true columns, with totals.
    pub fn render_table(&self) -> String {
        let width = self.class_names.iter().map(String::len).max().unwrap_or(0).max(9);
        let mut out = String::new();
        let _ = write!(out, "{:>width$}", "pred\\true");
        for name in &self.class_names {
            let _ = write!(out, " {name:>width$}");
        }
        let _ = writeln!(out, " {:>width$}", "total");

        let rows = self.matrix.row_totals();
        for (i, name) in self.class_names.iter().enumerate() {
            let _ = write!(out, "{name:>width$}");
            for v in &self.matrix.counts[i] {
                let _ = write!(out, " {v:>width$}");
            }
            let _ = writeln!(out, " {:>width$}", rows[i]);
        }
        let _ = write!(out, "{:>width$}", "total");
        for v in self.matrix.column_totals() {
            let _ = write!(out, " {v:>width$}");
        }
        let _ = writeln!(out, " {:>width$}", self.samples);
        let _ = write!(
            out,
            "accuracy {:.4}  balanced accuracy {:.4}  kappa {:.4}",
            self.accuracy, self.balanced_accuracy, self.kappa
        );
        out
    }
}
