//! Column-wise preprocessing fitted on a training partition and replayed,
//! unchanged, on evaluation data and at inference time.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreprocessError {
    #[error("Cannot fit on a matrix with no rows.")]
    NoRows,
    #[error("Transformer was fitted on {expected} columns but received {found}.")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Column {column} holds a non-finite value and no imputer is available.")]
    NonFiniteValue { column: usize },
}

/// Zero-mean, unit-variance scaling. Population standard deviation; columns
/// with zero spread are left unscaled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    pub scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(x: ArrayView2<f64>) -> Result<Self, PreprocessError> {
        if x.nrows() == 0 {
            return Err(PreprocessError::NoRows);
        }
        let n = x.nrows() as f64;
        let mean = x.sum_axis(Axis(0)) / n;
        let scale = x
            .axis_iter(Axis(1))
            .zip(mean.iter())
            .map(|(column, m)| {
                let variance = column.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
                let std = variance.sqrt();
                if std > 0.0 && std.is_finite() { std } else { 1.0 }
            })
            .collect::<Array1<f64>>();
        Ok(Self { mean, scale })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform_row(&self, row: ArrayView1<f64>) -> Result<Array1<f64>, PreprocessError> {
        self.check_width(row.len())?;
        if let Some(column) = row.iter().position(|v| !v.is_finite()) {
            return Err(PreprocessError::NonFiniteValue { column });
        }
        Ok((&row - &self.mean) / &self.scale)
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, PreprocessError> {
        self.check_width(x.ncols())?;
        Ok((&x - &self.mean) / &self.scale)
    }

    fn check_width(&self, found: usize) -> Result<(), PreprocessError> {
        if found != self.n_features() {
            return Err(PreprocessError::DimensionMismatch {
                expected: self.n_features(),
                found,
            });
        }
        Ok(())
    }
}

/// Replaces NaN and infinite entries with the column mean of the finite
/// training values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanImputer {
    pub statistics: Array1<f64>,
}

impl MeanImputer {
    pub fn fit(x: ArrayView2<f64>) -> Result<Self, PreprocessError> {
        if x.nrows() == 0 {
            return Err(PreprocessError::NoRows);
        }
        let statistics = x
            .axis_iter(Axis(1))
            .map(|column| {
                let finite: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
                if finite.is_empty() {
                    0.0
                } else {
                    finite.iter().sum::<f64>() / finite.len() as f64
                }
            })
            .collect::<Array1<f64>>();
        Ok(Self { statistics })
    }

    pub fn n_features(&self) -> usize {
        self.statistics.len()
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, PreprocessError> {
        if x.ncols() != self.n_features() {
            return Err(PreprocessError::DimensionMismatch {
                expected: self.n_features(),
                found: x.ncols(),
            });
        }
        let mut out = x.to_owned();
        for (mut column, fill) in out.axis_iter_mut(Axis(1)).zip(self.statistics.iter()) {
            column.mapv_inplace(|v| if v.is_finite() { v } else { *fill });
        }
        Ok(out)
    }

    pub fn transform_row(&self, row: ArrayView1<f64>) -> Result<Array1<f64>, PreprocessError> {
        if row.len() != self.n_features() {
            return Err(PreprocessError::DimensionMismatch {
                expected: self.n_features(),
                found: row.len(),
            });
        }
        Ok(row
            .iter()
            .zip(self.statistics.iter())
            .map(|(v, fill)| if v.is_finite() { *v } else { *fill })
            .collect())
    }
}

/// True when any entry is NaN or infinite.
pub fn has_non_finite(x: ArrayView2<f64>) -> bool {
    x.iter().any(|v| !v.is_finite())
}
