//! # Dataset Loading
//!
//! The only entry point for user-provided tables. Training tables carry the
//! `diagnosis` outcome column plus the 30 schema columns; prediction tables
//! carry the schema columns only. Columns are located by header name and
//! reordered into schema order, so the file's own column order is irrelevant.
//!
//! Headers are trimmed and inner spaces read as underscores, which accepts the
//! common `concave points_mean` spelling. Spreadsheet export artefacts (empty
//! or `Unnamed: N` headers) are dropped.
//!
//! Training tables may hold missing values; they load as NaN and are imputed by
//! the training pipeline. Prediction rows must be complete, finite and
//! non-negative.

use crate::features::{FEATURE_COUNT, FEATURE_NAMES, FeatureVector, SchemaError, feature_index};
use ndarray::{Array2, ArrayView2, ArrayViewMut2};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

const DIAGNOSIS_COLUMN: &str = "diagnosis";
const ID_COLUMN: &str = "id";
const MALIGNANT_CODE: &str = "M";

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error from the CSV reader: {0}")]
    Csv(#[from] csv::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error("Row {row}, column '{column}': '{value}' is not a number.")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },
    #[error("Row {row}, column '{column}': value is missing or not finite.")]
    NonFiniteValue { row: usize, column: String },
    #[error("Row {row}, column '{column}': value {value} is negative.")]
    NegativeValue {
        row: usize,
        column: String,
        value: f64,
    },
    #[error("The input file contains a header but no data rows.")]
    NoDataRows,
    #[error("Feature table has {rows} rows but {labels} diagnosis labels.")]
    LabelCountMismatch { rows: usize, labels: usize },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// A labelled feature table in schema column order.
#[derive(Debug, Clone)]
pub struct TrainingTable {
    features: Array2<f64>,
    malignant: Vec<bool>,
}

impl TrainingTable {
    pub fn new(features: Array2<f64>, malignant: Vec<bool>) -> Result<Self, DataError> {
        if features.ncols() != FEATURE_COUNT {
            return Err(SchemaError::WrongLength {
                expected: FEATURE_COUNT,
                found: features.ncols(),
            }
            .into());
        }
        if features.nrows() != malignant.len() {
            return Err(DataError::LabelCountMismatch {
                rows: features.nrows(),
                labels: malignant.len(),
            });
        }
        if malignant.is_empty() {
            return Err(DataError::NoDataRows);
        }
        Ok(Self {
            features,
            malignant,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, DataError> {
        let table = Self::from_reader(File::open(path)?)?;
        log::info!(
            "Loaded {} training rows from {} ({} malignant).",
            table.n_rows(),
            path.display(),
            table.malignant.iter().filter(|&&m| m).count()
        );
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DataError> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers = normalized_headers(reader.headers()?);
        let layout = ColumnLayout::locate(&headers)?;
        let diagnosis = headers
            .iter()
            .position(|h| h.as_deref() == Some(DIAGNOSIS_COLUMN))
            .ok_or_else(|| DataError::ColumnNotFound(DIAGNOSIS_COLUMN.to_string()))?;

        let mut values = Vec::new();
        let mut malignant = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record?;
            let row = i + 1;
            for (feature, &column) in layout.columns.iter().enumerate() {
                let cell = record.get(column).unwrap_or("");
                values.push(parse_cell(cell, row, FEATURE_NAMES[feature])?);
            }
            malignant.push(record.get(diagnosis).unwrap_or("") == MALIGNANT_CODE);
        }
        let rows = malignant.len();
        let features = Array2::from_shape_vec((rows, FEATURE_COUNT), values)
            .map_err(|_| DataError::LabelCountMismatch { rows, labels: rows })?;
        Self::new(features, malignant)
    }

    pub fn n_rows(&self) -> usize {
        self.malignant.len()
    }

    pub fn features(&self) -> ArrayView2<'_, f64> {
        self.features.view()
    }

    pub fn features_mut(&mut self) -> ArrayViewMut2<'_, f64> {
        self.features.view_mut()
    }

    /// Binary outcome per row; `true` is the positive (malignant) class.
    pub fn malignant(&self) -> &[bool] {
        &self.malignant
    }
}

/// Validated rows for inference, with an identifier per row.
#[derive(Debug, Clone)]
pub struct PredictionRows {
    /// The `id` column when present, otherwise 1-based row numbers.
    pub ids: Vec<String>,
    pub vectors: Vec<FeatureVector>,
}

impl PredictionRows {
    pub fn from_path(path: &Path) -> Result<Self, DataError> {
        Self::from_reader(File::open(path)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DataError> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers = normalized_headers(reader.headers()?);
        let layout = ColumnLayout::locate(&headers)?;
        let id_column = headers.iter().position(|h| h.as_deref() == Some(ID_COLUMN));

        let mut ids = Vec::new();
        let mut vectors = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record?;
            let row = i + 1;
            let mut values = [0.0; FEATURE_COUNT];
            for (feature, &column) in layout.columns.iter().enumerate() {
                let cell = record.get(column).unwrap_or("");
                values[feature] = parse_cell(cell, row, FEATURE_NAMES[feature])?;
            }
            let vector = FeatureVector::new(values);
            validate_prediction_input(&vector, row)?;
            ids.push(
                id_column
                    .and_then(|c| record.get(c))
                    .map(str::to_string)
                    .unwrap_or_else(|| row.to_string()),
            );
            vectors.push(vector);
        }
        if vectors.is_empty() {
            return Err(DataError::NoDataRows);
        }
        Ok(Self { ids, vectors })
    }
}

/// Rejects missing, non-finite or negative measurements before they reach a
/// model. `row` is only used to label the error.
pub fn validate_prediction_input(vector: &FeatureVector, row: usize) -> Result<(), DataError> {
    for (name, &value) in FEATURE_NAMES.iter().zip(vector.values().iter()) {
        if !value.is_finite() {
            return Err(DataError::NonFiniteValue {
                row,
                column: name.to_string(),
            });
        }
        if value < 0.0 {
            return Err(DataError::NegativeValue {
                row,
                column: name.to_string(),
                value,
            });
        }
    }
    Ok(())
}

/// Where each schema feature lives in the file.
struct ColumnLayout {
    columns: [usize; FEATURE_COUNT],
}

impl ColumnLayout {
    fn locate(headers: &[Option<String>]) -> Result<Self, DataError> {
        let mut columns = [usize::MAX; FEATURE_COUNT];
        for (position, header) in headers.iter().enumerate() {
            if let Some(index) = header.as_deref().and_then(feature_index) {
                columns[index] = position;
            }
        }
        if let Some(missing) = columns.iter().position(|&c| c == usize::MAX) {
            return Err(DataError::ColumnNotFound(FEATURE_NAMES[missing].to_string()));
        }
        Ok(Self { columns })
    }
}

/// `None` marks a dropped column.
fn normalized_headers(headers: &csv::StringRecord) -> Vec<Option<String>> {
    headers
        .iter()
        .map(|h| {
            let h = h.trim();
            if h.is_empty() || h.contains("Unnamed") {
                None
            } else {
                Some(h.split_whitespace().collect::<Vec<_>>().join("_"))
            }
        })
        .collect()
}

fn parse_cell(cell: &str, row: usize, column: &str) -> Result<f64, DataError> {
    let cell = cell.trim();
    if cell.is_empty() || ["na", "nan", "null"].contains(&cell.to_ascii_lowercase().as_str()) {
        return Ok(f64::NAN);
    }
    cell.parse::<f64>().map_err(|_| DataError::InvalidValue {
        row,
        column: column.to_string(),
        value: cell.to_string(),
    })
}
