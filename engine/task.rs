//! The closed set of independently trained classification objectives.
//!
//! `therapy` and `genetic` are not tasks: they are derived from the diagnosis
//! result and from the raw feature vector respectively, and never own a slot.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const BENIGN: &str = "Benign";
pub const MALIGNANT: &str = "Malignant";

pub const CANCER_TYPES: [&str; 4] = [
    "Ductal Carcinoma",
    "Lobular Carcinoma",
    "Inflammatory Breast Cancer",
    "Paget Disease",
];

pub const PRIMARY: &str = "Primary";
pub const METASTATIC: &str = "Metastatic";

pub const TISSUE_CHANGES: [&str; 3] = ["Hyperplasia", "Dysplasia", "Carcinoma in situ"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Diagnosis,
    CancerType,
    Metastasis,
    TissueChange,
    Prognosis,
}

impl Task {
    /// Every trained task, in the order the comprehensive report evaluates them.
    pub const ALL: [Task; 5] = [
        Task::Diagnosis,
        Task::CancerType,
        Task::Metastasis,
        Task::TissueChange,
        Task::Prognosis,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Task::Diagnosis => "diagnosis",
            Task::CancerType => "cancer_type",
            Task::Metastasis => "metastasis",
            Task::TissueChange => "tissue_change",
            Task::Prognosis => "prognosis",
        }
    }

    /// Stable small integer used to derive per-task seeds.
    pub fn ordinal(self) -> u64 {
        match self {
            Task::Diagnosis => 0,
            Task::CancerType => 1,
            Task::Metastasis => 2,
            Task::TissueChange => 3,
            Task::Prognosis => 4,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for names outside the closed task set.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown task '{0}'. Expected one of: diagnosis, cancer_type, metastasis, tissue_change, prognosis.")]
pub struct UnknownTaskName(pub String);

impl FromStr for Task {
    type Err = UnknownTaskName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Hyphenated spellings are accepted too.
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Task::ALL
            .into_iter()
            .find(|task| task.as_str() == normalized)
            .ok_or_else(|| UnknownTaskName(s.to_string()))
    }
}
