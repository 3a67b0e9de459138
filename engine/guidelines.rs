//! # Guideline Table
//!
//! External reference data mapping a lower-cased diagnosis label to a
//! structured therapy plan. When an entry exists it is returned verbatim in
//! place of the heuristic therapy rule.
//!
//! The table is optional. A missing or malformed file yields an empty table
//! and a warning; it never stops the service from starting.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GuidelineLoadError {
    #[error("Could not read the guideline table: {0}")]
    Io(#[from] std::io::Error),
    #[error("The guideline table is not a valid JSON object of therapy plans: {0}")]
    Json(#[from] serde_json::Error),
}

/// A therapy recommendation, either from the guideline table or from the
/// fallback rule. Fields a guideline entry leaves out stay out when the plan
/// is serialised again; unknown fields are carried through untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TherapyPlan {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub primary_treatment: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternative_treatments: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub urgency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub side_effects: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuidelineTable {
    entries: BTreeMap<String, TherapyPlan>,
}

impl GuidelineTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON object of plans. Entries are read one at a time: an
    /// entry that is not a valid plan is logged and skipped, and the rest of
    /// the table still loads.
    pub fn from_json_str(json: &str) -> Result<Self, GuidelineLoadError> {
        let raw: BTreeMap<String, Value> = serde_json::from_str(json)?;
        let mut table = Self::new();
        for (key, entry) in raw {
            match serde_json::from_value::<TherapyPlan>(entry) {
                Ok(plan) => table.insert(&key, plan),
                Err(err) => log::warn!("Skipping guideline entry '{key}': {err}"),
            }
        }
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self, GuidelineLoadError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// Loads the table, downgrading any failure to an empty table.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(table) => {
                log::info!(
                    "Loaded {} guideline entries from {}.",
                    table.len(),
                    path.display()
                );
                table
            }
            Err(err) => {
                log::warn!(
                    "Could not load guidelines from {}: {err}. Using heuristic therapy rules only.",
                    path.display()
                );
                Self::new()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), GuidelineLoadError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(json.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Looks up a diagnosis label in any letter case.
    pub fn get(&self, diagnosis: &str) -> Option<&TherapyPlan> {
        self.entries.get(&diagnosis.to_lowercase())
    }

    pub fn insert(&mut self, diagnosis: &str, plan: TherapyPlan) {
        self.entries.insert(diagnosis.to_lowercase(), plan);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, TherapyPlan)> for GuidelineTable {
    fn from_iter<I: IntoIterator<Item = (String, TherapyPlan)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (key, plan) in iter {
            table.insert(&key, plan);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"{
        "Malignant": {
            "primary_treatment": "Neoadjuvant chemotherapy",
            "urgency": "Immediate",
            "success_rate": 0.8,
            "evidence_level": "1A"
        }
    }"#;

    #[test]
    fn keys_are_case_insensitive_and_extra_fields_survive() {
        let table = GuidelineTable::from_json_str(SAMPLE).unwrap();
        let plan = table.get("MALIGNANT").unwrap();
        assert_eq!(plan.primary_treatment, "Neoadjuvant chemotherapy");
        assert_eq!(plan.success_rate, Some(0.8));
        assert!(plan.side_effects.is_empty());
        assert_eq!(plan.extra["evidence_level"], Value::from("1A"));
        assert!(table.get("benign").is_none());
    }

    #[test]
    fn one_malformed_entry_does_not_drop_the_table() {
        let table = GuidelineTable::from_json_str(
            r#"{
                "malignant": {"primary_treatment": "Surgery", "success_rate": "85%"},
                "benign": {"primary_treatment": "Watchful waiting"},
                "uncertain": "see oncologist"
            }"#,
        )
        .unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.get("malignant").is_none());
        assert_eq!(table.get("benign").unwrap().primary_treatment, "Watchful waiting");
    }

    #[test]
    fn omitted_fields_stay_omitted_when_written_back() {
        let table = GuidelineTable::from_json_str(SAMPLE).unwrap();
        let written = serde_json::to_value(table.get("malignant").unwrap()).unwrap();
        let keys: Vec<&str> = written.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["evidence_level", "primary_treatment", "success_rate", "urgency"]
        );
    }

    #[test]
    fn unreadable_tables_degrade_to_empty() {
        let dir = tempdir().unwrap();
        assert!(GuidelineTable::load_or_empty(&dir.path().join("missing.json")).is_empty());
        let broken = dir.path().join("broken.json");
        fs::write(&broken, "[1, 2").unwrap();
        assert!(matches!(
            GuidelineTable::load(&broken),
            Err(GuidelineLoadError::Json(_))
        ));
        assert!(GuidelineTable::load_or_empty(&broken).is_empty());
    }

    #[test]
    fn saved_tables_reload_identically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guidelines.json");
        let table = GuidelineTable::from_json_str(SAMPLE).unwrap();
        table.save(&path).unwrap();
        assert_eq!(GuidelineTable::load(&path).unwrap(), table);
    }
}
