//! # Single-Task Inference
//!
//! One predict function per trained task. Each pulls the task's slot from a
//! registry snapshot, runs the raw feature vector through imputer, scaler and
//! estimator, and then attaches the task's fixed interpretation of the
//! predicted class. The interpretation tables are constants; none of them
//! look at the feature values.

use crate::features::FeatureVector;
use crate::registry::{RegistryError, RegistrySnapshot};
use crate::slot::Prediction;
use crate::task::{MALIGNANT, METASTATIC, Task};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Diagnosis confidence above which a verdict counts as certain.
pub const HIGH_CONFIDENCE: f64 = 0.9;

const HIGH_RISK_RECOMMENDATIONS: [&str; 4] = [
    "Immediate consultation with oncologist",
    "Biopsy confirmation required",
    "Consider imaging studies (MRI, CT scan)",
    "Genetic counseling recommended",
];
const MODERATE_RISK_RECOMMENDATIONS: [&str; 3] = [
    "Follow-up with specialist",
    "Additional diagnostic tests",
    "Regular monitoring required",
];
const LOW_RISK_RECOMMENDATIONS: [&str; 3] = [
    "Regular follow-up in 6 months",
    "Continue routine screening",
    "Monitor for any changes",
];
const UNCERTAIN_RECOMMENDATIONS: [&str; 3] = [
    "Additional testing recommended",
    "Close monitoring required",
    "Consider second opinion",
];

const PROGNOSIS_RISK_FACTORS: [&str; 4] = [
    "Age over 50",
    "Family history",
    "Previous cancer diagnosis",
    "Lifestyle factors",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "High Risk")]
    High,
    #[serde(rename = "Moderate Risk")]
    Moderate,
    #[serde(rename = "Low Risk")]
    Low,
    #[serde(rename = "Uncertain")]
    Uncertain,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::High => "High Risk",
            RiskLevel::Moderate => "Moderate Risk",
            RiskLevel::Low => "Low Risk",
            RiskLevel::Uncertain => "Uncertain",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    #[serde(flatten)]
    pub base: Prediction,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl DiagnosisResult {
    pub fn is_malignant(&self) -> bool {
        self.base.prediction == MALIGNANT
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancerTypeResult {
    #[serde(flatten)]
    pub base: Prediction,
    pub characteristics: BTreeMap<String, String>,
    #[serde(default)]
    pub subtypes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetastasisResult {
    #[serde(flatten)]
    pub base: Prediction,
    pub stage: String,
    pub spread_risk: String,
    #[serde(default)]
    pub locations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TissueChangeResult {
    #[serde(flatten)]
    pub base: Prediction,
    pub severity: String,
    pub progression_risk: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrognosisResult {
    #[serde(flatten)]
    pub base: Prediction,
    pub survival_rate: f64,
    pub monitoring_schedule: String,
    #[serde(default)]
    pub risk_factors: Vec<String>,
}

/// A single trained task's result, tagged with the task it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskResult {
    Diagnosis(DiagnosisResult),
    CancerType(CancerTypeResult),
    Metastasis(MetastasisResult),
    TissueChange(TissueChangeResult),
    Prognosis(PrognosisResult),
}

impl TaskResult {
    pub fn prediction(&self) -> &Prediction {
        match self {
            TaskResult::Diagnosis(r) => &r.base,
            TaskResult::CancerType(r) => &r.base,
            TaskResult::Metastasis(r) => &r.base,
            TaskResult::TissueChange(r) => &r.base,
            TaskResult::Prognosis(r) => &r.base,
        }
    }
}

/// Dispatches to the predict function for `task`.
pub fn predict_task(
    snapshot: &RegistrySnapshot,
    task: Task,
    vector: &FeatureVector,
) -> Result<TaskResult, RegistryError> {
    Ok(match task {
        Task::Diagnosis => TaskResult::Diagnosis(predict_diagnosis(snapshot, vector)?),
        Task::CancerType => TaskResult::CancerType(predict_cancer_type(snapshot, vector)?),
        Task::Metastasis => TaskResult::Metastasis(predict_metastasis(snapshot, vector)?),
        Task::TissueChange => TaskResult::TissueChange(predict_tissue_change(snapshot, vector)?),
        Task::Prognosis => TaskResult::Prognosis(predict_prognosis(snapshot, vector)?),
    })
}

pub fn predict_diagnosis(
    snapshot: &RegistrySnapshot,
    vector: &FeatureVector,
) -> Result<DiagnosisResult, RegistryError> {
    let mut base = snapshot.predict(Task::Diagnosis, vector)?;
    base.probability = base
        .probability
        .into_iter()
        .map(|(label, p)| (label.to_lowercase(), p))
        .collect();
    let (risk_level, recommendations) =
        diagnosis_risk(base.prediction == MALIGNANT, base.confidence);
    Ok(DiagnosisResult {
        base,
        risk_level,
        recommendations: to_strings(recommendations),
    })
}

/// Risk band and its recommendation list for a diagnosis verdict.
pub fn diagnosis_risk(malignant: bool, confidence: f64) -> (RiskLevel, &'static [&'static str]) {
    let certain = confidence > HIGH_CONFIDENCE;
    match (malignant, certain) {
        (true, true) => (RiskLevel::High, &HIGH_RISK_RECOMMENDATIONS[..]),
        (true, false) => (RiskLevel::Moderate, &MODERATE_RISK_RECOMMENDATIONS[..]),
        (false, true) => (RiskLevel::Low, &LOW_RISK_RECOMMENDATIONS[..]),
        (false, false) => (RiskLevel::Uncertain, &UNCERTAIN_RECOMMENDATIONS[..]),
    }
}

pub fn predict_cancer_type(
    snapshot: &RegistrySnapshot,
    vector: &FeatureVector,
) -> Result<CancerTypeResult, RegistryError> {
    let base = snapshot.predict(Task::CancerType, vector)?;
    let characteristics = BTreeMap::from([(
        base.prediction.clone(),
        cancer_type_characteristics(&base.prediction).to_string(),
    )]);
    Ok(CancerTypeResult {
        base,
        characteristics,
        subtypes: Vec::new(),
    })
}

pub fn cancer_type_characteristics(cancer_type: &str) -> &'static str {
    match cancer_type {
        "Ductal Carcinoma" => "Most common type, originates in milk ducts",
        "Lobular Carcinoma" => "Originates in milk-producing glands",
        "Inflammatory Breast Cancer" => "Aggressive, affects skin and lymph vessels",
        "Paget Disease" => "Rare, affects nipple and areola",
        _ => "Unknown characteristics",
    }
}

pub fn predict_metastasis(
    snapshot: &RegistrySnapshot,
    vector: &FeatureVector,
) -> Result<MetastasisResult, RegistryError> {
    let base = snapshot.predict(Task::Metastasis, vector)?;
    let (stage, spread_risk) = metastasis_stage(&base.prediction);
    Ok(MetastasisResult {
        base,
        stage: stage.to_string(),
        spread_risk: spread_risk.to_string(),
        locations: Vec::new(),
    })
}

pub fn metastasis_stage(status: &str) -> (&'static str, &'static str) {
    if status == METASTATIC {
        ("Stage IV", "High - Cancer has spread to distant organs")
    } else {
        ("Stage I-III", "Low - Cancer localized to primary site")
    }
}

pub fn predict_tissue_change(
    snapshot: &RegistrySnapshot,
    vector: &FeatureVector,
) -> Result<TissueChangeResult, RegistryError> {
    let base = snapshot.predict(Task::TissueChange, vector)?;
    let (severity, progression_risk) = tissue_change_severity(&base.prediction);
    Ok(TissueChangeResult {
        base,
        severity: severity.to_string(),
        progression_risk: progression_risk.to_string(),
    })
}

pub fn tissue_change_severity(change: &str) -> (&'static str, &'static str) {
    match change {
        "Hyperplasia" => ("Mild", "Low risk of progression"),
        "Dysplasia" => ("Moderate", "Moderate risk of progression"),
        "Carcinoma in situ" => ("Severe", "High risk of progression to invasive cancer"),
        _ => ("Unknown", "Unknown"),
    }
}

pub fn predict_prognosis(
    snapshot: &RegistrySnapshot,
    vector: &FeatureVector,
) -> Result<PrognosisResult, RegistryError> {
    let base = snapshot.predict(Task::Prognosis, vector)?;
    let (survival_rate, monitoring_schedule) = prognosis_outlook(&base.prediction);
    Ok(PrognosisResult {
        base,
        survival_rate,
        monitoring_schedule: monitoring_schedule.to_string(),
        risk_factors: to_strings(&PROGNOSIS_RISK_FACTORS),
    })
}

/// Five-year survival rate and monitoring schedule for a prognosis class.
pub fn prognosis_outlook(prognosis: &str) -> (f64, &'static str) {
    match prognosis {
        "Excellent" => (0.98, "Annual screening"),
        "Good" => (0.85, "6-month follow-up"),
        "Fair" => (0.65, "3-month monitoring"),
        "Poor" => (0.35, "Monthly monitoring"),
        _ => (0.5, "Individualized"),
    }
}

pub(crate) fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModelRegistry;
    use crate::task::{BENIGN, CANCER_TYPES, TISSUE_CHANGES};
    use crate::test_fixtures::trained_registry;
    use approx::assert_abs_diff_eq;

    fn case_vector(scale: f64) -> FeatureVector {
        FeatureVector::new(std::array::from_fn(|j| (10.0 + j as f64) * scale))
    }

    #[test]
    fn diagnosis_bands_follow_class_and_confidence() {
        assert_eq!(diagnosis_risk(true, 0.95).0, RiskLevel::High);
        assert_eq!(diagnosis_risk(true, 0.9).0, RiskLevel::Moderate);
        assert_eq!(diagnosis_risk(false, 0.91).0, RiskLevel::Low);
        let (level, recommendations) = diagnosis_risk(false, 0.6);
        assert_eq!(level, RiskLevel::Uncertain);
        assert_eq!(recommendations[2], "Consider second opinion");
        assert_eq!(diagnosis_risk(true, 0.99).1.len(), 4);
    }

    #[test]
    fn diagnosis_confidence_is_the_largest_probability() {
        let registry = trained_registry();
        let snapshot = registry.snapshot();
        for scale in [0.8, 1.0, 1.25, 1.5, 1.7] {
            let result = predict_diagnosis(&snapshot, &case_vector(scale)).unwrap();
            assert!([MALIGNANT, BENIGN].contains(&result.base.prediction.as_str()));
            let keys: Vec<&str> = result.base.probability.keys().map(String::as_str).collect();
            assert_eq!(keys, vec!["benign", "malignant"]);
            let max = result
                .base
                .probability
                .values()
                .copied()
                .fold(f64::MIN, f64::max);
            assert!((0.0..=1.0).contains(&result.base.confidence));
            assert_eq!(result.base.confidence, max);
            assert_abs_diff_eq!(
                result.base.probability.values().sum::<f64>(),
                1.0,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn secondary_tasks_attach_their_lookup_fields() {
        let registry = trained_registry();
        let snapshot = registry.snapshot();
        let vector = case_vector(1.2);

        let cancer = predict_cancer_type(&snapshot, &vector).unwrap();
        assert!(CANCER_TYPES.contains(&cancer.base.prediction.as_str()));
        assert_eq!(cancer.characteristics.len(), 1);
        assert!(cancer.subtypes.is_empty());

        let metastasis = predict_metastasis(&snapshot, &vector).unwrap();
        assert_eq!(metastasis.stage == "Stage IV", metastasis.base.prediction == METASTATIC);

        let tissue = predict_tissue_change(&snapshot, &vector).unwrap();
        assert!(TISSUE_CHANGES.contains(&tissue.base.prediction.as_str()));
        assert_ne!(tissue.severity, "Unknown");

        let prognosis = predict_prognosis(&snapshot, &vector).unwrap();
        assert_eq!(prognosis.risk_factors.len(), 4);
        assert_ne!(prognosis.survival_rate, 0.5);
    }

    #[test]
    fn lookup_tables_have_defaults() {
        assert_eq!(cancer_type_characteristics("Sarcoma"), "Unknown characteristics");
        assert_eq!(tissue_change_severity("Dysplasia").0, "Moderate");
        assert_eq!(prognosis_outlook("Poor"), (0.35, "Monthly monitoring"));
        assert_eq!(prognosis_outlook("Unclear"), (0.5, "Individualized"));
        assert_eq!(metastasis_stage("Primary").0, "Stage I-III");
    }

    #[test]
    fn untrained_registry_fails_every_task() {
        let snapshot = ModelRegistry::new().snapshot();
        for task in Task::ALL {
            assert!(matches!(
                predict_task(&snapshot, task, &case_vector(1.0)),
                Err(RegistryError::ModelNotTrained(t)) if t == task
            ));
        }
    }

    #[test]
    fn tagged_results_serialize_with_the_task_name() {
        let registry = trained_registry();
        let result = predict_task(&registry.snapshot(), Task::TissueChange, &case_vector(1.0)).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["task"], "tissue_change");
        assert!(json["severity"].is_string());
        assert!(json["probability"].is_object());
        assert_eq!(result.prediction().prediction, json["prediction"]);
    }
}
