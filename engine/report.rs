//! # Comprehensive Report
//!
//! Runs every task for one feature vector against a single registry snapshot
//! and folds the results into one report. Tasks run in a fixed order because
//! therapy consumes the finished diagnosis. The first failing task aborts the
//! report; a partial report is never returned.

use crate::features::FeatureVector;
use crate::genetic::{GeneticResult, predict_genetic};
use crate::guidelines::GuidelineTable;
use crate::inference::{
    CancerTypeResult, DiagnosisResult, MetastasisResult, PrognosisResult, RiskLevel,
    TissueChangeResult, predict_cancer_type, predict_diagnosis, predict_metastasis,
    predict_prognosis, predict_tissue_change, to_strings,
};
use crate::registry::{RegistryError, RegistrySnapshot};
use crate::therapy::{TherapyRecommendation, predict_therapy};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Malignant diagnoses above this confidence escalate to high overall risk.
pub const ESCALATION_CONFIDENCE: f64 = 0.8;

const HIGH_RISK_NEXT_STEPS: [&str; 4] = [
    "Immediate consultation with oncologist",
    "Complete diagnostic workup",
    "Treatment planning",
    "Support services consultation",
];
const MODERATE_RISK_NEXT_STEPS: [&str; 4] = [
    "Specialist consultation",
    "Additional diagnostic tests",
    "Close monitoring",
    "Lifestyle modifications",
];
const LOW_RISK_NEXT_STEPS: [&str; 4] = [
    "Regular follow-up",
    "Continue screening",
    "Healthy lifestyle maintenance",
    "Annual check-ups",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveResult {
    pub diagnosis: DiagnosisResult,
    pub cancer_type: CancerTypeResult,
    pub metastasis: MetastasisResult,
    pub tissue_change: TissueChangeResult,
    pub prognosis: PrognosisResult,
    pub therapy: TherapyRecommendation,
    pub genetic: GeneticResult,
    pub overall_risk: RiskLevel,
    pub next_steps: Vec<String>,
    pub confidence_score: f64,
    pub timestamp: DateTime<Utc>,
}

/// Overall risk band and its checklist for a diagnosis verdict.
pub fn overall_risk(diagnosis: &DiagnosisResult) -> (RiskLevel, Vec<String>) {
    let (level, steps) = match (diagnosis.is_malignant(), diagnosis.base.confidence > ESCALATION_CONFIDENCE) {
        (true, true) => (RiskLevel::High, &HIGH_RISK_NEXT_STEPS),
        (true, false) => (RiskLevel::Moderate, &MODERATE_RISK_NEXT_STEPS),
        (false, _) => (RiskLevel::Low, &LOW_RISK_NEXT_STEPS),
    };
    (level, to_strings(steps))
}

/// Builds the report from finished per-task results.
pub fn assemble(
    diagnosis: DiagnosisResult,
    cancer_type: CancerTypeResult,
    metastasis: MetastasisResult,
    tissue_change: TissueChangeResult,
    prognosis: PrognosisResult,
    therapy: TherapyRecommendation,
    genetic: GeneticResult,
) -> ComprehensiveResult {
    let (overall_risk, next_steps) = overall_risk(&diagnosis);
    ComprehensiveResult {
        confidence_score: diagnosis.base.confidence,
        diagnosis,
        cancer_type,
        metastasis,
        tissue_change,
        prognosis,
        therapy,
        genetic,
        overall_risk,
        next_steps,
        timestamp: Utc::now(),
    }
}

pub fn predict_comprehensive(
    snapshot: &RegistrySnapshot,
    guidelines: &GuidelineTable,
    vector: &FeatureVector,
) -> Result<ComprehensiveResult, RegistryError> {
    let diagnosis = predict_diagnosis(snapshot, vector)?;
    let cancer_type = predict_cancer_type(snapshot, vector)?;
    let metastasis = predict_metastasis(snapshot, vector)?;
    let tissue_change = predict_tissue_change(snapshot, vector)?;
    let prognosis = predict_prognosis(snapshot, vector)?;
    let therapy = TherapyRecommendation::from(predict_therapy(&diagnosis, guidelines));
    let genetic = predict_genetic(vector);
    Ok(assemble(
        diagnosis,
        cancer_type,
        metastasis,
        tissue_change,
        prognosis,
        therapy,
        genetic,
    ))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_samples: usize,
    pub malignant_count: usize,
    pub benign_count: usize,
    pub high_risk_count: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[ComprehensiveResult]) -> Self {
        let malignant_count = results.iter().filter(|r| r.diagnosis.is_malignant()).count();
        Self {
            total_samples: results.len(),
            malignant_count,
            benign_count: results.len() - malignant_count,
            high_risk_count: results
                .iter()
                .filter(|r| r.overall_risk == RiskLevel::High)
                .count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub predictions: Vec<ComprehensiveResult>,
    pub summary: BatchSummary,
}

/// Comprehensive reports for many vectors, in input order. Any failing row
/// fails the whole batch.
pub fn predict_batch(
    snapshot: &RegistrySnapshot,
    guidelines: &GuidelineTable,
    vectors: &[FeatureVector],
) -> Result<BatchResult, RegistryError> {
    let predictions = vectors
        .par_iter()
        .map(|vector| predict_comprehensive(snapshot, guidelines, vector))
        .collect::<Result<Vec<_>, _>>()?;
    let summary = BatchSummary::from_results(&predictions);
    log::info!(
        "Batch of {} rows: {} malignant, {} high risk.",
        summary.total_samples,
        summary.malignant_count,
        summary.high_risk_count
    );
    Ok(BatchResult {
        predictions,
        summary,
    })
}
