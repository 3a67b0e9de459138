//! Genetic-risk heuristic. A pure function of three raw measurements; no
//! trained model and no scaling is involved.

use crate::features::FeatureVector;
use crate::inference::to_strings;
use serde::{Deserialize, Serialize};

pub const NO_MUTATIONS: &str = "No significant mutations detected";

/// (feature position, threshold, gene). A raw value strictly above the
/// threshold flags the gene.
const MARKERS: [(usize, f64, &str); 3] = [(0, 15.0, "BRCA1"), (1, 20.0, "BRCA2"), (2, 100.0, "TP53")];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneticResult {
    #[serde(default)]
    pub mutations: Vec<String>,
    pub risk_genes: Vec<String>,
    pub hereditary_risk: String,
    #[serde(default)]
    pub family_screening: Vec<String>,
    /// 1.0 when any gene was flagged, else 0.0.
    pub risk_score: f64,
}

pub fn predict_genetic(vector: &FeatureVector) -> GeneticResult {
    let values = vector.values();
    let risk_genes: Vec<String> = MARKERS
        .iter()
        .filter(|(position, threshold, _)| values[*position] > *threshold)
        .map(|(_, _, gene)| gene.to_string())
        .collect();
    let mut mutations: Vec<String> = risk_genes.iter().map(|gene| format!("{gene} mutation")).collect();
    if mutations.is_empty() {
        mutations.push(NO_MUTATIONS.to_string());
    }

    let (hereditary_risk, screening) = match risk_genes.len() {
        0 => ("Low hereditary risk", "Routine family history assessment"),
        1 => ("Moderate hereditary risk", "Consider family screening"),
        _ => ("High hereditary risk", "Immediate family screening recommended"),
    };
    let risk_score = if risk_genes.is_empty() { 0.0 } else { 1.0 };

    GeneticResult {
        mutations,
        risk_genes,
        hereditary_risk: hereditary_risk.to_string(),
        family_screening: to_strings(&[screening]),
        risk_score,
    }
}
