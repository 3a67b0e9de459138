//! Therapy is derived from the diagnosis result rather than predicted. A
//! guideline entry for the diagnosis label always wins; otherwise a fixed rule
//! keyed on class and confidence applies.

use crate::guidelines::{GuidelineTable, TherapyPlan};
use crate::inference::{DiagnosisResult, HIGH_CONFIDENCE, to_strings};
use serde::{Deserialize, Serialize};

const ALTERNATIVE_TREATMENTS: [&str; 3] = ["Immunotherapy", "Hormone Therapy", "Clinical Trials"];
const SIDE_EFFECTS: [&str; 4] = ["Fatigue", "Nausea", "Hair loss", "Immune suppression"];

/// A therapy plan plus the fields the comprehensive report derives from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TherapyRecommendation {
    #[serde(flatten)]
    pub plan: TherapyPlan,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub priority: String,
    pub timeline: String,
}

impl From<TherapyPlan> for TherapyRecommendation {
    fn from(mut plan: TherapyPlan) -> Self {
        // Derived fields replace any same-named guideline fields.
        for key in ["recommendations", "priority", "timeline"] {
            plan.extra.remove(key);
        }
        let mut recommendations = Vec::with_capacity(plan.alternative_treatments.len() + 1);
        if !plan.primary_treatment.is_empty() {
            recommendations.push(plan.primary_treatment.clone());
        }
        recommendations.extend(plan.alternative_treatments.iter().cloned());
        let timeline = if plan.urgency.to_lowercase().starts_with("immediate") {
            "Immediate"
        } else {
            "Routine"
        };
        Self {
            priority: plan.urgency.clone(),
            timeline: timeline.to_string(),
            recommendations,
            plan,
        }
    }
}

pub fn predict_therapy(diagnosis: &DiagnosisResult, guidelines: &GuidelineTable) -> TherapyPlan {
    if let Some(plan) = guidelines.get(&diagnosis.base.prediction) {
        log::debug!(
            "Using guideline-based therapy for {}",
            diagnosis.base.prediction.to_lowercase()
        );
        return plan.clone();
    }
    fallback_therapy(diagnosis.is_malignant(), diagnosis.base.confidence)
}

pub fn fallback_therapy(malignant: bool, confidence: f64) -> TherapyPlan {
    let (primary_treatment, urgency, success_rate) = match (malignant, confidence > HIGH_CONFIDENCE) {
        (true, true) => ("Surgery + Chemotherapy + Radiation", "Immediate", 0.85),
        (true, false) => ("Surgery + Targeted Therapy", "High Priority", 0.75),
        (false, _) => ("Active Surveillance", "Low Priority", 0.95),
    };
    TherapyPlan {
        primary_treatment: primary_treatment.to_string(),
        alternative_treatments: to_strings(&ALTERNATIVE_TREATMENTS),
        urgency: urgency.to_string(),
        success_rate: Some(success_rate),
        side_effects: to_strings(&SIDE_EFFECTS),
        extra: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::diagnosis;

    #[test]
    fn guideline_entries_win_regardless_of_confidence() {
        let mut guidelines = GuidelineTable::new();
        let plan = TherapyPlan {
            primary_treatment: "Guideline regimen".to_string(),
            urgency: "Within two weeks".to_string(),
            ..TherapyPlan::default()
        };
        guidelines.insert("malignant", plan.clone());
        for confidence in [0.55, 0.95] {
            assert_eq!(predict_therapy(&diagnosis("Malignant", confidence), &guidelines), plan);
        }
        let benign = predict_therapy(&diagnosis("Benign", 0.99), &guidelines);
        assert_eq!(benign.primary_treatment, "Active Surveillance");
    }

    #[test]
    fn fallback_rule_matches_the_three_branches() {
        let empty = GuidelineTable::new();
        let certain = predict_therapy(&diagnosis("Malignant", 0.95), &empty);
        assert_eq!(certain.primary_treatment, "Surgery + Chemotherapy + Radiation");
        assert_eq!(certain.urgency, "Immediate");
        assert_eq!(certain.success_rate, Some(0.85));

        let unsure = fallback_therapy(true, 0.7);
        assert_eq!(unsure.primary_treatment, "Surgery + Targeted Therapy");
        assert_eq!(unsure.urgency, "High Priority");

        let benign = fallback_therapy(false, 0.2);
        assert_eq!(benign.success_rate, Some(0.95));
        assert_eq!(benign.side_effects.len(), 4);
        assert_eq!(benign.alternative_treatments, ["Immunotherapy", "Hormone Therapy", "Clinical Trials"]);
    }

    #[test]
    fn recommendation_prepends_primary_and_derives_timeline() {
        let recommendation = TherapyRecommendation::from(fallback_therapy(true, 0.95));
        assert_eq!(recommendation.recommendations.len(), 4);
        assert_eq!(recommendation.recommendations[0], "Surgery + Chemotherapy + Radiation");
        assert_eq!(recommendation.priority, "Immediate");
        assert_eq!(recommendation.timeline, "Immediate");

        let plan = TherapyPlan {
            urgency: "immediately after staging".to_string(),
            ..TherapyPlan::default()
        };
        let from_partial_entry = TherapyRecommendation::from(plan);
        assert_eq!(from_partial_entry.timeline, "Immediate");
        assert!(from_partial_entry.recommendations.is_empty());
        assert_eq!(
            TherapyRecommendation::from(fallback_therapy(false, 0.99)).timeline,
            "Routine"
        );
    }
}
