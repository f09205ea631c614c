use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGrade {
    Excellent,
    Good,
    Acceptable,
    Poor,
    Unacceptable,
}

impl QualityGrade {
    pub fn for_score(score: f32) -> Self {
        if score >= 0.90 {
            Self::Excellent
        } else if score >= 0.80 {
            Self::Good
        } else if score >= 0.70 {
            Self::Acceptable
        } else if score >= 0.50 {
            Self::Poor
        } else {
            Self::Unacceptable
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Acceptable => "acceptable",
            Self::Poor => "poor",
            Self::Unacceptable => "unacceptable",
        }
    }
}

/// The graded quality report attached to every answer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub grounding_score: f32,
    pub consistency_score: f32,
    pub confidence_score: f32,
    pub hallucination_risk: f32,
    pub overall_quality_score: f32,
    pub quality_grade: QualityGrade,
}

impl QualityMetrics {
    /// `overall = 0.35 g + 0.25 c + 0.25 conf + 0.15 (1 - risk)`.
    pub fn aggregate(
        grounding_score: f32,
        consistency_score: f32,
        confidence_score: f32,
        hallucination_risk: f32,
    ) -> Self {
        let overall_quality_score = (0.35 * grounding_score
            + 0.25 * consistency_score
            + 0.25 * confidence_score
            + 0.15 * (1.0 - hallucination_risk))
            .clamp(0.0, 1.0);

        Self {
            grounding_score,
            consistency_score,
            confidence_score,
            hallucination_risk,
            overall_quality_score,
            quality_grade: QualityGrade::for_score(overall_quality_score),
        }
    }

    /// The hard gate: grounding >= 0.7, consistency >= 0.8, confidence >=
    /// 0.6, hallucination risk < 0.3.
    pub fn passes_quality_checks(&self) -> bool {
        self.grounding_score >= 0.7
            && self.consistency_score >= 0.8
            && self.confidence_score >= 0.6
            && self.hallucination_risk < 0.3
    }
}
