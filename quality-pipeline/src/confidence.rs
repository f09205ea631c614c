use std::collections::HashMap;

use answer_pipeline::AnswerDraft;
use common::storage::types::artifact::ArtifactType;
use retrieval_pipeline::RetrievalCandidate;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fixed weights of the four confidence factors.
const RETRIEVAL_WEIGHT: f32 = 0.30;
const SOURCE_WEIGHT: f32 = 0.20;
const EXTRACTION_WEIGHT: f32 = 0.30;
const CONSISTENCY_WEIGHT: f32 = 0.20;

const LOW_FACTOR_THRESHOLD: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintyLevel {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl UncertaintyLevel {
    pub fn for_confidence(confidence: f32) -> Self {
        if confidence >= 0.90 {
            Self::VeryLow
        } else if confidence >= 0.80 {
            Self::Low
        } else if confidence >= 0.60 {
            Self::Medium
        } else if confidence >= 0.40 {
            Self::High
        } else {
            Self::VeryHigh
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VeryLow => "very_low",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }
}

/// The four factors, each in [0,1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceFactors {
    pub retrieval_confidence: f32,
    pub source_confidence: f32,
    pub extraction_confidence: f32,
    pub consistency_confidence: f32,
}

impl ConfidenceFactors {
    pub fn aggregate(&self) -> f32 {
        (self.retrieval_confidence * RETRIEVAL_WEIGHT
            + self.source_confidence * SOURCE_WEIGHT
            + self.extraction_confidence * EXTRACTION_WEIGHT
            + self.consistency_confidence * CONSISTENCY_WEIGHT)
            .clamp(0.0, 1.0)
    }

    pub const fn as_array(&self) -> [f32; 4] {
        [
            self.retrieval_confidence,
            self.source_confidence,
            self.extraction_confidence,
            self.consistency_confidence,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfidence {
    pub extraction_index: usize,
    pub factors: ConfidenceFactors,
    pub aggregate_confidence: f32,
    pub uncertainty_level: UncertaintyLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceReport {
    pub overall_confidence: f32,
    pub uncertainty_level: UncertaintyLevel,
    pub per_extraction: Vec<ExtractionConfidence>,
    pub low_confidence_reasons: Vec<String>,
    pub recommendation: String,
}

/// Reliability prior per artifact type: structured clinical sources rank
/// above free-text messaging.
pub fn source_confidence(artifact_type: ArtifactType) -> f32 {
    match artifact_type {
        ArtifactType::LabObservation => 0.95,
        ArtifactType::Vital | ArtifactType::Medication => 0.90,
        ArtifactType::Condition | ArtifactType::Allergy => 0.85,
        ArtifactType::CarePlan => 0.80,
        ArtifactType::Document => 0.75,
        ArtifactType::Note => 0.70,
        ArtifactType::Appointment
        | ArtifactType::FormResponse
        | ArtifactType::Form
        | ArtifactType::IntakeFlow => 0.65,
        ArtifactType::FamilyHistory
        | ArtifactType::Task
        | ArtifactType::Superbill
        | ArtifactType::InsurancePolicy => 0.60,
        ArtifactType::Message => 0.50,
    }
}

/// Scores each extraction on the four factors and aggregates the overall
/// answer confidence as their mean.
pub fn aggregate(
    draft: &AnswerDraft,
    candidates: &[RetrievalCandidate],
    consistency_score: f32,
) -> ConfidenceReport {
    let by_chunk_id: HashMap<&str, &RetrievalCandidate> = candidates
        .iter()
        .map(|c| (c.chunk.id.as_str(), c))
        .collect();

    let mut per_extraction = Vec::with_capacity(draft.extractions.len());
    for (index, extraction) in draft.extractions.iter().enumerate() {
        let candidate = by_chunk_id.get(extraction.provenance.chunk_id.as_str());

        let factors = ConfidenceFactors {
            retrieval_confidence: candidate.map_or(0.5, |c| c.score.clamp(0.0, 1.0)),
            source_confidence: candidate
                .map_or(0.6, |c| source_confidence(c.chunk.artifact_type)),
            extraction_confidence: extraction.provenance.confidence.clamp(0.0, 1.0),
            consistency_confidence: consistency_score.clamp(0.0, 1.0),
        };

        let aggregate_confidence = factors.aggregate();
        per_extraction.push(ExtractionConfidence {
            extraction_index: index,
            factors,
            aggregate_confidence,
            uncertainty_level: UncertaintyLevel::for_confidence(aggregate_confidence),
        });
    }

    #[allow(clippy::cast_precision_loss)]
    let overall_confidence = if per_extraction.is_empty() {
        // An answer with no typed facts gives the factors nothing to
        // measure; report a neutral midpoint.
        0.5
    } else {
        per_extraction
            .iter()
            .map(|e| e.aggregate_confidence)
            .sum::<f32>()
            / per_extraction.len() as f32
    };

    let uncertainty_level = UncertaintyLevel::for_confidence(overall_confidence);
    let low_confidence_reasons = collect_reasons(&per_extraction, draft);
    let recommendation = recommend(uncertainty_level);

    debug!(
        overall = overall_confidence,
        extractions = per_extraction.len(),
        level = uncertainty_level.as_str(),
        "Confidence aggregation complete"
    );

    ConfidenceReport {
        overall_confidence,
        uncertainty_level,
        per_extraction,
        low_confidence_reasons,
        recommendation,
    }
}

fn collect_reasons(per_extraction: &[ExtractionConfidence], draft: &AnswerDraft) -> Vec<String> {
    let mut reasons = Vec::new();

    if per_extraction.is_empty() {
        reasons.push("answer contains no typed extractions to score".to_owned());
        return reasons;
    }

    for entry in per_extraction {
        let label = draft
            .extractions
            .get(entry.extraction_index)
            .map_or_else(|| entry.extraction_index.to_string(), |e| {
                e.content
                    .get("name")
                    .cloned()
                    .unwrap_or_else(|| e.extraction_type.clone())
            });

        if entry.factors.retrieval_confidence < LOW_FACTOR_THRESHOLD {
            reasons.push(format!("weak retrieval support for {label}"));
        }
        if entry.factors.source_confidence < LOW_FACTOR_THRESHOLD {
            reasons.push(format!("low-reliability source type for {label}"));
        }
        if entry.factors.extraction_confidence < LOW_FACTOR_THRESHOLD {
            reasons.push(format!("parser reported low confidence for {label}"));
        }
        if entry.factors.consistency_confidence < LOW_FACTOR_THRESHOLD {
            reasons.push(format!("answer conflicts with recent history ({label})"));
        }
    }

    reasons.dedup();
    reasons
}

fn recommend(level: UncertaintyLevel) -> String {
    match level {
        UncertaintyLevel::VeryLow | UncertaintyLevel::Low => {
            "Answer is well supported; safe to present with citations.".to_owned()
        }
        UncertaintyLevel::Medium => {
            "Present the answer with its sources and flag moderate uncertainty.".to_owned()
        }
        UncertaintyLevel::High | UncertaintyLevel::VeryHigh => {
            "Manual review recommended before relying on this answer.".to_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use answer_pipeline::{Extraction, Provenance};
    use chrono::Utc;
    use common::storage::types::record_chunk::RecordChunk;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn candidate(artifact_type: ArtifactType, score: f32) -> RetrievalCandidate {
        let chunk = RecordChunk::new(
            Uuid::new_v4().to_string(),
            "patient-1".into(),
            artifact_type,
            Utc::now(),
            None,
            "Medication: Metformin. Dosage: 500mg.".into(),
        );
        RetrievalCandidate {
            chunk,
            score,
            snippet: String::new(),
            highlights: Vec::new(),
            rank: 1,
        }
    }

    fn extraction_for(candidate: &RetrievalCandidate, confidence: f32) -> Extraction {
        Extraction {
            extraction_type: "medication".into(),
            content: BTreeMap::from([("name".to_owned(), "Metformin".to_owned())]),
            provenance: Provenance {
                artifact_id: candidate.chunk.artifact_id.clone(),
                chunk_id: candidate.chunk.id.clone(),
                char_offsets: None,
                supporting_text: String::new(),
                confidence,
            },
        }
    }

    fn draft_with(extractions: Vec<Extraction>) -> AnswerDraft {
        AnswerDraft {
            short_answer: "Metformin 500mg.".into(),
            detailed_summary: String::new(),
            extractions,
        }
    }

    #[test]
    fn uncertainty_levels_follow_the_thresholds() {
        assert_eq!(
            UncertaintyLevel::for_confidence(0.95),
            UncertaintyLevel::VeryLow
        );
        assert_eq!(UncertaintyLevel::for_confidence(0.85), UncertaintyLevel::Low);
        assert_eq!(
            UncertaintyLevel::for_confidence(0.70),
            UncertaintyLevel::Medium
        );
        assert_eq!(UncertaintyLevel::for_confidence(0.50), UncertaintyLevel::High);
        assert_eq!(
            UncertaintyLevel::for_confidence(0.20),
            UncertaintyLevel::VeryHigh
        );
    }

    #[test]
    fn lab_sources_outrank_notes_and_messages() {
        assert!(
            source_confidence(ArtifactType::LabObservation)
                > source_confidence(ArtifactType::Note)
        );
        assert!(source_confidence(ArtifactType::Note) > source_confidence(ArtifactType::Message));
    }

    #[test]
    fn aggregate_is_the_weighted_mean_of_factors() {
        let factors = ConfidenceFactors {
            retrieval_confidence: 1.0,
            source_confidence: 1.0,
            extraction_confidence: 1.0,
            consistency_confidence: 1.0,
        };
        assert!((factors.aggregate() - 1.0).abs() < f32::EPSILON);

        let half = ConfidenceFactors {
            retrieval_confidence: 0.5,
            source_confidence: 0.5,
            extraction_confidence: 0.5,
            consistency_confidence: 0.5,
        };
        assert!((half.aggregate() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn well_supported_extraction_scores_high() {
        let candidate = candidate(ArtifactType::Medication, 0.9);
        let draft = draft_with(vec![extraction_for(&candidate, 0.9)]);

        let report = aggregate(&draft, std::slice::from_ref(&candidate), 1.0);

        assert!(report.overall_confidence > 0.85);
        assert!(report.low_confidence_reasons.is_empty());
        assert_eq!(report.per_extraction.len(), 1);
    }

    #[test]
    fn poor_consistency_drags_confidence_down_with_reason() {
        let candidate = candidate(ArtifactType::Medication, 0.9);
        let draft = draft_with(vec![extraction_for(&candidate, 0.9)]);

        let report = aggregate(&draft, std::slice::from_ref(&candidate), 0.2);

        assert!(report.overall_confidence < 0.85);
        assert!(report
            .low_confidence_reasons
            .iter()
            .any(|r| r.contains("conflicts with recent history")));
    }

    #[test]
    fn unmatched_chunk_falls_back_to_neutral_factors() {
        let candidate = candidate(ArtifactType::Medication, 0.9);
        let mut extraction = extraction_for(&candidate, 0.9);
        extraction.provenance.chunk_id = "missing-chunk".into();
        let draft = draft_with(vec![extraction]);

        let report = aggregate(&draft, std::slice::from_ref(&candidate), 1.0);

        let factors = report.per_extraction[0].factors;
        assert!((factors.retrieval_confidence - 0.5).abs() < f32::EPSILON);
        assert!((factors.source_confidence - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn no_extractions_reports_neutral_midpoint() {
        let report = aggregate(&draft_with(vec![]), &[], 1.0);

        assert!((report.overall_confidence - 0.5).abs() < f32::EPSILON);
        assert_eq!(report.uncertainty_level, UncertaintyLevel::High);
        assert!(!report.low_confidence_reasons.is_empty());
    }
}
