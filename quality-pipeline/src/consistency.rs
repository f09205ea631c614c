use answer_pipeline::{AnswerDraft, Extraction};
use chrono::{DateTime, Duration, Utc};
use common::storage::types::conversation_record::ConversationRecord;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How far back the checker looks for prior conversations.
pub const HISTORY_WINDOW_DAYS: i64 = 30;
/// Dosage changes within this many days are suspicious for medications.
const DOSAGE_CHANGE_WINDOW_DAYS: i64 = 7;

const DISCONTINUATION_PHRASES: &[&str] = &["discontinued", "stopped", "no longer taking"];

/// Keywords watched by the semantic check.
const SEMANTIC_KEYWORDS: &[&str] = &[
    "diabetes",
    "hypertension",
    "allergy",
    "medication",
    "condition",
];

const NEGATION_MARKERS: &[&str] = &["no ", "not ", "denies ", "without ", "negative for "];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const fn weight(self) -> f32 {
        match self {
            Self::Low => 0.05,
            Self::Medium => 0.15,
            Self::High => 0.30,
            Self::Critical => 0.50,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// A detected inconsistency between the current answer and a prior one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    pub current_statement: String,
    pub previous_statement: String,
    pub previous_conversation_id: String,
    pub previous_timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub explanation: String,
    pub entity_type: Option<String>,
    pub entity_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub consistency_score: f32,
    pub contradictions: Vec<Contradiction>,
    pub checked_conversations: usize,
    pub warnings: Vec<String>,
}

/// Runs the entity, temporal, and semantic checks against the patient's
/// recent conversations (the caller excludes the current one).
pub fn check(
    draft: &AnswerDraft,
    history: &[ConversationRecord],
    now: DateTime<Utc>,
) -> ConsistencyReport {
    let mut contradictions = Vec::new();

    for record in history {
        let past_extractions: Vec<Extraction> =
            serde_json::from_value(record.extractions.clone()).unwrap_or_default();
        let past_answer_text =
            format!("{} {}", record.short_answer, record.detailed_summary).to_lowercase();

        check_entities(draft, record, &past_extractions, now, &mut contradictions);
        check_temporal(draft, record, &past_answer_text, &mut contradictions);
        check_semantic(draft, record, &past_answer_text, &mut contradictions);
    }

    let penalty: f32 = contradictions.iter().map(|c| c.severity.weight()).sum();
    let consistency_score = (1.0 - penalty).max(0.0);

    let warnings = summarize_warnings(&contradictions);

    debug!(
        contradictions = contradictions.len(),
        checked = history.len(),
        score = consistency_score,
        "Consistency check complete"
    );

    ConsistencyReport {
        consistency_score,
        contradictions,
        checked_conversations: history.len(),
        warnings,
    }
}

/// Entity consistency: same-type extractions with the same value compared
/// across conversations.
fn check_entities(
    draft: &AnswerDraft,
    record: &ConversationRecord,
    past_extractions: &[Extraction],
    now: DateTime<Utc>,
    contradictions: &mut Vec<Contradiction>,
) {
    for current in &draft.extractions {
        let Some(current_name) = entity_value(current) else {
            continue;
        };

        for past in past_extractions {
            if past.extraction_type != current.extraction_type {
                continue;
            }
            let Some(past_name) = entity_value(past) else {
                continue;
            };
            if !current_name.eq_ignore_ascii_case(&past_name) {
                continue;
            }

            if current.extraction_type == "medication" {
                let current_dosage = current.content.get("dosage");
                let past_dosage = past.content.get("dosage");
                let recent =
                    now - record.query_timestamp <= Duration::days(DOSAGE_CHANGE_WINDOW_DAYS);
                if let (Some(current_dosage), Some(past_dosage)) = (current_dosage, past_dosage) {
                    if recent && !current_dosage.eq_ignore_ascii_case(past_dosage) {
                        contradictions.push(Contradiction {
                            current_statement: format!("{current_name} {current_dosage}"),
                            previous_statement: format!("{past_name} {past_dosage}"),
                            previous_conversation_id: record.id.clone(),
                            previous_timestamp: record.query_timestamp,
                            severity: Severity::Medium,
                            explanation: format!(
                                "dosage of {current_name} changed within {DOSAGE_CHANGE_WINDOW_DAYS} days"
                            ),
                            entity_type: Some(current.extraction_type.clone()),
                            entity_value: Some(current_name.clone()),
                        });
                    }
                }
            }

            if current.extraction_type == "condition" {
                let current_status = current.content.get("status").map(|s| s.to_lowercase());
                let past_status = past.content.get("status").map(|s| s.to_lowercase());
                if current_status.as_deref() == Some("active")
                    && past_status.as_deref() == Some("resolved")
                {
                    contradictions.push(Contradiction {
                        current_statement: format!("{current_name} active"),
                        previous_statement: format!("{past_name} resolved"),
                        previous_conversation_id: record.id.clone(),
                        previous_timestamp: record.query_timestamp,
                        severity: Severity::High,
                        explanation: format!(
                            "{current_name} reported active but previously resolved"
                        ),
                        entity_type: Some(current.extraction_type.clone()),
                        entity_value: Some(current_name.clone()),
                    });
                }
            }
        }
    }
}

/// Temporal consistency: a medication presented as current that a prior
/// answer described as discontinued.
fn check_temporal(
    draft: &AnswerDraft,
    record: &ConversationRecord,
    past_answer_text: &str,
    contradictions: &mut Vec<Contradiction>,
) {
    for current in &draft.extractions {
        if current.extraction_type != "medication" {
            continue;
        }
        let Some(name) = entity_value(current) else {
            continue;
        };
        let name_lower = name.to_lowercase();

        for sentence in past_answer_text.split(['.', '\n']) {
            if !sentence.contains(&name_lower) {
                continue;
            }
            if let Some(phrase) = DISCONTINUATION_PHRASES
                .iter()
                .find(|p| sentence.contains(**p))
            {
                contradictions.push(Contradiction {
                    current_statement: format!("{name} reported as current"),
                    previous_statement: sentence.trim().to_owned(),
                    previous_conversation_id: record.id.clone(),
                    previous_timestamp: record.query_timestamp,
                    severity: Severity::High,
                    explanation: format!("{name} was previously described as {phrase}"),
                    entity_type: Some("medication".into()),
                    entity_value: Some(name.clone()),
                });
                break;
            }
        }
    }
}

/// Semantic consistency over a fixed keyword set: the past answer negated
/// the keyword, the current one asserts it.
fn check_semantic(
    draft: &AnswerDraft,
    record: &ConversationRecord,
    past_answer_text: &str,
    contradictions: &mut Vec<Contradiction>,
) {
    let current_text =
        format!("{} {}", draft.short_answer, draft.detailed_summary).to_lowercase();

    for keyword in SEMANTIC_KEYWORDS {
        if !current_text.contains(keyword) || negated(&current_text, keyword) {
            continue;
        }
        if past_answer_text.contains(keyword) && negated(past_answer_text, keyword) {
            contradictions.push(Contradiction {
                current_statement: format!("mentions {keyword}"),
                previous_statement: format!("previously negated {keyword}"),
                previous_conversation_id: record.id.clone(),
                previous_timestamp: record.query_timestamp,
                severity: Severity::Medium,
                explanation: format!(
                    "current answer asserts {keyword} that a prior answer negated"
                ),
                entity_type: None,
                entity_value: Some((*keyword).to_owned()),
            });
        }
    }
}

fn negated(text: &str, keyword: &str) -> bool {
    NEGATION_MARKERS.iter().any(|marker| {
        text.find(keyword).is_some_and(|position| {
            let window_start = position.saturating_sub(marker.len() + 12);
            text.get(window_start..position)
                .map_or(false, |before| before.contains(marker))
        })
    })
}

fn entity_value(extraction: &Extraction) -> Option<String> {
    extraction
        .content
        .get("name")
        .or_else(|| extraction.content.get("value"))
        .cloned()
}

fn summarize_warnings(contradictions: &[Contradiction]) -> Vec<String> {
    if contradictions.is_empty() {
        return Vec::new();
    }

    let mut warnings = vec![format!(
        "{} contradiction(s) against recent conversation history",
        contradictions.len()
    )];

    for severity in [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ] {
        let count = contradictions
            .iter()
            .filter(|c| c.severity == severity)
            .count();
        if count > 0 {
            warnings.push(format!("{count} {} severity", severity.as_str()));
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use answer_pipeline::Provenance;

    fn extraction(extraction_type: &str, pairs: &[(&str, &str)]) -> Extraction {
        let content: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        Extraction {
            extraction_type: extraction_type.to_owned(),
            content,
            provenance: Provenance {
                artifact_id: "artifact-1".into(),
                chunk_id: "chunk-1".into(),
                char_offsets: None,
                supporting_text: String::new(),
                confidence: 0.9,
            },
        }
    }

    fn draft_with(extractions: Vec<Extraction>, short: &str) -> AnswerDraft {
        AnswerDraft {
            short_answer: short.to_owned(),
            detailed_summary: String::new(),
            extractions,
        }
    }

    fn past_record(short_answer: &str, extractions: Vec<Extraction>) -> ConversationRecord {
        let mut record = ConversationRecord::new(
            "patient-1".into(),
            "previous question".into(),
            "retrieve_medications".into(),
            short_answer.to_owned(),
            String::new(),
            "llama3.1:8b".into(),
        );
        record.extractions = serde_json::to_value(extractions).unwrap_or_default();
        record
    }

    #[test]
    fn no_history_scores_perfect() {
        let draft = draft_with(vec![], "Patient takes Metformin 500mg.");
        let report = check(&draft, &[], Utc::now());

        assert!((report.consistency_score - 1.0).abs() < f32::EPSILON);
        assert!(report.contradictions.is_empty());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn discontinued_medication_is_a_high_contradiction() {
        let draft = draft_with(
            vec![extraction("medication", &[("name", "Metformin")])],
            "The patient is currently on Metformin.",
        );
        let history = vec![past_record("Metformin was discontinued last month.", vec![])];

        let report = check(&draft, &history, Utc::now());

        assert_eq!(report.contradictions.len(), 1);
        assert_eq!(report.contradictions[0].severity, Severity::High);
        assert!(report.consistency_score <= 0.7);
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn dosage_change_within_seven_days_is_medium() {
        let draft = draft_with(
            vec![extraction(
                "medication",
                &[("name", "Lisinopril"), ("dosage", "20mg")],
            )],
            "Lisinopril 20mg daily.",
        );
        let history = vec![past_record(
            "Lisinopril prescribed.",
            vec![extraction(
                "medication",
                &[("name", "Lisinopril"), ("dosage", "10mg")],
            )],
        )];

        let report = check(&draft, &history, Utc::now());

        assert_eq!(report.contradictions.len(), 1);
        assert_eq!(report.contradictions[0].severity, Severity::Medium);
        assert!((report.consistency_score - 0.85).abs() < 1e-6);
    }

    #[test]
    fn active_condition_previously_resolved_is_high() {
        let draft = draft_with(
            vec![extraction(
                "condition",
                &[("name", "Pneumonia"), ("status", "active")],
            )],
            "Pneumonia is active.",
        );
        let history = vec![past_record(
            "Pneumonia resolved.",
            vec![extraction(
                "condition",
                &[("name", "Pneumonia"), ("status", "resolved")],
            )],
        )];

        let report = check(&draft, &history, Utc::now());

        assert_eq!(report.contradictions.len(), 1);
        assert_eq!(report.contradictions[0].severity, Severity::High);
    }

    #[test]
    fn negated_keyword_reasserted_is_medium() {
        let draft = draft_with(vec![], "The patient has diabetes managed with diet.");
        let history = vec![past_record("Patient denies diabetes.", vec![])];

        let report = check(&draft, &history, Utc::now());

        assert_eq!(report.contradictions.len(), 1);
        assert_eq!(report.contradictions[0].severity, Severity::Medium);
        assert_eq!(report.contradictions[0].entity_value.as_deref(), Some("diabetes"));
    }

    #[test]
    fn score_floor_is_zero() {
        let draft = draft_with(
            vec![extraction("medication", &[("name", "Metformin")])],
            "Metformin, diabetes, hypertension, allergy, medication, condition all present.",
        );
        let mut history = Vec::new();
        for _ in 0..4 {
            history.push(past_record("Metformin was discontinued.", vec![]));
        }

        let report = check(&draft, &history, Utc::now());
        assert!(report.consistency_score.abs() < f32::EPSILON);
    }

    #[test]
    fn matching_history_produces_no_contradictions() {
        let draft = draft_with(
            vec![extraction(
                "medication",
                &[("name", "Metformin"), ("dosage", "500mg")],
            )],
            "Metformin 500mg continues.",
        );
        let history = vec![past_record(
            "Metformin 500mg daily.",
            vec![extraction(
                "medication",
                &[("name", "Metformin"), ("dosage", "500mg")],
            )],
        )];

        let report = check(&draft, &history, Utc::now());
        assert!(report.contradictions.is_empty());
        assert!((report.consistency_score - 1.0).abs() < f32::EPSILON);
    }
}
