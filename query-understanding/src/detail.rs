use serde::{Deserialize, Serialize};

use crate::{entities::ClinicalEntity, intent::QueryIntent, temporal::TemporalWindow};

/// Response-shape constraints fixed by the detail level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseConstraints {
    pub max_short_answer_words: usize,
    pub summary_bullets: usize,
    pub min_sources: usize,
    pub include_reasoning: bool,
}

impl ResponseConstraints {
    pub const fn for_level(level: u8) -> Self {
        match level {
            1 => Self {
                max_short_answer_words: 10,
                summary_bullets: 1,
                min_sources: 1,
                include_reasoning: false,
            },
            2 => Self {
                max_short_answer_words: 20,
                summary_bullets: 2,
                min_sources: 1,
                include_reasoning: false,
            },
            4 => Self {
                max_short_answer_words: 60,
                summary_bullets: 5,
                min_sources: 3,
                include_reasoning: true,
            },
            5 => Self {
                max_short_answer_words: 80,
                summary_bullets: 6,
                min_sources: 4,
                include_reasoning: true,
            },
            _ => Self {
                max_short_answer_words: 40,
                summary_bullets: 4,
                min_sources: 2,
                include_reasoning: true,
            },
        }
    }
}

const YES_NO_LEADS: &[&str] = &[
    "is", "are", "was", "were", "does", "do", "did", "has", "have", "had", "can", "could",
    "should", "will",
];

const FACTOID_LEADS: &[&str] = &["what", "when", "who", "which"];

const ANALYSIS_KEYWORDS: &[&str] = &[
    "analyze",
    "analysis",
    "compare",
    "why",
    "explain",
    "trend",
    "trends",
    "correlate",
    "assess",
    "evaluate",
    "interpret",
];

const FACTOID_MAX_TOKENS: usize = 8;

/// Detail-level rules, applied in precedence order:
/// yes/no → 1; short factoid → 2; analysis keywords → 5; compound queries →
/// 4; intent-driven (summary 4, comparison 5); otherwise 3.
pub fn analyze(
    query: &str,
    intent: QueryIntent,
    entities: &[ClinicalEntity],
    temporal: Option<&TemporalWindow>,
) -> u8 {
    let lowered = query.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    let first = tokens.first().copied().unwrap_or_default();

    if YES_NO_LEADS.contains(&first) {
        return 1;
    }

    if FACTOID_LEADS.contains(&first) && tokens.len() <= FACTOID_MAX_TOKENS {
        return 2;
    }

    if tokens.iter().any(|t| ANALYSIS_KEYWORDS.contains(t)) {
        return 5;
    }

    let time_refs = usize::from(temporal.is_some());
    let compound = lowered.contains(" and ") || lowered.contains(" or ");
    if entities.len() >= 3 || time_refs >= 2 || (compound && entities.len() >= 2) {
        return 4;
    }

    match intent {
        QueryIntent::Summary => 4,
        QueryIntent::Comparison => 5,
        _ => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EntityKind;

    fn entity(kind: EntityKind, value: &str) -> ClinicalEntity {
        ClinicalEntity {
            kind,
            value: value.into(),
        }
    }

    #[test]
    fn yes_no_question_is_level_one() {
        assert_eq!(
            analyze("Is patient on aspirin?", QueryIntent::Unknown, &[], None),
            1
        );
    }

    #[test]
    fn short_factoid_is_level_two() {
        assert_eq!(
            analyze(
                "When was the last visit?",
                QueryIntent::RetrieveNotes,
                &[],
                None
            ),
            2
        );
    }

    #[test]
    fn analysis_keyword_is_level_five() {
        assert_eq!(
            analyze(
                "Please analyze the glucose readings over time",
                QueryIntent::Unknown,
                &[],
                None
            ),
            5
        );
    }

    #[test]
    fn many_entities_is_level_four() {
        let entities = vec![
            entity(EntityKind::Medication, "metformin"),
            entity(EntityKind::Condition, "diabetes"),
            entity(EntityKind::Symptom, "fatigue"),
        ];
        assert_eq!(
            analyze(
                "medications for diabetes alongside the fatigue",
                QueryIntent::RetrieveMedications,
                &entities,
                None
            ),
            4
        );
    }

    #[test]
    fn summary_intent_is_level_four() {
        assert_eq!(
            analyze("patient overview", QueryIntent::Summary, &[], None),
            4
        );
    }

    #[test]
    fn comparison_intent_is_level_five() {
        assert_eq!(
            analyze("bp readings over visits", QueryIntent::Comparison, &[], None),
            5
        );
    }

    #[test]
    fn default_is_level_three() {
        assert_eq!(
            analyze(
                "medications for the patient",
                QueryIntent::RetrieveMedications,
                &[],
                None
            ),
            3
        );
    }

    #[test]
    fn level_five_constraints_require_six_bullets_and_four_sources() {
        let constraints = ResponseConstraints::for_level(5);
        assert_eq!(constraints.summary_bullets, 6);
        assert_eq!(constraints.min_sources, 4);
        assert!(constraints.include_reasoning);
    }

    #[test]
    fn level_one_constraints_cap_words_at_ten() {
        let constraints = ResponseConstraints::for_level(1);
        assert_eq!(constraints.max_short_answer_words, 10);
        assert!(!constraints.include_reasoning);
    }
}
