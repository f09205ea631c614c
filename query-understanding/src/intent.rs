use serde::{Deserialize, Serialize};
use std::fmt;

/// Two top intents within this margin are reported as ambiguous.
const AMBIGUITY_EPSILON: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    RetrieveMedications,
    RetrieveCarePlans,
    RetrieveNotes,
    Summary,
    Comparison,
    RetrieveAll,
    Unknown,
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::RetrieveMedications => "retrieve_medications",
            Self::RetrieveCarePlans => "retrieve_care_plans",
            Self::RetrieveNotes => "retrieve_notes",
            Self::Summary => "summary",
            Self::Comparison => "comparison",
            Self::RetrieveAll => "retrieve_all",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct IntentClassification {
    pub intent: QueryIntent,
    pub confidence: f32,
    pub ambiguous: Vec<QueryIntent>,
}

/// Common clinical shorthand expanded before keyword matching.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("bp", "blood pressure"),
    ("hr", "heart rate"),
    ("meds", "medications"),
    ("med", "medication"),
    ("rx", "prescription"),
    ("dx", "diagnosis"),
    ("hx", "history"),
    ("appt", "appointment"),
    ("labs", "lab results"),
];

const MEDICATION_KEYWORDS: &[&str] = &[
    "medication",
    "medications",
    "drug",
    "drugs",
    "prescription",
    "prescriptions",
    "prescribed",
    "taking",
    "dose",
    "dosage",
    "pill",
    "pills",
    "refill",
];

const CARE_PLAN_KEYWORDS: &[&str] = &[
    "care",
    "plan",
    "plans",
    "goal",
    "goals",
    "treatment",
    "therapy",
    "regimen",
];

const NOTE_KEYWORDS: &[&str] = &[
    "note",
    "notes",
    "visit",
    "visits",
    "encounter",
    "documented",
    "wrote",
    "charted",
];

const SUMMARY_KEYWORDS: &[&str] = &[
    "summary",
    "summarize",
    "overview",
    "history",
    "background",
    "recap",
];

const COMPARISON_KEYWORDS: &[&str] = &[
    "compare",
    "comparison",
    "versus",
    "difference",
    "change",
    "changed",
    "trend",
    "trends",
    "progression",
];

const RETRIEVE_ALL_KEYWORDS: &[&str] = &["everything", "all", "records", "record", "complete"];

fn expand_abbreviations(token: &str) -> String {
    for (short, long) in ABBREVIATIONS {
        if token == *short {
            return (*long).to_owned();
        }
    }
    token.to_owned()
}

fn tokenize(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| expand_abbreviations(&t.to_lowercase()))
        .collect()
}

fn score_keywords(tokens: &[String], keywords: &[&str]) -> f32 {
    let mut score = 0.0;
    for token in tokens {
        if keywords.contains(&token.as_str()) {
            score += 1.0;
        }
    }
    score
}

/// Rule-based intent classification. Each intent scores its keyword hits;
/// confidence is the winning score over the token count, clamped to [0,1].
pub fn classify(query: &str) -> IntentClassification {
    let tokens = tokenize(query);
    if tokens.is_empty() {
        return IntentClassification {
            intent: QueryIntent::Unknown,
            confidence: 0.0,
            ambiguous: Vec::new(),
        };
    }

    let scored = [
        (
            QueryIntent::RetrieveMedications,
            score_keywords(&tokens, MEDICATION_KEYWORDS),
        ),
        (
            QueryIntent::RetrieveCarePlans,
            score_keywords(&tokens, CARE_PLAN_KEYWORDS),
        ),
        (
            QueryIntent::RetrieveNotes,
            score_keywords(&tokens, NOTE_KEYWORDS),
        ),
        (
            QueryIntent::Summary,
            score_keywords(&tokens, SUMMARY_KEYWORDS),
        ),
        (
            QueryIntent::Comparison,
            score_keywords(&tokens, COMPARISON_KEYWORDS),
        ),
        (
            QueryIntent::RetrieveAll,
            score_keywords(&tokens, RETRIEVE_ALL_KEYWORDS),
        ),
    ];

    let mut best = (QueryIntent::Unknown, 0.0f32);
    for (intent, score) in scored {
        if score > best.1 {
            best = (intent, score);
        }
    }

    if best.1 <= 0.0 {
        return IntentClassification {
            intent: QueryIntent::Unknown,
            confidence: 0.0,
            ambiguous: Vec::new(),
        };
    }

    let ambiguous: Vec<QueryIntent> = scored
        .iter()
        .filter(|(intent, score)| *intent != best.0 && (best.1 - score).abs() < AMBIGUITY_EPSILON)
        .map(|(intent, _)| *intent)
        .collect();

    #[allow(clippy::cast_precision_loss)]
    let confidence = (best.1 / tokens.len() as f32).clamp(0.0, 1.0);

    IntentClassification {
        intent: best.0,
        confidence,
        ambiguous,
    }
}
