use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Medication,
    Condition,
    Symptom,
    Date,
    Person,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicalEntity {
    pub kind: EntityKind,
    pub value: String,
}

/// Curated gazetteer of common medications. Matching is whole-word and
/// case-insensitive.
const MEDICATIONS: &[&str] = &[
    "atorvastatin",
    "lisinopril",
    "metformin",
    "aspirin",
    "ibuprofen",
    "insulin",
    "warfarin",
    "amlodipine",
    "metoprolol",
    "omeprazole",
    "simvastatin",
    "levothyroxine",
    "gabapentin",
    "prednisone",
    "albuterol",
    "sertraline",
    "hydrochlorothiazide",
    "losartan",
];

const CONDITIONS: &[&str] = &[
    "diabetes",
    "hypertension",
    "asthma",
    "copd",
    "depression",
    "anxiety",
    "arthritis",
    "cancer",
    "obesity",
    "hyperlipidemia",
    "anemia",
    "pneumonia",
    "migraine",
    "hypothyroidism",
    "allergy",
    "allergies",
];

const SYMPTOMS: &[&str] = &[
    "pain",
    "headache",
    "fever",
    "cough",
    "fatigue",
    "nausea",
    "dizziness",
    "rash",
    "swelling",
    "insomnia",
];

fn person_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"\b[Dd]r\.?\s+([A-Z][a-z]+)").expect("valid regex")
    })
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"\b(\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{4}|(?:19|20)\d{2})\b")
            .expect("valid regex")
    })
}

/// Recognizes medications, conditions, symptoms, dates, and persons in the
/// query. Results are deduplicated, preserving first-mention order.
pub fn extract(query: &str) -> Vec<ClinicalEntity> {
    let mut entities = Vec::new();
    let lowered = query.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    for token in &tokens {
        if MEDICATIONS.contains(token) {
            push_unique(&mut entities, EntityKind::Medication, token);
        } else if CONDITIONS.contains(token) {
            push_unique(&mut entities, EntityKind::Condition, token);
        } else if SYMPTOMS.contains(token) {
            push_unique(&mut entities, EntityKind::Symptom, token);
        }
    }

    // Multi-word symptoms the token pass cannot see.
    for phrase in ["shortness of breath", "chest pain", "back pain"] {
        if lowered.contains(phrase) {
            push_unique(&mut entities, EntityKind::Symptom, phrase);
        }
    }

    for caps in person_re().captures_iter(query) {
        if let Some(name) = caps.get(1) {
            push_unique(&mut entities, EntityKind::Person, name.as_str());
        }
    }

    for caps in date_re().captures_iter(query) {
        if let Some(date) = caps.get(1) {
            push_unique(&mut entities, EntityKind::Date, date.as_str());
        }
    }

    entities
}

fn push_unique(entities: &mut Vec<ClinicalEntity>, kind: EntityKind, value: &str) {
    let value = value.to_lowercase();
    if !entities.iter().any(|e| e.kind == kind && e.value == value) {
        entities.push(ClinicalEntity { kind, value });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_medications_and_conditions() {
        let entities = extract("Is the metformin controlling the diabetes?");

        assert!(entities
            .iter()
            .any(|e| e.kind == EntityKind::Medication && e.value == "metformin"));
        assert!(entities
            .iter()
            .any(|e| e.kind == EntityKind::Condition && e.value == "diabetes"));
    }

    #[test]
    fn recognizes_multi_word_symptoms() {
        let entities = extract("Patient reports shortness of breath after walking");
        assert!(entities
            .iter()
            .any(|e| e.kind == EntityKind::Symptom && e.value == "shortness of breath"));
    }

    #[test]
    fn recognizes_persons_with_doctor_prefix() {
        let entities = extract("What did Dr. Chen note last visit?");
        assert!(entities
            .iter()
            .any(|e| e.kind == EntityKind::Person && e.value == "chen"));
    }

    #[test]
    fn recognizes_date_literals() {
        let entities = extract("labs from 2024-03-15");
        assert!(entities
            .iter()
            .any(|e| e.kind == EntityKind::Date && e.value == "2024-03-15"));
    }

    #[test]
    fn duplicate_mentions_collapse() {
        let entities = extract("aspirin and more aspirin");
        let count = entities
            .iter()
            .filter(|e| e.kind == EntityKind::Medication)
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn plain_text_yields_no_entities() {
        assert!(extract("how are things going").is_empty());
    }
}
