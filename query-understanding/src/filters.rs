use chrono::{DateTime, Utc};
use common::storage::types::artifact::ArtifactType;
use serde::{Deserialize, Serialize};

use crate::{intent::QueryIntent, temporal::TemporalWindow};

/// Artifact-level predicates handed to the retrieval pipeline's metadata
/// filter. `artifact_types` of `None` means no type restriction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    pub artifact_types: Option<Vec<ArtifactType>>,
    pub occurred_from: Option<DateTime<Utc>>,
    pub occurred_to: Option<DateTime<Utc>>,
}

impl QueryFilters {
    /// Maps the intent to allowed artifact types (singular spellings, as
    /// stored in the metadata store) and folds in the temporal window.
    pub fn build(intent: QueryIntent, temporal: Option<&TemporalWindow>) -> Self {
        let artifact_types = match intent {
            QueryIntent::RetrieveMedications => Some(vec![ArtifactType::Medication]),
            QueryIntent::RetrieveCarePlans => Some(vec![ArtifactType::CarePlan]),
            QueryIntent::RetrieveNotes => Some(vec![ArtifactType::Note]),
            QueryIntent::Summary
            | QueryIntent::Comparison
            | QueryIntent::RetrieveAll
            | QueryIntent::Unknown => None,
        };

        Self {
            artifact_types,
            occurred_from: temporal.and_then(|w| w.from),
            occurred_to: temporal.and_then(|w| w.to),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn medication_intent_restricts_to_medication_type() {
        let filters = QueryFilters::build(QueryIntent::RetrieveMedications, None);
        assert_eq!(
            filters.artifact_types,
            Some(vec![ArtifactType::Medication])
        );
    }

    #[test]
    fn care_plan_intent_uses_singular_spelling() {
        let filters = QueryFilters::build(QueryIntent::RetrieveCarePlans, None);
        let types = filters.artifact_types.expect("types");
        assert_eq!(types[0].as_str(), "care_plan");
    }

    #[test]
    fn summary_intent_leaves_types_open() {
        let filters = QueryFilters::build(QueryIntent::Summary, None);
        assert!(filters.artifact_types.is_none());
    }

    #[test]
    fn temporal_window_becomes_date_range() {
        let now = Utc::now();
        let window = TemporalWindow {
            from: Some(now - Duration::days(90)),
            to: Some(now),
            label: "last 3 months".into(),
        };

        let filters = QueryFilters::build(QueryIntent::RetrieveMedications, Some(&window));
        assert!(filters.occurred_from.is_some());
        assert_eq!(filters.occurred_to, Some(now));
    }
}
