pub mod detail;
pub mod entities;
pub mod filters;
pub mod intent;
pub mod temporal;

use chrono::{DateTime, Utc};
use common::error::AppError;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

pub use detail::ResponseConstraints;
pub use entities::{ClinicalEntity, EntityKind};
pub use filters::QueryFilters;
pub use intent::QueryIntent;
pub use temporal::TemporalWindow;

const MAX_QUERY_CHARS: usize = 1_000;

/// Structured form of a free-text clinical question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredQuery {
    pub query_id: String,
    pub original_query: String,
    pub patient_id: String,
    pub intent: QueryIntent,
    pub intent_confidence: f32,
    /// Populated when two intents tie within epsilon; metadata only.
    pub ambiguous_intents: Vec<QueryIntent>,
    pub entities: Vec<ClinicalEntity>,
    pub temporal_filter: Option<TemporalWindow>,
    pub filters: QueryFilters,
    pub detail_level: u8,
    pub constraints: ResponseConstraints,
}

/// Parses a clinical question into its structured form. The four sub-steps
/// run in order: temporal parsing, intent classification, entity
/// extraction, detail-level analysis.
#[instrument(skip_all, fields(patient_id))]
pub fn parse(
    query: &str,
    patient_id: &str,
    now: DateTime<Utc>,
) -> Result<StructuredQuery, AppError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidInput("query must not be empty".into()));
    }
    if trimmed.chars().count() > MAX_QUERY_CHARS {
        return Err(AppError::InvalidInput(format!(
            "query exceeds {MAX_QUERY_CHARS} characters"
        )));
    }
    if patient_id.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "patient_id must not be empty".into(),
        ));
    }

    let temporal_filter = temporal::parse_window(trimmed, now);
    let classification = intent::classify(trimmed);
    let entities = entities::extract(trimmed);
    let detail_level = detail::analyze(
        trimmed,
        classification.intent,
        &entities,
        temporal_filter.as_ref(),
    );
    let constraints = ResponseConstraints::for_level(detail_level);
    let filters = QueryFilters::build(classification.intent, temporal_filter.as_ref());

    debug!(
        intent = %classification.intent,
        confidence = classification.confidence,
        entities = entities.len(),
        detail_level,
        temporal = temporal_filter.is_some(),
        "Parsed clinical query"
    );

    Ok(StructuredQuery {
        query_id: Uuid::new_v4().to_string(),
        original_query: trimmed.to_owned(),
        patient_id: patient_id.to_owned(),
        intent: classification.intent,
        intent_confidence: classification.confidence,
        ambiguous_intents: classification.ambiguous,
        entities,
        temporal_filter,
        filters,
        detail_level,
        constraints,
    })
}
