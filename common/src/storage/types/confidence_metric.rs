use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::quality_insert_error},
    stored_object,
};
use uuid::Uuid;

/// `extraction_index` of -1 marks the conversation-level aggregate row;
/// per-extraction rows use their 0-based index.
pub const OVERALL_EXTRACTION_INDEX: i32 = -1;

stored_object!(ConfidenceMetric, "confidence_metrics", {
    conversation_id: String,
    patient_id: String,
    extraction_index: i32,
    retrieval_confidence: f32,
    source_confidence: f32,
    extraction_confidence: f32,
    consistency_confidence: f32,
    aggregate_confidence: f32,
    uncertainty_level: String,
    low_confidence_reasons: Vec<String>,
    recommendation: Option<String>
});

impl ConfidenceMetric {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conversation_id: String,
        patient_id: String,
        extraction_index: i32,
        factors: [f32; 4],
        aggregate_confidence: f32,
        uncertainty_level: String,
    ) -> Self {
        let now = Utc::now();
        let [retrieval_confidence, source_confidence, extraction_confidence, consistency_confidence] =
            factors;
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            conversation_id,
            patient_id,
            extraction_index,
            retrieval_confidence,
            source_confidence,
            extraction_confidence,
            consistency_confidence,
            aggregate_confidence,
            uncertainty_level,
            low_confidence_reasons: Vec::new(),
            recommendation: None,
        }
    }

    pub async fn insert(self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.store_item(self).await.map_err(quality_insert_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn per_extraction_rows_coexist_but_duplicates_fail() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.apply_migrations(3).await.expect("migrations");

        let make = |index: i32| {
            ConfidenceMetric::new(
                "conversation-1".into(),
                "patient-1".into(),
                index,
                [0.8, 0.9, 0.85, 1.0],
                0.88,
                "low".into(),
            )
        };

        make(0).insert(&db).await.expect("extraction row");
        make(1).insert(&db).await.expect("second extraction row");
        make(OVERALL_EXTRACTION_INDEX)
            .insert(&db)
            .await
            .expect("overall row");

        let err = make(0).insert(&db).await.expect_err("duplicate index");
        assert!(matches!(err, AppError::IntegrityViolation(_)));
    }
}
