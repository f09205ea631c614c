use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::quality_insert_error},
    stored_object,
};
use uuid::Uuid;

stored_object!(HallucinationDetection, "hallucination_detections", {
    conversation_id: String,
    patient_id: String,
    risk: f32,
    risk_level: String,
    detected: bool,
    method: String,
    semantic_consistency: Option<f32>,
    sample_count: Option<u32>
});

impl HallucinationDetection {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conversation_id: String,
        patient_id: String,
        risk: f32,
        risk_level: String,
        detected: bool,
        method: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            conversation_id,
            patient_id,
            risk,
            risk_level,
            detected,
            method,
            semantic_consistency: None,
            sample_count: None,
        }
    }

    pub async fn insert(self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.store_item(self).await.map_err(quality_insert_error)?;
        Ok(())
    }
}
